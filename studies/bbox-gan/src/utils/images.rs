use std::fs;
use std::path::{ Path, PathBuf };

use anyhow::{ Context, Result };
use image::{ Rgb, RgbImage };
use tracing::debug;

use crate::data::{ SampleProvider, COORDS_PER_BOX };

const HISTORY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const GENERATED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const REAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draws a box sequence (pixel space) for visual inspection.
pub trait FrameRenderer {
    fn draw(
        &self,
        sample_set: &str,
        frame: u32,
        object_id: i64,
        boxes: &[[f32; COORDS_PER_BOX]],
        is_generated: bool,
        output_dir: &Path
    ) -> Result<()>;
}

/// Draws onto the KITTI frame when it is on disk, onto a black canvas of the
/// set's frame size otherwise.
pub struct ImageRenderer<'a> {
    image_root: Option<PathBuf>,
    frames: &'a dyn SampleProvider,
}

impl<'a> ImageRenderer<'a> {
    /// `frames` gives the canvas size of each sample set.
    pub fn new(image_root: Option<PathBuf>, frames: &'a dyn SampleProvider) -> Self {
        Self { image_root, frames }
    }

    fn load_frame(&self, sample_set: &str, frame: u32) -> Result<RgbImage> {
        if let Some(root) = &self.image_root {
            let path = root.join(sample_set).join(format!("{frame:06}.png"));
            if path.is_file() {
                let img = image::open(&path).with_context(|| format!("failed to open frame {}", path.display()))?;
                return Ok(img.to_rgb8());
            }
            debug!("frame {} not found, drawing on a blank canvas", path.display());
        }
        let size = self.frames.frame_size(sample_set);
        Ok(RgbImage::new(size.width as u32, size.height as u32))
    }
}

impl FrameRenderer for ImageRenderer<'_> {
    fn draw(
        &self,
        sample_set: &str,
        frame: u32,
        object_id: i64,
        boxes: &[[f32; COORDS_PER_BOX]],
        is_generated: bool,
        output_dir: &Path
    ) -> Result<()> {
        let mut img = self.load_frame(sample_set, frame)?;

        let highlight = if is_generated { GENERATED_COLOR } else { REAL_COLOR };
        let last = boxes.len().saturating_sub(1);
        for (i, bbox) in boxes.iter().enumerate() {
            let color = if i == last { highlight } else { HISTORY_COLOR };
            draw_bounding_box(&mut img, *bbox, color);
        }

        fs::create_dir_all(output_dir).with_context(||
            format!("failed to create {}", output_dir.display())
        )?;
        let tag = if is_generated { "gen" } else { "real" };
        let path = output_dir.join(format!("{sample_set}_{frame:06}_{object_id}_{tag}.png"));
        img.save(&path).with_context(|| format!("failed to save {}", path.display()))?;
        debug!("saved {}", path.display());
        Ok(())
    }
}

/// Two-pixel outline of (left, top, right, bottom), clipped to the image.
pub fn draw_bounding_box(img: &mut RgbImage, bbox: [f32; COORDS_PER_BOX], color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clip = |v: f32, max: u32| -> u32 { v.round().clamp(0.0, (max - 1) as f32) as u32 };

    let (mut x1, mut y1) = (clip(bbox[0], width), clip(bbox[1], height));
    let (mut x2, mut y2) = (clip(bbox[2], width), clip(bbox[3], height));
    if x2 < x1 {
        std::mem::swap(&mut x1, &mut x2);
    }
    if y2 < y1 {
        std::mem::swap(&mut y1, &mut y2);
    }

    for t in 0..2u32 {
        for x in x1..=x2 {
            img.put_pixel(x, (y1 + t).min(height - 1), color); // top
            img.put_pixel(x, y2.saturating_sub(t), color); // bottom
        }
        for y in y1..=y2 {
            img.put_pixel((x1 + t).min(width - 1), y, color); // left
            img.put_pixel(x2.saturating_sub(t), y, color); // right
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ FrameSize, InMemoryProvider, SampleSet };

    /// Gives every set its own size, keyed by name.
    struct PerSetSizes;

    impl SampleProvider for PerSetSizes {
        fn get_all_samples(&self, _normalize: bool) -> Result<SampleSet> {
            Ok(SampleSet::default())
        }

        fn frame_size(&self, sample_set: &str) -> FrameSize {
            match sample_set {
                "0000" => FrameSize::new(48.0, 16.0),
                _ => FrameSize::new(30.0, 90.0),
            }
        }
    }

    #[test]
    fn box_outline_is_clipped_to_the_frame() {
        let mut img = RgbImage::new(20, 10);
        draw_bounding_box(&mut img, [-5.0, 2.0, 50.0, 7.0], REAL_COLOR);
        assert_eq!(*img.get_pixel(0, 2), REAL_COLOR);
        assert_eq!(*img.get_pixel(19, 7), REAL_COLOR);
        assert_eq!(*img.get_pixel(10, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn renderer_writes_one_image_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InMemoryProvider::new(SampleSet::default(), FrameSize::new(64.0, 32.0));
        let renderer = ImageRenderer::new(None, &provider);
        let boxes = vec![[4.0, 4.0, 20.0, 20.0]; 11];
        renderer.draw("0016", 40, 2, &boxes, true, dir.path()).unwrap();
        renderer.draw("0016", 40, 2, &boxes, false, dir.path()).unwrap();

        let generated = image::open(dir.path().join("0016_000040_2_gen.png")).unwrap().to_rgb8();
        assert_eq!(generated.dimensions(), (64, 32));
        assert_eq!(*generated.get_pixel(4, 4), GENERATED_COLOR);
        assert!(dir.path().join("0016_000040_2_real.png").is_file());
    }

    #[test]
    fn blank_canvas_matches_each_set_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ImageRenderer::new(Some(dir.path().join("missing")), &PerSetSizes);
        let boxes = vec![[1.0, 1.0, 8.0, 8.0]; 11];
        renderer.draw("0000", 3, 1, &boxes, false, dir.path()).unwrap();
        renderer.draw("0007", 3, 1, &boxes, false, dir.path()).unwrap();

        let first = image::open(dir.path().join("0000_000003_1_real.png")).unwrap();
        let second = image::open(dir.path().join("0007_000003_1_real.png")).unwrap();
        assert_eq!(first.to_rgb8().dimensions(), (48, 16));
        assert_eq!(second.to_rgb8().dimensions(), (30, 90));
    }
}
