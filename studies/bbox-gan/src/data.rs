use std::collections::{ BTreeMap, HashMap };
use std::fmt;
use std::fs;
use std::path::{ Path, PathBuf };
use std::str::FromStr;

use anyhow::{ anyhow, bail, Context, Result };
use burn::tensor::{ backend::Backend, Tensor, TensorData };
use csv::{ ReaderBuilder, StringRecord };
use rand::rngs::StdRng;
use rand::{ Rng, SeedableRng };
use serde::{ Deserialize, Serialize };
use tracing::{ debug, info };

pub const BOXES_PER_SAMPLE: usize = 11;
pub const COORDS_PER_BOX: usize = 4;
pub const SAMPLE_LEN: usize = BOXES_PER_SAMPLE * COORDS_PER_BOX;
/// The first ten boxes: generator input and discriminator history.
pub const CONDITIONING_LEN: usize = SAMPLE_LEN - COORDS_PER_BOX;

const LABEL_DIR: &str = "label_02";
const IMAGE_DIR: &str = "image_02";

/// Pixel size of the frames a sample set was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f32,
    pub height: f32,
}

impl FrameSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Default for FrameSize {
    /// KITTI tracking camera resolution.
    fn default() -> Self {
        Self { width: 1242.0, height: 375.0 }
    }
}

/// Eleven consecutive boxes of one object, flattened as (left, top, right, bottom).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    values: [f32; SAMPLE_LEN],
}

impl Sample {
    pub fn new(values: [f32; SAMPLE_LEN]) -> Self {
        Self { values }
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        let values: [f32; SAMPLE_LEN] = values
            .try_into()
            .map_err(|_| anyhow!("a sample holds {SAMPLE_LEN} values, got {}", values.len()))?;
        Ok(Self { values })
    }

    pub fn from_boxes(boxes: &[[f32; COORDS_PER_BOX]]) -> Result<Self> {
        if boxes.len() != BOXES_PER_SAMPLE {
            bail!("a sample holds {BOXES_PER_SAMPLE} boxes, got {}", boxes.len());
        }
        let flat: Vec<f32> = boxes.iter().flatten().copied().collect();
        Self::from_slice(&flat)
    }

    /// Joins a ten-box history with an 11th box.
    pub fn with_target(conditioning: &[f32], target: &[f32]) -> Result<Self> {
        if conditioning.len() != CONDITIONING_LEN || target.len() != COORDS_PER_BOX {
            bail!(
                "expected {CONDITIONING_LEN} + {COORDS_PER_BOX} values, got {} + {}",
                conditioning.len(),
                target.len()
            );
        }
        let mut values = [0.0; SAMPLE_LEN];
        values[..CONDITIONING_LEN].copy_from_slice(conditioning);
        values[CONDITIONING_LEN..].copy_from_slice(target);
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32; SAMPLE_LEN] {
        &self.values
    }

    pub fn conditioning(&self) -> &[f32] {
        &self.values[..CONDITIONING_LEN]
    }

    pub fn target(&self) -> &[f32] {
        &self.values[CONDITIONING_LEN..]
    }

    pub fn boxes(&self) -> Vec<[f32; COORDS_PER_BOX]> {
        self.values
            .chunks_exact(COORDS_PER_BOX)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()
    }

    /// Pixel space to [0,1]: x coordinates by width, y coordinates by height.
    pub fn normalize(&mut self, size: FrameSize) {
        for coords in self.values.chunks_exact_mut(COORDS_PER_BOX) {
            coords[0] /= size.width;
            coords[1] /= size.height;
            coords[2] /= size.width;
            coords[3] /= size.height;
        }
    }

    pub fn unnormalize(&mut self, size: FrameSize) {
        for coords in self.values.chunks_exact_mut(COORDS_PER_BOX) {
            coords[0] *= size.width;
            coords[1] *= size.height;
            coords[2] *= size.width;
            coords[3] *= size.height;
        }
    }
}

/// Where a sample came from. `frame` is the frame of the 11th box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub sample_set: String,
    pub frame: u32,
    pub object_id: i64,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sample_set {} frame {} object {}", self.sample_set, self.frame, self.object_id)
    }
}

/// Samples and their provenance, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
    pub provenance: Vec<Provenance>,
}

impl SampleSet {
    pub fn push(&mut self, sample: Sample, provenance: Provenance) {
        self.samples.push(sample);
        self.provenance.push(provenance);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<(&Sample, &Provenance)> {
        Some((self.samples.get(idx)?, self.provenance.get(idx)?))
    }

    pub fn print(&self) {
        let mut per_set: BTreeMap<&str, usize> = BTreeMap::new();
        for p in &self.provenance {
            *per_set.entry(p.sample_set.as_str()).or_default() += 1;
        }
        info!(samples = self.len(), sets = per_set.len(), "sample set loaded");
        debug!("samples per set: {:?}", per_set);
    }
}

pub trait SampleProvider {
    /// All samples, in [0,1] when `normalize` is set and in pixels otherwise.
    fn get_all_samples(&self, normalize: bool) -> Result<SampleSet>;

    /// Frame size used to (un)normalize samples of `sample_set`.
    fn frame_size(&self, sample_set: &str) -> FrameSize;
}

/// A fixed batch of samples drawn with replacement.
#[derive(Debug, Clone)]
pub struct Batch {
    samples: Vec<Sample>,
}

impl Batch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// `[n, 44]` tensor of the batch.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let values: Vec<f32> = self.samples
            .iter()
            .flat_map(|s| s.values().iter().copied())
            .collect();
        Tensor::from_data(TensorData::new(values, [self.samples.len(), SAMPLE_LEN]), device)
    }
}

/// Draws `size` samples uniformly at random, with replacement.
pub fn get_batch<R: Rng + ?Sized>(samples: &[Sample], size: usize, rng: &mut R) -> Result<Batch> {
    if samples.is_empty() {
        bail!("cannot draw a batch from an empty sample set");
    }
    if size == 0 {
        bail!("batch size must be at least 1");
    }
    let picked = (0..size).map(|_| samples[rng.gen_range(0..samples.len())].clone()).collect();
    Ok(Batch::new(picked))
}

/// Splits `[n, 44]` into conditioning `[n, 40]` and target `[n, 4]`.
pub fn split_sample_tensor<B: Backend>(batch: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [n, _] = batch.dims();
    let conditioning = batch.clone().slice([0..n, 0..CONDITIONING_LEN]);
    let target = batch.slice([0..n, CONDITIONING_LEN..SAMPLE_LEN]);
    (conditioning, target)
}

pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read tensor values: {e:?}"))
}

/// Samples that already live in memory, stored normalized.
pub struct InMemoryProvider {
    set: SampleSet,
    frame_size: FrameSize,
}

impl InMemoryProvider {
    pub fn new(set: SampleSet, frame_size: FrameSize) -> Self {
        Self { set, frame_size }
    }
}

impl SampleProvider for InMemoryProvider {
    fn get_all_samples(&self, normalize: bool) -> Result<SampleSet> {
        let mut set = self.set.clone();
        if !normalize {
            for sample in &mut set.samples {
                sample.unnormalize(self.frame_size);
            }
        }
        Ok(set)
    }

    fn frame_size(&self, _sample_set: &str) -> FrameSize {
        self.frame_size
    }
}

type Track = Vec<(u32, [f32; COORDS_PER_BOX])>;

/// KITTI tracking labels under `<root>/label_02/<set>.txt`, frames under
/// `<root>/image_02/<set>/`.
pub struct KittiTracking {
    root: PathBuf,
    sets: Vec<String>,
    frame_sizes: HashMap<String, FrameSize>,
    object_type: Option<String>,
}

impl KittiTracking {
    pub fn open<T: AsRef<Path>>(root: T) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let label_dir = root.join(LABEL_DIR);

        let mut sets = Vec::new();
        let entries = fs::read_dir(&label_dir)
            .with_context(|| format!("failed to list {}", label_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    sets.push(stem.to_string());
                }
            }
        }
        sets.sort();

        let frame_sizes = sets
            .iter()
            .map(|set| (set.clone(), probe_frame_size(&root, set).unwrap_or_default()))
            .collect();

        Ok(Self { root, sets, frame_sizes, object_type: None })
    }

    /// Keep only rows of this KITTI object type (e.g. `Car`).
    pub fn with_object_type(mut self, object_type: Option<String>) -> Self {
        self.object_type = object_type;
        self
    }

    pub fn sets(&self) -> &[String] {
        &self.sets
    }

    pub fn image_root(&self) -> PathBuf {
        self.root.join(IMAGE_DIR)
    }

    fn read_tracks(&self, set: &str) -> Result<BTreeMap<i64, Track>> {
        let path = self.root.join(LABEL_DIR).join(format!("{set}.txt"));
        let mut reader = ReaderBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut tracks: BTreeMap<i64, Track> = BTreeMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(||
                format!("{}: malformed row {}", path.display(), line + 1)
            )?;
            if record.len() < 10 {
                bail!("{}: row {} has {} fields, expected at least 10", path.display(), line + 1, record.len());
            }
            let object_type = &record[2];
            if object_type == "DontCare" {
                continue;
            }
            if let Some(wanted) = &self.object_type {
                if object_type != wanted {
                    continue;
                }
            }
            let frame: u32 = parse_field(&record, 0, &path)?;
            let track_id: i64 = parse_field(&record, 1, &path)?;
            let bbox = [
                parse_field(&record, 6, &path)?,
                parse_field(&record, 7, &path)?,
                parse_field(&record, 8, &path)?,
                parse_field(&record, 9, &path)?,
            ];
            tracks.entry(track_id).or_default().push((frame, bbox));
        }

        for track in tracks.values_mut() {
            track.sort_by_key(|(frame, _)| *frame);
            track.dedup_by_key(|(frame, _)| *frame);
        }
        Ok(tracks)
    }
}

impl SampleProvider for KittiTracking {
    fn get_all_samples(&self, normalize: bool) -> Result<SampleSet> {
        let mut set = SampleSet::default();
        for name in &self.sets {
            let size = self.frame_size(name);
            for (track_id, track) in self.read_tracks(name)? {
                for window in consecutive_windows(&track) {
                    let boxes: Vec<[f32; COORDS_PER_BOX]> = window
                        .iter()
                        .map(|(_, b)| *b)
                        .collect();
                    let mut sample = Sample::from_boxes(&boxes)?;
                    if normalize {
                        sample.normalize(size);
                    }
                    set.push(sample, Provenance {
                        sample_set: name.clone(),
                        frame: window[BOXES_PER_SAMPLE - 1].0,
                        object_id: track_id,
                    });
                }
            }
        }
        set.print();
        Ok(set)
    }

    fn frame_size(&self, sample_set: &str) -> FrameSize {
        self.frame_sizes.get(sample_set).copied().unwrap_or_default()
    }
}

/// Windows of 11 boxes whose frames follow each other without gaps.
fn consecutive_windows(track: &[(u32, [f32; COORDS_PER_BOX])]) -> impl Iterator<Item = &[(u32, [f32; COORDS_PER_BOX])]> {
    track
        .windows(BOXES_PER_SAMPLE)
        .filter(|w| w.windows(2).all(|pair| pair[1].0 == pair[0].0 + 1))
}

fn parse_field<T>(record: &StringRecord, idx: usize, path: &Path) -> Result<T>
    where T: FromStr, T::Err: fmt::Display
{
    let raw = record.get(idx).unwrap_or_default();
    raw.parse::<T>().map_err(|e| anyhow!("{}: field {idx} ({raw:?}): {e}", path.display()))
}

fn probe_frame_size(root: &Path, set: &str) -> Option<FrameSize> {
    let dir = root.join(IMAGE_DIR).join(set);
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    frames.sort();
    let (width, height) = image::image_dimensions(frames.first()?).ok()?;
    Some(FrameSize::new(width as f32, height as f32))
}

/// Objects moving at constant velocity, already normalized. Used for smoke
/// runs without a dataset on disk.
pub fn linear_motion_samples(count: usize, seed: u64) -> SampleSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut set = SampleSet::default();
    for i in 0..count {
        let (w, h) = (rng.gen_range(0.05..0.2), rng.gen_range(0.05..0.3));
        let (x0, y0) = (rng.gen_range(0.2..0.6), rng.gen_range(0.2..0.5));
        let (vx, vy) = (rng.gen_range(-0.01..0.01), rng.gen_range(-0.01..0.01));

        let mut values = [0.0f32; SAMPLE_LEN];
        for (t, coords) in values.chunks_exact_mut(COORDS_PER_BOX).enumerate() {
            let left = x0 + vx * (t as f32);
            let top = y0 + vy * (t as f32);
            coords.copy_from_slice(&[left, top, left + w, top + h]);
        }
        set.push(Sample::new(values), Provenance {
            sample_set: "synthetic".to_string(),
            frame: (BOXES_PER_SAMPLE - 1 + i) as u32,
            object_id: i as i64,
        });
    }
    set
}
