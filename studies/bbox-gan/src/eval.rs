use std::path::Path;

use anyhow::{ anyhow, Result };
use burn::tensor::{ backend::Backend, Tensor };
use rand::Rng;
use serde::Serialize;
use tracing::{ info, warn };

use crate::data::{
    get_batch,
    split_sample_tensor,
    tensor_values,
    Batch,
    Provenance,
    Sample,
    SampleProvider,
    COORDS_PER_BOX,
};
use crate::model::{ complete, Gan };
use crate::utils::images::FrameRenderer;
use crate::utils::l1loss::smooth_l1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
    Unsure,
}

/// Counts of discriminator verdicts over one probe batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub correct: usize,
    pub incorrect: usize,
    pub unsure: usize,
}

impl Tally {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Correct => {
                self.correct += 1;
            }
            Verdict::Incorrect => {
                self.incorrect += 1;
            }
            Verdict::Unsure => {
                self.unsure += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.correct + self.incorrect + self.unsure
    }
}

// Only saturated sigmoid outputs compare equal to 0 or 1, so almost every
// score lands in `Unsure`. Kept as exact equality on purpose; a tolerance
// would change what the tallies mean.

/// A generated sequence is caught when scored exactly 0.
pub fn classify_generated(score: f32) -> Verdict {
    if score == 1.0 {
        Verdict::Incorrect
    } else if score == 0.0 {
        Verdict::Correct
    } else {
        Verdict::Unsure
    }
}

/// A real sequence is recognised when scored exactly 1.
pub fn classify_real(score: f32) -> Verdict {
    if score == 1.0 {
        Verdict::Correct
    } else if score == 0.0 {
        Verdict::Incorrect
    } else {
        Verdict::Unsure
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Mean discriminator score on generator-completed sequences.
    pub avg_gen_pred: f32,
    /// Mean discriminator score on real sequences.
    pub avg_real_pred: f32,
    pub generated: Tally,
    pub real: Tally,
}

/// Scores one random batch twice: as recorded, and with the 11th box
/// replaced by the generator's prediction.
pub fn probe_discriminator<B: Backend, R: Rng + ?Sized>(
    gan: &Gan<B>,
    samples: &[Sample],
    batch_size: usize,
    rng: &mut R,
    device: &B::Device
) -> Result<ProbeReport> {
    let batch = get_batch(samples, batch_size, rng)?;
    let real = batch.to_tensor::<B>(device);
    let (conditioning, _) = split_sample_tensor(real.clone());

    let prediction = gan.generator.forward(conditioning.clone());
    let generated_scores = tensor_values(gan.discriminator.forward(complete(conditioning, prediction)))?;
    let real_scores = tensor_values(gan.discriminator.forward(real))?;

    let mut generated = Tally::default();
    generated_scores
        .iter()
        .for_each(|s| generated.record(classify_generated(*s)));
    let mut real = Tally::default();
    real_scores.iter().for_each(|s| real.record(classify_real(*s)));

    Ok(ProbeReport {
        avg_gen_pred: mean(&generated_scores),
        avg_real_pred: mean(&real_scores),
        generated,
        real,
    })
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / (values.len() as f32)
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleEvaluation {
    pub index: usize,
    pub provenance: Provenance,
    pub real_score: f32,
    pub generated_score: f32,
    /// Predicted 11th box in pixels.
    pub prediction: [f32; COORDS_PER_BOX],
    /// Smooth L1 between predicted and true 11th box, in normalized units.
    pub regression_error: f32,
}

/// Predicts, scores and renders each hand-picked sample. Parameters are only read.
pub fn evaluate_samples<B: Backend>(
    gan: &Gan<B>,
    provider: &dyn SampleProvider,
    indices: &[usize],
    renderer: &dyn FrameRenderer,
    output_dir: &Path,
    device: &B::Device
) -> Result<Vec<SampleEvaluation>> {
    let set = provider.get_all_samples(true)?;
    let mut results = Vec::with_capacity(indices.len());

    for &index in indices {
        let Some((sample, provenance)) = set.get(index) else {
            warn!("sample {index} is out of range ({} samples), skipping", set.len());
            continue;
        };

        let real = Batch::new(vec![sample.clone()]).to_tensor::<B>(device);
        let (conditioning, _) = split_sample_tensor(real.clone());
        let prediction = gan.generator.forward(conditioning.clone());
        let generated_seq = complete(conditioning, prediction.clone());

        let real_score = scalar(gan.discriminator.forward(real))?;
        let generated_score = scalar(gan.discriminator.forward(generated_seq))?;
        let prediction = tensor_values(prediction)?;
        let regression_error = smooth_l1(&prediction, sample.target());

        let size = provider.frame_size(&provenance.sample_set);
        let mut generated = Sample::with_target(sample.conditioning(), &prediction)?;
        generated.unnormalize(size);
        let mut real = sample.clone();
        real.unnormalize(size);

        renderer.draw(
            &provenance.sample_set,
            provenance.frame,
            provenance.object_id,
            &generated.boxes(),
            true,
            output_dir
        )?;
        renderer.draw(
            &provenance.sample_set,
            provenance.frame,
            provenance.object_id,
            &real.boxes(),
            false,
            output_dir
        )?;

        info!(
            index,
            %provenance,
            real_score,
            generated_score,
            regression_error,
            "evaluated sample"
        );

        let mut pixel_box = [0.0; COORDS_PER_BOX];
        pixel_box.copy_from_slice(generated.target());
        results.push(SampleEvaluation {
            index,
            provenance: provenance.clone(),
            real_score,
            generated_score,
            prediction: pixel_box,
            regression_error,
        });
    }
    Ok(results)
}

fn scalar<B: Backend>(scores: Tensor<B, 2>) -> Result<f32> {
    tensor_values(scores)?
        .first()
        .copied()
        .ok_or_else(|| anyhow!("discriminator returned no score"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::data::{ linear_motion_samples, FrameSize, InMemoryProvider };
    use crate::model::GanConfig;

    type B = NdArray<f32>;

    #[derive(Default)]
    struct RecordingRenderer {
        calls: RefCell<Vec<(String, u32, i64, Vec<[f32; COORDS_PER_BOX]>, bool)>>,
    }

    impl FrameRenderer for RecordingRenderer {
        fn draw(
            &self,
            sample_set: &str,
            frame: u32,
            object_id: i64,
            boxes: &[[f32; COORDS_PER_BOX]],
            is_generated: bool,
            _output_dir: &Path
        ) -> Result<()> {
            self.calls.borrow_mut().push((sample_set.to_string(), frame, object_id, boxes.to_vec(), is_generated));
            Ok(())
        }
    }

    #[test]
    fn exact_equality_classification() {
        assert_eq!(classify_generated(0.0), Verdict::Correct);
        assert_eq!(classify_generated(1.0), Verdict::Incorrect);
        assert_eq!(classify_generated(1e-9), Verdict::Unsure);
        assert_eq!(classify_real(1.0), Verdict::Correct);
        assert_eq!(classify_real(0.0), Verdict::Incorrect);
        assert_eq!(classify_real(0.999_999), Verdict::Unsure);
    }

    #[test]
    fn probe_tallies_cover_the_batch() {
        let device = Default::default();
        let gan = GanConfig::new().with_base_n_count(8).init::<B>(&device);
        let set = linear_motion_samples(30, 4);
        let mut rng = StdRng::seed_from_u64(9);

        let report = probe_discriminator(&gan, &set.samples, 10, &mut rng, &device).unwrap();
        assert_eq!(report.generated.total(), 10);
        assert_eq!(report.real.total(), 10);
        assert!((0.0..=1.0).contains(&report.avg_gen_pred));
        assert!((0.0..=1.0).contains(&report.avg_real_pred));
    }

    #[test]
    fn probe_on_empty_set_fails() {
        let device = Default::default();
        let gan = GanConfig::new().with_base_n_count(8).init::<B>(&device);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(probe_discriminator(&gan, &[], 10, &mut rng, &device).is_err());
    }

    #[test]
    fn harness_renders_both_sequences_and_skips_missing_indices() {
        let device = Default::default();
        let gan = GanConfig::new().with_base_n_count(8).init::<B>(&device);
        let set = linear_motion_samples(5, 2);
        let size = FrameSize::new(100.0, 50.0);
        let mut expected_real = set.samples[3].clone();
        expected_real.unnormalize(size);
        let provider = InMemoryProvider::new(set, size);
        let renderer = RecordingRenderer::default();
        let before = gan.generator.parameter_snapshot().unwrap();

        let results = evaluate_samples(&gan, &provider, &[0, 3, 40], &renderer, Path::new("unused"), &device).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].index, 3);
        assert!(results.iter().all(|r| r.regression_error >= 0.0));

        let calls = renderer.calls.borrow();
        assert_eq!(calls.len(), 4);
        assert!(calls[2].4 && !calls[3].4);
        assert_eq!(calls[3].0, "synthetic");
        assert_eq!(calls[3].3, expected_real.boxes());
        // History boxes are shared by both renderings.
        assert_eq!(calls[2].3[..10], calls[3].3[..10]);
        assert_eq!(calls[2].3[10], results[1].prediction);

        assert_eq!(gan.generator.parameter_snapshot().unwrap(), before);
    }
}
