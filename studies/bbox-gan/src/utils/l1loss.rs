use burn::tensor::{ backend::Backend, Tensor };
use serde::{ Deserialize, Serialize };

/// Probabilities are clamped away from 0 and 1 before taking logs.
const BCE_EPSILON: f32 = 1e-7;

/// Quadratic below an absolute error of 1, linear above it.
pub struct SmoothL1Loss;

impl SmoothL1Loss {
    pub fn new() -> Self {
        Self
    }

    /// Loss per sample, summed over the coordinates: `[n, 1]`.
    pub fn forward_per_sample<B: Backend>(
        &self,
        predictions: Tensor<B, 2>,
        targets: Tensor<B, 2>
    ) -> Tensor<B, 2> {
        let abs_diff = predictions.sub(targets).abs();

        let quadratic = abs_diff.clone().mul(abs_diff.clone()).mul_scalar(0.5); // d^2 / 2 for d < 1
        let linear = abs_diff.clone().sub_scalar(0.5); // d - 0.5 for d >= 1

        let loss = linear.mask_where(abs_diff.lower_elem(1.0), quadratic);
        loss.sum_dim(1)
    }

    /// Per-sample loss averaged over the batch.
    pub fn forward<B: Backend>(&self, predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        self.forward_per_sample(predictions, targets).mean()
    }
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        Self::new()
    }
}

/// Smooth L1 of one box, summed over its coordinates.
pub fn smooth_l1(predictions: &[f32], targets: &[f32]) -> f32 {
    predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| {
            let d = (p - t).abs();
            if d < 1.0 { 0.5 * d * d } else { d - 0.5 }
        })
        .sum()
}

/// Binary cross-entropy on probabilities with soft targets, averaged over every element.
pub struct BinaryCrossEntropy;

impl BinaryCrossEntropy {
    pub fn new() -> Self {
        Self
    }

    pub fn forward<B: Backend>(&self, probabilities: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let p = probabilities.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
        let inv_targets = targets.clone().neg().add_scalar(1.0);
        let log_p = p.clone().log();
        let log_inv_p = p.neg().add_scalar(1.0).log();
        (targets.mul(log_p) + inv_targets.mul(log_inv_p)).neg().mean()
    }
}

impl Default for BinaryCrossEntropy {
    fn default() -> Self {
        Self::new()
    }
}

/// `a * bce + b * smooth_l1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendedLoss {
    pub a: f32,
    pub b: f32,
}

impl Default for BlendedLoss {
    fn default() -> Self {
        Self { a: 0.5, b: 0.5 }
    }
}

impl BlendedLoss {
    pub fn new(a: f32, b: f32) -> Self {
        Self { a, b }
    }

    /// Both terms on the same prediction/target pair.
    pub fn forward<B: Backend>(&self, predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        let bce = BinaryCrossEntropy::new().forward(predictions.clone(), targets.clone());
        let regression = SmoothL1Loss::new().forward(predictions, targets);
        bce.mul_scalar(self.a) + regression.mul_scalar(self.b)
    }

    /// Composite objective: `a` weighs the discriminator verdict against `label`,
    /// `b` weighs the generator's box against the true 11th box.
    pub fn forward_composite<B: Backend>(
        &self,
        score: Tensor<B, 2>,
        label: Tensor<B, 2>,
        prediction: Tensor<B, 2>,
        target: Tensor<B, 2>
    ) -> Tensor<B, 1> {
        let adversarial = BinaryCrossEntropy::new().forward(score, label);
        let regression = SmoothL1Loss::new().forward(prediction, target);
        adversarial.mul_scalar(self.a) + regression.mul_scalar(self.b)
    }
}
