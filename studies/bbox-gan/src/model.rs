use std::path::{ Path, PathBuf };

use anyhow::{ anyhow, Result };
use burn::{
    config::Config,
    module::Module,
    nn::{ Linear, LinearConfig },
    record::{ FullPrecisionSettings, NamedMpkFileRecorder },
    tensor::{ activation::{ leaky_relu, sigmoid }, backend::Backend, Tensor },
};
use tracing::info;

use crate::data::{ tensor_values, CONDITIONING_LEN, COORDS_PER_BOX, SAMPLE_LEN };

/// Negative slope of every hidden activation.
pub const LEAKY_SLOPE: f64 = 0.1;

pub const GENERATOR_TAG: &str = "gen";
pub const DISCRIMINATOR_TAG: &str = "discrim";

#[derive(Config, Debug)]
pub struct GanConfig {
    #[config(default = 40)]
    pub gen_input_dim: usize,
    #[config(default = 44)]
    pub discrim_input_dim: usize,
    /// Width unit of the hidden layers.
    #[config(default = 128)]
    pub base_n_count: usize,
}

impl GanConfig {
    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let base = self.base_n_count;
        Generator {
            hidden1: LinearConfig::new(self.gen_input_dim, base).init(device),
            hidden2: LinearConfig::new(base, base * 2).init(device),
            hidden3: LinearConfig::new(base * 2, base * 4).init(device),
            output: LinearConfig::new(base * 4, COORDS_PER_BOX).init(device),
        }
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let base = self.base_n_count;
        Discriminator {
            hidden1: LinearConfig::new(self.discrim_input_dim, base * 4).init(device),
            hidden2: LinearConfig::new(base * 4, base * 2).init(device),
            hidden3: LinearConfig::new(base * 2, base).init(device),
            output: LinearConfig::new(base, 1).init(device),
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Gan<B> {
        Gan {
            generator: self.init_generator(device),
            discriminator: self.init_discriminator(device),
        }
    }
}

/// Maps ten boxes of history to the predicted 11th box.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    hidden1: Linear<B>,
    hidden2: Linear<B>,
    hidden3: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> Generator<B> {
    /// `[n, 40]` -> `[n, 4]`.
    pub fn forward(&self, conditioning: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = leaky_relu(self.hidden1.forward(conditioning), LEAKY_SLOPE);
        let x = leaky_relu(self.hidden2.forward(x), LEAKY_SLOPE);
        let x = leaky_relu(self.hidden3.forward(x), LEAKY_SLOPE);
        self.output.forward(x)
    }

    /// Every weight and bias, layer by layer.
    pub fn parameter_snapshot(&self) -> Result<Vec<f32>> {
        snapshot(&[&self.hidden1, &self.hidden2, &self.hidden3, &self.output])
    }
}

/// Scores a full 11-box sequence: close to 1 for real, close to 0 for generated.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    hidden1: Linear<B>,
    hidden2: Linear<B>,
    hidden3: Linear<B>,
    output: Linear<B>,
}

impl<B: Backend> Discriminator<B> {
    /// `[n, 44]` -> `[n, 1]`, in [0,1].
    pub fn forward(&self, sequence: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = leaky_relu(self.hidden1.forward(sequence), LEAKY_SLOPE);
        let x = leaky_relu(self.hidden2.forward(x), LEAKY_SLOPE);
        let x = leaky_relu(self.hidden3.forward(x), LEAKY_SLOPE);
        sigmoid(self.output.forward(x))
    }

    /// Every weight and bias, layer by layer.
    pub fn parameter_snapshot(&self) -> Result<Vec<f32>> {
        snapshot(&[&self.hidden1, &self.hidden2, &self.hidden3, &self.output])
    }
}

fn snapshot<B: Backend>(layers: &[&Linear<B>]) -> Result<Vec<f32>> {
    let mut values = Vec::new();
    for layer in layers {
        values.extend(tensor_values(layer.weight.val())?);
        if let Some(bias) = &layer.bias {
            values.extend(tensor_values(bias.val())?);
        }
    }
    Ok(values)
}

/// Appends a predicted box to its ten-box history: `[n, 40] ++ [n, 4]`.
pub fn complete<B: Backend>(conditioning: Tensor<B, 2>, prediction: Tensor<B, 2>) -> Tensor<B, 2> {
    Tensor::cat(vec![conditioning, prediction], 1)
}

/// Generator and discriminator of one run. The discriminator stored here is
/// the only copy; the composite view borrows it.
#[derive(Module, Debug)]
pub struct Gan<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

/// Generator followed by the discriminator, sharing `Gan`'s parameters.
pub struct Composite<'a, B: Backend> {
    generator: &'a Generator<B>,
    discriminator: &'a Discriminator<B>,
}

pub struct CompositeOutput<B: Backend> {
    /// Discriminator verdict on the completed sequence, `[n, 1]`.
    pub score: Tensor<B, 2>,
    /// Raw generator box, `[n, 4]`.
    pub prediction: Tensor<B, 2>,
}

impl<B: Backend> Composite<'_, B> {
    pub fn forward(&self, conditioning: Tensor<B, 2>) -> CompositeOutput<B> {
        let prediction = self.generator.forward(conditioning.clone());
        let score = self.discriminator.forward(complete(conditioning, prediction.clone()));
        CompositeOutput { score, prediction }
    }
}

impl<B: Backend> Gan<B> {
    pub fn composite(&self) -> Composite<'_, B> {
        Composite {
            generator: &self.generator,
            discriminator: &self.discriminator,
        }
    }

    /// Writes `gen_weights_step_<step>.mpk` and `discrim_weights_step_<step>.mpk` into `dir`.
    pub fn save_checkpoint(&self, dir: &Path, step: usize) -> Result<(PathBuf, PathBuf)> {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        let gen_path = checkpoint_path(dir, GENERATOR_TAG, step);
        self.generator
            .clone()
            .save_file(gen_path.clone(), &recorder)
            .map_err(|e| anyhow!("failed to save {}: {e}", gen_path.display()))?;

        let discrim_path = checkpoint_path(dir, DISCRIMINATOR_TAG, step);
        self.discriminator
            .clone()
            .save_file(discrim_path.clone(), &recorder)
            .map_err(|e| anyhow!("failed to save {}: {e}", discrim_path.display()))?;

        Ok((gen_path, discrim_path))
    }
}

/// `<dir>/<tag>_weights_step_<step>.mpk`
pub fn checkpoint_path(dir: &Path, tag: &str, step: usize) -> PathBuf {
    dir.join(format!("{tag}_weights_step_{step}.mpk"))
}

/// Fresh networks, with either side replaced by a saved checkpoint when given.
pub fn load_gan<B: Backend>(
    config: &GanConfig,
    generator_path: Option<&Path>,
    discriminator_path: Option<&Path>,
    device: &B::Device
) -> Result<Gan<B>> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let mut gan = config.init::<B>(device);

    if let Some(path) = generator_path {
        info!("loading generator from {}", path.display());
        gan.generator = gan.generator
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| anyhow!("failed to load generator {}: {e}", path.display()))?;
    }
    if let Some(path) = discriminator_path {
        info!("loading discriminator from {}", path.display());
        gan.discriminator = gan.discriminator
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| anyhow!("failed to load discriminator {}: {e}", path.display()))?;
    }
    Ok(gan)
}

/// Shape contract shared by the composite: history plus one box.
const _: () = assert!(CONDITIONING_LEN + COORDS_PER_BOX == SAMPLE_LEN);
