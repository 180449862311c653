use std::fs::{ self, File, OpenOptions };
use std::io::Write;
use std::path::PathBuf;

use anyhow::{ bail, Context, Result };
use burn::module::AutodiffModule;
use burn::optim::{ AdamConfig, GradientsParams, Optimizer };
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ ElementConversion, Tensor, TensorData };
use rand::rngs::StdRng;
use rand::{ Rng, SeedableRng };
use serde::Serialize;
use tracing::{ debug, info };

use crate::config::TrainConfig;
use crate::data::{ get_batch, split_sample_tensor, Sample, SampleSet };
use crate::eval::{ probe_discriminator, ProbeReport };
use crate::model::{ complete, load_gan, Discriminator, Gan, GanConfig, Generator };
use crate::utils::l1loss::{ BinaryCrossEntropy, BlendedLoss };
use crate::utils::utils::Scheduler;

/// Soft labels for real sequences.
pub const REAL_LABEL_RANGE: (f32, f32) = (0.999, 1.0);
/// Soft labels for generated sequences.
pub const FAKE_LABEL_RANGE: (f32, f32) = (0.0, 0.001);

/// Which network an update changes. Exactly one flag is set; gradients
/// reaching the other network are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trainable {
    pub generator: bool,
    pub discriminator: bool,
}

impl Trainable {
    pub const DISCRIMINATOR_STEP: Trainable = Trainable { generator: false, discriminator: true };
    /// Composite update: discriminator frozen.
    pub const COMPOSITE_STEP: Trainable = Trainable { generator: true, discriminator: false };
}

/// Losses kept for one step: the last of the `k_d` / `k_g` repetitions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub d_loss_fake: f32,
    pub d_loss_real: f32,
    pub d_loss: f32,
    pub g_loss: f32,
}

/// Loss series recorded every step; probe averages and checkpoints recorded
/// every log step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunHistory {
    pub g_loss: Vec<f32>,
    pub d_loss_fake: Vec<f32>,
    pub d_loss_real: Vec<f32>,
    pub d_loss: Vec<f32>,
    pub logged_steps: Vec<usize>,
    pub avg_gen_pred: Vec<f32>,
    pub avg_real_pred: Vec<f32>,
    /// Rates in effect during each logged interval.
    pub lr_discriminator: Vec<f64>,
    pub lr_generator: Vec<f64>,
    pub checkpoints: Vec<(PathBuf, PathBuf)>,
}

impl RunHistory {
    /// Number of completed steps.
    pub fn len(&self) -> usize {
        self.g_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.g_loss.is_empty()
    }

    fn push_step(&mut self, losses: &StepLosses) {
        self.g_loss.push(losses.g_loss);
        self.d_loss_fake.push(losses.d_loss_fake);
        self.d_loss_real.push(losses.d_loss_real);
        self.d_loss.push(losses.d_loss);
    }

    fn push_probe(&mut self, step: usize, probe: &ProbeReport) {
        self.logged_steps.push(step);
        self.avg_gen_pred.push(probe.avg_gen_pred);
        self.avg_real_pred.push(probe.avg_real_pred);
    }
}

pub fn noisy_labels<R: Rng + ?Sized>(rng: &mut R, (low, high): (f32, f32), n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(low..=high)).collect()
}

/// Alternates discriminator and composite updates over one sample set.
pub struct GanTrainer<B, OG, OD>
    where B: AutodiffBackend, OG: Optimizer<Generator<B>, B>, OD: Optimizer<Discriminator<B>, B>
{
    config: TrainConfig,
    optim_g: OG,
    optim_d: OD,
    lr_g: Scheduler,
    lr_d: Scheduler,
    loss: BlendedLoss,
    rng: StdRng,
    device: B::Device,
    history: RunHistory,
}

impl<B, OG, OD> GanTrainer<B, OG, OD>
    where B: AutodiffBackend, OG: Optimizer<Generator<B>, B>, OD: Optimizer<Discriminator<B>, B>
{
    pub fn new(config: TrainConfig, optim_g: OG, optim_d: OD, device: B::Device) -> Self {
        let lr_g = Scheduler::new(config.lr_generator, config.lr_decay_every, config.lr_decay_factor);
        let lr_d = Scheduler::new(config.lr_discriminator, config.lr_decay_every, config.lr_decay_factor);
        Self {
            loss: config.loss(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            optim_g,
            optim_d,
            lr_g,
            lr_d,
            device,
            history: RunHistory::default(),
        }
    }

    /// Backpropagates `loss` and steps the optimizer of the trainable network.
    fn apply(&mut self, gan: Gan<B>, loss: Tensor<B, 1>, trainable: Trainable) -> Result<Gan<B>> {
        let Gan { generator, discriminator } = gan;

        match trainable {
            Trainable { generator: true, discriminator: false } => {
                let grads = GradientsParams::from_grads(loss.backward(), &generator);
                let generator = self.optim_g.step(self.lr_g.get_lr(), generator, grads);
                Ok(Gan { generator, discriminator })
            }
            Trainable { generator: false, discriminator: true } => {
                let grads = GradientsParams::from_grads(loss.backward(), &discriminator);
                let discriminator = self.optim_d.step(self.lr_d.get_lr(), discriminator, grads);
                Ok(Gan { generator, discriminator })
            }
            _ => bail!("an update trains exactly one network, got {trainable:?}"),
        }
    }

    /// Current (discriminator, generator) learning rates.
    pub fn learning_rates(&self) -> (f64, f64) {
        (self.lr_d.get_lr(), self.lr_g.get_lr())
    }

    fn labels(&mut self, range: (f32, f32), n: usize) -> Tensor<B, 2> {
        let values = noisy_labels(&mut self.rng, range, n);
        Tensor::from_data(TensorData::new(values, [n, 1]), &self.device)
    }

    /// `k_d` rounds of: one update on real sequences, one on generated ones.
    pub fn discriminator_phase(&mut self, mut gan: Gan<B>, samples: &[Sample]) -> Result<(Gan<B>, StepLosses)> {
        let bce = BinaryCrossEntropy::new();
        let mut losses = StepLosses::default();

        for _ in 0..self.config.k_d {
            let batch = get_batch(samples, self.config.batch_size, &mut self.rng)?;
            let n = batch.len();
            let real = batch.to_tensor::<B>(&self.device);
            let (conditioning, _) = split_sample_tensor(real.clone());
            // Inference only: no gradient flows back into the generator.
            let prediction = gan.generator.forward(conditioning.clone()).detach();
            let generated = complete(conditioning, prediction);

            let labels = self.labels(REAL_LABEL_RANGE, n);
            let real_loss = bce.forward(gan.discriminator.forward(real), labels);
            losses.d_loss_real = loss_value(&real_loss);
            gan = self.apply(gan, real_loss, Trainable::DISCRIMINATOR_STEP)?;

            let labels = self.labels(FAKE_LABEL_RANGE, n);
            let fake_loss = bce.forward(gan.discriminator.forward(generated), labels);
            losses.d_loss_fake = loss_value(&fake_loss);
            gan = self.apply(gan, fake_loss, Trainable::DISCRIMINATOR_STEP)?;

            losses.d_loss = 0.5 * (losses.d_loss_real + losses.d_loss_fake);
        }
        Ok((gan, losses))
    }

    /// `k_g` composite updates pushing generated sequences towards "real"
    /// while regressing the true 11th box.
    pub fn generator_phase(&mut self, mut gan: Gan<B>, samples: &[Sample]) -> Result<(Gan<B>, f32)> {
        let mut g_loss = 0.0;

        for _ in 0..self.config.k_g {
            let batch = get_batch(samples, self.config.batch_size, &mut self.rng)?;
            let n = batch.len();
            let (conditioning, target) = split_sample_tensor(batch.to_tensor::<B>(&self.device));
            let labels = self.labels(REAL_LABEL_RANGE, n);

            let out = gan.composite().forward(conditioning);
            let loss = self.loss.forward_composite(out.score, labels, out.prediction, target);
            g_loss = loss_value(&loss);
            gan = self.apply(gan, loss, Trainable::COMPOSITE_STEP)?;
        }
        Ok((gan, g_loss))
    }

    pub fn train_step(&mut self, gan: Gan<B>, samples: &[Sample]) -> Result<(Gan<B>, StepLosses)> {
        let (gan, mut losses) = self.discriminator_phase(gan, samples)?;
        let (gan, g_loss) = self.generator_phase(gan, samples)?;
        losses.g_loss = g_loss;
        Ok((gan, losses))
    }

    fn log_step(&mut self, gan: &Gan<B>, samples: &[Sample], step: usize, losses: &StepLosses) -> Result<()> {
        let (lr_d, lr_g) = self.learning_rates();
        info!(lr_discriminator = lr_d, lr_generator = lr_g, "learning rates");
        info!(
            step,
            d_loss_fake = losses.d_loss_fake,
            d_loss_real = losses.d_loss_real,
            g_loss = losses.g_loss,
            d_loss = losses.d_loss,
            "losses"
        );

        let probe = probe_discriminator(
            &gan.valid(),
            samples,
            self.config.probe_batch_size,
            &mut self.rng,
            &self.device
        )?;
        info!(avg_gen_pred = probe.avg_gen_pred, avg_real_pred = probe.avg_real_pred, "discriminator probe");
        debug!(generated = ?probe.generated, real = ?probe.real, "probe tallies");
        self.history.push_probe(step, &probe);
        self.history.lr_discriminator.push(lr_d);
        self.history.lr_generator.push(lr_g);

        let checkpoint = gan.save_checkpoint(&self.config.weights_dir(), step)?;
        debug!("saved {} and {}", checkpoint.0.display(), checkpoint.1.display());
        self.history.checkpoints.push(checkpoint);

        self.append_log_block(step, losses, &probe)?;

        let decayed_d = self.lr_d.step();
        let decayed_g = self.lr_g.step();
        if decayed_d || decayed_g {
            info!(lr_discriminator = self.lr_d.get_lr(), lr_generator = self.lr_g.get_lr(), "learning rates decayed");
        }
        Ok(())
    }

    fn append_log_block(&self, step: usize, losses: &StepLosses, probe: &ProbeReport) -> Result<()> {
        let path = self.config.log_path();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        write!(
            file,
            "Step: {} of {}.\nD_loss_gen: {}.\tD_loss_real: {}.\nG_loss: {}.\t\t\tD_loss: {}.\navg_gen_pred: {}.\tavg_real_pred: {}.\n\n",
            step,
            self.config.total_steps(),
            losses.d_loss_fake,
            losses.d_loss_real,
            losses.g_loss,
            losses.d_loss,
            probe.avg_gen_pred,
            probe.avg_real_pred
        )?;
        file.flush()?;
        Ok(())
    }

    /// Runs exactly `nb_steps` steps, logging and checkpointing every
    /// `log_interval` steps, and writes `history.json` at the end.
    pub fn run(mut self, mut gan: Gan<B>, samples: &[Sample]) -> Result<(Gan<B>, RunHistory)> {
        let weights_dir = self.config.weights_dir();
        fs::create_dir_all(&weights_dir).with_context(|| format!("failed to create {}", weights_dir.display()))?;
        let log_path = self.config.log_path();
        File::create(&log_path).with_context(|| format!("failed to create {}", log_path.display()))?;

        info!(
            model = %self.config.model_name,
            steps = self.config.nb_steps,
            batch_size = self.config.batch_size,
            samples = samples.len(),
            "starting training"
        );

        for i in 1..=self.config.nb_steps {
            let (next, losses) = self.train_step(gan, samples)?;
            gan = next;
            self.history.push_step(&losses);
            debug!(
                "[Train - Step {} of {}] D_loss {:.4} | G_loss {:.4}",
                i,
                self.config.total_steps(),
                losses.d_loss,
                losses.g_loss
            );
            if i % self.config.log_interval == 0 {
                self.log_step(&gan, samples, i, &losses)?;
            }
        }

        let history_path = self.config.history_path();
        let json = serde_json::to_string_pretty(&self.history)?;
        fs::write(&history_path, json).with_context(|| format!("failed to write {}", history_path.display()))?;
        info!("training finished, history in {}", history_path.display());

        Ok((gan, self.history))
    }
}

fn loss_value<B: AutodiffBackend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone().into_scalar().elem::<f32>()
}

/// Builds (or resumes) both networks and trains them on `samples`.
pub fn train_gan<B: AutodiffBackend>(
    config: &TrainConfig,
    samples: &SampleSet,
    device: &B::Device
) -> Result<(Gan<B>, RunHistory)> {
    config.validate()?;
    if samples.is_empty() {
        bail!("no samples to train on");
    }
    B::seed(config.seed);

    let gan_config = GanConfig::new().with_base_n_count(config.base_n_count);
    let gan = load_gan::<B>(
        &gan_config,
        config.generator_checkpoint.as_deref(),
        config.discriminator_checkpoint.as_deref(),
        device
    )?;

    let adam = AdamConfig::new().with_beta_1(0.5).with_beta_2(0.999);
    let optim_g = adam.init::<B, Generator<B>>();
    let optim_d = adam.init::<B, Discriminator<B>>();

    GanTrainer::new(config.clone(), optim_g, optim_d, device.clone()).run(gan, &samples.samples)
}
