use std::path::PathBuf;

use anyhow::{ bail, Context, Result };
use bbox_gan::{
    config::{ EvalConfig, TrainConfig },
    data::{ linear_motion_samples, FrameSize, InMemoryProvider, KittiTracking, SampleProvider },
    eval::{ evaluate_samples, probe_discriminator },
    model::{ load_gan, GanConfig },
    train::train_gan,
    utils::images::ImageRenderer,
    GanBackend,
    TrainBackend,
};
use clap::{ Args, Parser, Subcommand };
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bbox-gan", about = "Next-box prediction GAN over KITTI tracking labels")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train (or resume) the generator/discriminator pair.
    Train(TrainArgs),
    /// Score one random batch with the discriminator.
    Probe(ProbeArgs),
    /// Predict and render hand-picked samples.
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    /// KITTI tracking root holding `label_02/` and `image_02/`.
    #[arg(long, conflicts_with = "synthetic")]
    data_root: Option<PathBuf>,
    /// Use N generated constant-velocity samples instead of a dataset.
    #[arg(long)]
    synthetic: Option<usize>,
    /// Keep only this KITTI object type (e.g. Car).
    #[arg(long)]
    object_type: Option<String>,
}

#[derive(Args, Debug)]
struct CheckpointArgs {
    #[arg(long)]
    generator: Option<PathBuf>,
    #[arg(long)]
    discriminator: Option<PathBuf>,
    /// Hidden layer width unit; must match the checkpoints.
    #[arg(long, default_value_t = 128)]
    base_n_count: usize,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,
    /// JSON run configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    nb_steps: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    log_interval: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Resume from this generator checkpoint.
    #[arg(long)]
    generator: Option<PathBuf>,
    /// Resume from this discriminator checkpoint.
    #[arg(long)]
    discriminator: Option<PathBuf>,
    /// Steps already done by the resumed checkpoints.
    #[arg(long)]
    starting_step: Option<usize>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    checkpoints: CheckpointArgs,
    #[arg(long, default_value_t = 590)]
    batch_size: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    checkpoints: CheckpointArgs,
    #[arg(long, default_value = "runs/bbox_gan")]
    output_dir: PathBuf,
    /// Comma-separated sample indices; defaults to a fixed hand-picked list.
    #[arg(long, value_delimiter = ',')]
    indices: Option<Vec<usize>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Probe(args) => probe(args),
        Command::Eval(args) => eval(args),
    }
}

/// The provider plus the image root used for rendering, if any.
fn open_provider(args: &DataArgs, seed: u64) -> Result<(Box<dyn SampleProvider>, Option<PathBuf>)> {
    match (&args.data_root, args.synthetic) {
        (Some(root), _) => {
            let kitti = KittiTracking::open(root)
                .with_context(|| format!("failed to open dataset {}", root.display()))?
                .with_object_type(args.object_type.clone());
            let image_root = kitti.image_root();
            Ok((Box::new(kitti), Some(image_root)))
        }
        (None, Some(count)) => {
            let provider = InMemoryProvider::new(linear_motion_samples(count, seed), FrameSize::default());
            Ok((Box::new(provider), None))
        }
        (None, None) => bail!("either --data-root or --synthetic is required"),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };
    if let Some(v) = args.output_dir {
        config.output_dir = v;
    }
    if let Some(v) = args.nb_steps {
        config.nb_steps = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.log_interval {
        config.log_interval = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if let Some(v) = args.starting_step {
        config.starting_step = v;
    }
    if args.generator.is_some() {
        config.generator_checkpoint = args.generator;
    }
    if args.discriminator.is_some() {
        config.discriminator_checkpoint = args.discriminator;
    }

    let (provider, _) = open_provider(&args.data, config.seed)?;
    let samples = provider.get_all_samples(true)?;
    let device = Default::default();
    let (_, history) = train_gan::<TrainBackend>(&config, &samples, &device)?;
    info!(steps = history.len(), checkpoints = history.checkpoints.len(), output = %config.output_dir.display(), "done");
    Ok(())
}

fn probe(args: ProbeArgs) -> Result<()> {
    let config = EvalConfig {
        probe_batch_size: args.batch_size,
        base_n_count: args.checkpoints.base_n_count,
        seed: args.seed,
        ..Default::default()
    };

    let (provider, _) = open_provider(&args.data, config.seed)?;
    let samples = provider.get_all_samples(true)?;
    let device = Default::default();
    let gan = load_gan::<GanBackend>(
        &GanConfig::new().with_base_n_count(config.base_n_count),
        args.checkpoints.generator.as_deref(),
        args.checkpoints.discriminator.as_deref(),
        &device
    )?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let report = probe_discriminator(&gan, &samples.samples, config.probe_batch_size, &mut rng, &device)?;
    info!(avg_gen_pred = report.avg_gen_pred, avg_real_pred = report.avg_real_pred, "discriminator probe");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let mut config = EvalConfig {
        output_dir: args.output_dir,
        base_n_count: args.checkpoints.base_n_count,
        ..Default::default()
    };
    if let Some(indices) = args.indices {
        config.sample_indices = indices;
    }

    let (provider, image_root) = open_provider(&args.data, config.seed)?;
    let device = Default::default();
    let gan = load_gan::<GanBackend>(
        &GanConfig::new().with_base_n_count(config.base_n_count),
        args.checkpoints.generator.as_deref(),
        args.checkpoints.discriminator.as_deref(),
        &device
    )?;

    let renderer = ImageRenderer::new(image_root, provider.as_ref());
    let images_dir = config.images_dir();
    let results = evaluate_samples(
        &gan,
        provider.as_ref(),
        &config.sample_indices,
        &renderer,
        &images_dir,
        &device
    )?;
    info!(evaluated = results.len(), images = %images_dir.display(), "evaluation finished");
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
