use std::fs;

use bbox_gan::config::TrainConfig;
use bbox_gan::data::{ linear_motion_samples, FrameSize, InMemoryProvider };
use bbox_gan::eval::{ evaluate_samples, probe_discriminator };
use bbox_gan::model::{ checkpoint_path, load_gan, GanConfig, DISCRIMINATOR_TAG, GENERATOR_TAG };
use bbox_gan::train::train_gan;
use bbox_gan::utils::images::ImageRenderer;
use burn::backend::{ Autodiff, NdArray };
use rand::rngs::StdRng;
use rand::SeedableRng;

type Inference = NdArray<f32>;
type Training = Autodiff<Inference>;

fn config(output_dir: &std::path::Path, nb_steps: usize, log_interval: usize) -> TrainConfig {
    TrainConfig {
        output_dir: output_dir.to_path_buf(),
        nb_steps,
        log_interval,
        batch_size: 10,
        k_d: 1,
        k_g: 1,
        probe_batch_size: 20,
        base_n_count: 8,
        seed: 42,
        ..Default::default()
    }
}

#[test]
fn five_steps_one_checkpoint_pair() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 5, 5);
    let samples = linear_motion_samples(100, 1);

    let (_, history) = train_gan::<Training>(&config, &samples, &Default::default()).unwrap();

    assert_eq!(history.len(), 5);
    for series in [&history.g_loss, &history.d_loss_real, &history.d_loss_fake, &history.d_loss] {
        assert_eq!(series.len(), 5);
        assert!(series.iter().all(|l| l.is_finite()));
    }
    assert_eq!(history.logged_steps, vec![5]);
    assert!((0.0..=1.0).contains(&history.avg_gen_pred[0]));
    assert!((0.0..=1.0).contains(&history.avg_real_pred[0]));

    let weights: Vec<_> = fs::read_dir(config.weights_dir()).unwrap().collect();
    assert_eq!(weights.len(), 2);
    assert!(checkpoint_path(&config.weights_dir(), GENERATOR_TAG, 5).is_file());
    assert!(checkpoint_path(&config.weights_dir(), DISCRIMINATOR_TAG, 5).is_file());

    let log = fs::read_to_string(config.log_path()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "Step: 5 of 5.");
    assert!(lines[1].starts_with("D_loss_gen: ") && lines[1].contains(".\tD_loss_real: "));
    assert!(lines[2].starts_with("G_loss: ") && lines[2].contains(".\t\t\tD_loss: "));
    assert!(lines[3].starts_with("avg_gen_pred: ") && lines[3].contains(".\tavg_real_pred: "));
    assert!(lines[4].is_empty());
}

#[test]
fn checkpoints_follow_the_log_interval() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 7, 3);
    let samples = linear_motion_samples(100, 2);

    let (_, history) = train_gan::<Training>(&config, &samples, &Default::default()).unwrap();

    assert_eq!(history.len(), 7);
    assert_eq!(history.logged_steps, vec![3, 6]);
    assert_eq!(fs::read_dir(config.weights_dir()).unwrap().count(), 4);
    let history_json = fs::read_to_string(config.history_path()).unwrap();
    assert!(history_json.contains("avg_real_pred"));
}

#[test]
fn saved_checkpoint_reloads_for_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 2);
    let samples = linear_motion_samples(50, 3);
    let device = Default::default();

    let (trained, _) = train_gan::<Training>(&config, &samples, &device).unwrap();

    let gen_path = checkpoint_path(&config.weights_dir(), GENERATOR_TAG, 2);
    let discrim_path = checkpoint_path(&config.weights_dir(), DISCRIMINATOR_TAG, 2);
    let gan = load_gan::<Inference>(
        &GanConfig::new().with_base_n_count(8),
        Some(&gen_path),
        Some(&discrim_path),
        &device
    ).unwrap();
    assert_eq!(gan.generator.parameter_snapshot().unwrap(), trained.generator.parameter_snapshot().unwrap());

    let mut rng = StdRng::seed_from_u64(0);
    let report = probe_discriminator(&gan, &samples.samples, 25, &mut rng, &device).unwrap();
    assert_eq!(report.generated.total(), 25);

    let size = FrameSize::new(200.0, 100.0);
    let provider = InMemoryProvider::new(samples, size);
    let renderer = ImageRenderer::new(None, &provider);
    let images = dir.path().join("bounding_box_images");
    let results = evaluate_samples(&gan, &provider, &[0, 49, 50], &renderer, &images, &device).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(fs::read_dir(&images).unwrap().count(), 4);
}

#[test]
fn resumed_run_tags_checkpoints_with_its_own_steps() {
    let dir = tempfile::tempdir().unwrap();
    let first = config(dir.path(), 2, 2);
    let samples = linear_motion_samples(40, 4);
    train_gan::<Training>(&first, &samples, &Default::default()).unwrap();

    let resumed_dir = dir.path().join("resumed");
    let resumed = TrainConfig {
        starting_step: 2,
        generator_checkpoint: Some(checkpoint_path(&first.weights_dir(), GENERATOR_TAG, 2)),
        discriminator_checkpoint: Some(checkpoint_path(&first.weights_dir(), DISCRIMINATOR_TAG, 2)),
        ..config(&resumed_dir, 2, 2)
    };
    let (_, history) = train_gan::<Training>(&resumed, &samples, &Default::default()).unwrap();

    assert_eq!(history.logged_steps, vec![2]);
    assert!(checkpoint_path(&resumed.weights_dir(), GENERATOR_TAG, 2).is_file());
    assert!(!checkpoint_path(&resumed.weights_dir(), GENERATOR_TAG, 4).exists());
    let log = fs::read_to_string(resumed.log_path()).unwrap();
    assert!(log.starts_with("Step: 2 of 4."));
}
