use bbox_gan::data::{ get_batch, linear_motion_samples, split_sample_tensor, CONDITIONING_LEN, COORDS_PER_BOX, SAMPLE_LEN };
use bbox_gan::model::{ complete, GanConfig };
use burn::backend::NdArray;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

type B = NdArray<f32>;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn networks_keep_the_box_layout(batch_size in 1usize..40, width in 1usize..6, seed in any::<u64>()) {
        let device = Default::default();
        let gan = GanConfig::new().with_base_n_count(width).init::<B>(&device);
        let set = linear_motion_samples(12, seed);
        let mut rng = StdRng::seed_from_u64(seed);

        let batch = get_batch(&set.samples, batch_size, &mut rng).unwrap();
        prop_assert_eq!(batch.len(), batch_size);

        let sequences = batch.to_tensor::<B>(&device);
        prop_assert_eq!(sequences.dims(), [batch_size, SAMPLE_LEN]);

        let (conditioning, target) = split_sample_tensor(sequences);
        prop_assert_eq!(conditioning.dims(), [batch_size, CONDITIONING_LEN]);
        prop_assert_eq!(target.dims(), [batch_size, COORDS_PER_BOX]);

        let prediction = gan.generator.forward(conditioning.clone());
        prop_assert_eq!(prediction.dims(), [batch_size, COORDS_PER_BOX]);

        let out = gan.composite().forward(conditioning.clone());
        prop_assert_eq!(out.score.dims(), [batch_size, 1]);
        prop_assert_eq!(gan.discriminator.forward(complete(conditioning, prediction)).dims(), [batch_size, 1]);
    }
}
