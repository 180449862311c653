pub mod images;
pub mod l1loss;
#[allow(clippy::module_inception)]
pub mod utils;
