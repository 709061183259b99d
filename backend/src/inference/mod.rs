pub mod classifier;
pub mod model;
pub mod preprocess;
pub mod registry;
