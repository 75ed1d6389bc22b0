pub mod classifier;
pub mod config;
pub mod decode;
pub mod dsp;
pub mod emotion;
pub mod features;
pub mod pipeline;
pub mod scaler;
pub mod segment;
pub mod store;
