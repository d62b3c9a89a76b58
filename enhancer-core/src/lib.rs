pub mod audio;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod runner;
pub mod stft;

pub use error::{EnhanceError, ErrorKind, Result};
