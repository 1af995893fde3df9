pub mod adjuster;
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod db;
pub mod detector;
pub mod encoder;
pub mod entry;
pub mod error;
pub mod kmeans;
pub mod raster;
pub mod utils;
pub mod vocabulary;
pub mod voter;

pub use config::{DatabaseConfig, Opts, SetupFile};
pub use db::{DbState, Evaluation, RecognitionDb};
pub use entry::{Entry, Features, KeyPoint, LabelId, WordHistogram};
pub use error::{Error, Result};
pub use vocabulary::Vocabulary;
pub use voter::VoteMaps;
