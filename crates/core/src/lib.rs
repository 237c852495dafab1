pub mod analysis;
pub mod config;
pub mod error;

pub use analysis::{AnalysisKind, Metadata};
pub use config::{BatchConfig, Config};
pub use error::*;
