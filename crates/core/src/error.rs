use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown analysis kind: {0}")]
    UnknownAnalysisKind(String),
}
