use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinetuneError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    InvalidMode(#[from] summa_core::InvalidModeError),

    #[error(transparent)]
    Tokenizer(#[from] tokenizer::TokenizerError),

    #[error(transparent)]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Model(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FinetuneError>;
