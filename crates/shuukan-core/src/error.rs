use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShuukanError {
    #[error("config error: {0}")]
    Config(String),

    #[error("preferences error: {0}")]
    Preferences(String),

    #[error("render error: {0}")]
    Render(#[from] askama::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
