pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod display;
pub mod probe;
pub mod remote;
pub mod retry;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid image name '{name}': {reason}")]
    InvalidImageName { name: String, reason: &'static str },
    #[error("process error: {0}")]
    Process(String),
}
