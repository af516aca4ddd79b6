use thiserror::Error;

/// Main error type for opusmt
#[derive(Error, Debug)]
pub enum OpusMtError {
    #[error("No model installed for language pair {0}\n\nTroubleshooting:\n- List installed models: opusmt models local\n- Check for a downloadable model: opusmt models check {0}\n- Install it: opusmt models install <pair>/<name>")]
    ModelMissing(String),

    #[error("Translation worker unavailable: {0}\n\nTroubleshooting:\n- Is the engine binary installed and in PATH? See [engine] program in config\n- Try increasing [engine] timeout_secs in config\n- Run with RUST_LOG=debug to see engine output")]
    WorkerUnavailable(String),

    #[error("Network error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Verify [models] storage_url in config\n- Try again in a moment")]
    Network(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/opusmt/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OpusMtError>;
