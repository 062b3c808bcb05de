use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Model weights missing or incompatible. Not retried.
    #[error("Model initialization failed: {0}")]
    FatalInit(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Only raised inside the search adapter, which degrades it to empty context.
    #[error("Web search unavailable: {0}")]
    SearchUnavailable(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Audio error: {0}")]
    Audio(String),
    #[error("Image error: {0}")]
    Image(String),
    #[error("Inference worker unavailable")]
    WorkerUnavailable,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FatalInit(_) => "fatal_init_error",
            Error::Generation(_) => "backend_generation_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::SearchUnavailable(_) => "search_unavailable",
            Error::Api { .. } => "api_error",
            Error::Config(_) => "config_error",
            Error::WorkerUnavailable => "worker_unavailable",
            Error::Audio(_) | Error::Image(_) | Error::Http(_) | Error::Io(_) => "server_error",
        }
    }
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::Audio(other.to_string()),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}
