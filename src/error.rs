use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error("Missing required information in pipeline event: {0}")]
    MissingField(String),

    #[error("Configuration parameter not found: {0}")]
    ConfigurationNotFound(String),

    #[error("No log groups found for {provider} stage {stage}")]
    NoEvidenceSource { provider: String, stage: String },

    #[error("Failed to retrieve repository credentials: {0}")]
    CredentialsUnavailable(String),

    #[error("Invalid repository URL format: {0}")]
    InvalidRepositoryUrl(String),

    #[error("Failed to fetch repository tree: {0}")]
    RepositoryFetch(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to decode content: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiagnosisError>;
