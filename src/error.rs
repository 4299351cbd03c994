use derive_more::{Display, From};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, From)]
pub enum Error {
    #[display("Invalid input: {_0}")]
    InputValidation(String),

    #[display("Media acquisition failed: {_0}")]
    Acquisition(String),

    #[display("Upload to inference service failed: {_0}")]
    Upload(String),

    #[display("Remote processing of {asset} failed: {reason}")]
    ProcessingFailed { asset: String, reason: String },

    #[display("Remote processing of {asset} did not finish within {waited_secs}s")]
    ProcessingTimeout { asset: String, waited_secs: u64 },

    #[display("Analysis pass '{pass}' failed: {message}")]
    Analysis { pass: String, message: String },

    #[display("Publishing the record failed: {_0}")]
    Publish(String),

    #[display("{_0}")]
    Custom(String),

    #[from]
    Io(std::io::Error),

    #[from]
    Json(serde_json::Error),

    #[from]
    Http(reqwest::Error),

    #[from]
    Storage(object_store::Error),
}

impl Error {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    pub fn acquisition(message: impl Into<String>) -> Self {
        Self::Acquisition(message.into())
    }

    pub fn analysis(pass: impl Into<String>, message: impl ToString) -> Self {
        Self::Analysis {
            pass: pass.into(),
            message: message.to_string(),
        }
    }

    /// True for failures raised before any external service was contacted.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InputValidation(_))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Http(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}
