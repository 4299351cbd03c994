use crate::core::video;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_TIMESTAMPS: i64 = 5;
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// A credential that must never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// The request-scoped input document, as read from a file, the platform
/// key-value store, or assembled from command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunInput {
    pub youtube_url: Option<String>,
    pub gemini_api_key: Option<Secret>,
    pub use_default_key: bool,
    pub num_timestamps: i64,
    pub custom_prompt: Option<String>,
    pub cookies: Option<Secret>,
    pub download_video: bool,
    pub use_external_downloader: bool,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<Secret>,
}

impl Default for RunInput {
    fn default() -> Self {
        Self {
            youtube_url: None,
            gemini_api_key: None,
            use_default_key: false,
            num_timestamps: DEFAULT_TIMESTAMPS,
            custom_prompt: None,
            cookies: None,
            download_video: false,
            use_external_downloader: false,
            s3_bucket: None,
            s3_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

/// Destination the delegate service writes into and we read back from.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageTarget {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: Secret,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionMode {
    /// Hand the URL to the inference service as is.
    Direct,
    /// Download locally through the extraction strategy chain.
    Download,
    /// Let the delegate actor download into object storage, then fetch it.
    Delegate(StorageTarget),
}

/// Validated, fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_url: String,
    pub video_id: Option<String>,
    pub api_key: Secret,
    pub num_timestamps: u32,
    pub custom_prompt: Option<String>,
    pub cookies: Option<Secret>,
    pub acquisition: AcquisitionMode,
}

impl RunInput {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::input(format!("Input document is not valid: {e}")))
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::input(format!("Cannot read input file {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Check every required field and resolve defaults. Nothing external is
    /// contacted here, so a failure terminates the run before any call is made.
    pub fn validate(&self, default_key: Option<&Secret>) -> Result<RunConfig> {
        let source_url = match self.youtube_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => return Err(Error::input("YouTube URL is required")),
        };
        video::parse_source_url(&source_url)?;

        let api_key = if self.use_default_key {
            default_key.cloned().ok_or_else(|| {
                Error::input("use_default_key is set but no default Gemini API key is configured")
            })?
        } else {
            match &self.gemini_api_key {
                Some(key) if !key.expose().trim().is_empty() => {
                    Secret::new(key.expose().trim())
                }
                _ => {
                    return Err(Error::input(
                        "Gemini API key is required when not using default key",
                    ));
                }
            }
        };

        let num_timestamps = u32::try_from(self.num_timestamps).map_err(|_| {
            Error::input(format!(
                "num_timestamps must be a non-negative integer, got {}",
                self.num_timestamps
            ))
        })?;

        let custom_prompt = self
            .custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let cookies = self
            .cookies
            .as_ref()
            .filter(|c| !c.expose().trim().is_empty())
            .cloned();

        let acquisition = if self.use_external_downloader {
            AcquisitionMode::Delegate(self.storage_target()?)
        } else if self.download_video {
            AcquisitionMode::Download
        } else {
            AcquisitionMode::Direct
        };

        Ok(RunConfig {
            video_id: video::extract_video_id(&source_url),
            source_url,
            api_key,
            num_timestamps,
            custom_prompt,
            cookies,
            acquisition,
        })
    }

    fn storage_target(&self) -> Result<StorageTarget> {
        fn required(value: Option<&str>, name: &str) -> Result<String> {
            match value.map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(Error::input(format!(
                    "{name} is required when use_external_downloader is enabled"
                ))),
            }
        }

        Ok(StorageTarget {
            bucket: required(self.s3_bucket.as_deref(), "s3_bucket")?,
            region: self
                .s3_region
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_S3_REGION)
                .to_string(),
            access_key_id: required(self.aws_access_key_id.as_deref(), "aws_access_key_id")?,
            secret_access_key: Secret::new(required(
                self.aws_secret_access_key.as_ref().map(Secret::expose),
                "aws_secret_access_key",
            )?),
        })
    }
}
