use crate::core::input::Secret;
use crate::core::poller::AssetState;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_LENGTH;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Media an analysis pass refers to: either the source URL itself or the
/// URI of an uploaded asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPart {
    pub uri: String,
    pub mime_type: Option<String>,
}

/// Handle for media uploaded to the inference service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAsset {
    pub name: String,
    pub uri: String,
    pub mime_type: Option<String>,
    pub state: AssetState,
    pub error: Option<String>,
}

impl RemoteAsset {
    pub fn media_part(&self) -> MediaPart {
        MediaPart {
            uri: self.uri.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn upload(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteAsset>;

    async fn asset(&self, name: &str) -> Result<RemoteAsset>;

    async fn generate(&self, media: &MediaPart, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Secret,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: Secret, base_url: &str, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn upload(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteAsset> {
        let size = tokio::fs::metadata(path).await?.len();
        info!(file = %display_name, bytes = size, mime = mime_type, "Uploading media to Gemini");

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, self.api_key.expose())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(|e| Error::Upload(format!("could not start upload session: {e}")))?;

        let start = check_status(start)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Upload("upload session returned no upload URL".to_string()))?
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let response = self
            .http
            .post(upload_url)
            .header(CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| Error::Upload(format!("transfer failed: {e}")))?;

        let response = check_status(response)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        let envelope: FileEnvelope = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("unreadable upload response: {e}")))?;

        let asset = envelope.file.into_asset();
        info!(name = %asset.name, state = ?asset.state, "Upload finished");
        Ok(asset)
    }

    async fn asset(&self, name: &str) -> Result<RemoteAsset> {
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await?;

        let file: FileResource = check_status(response).await?.json().await?;
        Ok(file.into_asset())
    }

    async fn generate(&self, media: &MediaPart, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            file_uri: media.uri.clone(),
                            mime_type: media.mime_type.clone(),
                        },
                    },
                    Part::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
        };

        debug!(model = %self.model, uri = %media.uri, "Calling generateContent");
        let response = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&request)
            .send()
            .await?;

        let body: GenerateResponse = check_status(response).await?.json().await?;
        body.into_text()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::custom(api_error_message(status, &body)))
}

fn api_error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => format!("Gemini API returned {status}: {}", envelope.error.message),
        Err(_) if body.trim().is_empty() => format!("Gemini API returned {status}"),
        Err(_) => format!("Gemini API returned {status}: {}", body.trim()),
    }
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: FileResource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl FileResource {
    fn into_asset(self) -> RemoteAsset {
        RemoteAsset {
            state: AssetState::from_api(self.state.as_deref()),
            name: self.name,
            uri: self.uri,
            mime_type: self.mime_type,
            error: self.error.map(|e| e.message),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Error::custom(format!("Prompt was blocked: {reason}")));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::custom("Gemini returned no candidates"))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(Error::custom(format!(
                "Gemini returned an empty response (finish reason: {reason})"
            )));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_file_data_and_text_parts() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            file_uri: "https://youtu.be/dQw4w9WgXcQ".to_string(),
                            mime_type: None,
                        },
                    },
                    Part::Text {
                        text: "Summarize".to_string(),
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "fileData": { "fileUri": "https://youtu.be/dQw4w9WgXcQ" } },
                        { "text": "Summarize" }
                    ]
                }]
            })
        );
    }

    #[test]
    fn response_text_is_joined_across_parts() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(body.into_text().unwrap(), "Hello world");
    }

    #[test]
    fn blocked_or_empty_responses_are_errors() {
        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(blocked.into_text().unwrap_err().to_string().contains("SAFETY"));

        let empty: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#).unwrap();
        assert!(empty.into_text().unwrap_err().to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn file_resource_maps_to_asset() {
        let envelope: FileEnvelope = serde_json::from_str(
            r#"{"file":{"name":"files/abc123","uri":"https://generativelanguage.googleapis.com/v1beta/files/abc123","mimeType":"video/mp4","state":"PROCESSING"}}"#,
        )
        .unwrap();
        let asset = envelope.file.into_asset();

        assert_eq!(asset.name, "files/abc123");
        assert_eq!(asset.state, AssetState::Processing);
        assert_eq!(asset.media_part().mime_type.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn api_errors_surface_the_service_message() {
        let message = api_error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#,
        );
        assert_eq!(message, "Gemini API returned 400 Bad Request: API key not valid");
        assert_eq!(
            api_error_message(StatusCode::BAD_GATEWAY, ""),
            "Gemini API returned 502 Bad Gateway"
        );
    }
}
