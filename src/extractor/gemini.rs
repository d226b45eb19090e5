//! Gemini implementation of [`FileService`] over the REST API.
//!
//! Endpoints used (all under `api_base_url`):
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upload    | `POST /upload/v1beta/files` resumable start, then `upload, finalize` |
//! | poll      | `GET /v1beta/{name}` while the file is `PROCESSING` |
//! | generate  | `POST /v1beta/models/{model}:generateContent` |
//! | delete    | `DELETE /v1beta/{name}` |
//! | models    | `GET /v1beta/models` |
//!
//! No request timeout is set on the client: a chunk of dense pages can take
//! tens of seconds to transcribe and the driver's pacing is the only rate
//! control.

use crate::config::ExtractionConfig;
use crate::error::ChunkscribeError;
use crate::extractor::remote::{FileService, GenerateReply, RemoteFile, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Models offered when the model listing is unavailable.
pub const FALLBACK_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-1.5-pro", "gemini-1.5-flash"];

const PDF_MIME: &str = "application/pdf";
const PROCESSING_POLLS: u32 = 10;
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// REST client for the Gemini Files and generateContent APIs.
#[derive(Clone)]
pub struct GeminiFileService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiFileService {
    pub fn new(api_key: String, config: &ExtractionConfig) -> Result<Self, ChunkscribeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ChunkscribeError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Models that support `generateContent` and are Gemini models, newest
    /// names first.
    pub async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/v1beta/models?pageSize=1000", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        let listing: ModelList = parse_json(response).await?;
        Ok(select_models(listing))
    }

    async fn fetch_file(&self, name: &str) -> Result<FileResource, ServiceError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }
}

#[async_trait]
impl FileService for GeminiFileService {
    async fn upload(&self, bytes: &[u8], display_name: &str) -> Result<RemoteFile, ServiceError> {
        let start_url = format!("{}/upload/v1beta/files", self.base_url);
        let start = self
            .client
            .post(&start_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", PDF_MIME)
            .json(&UploadStart {
                file: UploadFileMeta { display_name },
            })
            .send()
            .await
            .map_err(transport)?;
        let start = ensure_success(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ServiceError::Decode("missing x-goog-upload-url header".into()))?;

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport)?;
        let uploaded: UploadResponse = parse_json(response).await?;

        info!("Uploaded {} ({} bytes) as {}", display_name, bytes.len(), uploaded.file.name);
        Ok(uploaded.file.into_remote())
    }

    async fn await_ready(&self, file: &RemoteFile) -> Result<RemoteFile, ServiceError> {
        let mut current = file.clone();
        for _ in 0..PROCESSING_POLLS {
            if current.state.as_deref() != Some("PROCESSING") {
                break;
            }
            debug!("{} still processing", current.name);
            tokio::time::sleep(PROCESSING_POLL_INTERVAL).await;
            current = self.fetch_file(&current.name).await?.into_remote();
        }
        check_ready(current)
    }

    async fn generate(
        &self,
        file: &RemoteFile,
        instruction: &str,
    ) -> Result<GenerateReply, ServiceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            mime_type: &file.mime_type,
                            file_uri: &file.uri,
                        },
                    },
                    Part::Text { text: instruction },
                ],
            }],
        };
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let parsed: GenerateResponse = parse_json(response).await?;
        Ok(parsed.into_reply())
    }

    async fn delete(&self, file: &RemoteFile) -> Result<(), ServiceError> {
        let url = format!("{}/v1beta/{}", self.base_url, file.name);
        let response = self
            .client
            .delete(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response).await?;
        debug!("Deleted {}", file.name);
        Ok(())
    }
}

// ── HTTP helpers ─────────────────────────────────────────────────────────

/// A file the service gave up on cannot be used for generation.
fn check_ready(file: RemoteFile) -> Result<RemoteFile, ServiceError> {
    match file.state.as_deref() {
        Some("FAILED") => Err(ServiceError::Decode(format!(
            "service could not process {}",
            file.name
        ))),
        _ => Ok(file),
    }
}

fn transport(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ServiceError> {
    let response = ensure_success(response).await?;
    let text = response.text().await.map_err(transport)?;
    serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))
}

fn select_models(listing: ModelList) -> Vec<String> {
    let mut names: Vec<String> = listing
        .models
        .into_iter()
        .filter(|m| {
            m.supported_generation_methods
                .iter()
                .any(|method| method == "generateContent")
                && m.name.to_lowercase().contains("gemini")
        })
        .map(|m| m.name.trim_start_matches("models/").to_string())
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    names
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct UploadStart<'a> {
    file: UploadFileMeta<'a>,
}

#[derive(Serialize)]
struct UploadFileMeta<'a> {
    display_name: &'a str,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl FileResource {
    fn into_remote(self) -> RemoteFile {
        RemoteFile {
            mime_type: self.mime_type.unwrap_or_else(|| PDF_MIME.to_string()),
            name: self.name,
            uri: self.uri,
            state: self.state,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    FileData { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Deserialize, Default)]
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
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
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
    fn into_reply(self) -> GenerateReply {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let first = self.candidates.into_iter().next();
        let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
        let segments = first
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        GenerateReply {
            segments,
            finish_reason,
            block_reason,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::remote::classify_reply;
    use crate::extractor::ExtractionResult;

    fn reply(json: &str) -> GenerateReply {
        serde_json::from_str::<GenerateResponse>(json)
            .expect("valid response")
            .into_reply()
    }

    #[test]
    fn text_parts_become_segments() {
        let r = reply(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}],"role":"model"},
                "finishReason":"STOP"}]}"#,
        );
        assert_eq!(r.segments, vec!["Hello ", "world"]);
        assert_eq!(r.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(classify_reply(r), ExtractionResult::Success("Hello world".into()));
    }

    #[test]
    fn blocked_prompt_is_refusal() {
        let r = reply(r#"{"promptFeedback":{"blockReason":"PROHIBITED_CONTENT"}}"#);
        assert!(r.segments.is_empty());
        assert!(matches!(
            classify_reply(r),
            ExtractionResult::Refused(ref refusal) if refusal.reason == "PROHIBITED_CONTENT"
        ));
    }

    #[test]
    fn safety_stop_without_parts_is_refusal() {
        let r = reply(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        assert!(matches!(
            classify_reply(r),
            ExtractionResult::Refused(ref refusal) if refusal.reason == "SAFETY"
        ));
    }

    #[test]
    fn request_body_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData {
                        file_data: FileData {
                            mime_type: PDF_MIME,
                            file_uri: "https://example.test/f",
                        },
                    },
                    Part::Text { text: "Extract." },
                ],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][0]["file_data"]["file_uri"],
            "https://example.test/f"
        );
        assert_eq!(json["contents"][0]["parts"][1]["text"], "Extract.");
    }

    #[test]
    fn model_listing_filters_and_sorts() {
        let listing: ModelList = serde_json::from_str(
            r#"{"models":[
                {"name":"models/gemini-1.5-flash","supportedGenerationMethods":["generateContent"]},
                {"name":"models/embedding-001","supportedGenerationMethods":["embedContent"]},
                {"name":"models/gemini-2.5-pro","supportedGenerationMethods":["generateContent","countTokens"]},
                {"name":"models/gemini-embedding","supportedGenerationMethods":["embedContent"]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(select_models(listing), vec!["gemini-2.5-pro", "gemini-1.5-flash"]);
    }

    #[test]
    fn upload_response_keeps_processing_state() {
        let uploaded: UploadResponse = serde_json::from_str(
            r#"{"file":{"name":"files/x","uri":"https://example.test/files/x","state":"PROCESSING"}}"#,
        )
        .unwrap();
        let file = uploaded.file.into_remote();
        assert_eq!(file.state.as_deref(), Some("PROCESSING"));
        assert_eq!(file.mime_type, PDF_MIME);
    }

    #[test]
    fn failed_processing_is_an_error() {
        let file = |state: &str| RemoteFile {
            name: "files/x".into(),
            uri: "https://example.test/files/x".into(),
            mime_type: PDF_MIME.into(),
            state: Some(state.into()),
        };
        assert!(matches!(
            check_ready(file("FAILED")),
            Err(ServiceError::Decode(ref m)) if m.contains("files/x")
        ));
        assert!(check_ready(file("ACTIVE")).is_ok());
    }

    #[test]
    fn api_error_message_is_extracted() {
        let envelope: ApiErrorEnvelope = serde_json::from_str(
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.message, "API key not valid.");
    }
}
