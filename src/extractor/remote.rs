//! Remote multimodal extraction over an upload / generate / delete service.
//!
//! ## Protocol per chunk
//!
//! ```text
//! upload(subset) ──▶ await_ready(handle) ──▶ generate(handle, instruction) ──▶ delete(handle)
//!      │ err                │ err                      │ reply / err           (always, once
//!      ▼                    ▼                          ▼                         upload succeeded)
//!   Failed               Failed           Success | Refused | Failed
//! ```
//!
//! A reply without any text segment is a content-policy refusal, not a
//! transport error. The reason comes from the service's block or finish
//! reason fields, never from parsing an error message.

use crate::error::{ContentPolicyRefusal, ExtractionError};
use crate::extractor::{ExtractionRequest, ExtractionResult, TextExtractor};
use async_trait::async_trait;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Handle to a file stored by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Resource name used for deletion, e.g. `files/abc123`.
    pub name: String,
    /// URI referenced from generation requests.
    pub uri: String,
    pub mime_type: String,
    /// Processing state reported by the service, if any.
    pub state: Option<String>,
}

/// A generation reply, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateReply {
    /// Text segments in order. Empty means the service withheld content.
    pub segments: Vec<String>,
    pub finish_reason: Option<String>,
    /// Prompt-level block reason, set when the input itself was blocked.
    pub block_reason: Option<String>,
}

impl GenerateReply {
    pub fn text(&self) -> String {
        self.segments.concat()
    }
}

/// Errors from a [`FileService`] call.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never got a response (DNS, TLS, connection reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The remote operations the extractor needs.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn upload(&self, bytes: &[u8], display_name: &str) -> Result<RemoteFile, ServiceError>;

    /// Wait until an uploaded file can be referenced from a generation
    /// request. Services that accept files immediately keep the default.
    async fn await_ready(&self, file: &RemoteFile) -> Result<RemoteFile, ServiceError> {
        Ok(file.clone())
    }

    async fn generate(
        &self,
        file: &RemoteFile,
        instruction: &str,
    ) -> Result<GenerateReply, ServiceError>;

    async fn delete(&self, file: &RemoteFile) -> Result<(), ServiceError>;
}

/// [`TextExtractor`] backed by a [`FileService`].
pub struct RemoteMultimodalExtractor<S> {
    service: S,
}

impl<S: FileService> RemoteMultimodalExtractor<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    async fn release(&self, file: &RemoteFile) {
        if let Err(e) = self.service.delete(file).await {
            warn!("Could not delete remote file {}: {}", file.name, e);
        }
    }
}

/// Classify a generation reply.
pub fn classify_reply(reply: GenerateReply) -> ExtractionResult {
    if reply.segments.iter().all(|s| s.is_empty()) {
        let reason = reply
            .block_reason
            .or(reply.finish_reason)
            .unwrap_or_else(|| "no content returned".to_string());
        return ExtractionResult::Refused(ContentPolicyRefusal::new(reason));
    }
    ExtractionResult::Success(reply.text())
}

#[async_trait]
impl<S: FileService> TextExtractor for RemoteMultimodalExtractor<S> {
    fn name(&self) -> &str {
        "remote"
    }

    async fn extract(&self, request: &ExtractionRequest) -> ExtractionResult {
        let start = Instant::now();
        let subset = &request.subset;

        let uploaded = match self
            .service
            .upload(&subset.bytes, &subset.display_name())
            .await
        {
            Ok(file) => file,
            Err(e) => return ExtractionResult::Failed(ExtractionError::Upload(e.to_string())),
        };
        debug!("Uploaded {} as {}", subset.pages, uploaded.name);

        let file = match self.service.await_ready(&uploaded).await {
            Ok(file) => file,
            Err(e) => {
                self.release(&uploaded).await;
                return ExtractionResult::Failed(ExtractionError::Upload(e.to_string()));
            }
        };

        let generated = self.service.generate(&file, &request.instruction()).await;

        // The handle is released whatever generate returned.
        self.release(&file).await;

        let result = match generated {
            Ok(reply) => classify_reply(reply),
            Err(e) => ExtractionResult::Failed(ExtractionError::Generate(e.to_string())),
        };
        debug!(
            "{}: remote extraction finished in {:?}",
            subset.pages,
            start.elapsed()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::slicer::PageRange;
    use crate::pipeline::subset::DocumentSubset;
    use std::sync::Mutex;

    /// Scripted service that records every call.
    struct ScriptedService {
        upload: Result<RemoteFile, ServiceError>,
        ready: Result<(), ServiceError>,
        generate: Result<GenerateReply, ServiceError>,
        delete: Result<(), ServiceError>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(generate: Result<GenerateReply, ServiceError>) -> Self {
            Self {
                upload: Ok(RemoteFile {
                    name: "files/abc".into(),
                    uri: "https://example.test/files/abc".into(),
                    mime_type: "application/pdf".into(),
                    state: Some("PROCESSING".into()),
                }),
                ready: Ok(()),
                generate,
                delete: Ok(()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileService for ScriptedService {
        async fn upload(&self, bytes: &[u8], name: &str) -> Result<RemoteFile, ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("upload {name} {}", bytes.len()));
            self.upload.clone()
        }

        async fn await_ready(&self, file: &RemoteFile) -> Result<RemoteFile, ServiceError> {
            self.calls.lock().unwrap().push(format!("ready {}", file.name));
            self.ready.clone()?;
            Ok(RemoteFile {
                state: Some("ACTIVE".into()),
                ..file.clone()
            })
        }

        async fn generate(
            &self,
            file: &RemoteFile,
            instruction: &str,
        ) -> Result<GenerateReply, ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("generate {} {instruction}", file.name));
            self.generate.clone()
        }

        async fn delete(&self, file: &RemoteFile) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push(format!("delete {}", file.name));
            self.delete.clone()
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest::new(
            DocumentSubset {
                pages: PageRange::new(3, 6),
                bytes: b"%PDF-1.5 stub".to_vec(),
            },
            vec!["Extract.".into(), "Keep grammar.".into()],
        )
    }

    fn reply(segments: &[&str]) -> GenerateReply {
        GenerateReply {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            finish_reason: Some("STOP".into()),
            block_reason: None,
        }
    }

    #[tokio::test]
    async fn success_uploads_generates_and_deletes() {
        let extractor =
            RemoteMultimodalExtractor::new(ScriptedService::new(Ok(reply(&["Hello ", "world"]))));
        let result = extractor.extract(&request()).await;
        assert_eq!(result, ExtractionResult::Success("Hello world".into()));
        assert_eq!(
            extractor.service().calls(),
            vec![
                "upload pages-4-6.pdf 13",
                "ready files/abc",
                "generate files/abc Extract. Keep grammar.",
                "delete files/abc",
            ]
        );
    }

    #[tokio::test]
    async fn empty_reply_is_refusal() {
        let mut blocked = reply(&[]);
        blocked.block_reason = Some("PROHIBITED_CONTENT".into());
        let extractor = RemoteMultimodalExtractor::new(ScriptedService::new(Ok(blocked)));
        assert_eq!(
            extractor.extract(&request()).await,
            ExtractionResult::Refused(ContentPolicyRefusal::new("PROHIBITED_CONTENT"))
        );
        assert_eq!(extractor.service().calls().len(), 4);
    }

    #[tokio::test]
    async fn finish_reason_used_when_not_blocked() {
        let mut safety = reply(&[""]);
        safety.finish_reason = Some("SAFETY".into());
        let extractor = RemoteMultimodalExtractor::new(ScriptedService::new(Ok(safety)));
        assert_eq!(
            extractor.extract(&request()).await,
            ExtractionResult::Refused(ContentPolicyRefusal::new("SAFETY"))
        );
    }

    #[tokio::test]
    async fn generate_error_still_deletes() {
        let extractor = RemoteMultimodalExtractor::new(ScriptedService::new(Err(
            ServiceError::Status {
                status: 429,
                message: "quota".into(),
            },
        )));
        let result = extractor.extract(&request()).await;
        assert!(matches!(
            result,
            ExtractionResult::Failed(ExtractionError::Generate(ref m)) if m.contains("429")
        ));
        assert_eq!(extractor.service().calls().last().unwrap(), "delete files/abc");
    }

    #[tokio::test]
    async fn upload_error_skips_generate_and_delete() {
        let mut service = ScriptedService::new(Ok(reply(&["unused"])));
        service.upload = Err(ServiceError::Transport("connection reset".into()));
        let extractor = RemoteMultimodalExtractor::new(service);
        let result = extractor.extract(&request()).await;
        assert!(matches!(result, ExtractionResult::Failed(ExtractionError::Upload(_))));
        assert_eq!(extractor.service().calls().len(), 1);
    }

    #[tokio::test]
    async fn processing_failure_still_deletes() {
        let mut service = ScriptedService::new(Ok(reply(&["unused"])));
        service.ready = Err(ServiceError::Decode(
            "service could not process files/abc".into(),
        ));
        let extractor = RemoteMultimodalExtractor::new(service);
        let result = extractor.extract(&request()).await;
        assert!(matches!(
            result,
            ExtractionResult::Failed(ExtractionError::Upload(ref m)) if m.contains("could not process")
        ));
        assert_eq!(
            extractor.service().calls(),
            vec![
                "upload pages-4-6.pdf 13",
                "ready files/abc",
                "delete files/abc",
            ]
        );
    }

    #[tokio::test]
    async fn delete_error_keeps_text() {
        let mut service = ScriptedService::new(Ok(reply(&["kept"])));
        service.delete = Err(ServiceError::Status {
            status: 500,
            message: "oops".into(),
        });
        let extractor = RemoteMultimodalExtractor::new(service);
        assert_eq!(
            extractor.extract(&request()).await,
            ExtractionResult::Success("kept".into())
        );
    }
}
