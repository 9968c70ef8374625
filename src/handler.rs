//! The ingest pipeline for one SES notification.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::IngestOptions;
use crate::error::{IngestError, Result};
use crate::event::{Metadata, Notification};
use crate::mime::{self, Attachment, Body};
use crate::storage::{ObjectStore, PutObject};

/// Where one attachment ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AttachmentStatus {
    Stored,
    /// The store rejected the upload; redelivery may succeed.
    UploadFailed(String),
    /// The transfer encoding could not be decoded; nothing was uploaded.
    Undecodable(String),
}

/// What happened to one attachment.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentOutcome {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub extension: Option<String>,
    pub size: usize,
    #[serde(flatten)]
    pub status: AttachmentStatus,
}

impl AttachmentOutcome {
    pub fn is_stored(&self) -> bool {
        self.status == AttachmentStatus::Stored
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub message_id: String,
    pub metadata: Metadata,
    pub attachments: Vec<AttachmentOutcome>,
    pub body: Body,
}

impl IngestReport {
    pub fn failed_uploads(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| matches!(a.status, AttachmentStatus::UploadFailed(_)))
            .count()
    }

    pub fn undecodable(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| matches!(a.status, AttachmentStatus::Undecodable(_)))
            .count()
    }

    /// Turn a partially stored message into an error so it gets redelivered.
    /// Undecodable attachments do not count: redelivery cannot fix them.
    pub fn ensure_complete(self) -> Result<Self> {
        let failed = self.failed_uploads();
        if failed == 0 {
            Ok(self)
        } else {
            Err(IngestError::IncompleteUpload {
                failed,
                total: self.attachments.len(),
            })
        }
    }
}

pub struct MailIngestHandler {
    store: Arc<dyn ObjectStore>,
    options: IngestOptions,
}

impl MailIngestHandler {
    pub fn new(store: Arc<dyn ObjectStore>, options: IngestOptions) -> Self {
        Self { store, options }
    }

    /// Process one notification end to end.
    ///
    /// Security rejections happen before the stored message is touched. The
    /// stored message is tagged before it is read. Attachment upload failures
    /// are reported per attachment rather than aborting the run.
    pub async fn handle(&self, event: Value) -> Result<IngestReport> {
        debug!(event = %event, "received event");

        let notification = Notification::from_event(event)?;
        let message_id = notification.message_id.clone();
        info!(message_id = %message_id, "Reception of SES mail");

        if let Err(e) = notification.check_verdicts() {
            warn!(message_id = %message_id, "{e}");
            return Err(e);
        }

        let metadata = notification.metadata();
        let message_key = self.options.message_key(&message_id);

        self.store
            .put_object_tags(&message_key, &metadata.tag_pairs())
            .await
            .map_err(|e| IngestError::storage("tagging", &message_key, e))?;

        let raw = self
            .store
            .get_object(&message_key)
            .await
            .map_err(|e| IngestError::storage("get", &message_key, e))?;

        let (attachments, body) = {
            let mail = mailparse::parse_mail(&raw)?;
            let attachments = mime::extract_attachments(&mail);
            let body = mime::extract_body(&mail);
            (attachments, body)
        };

        let outcomes = self.upload_attachments(&message_id, &metadata, attachments).await;

        let report = IngestReport {
            message_id,
            metadata,
            attachments: outcomes,
            body,
        };
        info!(
            message_id = %report.message_id,
            attachments = report.attachments.len(),
            failed = report.failed_uploads(),
            undecodable = report.undecodable(),
            "ingest finished"
        );
        Ok(report)
    }

    async fn upload_attachments(
        &self,
        message_id: &str,
        metadata: &Metadata,
        attachments: Vec<Attachment>,
    ) -> Vec<AttachmentOutcome> {
        let tagging = metadata.tagging_query();
        let object_metadata: HashMap<String, String> =
            metadata.metadata_pairs().into_iter().collect();

        stream::iter(attachments)
            .map(|attachment| {
                let key = self.options.attachment_key(message_id, &attachment.filename);
                let object = PutObject {
                    key: key.clone(),
                    body: attachment.content.clone(),
                    content_type: attachment.content_type.clone(),
                    tagging: tagging.clone(),
                    metadata: object_metadata.clone(),
                };
                async move {
                    info!(
                        filename = %attachment.filename,
                        size = attachment.content.len(),
                        content_type = %attachment.content_type,
                        "attachment"
                    );
                    let status = match attachment.decode_error {
                        Some(reason) => {
                            warn!(key = %key, "attachment not decodable: {reason}");
                            AttachmentStatus::Undecodable(reason)
                        }
                        None => match self.store.put_object(object).await {
                            Ok(()) => AttachmentStatus::Stored,
                            Err(e) => {
                                warn!(key = %key, "attachment upload failed: {e:#}");
                                AttachmentStatus::UploadFailed(format!("{e:#}"))
                            }
                        },
                    };
                    AttachmentOutcome {
                        key,
                        size: attachment.content.len(),
                        filename: attachment.filename,
                        content_type: attachment.content_type,
                        extension: attachment.extension,
                        status,
                    }
                }
            })
            .buffered(self.options.upload_concurrency())
            .collect()
            .await
    }
}
