//! Ingest of SES-received mail stored in S3: verdict check, tagging,
//! attachment extraction and body decoding.

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod mime;
pub mod storage;

pub use config::{Config, IngestOptions};
pub use error::IngestError;
pub use handler::{AttachmentOutcome, AttachmentStatus, IngestReport, MailIngestHandler};
pub use storage::{ObjectStore, PutObject, S3Store};
