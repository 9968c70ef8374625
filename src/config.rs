//! Runtime configuration, read from flags or the Lambda environment.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Bucket the SES receipt rule writes raw messages to.
    #[arg(long, env = "AWS_BUCKET_NAME")]
    pub bucket: String,

    /// Object key prefix configured on the SES S3 action.
    #[arg(long, env = "AWS_BUCKET_OBJECT_PREFIX", default_value = "")]
    pub object_prefix: String,

    /// Attachment uploads in flight at once.
    #[arg(long, env = "UPLOAD_CONCURRENCY", default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub upload_concurrency: u16,

    /// Default filter when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Process one notification from a JSON file instead of serving Lambda
    /// invocations.
    #[arg(long, env = "EVENT_FILE")]
    pub event_file: Option<PathBuf>,
}

impl Config {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions::new(&self.object_prefix, self.upload_concurrency as usize)
    }
}

/// The part of the configuration the handler itself needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    prefix: String,
    upload_concurrency: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::new("", 4)
    }
}

impl IngestOptions {
    pub fn new(prefix: &str, upload_concurrency: usize) -> Self {
        Self {
            prefix: prefix.trim_start_matches('/').to_string(),
            upload_concurrency: upload_concurrency.max(1),
        }
    }

    pub fn upload_concurrency(&self) -> usize {
        self.upload_concurrency
    }

    /// Key of the raw message as written by SES.
    pub fn message_key(&self, message_id: &str) -> String {
        format!("{}{}", self.prefix, message_id)
    }

    pub fn attachment_key(&self, message_id: &str, filename: &str) -> String {
        format!("{}{}/{}", self.prefix, message_id, filename)
    }
}
