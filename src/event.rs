//! SES receipt notification: typed payload, validation and sender/recipient metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, Result};

/// Status string SES uses for a failed verdict.
pub const VERDICT_FAIL: &str = "FAIL";

#[derive(Debug, Deserialize)]
struct SesEvent {
    #[serde(rename = "Records", default)]
    records: Vec<SesRecord>,
}

#[derive(Debug, Deserialize)]
struct SesRecord {
    ses: Option<SesPayload>,
}

#[derive(Debug, Deserialize)]
struct SesPayload {
    mail: SesMail,
    receipt: SesReceipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    message_id: String,
    source: String,
    destination: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesReceipt {
    pub spam_verdict: Verdict,
    pub virus_verdict: Verdict,
    pub spf_verdict: Verdict,
    pub dkim_verdict: Verdict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub status: String,
}

impl Verdict {
    pub fn is_fail(&self) -> bool {
        self.status == VERDICT_FAIL
    }
}

impl SesReceipt {
    fn named(&self) -> [(&'static str, &Verdict); 4] {
        [
            ("spam", &self.spam_verdict),
            ("virus", &self.virus_verdict),
            ("spf", &self.spf_verdict),
            ("dkim", &self.dkim_verdict),
        ]
    }
}

/// One inbound message announcement, validated.
#[derive(Debug, Clone)]
pub struct Notification {
    pub message_id: String,
    pub source: String,
    /// Never empty.
    pub destination: Vec<String>,
    pub verdicts: SesReceipt,
}

impl Notification {
    /// Validate a raw event and pull out the first record's notification.
    pub fn from_event(event: Value) -> Result<Self> {
        let event: SesEvent = serde_json::from_value(event)
            .map_err(|e| IngestError::MalformedEvent(e.to_string()))?;

        let ses = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::MalformedEvent("no record".into()))?
            .ses
            .ok_or_else(|| IngestError::MalformedEvent("record has no 'ses' notification".into()))?;

        if ses.mail.destination.is_empty() {
            return Err(IngestError::MalformedEvent("empty destination list".into()));
        }

        Ok(Self {
            message_id: ses.mail.message_id,
            source: ses.mail.source,
            destination: ses.mail.destination,
            verdicts: ses.receipt,
        })
    }

    /// Names of the verdicts whose status is `FAIL`.
    pub fn failed_verdicts(&self) -> Vec<String> {
        self.verdicts
            .named()
            .into_iter()
            .filter(|(_, v)| v.is_fail())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Any status other than `FAIL` is accepted, including `GRAY` and
    /// `PROCESSING_FAILED`.
    pub fn check_verdicts(&self) -> Result<()> {
        let failed = self.failed_verdicts();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(IngestError::SecurityCheckFailed { failed })
        }
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            source: self.source.clone(),
            destination: self.destination.clone(),
        }
    }
}

/// Longest value S3 accepts for an object tag, in characters.
pub const TAG_VALUE_MAX_CHARS: usize = 256;

/// S3 cap on all user metadata keys and values together, in bytes.
pub const METADATA_MAX_BYTES: usize = 2048;

/// Bytes of the metadata budget the sender may take.
const METADATA_SOURCE_MAX_BYTES: usize = 512;

/// Sender/recipient annotation written on every object touched for a message.
///
/// Holds every recipient. The tag and metadata forms are cut down to what S3
/// accepts, dropping whole trailing recipients first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub source: String,
    pub destination: Vec<String>,
}

impl Metadata {
    /// Tag set in a fixed order. Recipients are space-joined since S3 tag
    /// values do not allow `,` or `;`.
    pub fn tag_pairs(&self) -> Vec<(String, String)> {
        vec![
            (
                "source".to_string(),
                join_bounded([tag_value(&self.source)], TAG_VALUE_MAX_CHARS),
            ),
            (
                "destination".to_string(),
                join_bounded(
                    self.destination.iter().map(|d| tag_value(d)),
                    TAG_VALUE_MAX_CHARS,
                ),
            ),
        ]
    }

    /// `x-amz-meta-*` pairs: ASCII only, within the 2 KB budget.
    pub fn metadata_pairs(&self) -> Vec<(String, String)> {
        let source = join_bounded([metadata_value(&self.source)], METADATA_SOURCE_MAX_BYTES);
        let budget =
            METADATA_MAX_BYTES - "source".len() - "destination".len() - source.len();
        let destination = join_bounded(self.destination.iter().map(|d| metadata_value(d)), budget);
        vec![
            ("source".to_string(), source),
            ("destination".to_string(), destination),
        ]
    }

    /// `application/x-www-form-urlencoded` form, as expected by `x-amz-tagging`.
    pub fn tagging_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.tag_pairs())
            .finish()
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || c == ' ' || "+-=._:/@".contains(c)
}

/// Characters S3 rejects in tag values become `_`.
fn tag_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if is_tag_char(c) { c } else { '_' })
        .collect()
}

/// Printable ASCII is kept; anything else is percent-encoded.
fn metadata_value(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii_graphic()) {
        value.to_string()
    } else {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }
}

/// Space-joins whole items while the result fits in `max` characters. A
/// first item that alone exceeds `max` is cut.
fn join_bounded(items: impl IntoIterator<Item = String>, max: usize) -> String {
    let mut out = String::new();
    let mut len = 0;
    for item in items {
        let item_len = item.chars().count();
        let sep = usize::from(!out.is_empty());
        if len + sep + item_len > max {
            if out.is_empty() {
                out = item.chars().take(max).collect();
            }
            break;
        }
        if sep == 1 {
            out.push(' ');
        }
        out.push_str(&item);
        len += sep + item_len;
    }
    out
}
