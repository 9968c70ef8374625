//! MIME walk over a parsed message: attachment listing and body extraction.

use std::collections::HashSet;

use bytes::Bytes;
use mailparse::{DispositionType, ParsedMail};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex digits of the content hash used in generated filenames.
const FALLBACK_HASH_LEN: usize = 12;

/// One attachment, decoded and ready to upload.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Position among the message's attachments, depth-first.
    pub index: usize,
    /// Filename as declared by the sender, if any.
    pub declared_filename: Option<String>,
    /// Name used for the storage key. Unique within the message.
    pub filename: String,
    pub content_type: String,
    /// Without the leading dot.
    pub extension: Option<String>,
    /// Empty when the transfer encoding could not be decoded.
    pub content: Bytes,
    /// Why the part's transfer encoding could not be decoded.
    pub decode_error: Option<String>,
}

/// Which body representation to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Plain,
    Html,
}

impl BodyKind {
    pub const ALL: [BodyKind; 2] = [BodyKind::Plain, BodyKind::Html];

    pub fn as_str(self) -> &'static str {
        match self {
            BodyKind::Plain => "plain",
            BodyKind::Html => "html",
        }
    }

    fn mimetype(self) -> &'static str {
        match self {
            BodyKind::Plain => "text/plain",
            BodyKind::Html => "text/html",
        }
    }
}

/// Decoded message bodies; `None` means the representation is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Body {
    pub plain: Option<String>,
    pub html: Option<String>,
}

impl Body {
    pub fn get(&self, kind: BodyKind) -> Option<&str> {
        match kind {
            BodyKind::Plain => self.plain.as_deref(),
            BodyKind::Html => self.html.as_deref(),
        }
    }

    fn set(&mut self, kind: BodyKind, text: Option<String>) {
        match kind {
            BodyKind::Plain => self.plain = text,
            BodyKind::Html => self.html = text,
        }
    }
}

/// Filename from `Content-Disposition`, falling back to the `name` parameter
/// of `Content-Type`. Path separators are neutralised so the name stays a
/// single key segment.
pub fn declared_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| name.trim().replace(['/', '\\'], "_"))
        .filter(|name| !name.is_empty())
}

fn is_text_body(mimetype: &str) -> bool {
    mimetype.eq_ignore_ascii_case("text/plain") || mimetype.eq_ignore_ascii_case("text/html")
}

fn is_disposition_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    )
}

/// The first inline `text/plain` and the first inline `text/html` leaf are
/// the message bodies; every other leaf below the root is an attachment.
fn collect_attachment_parts<'a, 'b>(
    part: &'a ParsedMail<'b>,
    seen_bodies: &mut HashSet<String>,
    out: &mut Vec<&'a ParsedMail<'b>>,
) {
    for sub in &part.subparts {
        if !sub.subparts.is_empty() {
            collect_attachment_parts(sub, seen_bodies, out);
            continue;
        }
        let mimetype = sub.ctype.mimetype.to_ascii_lowercase();
        let body_candidate = is_text_body(&mimetype) && !is_disposition_attachment(sub);
        if body_candidate && seen_bodies.insert(mimetype) {
            continue;
        }
        out.push(sub);
    }
}

/// Attachment parts in depth-first order. A single-part message has none.
pub fn attachment_parts<'a, 'b>(mail: &'a ParsedMail<'b>) -> Vec<&'a ParsedMail<'b>> {
    let mut out = Vec::new();
    collect_attachment_parts(mail, &mut HashSet::new(), &mut out);
    out
}

/// Extension from the filename suffix, else guessed from the content type.
/// A filename suffix always wins, even when it contradicts the type.
pub fn resolve_extension(filename: Option<&str>, content_type: &str) -> Option<String> {
    filename
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
        .or_else(|| guess_extension(content_type))
}

/// Types whose extension list in `mime_guess` does not start with the usual one.
const PREFERRED_EXTENSIONS: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("image/jpeg", "jpg"),
    ("image/tiff", "tiff"),
    ("audio/mpeg", "mp3"),
    ("video/mpeg", "mpeg"),
    ("application/octet-stream", "bin"),
];

fn guess_extension(content_type: &str) -> Option<String> {
    if let Some((_, ext)) = PREFERRED_EXTENSIONS
        .iter()
        .find(|(ctype, _)| ctype.eq_ignore_ascii_case(content_type))
    {
        return Some(ext.to_string());
    }
    let exts = mime_guess::get_mime_extensions_str(content_type)?;
    exts.iter()
        .find(|ext| {
            mime_guess::from_ext(ext)
                .first_raw()
                .is_some_and(|ctype| ctype.eq_ignore_ascii_case(content_type))
        })
        .or_else(|| exts.first())
        .map(|ext| ext.to_string())
}

/// Deterministic name for an attachment that declares none.
pub fn fallback_filename(index: usize, content: &[u8], extension: Option<&str>) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    let stem = format!("attachment-{index}-{}", &digest[..FALLBACK_HASH_LEN]);
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

fn with_suffix(filename: &str, suffix: &str) -> String {
    match filename.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{suffix}{}", &filename[..dot], &filename[dot..]),
        _ => format!("{filename}-{suffix}"),
    }
}

/// `filename` if unused, else the first free `name-{index}[-{n}].ext`.
fn unique_name(used: &mut HashSet<String>, filename: String, index: usize) -> String {
    if used.insert(filename.clone()) {
        return filename;
    }
    let mut candidate = with_suffix(&filename, &index.to_string());
    let mut n = 1;
    while !used.insert(candidate.clone()) {
        candidate = with_suffix(&filename, &format!("{index}-{n}"));
        n += 1;
    }
    candidate
}

/// Decode every attachment of `mail`.
///
/// A part whose transfer encoding cannot be decoded is still listed, with
/// `decode_error` set and no content, so siblings and bodies are unaffected.
pub fn extract_attachments(mail: &ParsedMail) -> Vec<Attachment> {
    let mut used = HashSet::new();
    let mut attachments = Vec::new();

    for (index, part) in attachment_parts(mail).into_iter().enumerate() {
        let (content, decode_error) = match part.get_body_raw() {
            Ok(raw) => (Bytes::from(raw), None),
            Err(e) => (Bytes::new(), Some(e.to_string())),
        };
        let content_type = part.ctype.mimetype.to_ascii_lowercase();
        let declared = declared_filename(part);
        let extension = resolve_extension(declared.as_deref(), &content_type);

        let filename = match &declared {
            Some(name) => name.clone(),
            None => fallback_filename(index, &content, extension.as_deref()),
        };
        let filename = unique_name(&mut used, filename, index);

        attachments.push(Attachment {
            index,
            declared_filename: declared,
            filename,
            content_type,
            extension,
            content,
            decode_error,
        });
    }

    attachments
}

/// First non-attachment leaf of the given text type, depth-first.
pub fn find_body<'a, 'b>(part: &'a ParsedMail<'b>, kind: BodyKind) -> Option<&'a ParsedMail<'b>> {
    if part.subparts.is_empty() {
        let matches = part.ctype.mimetype.eq_ignore_ascii_case(kind.mimetype());
        return (matches && !is_disposition_attachment(part)).then_some(part);
    }
    part.subparts.iter().find_map(|sub| find_body(sub, kind))
}

/// Charset-decoded text of each body kind. Line terminators pass through
/// untouched. A body that fails to decode is logged and reported absent.
pub fn extract_body(mail: &ParsedMail) -> Body {
    let mut body = Body::default();
    for kind in BodyKind::ALL {
        let text = match find_body(mail, kind) {
            None => {
                tracing::info!("Message has no {} content", kind.as_str());
                None
            }
            Some(part) => match part.get_body() {
                Ok(text) => {
                    tracing::info!(
                        "Message has {} content with len {}",
                        kind.as_str(),
                        text.chars().count()
                    );
                    Some(text)
                }
                Err(e) => {
                    tracing::warn!("Could not decode {} content: {}", kind.as_str(), e);
                    None
                }
            },
        };
        body.set(kind, text);
    }
    body
}
