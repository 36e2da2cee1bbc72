//! Deterministic RFC 5322 / MIME rendering.
//!
//! No `Date` or `Message-ID` headers and fixed boundaries, so identical
//! messages render to identical bytes. Providers stamp their own.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use outbox_core::{Message, OutboxError};

const MIXED_BOUNDARY: &str = "=_outbox_mixed";
const ALTERNATIVE_BOUNDARY: &str = "=_outbox_alt";
const LINE_WIDTH: usize = 76;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Keep a `Bcc` header (Gmail API and dry-run); SMTP passes Bcc via the envelope only.
    pub include_bcc: bool,
}

/// Reject values that would let message fields inject headers.
pub fn validate(message: &Message) -> Result<(), OutboxError> {
    let header_values = std::iter::once(("from", message.from.as_str()))
        .chain(std::iter::once(("subject", message.subject.as_str())))
        .chain(message.recipients().map(|r| ("recipient", r)))
        .chain(message.attachments.iter().map(|a| ("attachment name", a.filename.as_str())))
        .chain(
            message
                .attachments
                .iter()
                .map(|a| ("attachment type", a.content_type.as_str())),
        );

    for (field, value) in header_values {
        if value.contains(['\r', '\n']) {
            return Err(OutboxError::InvalidMessage {
                reason: format!("{field} must not contain line breaks"),
            });
        }
    }
    Ok(())
}

pub fn render(message: &Message, options: RenderOptions) -> Result<String, OutboxError> {
    validate(message)?;

    let mut out = String::new();
    header(&mut out, "From", &message.from);
    if !message.to.is_empty() {
        header(&mut out, "To", &message.to.join(", "));
    }
    if !message.cc.is_empty() {
        header(&mut out, "Cc", &message.cc.join(", "));
    }
    if options.include_bcc && !message.bcc.is_empty() {
        header(&mut out, "Bcc", &message.bcc.join(", "));
    }
    header(&mut out, "Subject", &encode_header_value(&message.subject));
    header(&mut out, "MIME-Version", "1.0");

    if message.attachments.is_empty() {
        body_part(&mut out, message);
        return Ok(out);
    }

    header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{MIXED_BOUNDARY}\""),
    );
    out.push_str("\r\n");
    out.push_str(&format!("--{MIXED_BOUNDARY}\r\n"));
    body_part(&mut out, message);
    for attachment in &message.attachments {
        out.push_str(&format!("--{MIXED_BOUNDARY}\r\n"));
        let name = encode_header_value(&attachment.filename).replace('"', "'");
        header(
            &mut out,
            "Content-Type",
            &format!("{}; name=\"{name}\"", attachment.content_type),
        );
        header(
            &mut out,
            "Content-Disposition",
            &format!("attachment; filename=\"{name}\""),
        );
        base64_body(&mut out, &attachment.data);
    }
    out.push_str(&format!("--{MIXED_BOUNDARY}--\r\n"));
    Ok(out)
}

/// Headers and content of the text part(s), starting with `Content-Type`.
fn body_part(out: &mut String, message: &Message) {
    match (&message.text, &message.html) {
        (Some(text), Some(html)) => {
            header(
                out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{ALTERNATIVE_BOUNDARY}\""),
            );
            out.push_str("\r\n");
            out.push_str(&format!("--{ALTERNATIVE_BOUNDARY}\r\n"));
            text_part(out, "text/plain", text);
            out.push_str(&format!("--{ALTERNATIVE_BOUNDARY}\r\n"));
            text_part(out, "text/html", html);
            out.push_str(&format!("--{ALTERNATIVE_BOUNDARY}--\r\n"));
        }
        (None, Some(html)) => text_part(out, "text/html", html),
        (Some(text), None) => text_part(out, "text/plain", text),
        (None, None) => text_part(out, "text/plain", ""),
    }
}

fn text_part(out: &mut String, mime: &str, body: &str) {
    header(out, "Content-Type", &format!("{mime}; charset=utf-8"));
    base64_body(out, body.as_bytes());
}

fn base64_body(out: &mut String, data: &[u8]) {
    header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");
    let encoded = STANDARD.encode(data);
    // Base64 output is ASCII, so byte chunks are valid UTF-8.
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }
}

fn header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

/// RFC 2047 encoded-word for non-ASCII header values.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}
