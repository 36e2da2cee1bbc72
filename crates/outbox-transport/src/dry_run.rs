use std::{fs, path::PathBuf};

use async_trait::async_trait;
use outbox_core::{Backend, DeliveryResult, Message, OutboxError, TokenProvider, Transport};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::render::{render, RenderOptions};

#[derive(Debug, Serialize)]
struct AttachmentSummary<'a> {
    filename: &'a str,
    content_type: &'a str,
    size: usize,
}

/// Metadata written next to the rendered message.
#[derive(Debug, Serialize)]
struct DryRunRecord<'a> {
    digest: &'a str,
    from: &'a str,
    to: &'a [String],
    cc: &'a [String],
    bcc: &'a [String],
    subject: &'a str,
    has_text: bool,
    has_html: bool,
    attachments: Vec<AttachmentSummary<'a>>,
    size: usize,
}

/// Writes `<digest>.eml` and `<digest>.json` instead of sending. Never touches the network.
#[derive(Debug, Clone)]
pub struct DryRunTransport {
    out_dir: PathBuf,
}

impl DryRunTransport {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &PathBuf {
        &self.out_dir
    }
}

#[async_trait]
impl Transport for DryRunTransport {
    fn backend(&self) -> Backend {
        Backend::DryRun
    }

    #[instrument(skip_all, fields(backend = "dry_run", out_dir = %self.out_dir.display()))]
    async fn deliver(
        &self,
        message: &Message,
        _credentials: Option<&dyn TokenProvider>,
    ) -> Result<DeliveryResult, OutboxError> {
        let rendered = render(message, RenderOptions { include_bcc: true })?;
        let digest = format!("{:x}", Sha256::digest(rendered.as_bytes()));

        let record = DryRunRecord {
            digest: &digest,
            from: &message.from,
            to: &message.to,
            cc: &message.cc,
            bcc: &message.bcc,
            subject: &message.subject,
            has_text: message.text.is_some(),
            has_html: message.html.is_some(),
            attachments: message
                .attachments
                .iter()
                .map(|a| AttachmentSummary {
                    filename: &a.filename,
                    content_type: &a.content_type,
                    size: a.data.len(),
                })
                .collect(),
            size: rendered.len(),
        };
        let mut metadata = serde_json::to_vec_pretty(&record).map_err(OutboxError::storage)?;
        metadata.push(b'\n');

        fs::create_dir_all(&self.out_dir).map_err(OutboxError::storage)?;
        let eml_path = self.out_dir.join(format!("{digest}.eml"));
        fs::write(&eml_path, rendered.as_bytes()).map_err(OutboxError::storage)?;
        fs::write(self.out_dir.join(format!("{digest}.json")), metadata)
            .map_err(OutboxError::storage)?;

        info!(%digest, "dry run written");
        Ok(DeliveryResult {
            backend: Backend::DryRun,
            message_id: Some(digest),
            location: Some(eml_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new("Dry run")
            .sender("me@example.com")
            .to("a@example.com")
            .bcc("b@example.com")
            .text("body")
    }

    #[tokio::test]
    async fn writes_eml_and_metadata_named_by_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = DryRunTransport::new(dir.path().join("out"));

        let result = transport.deliver(&sample(), None).await.expect("deliver");
        let digest = result.message_id.clone().expect("digest");
        assert_eq!(digest.len(), 64);

        let eml = result.location.expect("location");
        assert_eq!(eml, dir.path().join("out").join(format!("{digest}.eml")));
        let rendered = fs::read_to_string(&eml).expect("eml");
        assert!(rendered.contains("Subject: Dry run\r\n"));

        let metadata: serde_json::Value = serde_json::from_slice(
            &fs::read(dir.path().join("out").join(format!("{digest}.json"))).expect("json"),
        )
        .expect("parse");
        assert_eq!(metadata["digest"], digest.as_str());
        assert_eq!(metadata["bcc"][0], "b@example.com");
        assert_eq!(metadata["size"], rendered.len());
    }

    #[tokio::test]
    async fn identical_messages_produce_identical_files() {
        let first_dir = tempfile::tempdir().expect("tempdir");
        let second_dir = tempfile::tempdir().expect("tempdir");

        let first = DryRunTransport::new(first_dir.path())
            .deliver(&sample(), None)
            .await
            .expect("first");
        let second = DryRunTransport::new(second_dir.path())
            .deliver(&sample(), None)
            .await
            .expect("second");

        assert_eq!(first.message_id, second.message_id);
        let read = |result: &DeliveryResult| fs::read(result.location.as_ref().expect("path")).expect("read");
        assert_eq!(read(&first), read(&second));

        let other = DryRunTransport::new(first_dir.path())
            .deliver(&sample().to("extra@example.com"), None)
            .await
            .expect("other");
        assert_ne!(other.message_id, first.message_id);
    }
}
