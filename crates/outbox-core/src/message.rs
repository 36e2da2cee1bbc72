use std::fmt;

/// Provider-agnostic outgoing message.
///
/// The credential layer treats this as an opaque payload; only transports look
/// inside it, and only to render it for their wire format.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }
}

impl Message {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn sender(mut self, address: impl Into<String>) -> Self {
        self.from = address.into();
        self
    }

    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.bcc.push(address.into());
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// All envelope recipients (to, cc and bcc).
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
    }

    pub fn has_recipients(&self) -> bool {
        self.recipients().next().is_some()
    }
}

// Bodies and attachment bytes can be large or sensitive; keep them out of logs.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("cc", &self.cc)
            .field("bcc_count", &self.bcc.len())
            .field("subject", &self.subject)
            .field("attachments", &self.attachments)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_cover_all_address_lists() {
        let msg = Message::new("Hi")
            .sender("me@example.com")
            .to("a@example.com")
            .cc("b@example.com")
            .bcc("c@example.com");

        let all: Vec<&str> = msg.recipients().collect();
        assert_eq!(all, vec!["a@example.com", "b@example.com", "c@example.com"]);
        assert!(msg.has_recipients());
        assert!(!Message::new("empty").has_recipients());
    }

    #[test]
    fn debug_omits_body_and_attachment_bytes() {
        let msg = Message::new("Invoice")
            .text("secret body")
            .attach(Attachment::new("a.txt", "text/plain", b"payload".to_vec()));
        let rendered = format!("{msg:?}");
        assert!(!rendered.contains("secret body"));
        assert!(!rendered.contains("payload"));
        assert!(rendered.contains("size: 7"));
    }
}
