use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::documents::{DocumentKind, DocumentReader};
use crate::mail::{MailBackend, RawThread};
use crate::models::UNKNOWN;

static DRIVE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://drive\.google\.com/file/d/([\w-]+)/view\?usp=sharing")
        .expect("drive link pattern is valid")
});

static CONTENT_DISPOSITION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("filename pattern is valid")
});

/// A binary document belonging to a thread, under its original name.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Everything the documents of one thread yielded.
#[derive(Debug, Clone, Default)]
pub struct CollectedDocuments {
    pub attachments: Vec<Attachment>,
    /// Concatenated document text, or the unknown marker when nothing was readable.
    pub resume_text: String,
}

impl CollectedDocuments {
    pub fn has_resume(&self) -> bool {
        !self.resume_text.is_empty() && self.resume_text != UNKNOWN
    }
}

/// A document fetched from a share link found in the email text.
#[derive(Debug, Clone)]
pub struct LinkedDocument {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait LinkedDocumentFetcher {
    fn fetch(&self, url: &str) -> Result<LinkedDocument>;
}

/// Share links to Drive files, in order of appearance, without repeats.
pub fn find_drive_links(text: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in DRIVE_LINK.find_iter(text) {
        if !links.iter().any(|l| l == m.as_str()) {
            links.push(m.as_str().to_string());
        }
    }
    links
}

/// Downloads publicly shared Drive files through the direct-download endpoint.
pub struct DriveLinkFetcher {
    client: reqwest::blocking::Client,
}

impl DriveLinkFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for DriveLinkFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkedDocumentFetcher for DriveLinkFetcher {
    fn fetch(&self, url: &str) -> Result<LinkedDocument> {
        let file_id = DRIVE_LINK
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| anyhow!("Not a Drive share link: {}", url))?;

        let download_url = format!(
            "https://drive.google.com/uc?export=download&id={}",
            file_id
        );
        let response = self
            .client
            .get(&download_url)
            .send()
            .with_context(|| format!("Failed to download {}", url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Drive download of {} failed with status {}",
                file_id,
                response.status()
            ));
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE).unwrap_or_default();
        let disposition = header(reqwest::header::CONTENT_DISPOSITION);

        let mut name = disposition
            .as_deref()
            .and_then(|d| CONTENT_DISPOSITION_NAME.captures(d))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| file_id.clone());
        if !name.contains('.') {
            if let Some(kind) = DocumentKind::from_mime(&content_type) {
                name = format!("{}.{}", name, kind.extension());
            }
        }

        let bytes = response
            .bytes()
            .context("Failed to read Drive download body")?
            .to_vec();
        Ok(LinkedDocument {
            name,
            content_type,
            bytes,
        })
    }
}

/// Gathers the resume documents of a thread and reads their text.
pub struct AttachmentCollector<'a> {
    mail: &'a dyn MailBackend,
    reader: &'a dyn DocumentReader,
    links: Option<&'a dyn LinkedDocumentFetcher>,
}

impl<'a> AttachmentCollector<'a> {
    pub fn new(
        mail: &'a dyn MailBackend,
        reader: &'a dyn DocumentReader,
        links: Option<&'a dyn LinkedDocumentFetcher>,
    ) -> Self {
        Self {
            mail,
            reader,
            links,
        }
    }

    /// Unreadable documents are logged and skipped; they never fail the thread.
    pub fn collect(&self, thread: &RawThread, email_text: &str) -> CollectedDocuments {
        let mut attachments = Vec::new();
        let mut resume_text = String::new();

        for message in &thread.messages {
            for att in &message.attachments {
                let Some(kind) = DocumentKind::from_mime(&att.content_type) else {
                    debug!(thread = %thread.subject, content_type = %att.content_type, "skipping attachment");
                    continue;
                };
                let name = att.name.clone().filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
                    format!("attachment_{}.{}", attachments.len() + 1, kind.extension())
                });

                let bytes = match self.mail.fetch_attachment(&thread.id, &message.id, &att.id) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(thread = %thread.subject, file = %name, error = %e, "could not download attachment");
                        continue;
                    }
                };
                self.read_into(&mut resume_text, &bytes, kind, &name, &thread.subject);
                attachments.push(Attachment { name, bytes });
            }
        }

        if let Some(fetcher) = self.links {
            for link in find_drive_links(email_text) {
                match fetcher.fetch(&link) {
                    Ok(doc) => {
                        match DocumentKind::from_mime(&doc.content_type) {
                            Some(kind) => {
                                self.read_into(&mut resume_text, &doc.bytes, kind, &doc.name, &thread.subject)
                            }
                            None => warn!(
                                thread = %thread.subject,
                                file = %doc.name,
                                content_type = %doc.content_type,
                                "linked document has an unsupported type"
                            ),
                        }
                        debug!(thread = %thread.subject, file = %doc.name, "fetched linked document");
                        attachments.push(Attachment {
                            name: doc.name,
                            bytes: doc.bytes,
                        });
                    }
                    Err(e) => {
                        warn!(thread = %thread.subject, link = %link, error = %e, "could not fetch linked document")
                    }
                }
            }
        }

        if resume_text.trim().is_empty() {
            resume_text = UNKNOWN.to_string();
        }
        CollectedDocuments {
            attachments,
            resume_text,
        }
    }

    fn read_into(&self, text: &mut String, bytes: &[u8], kind: DocumentKind, name: &str, subject: &str) {
        match self.reader.extract_text(bytes, kind) {
            Ok(extracted) => {
                text.push_str(&extracted);
                text.push('\n');
            }
            Err(e) => warn!(thread = %subject, file = %name, error = %e, "could not read document"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DOCX_MIME, PDF_MIME};
    use crate::error::IntakeError;
    use crate::mail::{AttachmentRef, Message, ThreadSummary};

    struct FakeMail;

    impl MailBackend for FakeMail {
        fn list_threads(&self, _top_n: usize) -> Result<Vec<ThreadSummary>> {
            Ok(vec![])
        }
        fn list_messages(&self, _thread_id: &str) -> Result<Vec<Message>> {
            Ok(vec![])
        }
        fn fetch_attachment(&self, _t: &str, _m: &str, attachment_id: &str) -> Result<Vec<u8>> {
            if attachment_id == "missing" {
                return Err(anyhow!("404"));
            }
            Ok(attachment_id.as_bytes().to_vec())
        }
    }

    /// Returns the bytes as text; "bad" bytes fail.
    struct EchoReader;

    impl DocumentReader for EchoReader {
        fn extract_text(&self, bytes: &[u8], kind: DocumentKind) -> crate::error::Result<String> {
            if bytes == b"bad" {
                return Err(IntakeError::Document {
                    name: kind.extension().to_string(),
                    reason: "corrupt".to_string(),
                });
            }
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    struct FakeLinks;

    impl LinkedDocumentFetcher for FakeLinks {
        fn fetch(&self, url: &str) -> Result<LinkedDocument> {
            Ok(LinkedDocument {
                name: "drive-cv.pdf".to_string(),
                content_type: PDF_MIME.to_string(),
                bytes: format!("from {}", url).into_bytes(),
            })
        }
    }

    fn thread(attachments: Vec<AttachmentRef>) -> RawThread {
        let summary = ThreadSummary {
            id: "t1".to_string(),
            topic: "Application".to_string(),
            created: None,
        };
        let message = Message {
            id: "m1".to_string(),
            body_html: String::new(),
            created: None,
            attachments,
        };
        RawThread::new(&summary, vec![message])
    }

    fn att(id: &str, name: Option<&str>, content_type: &str) -> AttachmentRef {
        AttachmentRef {
            id: id.to_string(),
            name: name.map(str::to_string),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_find_drive_links() {
        let text = "CV: https://drive.google.com/file/d/abc_123-X/view?usp=sharing and again \
                    https://drive.google.com/file/d/abc_123-X/view?usp=sharing, \
                    https://drive.google.com/file/d/other/edit";
        assert_eq!(
            find_drive_links(text),
            vec!["https://drive.google.com/file/d/abc_123-X/view?usp=sharing"]
        );
    }

    #[test]
    fn test_collect_only_documents() {
        let thread = thread(vec![
            att("resume text", Some("cv.pdf"), PDF_MIME),
            att("logo", Some("logo.png"), "image/png"),
            att("letter", None, DOCX_MIME),
        ]);
        let collector = AttachmentCollector::new(&FakeMail, &EchoReader, None);
        let docs = collector.collect(&thread, "");

        let names: Vec<&str> = docs.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["cv.pdf", "attachment_2.docx"]);
        assert_eq!(docs.resume_text, "resume text\nletter\n");
        assert!(docs.has_resume());
    }

    #[test]
    fn test_unreadable_document_keeps_attachment() {
        let thread = thread(vec![att("bad", Some("broken.pdf"), PDF_MIME), att("missing", Some("gone.pdf"), PDF_MIME)]);
        let collector = AttachmentCollector::new(&FakeMail, &EchoReader, None);
        let docs = collector.collect(&thread, "");

        assert_eq!(docs.attachments.len(), 1);
        assert_eq!(docs.attachments[0].name, "broken.pdf");
        assert_eq!(docs.resume_text, UNKNOWN);
        assert!(!docs.has_resume());
    }

    #[test]
    fn test_linked_documents_added() {
        let thread = thread(vec![]);
        let collector = AttachmentCollector::new(&FakeMail, &EchoReader, Some(&FakeLinks));
        let docs = collector.collect(
            &thread,
            "see https://drive.google.com/file/d/xyz/view?usp=sharing",
        );
        assert_eq!(docs.attachments.len(), 1);
        assert_eq!(docs.attachments[0].name, "drive-cv.pdf");
        assert!(docs.resume_text.starts_with("from https://drive.google.com/file/d/xyz"));
    }

    #[test]
    fn test_content_disposition_name() {
        let caps = CONTENT_DISPOSITION_NAME
            .captures(r#"attachment; filename="Jane Doe CV.pdf"; filename*=UTF-8''Jane%20Doe%20CV.pdf"#)
            .unwrap();
        assert_eq!(&caps[1], "Jane Doe CV.pdf");
    }
}
