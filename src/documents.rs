use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{IntakeError, Result};

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or("").trim();
        if mime.eq_ignore_ascii_case(PDF_MIME) {
            Some(DocumentKind::Pdf)
        } else if mime.eq_ignore_ascii_case(DOCX_MIME) {
            Some(DocumentKind::Docx)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
        }
    }
}

/// Turns binary documents into plain text.
pub trait DocumentReader {
    fn extract_text(&self, bytes: &[u8], kind: DocumentKind) -> Result<String>;
}

/// Shells out to external converters (`pdftotext`, `pandoc`).
#[derive(Debug, Clone)]
pub struct CommandDocumentReader {
    pdf_command: String,
    docx_command: String,
}

impl CommandDocumentReader {
    pub fn new(pdf_command: impl Into<String>, docx_command: impl Into<String>) -> Self {
        Self {
            pdf_command: pdf_command.into(),
            docx_command: docx_command.into(),
        }
    }

    /// Configured converters that cannot be found, in pdf/docx order.
    pub fn missing_commands(&self) -> Vec<&str> {
        [self.pdf_command.as_str(), self.docx_command.as_str()]
            .into_iter()
            .filter(|command| !command_exists(command))
            .collect()
    }

    fn command_for(&self, kind: DocumentKind, input: &str) -> Command {
        match kind {
            DocumentKind::Pdf => {
                let mut cmd = Command::new(&self.pdf_command);
                cmd.args(["-layout", input, "-"]);
                cmd
            }
            DocumentKind::Docx => {
                let mut cmd = Command::new(&self.docx_command);
                cmd.args(["--from", "docx", "--to", "plain", "--wrap", "none", input]);
                cmd
            }
        }
    }
}

fn command_exists(command: &str) -> bool {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        return Path::new(command).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

impl DocumentReader for CommandDocumentReader {
    fn extract_text(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        let fail = |reason: String| IntakeError::Document {
            name: format!("<{}>", kind.extension()),
            reason,
        };

        // The converters want a real file with the right extension.
        let mut input = tempfile::Builder::new()
            .prefix("intake-doc-")
            .suffix(&format!(".{}", kind.extension()))
            .tempfile()
            .map_err(|e| fail(e.to_string()))?;
        input.write_all(bytes).map_err(|e| fail(e.to_string()))?;
        input.flush().map_err(|e| fail(e.to_string()))?;

        let path = input.path().to_string_lossy().to_string();
        let output = self
            .command_for(kind, &path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| fail(format!("failed to run converter: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!("converter exited with {}: {}", output.status, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
