use std::path::PathBuf;

use tracing::debug;

use crate::attachments::Attachment;
use crate::error::{IntakeError, Result};
use crate::models::{ApplicantRecord, Field};
use crate::paths::{sanitize_file_name, ModifiedFolders};

pub const EMAIL_FILE: &str = "email_text.txt";
pub const SUMMARY_FILE: &str = "summary.txt";
const WRAP_WIDTH: usize = 90;

/// Owns the on-disk applicant tree below `base`.
#[derive(Debug, Clone)]
pub struct FolderMaterializer {
    base: PathBuf,
}

impl FolderMaterializer {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Create the record's folder, drop the attachments in it and regenerate the
    /// two text documents. Registers the folder as modified on success.
    pub fn materialize(
        &self,
        record: &ApplicantRecord,
        email_text: &str,
        attachments: &[Attachment],
        modified: &mut ModifiedFolders,
    ) -> Result<PathBuf> {
        let dir = self.base.join(&record.folder_path);
        std::fs::create_dir_all(&dir).map_err(|e| IntakeError::io(&dir, e))?;

        for attachment in attachments {
            let path = dir.join(sanitize_file_name(&attachment.name));
            std::fs::write(&path, &attachment.bytes).map_err(|e| IntakeError::io(&path, e))?;
            debug!(file = %path.display(), bytes = attachment.bytes.len(), "saved attachment");
        }

        let email_path = dir.join(EMAIL_FILE);
        std::fs::write(&email_path, render_email(email_text))
            .map_err(|e| IntakeError::io(&email_path, e))?;

        let summary_path = dir.join(SUMMARY_FILE);
        std::fs::write(&summary_path, render_summary(record))
            .map_err(|e| IntakeError::io(&summary_path, e))?;

        modified.touch(record.folder_path.clone());
        Ok(dir)
    }
}

fn render_email(email_text: &str) -> String {
    let mut out = textwrap::fill(email_text.trim_end(), WRAP_WIDTH);
    out.push('\n');
    out
}

fn render_summary(record: &ApplicantRecord) -> String {
    let mut out = String::from("Summary:\n");
    out.push_str(&textwrap::fill(&record.summary, WRAP_WIDTH));
    out.push_str("\n\n");
    for field in Field::ALL {
        if matches!(field, Field::Summary | Field::FolderPath) {
            continue;
        }
        let line = format!("{}: {}", field.label(), record.get(field));
        out.push_str(&textwrap::fill(&line, WRAP_WIDTH));
        out.push('\n');
    }
    out
}
