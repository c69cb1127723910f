//! XML record files: the merged full history and the per-run snapshot.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Applicants>
//!   <Applicant>
//!     <Name>Ana Ruiz</Name>
//!     <Email>ana@example.com</Email>
//!     ...
//!   </Applicant>
//! </Applicants>
//! ```
//!
//! Older history files spell the name element `n`; reads accept both and merges keep
//! whichever spelling the file already uses.

use std::io::Write;
use std::path::{Path, PathBuf};

use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::error::{IntakeError, Result};
use crate::models::{ApplicantRecord, Field, UNKNOWN};

const ROOT_TAG: &str = "Applicants";
const ENTRY_TAG: &str = "Applicant";
const LEGACY_NAME_TAG: &str = "n";

/// Element order inside `<Applicant>`.
const XML_ORDER: [Field; 21] = [
    Field::Name,
    Field::Email,
    Field::Phone,
    Field::Location,
    Field::Country,
    Field::PositionCategory,
    Field::University,
    Field::Degree,
    Field::GraduationYear,
    Field::YearsExperience,
    Field::JobIntention,
    Field::VisaStatus,
    Field::Eligibility,
    Field::Subject,
    Field::DateSent,
    Field::NotableCompanies,
    Field::TopSkills,
    Field::Summary,
    Field::FolderPath,
    Field::HasResume,
    Field::DesiredJobRole,
];

/// How a file spells the name element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameTag {
    #[default]
    Current,
    Legacy,
}

impl NameTag {
    fn as_str(&self) -> &'static str {
        match self {
            NameTag::Current => Field::Name.xml_tag(),
            NameTag::Legacy => LEGACY_NAME_TAG,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordCollection {
    pub records: Vec<ApplicantRecord>,
    pub name_tag: NameTag,
}

impl RecordCollection {
    pub fn contains_key(&self, record: &ApplicantRecord) -> bool {
        self.records.iter().any(|r| r.key() == record.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    /// Same (email, name) already stored.
    Duplicate,
    /// Name, email and phone all unknown; never stored.
    Unidentified,
}

/// The full-history file, merged one record at a time.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty collection; an unreadable one is [`IntakeError::StoreCorrupt`].
    pub fn load(&self) -> Result<RecordCollection> {
        match self.read_existing()? {
            Some(xml) => parse_collection(&xml, &self.path),
            None => Ok(RecordCollection::default()),
        }
    }

    fn read_existing(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let xml = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                IntakeError::corrupt(&self.path, "file is not valid UTF-8")
            } else {
                IntakeError::io(&self.path, e)
            }
        })?;
        Ok(Some(xml))
    }

    /// Append `record` unless its (email, name) is already stored. Entries already on
    /// disk are kept byte for byte; only the new `<Applicant>` is serialized.
    pub fn merge(&self, record: &ApplicantRecord) -> Result<MergeOutcome> {
        if record.is_unidentified() {
            return Ok(MergeOutcome::Unidentified);
        }
        let Some(existing) = self.read_existing()? else {
            let xml = render_collection(std::slice::from_ref(record), NameTag::Current, &self.path)?;
            write_atomic(&self.path, &xml)?;
            return Ok(MergeOutcome::Added);
        };

        let collection = parse_collection(&existing, &self.path)?;
        if collection.contains_key(record) {
            debug!(name = %record.name, email = %record.email, "already in history");
            return Ok(MergeOutcome::Duplicate);
        }
        let entry = render_entry(record, collection.name_tag, &self.path)?;
        let xml = append_entry(&existing, &entry, &self.path)?;
        write_atomic(&self.path, xml.as_bytes())?;
        Ok(MergeOutcome::Added)
    }
}

/// Regenerate `dest` from `records`, dropping unidentified ones. Returns how many were written.
pub fn rewrite(records: &[ApplicantRecord], dest: &Path) -> Result<usize> {
    let kept: Vec<ApplicantRecord> = records
        .iter()
        .filter(|r| !r.is_unidentified())
        .cloned()
        .collect();
    let xml = render_collection(&kept, NameTag::Current, dest)?;
    write_atomic(dest, &xml)?;
    Ok(kept.len())
}

/// In-progress `<Applicant>` while reading.
#[derive(Default)]
struct PendingEntry {
    record: ApplicantRecord,
    legacy_name: Option<String>,
    current_name: Option<String>,
}

impl PendingEntry {
    fn apply(&mut self, tag: &str, text: String) {
        if tag == LEGACY_NAME_TAG {
            self.legacy_name = Some(text);
        } else if tag == Field::Name.xml_tag() {
            self.current_name = Some(text);
        } else if let Some(field) = Field::from_xml_tag(tag) {
            let value = if field == Field::Summary {
                // Stored escaped one extra time.
                unescape(&text).map(|s| s.into_owned()).unwrap_or(text)
            } else {
                text
            };
            self.record.set(field, value);
        }
    }

    fn finish(self) -> ApplicantRecord {
        let mut record = self.record;
        record.name = self
            .legacy_name
            .or(self.current_name)
            .unwrap_or_else(|| UNKNOWN.to_string());
        record
    }
}

pub fn parse_collection(xml: &str, path: &Path) -> Result<RecordCollection> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let corrupt = |reason: String| IntakeError::corrupt(path, reason);

    let mut collection = RecordCollection::default();
    let mut depth = 0usize;
    let mut root_seen = false;
    let mut entry: Option<PendingEntry> = None;
    let mut field: Option<(String, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| corrupt(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) if depth == 0 => {
                check_root(&e, root_seen).map_err(corrupt)?;
                root_seen = true;
                depth = 1;
            }
            Event::Empty(e) if depth == 0 => {
                check_root(&e, root_seen).map_err(corrupt)?;
                root_seen = true;
            }
            Event::Start(e) => {
                let tag = tag_name(&e);
                match depth {
                    1 if tag == ENTRY_TAG => entry = Some(PendingEntry::default()),
                    2 if entry.is_some() => field = Some((tag, String::new())),
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let tag = tag_name(&e);
                match depth {
                    1 if tag == ENTRY_TAG => {
                        collection.records.push(PendingEntry::default().finish());
                    }
                    2 => {
                        if let Some(pending) = entry.as_mut() {
                            if tag == LEGACY_NAME_TAG {
                                collection.name_tag = NameTag::Legacy;
                            }
                            pending.apply(&tag, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = field.as_mut() {
                    let value = t.unescape().map_err(|e| corrupt(e.to_string()))?;
                    text.push_str(&value);
                }
            }
            Event::CData(c) => {
                if let Some((_, text)) = field.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return Err(corrupt("unbalanced closing tag".to_string()));
                }
                depth -= 1;
                match depth {
                    2 => {
                        if let (Some((tag, text)), Some(pending)) = (field.take(), entry.as_mut()) {
                            if tag == LEGACY_NAME_TAG {
                                collection.name_tag = NameTag::Legacy;
                            }
                            pending.apply(&tag, text);
                        }
                    }
                    1 => {
                        if let Some(pending) = entry.take() {
                            collection.records.push(pending.finish());
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(corrupt(format!("missing <{}> root element", ROOT_TAG)));
    }
    if depth != 0 {
        return Err(corrupt("document ends inside an element".to_string()));
    }
    Ok(collection)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn check_root(e: &BytesStart, root_seen: bool) -> std::result::Result<(), String> {
    let tag = tag_name(e);
    if tag != ROOT_TAG || root_seen {
        return Err(format!("unexpected root element <{}>", tag));
    }
    Ok(())
}

fn write_failed(path: &Path, e: impl std::fmt::Display) -> IntakeError {
    IntakeError::io(path, std::io::Error::other(e.to_string()))
}

pub fn render_collection(
    records: &[ApplicantRecord],
    name_tag: NameTag,
    path: &Path,
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| write_failed(path, e))?;
    writer
        .write_event(Event::Start(BytesStart::new(ROOT_TAG)))
        .map_err(|e| write_failed(path, e))?;
    for record in records {
        write_entry(&mut writer, record, name_tag, path)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(ROOT_TAG)))
        .map_err(|e| write_failed(path, e))?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_entry(
    writer: &mut Writer<Vec<u8>>,
    record: &ApplicantRecord,
    name_tag: NameTag,
    path: &Path,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(ENTRY_TAG)))
        .map_err(|e| write_failed(path, e))?;
    for field in XML_ORDER {
        let tag = match field {
            Field::Name => name_tag.as_str(),
            other => other.xml_tag(),
        };
        let value = record.get(field);
        let value = match field {
            Field::Summary => escape(&value).into_owned(),
            _ => value,
        };
        writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .map_err(|e| write_failed(path, e))?;
        writer
            .write_event(Event::Text(BytesText::new(&value)))
            .map_err(|e| write_failed(path, e))?;
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(|e| write_failed(path, e))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(ENTRY_TAG)))
        .map_err(|e| write_failed(path, e))?;
    Ok(())
}

/// One `<Applicant>` element, indented as a child of the root.
fn render_entry(record: &ApplicantRecord, name_tag: NameTag, path: &Path) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Start(BytesStart::new(ROOT_TAG)))
        .map_err(|e| write_failed(path, e))?;
    let start = writer.get_ref().len();
    write_entry(&mut writer, record, name_tag, path)?;
    let bytes = writer.into_inner();
    String::from_utf8(bytes[start..].to_vec()).map_err(|e| write_failed(path, e))
}

/// Insert `entry` just before the root's closing tag, leaving the rest of `xml` untouched.
fn append_entry(xml: &str, entry: &str, path: &Path) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| IntakeError::corrupt(path, e.to_string()))?;
        let after = reader.buffer_position() as usize;
        match event {
            Event::Start(_) => depth += 1,
            Event::Empty(_) if depth == 0 => {
                let mut out = String::with_capacity(xml.len() + entry.len() + 32);
                out.push_str(&xml[..before]);
                out.push_str(&format!("<{}>", ROOT_TAG));
                out.push_str(entry);
                out.push_str(&format!("\n</{}>", ROOT_TAG));
                out.push_str(&xml[after..]);
                return Ok(out);
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let head = xml[..before].trim_end();
                    let mut out = String::with_capacity(xml.len() + entry.len() + 2);
                    out.push_str(head);
                    out.push_str(entry);
                    out.push('\n');
                    out.push_str(&xml[before..]);
                    return Ok(out);
                }
            }
            Event::Eof => {
                return Err(IntakeError::corrupt(path, format!("no closing </{}>", ROOT_TAG)));
            }
            _ => {}
        }
    }
}

/// Write through a sibling temp file and rename, so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| IntakeError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| IntakeError::io(&dir, e))?;
    tmp.write_all(bytes).map_err(|e| IntakeError::io(path, e))?;
    tmp.flush().map_err(|e| IntakeError::io(path, e))?;
    tmp.persist(path).map_err(|e| IntakeError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Eligibility;

    fn applicant(name: &str, email: &str) -> ApplicantRecord {
        ApplicantRecord {
            name: name.to_string(),
            email: email.to_string(),
            country: "USA".to_string(),
            top_skills: vec!["Verilog".to_string(), "UVM".to_string()],
            eligibility: Eligibility::Yes,
            summary: "Strong RTL <b>designer</b> & verifier".to_string(),
            has_resume: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_deduplicates_on_email_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("applicant_bank.xml"));

        let jane = applicant("Jane Doe", "a@x.com");
        let mut again = jane.clone();
        again.subject = "Second email".to_string();

        assert_eq!(store.merge(&jane).unwrap(), MergeOutcome::Added);
        assert_eq!(store.merge(&again).unwrap(), MergeOutcome::Duplicate);

        let collection = store.load().unwrap();
        assert_eq!(collection.records.len(), 1);
        assert_eq!(collection.records[0].name, "Jane Doe");
    }

    #[test]
    fn test_same_email_different_name_is_new() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("bank.xml"));
        store.merge(&applicant("Jane Doe", "a@x.com")).unwrap();
        assert_eq!(
            store.merge(&applicant("John Doe", "a@x.com")).unwrap(),
            MergeOutcome::Added
        );
        assert_eq!(store.load().unwrap().records.len(), 2);
    }

    #[test]
    fn test_unidentified_never_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xml");
        let store = RecordStore::new(&path);
        let ghost = ApplicantRecord {
            country: "USA".to_string(),
            summary: "populated".to_string(),
            ..Default::default()
        };
        assert_eq!(store.merge(&ghost).unwrap(), MergeOutcome::Unidentified);
        assert!(!path.exists());

        let snapshot = dir.path().join("applicants.xml");
        let written = rewrite(&[ghost, applicant("Jane Doe", "a@x.com")], &snapshot).unwrap();
        assert_eq!(written, 1);
        let xml = std::fs::read_to_string(&snapshot).unwrap();
        assert!(!xml.contains("populated"));
    }

    #[test]
    fn test_summary_escaped_once_more_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("bank.xml"));
        let jane = applicant("Jane Doe", "a@x.com");
        store.merge(&jane).unwrap();

        let xml = std::fs::read_to_string(store.path()).unwrap();
        assert!(xml.contains("&amp;lt;b&amp;gt;"));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));

        let loaded = store.load().unwrap();
        assert_eq!(loaded.records[0].summary, jane.summary);
        assert_eq!(loaded.records[0].top_skills, jane.top_skills);
        assert!(loaded.records[0].has_resume);
    }

    #[test]
    fn test_legacy_name_tag_read_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xml");
        std::fs::write(
            &path,
            "<?xml version='1.0' encoding='utf-8'?>\n<Applicants><Applicant><n>Old Timer</n>\
             <Email>old@x.com</Email><Phone>--</Phone></Applicant></Applicants>",
        )
        .unwrap();

        let store = RecordStore::new(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.name_tag, NameTag::Legacy);
        assert_eq!(loaded.records[0].name, "Old Timer");
        assert_eq!(loaded.records[0].location, UNKNOWN);

        store.merge(&applicant("Jane Doe", "a@x.com")).unwrap();
        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.contains("<n>Jane Doe</n>"));
        assert!(!xml.contains("<Name>"));
    }

    #[test]
    fn test_merge_keeps_existing_entries_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xml");
        let existing_entry = "<Applicant>\n    <Name>Old Timer</Name>\n    <Email>old@x.com</Email>\n    \
            <Able>No, they want an internship</Able>\n    <NotableCompanies>--</NotableCompanies>\n    \
            <Resume>--</Resume>\n    <Notes>  keep   me  </Notes>\n  </Applicant>";
        std::fs::write(
            &path,
            format!("<?xml version='1.0' encoding='utf-8'?>\n<Applicants>\n  {}\n</Applicants>\n", existing_entry),
        )
        .unwrap();

        let store = RecordStore::new(&path);
        assert_eq!(store.merge(&applicant("Jane Doe", "a@x.com")).unwrap(), MergeOutcome::Added);

        let xml = std::fs::read_to_string(&path).unwrap();
        assert!(xml.starts_with(&format!("<?xml version='1.0' encoding='utf-8'?>\n<Applicants>\n  {}", existing_entry)));
        assert!(xml.trim_end().ends_with("</Applicants>"));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].name, "Jane Doe");
        assert_eq!(loaded.records[1].summary, "Strong RTL <b>designer</b> & verifier");
    }

    #[test]
    fn test_merge_into_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xml");
        std::fs::write(&path, "<Applicants/>").unwrap();

        let store = RecordStore::new(&path);
        store.merge(&applicant("Jane Doe", "a@x.com")).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].email, "a@x.com");
    }

    #[test]
    fn test_legacy_tag_wins_over_current() {
        let xml = "<Applicants><Applicant><Name>New</Name><n>Legacy</n></Applicant></Applicants>";
        let collection = parse_collection(xml, Path::new("x.xml")).unwrap();
        assert_eq!(collection.records[0].name, "Legacy");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("nope.xml"));
        let collection = store.load().unwrap();
        assert!(collection.records.is_empty());
        assert_eq!(collection.name_tag, NameTag::Current);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.xml");
        std::fs::write(&path, "<Applicants><Applicant><Name>Jane</Applicant>").unwrap();

        let store = RecordStore::new(&path);
        let err = store.merge(&applicant("Jane Doe", "a@x.com")).unwrap_err();
        assert!(matches!(err, IntakeError::StoreCorrupt { .. }));
        assert!(err.is_fatal());
        // The corrupt file is left untouched for the operator.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "<Applicants><Applicant><Name>Jane</Applicant>"
        );

        std::fs::write(&path, "").unwrap();
        assert!(matches!(store.load(), Err(IntakeError::StoreCorrupt { .. })));
    }

    #[test]
    fn test_rewrite_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("applicants.xml");
        rewrite(&[applicant("Jane Doe", "a@x.com"), applicant("John", "j@x.com")], &snapshot).unwrap();
        rewrite(&[applicant("Ana Ruiz", "ana@x.com")], &snapshot).unwrap();

        let collection = parse_collection(&std::fs::read_to_string(&snapshot).unwrap(), &snapshot).unwrap();
        assert_eq!(collection.records.len(), 1);
        assert_eq!(collection.records[0].name, "Ana Ruiz");
    }
}
