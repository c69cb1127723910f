use std::collections::BTreeSet;

use crate::models::{is_unknown, ApplicantRecord, UNKNOWN};

/// Characters the document store and common filesystems refuse in file names.
const FILE_NAME_ILLEGAL: [char; 16] = [
    ':', '\\', '/', '*', '?', '"', '<', '>', '|', '#', '{', '}', '%', '~', '&', '\'',
];

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if FILE_NAME_ILLEGAL.contains(&c) { '-' } else { c })
        .collect()
}

/// Like [`sanitize_file_name`] but apostrophes are allowed in folder names.
pub fn sanitize_folder_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c != '\'' && FILE_NAME_ILLEGAL.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .collect()
}

pub fn country_bucket(country: &str) -> &'static str {
    let lower = country.to_lowercase();
    if lower.contains("usa") {
        "USA"
    } else if lower.contains("mexico") {
        "Mexico"
    } else {
        "OtherOrUnknown"
    }
}

/// Ordered phrase triggers; the first one found in the category wins.
const CATEGORY_TRIGGERS: [(&str, &str); 7] = [
    ("logic design", "Design/LogicDesign"),
    ("physical design", "Design/PhysicalDesign"),
    ("formal verification", "Verification/Formal"),
    ("design verification", "Verification/DesignVerification"),
    ("architecture", "Architecture"),
    ("human resources", "Operations/HR"),
    ("internship", "Internships"),
];

pub fn category_bucket(position_category: &str) -> &'static str {
    let lower = position_category.to_lowercase();
    CATEGORY_TRIGGERS
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(_, bucket)| *bucket)
        .unwrap_or("Other")
}

pub fn leaf_name(name: &str, date_sent: &str) -> String {
    let name = name.replace(['/', '\\'], "-");
    if !is_unknown(&name) && !is_unknown(date_sent) {
        format!("{}: {}", name, date_sent)
    } else if is_unknown(&name) {
        format!("Unknown: {}", UNKNOWN)
    } else {
        format!("{}: {}", name, UNKNOWN)
    }
}

/// `root/country/category/leaf`, a pure function of country, category, name and date.
pub fn folder_path(root: &str, record: &ApplicantRecord) -> String {
    [
        root,
        country_bucket(&record.country),
        category_bucket(&record.position_category),
        &leaf_name(&record.name, &record.date_sent),
    ]
    .join("/")
}

/// Folders touched since the last fully successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifiedFolders {
    folders: BTreeSet<String>,
}

impl ModifiedFolders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, path: impl Into<String>) {
        self.folders.insert(path.into());
    }

    #[cfg(test)]
    pub fn contains(&self, path: &str) -> bool {
        self.folders.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.folders.iter()
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn clear(&mut self) {
        self.folders.clear();
    }

    #[cfg(test)]
    pub fn is_superset(&self, other: &ModifiedFolders) -> bool {
        self.folders.is_superset(&other.folders)
    }
}

impl FromIterator<String> for ModifiedFolders {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            folders: iter.into_iter().collect(),
        }
    }
}

impl Extend<String> for ModifiedFolders {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.folders.extend(iter);
    }
}

/// Computes record folders and registers each one as touched.
#[derive(Debug, Clone)]
pub struct PathDeriver {
    root: String,
}

impl PathDeriver {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn derive_path(&self, record: &ApplicantRecord, modified: &mut ModifiedFolders) -> String {
        let path = folder_path(&self.root, record);
        modified.touch(path.clone());
        path
    }
}
