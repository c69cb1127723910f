use serde::{Deserialize, Serialize};

/// Placeholder for a field whose value is not known. Distinct from "".
pub const UNKNOWN: &str = "--";

pub fn is_unknown(value: &str) -> bool {
    value == UNKNOWN
}

/// Yes/no/unknown answer to "can we consider this applicant" (location + intent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Eligibility {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Eligibility {
    pub fn parse(value: &str) -> Self {
        let lower = value.trim().to_lowercase();
        if lower.starts_with("yes") {
            Eligibility::Yes
        } else if lower.starts_with("no") {
            Eligibility::No
        } else {
            Eligibility::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Eligibility::Yes => "Yes",
            Eligibility::No => "No",
            Eligibility::Unknown => UNKNOWN,
        }
    }
}

/// Every persisted attribute of an applicant, in canonical (tabular) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Email,
    Phone,
    Location,
    Country,
    PositionCategory,
    University,
    Degree,
    GraduationYear,
    YearsExperience,
    NotableCompanies,
    TopSkills,
    JobIntention,
    VisaStatus,
    Eligibility,
    Summary,
    Subject,
    DateSent,
    FolderPath,
    HasResume,
    DesiredJobRole,
}

impl Field {
    pub const ALL: [Field; 21] = [
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
        Field::NotableCompanies,
        Field::TopSkills,
        Field::JobIntention,
        Field::VisaStatus,
        Field::Eligibility,
        Field::Summary,
        Field::Subject,
        Field::DateSent,
        Field::FolderPath,
        Field::HasResume,
        Field::DesiredJobRole,
    ];

    /// Human-readable column / document label.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Email => "Email",
            Field::Phone => "Phone",
            Field::Location => "Location",
            Field::Country => "Country",
            Field::PositionCategory => "Position Category",
            Field::University => "University",
            Field::Degree => "Degree",
            Field::GraduationYear => "Graduation Year",
            Field::YearsExperience => "Years Experience",
            Field::NotableCompanies => "Notable Companies",
            Field::TopSkills => "Top Skills",
            Field::JobIntention => "Job Intention",
            Field::VisaStatus => "Visa Status",
            Field::Eligibility => "Able",
            Field::Summary => "GPT Summary",
            Field::Subject => "Subject",
            Field::DateSent => "Date Sent",
            Field::FolderPath => "Folder Path",
            Field::HasResume => "Resume",
            Field::DesiredJobRole => "Desired Job Role",
        }
    }

    /// Element name in the XML record files (current schema).
    pub fn xml_tag(&self) -> &'static str {
        match self {
            Field::Name => "Name",
            Field::Email => "Email",
            Field::Phone => "Phone",
            Field::Location => "Location",
            Field::Country => "Country",
            Field::PositionCategory => "PositionCategory",
            Field::University => "University",
            Field::Degree => "Degree",
            Field::GraduationYear => "GraduationYear",
            Field::YearsExperience => "YearsExperience",
            Field::NotableCompanies => "NotableCompanies",
            Field::TopSkills => "TopSkills",
            Field::JobIntention => "JobIntention",
            Field::VisaStatus => "VisaStatus",
            Field::Eligibility => "Able",
            Field::Summary => "GPTSummary",
            Field::Subject => "Subject",
            Field::DateSent => "DateSent",
            Field::FolderPath => "FolderPath",
            Field::HasResume => "Resume",
            Field::DesiredJobRole => "DesiredJobRole",
        }
    }

    pub fn from_xml_tag(tag: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.xml_tag() == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub location: String,
    pub country: String,
    pub position_category: String,
    pub university: String,
    pub degree: String,
    pub graduation_year: String,
    pub years_experience: String,
    pub notable_companies: Vec<String>,
    pub top_skills: Vec<String>,
    pub job_intention: String,
    pub visa_status: String,
    pub eligibility: Eligibility,
    pub summary: String,
    pub subject: String,
    pub date_sent: String,
    pub folder_path: String,
    pub has_resume: bool,
    pub desired_job_role: String,
}

impl Default for ApplicantRecord {
    fn default() -> Self {
        let unknown = || UNKNOWN.to_string();
        Self {
            name: unknown(),
            email: unknown(),
            phone: unknown(),
            location: unknown(),
            country: unknown(),
            position_category: unknown(),
            university: unknown(),
            degree: unknown(),
            graduation_year: unknown(),
            years_experience: unknown(),
            notable_companies: Vec::new(),
            top_skills: Vec::new(),
            job_intention: unknown(),
            visa_status: unknown(),
            eligibility: Eligibility::Unknown,
            summary: unknown(),
            subject: unknown(),
            date_sent: unknown(),
            folder_path: unknown(),
            has_resume: false,
            desired_job_role: unknown(),
        }
    }
}

impl ApplicantRecord {
    /// Name, email and phone all unknown: an extraction failure or a non-applicant.
    /// Such records are never persisted or exported.
    pub fn is_unidentified(&self) -> bool {
        is_unknown(&self.name) && is_unknown(&self.email) && is_unknown(&self.phone)
    }

    /// Deduplication key: (email, name), compared exactly.
    pub fn key(&self) -> (&str, &str) {
        (&self.email, &self.name)
    }

    /// Display value of a field; lists are comma-joined, flags are Yes/No.
    pub fn get(&self, field: Field) -> String {
        match field {
            Field::Name => self.name.clone(),
            Field::Email => self.email.clone(),
            Field::Phone => self.phone.clone(),
            Field::Location => self.location.clone(),
            Field::Country => self.country.clone(),
            Field::PositionCategory => self.position_category.clone(),
            Field::University => self.university.clone(),
            Field::Degree => self.degree.clone(),
            Field::GraduationYear => self.graduation_year.clone(),
            Field::YearsExperience => self.years_experience.clone(),
            Field::NotableCompanies => self.notable_companies.join(", "),
            Field::TopSkills => self.top_skills.join(", "),
            Field::JobIntention => self.job_intention.clone(),
            Field::VisaStatus => self.visa_status.clone(),
            Field::Eligibility => self.eligibility.as_str().to_string(),
            Field::Summary => self.summary.clone(),
            Field::Subject => self.subject.clone(),
            Field::DateSent => self.date_sent.clone(),
            Field::FolderPath => self.folder_path.clone(),
            Field::HasResume => (if self.has_resume { "Yes" } else { "No" }).to_string(),
            Field::DesiredJobRole => self.desired_job_role.clone(),
        }
    }

    /// Inverse of [`ApplicantRecord::get`].
    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::Name => self.name = value,
            Field::Email => self.email = value,
            Field::Phone => self.phone = value,
            Field::Location => self.location = value,
            Field::Country => self.country = value,
            Field::PositionCategory => self.position_category = value,
            Field::University => self.university = value,
            Field::Degree => self.degree = value,
            Field::GraduationYear => self.graduation_year = value,
            Field::YearsExperience => self.years_experience = value,
            Field::NotableCompanies => self.notable_companies = split_list(&value),
            Field::TopSkills => self.top_skills = split_list(&value),
            Field::JobIntention => self.job_intention = value,
            Field::VisaStatus => self.visa_status = value,
            Field::Eligibility => self.eligibility = Eligibility::parse(&value),
            Field::Summary => self.summary = value,
            Field::Subject => self.subject = value,
            Field::DateSent => self.date_sent = value,
            Field::FolderPath => self.folder_path = value,
            Field::HasResume => self.has_resume = value.trim().eq_ignore_ascii_case("yes"),
            Field::DesiredJobRole => self.desired_job_role = value,
        }
    }
}

/// Split a comma-joined list back into items; the sentinel reads as empty.
pub fn split_list(value: &str) -> Vec<String> {
    if is_unknown(value.trim()) {
        return Vec::new();
    }
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Model-derived portion of a record, before thread metadata is attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub fields: ApplicantRecord,
}

impl PartialRecord {
    /// Attach the thread-level attributes. `folder_path` is left for the path deriver.
    pub fn into_record(self, subject: &str, date_sent: &str, has_resume: bool) -> ApplicantRecord {
        let mut record = self.fields;
        record.subject = subject.to_string();
        record.date_sent = date_sent.to_string();
        record.has_resume = has_resume;
        record
    }
}
