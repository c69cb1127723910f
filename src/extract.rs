//! Turns an email chain plus resume text into applicant fields with one model call.

use serde_json::{Map, Value};
use tracing::debug;

use crate::ai::AIProvider;
use crate::error::{IntakeError, Result};
use crate::models::{split_list, Field, PartialRecord, UNKNOWN};

/// Result of one extraction.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub is_applicant: bool,
    pub fields: PartialRecord,
    /// Why the model thinks this is not an application, if it said so.
    pub explanation: Option<String>,
    pub application_score: Option<String>,
}

pub struct RecordExtractor<'a> {
    provider: &'a dyn AIProvider,
    max_tokens: u32,
}

impl<'a> RecordExtractor<'a> {
    pub fn new(provider: &'a dyn AIProvider, max_tokens: u32) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    /// One model call, no retries. A transport failure is an [`IntakeError::Extraction`];
    /// a reply that is not a JSON object is a non-applicant.
    pub fn extract(&self, email_text: &str, resume_text: &str) -> Result<Extraction> {
        let prompt = build_prompt(email_text, resume_text);
        let reply = self
            .provider
            .complete(&prompt, self.max_tokens)
            .map_err(|e| IntakeError::Extraction(format!("{:#}", e)))?;
        debug!(model = self.provider.model_name(), chars = reply.len(), "model replied");
        Ok(parse_response(&reply))
    }
}

pub fn build_prompt(email_text: &str, resume_text: &str) -> String {
    format!(
        "You are a helpful assistant that extracts applicant information for a hiring system.\n\
         Given the following email and resume, extract the following fields and return them as JSON. \
         If any of the fields are not relevant return {unknown}:\n\n\
         Fields:\n\
         - full_name (Capitalize First Letter Of Names)\n\
         - email\n\
         - phone\n\
         - location\n\
         - country (the country or region of the location; for the United States say USA)\n\
         - position_category (one of: Design: Logic design, Design: Physical design, \
           Verification: Formal verification, Verification: Design verification, Architecture, \
           Internship, Operations: Human resources, Other)\n\
         - university (or universities)\n\
         - degree\n\
         - graduation_year (estimate if not clearly stated)\n\
         - years_experience (estimate)\n\
         - notable_companies (list)\n\
         - top_skills (list)\n\
         - job_intention (e.g. full-time, internship)\n\
         - visa_status (if mentioned)\n\
         - able (yes if their location is in Oregon or Mexico and they are not looking for an \
           internship; no if they are elsewhere or looking for an internship)\n\
         - summary (a brief natural language summary)\n\
         - application (Yes if the sender is asking to be considered for employment, No otherwise. \
           An email with no text but an attached resume counts as an application)\n\
         - explanation (if application is No, explain what the email is instead; say so if someone \
           on our team already replied with a rejection)\n\
         - application_score (0 to 100, how likely it is that the sender is requesting employment)\n\
         - desired_job_role (the most likely specific job title they want based on their resume, \
           skills and email, regardless of what we offer; be specific, e.g. 'FPGA Design Engineer' \
           rather than 'engineer')\n\n\
         Email:\n{email_text}\n\n\
         Resume:\n{resume_text}\n\n\
         Return ONLY valid JSON with the fields above.",
        unknown = UNKNOWN,
    )
}

/// Parse the model reply. Anything other than a JSON object yields a non-applicant
/// with every field unknown.
pub fn parse_response(reply: &str) -> Extraction {
    let object = match serde_json::from_str::<Value>(reply.trim()) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => return Extraction::default(),
    };

    let mut fields = PartialRecord::default();
    let record = &mut fields.fields;

    const SCALARS: [(&str, Field); 14] = [
        ("full_name", Field::Name),
        ("email", Field::Email),
        ("phone", Field::Phone),
        ("location", Field::Location),
        ("country", Field::Country),
        ("university", Field::University),
        ("degree", Field::Degree),
        ("graduation_year", Field::GraduationYear),
        ("years_experience", Field::YearsExperience),
        ("job_intention", Field::JobIntention),
        ("visa_status", Field::VisaStatus),
        ("able", Field::Eligibility),
        ("summary", Field::Summary),
        ("desired_job_role", Field::DesiredJobRole),
    ];
    for (key, field) in SCALARS {
        if let Some(value) = scalar(&object, key) {
            record.set(field, value);
        }
    }

    record.position_category = match object.get("position_category") {
        Some(Value::Array(items)) => items
            .iter()
            .find_map(value_text)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        _ => scalar(&object, "position_category").unwrap_or_else(|| UNKNOWN.to_string()),
    };
    record.notable_companies = list(&object, "notable_companies");
    record.top_skills = list(&object, "top_skills");

    let said_yes = scalar(&object, "application")
        .is_some_and(|a| a.trim().eq_ignore_ascii_case("yes"));
    let named = record.name != UNKNOWN;

    Extraction {
        is_applicant: said_yes && named,
        fields,
        explanation: scalar(&object, "explanation"),
        application_score: scalar(&object, "application_score"),
    }
}

/// Stringify a JSON value; null reads as absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(true) => Some("Yes".to_string()),
        Value::Bool(false) => Some("No".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            Some(parts.join(", "))
        }
        Value::Object(_) => Some(value.to_string()),
    }
}

fn scalar(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(value_text)
}

fn list(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(value_text)
            .filter(|s| !s.is_empty() && s != UNKNOWN)
            .collect(),
        Some(other) => value_text(other).map(|s| split_list(&s)).unwrap_or_default(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Eligibility;
    use anyhow::anyhow;
    use std::cell::RefCell;

    struct ScriptedModel {
        reply: std::result::Result<String, String>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl AIProvider for ScriptedModel {
        fn complete(&self, prompt: &str, _max_tokens: u32) -> anyhow::Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    const APPLICANT_JSON: &str = r#"{
        "full_name": "Ana Ruiz",
        "email": "ana@example.com",
        "phone": "--",
        "location": "Mexico City, Mexico",
        "country": "Mexico",
        "position_category": ["Design: Logic design", "Architecture"],
        "university": "UNAM",
        "degree": "BSc EE",
        "graduation_year": 2021,
        "years_experience": 3,
        "notable_companies": ["Intel", "AMD"],
        "top_skills": "Verilog, UVM",
        "job_intention": "full-time",
        "visa_status": null,
        "able": "yes",
        "summary": "RTL designer.",
        "application": "Yes",
        "explanation": "--",
        "application_score": 95,
        "desired_job_role": "RTL Design Engineer"
    }"#;

    #[test]
    fn test_parse_applicant() {
        let extraction = parse_response(APPLICANT_JSON);
        assert!(extraction.is_applicant);
        let r = &extraction.fields.fields;
        assert_eq!(r.name, "Ana Ruiz");
        assert_eq!(r.phone, UNKNOWN);
        assert_eq!(r.position_category, "Design: Logic design");
        assert_eq!(r.graduation_year, "2021");
        assert_eq!(r.notable_companies, vec!["Intel", "AMD"]);
        assert_eq!(r.top_skills, vec!["Verilog", "UVM"]);
        assert_eq!(r.visa_status, UNKNOWN);
        assert_eq!(r.eligibility, Eligibility::Yes);
        assert_eq!(extraction.application_score.as_deref(), Some("95"));
    }

    #[test]
    fn test_non_json_is_not_applicant() {
        let extraction = parse_response("Sure! Here is the data: name = Ana");
        assert!(!extraction.is_applicant);
        assert!(extraction.fields.fields.is_unidentified());

        assert!(!parse_response("[1, 2]").is_applicant);
    }

    #[test]
    fn test_unknown_name_is_not_applicant() {
        let extraction = parse_response(r#"{"full_name": "--", "application": "yes", "email": "x@y.com"}"#);
        assert!(!extraction.is_applicant);

        let missing = parse_response(r#"{"application": "Yes"}"#);
        assert!(!missing.is_applicant);
    }

    #[test]
    fn test_application_no() {
        let extraction = parse_response(
            r#"{"full_name": "HR Bot", "application": "No", "explanation": "automated rejection"}"#,
        );
        assert!(!extraction.is_applicant);
        assert_eq!(extraction.explanation.as_deref(), Some("automated rejection"));
    }

    #[test]
    fn test_extract_calls_model_once_with_both_texts() {
        let model = ScriptedModel::replying(APPLICANT_JSON);
        let extractor = RecordExtractor::new(&model, 700);
        let extraction = extractor.extract("Hello, I am Ana", "RESUME BODY").unwrap();

        assert!(extraction.is_applicant);
        let prompts = model.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Hello, I am Ana"));
        assert!(prompts[0].contains("RESUME BODY"));
        assert!(prompts[0].contains("desired_job_role"));
    }

    #[test]
    fn test_model_failure_is_extraction_error() {
        let model = ScriptedModel {
            reply: Err("connection reset".to_string()),
            prompts: RefCell::new(Vec::new()),
        };
        let extractor = RecordExtractor::new(&model, 700);
        let result = extractor.extract("email", UNKNOWN);
        assert!(matches!(result, Err(IntakeError::Extraction(_))));
    }
}
