//! Run configuration.
//!
//! Loaded from a TOML file found at:
//! 1. `--config` / `$INTAKE_CONFIG`
//! 2. the platform config directory (`intake/config.toml`)
//! 3. built-in defaults
//!
//! Credentials and destinations can then be overridden from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub model: ModelConfig,
    pub documents: DocumentsConfig,
    pub prompt: PromptConfig,
    pub sync: SyncConfig,
    /// Identity-platform credentials; normally supplied through the environment.
    #[serde(skip)]
    pub credentials: Credentials,
}

/// Local layout of everything the pipeline writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the applicant folder tree.
    pub root: String,
    /// Full-history record file, merged one applicant at a time.
    pub history_file: PathBuf,
    /// Snapshot of the applicants produced by the latest pass.
    pub snapshot_file: PathBuf,
    pub csv_file: PathBuf,
    pub run_state_file: PathBuf,
    pub modified_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub group_id: String,
    /// Threads listed when processing.
    pub top_n: usize,
    /// Threads scanned when counting what arrived since the last run.
    pub scan_top_n: usize,
    /// Leading threads to skip (debugging).
    pub skip_threads: usize,
    /// Hard cap on threads processed in one pass (debugging).
    pub max_threads: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub pdf_command: String,
    pub docx_command: String,
    pub follow_drive_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub destinations: Vec<Destination>,
}

/// One remote document library the modified folders are pushed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub site_url: String,
    /// Server-relative folder, e.g. `Shared Documents/Applicants`.
    pub folder: String,
    /// Only push folders whose path has this segment (e.g. `Design`).
    #[serde(default)]
    pub category_filter: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "Applicants".to_string(),
            history_file: PathBuf::from("applicant_bank.xml"),
            snapshot_file: PathBuf::from("applicants.xml"),
            csv_file: PathBuf::from("applicants.csv"),
            run_state_file: PathBuf::from("last_run.json"),
            modified_file: PathBuf::from("modified_folders.json"),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            top_n: 400,
            scan_top_n: 999,
            skip_threads: 0,
            max_threads: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-3.5-turbo".to_string(),
            max_tokens: 700,
            temperature: 0.3,
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            pdf_command: "pdftotext".to_string(),
            docx_command: "pandoc".to_string(),
            follow_drive_links: true,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Config {
    /// Load from `explicit`, or the standard location, or defaults; then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit.map(Path::to_path_buf).or_else(config_file_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| IntakeError::io(&path, e))?;
                let config = Self::parse(&contents)?;
                tracing::info!(path = %path.display(), "loaded config");
                config
            }
            Some(path) if explicit.is_some() => {
                return Err(IntakeError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| IntakeError::Config(e.to_string()))
    }

    /// Overlay credentials and destinations taken from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MS_TENANT_ID") {
            self.credentials.tenant_id = v;
        }
        if let Some(v) = get("MS_CLIENT_ID") {
            self.credentials.client_id = v;
        }
        if let Some(v) = get("MS_CLIENT_SECRET").or_else(|| get("SHAREPOINT_CLIENT_SECRET")) {
            self.credentials.client_secret = v;
        }
        if let Some(v) = get("MS_GROUP_ID") {
            self.mail.group_id = v;
        }

        if let Some(site_url) = get("SHAREPOINT_SITE_URL") {
            let folder = get("SHAREPOINT_FOLDER")
                .unwrap_or_else(|| "Shared Documents/Applicants".to_string());
            self.upsert_destination(Destination {
                name: "primary".to_string(),
                site_url,
                folder,
                category_filter: None,
            });
        }
        if let Some(site_url) = get("DESIGN_SHAREPOINT_SITE_URL") {
            let folder = get("DESIGN_SHAREPOINT_FOLDER")
                .unwrap_or_else(|| "Shared Documents/Design/Hiring/Applicants".to_string());
            self.upsert_destination(Destination {
                name: "design".to_string(),
                site_url,
                folder,
                category_filter: Some("Design".to_string()),
            });
        }
    }

    fn upsert_destination(&mut self, destination: Destination) {
        match self
            .sync
            .destinations
            .iter_mut()
            .find(|d| d.name == destination.name)
        {
            Some(existing) => *existing = destination,
            None => self.sync.destinations.push(destination),
        }
    }
}

/// Standard config location: `$INTAKE_CONFIG`, then the platform config dir.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("INTAKE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    directories::ProjectDirs::from("", "", "intake").map(|d| d.config_dir().join("config.toml"))
}
