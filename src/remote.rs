//! Pushes modified applicant folders to a remote document library.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::auth::{site_scope, ClientCredentials};
use crate::config::{Credentials, Destination};
use crate::error::IntakeError;
use crate::paths::{sanitize_file_name, sanitize_folder_segment, ModifiedFolders};

/// A remote document store. `authenticate` must succeed before the other calls.
pub trait RemoteStore {
    fn authenticate(&mut self) -> Result<()>;
    /// Create every missing folder along `path` (segments already sanitized).
    fn ensure_folder(&mut self, path: &str) -> Result<()>;
    /// Upload into `folder`, replacing any file with the same name.
    fn upload_file(&mut self, folder: &str, name: &str, bytes: &[u8]) -> Result<()>;
}

// --- SharePoint REST ---

pub struct SharePointStore {
    site_url: String,
    auth: ClientCredentials,
    client: reqwest::blocking::Client,
    token: Option<String>,
    digest: Option<String>,
}

impl SharePointStore {
    pub fn new(site_url: &str, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            auth: ClientCredentials::new(credentials)?,
            client: reqwest::blocking::Client::new(),
            token: None,
            digest: None,
        })
    }

    fn session(&self) -> Result<(&str, &str)> {
        match (&self.token, &self.digest) {
            (Some(token), Some(digest)) => Ok((token.as_str(), digest.as_str())),
            _ => Err(anyhow!("not authenticated against {}", self.site_url)),
        }
    }

    fn folder_exists(&self, path: &str) -> Result<bool> {
        let (token, _) = self.session()?;
        let url = format!(
            "{}/_api/web/GetFolderByServerRelativeUrl('{}')",
            self.site_url,
            odata_path(path)
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/json;odata=verbose")
            .send()
            .with_context(|| format!("Failed to query folder {}", path))?;
        Ok(response.status().is_success())
    }

    fn create_folder(&self, path: &str) -> Result<()> {
        let (token, digest) = self.session()?;
        let url = format!("{}/_api/web/folders", self.site_url);
        let body = json!({
            "__metadata": { "type": "SP.Folder" },
            "ServerRelativeUrl": path,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/json;odata=verbose")
            .header("Content-Type", "application/json;odata=verbose")
            .header("X-RequestDigest", digest)
            .body(body.to_string())
            .send()
            .with_context(|| format!("Failed to create folder {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Creating folder {} failed with status {}: {}",
                path,
                status,
                error_text
            ));
        }
        Ok(())
    }
}

impl RemoteStore for SharePointStore {
    fn authenticate(&mut self) -> Result<()> {
        let token = self.auth.token(&site_scope(&self.site_url)?)?;

        let web = self
            .client
            .get(format!("{}/_api/web", self.site_url))
            .bearer_auth(&token)
            .header("Accept", "application/json;odata=verbose")
            .send()
            .context("Failed to reach SharePoint site")?;
        if !web.status().is_success() {
            return Err(anyhow!(
                "SharePoint site {} rejected the token with status {}",
                self.site_url,
                web.status()
            ));
        }

        let context: Value = self
            .client
            .post(format!("{}/_api/contextinfo", self.site_url))
            .bearer_auth(&token)
            .header("Accept", "application/json;odata=verbose")
            .header("Content-Length", "0")
            .send()
            .context("Failed to request form digest")?
            .error_for_status()
            .context("Form digest request failed")?
            .json()
            .context("Failed to parse form digest response")?;
        let digest = context
            .pointer("/d/GetContextWebInformation/FormDigestValue")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("No FormDigestValue in contextinfo response"))?
            .to_string();

        debug!(site = %self.site_url, "authenticated to document store");
        self.token = Some(token);
        self.digest = Some(digest);
        Ok(())
    }

    fn ensure_folder(&mut self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            if !self.folder_exists(&current)? {
                self.create_folder(&current)?;
            }
        }
        Ok(())
    }

    fn upload_file(&mut self, folder: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let (token, digest) = self.session()?;
        let url = format!(
            "{}/_api/web/GetFolderByServerRelativeUrl('{}')/Files/add(url='{}',overwrite=true)",
            self.site_url,
            odata_path(folder),
            odata_path(name)
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/json;odata=verbose")
            .header("X-RequestDigest", digest)
            .body(bytes.to_vec())
            .send()
            .with_context(|| format!("Failed to upload {}", name))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Upload of {} failed with status {}: {}",
                name,
                status,
                error_text
            ));
        }
        Ok(())
    }
}

/// Percent-encode each segment of a path for use inside an OData string literal.
pub fn odata_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(&segment.replace('\'', "''")).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// --- Mirror and sync ---

/// Where the local tree and the history file live.
#[derive(Debug, Clone)]
pub struct SyncSource {
    /// Directory the modified-folder paths are relative to.
    pub base: PathBuf,
    /// First segment of every modified-folder path.
    pub root: String,
    pub history_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub folders: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub setup_failed: bool,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.uploaded > 0 && !self.setup_failed
    }
}

/// Mirror-relative location of a modified folder, or `None` if the destination skips it.
pub fn mirror_path(root: &str, folder: &str, category_filter: Option<&str>) -> Option<String> {
    let relative = folder
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(folder);
    let Some(filter) = category_filter else {
        return Some(relative.to_string());
    };

    let parts: Vec<&str> = relative.split('/').collect();
    if parts.len() < 3 {
        return None;
    }
    let index = parts.iter().position(|p| *p == filter)?;
    let country = parts[0];
    let sub_category = parts
        .get(index + 1)
        .filter(|_| index + 1 < parts.len() - 1)
        .copied()
        .unwrap_or("Other");
    let leaf = parts[parts.len() - 1];
    Some(format!("{}/{}/{}", country, sub_category, leaf))
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Build a temporary tree holding only the modified folders plus the history file.
pub fn build_mirror(
    source: &SyncSource,
    modified: &ModifiedFolders,
    category_filter: Option<&str>,
) -> crate::error::Result<(tempfile::TempDir, usize)> {
    let mirror = tempfile::Builder::new()
        .prefix("intake-sync-")
        .tempdir()
        .map_err(|e| IntakeError::io(std::env::temp_dir(), e))?;

    let mut copied = 0;
    for folder in modified.iter() {
        let local = source.base.join(folder);
        if !local.is_dir() {
            debug!(folder = %folder, "modified folder no longer exists, skipping");
            continue;
        }
        let Some(relative) = mirror_path(&source.root, folder, category_filter) else {
            continue;
        };
        let target = mirror.path().join(&relative);
        copy_dir(&local, &target).map_err(|e| IntakeError::io(&local, e))?;
        copied += 1;
    }

    if source.history_file.is_file() {
        let name = source
            .history_file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("applicant_bank.xml"));
        std::fs::copy(&source.history_file, mirror.path().join(name))
            .map_err(|e| IntakeError::io(&source.history_file, e))?;
    }

    Ok((mirror, copied))
}

/// Directories under `dir` (including itself) with their mirror-relative segments.
fn walk_dirs(
    dir: &Path,
    segments: Vec<String>,
    out: &mut Vec<(PathBuf, Vec<String>)>,
) -> std::io::Result<()> {
    out.push((dir.to_path_buf(), segments.clone()));
    let mut children: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    children.sort_by_key(|e| e.file_name());
    for child in children {
        let mut child_segments = segments.clone();
        child_segments.push(child.file_name().to_string_lossy().into_owned());
        walk_dirs(&child.path(), child_segments, out)?;
    }
    Ok(())
}

pub struct RemoteSyncClient {
    source: SyncSource,
}

impl RemoteSyncClient {
    pub fn new(source: SyncSource) -> Self {
        Self { source }
    }

    /// Push the modified folders to one destination. Per-file failures are logged and
    /// skipped; authentication or folder-creation failures mark the sync as failed.
    pub fn sync(
        &self,
        store: &mut dyn RemoteStore,
        modified: &ModifiedFolders,
        destination: &Destination,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        let (mirror, copied) =
            match build_mirror(&self.source, modified, destination.category_filter.as_deref()) {
                Ok(built) => built,
                Err(e) => {
                    error!(destination = %destination.name, error = %e, "could not prepare upload");
                    report.setup_failed = true;
                    return report;
                }
            };
        report.folders = copied;
        info!(destination = %destination.name, folders = copied, "prepared modified folders for upload");

        if let Err(e) = store.authenticate() {
            error!(destination = %destination.name, error = ?e, "authentication failed");
            report.setup_failed = true;
            return report;
        }

        let mut dirs = Vec::new();
        if let Err(e) = walk_dirs(mirror.path(), Vec::new(), &mut dirs) {
            error!(destination = %destination.name, error = %e, "could not read upload mirror");
            report.setup_failed = true;
            return report;
        }

        for (dir, segments) in dirs {
            let files: Vec<PathBuf> = match std::fs::read_dir(&dir) {
                Ok(entries) => {
                    let mut files: Vec<PathBuf> = entries
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                        .map(|e| e.path())
                        .collect();
                    files.sort();
                    files
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "could not list mirror folder");
                    continue;
                }
            };
            if files.is_empty() {
                continue;
            }

            let remote_folder = remote_folder(&destination.folder, &segments);
            if let Err(e) = store.ensure_folder(&remote_folder) {
                error!(folder = %remote_folder, error = ?e, "could not create remote folder");
                report.setup_failed = true;
                report.failed += files.len();
                continue;
            }

            for file in files {
                let name = file
                    .file_name()
                    .map(|n| sanitize_file_name(&n.to_string_lossy()))
                    .unwrap_or_default();
                let result = std::fs::read(&file)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| store.upload_file(&remote_folder, &name, &bytes));
                match result {
                    Ok(()) => {
                        debug!(folder = %remote_folder, file = %name, "uploaded");
                        report.uploaded += 1;
                    }
                    Err(e) => {
                        warn!(folder = %remote_folder, file = %name, error = ?e, "upload failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            destination = %destination.name,
            uploaded = report.uploaded,
            failed = report.failed,
            "upload finished"
        );
        report
    }
}

fn remote_folder(base: &str, segments: &[String]) -> String {
    let mut parts: Vec<String> = base
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    parts.extend(segments.iter().map(|s| sanitize_folder_segment(s)));
    parts.join("/")
}
