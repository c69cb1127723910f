//! One pass of the intake pipeline: plan, process threads, write outputs, sync,
//! then commit the run state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::ai::AIProvider;
use crate::attachments::{AttachmentCollector, LinkedDocumentFetcher};
use crate::config::{Config, Destination};
use crate::documents::DocumentReader;
use crate::export::export_csv;
use crate::extract::RecordExtractor;
use crate::mail::{MailBackend, RawThread, ThreadSummary};
use crate::materialize::FolderMaterializer;
use crate::models::ApplicantRecord;
use crate::normalize::combine_bodies;
use crate::paths::{ModifiedFolders, PathDeriver};
use crate::planner::{Selection, SyncPlanner};
use crate::prompt::Operator;
use crate::remote::{RemoteStore, RemoteSyncClient, SyncSource};
use crate::state::{advance_watermark, RunStateStore};
use crate::store::{self, MergeOutcome, RecordStore};

/// Builds the remote store for a destination; called once per destination per run.
pub type RemoteFactory<'a> = dyn Fn(&Destination) -> Result<Box<dyn RemoteStore>> + 'a;

/// External services the pipeline talks to.
pub struct Collaborators<'a> {
    pub mail: &'a dyn MailBackend,
    pub model: &'a dyn AIProvider,
    pub reader: &'a dyn DocumentReader,
    pub links: Option<&'a dyn LinkedDocumentFetcher>,
    pub remotes: &'a RemoteFactory<'a>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub threads: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub non_applicants: usize,
    pub failures: usize,
    /// `None` when sync was skipped.
    pub synced: Option<bool>,
    pub stopped: bool,
}

enum ThreadOutcome {
    Applicant(ApplicantRecord, MergeOutcome),
    NotApplicant,
    Failed,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    base: PathBuf,
    with: Collaborators<'a>,
}

impl<'a> Pipeline<'a> {
    /// `base` is the directory relative storage paths resolve against.
    pub fn new(config: &'a Config, base: impl Into<PathBuf>, with: Collaborators<'a>) -> Self {
        Self {
            config,
            base: base.into(),
            with,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base.join(path)
    }

    pub fn run(&self, operator: &mut dyn Operator) -> Result<RunSummary> {
        let storage = &self.config.storage;
        let state_store = RunStateStore::new(
            self.resolve(&storage.run_state_file),
            self.resolve(&storage.modified_file),
        );
        let history = RecordStore::new(self.resolve(&storage.history_file));

        // Refuse to start on a damaged history rather than fail halfway through.
        history.load()?;
        let state = state_store.load()?;
        let mut modified = state.modified.clone();
        if !modified.is_empty() {
            info!(folders = modified.len(), "folders from a previous run still waiting for sync");
        }

        let planner = SyncPlanner::new(self.with.mail, self.config.mail.scan_top_n);
        let plan = planner.plan(state.last_run, operator)?;
        debug!(state = ?plan.state, "run planned");

        let mut summary = RunSummary::default();
        if plan.selection == Selection::Stop {
            info!("nothing to do, exiting");
            summary.stopped = true;
            state_store.save_watermark(advance_watermark(state.last_run, Utc::now()))?;
            state_store.save_modified(&modified)?;
            return Ok(summary);
        }

        let threads = self.select_threads(&plan.selection)?;
        summary.threads = threads.len();
        info!(threads = threads.len(), "processing threads");

        let deriver = PathDeriver::new(storage.root.clone());
        let materializer = FolderMaterializer::new(&self.base);
        let mut applicants = Vec::new();

        for (index, thread) in threads.iter().enumerate() {
            info!(
                thread = %thread.topic,
                "thread {} of {}",
                index + 1,
                threads.len()
            );
            match self.process_thread(thread, &deriver, &materializer, &history, &mut modified)? {
                ThreadOutcome::Applicant(record, outcome) => {
                    match outcome {
                        MergeOutcome::Added => summary.stored += 1,
                        MergeOutcome::Duplicate => summary.duplicates += 1,
                        MergeOutcome::Unidentified => {}
                    }
                    applicants.push(record);
                }
                ThreadOutcome::NotApplicant => summary.non_applicants += 1,
                ThreadOutcome::Failed => summary.failures += 1,
            }
        }

        let snapshot = self.resolve(&storage.snapshot_file);
        let written = store::rewrite(&applicants, &snapshot)?;
        let csv = self.resolve(&storage.csv_file);
        export_csv(&applicants, &csv)?;
        info!(applicants = written, snapshot = %snapshot.display(), csv = %csv.display(), "wrote run outputs");

        self.copy_history_to_root(history.path())?;
        summary.synced = self.sync(&modified);

        state_store.save_watermark(advance_watermark(state.last_run, Utc::now()))?;
        if summary.synced == Some(true) {
            modified.clear();
        } else if !modified.is_empty() {
            warn!(folders = modified.len(), "keeping modified folders for the next sync");
        }
        state_store.save_modified(&modified)?;

        info!(
            threads = summary.threads,
            stored = summary.stored,
            duplicates = summary.duplicates,
            non_applicants = summary.non_applicants,
            failures = summary.failures,
            "run complete"
        );
        Ok(summary)
    }

    fn select_threads(&self, selection: &Selection) -> Result<Vec<ThreadSummary>> {
        let mail = &self.config.mail;
        let threads = match selection {
            Selection::Stop => Vec::new(),
            Selection::All => self.with.mail.list_threads(mail.top_n)?,
            Selection::Latest(n) => {
                let mut threads = self.with.mail.list_threads(mail.top_n.max(*n))?;
                threads.truncate(*n);
                threads
            }
            Selection::New(ids) => self
                .with
                .mail
                .list_threads(mail.scan_top_n)?
                .into_iter()
                .filter(|t| ids.contains(&t.id))
                .collect(),
        };

        let threads = threads.into_iter().skip(mail.skip_threads);
        Ok(match mail.max_threads {
            Some(max) => threads.take(max).collect(),
            None => threads.collect(),
        })
    }

    fn process_thread(
        &self,
        summary: &ThreadSummary,
        deriver: &PathDeriver,
        materializer: &FolderMaterializer,
        history: &RecordStore,
        modified: &mut ModifiedFolders,
    ) -> Result<ThreadOutcome> {
        let messages = match self.with.mail.list_messages(&summary.id) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(thread = %summary.topic, error = ?e, "could not list messages");
                return Ok(ThreadOutcome::Failed);
            }
        };
        let thread = RawThread::new(summary, messages);
        let email_text = combine_bodies(thread.messages.iter().map(|m| m.body_html.as_str()));

        let collector = AttachmentCollector::new(self.with.mail, self.with.reader, self.with.links);
        let documents = collector.collect(&thread, &email_text);

        let extractor = RecordExtractor::new(self.with.model, self.config.model.max_tokens);
        let extraction = match extractor.extract(&email_text, &documents.resume_text) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(thread = %thread.subject, error = %e, "extraction failed, skipping thread");
                return Ok(ThreadOutcome::Failed);
            }
        };
        if !extraction.is_applicant {
            info!(
                thread = %thread.subject,
                reason = extraction.explanation.as_deref().unwrap_or("--"),
                "not an application"
            );
            return Ok(ThreadOutcome::NotApplicant);
        }
        if let Some(score) = &extraction.application_score {
            debug!(thread = %thread.subject, score = %score, "application score");
        }

        let mut record =
            extraction
                .fields
                .into_record(&thread.subject, &thread.date_sent, documents.has_resume());
        record.folder_path = deriver.derive_path(&record, modified);

        if let Err(e) = materializer.materialize(&record, &email_text, &documents.attachments, modified) {
            warn!(thread = %thread.subject, folder = %record.folder_path, error = %e, "could not write applicant folder");
            return Ok(ThreadOutcome::Failed);
        }

        let outcome = match history.merge(&record) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => {
                error!(path = %history.path().display(), error = %e, "record history is unusable");
                return Err(e.into());
            }
            Err(e) => {
                warn!(thread = %thread.subject, error = %e, "could not update record history");
                return Ok(ThreadOutcome::Failed);
            }
        };
        info!(name = %record.name, folder = %record.folder_path, outcome = ?outcome, "applicant processed");
        Ok(ThreadOutcome::Applicant(record, outcome))
    }

    fn copy_history_to_root(&self, history: &Path) -> Result<()> {
        if !history.is_file() {
            return Ok(());
        }
        let root = self.base.join(&self.config.storage.root);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create {}", root.display()))?;
        let name = history.file_name().context("history file has no name")?;
        std::fs::copy(history, root.join(name))
            .with_context(|| format!("Failed to copy {} into {}", history.display(), root.display()))?;
        Ok(())
    }

    /// `None` when there is nowhere to sync to; otherwise whether every destination succeeded.
    fn sync(&self, modified: &ModifiedFolders) -> Option<bool> {
        let destinations = &self.config.sync.destinations;
        if destinations.is_empty() {
            info!("no sync destinations configured, skipping upload");
            return None;
        }
        if modified.is_empty() {
            info!("no modified folders to upload");
        }

        let client = RemoteSyncClient::new(SyncSource {
            base: self.base.clone(),
            root: self.config.storage.root.clone(),
            history_file: self.resolve(&self.config.storage.history_file),
        });

        let mut all_ok = true;
        for destination in destinations {
            let mut remote = match (self.with.remotes)(destination) {
                Ok(remote) => remote,
                Err(e) => {
                    error!(destination = %destination.name, error = ?e, "could not set up remote store");
                    all_ok = false;
                    continue;
                }
            };
            let report = client.sync(remote.as_mut(), modified, destination);
            if !report.success() {
                warn!(destination = %destination.name, "sync did not complete");
                all_ok = false;
            }
        }
        Some(all_ok)
    }
}
