//! Decides which threads a run processes, based on the watermark and the operator.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::mail::{MailBackend, RawThread};
use crate::prompt::Operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    NoPriorRun,
    HasPriorRunNoNewThreads,
    HasPriorRunWithNewThreads,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Process nothing this run.
    Stop,
    /// Every listed thread.
    All,
    /// The N most recent threads.
    Latest(usize),
    /// Only these threads (ids), which have messages newer than the watermark.
    New(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub state: PlanState,
    pub selection: Selection,
}

pub fn classify(last_run: Option<DateTime<Utc>>, new_threads: usize) -> PlanState {
    match (last_run, new_threads) {
        (None, _) => PlanState::NoPriorRun,
        (Some(_), 0) => PlanState::HasPriorRunNoNewThreads,
        (Some(_), _) => PlanState::HasPriorRunWithNewThreads,
    }
}

pub struct SyncPlanner<'a> {
    mail: &'a dyn MailBackend,
    scan_top_n: usize,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(mail: &'a dyn MailBackend, scan_top_n: usize) -> Self {
        Self { mail, scan_top_n }
    }

    /// Ids of threads with at least one message created strictly after `watermark`.
    pub fn new_thread_ids(&self, watermark: DateTime<Utc>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for summary in self.mail.list_threads(self.scan_top_n)? {
            let messages = self.mail.list_messages(&summary.id)?;
            let thread = RawThread::new(&summary, messages);
            if thread.has_message_after(watermark) {
                debug!(thread = %thread.subject, "new since last run");
                ids.push(thread.id);
            }
        }
        Ok(ids)
    }

    pub fn plan(
        &self,
        last_run: Option<DateTime<Utc>>,
        operator: &mut dyn Operator,
    ) -> Result<Plan> {
        let Some(watermark) = last_run else {
            let available = self.mail.list_threads(self.scan_top_n)?.len();
            info!(available, "first run, no previous timestamp");
            let selection = count_selection(operator.ask_count(&format!(
                "How many threads would you like to process? (max {})",
                available
            )));
            return Ok(Plan {
                state: PlanState::NoPriorRun,
                selection,
            });
        };

        info!(last_run = %watermark.format("%Y-%m-%d %H:%M:%S"), "previous run found");
        let new_ids = self.new_thread_ids(watermark)?;
        let state = classify(last_run, new_ids.len());

        let selection = match state {
            PlanState::HasPriorRunNoNewThreads => {
                info!("no new threads since last run");
                if operator.confirm("No new threads found. Do you want to exit?", true) {
                    Selection::Stop
                } else {
                    count_selection(
                        operator.ask_count("How many recent threads would you like to process?"),
                    )
                }
            }
            _ => {
                info!(new_threads = new_ids.len(), "new threads since last run");
                let question = format!(
                    "Do you want to process ONLY these {} new threads?",
                    new_ids.len()
                );
                if operator.confirm(&question, true) {
                    Selection::New(new_ids)
                } else if operator.confirm("Do you want to process all threads instead?", false) {
                    Selection::All
                } else {
                    count_selection(
                        operator.ask_count("How many recent threads would you like to process?"),
                    )
                }
            }
        };

        Ok(Plan { state, selection })
    }
}

fn count_selection(count: Option<usize>) -> Selection {
    match count {
        Some(n) => Selection::Latest(n),
        None => Selection::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{Message, ThreadSummary};
    use chrono::TimeZone;
    use std::collections::VecDeque;

    struct Mailbox {
        threads: Vec<(String, Vec<&'static str>)>,
    }

    impl MailBackend for Mailbox {
        fn list_threads(&self, top_n: usize) -> Result<Vec<ThreadSummary>> {
            Ok(self
                .threads
                .iter()
                .take(top_n)
                .map(|(id, _)| ThreadSummary {
                    id: id.clone(),
                    topic: format!("topic {}", id),
                    created: None,
                })
                .collect())
        }

        fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
            let (_, dates) = self
                .threads
                .iter()
                .find(|(id, _)| id == thread_id)
                .ok_or_else(|| anyhow::anyhow!("no thread"))?;
            Ok(dates
                .iter()
                .map(|d| Message {
                    id: format!("{}-{}", thread_id, d),
                    body_html: String::new(),
                    created: Some(d.to_string()),
                    attachments: vec![],
                })
                .collect())
        }

        fn fetch_attachment(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct ScriptedOperator {
        confirms: VecDeque<Option<bool>>,
        counts: VecDeque<Option<usize>>,
        asked: Vec<String>,
    }

    impl Operator for ScriptedOperator {
        fn confirm(&mut self, question: &str, default: bool) -> bool {
            self.asked.push(question.to_string());
            self.confirms.pop_front().flatten().unwrap_or(default)
        }
        fn ask_count(&mut self, question: &str) -> Option<usize> {
            self.asked.push(question.to_string());
            self.counts.pop_front().flatten()
        }
    }

    fn mailbox() -> Mailbox {
        Mailbox {
            threads: vec![
                ("t1".to_string(), vec!["2024-03-05T10:00:00Z"]),
                ("t2".to_string(), vec!["2024-02-01T10:00:00Z", "2024-03-04T08:00:00Z"]),
                ("t3".to_string(), vec!["2024-01-01T10:00:00Z"]),
            ],
        }
    }

    #[test]
    fn test_classify() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(classify(None, 5), PlanState::NoPriorRun);
        assert_eq!(classify(Some(t), 0), PlanState::HasPriorRunNoNewThreads);
        assert_eq!(classify(Some(t), 2), PlanState::HasPriorRunWithNewThreads);
    }

    #[test]
    fn test_new_thread_ids_strictly_after() {
        let mail = mailbox();
        let planner = SyncPlanner::new(&mail, 999);
        let watermark = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
        assert_eq!(planner.new_thread_ids(watermark).unwrap(), vec!["t1"]);

        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(planner.new_thread_ids(earlier).unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_first_run_asks_for_count() {
        let mail = mailbox();
        let planner = SyncPlanner::new(&mail, 999);

        let mut op = ScriptedOperator {
            counts: VecDeque::from([Some(2)]),
            ..Default::default()
        };
        let plan = planner.plan(None, &mut op).unwrap();
        assert_eq!(plan.state, PlanState::NoPriorRun);
        assert_eq!(plan.selection, Selection::Latest(2));

        let mut blank = ScriptedOperator::default();
        assert_eq!(planner.plan(None, &mut blank).unwrap().selection, Selection::All);
    }

    #[test]
    fn test_new_threads_default_to_new_only() {
        let mail = mailbox();
        let planner = SyncPlanner::new(&mail, 999);
        let watermark = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut op = ScriptedOperator::default();
        let plan = planner.plan(Some(watermark), &mut op).unwrap();
        assert_eq!(plan.state, PlanState::HasPriorRunWithNewThreads);
        assert_eq!(plan.selection, Selection::New(vec!["t1".to_string(), "t2".to_string()]));
        assert!(op.asked[0].contains("ONLY these 2 new threads"));
    }

    #[test]
    fn test_new_threads_declined_then_count() {
        let mail = mailbox();
        let planner = SyncPlanner::new(&mail, 999);
        let watermark = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut op = ScriptedOperator {
            confirms: VecDeque::from([Some(false), Some(false)]),
            counts: VecDeque::from([Some(1)]),
            ..Default::default()
        };
        assert_eq!(
            planner.plan(Some(watermark), &mut op).unwrap().selection,
            Selection::Latest(1)
        );

        let mut all = ScriptedOperator {
            confirms: VecDeque::from([Some(false), Some(true)]),
            ..Default::default()
        };
        assert_eq!(planner.plan(Some(watermark), &mut all).unwrap().selection, Selection::All);
    }

    #[test]
    fn test_nothing_new_defaults_to_stop() {
        let mail = mailbox();
        let planner = SyncPlanner::new(&mail, 999);
        let watermark = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut op = ScriptedOperator::default();
        let plan = planner.plan(Some(watermark), &mut op).unwrap();
        assert_eq!(plan.state, PlanState::HasPriorRunNoNewThreads);
        assert_eq!(plan.selection, Selection::Stop);

        let mut reprocess = ScriptedOperator {
            confirms: VecDeque::from([Some(false)]),
            counts: VecDeque::from([Some(3)]),
            ..Default::default()
        };
        assert_eq!(
            planner.plan(Some(watermark), &mut reprocess).unwrap().selection,
            Selection::Latest(3)
        );
    }
}
