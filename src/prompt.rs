//! Operator decisions at run start.

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

/// Whoever answers the planner's questions.
pub trait Operator {
    /// Yes/no question answered within the operator's timeout, else `default`.
    fn confirm(&mut self, question: &str, default: bool) -> bool;
    /// Untimed count question; `None` means "all".
    fn ask_count(&mut self, question: &str) -> Option<usize>;
}

/// Reads answers from stdin. A background thread forwards stdin lines over a channel;
/// each timed question waits on that channel for at most `timeout`.
pub struct ConsoleOperator {
    timeout: Duration,
    runtime: Runtime,
    lines: Option<UnboundedReceiver<String>>,
    timed_out: bool,
}

impl ConsoleOperator {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            timeout,
            runtime: prompt_runtime()?,
            lines: None,
            timed_out: false,
        })
    }

    /// Wait for one line, or `None` on timeout / closed stdin.
    fn read_line(&mut self, timeout: Option<Duration>) -> Option<String> {
        let lines = self.lines.get_or_insert_with(spawn_stdin_reader);
        let stale = std::mem::take(&mut self.timed_out);
        let answer = receive(&self.runtime, lines, timeout, stale);
        self.timed_out = answer.is_none() && timeout.is_some();
        answer
    }
}

fn prompt_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start prompt runtime")
}

/// Next line from `lines`. With `discard_stale`, lines already queued are dropped first:
/// they answer a question that has timed out. Type-ahead is kept otherwise.
fn receive(
    runtime: &Runtime,
    lines: &mut UnboundedReceiver<String>,
    timeout: Option<Duration>,
    discard_stale: bool,
) -> Option<String> {
    if discard_stale {
        while lines.try_recv().is_ok() {}
    }
    runtime.block_on(async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, lines.recv()).await.ok().flatten(),
            None => lines.recv().await,
        }
    })
}

fn spawn_stdin_reader() -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

impl Operator for ConsoleOperator {
    fn confirm(&mut self, question: &str, default: bool) -> bool {
        let default_label = if default { "y" } else { "n" };
        print!(
            "{} [y/n] (timeout: {}s, default: {}) ",
            question,
            self.timeout.as_secs(),
            default_label
        );
        let _ = std::io::stdout().flush();

        match self.read_line(Some(self.timeout)) {
            Some(answer) => parse_yes_no(&answer, default),
            None => {
                println!();
                info!(default = default_label, "no answer, using default");
                default
            }
        }
    }

    fn ask_count(&mut self, question: &str) -> Option<usize> {
        print!("{} (blank for all) ", question);
        let _ = std::io::stdout().flush();
        let answer = self.read_line(None).unwrap_or_default();
        let count = parse_count(&answer);
        if count.is_none() && !answer.trim().is_empty() {
            info!(answer = %answer.trim(), "not a number, processing all threads");
        }
        count
    }
}

pub fn parse_yes_no(answer: &str, default: bool) -> bool {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

pub fn parse_count(answer: &str) -> Option<usize> {
    answer.trim().parse::<usize>().ok()
}
