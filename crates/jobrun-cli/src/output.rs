//! Reporting for `jobrun run`: readable lines, or one JSON object per event.

use std::io::{self, Write};

use chrono::Utc;
use jobrun_core::{ResultLocation, StatusView, TaskPhase};
use serde::Serialize;

/// Where and how the progress of a run is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reporter {
    Text,
    /// JSON lines on stdout, tagged by `event`.
    Json,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    TaskStarted { domain: &'a str, task_id: &'a str },
    Progress { progress: u8, status: &'a str },
    CancelRequested { reply: &'a str },
    TaskCompleted(&'a StatusView),
    TaskFailed(&'a StatusView),
    TaskCancelled(&'a StatusView),
}

impl Event<'_> {
    /// The event as a JSON object stamped with the time it was reported.
    fn to_line(&self) -> Option<serde_json::Value> {
        let mut line = serde_json::to_value(self).ok()?;
        line.as_object_mut()?
            .insert("at".to_string(), Utc::now().to_rfc3339().into());
        Some(line)
    }
}

impl Reporter {
    pub fn new(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }

    fn emit(self, event: Event<'_>) {
        if let Some(line) = event.to_line() {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    }

    pub fn started(self, domain: &str, task_id: &str) {
        match self {
            Self::Json => self.emit(Event::TaskStarted { domain, task_id }),
            Self::Text => println!("[{domain}] started, id={task_id}"),
        }
    }

    pub fn progress(self, view: &StatusView) {
        match self {
            Self::Json => self.emit(Event::Progress {
                progress: view.progress,
                status: &view.status,
            }),
            Self::Text => println!("[{:>3}%] {}", view.progress, view.status),
        }
    }

    /// The controller's reply to a Ctrl-C cancellation.
    pub fn cancel_requested(self, reply: &str) {
        match self {
            Self::Json => self.emit(Event::CancelRequested { reply }),
            Self::Text => println!("{reply}"),
        }
    }

    /// Final state of the run and, in text mode, its results.
    pub fn finished(self, phase: TaskPhase, view: &StatusView, results: &[ResultLocation]) {
        if self == Self::Json {
            self.emit(match phase {
                TaskPhase::Failed => Event::TaskFailed(view),
                TaskPhase::Cancelled => Event::TaskCancelled(view),
                _ => Event::TaskCompleted(view),
            });
            return;
        }

        println!("Task {}:", phase.as_str());
        if let Some(id) = &view.task_id {
            println!("  ID:        {id}");
        }
        println!("  Status:    {}", view.status);
        println!("  Progress:  {}%", view.progress);
        if let Some(duration) = view.duration {
            println!("  Duration:  {duration:.1}s");
        }
        if let Some(error) = &view.error {
            println!("  Error:     {error}");
        }
        for input in &view.processed_inputs {
            println!("  Input:     {} ({})", input.name, input.role);
        }
        for result in results {
            println!("  Result:    {} ({})", result.name, result.path.display());
        }
    }
}
