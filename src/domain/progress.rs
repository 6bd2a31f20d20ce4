use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStage {
    Planning,
    Scraping,
    Enriching,
    Classifying,
    Persisting,
    Reporting,
    Done,
    Cancelled,
}

impl RunStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Done | RunStage::Cancelled)
    }

    /// Next stage of a run that was not cancelled.
    pub fn next(&self) -> RunStage {
        match self {
            RunStage::Planning => RunStage::Scraping,
            RunStage::Scraping => RunStage::Enriching,
            RunStage::Enriching => RunStage::Classifying,
            RunStage::Classifying => RunStage::Persisting,
            RunStage::Persisting => RunStage::Reporting,
            RunStage::Reporting => RunStage::Done,
            RunStage::Done => RunStage::Done,
            RunStage::Cancelled => RunStage::Cancelled,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: RunStage,
    pub items_done: usize,
    pub items_total: usize,
    pub current_item: Option<String>,
    pub failure_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunSummary {
    pub total_leads: usize,
    pub new_leads: usize,
    pub failed_tasks: usize,
    pub failed_enrichments: usize,
    pub listings_scraped: usize,
    pub known_skipped: usize,
    pub parse_failures: usize,
    pub persistence_failures: usize,
    pub emails_found: usize,
    pub social_found: usize,
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn failure_count(&self) -> usize {
        self.failed_tasks + self.failed_enrichments + self.parse_failures + self.persistence_failures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunEvent {
    Progress(ProgressEvent),
    TaskFailed { task: String, attempts: u32, reason: String },
    Fatal(String),
    Summary(RunSummary),
}

#[cfg(test)]
mod tests {
    use super::RunStage;

    #[test]
    fn stages_advance_in_order_until_done() {
        let mut stage = RunStage::Planning;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            seen.push(stage);
        }

        assert_eq!(
            seen,
            vec![
                RunStage::Planning,
                RunStage::Scraping,
                RunStage::Enriching,
                RunStage::Classifying,
                RunStage::Persisting,
                RunStage::Reporting,
                RunStage::Done,
            ]
        );
        assert_eq!(RunStage::Cancelled.next(), RunStage::Cancelled);
    }
}
