//! Enumerates and ranks candidate conversation targets for a session.

use super::handle::{SessionHandle, ThreadRecord};
use crate::job::TargetId;
use std::time::Duration;
use tokio::time::timeout;

pub const DEFAULT_RESOLVER_LIMIT: usize = 10;
/// Threads requested from the service before ranking; services truncate in their own order.
const LISTING_WINDOW: usize = 100;
const TITLE_PARTICIPANTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub target: TargetId,
    pub title: String,
    pub participants: Vec<String>,
}

/// Stateless query over a [`SessionHandle`]: lists, ranks, and truncates targets.
#[derive(Debug, Clone, Copy)]
pub struct TargetResolver {
    limit: usize,
    timeout: Duration,
}

impl TargetResolver {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        Self {
            limit: limit.max(1),
            timeout,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns at most `limit` targets, most recently active first when the service reports
    /// activity, otherwise in listing order. Any failure yields an empty list.
    ///
    /// A wider window than `limit` is listed and ranked before truncating, so a recent thread
    /// past the service's first page is still offered.
    pub async fn resolve(&self, session: &dyn SessionHandle) -> Vec<TargetSummary> {
        let window = self.limit.max(LISTING_WINDOW);
        let records = match timeout(self.timeout, session.list_threads(window)).await {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                tracing::warn!(session = session.label(), error = %err, "failed to list targets");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    session = session.label(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "listing targets timed out"
                );
                return Vec::new();
            }
        };

        rank(records, self.limit)
    }
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVER_LIMIT, Duration::from_secs(30))
    }
}

fn rank(mut records: Vec<ThreadRecord>, limit: usize) -> Vec<TargetSummary> {
    records.retain(|record| !record.thread_id.trim().is_empty());

    if records.iter().any(|record| record.last_activity.is_some()) {
        // Stable sort keeps listing order among equal or missing timestamps.
        records.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }

    records
        .into_iter()
        .take(limit)
        .map(|record| {
            let title = display_title(&record);
            TargetSummary {
                target: TargetId::new(record.thread_id),
                title,
                participants: record.participants,
            }
        })
        .collect()
}

fn display_title(record: &ThreadRecord) -> String {
    if let Some(title) = record.title.as_deref().map(str::trim) {
        if !title.is_empty() {
            return title.to_owned();
        }
    }

    if record.participants.is_empty() {
        return record.thread_id.clone();
    }

    let mut title = record
        .participants
        .iter()
        .take(TITLE_PARTICIPANTS)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if record.participants.len() > TITLE_PARTICIPANTS {
        title.push_str("...");
    }
    title
}
