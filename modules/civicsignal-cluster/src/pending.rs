//! Deferred-report pool, partitioned by (category, geocell).
//!
//! Entries wait here for corroborating weight. Nothing leaves silently:
//! overflow evictions are handed back to the caller to surface as moderation
//! events.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use civicsignal_common::CivicSignalError;

use crate::cluster::Report;
use crate::geo_index::{covering_lanes, geocell, LaneKey};
use crate::similarity::SimilarityMatcher;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub report: Report,
    pub deferred_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn submission_id(&self) -> Uuid {
        self.report.submission_id
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.deferred_at
    }
}

#[derive(Debug, Clone)]
pub struct PendingPool {
    precision: usize,
    capacity: usize,
    /// Oldest entry at the front.
    cells: HashMap<LaneKey, VecDeque<PendingEntry>>,
    index: HashMap<Uuid, LaneKey>,
}

impl PendingPool {
    pub fn new(precision: usize, capacity: usize) -> Self {
        Self {
            precision,
            capacity: capacity.max(1),
            cells: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, submission_id: Uuid) -> bool {
        self.index.contains_key(&submission_id)
    }

    /// Every entry, oldest first, ties broken by submission id.
    pub fn entries(&self) -> Vec<PendingEntry> {
        let mut all: Vec<_> = self.cells.values().flatten().cloned().collect();
        oldest_first(&mut all);
        all
    }

    /// Entries filed under any of `keys`, oldest first.
    pub fn entries_in(&self, keys: &BTreeSet<LaneKey>) -> Vec<PendingEntry> {
        let mut found: Vec<_> = keys
            .iter()
            .filter_map(|key| self.cells.get(key))
            .flatten()
            .cloned()
            .collect();
        oldest_first(&mut found);
        found
    }

    /// Park a report. Returns the entry evicted to make room, if the cell was
    /// at capacity.
    pub fn insert(&mut self, report: Report, now: DateTime<Utc>) -> Result<Option<PendingEntry>, CivicSignalError> {
        if self.contains(report.submission_id) {
            return Err(CivicSignalError::InvariantViolation(format!(
                "submission {} is already pending",
                report.submission_id
            )));
        }
        let key = LaneKey::new(report.category, geocell(&report.location, self.precision)?);
        let queue = self.cells.entry(key.clone()).or_default();

        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.index.remove(&old.submission_id());
        }

        self.index.insert(report.submission_id, key);
        queue.push_back(PendingEntry {
            report,
            deferred_at: now,
        });
        Ok(evicted)
    }

    pub fn remove(&mut self, submission_id: Uuid) -> Option<PendingEntry> {
        let key = self.index.remove(&submission_id)?;
        let queue = self.cells.get_mut(&key)?;
        let pos = queue.iter().position(|e| e.submission_id() == submission_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            self.cells.remove(&key);
        }
        entry
    }

    /// Pending entries of the report's category within `radius_m` of it whose
    /// text is at least `threshold` similar. The report itself is skipped.
    /// Oldest first.
    pub fn find_corroborating(
        &self,
        report: &Report,
        radius_m: f64,
        matcher: &SimilarityMatcher,
        threshold: f64,
    ) -> Result<Vec<PendingEntry>, CivicSignalError> {
        let mut found = Vec::new();
        for key in covering_lanes(report.category, &report.location, radius_m, self.precision)? {
            let Some(queue) = self.cells.get(&key) else {
                continue;
            };
            for entry in queue {
                if entry.submission_id() == report.submission_id {
                    continue;
                }
                if entry.report.location.distance_m(&report.location) > radius_m {
                    continue;
                }
                if matcher.similarity(&report.content, &entry.report.content) >= threshold {
                    found.push(entry.clone());
                }
            }
        }
        oldest_first(&mut found);
        Ok(found)
    }
}

fn oldest_first(entries: &mut [PendingEntry]) {
    entries.sort_by(|a, b| {
        a.deferred_at
            .cmp(&b.deferred_at)
            .then(a.submission_id().cmp(&b.submission_id()))
    });
}
