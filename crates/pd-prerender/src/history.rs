//! Bounded log of finished prerenders.

use crate::final_status::FinalStatus;
use crate::final_status::PrerenderOrigin;
use crate::host::HostId;
use pd_net::BrowserUrl;
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderHistoryEntry {
    pub host: HostId,
    pub url: BrowserUrl,
    pub final_status: FinalStatus,
    pub origin: PrerenderOrigin,
    pub ended_at: Instant,
}

#[derive(Debug)]
pub struct PrerenderHistory {
    capacity: usize,
    entries: VecDeque<PrerenderHistoryEntry>,
}

impl PrerenderHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends, dropping the oldest entry when full.
    pub fn record(&mut self, entry: PrerenderHistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &PrerenderHistoryEntry> {
        self.entries.iter()
    }

    pub fn status_of(&self, host: HostId) -> Option<FinalStatus> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.host == host)
            .map(|entry| entry.final_status)
    }

    pub fn latest_for(&self, url: &BrowserUrl) -> Option<&PrerenderHistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.url.matches_ignoring_fragment(url))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
