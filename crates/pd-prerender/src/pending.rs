//! Prerender requests issued by pages that are themselves still prerendering.

use crate::final_status::ExperimentId;
use crate::final_status::PrerenderOrigin;
use crate::host::HostId;
use crate::host::HostState;
use pd_net::BrowserUrl;
use std::collections::HashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrerender {
    pub origin: PrerenderOrigin,
    pub url: BrowserUrl,
    pub referrer: Option<BrowserUrl>,
    pub experiment: ExperimentId,
    pub max_page_id: Option<i32>,
}

/// FIFO lists of deferred requests, keyed by the host that issued them.
#[derive(Debug, Default)]
pub struct PendingPrerenderQueue {
    entries: HashMap<HostId, VecDeque<PendingPrerender>>,
}

impl PendingPrerenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the issuer's list. No-op once the issuer is terminal.
    pub fn enqueue(
        &mut self,
        issuing: HostId,
        issuing_state: HostState,
        request: PendingPrerender,
    ) -> bool {
        if issuing_state.is_terminal() {
            return false;
        }
        self.entries.entry(issuing).or_default().push_back(request);
        true
    }

    /// Removes and returns the issuer's list in FIFO order.
    pub fn take(&mut self, issuing: HostId) -> VecDeque<PendingPrerender> {
        self.entries.remove(&issuing).unwrap_or_default()
    }

    /// Drops the issuer's list without replaying it.
    pub fn discard(&mut self, issuing: HostId) -> usize {
        self.entries.remove(&issuing).map_or(0, |list| list.len())
    }

    pub fn pending_for(&self, issuing: HostId) -> impl Iterator<Item = &PendingPrerender> {
        self.entries.get(&issuing).into_iter().flatten()
    }

    pub fn is_pending_url(&self, url: &BrowserUrl) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|pending| pending.url.matches_ignoring_fragment(url))
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(VecDeque::is_empty)
    }
}
