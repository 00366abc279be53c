//! One hidden, fully functional page loaded ahead of navigation.

use crate::contents::PageContents;
use crate::final_status::ExperimentId;
use crate::final_status::FinalStatus;
use crate::final_status::PrerenderOrigin;
use pd_core::RouteId;
use pd_net::BrowserUrl;
use std::fmt;
use std::time::Instant;

/// URLs that deliberately crash the renderer. Never treated as aliases.
pub const CRASH_URLS: [&str; 3] = ["about:crash", "chrome://crash/", "chrome://crash"];

/// Page ids left free between the source tab's history and a prerender's own.
pub const PAGE_ID_OFFSET: i32 = 10;

/// Registry-assigned host identity. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prerender#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    PendingLoad,
    Loaded,
    Evicted,
    Used,
    Destroyed,
}

impl HostState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingLoad => "pending-load",
            Self::Loaded => "loaded",
            Self::Evicted => "evicted",
            Self::Used => "used",
            Self::Destroyed => "destroyed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::PendingLoad | Self::Loaded)
    }
}

pub fn is_crash_url(url: &BrowserUrl) -> bool {
    let bare = url.without_fragment();
    CRASH_URLS.contains(&bare.as_str())
}

/// First page id a prerender may commit, given the highest id already used
/// by the tabs it could be swapped into.
pub fn starting_page_id(max_page_id: Option<i32>) -> i32 {
    max_page_id.unwrap_or(0).max(0) + PAGE_ID_OFFSET
}

/// A prerendered page and everything known about it.
#[derive(Debug)]
pub struct PrerenderHost {
    id: HostId,
    url: BrowserUrl,
    referrer: Option<BrowserUrl>,
    origin: PrerenderOrigin,
    experiment: ExperimentId,
    state: HostState,
    alias_urls: Vec<BrowserUrl>,
    final_status: Option<FinalStatus>,
    load_count: u32,
    starting_page_id: i32,
    route: Option<RouteId>,
    contents: Option<Box<dyn PageContents>>,
    memory_bytes: u64,
    started_at: Instant,
    favicon: Option<BrowserUrl>,
}

impl PrerenderHost {
    pub fn new(
        id: HostId,
        url: BrowserUrl,
        referrer: Option<BrowserUrl>,
        origin: PrerenderOrigin,
        experiment: ExperimentId,
        started_at: Instant,
    ) -> Self {
        Self {
            id,
            alias_urls: vec![url.clone()],
            url,
            referrer,
            origin,
            experiment,
            state: HostState::PendingLoad,
            final_status: None,
            load_count: 0,
            starting_page_id: starting_page_id(None),
            route: None,
            contents: None,
            memory_bytes: 0,
            started_at,
            favicon: None,
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn url(&self) -> &BrowserUrl {
        &self.url
    }

    pub fn referrer(&self) -> Option<&BrowserUrl> {
        self.referrer.as_ref()
    }

    pub fn origin(&self) -> PrerenderOrigin {
        self.origin
    }

    pub fn experiment(&self) -> ExperimentId {
        self.experiment
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn alias_urls(&self) -> &[BrowserUrl] {
        &self.alias_urls
    }

    pub fn final_status(&self) -> Option<FinalStatus> {
        self.final_status
    }

    pub fn load_count(&self) -> u32 {
        self.load_count
    }

    pub fn starting_page_id(&self) -> i32 {
        self.starting_page_id
    }

    pub fn route(&self) -> Option<RouteId> {
        self.route
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn favicon(&self) -> Option<&BrowserUrl> {
        self.favicon.as_ref()
    }

    pub fn has_contents(&self) -> bool {
        self.contents.is_some()
    }

    pub fn contents(&self) -> Option<&dyn PageContents> {
        self.contents.as_deref()
    }

    /// Any alias equals `url` once fragments are ignored.
    pub fn matches_url(&self, url: &BrowserUrl) -> bool {
        self.alias_urls
            .iter()
            .any(|alias| alias.matches_ignoring_fragment(url))
    }

    /// Alias equal to `url` including the fragment.
    pub fn matches_url_exactly(&self, url: &BrowserUrl) -> bool {
        self.alias_urls.iter().any(|alias| alias == url)
    }

    /// Records an alias. Crash URLs are refused.
    pub fn add_alias_url(&mut self, url: BrowserUrl) -> bool {
        if is_crash_url(&url) {
            return false;
        }
        if !self.alias_urls.contains(&url) {
            self.alias_urls.push(url);
        }
        true
    }

    pub(crate) fn reserve_page_ids_after(&mut self, max_page_id: Option<i32>) {
        self.starting_page_id = starting_page_id(max_page_id);
    }

    pub(crate) fn attach(&mut self, contents: Box<dyn PageContents>) {
        self.route = Some(contents.route());
        self.contents = Some(contents);
    }

    /// The page started a new main-frame load on its own. It is not
    /// swappable again until that load stops. Returns true if it was loaded.
    pub(crate) fn mark_loading(&mut self) -> bool {
        if self.state == HostState::Loaded {
            self.state = HostState::PendingLoad;
            return true;
        }
        false
    }

    /// Counts a main-frame load stop; returns true when the host becomes loaded.
    pub(crate) fn mark_loaded(&mut self) -> bool {
        self.load_count += 1;
        if self.state == HostState::PendingLoad {
            self.state = HostState::Loaded;
            return true;
        }
        false
    }

    pub(crate) fn record_memory(&mut self, bytes: u64) {
        self.memory_bytes = bytes;
    }

    pub(crate) fn set_favicon(&mut self, url: BrowserUrl) {
        self.favicon = Some(url);
    }

    /// Moves to `USED` or `EVICTED`. Returns false if already terminal.
    pub(crate) fn finish(&mut self, status: FinalStatus) -> bool {
        if self.state.is_terminal() || self.final_status.is_some() {
            return false;
        }
        self.final_status = Some(status);
        self.state = if status == FinalStatus::Used {
            HostState::Used
        } else {
            HostState::Evicted
        };
        true
    }

    pub(crate) fn take_contents(&mut self) -> Option<Box<dyn PageContents>> {
        self.contents.take()
    }

    /// Absorbing state. Returns contents still owned by the host.
    pub(crate) fn destroy(&mut self) -> Option<Box<dyn PageContents>> {
        self.state = HostState::Destroyed;
        self.contents.take()
    }
}

#[cfg(test)]
mod tests {
    use super::HostId;
    use super::HostState;
    use super::PrerenderHost;
    use super::PAGE_ID_OFFSET;
    use super::is_crash_url;
    use super::starting_page_id;
    use crate::final_status::ExperimentId;
    use crate::final_status::FinalStatus;
    use crate::final_status::PrerenderOrigin;
    use pd_net::BrowserUrl;
    use std::time::Instant;

    fn url(input: &str) -> BrowserUrl {
        match BrowserUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn host(target: &str) -> PrerenderHost {
        PrerenderHost::new(
            HostId(1),
            url(target),
            None,
            PrerenderOrigin::LinkRelPrerender,
            ExperimentId::NONE,
            Instant::now(),
        )
    }

    #[test]
    fn new_host_is_pending_and_aliases_itself() {
        let host = host("http://a.example/page");
        assert_eq!(host.state(), HostState::PendingLoad);
        assert_eq!(host.alias_urls().len(), 1);
        assert!(host.matches_url(&url("http://a.example/page")));
    }

    #[test]
    fn load_stop_transitions_once_but_counts_every_stop() {
        let mut host = host("http://a.example/page");
        assert!(host.mark_loaded());
        assert!(!host.mark_loaded());
        assert_eq!(host.state(), HostState::Loaded);
        assert_eq!(host.load_count(), 2);
    }

    #[test]
    fn script_navigation_returns_a_loaded_host_to_pending_load() {
        let mut host = host("http://a.example/page");
        assert!(!host.mark_loading());

        assert!(host.mark_loaded());
        assert!(host.mark_loading());
        assert_eq!(host.state(), HostState::PendingLoad);

        assert!(host.mark_loaded());
        assert_eq!(host.state(), HostState::Loaded);
        assert_eq!(host.load_count(), 2);
    }

    #[test]
    fn page_ids_start_past_the_highest_known_id() {
        assert_eq!(starting_page_id(None), PAGE_ID_OFFSET);
        assert_eq!(starting_page_id(Some(-1)), PAGE_ID_OFFSET);
        assert_eq!(starting_page_id(Some(25)), 25 + PAGE_ID_OFFSET);

        let mut host = host("http://a.example/page");
        assert_eq!(host.starting_page_id(), PAGE_ID_OFFSET);
        host.reserve_page_ids_after(Some(4));
        assert_eq!(host.starting_page_id(), 4 + PAGE_ID_OFFSET);
    }

    #[test]
    fn final_status_is_immutable() {
        let mut host = host("http://a.example/page");
        assert!(host.finish(FinalStatus::JavascriptAlert));
        assert!(!host.finish(FinalStatus::Used));
        assert_eq!(host.final_status(), Some(FinalStatus::JavascriptAlert));
        assert_eq!(host.state(), HostState::Evicted);
    }

    #[test]
    fn used_status_moves_to_used_state() {
        let mut host = host("http://a.example/page");
        assert!(host.mark_loaded());
        assert!(host.finish(FinalStatus::Used));
        assert_eq!(host.state(), HostState::Used);
        assert!(host.destroy().is_none());
        assert_eq!(host.state(), HostState::Destroyed);
    }

    #[test]
    fn fragment_is_ignored_for_matching_but_not_exact_matching() {
        let host = host("http://a.example/page");
        let with_fragment = url("http://a.example/page#fragment");
        assert!(host.matches_url(&with_fragment));
        assert!(!host.matches_url_exactly(&with_fragment));
    }

    #[test]
    fn crash_urls_are_never_aliases() {
        let mut host = host("http://a.example/page");
        let crash = url("about:crash");
        assert!(is_crash_url(&crash));
        assert!(!host.add_alias_url(crash));
        assert!(host.add_alias_url(url("http://a.example/next")));
        assert_eq!(host.alias_urls().len(), 2);
    }
}
