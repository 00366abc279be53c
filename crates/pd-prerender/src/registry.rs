//! Central authority over resident prerenders and their cancellation policy.

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::PrerenderConfig;
use crate::config::PrerenderMode;
use crate::contents::ContentsFactory;
use crate::contents::PageContents;
use crate::event::Disposition;
use crate::event::HostEvent;
use crate::final_status::ExperimentId;
use crate::final_status::FinalStatus;
use crate::final_status::PrerenderOrigin;
use crate::history::PrerenderHistory;
use crate::history::PrerenderHistoryEntry;
use crate::host::HostId;
use crate::host::HostState;
use crate::host::PrerenderHost;
use crate::host::is_crash_url;
use crate::pending::PendingPrerender;
use crate::pending::PendingPrerenderQueue;
use crate::tracker::PrerenderTracker;
use pd_core::BrowserResult;
use pd_core::ProcessId;
use pd_core::ProfileId;
use pd_core::RouteId;
use pd_core::TabId;
use pd_net::BrowserUrl;
use pd_security::AllowAllSafeBrowsing;
use pd_security::SafeBrowsingService;
use pd_security::UrlCheck;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A request to prerender one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderRequest {
    pub url: BrowserUrl,
    pub referrer: Option<BrowserUrl>,
    pub origin: PrerenderOrigin,
    pub experiment: ExperimentId,
    /// Renderer route that issued the request, when page content asked for it.
    pub source_route: Option<RouteId>,
    /// Highest page id committed by the tabs the page may be swapped into.
    pub max_page_id: Option<i32>,
}

impl PrerenderRequest {
    pub fn new(url: BrowserUrl, origin: PrerenderOrigin) -> Self {
        Self {
            url,
            referrer: None,
            origin,
            experiment: ExperimentId::NONE,
            source_route: None,
            max_page_id: None,
        }
    }

    pub fn with_referrer(mut self, referrer: BrowserUrl) -> Self {
        self.referrer = Some(referrer);
        self
    }

    pub fn with_experiment(mut self, experiment: ExperimentId) -> Self {
        self.experiment = experiment;
        self
    }

    pub fn from_route(mut self, route: RouteId) -> Self {
        self.source_route = Some(route);
        self
    }

    pub fn with_max_page_id(mut self, max_page_id: i32) -> Self {
        self.max_page_id = Some(max_page_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionResult {
    Admitted(HostId),
    /// Queued until the issuing prerender resolves.
    Deferred { issuing: HostId },
    /// The URL is already being prerendered by this host.
    Duplicate(HostId),
    Rejected(FinalStatus),
    Disabled,
}

impl AdmissionResult {
    pub fn host(self) -> Option<HostId> {
        match self {
            Self::Admitted(host) | Self::Duplicate(host) => Some(host),
            Self::Deferred { .. } | Self::Rejected(_) | Self::Disabled => None,
        }
    }

    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

/// Result of routing one event to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    UnknownRoute,
    Ignored,
    Loaded(HostId),
    Updated(HostId),
    Cancelled { host: HostId, status: FinalStatus },
}

/// Which browsing data the user cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClearFlags {
    pub cache: bool,
    pub history: bool,
}

impl ClearFlags {
    pub const CACHE: Self = Self {
        cache: true,
        history: false,
    };
    pub const HISTORY: Self = Self {
        cache: false,
        history: true,
    };
    pub const ALL: Self = Self {
        cache: true,
        history: true,
    };

    pub fn is_empty(self) -> bool {
        !self.cache && !self.history
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostChange {
    Admitted,
    Loaded,
    Finished(FinalStatus),
    Swapped(TabId),
}

/// Notified after the registry has applied a change, never during it.
pub trait RegistryObserver {
    fn on_host_changed(&mut self, registry: &PrerenderRegistry, host: HostId, change: HostChange);
}

/// Owns every prerender of one profile.
///
/// Hosts live in an arena keyed by [`HostId`]; everything else refers to them by
/// id. Finished hosts are kept in a pending-delete list until
/// [`PrerenderRegistry::run_cleanup`] sweeps them, and observers run only once
/// the registry is consistent again.
pub struct PrerenderRegistry {
    profile: ProfileId,
    config: PrerenderConfig,
    clock: Arc<dyn Clock>,
    factory: Box<dyn ContentsFactory>,
    safe_browsing: Arc<dyn SafeBrowsingService>,
    tracker: Arc<PrerenderTracker>,
    next_host_id: u64,
    hosts: HashMap<HostId, PrerenderHost>,
    /// Resident hosts in admission order.
    active: VecDeque<HostId>,
    pending: PendingPrerenderQueue,
    pending_delete: Vec<PrerenderHost>,
    old_contents: Vec<Box<dyn PageContents>>,
    history: PrerenderHistory,
    navigations: VecDeque<(BrowserUrl, Instant)>,
    last_prerender_start: Option<Instant>,
    prerendered_tabs: HashSet<TabId>,
    would_be_prerendered_tabs: HashSet<TabId>,
    observers: Vec<Box<dyn RegistryObserver>>,
    notifications: Vec<(HostId, HostChange)>,
    replays: VecDeque<HostId>,
    shut_down: bool,
}

impl fmt::Debug for PrerenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerenderRegistry")
            .field("profile", &self.profile)
            .field("config", &self.config)
            .field("active", &self.active)
            .field("pending", &self.pending)
            .field("pending_delete", &self.pending_delete.len())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl PrerenderRegistry {
    pub fn new(
        profile: ProfileId,
        config: PrerenderConfig,
        factory: Box<dyn ContentsFactory>,
    ) -> BrowserResult<Self> {
        config.validate()?;

        Ok(Self {
            profile,
            history: PrerenderHistory::new(config.history_length),
            config,
            clock: Arc::new(SystemClock),
            factory,
            safe_browsing: Arc::new(AllowAllSafeBrowsing),
            tracker: Arc::new(PrerenderTracker::new()),
            next_host_id: 1,
            hosts: HashMap::new(),
            active: VecDeque::new(),
            pending: PendingPrerenderQueue::new(),
            pending_delete: Vec::new(),
            old_contents: Vec::new(),
            navigations: VecDeque::new(),
            last_prerender_start: None,
            prerendered_tabs: HashSet::new(),
            would_be_prerendered_tabs: HashSet::new(),
            observers: Vec::new(),
            notifications: Vec::new(),
            replays: VecDeque::new(),
            shut_down: false,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_safe_browsing(mut self, safe_browsing: Arc<dyn SafeBrowsingService>) -> Self {
        self.safe_browsing = safe_browsing;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<PrerenderTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    pub fn config(&self) -> &PrerenderConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<PrerenderTracker> {
        &self.tracker
    }

    pub fn history(&self) -> &PrerenderHistory {
        &self.history
    }

    pub fn pending_queue(&self) -> &PendingPrerenderQueue {
        &self.pending
    }

    pub fn host(&self, id: HostId) -> Option<&PrerenderHost> {
        self.hosts.get(&id)
    }

    /// Resident hosts, oldest first.
    pub fn active_hosts(&self) -> impl Iterator<Item = &PrerenderHost> {
        self.active.iter().filter_map(|id| self.hosts.get(id))
    }

    pub fn resident_count(&self) -> usize {
        self.active.len()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.active_hosts().map(PrerenderHost::memory_bytes).sum()
    }

    pub fn pending_delete_count(&self) -> usize {
        self.pending_delete.len() + self.old_contents.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Final status of a host that is resident, awaiting deletion, or still in history.
    pub fn final_status(&self, id: HostId) -> Option<FinalStatus> {
        if let Some(host) = self.hosts.get(&id) {
            return host.final_status();
        }
        if let Some(host) = self.pending_delete.iter().find(|host| host.id() == id) {
            return host.final_status();
        }
        self.history.status_of(id)
    }

    pub fn add_link_rel_prerender(
        &mut self,
        source_route: Option<RouteId>,
        url: BrowserUrl,
        referrer: Option<BrowserUrl>,
    ) -> AdmissionResult {
        let mut request = PrerenderRequest::new(url, PrerenderOrigin::LinkRelPrerender);
        request.referrer = referrer;
        request.source_route = source_route;
        self.admit(request)
    }

    pub fn add_omnibox_prerender(&mut self, url: BrowserUrl, conservative: bool) -> AdmissionResult {
        let origin = if conservative {
            PrerenderOrigin::OmniboxConservative
        } else {
            PrerenderOrigin::OmniboxOriginal
        };
        self.admit(PrerenderRequest::new(url, origin))
    }

    pub fn add_instant_prerender(&mut self, url: BrowserUrl) -> AdmissionResult {
        self.admit(PrerenderRequest::new(url, PrerenderOrigin::Instant))
    }

    /// Admits a prerender, evicting the oldest resident when the cap is reached.
    pub fn admit(&mut self, request: PrerenderRequest) -> AdmissionResult {
        let result = self.admit_inner(request, false);
        self.settle();
        result
    }

    pub fn find_entry(&self, url: &BrowserUrl) -> Option<&PrerenderHost> {
        self.active_hosts().find(|host| host.matches_url(url))
    }

    pub fn find_entry_id(&self, url: &BrowserUrl) -> Option<HostId> {
        self.find_entry(url).map(PrerenderHost::id)
    }

    /// Like [`Self::find_entry`], skipping the host rendering `tab_route`.
    pub fn find_entry_for_tab(
        &self,
        url: &BrowserUrl,
        tab_route: Option<RouteId>,
    ) -> Option<&PrerenderHost> {
        self.active_hosts().find(|host| {
            host.matches_url(url) && tab_route.is_none_or(|owner| host.route() != Some(owner))
        })
    }

    pub fn is_pending_entry(&self, url: &BrowserUrl) -> bool {
        self.pending.is_pending_url(url)
    }

    /// Finishes a resident host. Returns false if it had already finished.
    pub fn cancel(&mut self, id: HostId, status: FinalStatus) -> bool {
        let finished = self.finish_host(id, status).is_some();
        self.settle();
        finished
    }

    /// Tears down every resident host as the application exits.
    pub fn cancel_all(&mut self) {
        log::info!(
            "cancelling {} prerenders for {}",
            self.active.len(),
            self.profile
        );
        let ids: Vec<HostId> = self.active.iter().copied().collect();
        for id in ids {
            let process_alive = self
                .hosts
                .get(&id)
                .and_then(PrerenderHost::contents)
                .is_none_or(|contents| contents.process_alive());
            let status = if process_alive {
                FinalStatus::AppTerminating
            } else {
                FinalStatus::RendererCrashed
            };
            self.finish_host(id, status);
        }
        self.pending.clear();
        self.settle();
    }

    /// Cancels every resident host on user request.
    pub fn cancel_all_prerenders(&mut self) -> usize {
        let cancelled = self.finish_all(FinalStatus::Cancelled);
        self.settle();
        cancelled
    }

    pub fn shutdown(&mut self) {
        log::info!("shutting down prerendering for {}", self.profile);
        self.finish_all(FinalStatus::ManagerShutdown);
        self.pending.clear();
        self.shut_down = true;
        self.sweep();
        self.settle();
    }

    pub fn profile_destroyed(&mut self) {
        log::info!("{} destroyed; dropping its prerenders", self.profile);
        self.finish_all(FinalStatus::ProfileDestroyed);
        self.pending.clear();
        self.shut_down = true;
        self.sweep();
        self.settle();
    }

    /// History or cache was cleared: nothing prerendered may survive.
    pub fn clear_data(&mut self, flags: ClearFlags) {
        if flags.is_empty() {
            return;
        }
        log::info!(
            "browsing data cleared (cache={}, history={}) for {}",
            flags.cache,
            flags.history,
            self.profile
        );
        self.finish_all(FinalStatus::CacheOrHistoryCleared);
        if flags.history {
            self.history.clear();
            self.navigations.clear();
        }
        self.settle();
    }

    /// Cancels hosts whose renderer process exited.
    pub fn renderer_process_gone(&mut self, process: ProcessId) -> usize {
        let ids: Vec<HostId> = self
            .active_hosts()
            .filter(|host| host.route().is_some_and(|route| route.process == process))
            .map(PrerenderHost::id)
            .collect();
        for id in &ids {
            self.finish_host(*id, FinalStatus::RendererCrashed);
        }
        self.settle();
        ids.len()
    }

    /// Routes one event from a hidden page to its host.
    pub fn dispatch(&mut self, route: RouteId, event: HostEvent) -> EventOutcome {
        let Some(id) = self.host_for_route(route) else {
            log::debug!("ignoring {} from unknown route {route}", event.name());
            return EventOutcome::UnknownRoute;
        };
        let outcome = self.apply_event(id, event);
        self.settle();
        outcome
    }

    /// Adds `url` to the host's alias set, cancelling the host if the URL may
    /// not be prerendered. Returns whether the alias was recorded.
    pub fn add_alias_url(&mut self, id: HostId, url: BrowserUrl) -> bool {
        let added = self.add_alias_inner(id, url);
        self.settle();
        added
    }

    /// Replays requests queued by a host that has already finished.
    pub fn drain_pending(&mut self, issuing: HostId) -> Vec<AdmissionResult> {
        if self.hosts.contains_key(&issuing) {
            return Vec::new();
        }
        let results = self.replay_pending(issuing);
        self.settle();
        results
    }

    pub fn record_navigation(&mut self, url: &BrowserUrl) {
        let now = self.clock.now();
        let window = self.config.navigation_record_window;
        while self
            .navigations
            .front()
            .is_some_and(|(_, at)| now.duration_since(*at) >= window)
        {
            self.navigations.pop_front();
        }
        self.navigations.push_back((url.without_fragment(), now));
    }

    pub fn has_recently_been_navigated_to(&self, url: &BrowserUrl) -> bool {
        let now = self.clock.now();
        self.navigations.iter().any(|(visited, at)| {
            now.duration_since(*at) < self.config.navigation_record_window
                && visited.matches_ignoring_fragment(url)
        })
    }

    /// Applies cancellations decided off-thread, expires old hosts and
    /// destroys everything awaiting deletion. Returns how many objects were
    /// destroyed.
    pub fn run_cleanup(&mut self) -> usize {
        self.sync_tracker();
        self.evict_expired();
        let swept = self.sweep();
        self.settle();
        swept
    }

    pub fn mark_tab_prerendered(&mut self, tab: TabId) {
        self.prerendered_tabs.insert(tab);
    }

    pub fn mark_tab_would_be_prerendered(&mut self, tab: TabId) {
        self.would_be_prerendered_tabs.insert(tab);
    }

    pub fn mark_tab_not_prerendered(&mut self, tab: TabId) {
        self.prerendered_tabs.remove(&tab);
        self.would_be_prerendered_tabs.remove(&tab);
    }

    pub fn is_tab_prerendered(&self, tab: TabId) -> bool {
        self.prerendered_tabs.contains(&tab)
    }

    pub fn would_tab_have_been_prerendered(&self, tab: TabId) -> bool {
        self.would_be_prerendered_tabs.contains(&tab)
    }

    pub(crate) fn evict_expired(&mut self) {
        let now = self.clock.now();
        let max_age = self.config.max_age;
        let expired: Vec<HostId> = self
            .active_hosts()
            .filter(|host| now.duration_since(host.started_at()) > max_age)
            .map(PrerenderHost::id)
            .collect();
        for id in expired {
            self.finish_host(id, FinalStatus::TimedOut);
        }
    }

    /// Marks the host used and hands its contents to the caller.
    pub(crate) fn commit_swap(&mut self, id: HostId, tab: TabId) -> Option<Box<dyn PageContents>> {
        self.finish_host(id, FinalStatus::Used)?;
        let contents = self
            .pending_delete
            .iter_mut()
            .rev()
            .find(|host| host.id() == id)
            .and_then(PrerenderHost::take_contents);
        self.mark_tab_prerendered(tab);
        self.notifications.push((id, HostChange::Swapped(tab)));
        contents
    }

    /// Keeps contents replaced by a swap alive until the next cleanup.
    pub(crate) fn retire_contents(&mut self, contents: Box<dyn PageContents>) {
        self.old_contents.push(contents);
    }

    /// Replays queued requests, then notifies observers.
    pub(crate) fn settle(&mut self) {
        while let Some(issuing) = self.replays.pop_front() {
            self.replay_pending(issuing);
        }
        self.flush_notifications();
    }

    fn admit_inner(&mut self, request: PrerenderRequest, replay: bool) -> AdmissionResult {
        if self.shut_down || self.config.mode == PrerenderMode::Disabled {
            return AdmissionResult::Disabled;
        }

        if let Some(route) = request.source_route {
            if let Some(result) = self.defer_from_route(route, &request) {
                return result;
            }
        }

        let scheme = request.url.scheme();
        if !scheme.is_http_family() {
            return reject(&request.url, FinalStatus::UnsupportedScheme);
        }
        if scheme.is_secure() && !self.config.https_allowed {
            return reject(&request.url, FinalStatus::Https);
        }

        self.evict_expired();

        if let Some(existing) = self.find_entry_id(&request.url) {
            log::debug!("{} is already prerendered by {existing}", request.url);
            return AdmissionResult::Duplicate(existing);
        }

        if self.has_recently_been_navigated_to(&request.url) {
            return reject(&request.url, FinalStatus::RecentlyVisited);
        }

        let now = self.clock.now();
        if !replay && self.config.rate_limit_enabled {
            let too_soon = self.last_prerender_start.is_some_and(|last| {
                now.duration_since(last) < self.config.min_time_between_prerenders
            });
            if too_soon {
                return reject(&request.url, FinalStatus::RateLimitExceeded);
            }
        }

        if self.resident_bytes() >= self.config.max_resident_bytes {
            return reject(&request.url, FinalStatus::MemoryLimitExceeded);
        }

        let verdict = self.safe_browsing.check_url(&request.url);
        if matches!(verdict, UrlCheck::Complete(verdict) if verdict.is_threat()) {
            return reject(&request.url, FinalStatus::SafeBrowsing);
        }

        let contents = if self.config.mode == PrerenderMode::ControlGroup {
            None
        } else {
            match self.factory.create_contents(self.profile, &request.url) {
                Ok(contents) => Some(contents),
                Err(error) => {
                    log::warn!("failed to create prerender contents for {}: {error}", request.url);
                    return AdmissionResult::Rejected(FinalStatus::Cancelled);
                }
            }
        };

        while self.active.len() >= self.config.max_elements {
            let Some(oldest) = self.active.front().copied() else {
                break;
            };
            self.finish_host(oldest, FinalStatus::Evicted);
        }

        let id = HostId(self.next_host_id);
        self.next_host_id += 1;

        let max_page_id = request.max_page_id;
        let mut host = PrerenderHost::new(
            id,
            request.url,
            request.referrer,
            request.origin,
            request.experiment,
            now,
        );
        host.reserve_page_ids_after(max_page_id);
        if let Some(mut contents) = contents {
            contents.set_prerendering(true);
            contents.navigate(host.url(), host.referrer());
            self.tracker.on_prerender_started(contents.route(), host.url());
            host.attach(contents);
        }

        log::debug!(
            "admitted {id} for {} via {} (experiment {})",
            host.url(),
            host.origin().as_str(),
            host.experiment().0
        );
        self.last_prerender_start = Some(now);
        self.active.push_back(id);
        self.hosts.insert(id, host);
        self.notifications.push((id, HostChange::Admitted));
        AdmissionResult::Admitted(id)
    }

    /// Queues requests coming from a page that is itself prerendering.
    fn defer_from_route(
        &mut self,
        route: RouteId,
        request: &PrerenderRequest,
    ) -> Option<AdmissionResult> {
        if let Some(issuing) = self.host_for_route(route) {
            let state = self
                .hosts
                .get(&issuing)
                .map_or(HostState::Destroyed, PrerenderHost::state);
            let pending = PendingPrerender {
                origin: request.origin,
                url: request.url.clone(),
                referrer: request.referrer.clone(),
                experiment: request.experiment,
                max_page_id: request.max_page_id,
            };
            if self.pending.enqueue(issuing, state, pending) {
                log::debug!(
                    "deferred {} until {issuing} resolves ({} queued)",
                    request.url,
                    self.pending.pending_for(issuing).count()
                );
                return Some(AdmissionResult::Deferred { issuing });
            }
        }

        // A cancelled issuer takes its requests down with it; a used one is now
        // an ordinary page.
        self.pending_delete
            .iter()
            .find(|host| host.route() == Some(route) && host.state() != HostState::Used)
            .map(|host| {
                AdmissionResult::Rejected(host.final_status().unwrap_or(FinalStatus::Cancelled))
            })
    }

    fn host_for_route(&self, route: RouteId) -> Option<HostId> {
        self.active_hosts()
            .find(|host| host.route() == Some(route))
            .map(PrerenderHost::id)
    }

    fn apply_event(&mut self, id: HostId, event: HostEvent) -> EventOutcome {
        let Some(host) = self.hosts.get(&id) else {
            return EventOutcome::UnknownRoute;
        };

        match event.classify(host.url()) {
            Disposition::Ignore => EventOutcome::Ignored,
            Disposition::Loaded => {
                if let Some(host) = self.hosts.get_mut(&id) {
                    if host.mark_loaded() {
                        log::debug!("{id} finished loading {}", host.url());
                        self.notifications.push((id, HostChange::Loaded));
                    }
                }
                EventOutcome::Loaded(id)
            }
            Disposition::Cancel(status) => self.cancelled(id, status),
            Disposition::AddAlias(url) => self.aliased(id, url, false),
            Disposition::Navigate(url) => self.aliased(id, url, true),
            Disposition::MemoryReport(bytes) => self.apply_memory(id, bytes),
            Disposition::Favicon(url) => {
                if let Some(host) = self.hosts.get_mut(&id) {
                    host.set_favicon(url);
                }
                EventOutcome::Updated(id)
            }
        }
    }

    /// Records `url` as an alias. A self-initiated navigation also makes the
    /// host wait for the next load stop before it can be swapped in.
    fn aliased(&mut self, id: HostId, url: BrowserUrl, restarts_load: bool) -> EventOutcome {
        if !self.add_alias_inner(id, url) {
            return match self.hosts.get(&id) {
                Some(_) => EventOutcome::Ignored,
                None => EventOutcome::Cancelled {
                    host: id,
                    status: self.final_status(id).unwrap_or(FinalStatus::Cancelled),
                },
            };
        }
        if restarts_load {
            if let Some(host) = self.hosts.get_mut(&id) {
                if host.mark_loading() {
                    log::debug!("{id} is loading {} again", host.url());
                }
            }
        }
        EventOutcome::Updated(id)
    }

    fn cancelled(&mut self, id: HostId, status: FinalStatus) -> EventOutcome {
        match self.finish_host(id, status) {
            Some(status) => EventOutcome::Cancelled { host: id, status },
            None => EventOutcome::Ignored,
        }
    }

    fn apply_memory(&mut self, id: HostId, bytes: u64) -> EventOutcome {
        if let Some(host) = self.hosts.get_mut(&id) {
            host.record_memory(bytes);
        }
        if bytes > self.config.max_bytes {
            log::debug!("{id} uses {bytes} bytes, over the per-prerender limit");
            return self.cancelled(id, FinalStatus::MemoryLimitExceeded);
        }
        if self.resident_bytes() > self.config.max_resident_bytes {
            log::debug!("{id} pushed resident prerender memory over the ceiling");
            return self.cancelled(id, FinalStatus::MemoryLimitExceeded);
        }
        EventOutcome::Updated(id)
    }

    fn add_alias_inner(&mut self, id: HostId, url: BrowserUrl) -> bool {
        let Some(host) = self.hosts.get(&id) else {
            return false;
        };
        let host_url = host.url().clone();

        if is_crash_url(&url) {
            log::debug!("{id} navigated to a crash URL; not aliasing");
            return false;
        }

        let scheme = url.scheme();
        if !scheme.is_http_family() {
            self.finish_host(id, FinalStatus::UnsupportedScheme);
            return false;
        }
        if scheme.is_secure() && (!self.config.https_allowed || !host_url.is_secure()) {
            self.finish_host(id, FinalStatus::Https);
            return false;
        }
        if !url.same_origin(&host_url) {
            log::debug!("{id} left {} for {url}; not aliasing", host_url.origin());
            return false;
        }
        if self.has_recently_been_navigated_to(&url) {
            self.finish_host(id, FinalStatus::RecentlyVisited);
            return false;
        }

        let Some(host) = self.hosts.get_mut(&id) else {
            return false;
        };
        let known = host.alias_urls().contains(&url);
        if !host.add_alias_url(url.clone()) {
            return false;
        }
        if let Some(route) = host.route().filter(|_| !known) {
            log::debug!("{id} on {route} is also prerendering {url}");
            self.tracker.add_prerender_url(&url);
        }
        true
    }

    /// Moves a resident host to its terminal state. `None` if it was not resident.
    fn finish_host(&mut self, id: HostId, status: FinalStatus) -> Option<FinalStatus> {
        self.active.retain(|active| *active != id);
        let mut host = self.hosts.remove(&id)?;

        // The network layer may have cancelled the route first; its status wins.
        let status = match host.route() {
            Some(route) if status != FinalStatus::Used => {
                self.tracker.try_cancel(route, status);
                match self.tracker.final_status(route) {
                    Some(FinalStatus::Used) | None => status,
                    Some(won) => won,
                }
            }
            _ => status,
        };

        if !host.finish(status) {
            return None;
        }
        log::debug!("{id} for {} finished: {status}", host.url());

        self.history.record(PrerenderHistoryEntry {
            host: id,
            url: host.url().clone(),
            final_status: status,
            origin: host.origin(),
            ended_at: self.clock.now(),
        });

        if status.replays_pending() {
            self.replays.push_back(id);
        } else {
            let dropped = self.pending.discard(id);
            if dropped > 0 {
                log::debug!("dropped {dropped} pending prerenders of {id}");
            }
        }

        self.pending_delete.push(host);
        self.notifications.push((id, HostChange::Finished(status)));
        Some(status)
    }

    fn finish_all(&mut self, status: FinalStatus) -> usize {
        let ids: Vec<HostId> = self.active.iter().copied().collect();
        ids.into_iter()
            .filter(|id| self.finish_host(*id, status).is_some())
            .count()
    }

    /// Replays an issuer's queue. Siblings compete: each admitted sibling
    /// evicts the one admitted before it.
    fn replay_pending(&mut self, issuing: HostId) -> Vec<AdmissionResult> {
        let requests = self.pending.take(issuing);
        if requests.is_empty() {
            return Vec::new();
        }
        log::debug!("replaying {} pending prerenders of {issuing}", requests.len());

        let mut results = Vec::with_capacity(requests.len());
        let mut sibling: Option<HostId> = None;
        for pending in requests {
            let request = PrerenderRequest {
                url: pending.url,
                referrer: pending.referrer,
                origin: pending.origin,
                experiment: pending.experiment,
                source_route: None,
                max_page_id: pending.max_page_id,
            };
            let result = self.admit_inner(request, true);
            if let AdmissionResult::Admitted(admitted) = result {
                if let Some(previous) = sibling.replace(admitted) {
                    self.finish_host(previous, FinalStatus::Evicted);
                }
            }
            results.push(result);
        }
        results
    }

    fn sync_tracker(&mut self) {
        let cancelled: Vec<(HostId, FinalStatus)> = self
            .active_hosts()
            .filter_map(|host| {
                let status = self.tracker.final_status(host.route()?)?;
                (status != FinalStatus::Used).then_some((host.id(), status))
            })
            .collect();
        for (id, status) in cancelled {
            self.finish_host(id, status);
        }
    }

    fn sweep(&mut self) -> usize {
        let mut swept = 0;
        for mut host in self.pending_delete.drain(..) {
            if let Some(route) = host.route() {
                self.tracker.on_prerender_stopped(route, host.alias_urls());
            }
            if let Some(mut contents) = host.destroy() {
                contents.detach_from_container();
            }
            swept += 1;
        }
        swept += self.old_contents.len();
        self.old_contents.clear();
        swept
    }

    fn flush_notifications(&mut self) {
        if self.observers.is_empty() {
            self.notifications.clear();
            return;
        }
        let notifications = std::mem::take(&mut self.notifications);
        let mut observers = std::mem::take(&mut self.observers);
        for (host, change) in notifications {
            for observer in &mut observers {
                observer.on_host_changed(self, host, change);
            }
        }
        self.observers = observers;
    }
}

fn reject(url: &BrowserUrl, status: FinalStatus) -> AdmissionResult {
    log::debug!("not prerendering {url}: {status}");
    AdmissionResult::Rejected(status)
}
