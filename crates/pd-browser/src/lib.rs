//! Browser process coordinator.
//!
//! Owns one prerender registry per profile plus the origin to process map, and
//! routes navigations, renderer events and browser-wide notifications to them.

pub mod process_map;

pub use process_map::LocalProcessAllocator;
pub use process_map::OriginKey;
pub use process_map::OriginProcessMap;
pub use process_map::ProcessGroupHandle;
pub use process_map::ProcessMapReader;
pub use process_map::ProcessMapSnapshot;
pub use process_map::SiteInstanceProvider;

use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_core::ProcessId;
use pd_core::ProfileId;
use pd_core::RouteId;
use pd_net::BrowserUrl;
use pd_prerender::AdmissionResult;
use pd_prerender::ClearFlags;
use pd_prerender::Clock;
use pd_prerender::ContentsFactory;
use pd_prerender::EventOutcome;
use pd_prerender::HostEvent;
use pd_prerender::PrerenderConfig;
use pd_prerender::PrerenderMode;
use pd_prerender::PrerenderRegistry;
use pd_prerender::PrerenderRequest;
use pd_prerender::SwapInCoordinator;
use pd_prerender::SwapResult;
use pd_prerender::SystemClock;
use pd_prerender::TabContainer;
use pd_security::AllowAllSafeBrowsing;
use pd_security::SafeBrowsingService;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Browser process top-level orchestration object.
#[derive(Debug)]
pub struct Browser {
    config: PrerenderConfig,
    clock: Arc<dyn Clock>,
    safe_browsing: Arc<dyn SafeBrowsingService>,
    profiles: BTreeMap<ProfileId, PrerenderRegistry>,
    processes: OriginProcessMap,
    swap: SwapInCoordinator,
}

/// Point-in-time counters for the shell/app layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSummary {
    pub mode: PrerenderMode,
    pub profiles: usize,
    pub resident_prerenders: usize,
    pub resident_bytes: u64,
    pub pending_prerenders: usize,
    pub site_instances: usize,
}

impl Browser {
    pub fn new(
        config: PrerenderConfig,
        processes: Box<dyn SiteInstanceProvider>,
    ) -> BrowserResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            safe_browsing: Arc::new(AllowAllSafeBrowsing),
            profiles: BTreeMap::new(),
            processes: OriginProcessMap::new(processes),
            swap: SwapInCoordinator::new(),
        })
    }

    /// Default configuration with `PIXELDUST_PRERENDER_*` overrides applied.
    pub fn from_env(processes: Box<dyn SiteInstanceProvider>) -> BrowserResult<Self> {
        Self::new(PrerenderConfig::from_env()?, processes)
    }

    /// Applies to profiles added afterwards.
    pub fn with_safe_browsing(mut self, safe_browsing: Arc<dyn SafeBrowsingService>) -> Self {
        self.safe_browsing = safe_browsing;
        self
    }

    /// Applies to profiles added afterwards.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PrerenderConfig {
        &self.config
    }

    pub fn add_profile(
        &mut self,
        profile: ProfileId,
        factory: Box<dyn ContentsFactory>,
    ) -> BrowserResult<&mut PrerenderRegistry> {
        if self.profiles.contains_key(&profile) {
            return Err(BrowserError::new(
                "browser.profile_exists",
                format!("{profile} is already open"),
            ));
        }

        let registry = PrerenderRegistry::new(profile, self.config.clone(), factory)?
            .with_clock(Arc::clone(&self.clock))
            .with_safe_browsing(Arc::clone(&self.safe_browsing));
        log::info!(
            "opened {profile} with prerendering {}",
            self.config.mode.as_str()
        );
        Ok(self.profiles.entry(profile).or_insert(registry))
    }

    /// Tears down a profile's prerenders and process bookkeeping.
    pub fn remove_profile(&mut self, profile: ProfileId) -> bool {
        let Some(mut registry) = self.profiles.remove(&profile) else {
            return false;
        };
        registry.profile_destroyed();
        let pruned = self.processes.remove_profile(profile);
        log::info!("closed {profile}; pruned {pruned} site instances");
        true
    }

    pub fn registry(&self, profile: ProfileId) -> Option<&PrerenderRegistry> {
        self.profiles.get(&profile)
    }

    pub fn registry_mut(&mut self, profile: ProfileId) -> Option<&mut PrerenderRegistry> {
        self.profiles.get_mut(&profile)
    }

    pub fn process_map(&self) -> &OriginProcessMap {
        &self.processes
    }

    pub fn process_map_mut(&mut self) -> &mut OriginProcessMap {
        &mut self.processes
    }

    pub fn prerender(
        &mut self,
        profile: ProfileId,
        request: PrerenderRequest,
    ) -> BrowserResult<AdmissionResult> {
        Ok(self.profile_mut(profile)?.admit(request))
    }

    /// Delivers an event reported by a hidden page's renderer.
    pub fn route_renderer_event(
        &mut self,
        profile: ProfileId,
        route: RouteId,
        event: HostEvent,
    ) -> BrowserResult<EventOutcome> {
        Ok(self.profile_mut(profile)?.dispatch(route, event))
    }

    /// Commits a user navigation in `tab`, swapping in a prerendered page when
    /// one matches. Anything other than [`SwapResult::Swapped`] means the
    /// embedder loads `url` normally.
    pub fn navigate_tab(
        &mut self,
        profile: ProfileId,
        tab: &mut dyn TabContainer,
        url: &BrowserUrl,
        opener: Option<&BrowserUrl>,
    ) -> BrowserResult<SwapResult> {
        let Some(registry) = self.profiles.get_mut(&profile) else {
            return Err(unknown_profile(profile));
        };

        // Recorded first so replays triggered by the swap see the page as visited.
        registry.record_navigation(url);
        let result = self.swap.try_swap_in(registry, tab, url, opener);
        if !matches!(
            result,
            SwapResult::Swapped { .. } | SwapResult::ControlGroup(_)
        ) {
            registry.mark_tab_not_prerendered(tab.id());
        }
        Ok(result)
    }

    /// Browsing data was cleared in `profile`.
    pub fn on_browsing_data_cleared(
        &mut self,
        profile: ProfileId,
        flags: ClearFlags,
    ) -> BrowserResult<()> {
        self.profile_mut(profile)?.clear_data(flags);
        Ok(())
    }

    pub fn on_app_terminating(&mut self) {
        for registry in self.profiles.values_mut() {
            registry.cancel_all();
            registry.shutdown();
        }
    }

    /// A renderer process exited. Returns how many prerenders it took down.
    pub fn on_renderer_process_exited(&mut self, process: ProcessId) -> usize {
        let cancelled = self
            .profiles
            .values_mut()
            .map(|registry| registry.renderer_process_gone(process))
            .sum();
        self.processes.on_process_exited(process);
        cancelled
    }

    /// Periodic housekeeping. Returns how many objects were destroyed.
    pub fn tick(&mut self) -> usize {
        self.profiles
            .values_mut()
            .map(PrerenderRegistry::run_cleanup)
            .sum()
    }

    /// Process group a new browsing context for `url` should join.
    pub fn resolve_process(
        &mut self,
        profile: ProfileId,
        url: &BrowserUrl,
    ) -> BrowserResult<ProcessGroupHandle> {
        if !self.profiles.contains_key(&profile) {
            return Err(unknown_profile(profile));
        }
        self.processes
            .resolve_or_create_process_group(&OriginKey::from_url(url), profile)
    }

    pub fn summary(&self) -> BrowserSummary {
        BrowserSummary {
            mode: self.config.mode,
            profiles: self.profiles.len(),
            resident_prerenders: self
                .profiles
                .values()
                .map(PrerenderRegistry::resident_count)
                .sum(),
            resident_bytes: self
                .profiles
                .values()
                .map(PrerenderRegistry::resident_bytes)
                .sum(),
            pending_prerenders: self
                .profiles
                .values()
                .map(|registry| registry.pending_queue().len())
                .sum(),
            site_instances: self.processes.site_instance_count(),
        }
    }

    fn profile_mut(&mut self, profile: ProfileId) -> BrowserResult<&mut PrerenderRegistry> {
        self.profiles
            .get_mut(&profile)
            .ok_or_else(|| unknown_profile(profile))
    }
}

fn unknown_profile(profile: ProfileId) -> BrowserError {
    BrowserError::new("browser.profile_unknown", format!("{profile} is not open"))
}
