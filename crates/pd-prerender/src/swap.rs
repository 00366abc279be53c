//! Hands a loaded prerender to the tab that navigates to it.

use crate::config::PrerenderMode;
use crate::contents::TabContainer;
use crate::final_status::FinalStatus;
use crate::host::HostId;
use crate::host::HostState;
use crate::registry::PrerenderRegistry;
use pd_net::BrowserUrl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapResult {
    /// The tab now shows the prerendered page.
    Swapped {
        host: HostId,
        favicon: Option<BrowserUrl>,
    },
    NoMatch,
    /// Still loading; left resident and the tab untouched.
    NotReady(HostId),
    /// The match was discarded and the navigation proceeds normally.
    Cancelled { host: HostId, status: FinalStatus },
    /// Control-group match: the tab is only marked as would-be prerendered.
    ControlGroup(HostId),
}

impl SwapResult {
    pub fn is_swapped(&self) -> bool {
        matches!(self, Self::Swapped { .. })
    }
}

/// Performs swap-in. Every check runs before the tab is touched, so a failed
/// swap leaves it exactly as it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapInCoordinator;

impl SwapInCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Tries to satisfy a navigation of `tab` to `url` from a prerender.
    /// `opener` is the URL of the page that opened the tab, if any.
    pub fn try_swap_in(
        &self,
        registry: &mut PrerenderRegistry,
        tab: &mut dyn TabContainer,
        url: &BrowserUrl,
        opener: Option<&BrowserUrl>,
    ) -> SwapResult {
        let result = self.swap(registry, tab, url, opener);
        registry.settle();
        result
    }

    fn swap(
        &self,
        registry: &mut PrerenderRegistry,
        tab: &mut dyn TabContainer,
        url: &BrowserUrl,
        opener: Option<&BrowserUrl>,
    ) -> SwapResult {
        registry.evict_expired();

        // A hidden page navigating itself never swaps into its own tab.
        let Some(host) = registry.find_entry_for_tab(url, tab.current_route()) else {
            if let Some(entry) = registry.history().latest_for(url) {
                log::debug!(
                    "{url} was prerendered by {} but it ended with {}",
                    entry.host,
                    entry.final_status
                );
            }
            return SwapResult::NoMatch;
        };
        let id = host.id();
        let exact = host.matches_url_exactly(url);
        let state = host.state();
        let route = host.route();
        let starting_page_id = host.starting_page_id();
        let favicon = host.favicon().cloned();
        let cross_site_pending = host
            .contents()
            .is_some_and(|contents| contents.cross_site_navigation_pending());

        if opener.is_some_and(|opener| opener.same_origin(url)) {
            return cancel(registry, id, FinalStatus::WindowOpener);
        }
        if !exact {
            return cancel(registry, id, FinalStatus::FragmentMismatch);
        }
        if registry.config().mode == PrerenderMode::ControlGroup || route.is_none() {
            registry.mark_tab_would_be_prerendered(tab.id());
            registry.cancel(id, FinalStatus::ControlGroup);
            return SwapResult::ControlGroup(id);
        }
        if state != HostState::Loaded {
            log::debug!("{id} is {}; not swapping into {}", state.as_str(), tab.id());
            return SwapResult::NotReady(id);
        }
        if starting_page_id <= tab.max_page_id() {
            return cancel(registry, id, FinalStatus::PageIdConflict);
        }
        if tab.devtools_attached() {
            return cancel(registry, id, FinalStatus::DevtoolsAttached);
        }
        if cross_site_pending {
            return cancel(registry, id, FinalStatus::CrossSiteNavigationPending);
        }

        let Some(route) = route else {
            return SwapResult::NotReady(id);
        };
        if !registry.tracker().try_use(route) {
            let status = registry
                .tracker()
                .final_status(route)
                .unwrap_or(FinalStatus::Cancelled);
            return cancel(registry, id, status);
        }

        let Some(mut contents) = registry.commit_swap(id, tab.id()) else {
            return SwapResult::NotReady(id);
        };
        contents.detach_from_container();
        contents.set_prerendering(false);
        contents.attach_to_container(tab.id());
        if let Some(previous) = tab.replace_contents(contents) {
            registry.retire_contents(previous);
        }
        log::debug!("swapped {id} into {} for {url}", tab.id());

        SwapResult::Swapped { host: id, favicon }
    }
}

fn cancel(registry: &mut PrerenderRegistry, id: HostId, status: FinalStatus) -> SwapResult {
    registry.cancel(id, status);
    SwapResult::Cancelled {
        host: id,
        status: registry.final_status(id).unwrap_or(status),
    }
}
