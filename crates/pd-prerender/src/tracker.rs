//! Thread-safe arbiter between "use" on the controlling thread and "cancel" from I/O.

use crate::event::is_tolerated_method;
use crate::final_status::FinalStatus;
use parking_lot::Mutex;
use pd_core::RouteId;
use pd_net::BrowserUrl;
use pd_net::HttpMethod;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct TrackerState {
    /// `None` while the route is still prerendering.
    routes: HashMap<RouteId, Option<FinalStatus>>,
    urls: HashMap<String, usize>,
}

/// Records the first final status set for each prerendering route.
///
/// Shared through an `Arc` between the registry and the network layer, which
/// may cancel a route (invalid method, auth challenge) before the registry
/// hears about it.
#[derive(Debug, Default)]
pub struct PrerenderTracker {
    state: Mutex<TrackerState>,
}

impl PrerenderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_prerender_started(&self, route: RouteId, url: &BrowserUrl) {
        let mut state = self.state.lock();
        state.routes.insert(route, None);
        *state.urls.entry(url_key(url)).or_insert(0) += 1;
    }

    /// Another URL the route's page is now known by.
    pub fn add_prerender_url(&self, url: &BrowserUrl) {
        *self.state.lock().urls.entry(url_key(url)).or_insert(0) += 1;
    }

    /// Forgets the route and every URL it was registered under.
    pub fn on_prerender_stopped(&self, route: RouteId, urls: &[BrowserUrl]) {
        let mut state = self.state.lock();
        state.routes.remove(&route);
        for url in urls {
            let key = url_key(url);
            if let Some(count) = state.urls.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    state.urls.remove(&key);
                }
            }
        }
    }

    /// Claims the route for display. Fails if it was already cancelled.
    pub fn try_use(&self, route: RouteId) -> bool {
        self.set_final_status(route, FinalStatus::Used) == Some(FinalStatus::Used)
    }

    /// Cancels the route unless it was already used. Returns true when the
    /// route ends up cancelled, whichever status won.
    pub fn try_cancel(&self, route: RouteId, status: FinalStatus) -> bool {
        match self.set_final_status(route, status) {
            Some(FinalStatus::Used) => false,
            Some(_) => true,
            None => false,
        }
    }

    /// Network-side check of a request's method token. Unknown or
    /// side-effecting methods cancel a prerendering route. Returns whether
    /// the request must be blocked.
    pub fn cancel_for_request_method(&self, route: RouteId, method: &str) -> bool {
        if !self.is_prerendering(route) {
            return false;
        }
        if HttpMethod::from_token(method).is_some_and(is_tolerated_method) {
            return false;
        }
        log::debug!("{route} issued a `{method}` request while prerendering");
        self.try_cancel(route, FinalStatus::InvalidHttpMethod)
    }

    pub fn final_status(&self, route: RouteId) -> Option<FinalStatus> {
        self.state.lock().routes.get(&route).copied().flatten()
    }

    /// Still prerendering and not yet claimed or cancelled.
    pub fn is_prerendering(&self, route: RouteId) -> bool {
        matches!(self.state.lock().routes.get(&route), Some(None))
    }

    pub fn is_prerendering_url(&self, url: &BrowserUrl) -> bool {
        self.state.lock().urls.contains_key(&url_key(url))
    }

    fn set_final_status(&self, route: RouteId, status: FinalStatus) -> Option<FinalStatus> {
        let mut state = self.state.lock();
        let slot = state.routes.get_mut(&route)?;
        if slot.is_none() {
            *slot = Some(status);
        }
        *slot
    }
}

fn url_key(url: &BrowserUrl) -> String {
    url.without_fragment().as_str().to_owned()
}

#[cfg(test)]
mod tests {
    use super::PrerenderTracker;
    use crate::final_status::FinalStatus;
    use pd_core::ProcessId;
    use pd_core::RouteId;
    use pd_net::BrowserUrl;
    use std::sync::Arc;
    use std::thread;

    fn url(input: &str) -> BrowserUrl {
        match BrowserUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn first_status_wins() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(1), 1);
        tracker.on_prerender_started(route, &url("http://a.example/"));

        assert!(tracker.try_cancel(route, FinalStatus::AuthNeeded));
        assert!(!tracker.try_use(route));
        assert!(tracker.try_cancel(route, FinalStatus::Download));
        assert_eq!(tracker.final_status(route), Some(FinalStatus::AuthNeeded));
    }

    #[test]
    fn used_route_cannot_be_cancelled() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(1), 2);
        tracker.on_prerender_started(route, &url("http://a.example/"));

        assert!(tracker.try_use(route));
        assert!(!tracker.try_cancel(route, FinalStatus::InvalidHttpMethod));
        assert!(!tracker.is_prerendering(route));
    }

    #[test]
    fn unknown_routes_are_neither_used_nor_cancelled() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(9), 9);
        assert!(!tracker.try_use(route));
        assert!(!tracker.try_cancel(route, FinalStatus::Cancelled));
    }

    #[test]
    fn url_counts_follow_start_and_stop() {
        let tracker = PrerenderTracker::new();
        let page = url("http://a.example/page");
        let first = RouteId::new(ProcessId(1), 1);
        let second = RouteId::new(ProcessId(2), 1);
        tracker.on_prerender_started(first, &page);
        tracker.on_prerender_started(second, &page);

        tracker.on_prerender_stopped(first, std::slice::from_ref(&page));
        assert!(tracker.is_prerendering_url(&url("http://a.example/page#x")));
        tracker.on_prerender_stopped(second, std::slice::from_ref(&page));
        assert!(!tracker.is_prerendering_url(&page));
    }

    #[test]
    fn alias_urls_are_released_with_the_route() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(1), 1);
        let start = url("http://a.example/start");
        let landing = url("http://a.example/landing");
        tracker.on_prerender_started(route, &start);
        tracker.add_prerender_url(&landing);

        assert!(tracker.is_prerendering(route));
        assert!(tracker.is_prerendering_url(&landing));

        tracker.on_prerender_stopped(route, &[start.clone(), landing.clone()]);
        assert!(!tracker.is_prerendering_url(&start));
        assert!(!tracker.is_prerendering_url(&landing));
    }

    #[test]
    fn side_effecting_request_methods_cancel_on_the_network_side() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(1), 3);
        tracker.on_prerender_started(route, &url("http://a.example/"));

        assert!(!tracker.cancel_for_request_method(route, "get"));
        assert!(!tracker.cancel_for_request_method(route, " POST "));
        assert!(tracker.is_prerendering(route));

        assert!(tracker.cancel_for_request_method(route, "PROPFIND"));
        assert_eq!(tracker.final_status(route), Some(FinalStatus::InvalidHttpMethod));
    }

    #[test]
    fn request_methods_of_used_or_unknown_routes_are_not_blocked() {
        let tracker = PrerenderTracker::new();
        let route = RouteId::new(ProcessId(1), 4);
        tracker.on_prerender_started(route, &url("http://a.example/"));
        assert!(tracker.try_use(route));

        assert!(!tracker.cancel_for_request_method(route, "DELETE"));
        assert!(!tracker.cancel_for_request_method(RouteId::new(ProcessId(2), 1), "PUT"));
        assert_eq!(tracker.final_status(route), Some(FinalStatus::Used));
    }

    #[test]
    fn concurrent_use_and_cancel_agree_on_one_winner() {
        for round in 0..32 {
            let tracker = Arc::new(PrerenderTracker::new());
            let route = RouteId::new(ProcessId(1), round);
            tracker.on_prerender_started(route, &url("http://a.example/"));

            let io_tracker = Arc::clone(&tracker);
            let io = thread::spawn(move || {
                io_tracker.try_cancel(route, FinalStatus::InvalidHttpMethod)
            });
            let used = tracker.try_use(route);
            let cancelled = io.join().unwrap_or_else(|_| unreachable!());

            assert_ne!(used, cancelled);
            let expected = if used {
                FinalStatus::Used
            } else {
                FinalStatus::InvalidHttpMethod
            };
            assert_eq!(tracker.final_status(route), Some(expected));
        }
    }
}
