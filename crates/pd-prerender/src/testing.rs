//! In-memory doubles for the rendering layer.

use crate::contents::ContentsFactory;
use crate::contents::PageContents;
use crate::contents::TabContainer;
use parking_lot::Mutex;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_core::ProcessId;
use pd_core::ProfileId;
use pd_core::RouteId;
use pd_core::TabId;
use pd_net::BrowserUrl;
use std::collections::HashSet;
use std::sync::Arc;

/// A call made on a [`FakeContents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentsCall {
    Navigate(String),
    SetPrerendering(bool),
    Detach,
    Attach(TabId),
}

#[derive(Debug, Default)]
struct RecorderState {
    calls: Vec<(RouteId, ContentsCall)>,
    dead_processes: HashSet<ProcessId>,
    cross_site_pending: HashSet<RouteId>,
    dropped: Vec<RouteId>,
}

/// Shared view into every contents created by one factory.
#[derive(Debug, Clone, Default)]
pub struct ContentsRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl ContentsRecorder {
    pub fn calls_for(&self, route: RouteId) -> Vec<ContentsCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(call_route, _)| *call_route == route)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn kill_process(&self, process: ProcessId) {
        self.state.lock().dead_processes.insert(process);
    }

    pub fn set_cross_site_pending(&self, route: RouteId, pending: bool) {
        let mut state = self.state.lock();
        if pending {
            state.cross_site_pending.insert(route);
        } else {
            state.cross_site_pending.remove(&route);
        }
    }

    /// Routes whose contents have been dropped, in drop order.
    pub fn dropped(&self) -> Vec<RouteId> {
        self.state.lock().dropped.clone()
    }

    fn record(&self, route: RouteId, call: ContentsCall) {
        self.state.lock().calls.push((route, call));
    }
}

#[derive(Debug)]
pub struct FakeContents {
    route: RouteId,
    recorder: ContentsRecorder,
}

impl FakeContents {
    pub fn new(route: RouteId, recorder: ContentsRecorder) -> Self {
        Self { route, recorder }
    }
}

impl PageContents for FakeContents {
    fn route(&self) -> RouteId {
        self.route
    }

    fn navigate(&mut self, url: &BrowserUrl, _referrer: Option<&BrowserUrl>) {
        self.recorder
            .record(self.route, ContentsCall::Navigate(url.as_str().to_owned()));
    }

    fn set_prerendering(&mut self, prerendering: bool) {
        self.recorder
            .record(self.route, ContentsCall::SetPrerendering(prerendering));
    }

    fn detach_from_container(&mut self) {
        self.recorder.record(self.route, ContentsCall::Detach);
    }

    fn attach_to_container(&mut self, tab: TabId) {
        self.recorder.record(self.route, ContentsCall::Attach(tab));
    }

    fn process_alive(&self) -> bool {
        !self
            .recorder
            .state
            .lock()
            .dead_processes
            .contains(&self.route.process)
    }

    fn cross_site_navigation_pending(&self) -> bool {
        self.recorder.state.lock().cross_site_pending.contains(&self.route)
    }
}

impl Drop for FakeContents {
    fn drop(&mut self) {
        self.recorder.state.lock().dropped.push(self.route);
    }
}

/// Hands out [`FakeContents`] on one process with increasing route ids.
#[derive(Debug)]
pub struct FakeFactory {
    process: ProcessId,
    next_route: u32,
    recorder: ContentsRecorder,
    failing: bool,
}

impl FakeFactory {
    pub fn new(process: ProcessId) -> Self {
        Self {
            process,
            next_route: 1,
            recorder: ContentsRecorder::default(),
            failing: false,
        }
    }

    /// A factory whose every creation fails.
    pub fn failing(process: ProcessId) -> Self {
        Self {
            failing: true,
            ..Self::new(process)
        }
    }

    pub fn recorder(&self) -> ContentsRecorder {
        self.recorder.clone()
    }

    /// Route the next created contents will get.
    pub fn next_route(&self) -> RouteId {
        RouteId::new(self.process, self.next_route)
    }
}

impl ContentsFactory for FakeFactory {
    fn create_contents(
        &mut self,
        profile: ProfileId,
        url: &BrowserUrl,
    ) -> BrowserResult<Box<dyn PageContents>> {
        if self.failing {
            return Err(BrowserError::new(
                "testing.contents_unavailable",
                format!("no contents for {url} in {profile}"),
            ));
        }
        let route = self.next_route();
        self.next_route += 1;
        Ok(Box::new(FakeContents::new(route, self.recorder.clone())))
    }
}

/// Visible tab holding at most one contents.
#[derive(Debug)]
pub struct FakeTab {
    id: TabId,
    devtools_attached: bool,
    max_page_id: i32,
    contents: Option<Box<dyn PageContents>>,
    replacements: usize,
}

impl FakeTab {
    pub fn new(id: TabId, contents: Box<dyn PageContents>) -> Self {
        Self {
            id,
            devtools_attached: false,
            max_page_id: -1,
            contents: Some(contents),
            replacements: 0,
        }
    }

    pub fn with_devtools(mut self) -> Self {
        self.devtools_attached = true;
        self
    }

    pub fn with_max_page_id(mut self, max_page_id: i32) -> Self {
        self.max_page_id = max_page_id;
        self
    }

    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl TabContainer for FakeTab {
    fn id(&self) -> TabId {
        self.id
    }

    fn devtools_attached(&self) -> bool {
        self.devtools_attached
    }

    fn current_route(&self) -> Option<RouteId> {
        self.contents.as_ref().map(|contents| contents.route())
    }

    fn max_page_id(&self) -> i32 {
        self.max_page_id
    }

    fn replace_contents(&mut self, contents: Box<dyn PageContents>) -> Option<Box<dyn PageContents>> {
        self.replacements += 1;
        self.contents.replace(contents)
    }
}
