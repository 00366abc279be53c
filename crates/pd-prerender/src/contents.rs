//! Contracts the rendering layer implements for hidden and visible pages.

use pd_core::BrowserResult;
use pd_core::ProfileId;
use pd_core::RouteId;
use pd_core::TabId;
use pd_net::BrowserUrl;
use std::fmt;

/// A document hosted in a renderer, visible or not.
pub trait PageContents: fmt::Debug {
    fn route(&self) -> RouteId;

    fn navigate(&mut self, url: &BrowserUrl, referrer: Option<&BrowserUrl>);

    /// Toggles the throttled, side-effect-free mode used while hidden.
    fn set_prerendering(&mut self, prerendering: bool);

    fn detach_from_container(&mut self);

    fn attach_to_container(&mut self, tab: TabId);

    fn process_alive(&self) -> bool;

    /// A navigation that will change process is still in flight.
    fn cross_site_navigation_pending(&self) -> bool;
}

/// Creates hidden contents for prerendering.
pub trait ContentsFactory: fmt::Debug {
    fn create_contents(
        &mut self,
        profile: ProfileId,
        url: &BrowserUrl,
    ) -> BrowserResult<Box<dyn PageContents>>;
}

/// A visible tab that can receive prerendered contents.
pub trait TabContainer {
    fn id(&self) -> TabId;

    fn devtools_attached(&self) -> bool;

    /// Route of the contents the tab shows now, if any.
    fn current_route(&self) -> Option<RouteId>;

    /// Highest history page id the tab has committed, `-1` when none.
    fn max_page_id(&self) -> i32;

    /// Installs `contents` and hands back whatever was shown before.
    fn replace_contents(&mut self, contents: Box<dyn PageContents>) -> Option<Box<dyn PageContents>>;
}
