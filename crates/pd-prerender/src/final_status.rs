//! Terminal reasons and trigger metadata for prerendered pages.

use std::fmt;

/// Why a prerender stopped being speculative. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalStatus {
    Used,
    TimedOut,
    Evicted,
    ManagerShutdown,
    ProfileDestroyed,
    AppTerminating,
    JavascriptAlert,
    AuthNeeded,
    Https,
    Download,
    MemoryLimitExceeded,
    JsOutOfMemory,
    RecentlyVisited,
    RateLimitExceeded,
    ControlGroup,
    Html5Media,
    RendererCrashed,
    UnsupportedScheme,
    InvalidHttpMethod,
    WindowPrint,
    CacheOrHistoryCleared,
    Cancelled,
    SslError,
    SslClientCertificateRequested,
    CrossSiteNavigationPending,
    PageIdConflict,
    DevtoolsAttached,
    OpenUrl,
    SafeBrowsing,
    FragmentMismatch,
    WindowOpener,
    CreateNewWindow,
}

/// How a final status is handled once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalStatusCategory {
    Used,
    SurpriseAvoided,
    Safety,
    Resource,
    Process,
    PolicyMismatch,
    /// Refused before any host was created.
    Admission,
}

impl FinalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Used => "USED",
            Self::TimedOut => "TIMED_OUT",
            Self::Evicted => "EVICTED",
            Self::ManagerShutdown => "MANAGER_SHUTDOWN",
            Self::ProfileDestroyed => "PROFILE_DESTROYED",
            Self::AppTerminating => "APP_TERMINATING",
            Self::JavascriptAlert => "JAVASCRIPT_ALERT",
            Self::AuthNeeded => "AUTH_NEEDED",
            Self::Https => "HTTPS",
            Self::Download => "DOWNLOAD",
            Self::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            Self::JsOutOfMemory => "JS_OUT_OF_MEMORY",
            Self::RecentlyVisited => "RECENTLY_VISITED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ControlGroup => "CONTROL_GROUP",
            Self::Html5Media => "HTML5_MEDIA",
            Self::RendererCrashed => "RENDERER_CRASHED",
            Self::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            Self::InvalidHttpMethod => "INVALID_HTTP_METHOD",
            Self::WindowPrint => "WINDOW_PRINT",
            Self::CacheOrHistoryCleared => "CACHE_OR_HISTORY_CLEARED",
            Self::Cancelled => "CANCELLED",
            Self::SslError => "SSL_ERROR",
            Self::SslClientCertificateRequested => "SSL_CLIENT_CERTIFICATE_REQUESTED",
            Self::CrossSiteNavigationPending => "CROSS_SITE_NAVIGATION_PENDING",
            Self::PageIdConflict => "PAGE_ID_CONFLICT",
            Self::DevtoolsAttached => "DEVTOOLS_ATTACHED",
            Self::OpenUrl => "OPEN_URL",
            Self::SafeBrowsing => "SAFE_BROWSING",
            Self::FragmentMismatch => "FRAGMENT_MISMATCH",
            Self::WindowOpener => "WINDOW_OPENER",
            Self::CreateNewWindow => "CREATE_NEW_WINDOW",
        }
    }

    pub fn category(self) -> FinalStatusCategory {
        match self {
            Self::Used => FinalStatusCategory::Used,
            Self::JavascriptAlert | Self::CreateNewWindow | Self::WindowPrint | Self::Html5Media => {
                FinalStatusCategory::SurpriseAvoided
            }
            Self::SafeBrowsing
            | Self::SslError
            | Self::SslClientCertificateRequested
            | Self::AuthNeeded => FinalStatusCategory::Safety,
            Self::MemoryLimitExceeded
            | Self::JsOutOfMemory
            | Self::Evicted
            | Self::TimedOut
            | Self::CacheOrHistoryCleared => FinalStatusCategory::Resource,
            Self::RendererCrashed
            | Self::AppTerminating
            | Self::ManagerShutdown
            | Self::ProfileDestroyed => FinalStatusCategory::Process,
            Self::RateLimitExceeded
            | Self::RecentlyVisited
            | Self::UnsupportedScheme
            | Self::Https
            | Self::ControlGroup => FinalStatusCategory::Admission,
            Self::FragmentMismatch
            | Self::WindowOpener
            | Self::InvalidHttpMethod
            | Self::Download
            | Self::OpenUrl
            | Self::DevtoolsAttached
            | Self::CrossSiteNavigationPending
            | Self::PageIdConflict
            | Self::Cancelled => FinalStatusCategory::PolicyMismatch,
        }
    }

    /// Whether requests queued by a host finishing with this status are replayed.
    pub fn replays_pending(self) -> bool {
        matches!(self, Self::Used | Self::Evicted)
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What asked for the prerender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrerenderOrigin {
    LinkRelPrerender,
    OmniboxOriginal,
    OmniboxConservative,
    Instant,
}

impl PrerenderOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkRelPrerender => "link-rel-prerender",
            Self::OmniboxOriginal => "omnibox-original",
            Self::OmniboxConservative => "omnibox-conservative",
            Self::Instant => "instant",
        }
    }
}

/// Opaque experiment tag carried for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExperimentId(pub u8);

impl ExperimentId {
    pub const NONE: Self = Self(0);
}

#[cfg(test)]
mod tests {
    use super::FinalStatus;
    use super::FinalStatusCategory;
    use rstest::rstest;

    #[rstest]
    #[case(FinalStatus::Used, FinalStatusCategory::Used)]
    #[case(FinalStatus::JavascriptAlert, FinalStatusCategory::SurpriseAvoided)]
    #[case(FinalStatus::Html5Media, FinalStatusCategory::SurpriseAvoided)]
    #[case(FinalStatus::SafeBrowsing, FinalStatusCategory::Safety)]
    #[case(FinalStatus::AuthNeeded, FinalStatusCategory::Safety)]
    #[case(FinalStatus::MemoryLimitExceeded, FinalStatusCategory::Resource)]
    #[case(FinalStatus::CacheOrHistoryCleared, FinalStatusCategory::Resource)]
    #[case(FinalStatus::AppTerminating, FinalStatusCategory::Process)]
    #[case(FinalStatus::RendererCrashed, FinalStatusCategory::Process)]
    #[case(FinalStatus::FragmentMismatch, FinalStatusCategory::PolicyMismatch)]
    #[case(FinalStatus::Download, FinalStatusCategory::PolicyMismatch)]
    #[case(FinalStatus::PageIdConflict, FinalStatusCategory::PolicyMismatch)]
    #[case(FinalStatus::RateLimitExceeded, FinalStatusCategory::Admission)]
    fn statuses_fall_into_their_category(
        #[case] status: FinalStatus,
        #[case] category: FinalStatusCategory,
    ) {
        assert_eq!(status.category(), category);
    }

    #[test]
    fn only_use_and_competition_replay_pending_requests() {
        assert!(FinalStatus::Used.replays_pending());
        assert!(FinalStatus::Evicted.replays_pending());
        assert!(!FinalStatus::AppTerminating.replays_pending());
        assert!(!FinalStatus::SafeBrowsing.replays_pending());
        assert!(!FinalStatus::MemoryLimitExceeded.replays_pending());
    }

    #[test]
    fn display_uses_wire_name() {
        assert_eq!(FinalStatus::WindowOpener.to_string(), "WINDOW_OPENER");
    }
}
