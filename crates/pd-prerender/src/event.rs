//! Events reported by a hidden document and their classification.

use crate::final_status::FinalStatus;
use pd_net::BrowserUrl;
use pd_net::HttpMethod;
use pd_net::ResourceType;
use pd_security::SafeBrowsingVerdict;

/// Everything the rendering and network layers report about one prerendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ProvisionalLoadStarted { url: BrowserUrl, main_frame: bool },
    /// The main frame stopped loading.
    LoadStopped,
    Redirect {
        resource: ResourceType,
        new_url: BrowserUrl,
    },
    JavaScriptDialog,
    DownloadRequested,
    NewWindowRequested,
    OpenUrlRequested { url: BrowserUrl },
    MediaPlayback,
    PrintRequested,
    RendererGone,
    JsOutOfMemory,
    MemoryUsage { private_bytes: u64 },
    SslError { resource: ResourceType },
    SslClientCertificateRequested { resource: ResourceType },
    SafeBrowsingResult {
        resource: ResourceType,
        verdict: SafeBrowsingVerdict,
    },
    AuthChallenge { resource: ResourceType },
    Request { method: HttpMethod },
    DevToolsAttached,
    /// Script in the page obtained an opener handle to `opener_url`.
    WindowOpenerEstablished { opener_url: BrowserUrl },
    FaviconUrl { url: BrowserUrl },
}

/// What the registry should do with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ignore,
    Loaded,
    Cancel(FinalStatus),
    AddAlias(BrowserUrl),
    /// The page began loading a new main-frame document by itself.
    Navigate(BrowserUrl),
    MemoryReport(u64),
    Favicon(BrowserUrl),
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProvisionalLoadStarted { .. } => "provisional-load-started",
            Self::LoadStopped => "load-stopped",
            Self::Redirect { .. } => "redirect",
            Self::JavaScriptDialog => "javascript-dialog",
            Self::DownloadRequested => "download-requested",
            Self::NewWindowRequested => "new-window-requested",
            Self::OpenUrlRequested { .. } => "open-url-requested",
            Self::MediaPlayback => "media-playback",
            Self::PrintRequested => "print-requested",
            Self::RendererGone => "renderer-gone",
            Self::JsOutOfMemory => "js-out-of-memory",
            Self::MemoryUsage { .. } => "memory-usage",
            Self::SslError { .. } => "ssl-error",
            Self::SslClientCertificateRequested { .. } => "ssl-client-certificate-requested",
            Self::SafeBrowsingResult { .. } => "safe-browsing-result",
            Self::AuthChallenge { .. } => "auth-challenge",
            Self::Request { .. } => "request",
            Self::DevToolsAttached => "devtools-attached",
            Self::WindowOpenerEstablished { .. } => "window-opener-established",
            Self::FaviconUrl { .. } => "favicon-url",
        }
    }

    /// Maps the event onto the cancellation taxonomy for a page prerendered at `prerendered`.
    pub fn classify(&self, prerendered: &BrowserUrl) -> Disposition {
        match self {
            Self::ProvisionalLoadStarted { url, main_frame } => {
                if *main_frame {
                    Disposition::Navigate(url.clone())
                } else {
                    Disposition::Ignore
                }
            }
            Self::LoadStopped => Disposition::Loaded,
            Self::Redirect { resource, new_url } => {
                if resource.is_main_frame() {
                    Disposition::AddAlias(new_url.clone())
                } else {
                    Disposition::Ignore
                }
            }
            Self::JavaScriptDialog => Disposition::Cancel(FinalStatus::JavascriptAlert),
            Self::DownloadRequested => Disposition::Cancel(FinalStatus::Download),
            Self::NewWindowRequested => Disposition::Cancel(FinalStatus::CreateNewWindow),
            Self::OpenUrlRequested { .. } => Disposition::Cancel(FinalStatus::OpenUrl),
            Self::MediaPlayback => Disposition::Cancel(FinalStatus::Html5Media),
            Self::PrintRequested => Disposition::Cancel(FinalStatus::WindowPrint),
            Self::RendererGone => Disposition::Cancel(FinalStatus::RendererCrashed),
            Self::JsOutOfMemory => Disposition::Cancel(FinalStatus::JsOutOfMemory),
            Self::MemoryUsage { private_bytes } => Disposition::MemoryReport(*private_bytes),
            Self::SslError { resource } => {
                if resource.is_main_frame() {
                    Disposition::Cancel(FinalStatus::SslError)
                } else {
                    Disposition::Ignore
                }
            }
            Self::SslClientCertificateRequested { .. } => {
                Disposition::Cancel(FinalStatus::SslClientCertificateRequested)
            }
            Self::SafeBrowsingResult { verdict, .. } => {
                if verdict.is_threat() {
                    Disposition::Cancel(FinalStatus::SafeBrowsing)
                } else {
                    Disposition::Ignore
                }
            }
            Self::AuthChallenge { .. } => Disposition::Cancel(FinalStatus::AuthNeeded),
            Self::Request { method } => {
                if is_tolerated_method(*method) {
                    Disposition::Ignore
                } else {
                    Disposition::Cancel(FinalStatus::InvalidHttpMethod)
                }
            }
            Self::DevToolsAttached => Disposition::Cancel(FinalStatus::DevtoolsAttached),
            Self::WindowOpenerEstablished { opener_url } => {
                if opener_url.same_origin(prerendered) {
                    Disposition::Cancel(FinalStatus::WindowOpener)
                } else {
                    Disposition::Ignore
                }
            }
            Self::FaviconUrl { url } => Disposition::Favicon(url.clone()),
        }
    }
}

/// Methods a hidden page may issue without side effects the user has not asked for.
pub fn is_tolerated_method(method: HttpMethod) -> bool {
    matches!(
        method,
        HttpMethod::Get
            | HttpMethod::Head
            | HttpMethod::Options
            | HttpMethod::Post
            | HttpMethod::Trace
    )
}
