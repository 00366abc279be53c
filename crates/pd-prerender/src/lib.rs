//! Speculative page loading: admission, cancellation policy and swap-in.

pub mod clock;
pub mod config;
pub mod contents;
pub mod event;
pub mod final_status;
pub mod history;
pub mod host;
pub mod pending;
pub mod registry;
pub mod swap;
pub mod tracker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::PrerenderConfig;
pub use config::PrerenderMode;
pub use contents::ContentsFactory;
pub use contents::PageContents;
pub use contents::TabContainer;
pub use event::Disposition;
pub use event::HostEvent;
pub use final_status::ExperimentId;
pub use final_status::FinalStatus;
pub use final_status::FinalStatusCategory;
pub use final_status::PrerenderOrigin;
pub use history::PrerenderHistory;
pub use history::PrerenderHistoryEntry;
pub use host::HostId;
pub use host::HostState;
pub use host::PrerenderHost;
pub use pending::PendingPrerender;
pub use pending::PendingPrerenderQueue;
pub use registry::AdmissionResult;
pub use registry::ClearFlags;
pub use registry::EventOutcome;
pub use registry::HostChange;
pub use registry::PrerenderRegistry;
pub use registry::PrerenderRequest;
pub use registry::RegistryObserver;
pub use swap::SwapInCoordinator;
pub use swap::SwapResult;
pub use tracker::PrerenderTracker;
