//! Networking contracts: URL parsing and request classification.

pub mod http;
pub mod url;

pub use http::HttpMethod;
pub use http::ResourceType;
pub use url::BrowserUrl;
pub use url::Scheme;
