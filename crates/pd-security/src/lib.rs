//! Safe-browsing verdicts and the service contract consulted before and during prerendering.

use parking_lot::Mutex;
use pd_core::BrowserResult;
use pd_net::BrowserUrl;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;

/// Classification returned by a safe-browsing lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SafeBrowsingVerdict {
    #[default]
    Safe,
    Malware,
    Phishing,
}

impl SafeBrowsingVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Malware => "malware",
            Self::Phishing => "phishing",
        }
    }

    pub fn is_threat(self) -> bool {
        !matches!(self, Self::Safe)
    }
}

/// Outcome of a lookup. `Pending` results are delivered later as a host event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlCheck {
    Complete(SafeBrowsingVerdict),
    Pending,
}

/// Safe-browsing collaborator.
pub trait SafeBrowsingService: fmt::Debug + Send + Sync {
    fn check_url(&self, url: &BrowserUrl) -> UrlCheck;
}

/// Service that reports every URL as safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllSafeBrowsing;

impl SafeBrowsingService for AllowAllSafeBrowsing {
    fn check_url(&self, _url: &BrowserUrl) -> UrlCheck {
        UrlCheck::Complete(SafeBrowsingVerdict::Safe)
    }
}

/// Injectable verdict table.
///
/// Owned by whoever constructs the registry and shared through an `Arc`, so a
/// session or test resets it explicitly with [`SafeBrowsingOverrides::clear`].
/// URLs without an override are safe.
#[derive(Debug, Default)]
pub struct SafeBrowsingOverrides {
    verdicts: Mutex<HashMap<String, SafeBrowsingVerdict>>,
    deferred: Mutex<HashSet<String>>,
}

impl SafeBrowsingOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result_for_url(&self, url: &str, verdict: SafeBrowsingVerdict) -> BrowserResult<()> {
        let key = canonical_key(url)?;
        self.deferred.lock().remove(&key);
        self.verdicts.lock().insert(key, verdict);
        Ok(())
    }

    /// Makes lookups for `url` answer `Pending` until a verdict is set.
    pub fn defer_url(&self, url: &str) -> BrowserResult<()> {
        let key = canonical_key(url)?;
        self.verdicts.lock().remove(&key);
        self.deferred.lock().insert(key);
        Ok(())
    }

    pub fn clear(&self) {
        self.verdicts.lock().clear();
        self.deferred.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.verdicts.lock().len() + self.deferred.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SafeBrowsingService for SafeBrowsingOverrides {
    fn check_url(&self, url: &BrowserUrl) -> UrlCheck {
        let key = url.without_fragment().as_str().to_owned();
        if self.deferred.lock().contains(&key) {
            return UrlCheck::Pending;
        }
        let verdict = self.verdicts.lock().get(&key).copied().unwrap_or_default();
        UrlCheck::Complete(verdict)
    }
}

fn canonical_key(url: &str) -> BrowserResult<String> {
    let parsed = BrowserUrl::parse(url)?;
    Ok(parsed.without_fragment().as_str().to_owned())
}

#[cfg(test)]
mod tests {
    use super::AllowAllSafeBrowsing;
    use super::SafeBrowsingOverrides;
    use super::SafeBrowsingService;
    use super::SafeBrowsingVerdict;
    use super::UrlCheck;
    use pd_net::BrowserUrl;

    fn url(input: &str) -> BrowserUrl {
        match BrowserUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn allow_all_reports_safe() {
        let check = AllowAllSafeBrowsing.check_url(&url("https://a.example/"));
        assert_eq!(check, UrlCheck::Complete(SafeBrowsingVerdict::Safe));
    }

    #[test]
    fn overrides_match_canonical_url_without_fragment() {
        let overrides = SafeBrowsingOverrides::new();
        assert!(
            overrides
                .set_result_for_url("HTTP://Bad.example/x", SafeBrowsingVerdict::Malware)
                .is_ok()
        );

        let check = overrides.check_url(&url("http://bad.example/x#frag"));
        assert_eq!(check, UrlCheck::Complete(SafeBrowsingVerdict::Malware));
        assert_eq!(
            overrides.check_url(&url("http://bad.example/y")),
            UrlCheck::Complete(SafeBrowsingVerdict::Safe)
        );
    }

    #[test]
    fn deferred_urls_stay_pending_until_resolved() {
        let overrides = SafeBrowsingOverrides::new();
        assert!(overrides.defer_url("http://slow.example/").is_ok());
        assert_eq!(overrides.check_url(&url("http://slow.example/")), UrlCheck::Pending);

        assert!(
            overrides
                .set_result_for_url("http://slow.example/", SafeBrowsingVerdict::Phishing)
                .is_ok()
        );
        assert_eq!(
            overrides.check_url(&url("http://slow.example/")),
            UrlCheck::Complete(SafeBrowsingVerdict::Phishing)
        );
    }

    #[test]
    fn clear_resets_every_override() {
        let overrides = SafeBrowsingOverrides::new();
        assert!(
            overrides
                .set_result_for_url("http://bad.example/", SafeBrowsingVerdict::Malware)
                .is_ok()
        );
        assert!(overrides.defer_url("http://slow.example/").is_ok());
        assert_eq!(overrides.len(), 2);

        overrides.clear();
        assert!(overrides.is_empty());
    }

    #[test]
    fn invalid_override_url_is_rejected() {
        let overrides = SafeBrowsingOverrides::new();
        assert!(
            overrides
                .set_result_for_url("not a url", SafeBrowsingVerdict::Malware)
                .is_err()
        );
    }
}
