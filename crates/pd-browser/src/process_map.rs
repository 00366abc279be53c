//! Origin to renderer-process affinity.
//!
//! The map is written only from the controlling thread. Other threads read a
//! point-in-time [`ProcessMapSnapshot`] through a [`ProcessMapReader`]; a
//! write replaces the published snapshot and never waits for readers to
//! finish with the previous one.

use parking_lot::RwLock;
use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_core::ProcessId;
use pd_core::ProfileId;
use pd_core::SiteInstanceId;
use pd_net::BrowserUrl;
use pd_net::Scheme;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Canonical `scheme://authority` of a browsing context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginKey {
    origin: String,
    extension: bool,
}

impl OriginKey {
    pub fn from_url(url: &BrowserUrl) -> Self {
        Self {
            origin: url.origin(),
            extension: url.scheme() == Scheme::Extension,
        }
    }

    pub fn parse(input: &str) -> BrowserResult<Self> {
        BrowserUrl::parse(input).map(|url| Self::from_url(&url))
    }

    pub fn as_str(&self) -> &str {
        &self.origin
    }

    pub fn is_extension(&self) -> bool {
        self.extension
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}

/// A renderer process together with the site instance it hosts for an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessGroupHandle {
    pub process: ProcessId,
    pub site_instance: SiteInstanceId,
}

/// Process-management side of the map: creates site instances and knows which
/// processes it launched for extensions.
pub trait SiteInstanceProvider: fmt::Debug {
    fn get_or_create_site_instance(
        &mut self,
        origin: &OriginKey,
        profile: ProfileId,
    ) -> BrowserResult<ProcessGroupHandle>;

    fn is_extension_process(&self, process: ProcessId) -> bool;
}

/// Gives every new site instance a fresh process, numbered sequentially.
#[derive(Debug)]
pub struct LocalProcessAllocator {
    next_process: u32,
    next_site_instance: u32,
    extension_processes: HashSet<ProcessId>,
}

impl LocalProcessAllocator {
    pub fn new(first_process: ProcessId) -> Self {
        Self {
            next_process: first_process.0,
            next_site_instance: 1,
            extension_processes: HashSet::new(),
        }
    }
}

impl Default for LocalProcessAllocator {
    fn default() -> Self {
        Self::new(ProcessId(1))
    }
}

impl SiteInstanceProvider for LocalProcessAllocator {
    fn get_or_create_site_instance(
        &mut self,
        origin: &OriginKey,
        _profile: ProfileId,
    ) -> BrowserResult<ProcessGroupHandle> {
        let process = ProcessId(self.next_process);
        let site_instance = SiteInstanceId(self.next_site_instance);
        self.next_process = self.next_process.checked_add(1).ok_or_else(|| {
            BrowserError::new(
                "process_map.process_ids_exhausted",
                "no process ids left to allocate",
            )
        })?;
        self.next_site_instance += 1;

        if origin.is_extension() {
            self.extension_processes.insert(process);
        }
        Ok(ProcessGroupHandle {
            process,
            site_instance,
        })
    }

    fn is_extension_process(&self, process: ProcessId) -> bool {
        self.extension_processes.contains(&process)
    }
}

#[derive(Debug, Default)]
struct OriginEntry {
    instances: BTreeSet<ProcessGroupHandle>,
    /// Group reused by every context of an origin with background affinity.
    shared: Option<ProcessGroupHandle>,
}

#[derive(Debug, Clone)]
struct SiteRecord {
    profile: ProfileId,
    origin: OriginKey,
    process: ProcessId,
}

#[derive(Debug)]
struct ProcessRecord {
    profile: ProfileId,
    site_instances: BTreeSet<SiteInstanceId>,
}

/// Read-only copy of the map as of its last change.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessMapSnapshot {
    origins: HashMap<(ProfileId, String), Vec<ProcessGroupHandle>>,
    extension_processes: HashSet<ProcessId>,
    site_instances: usize,
}

impl ProcessMapSnapshot {
    pub fn process_for_origin(&self, origin: &str, profile: ProfileId) -> Option<ProcessId> {
        self.origins
            .get(&(profile, origin.to_owned()))
            .and_then(|groups| groups.first())
            .map(|group| group.process)
    }

    pub fn is_extension_process(&self, process: ProcessId) -> bool {
        self.extension_processes.contains(&process)
    }

    pub fn site_instance_count(&self) -> usize {
        self.site_instances
    }
}

/// Cloneable, thread-safe handle onto the latest [`ProcessMapSnapshot`].
#[derive(Debug, Clone)]
pub struct ProcessMapReader {
    published: Arc<RwLock<Arc<ProcessMapSnapshot>>>,
}

impl ProcessMapReader {
    pub fn snapshot(&self) -> Arc<ProcessMapSnapshot> {
        Arc::clone(&self.published.read())
    }
}

/// Decides which process group a browsing context of a given origin and
/// profile joins.
#[derive(Debug)]
pub struct OriginProcessMap {
    provider: Box<dyn SiteInstanceProvider>,
    affinity: HashSet<(ProfileId, OriginKey)>,
    origins: HashMap<(ProfileId, OriginKey), OriginEntry>,
    site_instances: HashMap<SiteInstanceId, SiteRecord>,
    processes: HashMap<ProcessId, ProcessRecord>,
    published: Arc<RwLock<Arc<ProcessMapSnapshot>>>,
}

impl OriginProcessMap {
    pub fn new(provider: Box<dyn SiteInstanceProvider>) -> Self {
        Self {
            provider,
            affinity: HashSet::new(),
            origins: HashMap::new(),
            site_instances: HashMap::new(),
            processes: HashMap::new(),
            published: Arc::new(RwLock::new(Arc::new(ProcessMapSnapshot::default()))),
        }
    }

    pub fn reader(&self) -> ProcessMapReader {
        ProcessMapReader {
            published: Arc::clone(&self.published),
        }
    }

    /// Marks `origin` as sharing one process per profile (an extension or app
    /// with a background page).
    pub fn register_origin_affinity(&mut self, origin: OriginKey, profile: ProfileId) {
        log::debug!("{origin} in {profile} now shares one process");
        self.affinity.insert((profile, origin));
    }

    /// Drops the affinity; later contexts of the origin get their own group.
    pub fn clear_origin_affinity(&mut self, origin: &OriginKey, profile: ProfileId) {
        let key = (profile, origin.clone());
        self.affinity.remove(&key);
        if let Some(entry) = self.origins.get_mut(&key) {
            entry.shared = None;
        }
    }

    pub fn has_affinity(&self, origin: &OriginKey, profile: ProfileId) -> bool {
        self.affinity.contains(&(profile, origin.clone()))
    }

    /// Returns the shared group of an origin with affinity, creating and
    /// recording a new group otherwise.
    pub fn resolve_or_create_process_group(
        &mut self,
        origin: &OriginKey,
        profile: ProfileId,
    ) -> BrowserResult<ProcessGroupHandle> {
        let key = (profile, origin.clone());
        let affinity = self.affinity.contains(&key);
        if affinity {
            if let Some(shared) = self.origins.get(&key).and_then(|entry| entry.shared) {
                return Ok(shared);
            }
        }

        let group = self.provider.get_or_create_site_instance(origin, profile)?;
        self.insert(origin, profile, group)?;
        if affinity {
            if let Some(entry) = self.origins.get_mut(&key) {
                entry.shared = Some(group);
            }
        }
        log::debug!(
            "{origin} in {profile} -> {} ({})",
            group.process,
            group.site_instance
        );
        self.publish();
        Ok(group)
    }

    /// Records a site instance created outside of
    /// [`Self::resolve_or_create_process_group`].
    pub fn register_site_instance(
        &mut self,
        origin: &OriginKey,
        profile: ProfileId,
        group: ProcessGroupHandle,
    ) -> BrowserResult<()> {
        self.insert(origin, profile, group)?;
        let key = (profile, origin.clone());
        if self.affinity.contains(&key) {
            if let Some(entry) = self.origins.get_mut(&key) {
                entry.shared.get_or_insert(group);
            }
        }
        self.publish();
        Ok(())
    }

    /// Forgets a site instance. Returns false if it was not registered.
    pub fn unregister_site_instance(&mut self, site_instance: SiteInstanceId) -> bool {
        let removed = self.remove_site_instance(site_instance);
        if removed {
            self.publish();
        }
        removed
    }

    /// Prunes every site instance the exited process hosted.
    pub fn on_process_exited(&mut self, process: ProcessId) -> usize {
        let Some(record) = self.processes.get(&process) else {
            return 0;
        };
        let site_instances: Vec<SiteInstanceId> = record.site_instances.iter().copied().collect();
        for site_instance in &site_instances {
            self.remove_site_instance(*site_instance);
        }
        log::debug!(
            "{process} exited; pruned {} site instances",
            site_instances.len()
        );
        self.publish();
        site_instances.len()
    }

    /// Drops everything recorded for a profile that is going away.
    pub fn remove_profile(&mut self, profile: ProfileId) -> usize {
        self.affinity.retain(|(owner, _)| *owner != profile);
        let site_instances: Vec<SiteInstanceId> = self
            .site_instances
            .iter()
            .filter(|(_, record)| record.profile == profile)
            .map(|(id, _)| *id)
            .collect();
        for site_instance in &site_instances {
            self.remove_site_instance(*site_instance);
        }
        self.publish();
        site_instances.len()
    }

    pub fn is_extension_process(&self, process: ProcessId) -> bool {
        self.hosts_extension(process) || self.provider.is_extension_process(process)
    }

    pub fn extension_origin_for_site_instance(
        &self,
        site_instance: SiteInstanceId,
    ) -> Option<&OriginKey> {
        self.site_instances
            .get(&site_instance)
            .map(|record| &record.origin)
            .filter(|origin| origin.is_extension())
    }

    /// Process currently hosting `origin`, preferring the shared group.
    pub fn process_for_origin(&self, origin: &OriginKey, profile: ProfileId) -> Option<ProcessId> {
        let entry = self.origins.get(&(profile, origin.clone()))?;
        entry
            .shared
            .or_else(|| entry.instances.first().copied())
            .map(|group| group.process)
    }

    pub fn site_instances_for_process(&self, process: ProcessId) -> Vec<SiteInstanceId> {
        self.processes
            .get(&process)
            .map(|record| record.site_instances.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn site_instance_count(&self) -> usize {
        self.site_instances.len()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    fn insert(
        &mut self,
        origin: &OriginKey,
        profile: ProfileId,
        group: ProcessGroupHandle,
    ) -> BrowserResult<()> {
        if let Some(record) = self.processes.get(&group.process) {
            if record.profile != profile {
                return Err(BrowserError::new(
                    "process_map.profile_colocation",
                    format!(
                        "{} already hosts {} and cannot host {origin} for {profile}",
                        group.process, record.profile
                    ),
                ));
            }
        }
        if let Some(existing) = self.site_instances.get(&group.site_instance) {
            if existing.origin != *origin
                || existing.profile != profile
                || existing.process != group.process
            {
                return Err(BrowserError::new(
                    "process_map.site_instance_reused",
                    format!(
                        "{} already belongs to {} in {}",
                        group.site_instance, existing.origin, existing.profile
                    ),
                ));
            }
        }

        self.site_instances.insert(
            group.site_instance,
            SiteRecord {
                profile,
                origin: origin.clone(),
                process: group.process,
            },
        );
        self.processes
            .entry(group.process)
            .or_insert_with(|| ProcessRecord {
                profile,
                site_instances: BTreeSet::new(),
            })
            .site_instances
            .insert(group.site_instance);
        self.origins
            .entry((profile, origin.clone()))
            .or_default()
            .instances
            .insert(group);
        Ok(())
    }

    fn remove_site_instance(&mut self, site_instance: SiteInstanceId) -> bool {
        let Some(record) = self.site_instances.remove(&site_instance) else {
            return false;
        };
        let group = ProcessGroupHandle {
            process: record.process,
            site_instance,
        };

        if let Some(process) = self.processes.get_mut(&record.process) {
            process.site_instances.remove(&site_instance);
            if process.site_instances.is_empty() {
                self.processes.remove(&record.process);
            }
        }

        let key = (record.profile, record.origin);
        if let Some(entry) = self.origins.get_mut(&key) {
            entry.instances.remove(&group);
            if entry.shared == Some(group) {
                entry.shared = None;
            }
            if entry.instances.is_empty() {
                self.origins.remove(&key);
            }
        }
        true
    }

    fn hosts_extension(&self, process: ProcessId) -> bool {
        self.processes.get(&process).is_some_and(|record| {
            record.site_instances.iter().any(|id| {
                self.site_instances
                    .get(id)
                    .is_some_and(|site| site.origin.is_extension())
            })
        })
    }

    fn publish(&self) {
        let origins = self
            .origins
            .iter()
            .map(|((profile, origin), entry)| {
                let mut groups: Vec<ProcessGroupHandle> = entry.shared.into_iter().collect();
                groups.extend(
                    entry
                        .instances
                        .iter()
                        .copied()
                        .filter(|group| Some(*group) != entry.shared),
                );
                ((*profile, origin.as_str().to_owned()), groups)
            })
            .collect();
        let extension_processes = self
            .processes
            .keys()
            .copied()
            .filter(|process| self.is_extension_process(*process))
            .collect();
        let snapshot = ProcessMapSnapshot {
            origins,
            extension_processes,
            site_instances: self.site_instances.len(),
        };
        *self.published.write() = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::LocalProcessAllocator;
    use super::OriginKey;
    use super::OriginProcessMap;
    use super::ProcessGroupHandle;
    use pd_core::ProcessId;
    use pd_core::ProfileId;
    use pd_core::SiteInstanceId;
    use std::thread;

    const PROFILE: ProfileId = ProfileId(1);
    const OTHER_PROFILE: ProfileId = ProfileId(2);

    fn origin(input: &str) -> OriginKey {
        match OriginKey::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn map() -> OriginProcessMap {
        OriginProcessMap::new(Box::new(LocalProcessAllocator::new(ProcessId(10))))
    }

    fn resolve(map: &mut OriginProcessMap, url: &str, profile: ProfileId) -> ProcessGroupHandle {
        match map.resolve_or_create_process_group(&origin(url), profile) {
            Ok(group) => group,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn origin_key_ignores_path() {
        let index = origin("chrome-extension://abcdef/index.html");
        let page = origin("chrome-extension://abcdef/sub/page.html");
        assert_eq!(index, page);
        assert_eq!(index.as_str(), "chrome-extension://abcdef");
        assert!(index.is_extension());
        assert!(!origin("http://a.example:8080/x").is_extension());
        assert_eq!(origin("http://a.example:8080/x").as_str(), "http://a.example:8080");
    }

    #[test]
    fn extension_pages_with_affinity_share_a_group() {
        let mut map = map();
        map.register_origin_affinity(origin("chrome-extension://abcdef/"), PROFILE);

        let index = resolve(&mut map, "chrome-extension://abcdef/index.html", PROFILE);
        let page = resolve(&mut map, "chrome-extension://abcdef/sub/page.html", PROFILE);
        let other = resolve(&mut map, "chrome-extension://ghijkl/index.html", PROFILE);

        assert_eq!(index, page);
        assert_ne!(index.process, other.process);
        assert_eq!(map.site_instance_count(), 2);
    }

    #[test]
    fn profiles_never_share_a_group() {
        let mut map = map();
        let extension = origin("chrome-extension://abcdef/");
        map.register_origin_affinity(extension.clone(), PROFILE);
        map.register_origin_affinity(extension, OTHER_PROFILE);

        let first = resolve(&mut map, "chrome-extension://abcdef/index.html", PROFILE);
        let second = resolve(&mut map, "chrome-extension://abcdef/index.html", OTHER_PROFILE);

        assert_ne!(first, second);
        assert_ne!(first.process, second.process);
    }

    #[test]
    fn origins_without_affinity_are_isolated() {
        let mut map = map();
        let first = resolve(&mut map, "http://a.example/one", PROFILE);
        let second = resolve(&mut map, "http://a.example/two", PROFILE);
        assert_ne!(first, second);
        assert_eq!(
            map.process_for_origin(&origin("http://a.example/"), PROFILE),
            Some(first.process)
        );
    }

    #[test]
    fn colocating_profiles_is_refused() {
        let mut map = map();
        let group = resolve(&mut map, "http://a.example/", PROFILE);
        let colocated = ProcessGroupHandle {
            process: group.process,
            site_instance: SiteInstanceId(99),
        };

        let result = map.register_site_instance(&origin("http://a.example/"), OTHER_PROFILE, colocated);
        assert_eq!(
            result.map_err(|error| error.code),
            Err("process_map.profile_colocation")
        );
    }

    #[test]
    fn process_exit_prunes_its_site_instances() {
        let mut map = map();
        let extension = origin("chrome-extension://abcdef/");
        map.register_origin_affinity(extension.clone(), PROFILE);
        let shared = resolve(&mut map, "chrome-extension://abcdef/index.html", PROFILE);
        assert!(map.is_extension_process(shared.process));
        assert_eq!(
            map.extension_origin_for_site_instance(shared.site_instance),
            Some(&extension)
        );

        assert_eq!(map.on_process_exited(shared.process), 1);
        assert_eq!(map.process_for_origin(&extension, PROFILE), None);
        assert_eq!(map.process_count(), 0);

        let replacement = resolve(&mut map, "chrome-extension://abcdef/index.html", PROFILE);
        assert_ne!(replacement.process, shared.process);
    }

    #[test]
    fn unregistering_the_shared_instance_releases_it() {
        let mut map = map();
        let extension = origin("chrome-extension://abcdef/");
        map.register_origin_affinity(extension.clone(), PROFILE);
        let shared = resolve(&mut map, "chrome-extension://abcdef/", PROFILE);

        assert!(map.unregister_site_instance(shared.site_instance));
        assert!(!map.unregister_site_instance(shared.site_instance));
        assert_eq!(map.site_instances_for_process(shared.process), Vec::new());
        assert!(map.extension_origin_for_site_instance(shared.site_instance).is_none());
    }

    #[test]
    fn clearing_affinity_stops_sharing() {
        let mut map = map();
        let extension = origin("chrome-extension://abcdef/");
        map.register_origin_affinity(extension.clone(), PROFILE);
        let shared = resolve(&mut map, "chrome-extension://abcdef/", PROFILE);

        map.clear_origin_affinity(&extension, PROFILE);
        assert!(!map.has_affinity(&extension, PROFILE));
        let isolated = resolve(&mut map, "chrome-extension://abcdef/", PROFILE);
        assert_ne!(shared, isolated);
    }

    #[test]
    fn removing_a_profile_keeps_other_profiles() {
        let mut map = map();
        let kept = resolve(&mut map, "http://a.example/", OTHER_PROFILE);
        resolve(&mut map, "http://a.example/", PROFILE);
        resolve(&mut map, "http://b.example/", PROFILE);

        assert_eq!(map.remove_profile(PROFILE), 2);
        assert_eq!(map.site_instance_count(), 1);
        assert_eq!(
            map.process_for_origin(&origin("http://a.example/"), OTHER_PROFILE),
            Some(kept.process)
        );
    }

    #[test]
    fn readers_see_the_latest_snapshot_from_other_threads() {
        let mut map = map();
        let reader = map.reader();
        let before = reader.snapshot();

        map.register_origin_affinity(origin("chrome-extension://abcdef/"), PROFILE);
        let shared = resolve(&mut map, "chrome-extension://abcdef/index.html", PROFILE);

        let remote = reader.clone();
        let seen = thread::spawn(move || {
            let snapshot = remote.snapshot();
            (
                snapshot.process_for_origin("chrome-extension://abcdef", PROFILE),
                snapshot.is_extension_process(shared.process),
            )
        })
        .join()
        .unwrap_or_else(|_| unreachable!());

        assert_eq!(seen, (Some(shared.process), true));
        assert_eq!(before.site_instance_count(), 0);
        assert_eq!(reader.snapshot().site_instance_count(), 1);
    }
}
