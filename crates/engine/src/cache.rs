use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use serde_json::Value;

use crate::{Clock, Error, Namespace, ResourceRef, Result};
use values::Age;

/// How a query treats cached snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlag {
    /// Refresh everything; no staleness warning.
    AlwaysUpdate,
    /// Refresh what's missing or expired.
    Check,
    /// Refresh only what's missing.
    NeverUpdate,
}

/// On-disk snapshots of fetched resources, one file per cacheable resource
/// at `<schema>/<resource cache path>`. Files are whole-document JSON and
/// are never deleted by the engine.
#[derive(Clone)]
pub struct DataCache {
    dir: PathBuf,
    timeout: Age,
    clock: Arc<dyn Clock>,
}

impl DataCache {
    pub fn new(dir: PathBuf, timeout: Age, clock: Arc<dyn Clock>) -> DataCache {
        DataCache {
            dir,
            timeout,
            clock,
        }
    }

    /// Split `resources` into those to refresh and those to serve from
    /// cache, and report the age of the oldest kept snapshot.
    ///
    /// Non-cacheable resources are always refreshed and never counted
    /// toward the staleness age.
    pub fn advise_refresh(
        &self,
        resources: &BTreeSet<ResourceRef>,
        flag: CacheFlag,
        namespace: &Namespace,
    ) -> Result<(BTreeSet<ResourceRef>, Option<i64>)> {
        if flag == CacheFlag::AlwaysUpdate {
            return Ok((resources.clone(), None));
        }

        let mut refresh = BTreeSet::new();
        let mut ages = BTreeMap::new();
        for resource in resources {
            if !resource.resource.cacheable() {
                refresh.insert(resource.clone());
                continue;
            }
            let path = self
                .snapshot_path(resource, namespace)
                .map_err(|err| Error::Fetch {
                    schema: resource.schema.clone(),
                    name: resource.resource.name().to_string(),
                    err,
                })?;
            ages.insert(resource.clone(), self.age(&path));
        }

        let timeout = self.timeout.seconds() as i64;
        let mut max_age = None;
        for (resource, age) in &ages {
            let refreshable = match (flag, age) {
                (_, None) => true,
                (CacheFlag::Check, Some(age)) => *age >= timeout,
                _ => false,
            };
            if refreshable {
                refresh.insert(resource.clone());
            } else {
                max_age = max_age.max(*age);
            }
        }

        tracing::debug!(
            target: "cache",
            ages = %ages
                .iter()
                .map(|(r, age)| match age {
                    Some(age) => format!("{}={age}", r.qualified()),
                    None => format!("{}=missing", r.qualified()),
                })
                .collect::<Vec<_>>()
                .join(" "),
            refresh = %refresh
                .iter()
                .map(ResourceRef::qualified)
                .collect::<Vec<_>>()
                .join(" "),
            ?max_age,
            "cache advice"
        );
        Ok((refresh, max_age))
    }

    pub fn dump(
        &self,
        resource: &ResourceRef,
        namespace: &Namespace,
        document: &Value,
    ) -> anyhow::Result<()> {
        let path = self.snapshot_path(resource, namespace)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string(document)?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write cache file {}", path.display()))
    }

    pub fn load(&self, resource: &ResourceRef, namespace: &Namespace) -> anyhow::Result<Value> {
        let path = self.snapshot_path(resource, namespace)?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read cache file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid cache file {}", path.display()))
    }

    /// The absolute snapshot path for a cacheable resource.
    pub fn snapshot_path(
        &self,
        resource: &ResourceRef,
        namespace: &Namespace,
    ) -> anyhow::Result<PathBuf> {
        Ok(self
            .dir
            .join(&resource.schema)
            .join(resource.resource.cache_path(namespace)?))
    }

    /// Age of a snapshot in seconds relative to the injected clock, or
    /// None if it doesn't exist.
    pub fn age(&self, path: &Path) -> Option<i64> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let mtime = modified.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        Some(self.clock.now() - mtime)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FakeClock, KubernetesResource, Resource};

    fn kube(name: &str, cacheable: bool) -> ResourceRef {
        ResourceRef::new(
            "kubernetes",
            Arc::new(Resource::Kubernetes(KubernetesResource {
                name: name.to_string(),
                namespaced: true,
                cacheable,
            })),
        )
    }

    struct Fixture {
        cache: DataCache,
        clock: Arc<FakeClock>,
        all: BTreeSet<ResourceRef>,
        _dir: tempfile::TempDir,
    }

    /// pods and nodes are cached, jobs is missing, events is non-cacheable.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FakeClock::new(0));
        let cache = DataCache::new(dir.path().to_path_buf(), Age(60), clock.clone());
        let namespace = Namespace::Named("foo".to_string());

        let mut all = BTreeSet::new();
        let mut mtime = 0;
        for (name, cacheable, cached) in [
            ("pods", true, true),
            ("nodes", true, true),
            ("jobs", true, false),
            ("events", false, true),
        ] {
            let resource = kube(name, cacheable);
            if cached && cacheable {
                let path = cache.snapshot_path(&resource, &namespace).unwrap();
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, "{}").unwrap();
                let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
                if mtime == 0 {
                    mtime = modified.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
                }
            }
            all.insert(resource);
        }
        // Snapshots were just written; age the oldest 50 seconds.
        clock.set(mtime + 50);
        Fixture {
            cache,
            clock,
            all,
            _dir: dir,
        }
    }

    fn names(set: &BTreeSet<ResourceRef>) -> Vec<String> {
        set.iter().map(|r| r.resource.name().to_string()).collect()
    }

    #[test]
    fn always_update_refreshes_everything() {
        let fixture = fixture();
        let (refresh, max_age) = fixture
            .cache
            .advise_refresh(
                &fixture.all,
                CacheFlag::AlwaysUpdate,
                &Namespace::Named("foo".to_string()),
            )
            .unwrap();
        assert_eq!(refresh, fixture.all);
        assert_eq!(max_age, None);
    }

    #[test]
    fn never_update_refreshes_missing_and_non_cacheable() {
        let fixture = fixture();
        let (refresh, max_age) = fixture
            .cache
            .advise_refresh(
                &fixture.all,
                CacheFlag::NeverUpdate,
                &Namespace::Named("foo".to_string()),
            )
            .unwrap();
        assert_eq!(names(&refresh), vec!["events", "jobs"]);
        assert_eq!(max_age, Some(50));

        // Even when everything cached is expired, NEVER_UPDATE keeps it.
        fixture.clock.sleep(std::time::Duration::from_secs(100));
        let (refresh, max_age) = fixture
            .cache
            .advise_refresh(
                &fixture.all,
                CacheFlag::NeverUpdate,
                &Namespace::Named("foo".to_string()),
            )
            .unwrap();
        assert_eq!(names(&refresh), vec!["events", "jobs"]);
        assert_eq!(max_age, Some(150));
    }

    #[test]
    fn check_refreshes_expired_too() {
        let fixture = fixture();
        let namespace = Namespace::Named("foo".to_string());

        // At age 50 nothing has expired (timeout 60).
        let (refresh, max_age) = fixture
            .cache
            .advise_refresh(&fixture.all, CacheFlag::Check, &namespace)
            .unwrap();
        assert_eq!(names(&refresh), vec!["events", "jobs"]);
        assert_eq!(max_age, Some(50));

        // At age 70 the cached snapshots expire and nothing is kept.
        fixture.clock.sleep(std::time::Duration::from_secs(20));
        let (refresh, max_age) = fixture
            .cache
            .advise_refresh(&fixture.all, CacheFlag::Check, &namespace)
            .unwrap();
        assert_eq!(names(&refresh), vec!["events", "jobs", "nodes", "pods"]);
        assert_eq!(max_age, None);
    }

    #[test]
    fn dump_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new(dir.path().to_path_buf(), Age(60), Arc::new(FakeClock::new(0)));
        let resource = kube("pods", true);
        let namespace = Namespace::Default;

        let document = serde_json::json!({"items": [{"name": "pod-1"}]});
        cache.dump(&resource, &namespace, &document).unwrap();
        assert_eq!(cache.load(&resource, &namespace).unwrap(), document);
        assert!(dir
            .path()
            .join("kubernetes/default.pods.json")
            .is_file());
    }
}
