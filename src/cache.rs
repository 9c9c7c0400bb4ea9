use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use parking_lot::RwLock;
use url::Url;

use crate::error::InvokeError;
use crate::processor::{Capability, Executable, ProcessorHandle, ProcessorId};
use crate::resolver::normalize_uri;
use tracing::debug;

/// What a cached executable was compiled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Xslt,
    XQuery,
    Schematron,
}

impl ArtifactKind {
    /// Capability the compiling processor needs; Schematron compiles to XSLT
    pub fn capability(self) -> Capability {
        match self {
            ArtifactKind::Xslt | ArtifactKind::Schematron => Capability::Xslt,
            ArtifactKind::XQuery => Capability::XQuery,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Xslt => f.write_str("xslt"),
            ArtifactKind::XQuery => f.write_str("xquery"),
            ArtifactKind::Schematron => f.write_str("schematron"),
        }
    }
}

/// A compiled artifact and the context it was compiled in
pub struct CompiledExecutable {
    pub executable: Arc<dyn Executable>,
    pub processor: ProcessorHandle,
    /// Static base URI used at compile time
    pub base_uri: Url,
    pub kind: ArtifactKind,
}

impl fmt::Debug for CompiledExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExecutable")
            .field("processor", &self.processor.name())
            .field("base_uri", &self.base_uri.as_str())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Builder invocations, successful or not
    pub builds_started: u64,
    pub builds_failed: u64,
    /// Cached entries keyed by processor name
    pub entries_per_processor: BTreeMap<String, u64>,
}

impl CacheStats {
    pub fn total_entries(&self) -> u64 {
        self.entries_per_processor.values().sum()
    }
}

type ProcessorCache = Cache<String, Arc<CompiledExecutable>>;

/// Two-level memoization of compiled executables: processor, then absolute URI.
///
/// Entries live for the life of the cache. Concurrent requests for one key
/// share a single build; a failed build leaves no entry behind.
pub struct ExecutableCache {
    kind: ArtifactKind,
    processors: RwLock<HashMap<ProcessorId, (String, Arc<ProcessorCache>)>>,
    builds_started: AtomicU64,
    builds_failed: AtomicU64,
}

impl ExecutableCache {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            processors: RwLock::new(HashMap::new()),
            builds_started: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Get the executable for (`processor`, `uri`), running `builder` on a miss.
    ///
    /// `builder` runs at most once per key among concurrent callers; the
    /// others wait for its result, including its error.
    pub async fn get_or_build<F, Fut>(
        &self,
        processor: &ProcessorHandle,
        uri: &Url,
        builder: F,
    ) -> Result<Arc<CompiledExecutable>, InvokeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Executable>, InvokeError>>,
    {
        let uri = normalize_uri(uri);
        let cache = self.processor_cache(processor);
        let kind = self.kind;

        let build = async {
            self.builds_started.fetch_add(1, Ordering::Relaxed);
            debug!(kind = %kind, uri = %uri, processor = processor.name(), "building executable");

            match builder().await {
                Ok(executable) => Ok(Arc::new(CompiledExecutable {
                    executable,
                    processor: processor.clone(),
                    base_uri: uri.clone(),
                    kind,
                })),
                Err(e) => {
                    self.builds_failed.fetch_add(1, Ordering::Relaxed);
                    Err(e)
                }
            }
        };

        cache
            .try_get_with(uri.to_string(), build)
            .await
            .map_err(|e| (*e).clone()) // Unwrap the Arc<E> from moka
    }

    /// Whether a built executable is cached for the key
    pub fn contains(&self, processor: &ProcessorHandle, uri: &Url) -> bool {
        self.processors
            .read()
            .get(&processor.id())
            .is_some_and(|(_, cache)| cache.contains_key(normalize_uri(uri).as_str()))
    }

    pub async fn stats(&self) -> CacheStats {
        let caches: Vec<(String, Arc<ProcessorCache>)> =
            self.processors.read().values().cloned().collect();

        let mut entries_per_processor = BTreeMap::new();
        for (name, cache) in caches {
            cache.run_pending_tasks().await;
            *entries_per_processor.entry(name).or_insert(0) += cache.entry_count();
        }

        CacheStats {
            builds_started: self.builds_started.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
            entries_per_processor,
        }
    }

    fn processor_cache(&self, processor: &ProcessorHandle) -> Arc<ProcessorCache> {
        if let Some((_, cache)) = self.processors.read().get(&processor.id()) {
            return cache.clone();
        }

        self.processors
            .write()
            .entry(processor.id())
            .or_insert_with(|| {
                (
                    processor.name().to_string(),
                    Arc::new(Cache::builder().build()),
                )
            })
            .1
            .clone()
    }
}
