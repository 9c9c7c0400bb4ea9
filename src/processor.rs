//! Processor capability traits and the named processor registry.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::document::XmlDocument;
use crate::error::{CompileError, DocumentError, ExecutionError, ProcessorSelectionError};
use crate::resolver::UriResolutionService;
use crate::runtime::RuntimeOptions;

/// What kind of artifact a processor can compile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Xslt,
    XQuery,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Xslt => f.write_str("XSLT"),
            Capability::XQuery => f.write_str("XQuery"),
        }
    }
}

/// Static context handed to [`Processor::compile`]
#[derive(Clone)]
pub struct CompileOptions {
    /// Static base URI of the module being compiled
    pub base_uri: Url,
    /// Language the source is written in
    pub language: Capability,
    /// Resolver for imports and includes
    pub resolver: Arc<UriResolutionService>,
}

/// Builds documents and items in the processor's data model
pub trait ItemFactory: Send + Sync {
    fn document_from_bytes(
        &self,
        bytes: &[u8],
        base_uri: Option<&Url>,
    ) -> Result<XmlDocument, DocumentError>;
}

/// Item factory backed by [`XmlDocument`] parsing
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultItemFactory;

impl ItemFactory for DefaultItemFactory {
    fn document_from_bytes(
        &self,
        bytes: &[u8],
        base_uri: Option<&Url>,
    ) -> Result<XmlDocument, DocumentError> {
        XmlDocument::from_bytes(bytes, base_uri.cloned())
    }
}

static DEFAULT_ITEM_FACTORY: DefaultItemFactory = DefaultItemFactory;

/// An XSLT or XQuery engine.
///
/// Implementations wrap a concrete engine; the crate only compiles through
/// this trait and never inspects the produced executables.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Compile a stylesheet or query module
    async fn compile(
        &self,
        source: &[u8],
        options: &CompileOptions,
    ) -> Result<Arc<dyn Executable>, CompileError>;

    fn item_factory(&self) -> &dyn ItemFactory {
        &DEFAULT_ITEM_FACTORY
    }

    /// Highest XSLT version supported, `None` for query-only engines
    fn xslt_version(&self) -> Option<f64> {
        None
    }
}

/// A compiled, immutable stylesheet or query
#[async_trait]
pub trait Executable: Send + Sync {
    /// Execute against `options`, streaming serialized output to `output`
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError>;
}

/// Identity of a processor instance, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(u64);

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

/// A named processor instance together with its capabilities
#[derive(Clone)]
pub struct ProcessorHandle {
    id: ProcessorId,
    name: Arc<str>,
    capabilities: Arc<[Capability]>,
    processor: Arc<dyn Processor>,
}

impl ProcessorHandle {
    pub fn new(name: &str, capabilities: &[Capability], processor: Arc<dyn Processor>) -> Self {
        Self {
            id: ProcessorId(NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed)),
            name: Arc::from(name),
            capabilities: Arc::from(capabilities),
            processor,
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Constructor registered for a processor name
pub type ProcessorFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Processor>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    capabilities: Vec<Capability>,
    factory: ProcessorFactory,
}

type Slot = Arc<OnceCell<ProcessorHandle>>;
type NamesView = Arc<HashMap<Capability, BTreeSet<String>>>;

/// Maps processor names to lazily constructed singleton instances.
///
/// Re-registering a name after its instance was built leaves the built
/// instance in place; only the names-by-capability view is recomputed.
#[derive(Default)]
pub struct ProcessorRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    slots: Mutex<HashMap<String, Slot>>,
    defaults: RwLock<HashMap<Capability, String>>,
    /// Derived from `registrations`; written only while that lock is held
    names_view: RwLock<Option<NamesView>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, capabilities: &[Capability], factory: F)
    where
        F: Fn() -> anyhow::Result<Arc<dyn Processor>> + Send + Sync + 'static,
    {
        let registration = Registration {
            capabilities: capabilities.to_vec(),
            factory: Arc::new(factory),
        };
        let mut registrations = self.registrations.write();
        registrations.insert(name.to_string(), registration);
        *self.names_view.write() = None;
    }

    pub fn set_default(&self, capability: Capability, name: &str) {
        self.defaults.write().insert(capability, name.to_string());
    }

    /// Get the singleton instance for `name`, constructing it on first use
    pub fn get(&self, name: &str) -> Result<ProcessorHandle, ProcessorSelectionError> {
        let registration = self.registrations.read().get(name).cloned().ok_or_else(|| {
            ProcessorSelectionError::UnknownProcessor {
                name: name.to_string(),
            }
        })?;

        let slot = self
            .slots
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();

        // A failed construction leaves the cell empty for the next caller
        slot.get_or_try_init(|| -> Result<_, ProcessorSelectionError> {
            let processor = (registration.factory)().map_err(|e| {
                ProcessorSelectionError::ConstructionFailed {
                    name: name.to_string(),
                    details: format!("{:#}", e),
                }
            })?;
            let handle = ProcessorHandle::new(name, &registration.capabilities, processor);
            debug!(processor = name, id = ?handle.id(), "constructed processor");
            Ok(handle)
        })
        .cloned()
    }

    /// The default processor configured for `capability`
    pub fn default_for(
        &self,
        capability: Capability,
    ) -> Result<ProcessorHandle, ProcessorSelectionError> {
        let name = self
            .defaults
            .read()
            .get(&capability)
            .cloned()
            .ok_or(ProcessorSelectionError::NoDefaultConfigured { capability })?;
        self.select(Some(&name), capability)
    }

    /// Pick the named processor, or the default for `capability`
    pub fn select(
        &self,
        name: Option<&str>,
        capability: Capability,
    ) -> Result<ProcessorHandle, ProcessorSelectionError> {
        let Some(name) = name else {
            return self.default_for(capability);
        };

        let handle = self.get(name)?;
        if !handle.supports(capability) {
            return Err(ProcessorSelectionError::CapabilityMismatch {
                name: name.to_string(),
                capability,
            });
        }
        Ok(handle)
    }

    /// Registered names supporting `capability`
    pub fn names(&self, capability: Capability) -> BTreeSet<String> {
        if let Some(view) = self.names_view.read().as_ref() {
            return view.get(&capability).cloned().unwrap_or_default();
        }

        let registrations = self.registrations.read();
        let mut names_view = self.names_view.write();
        let view = names_view.get_or_insert_with(|| {
            let mut view: HashMap<Capability, BTreeSet<String>> = HashMap::new();
            for (name, registration) in registrations.iter() {
                for capability in &registration.capabilities {
                    view.entry(*capability).or_default().insert(name.clone());
                }
            }
            Arc::new(view)
        });
        view.get(&capability).cloned().unwrap_or_default()
    }
}
