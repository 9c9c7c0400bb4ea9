//! # xml-invoker Library
//!
//! Compile XSLT stylesheets, XQuery modules and Schematron schemas identified
//! by URI, caching each compiled executable once per (processor, URI) pair.
//! Engines plug in through the [`Processor`] trait; content is fetched through
//! scheme-keyed [`Resolver`]s.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod http_client;
pub mod invoker;
pub mod processor;
pub mod resolver;
pub mod resolvers;
pub mod runtime;
pub mod schematron;

pub use cache::{ArtifactKind, CacheStats, CompiledExecutable, ExecutableCache};
pub use config::{Config, ConfigError, ConfigManager};
pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use document::{QualifiedName, SVRL_NAMESPACE, XdmValue, XmlDocument};
pub use error::{
    CompileError, DocumentError, ExecutionError, InvokeError, ProcessorSelectionError,
    ResolutionError,
};
pub use http_client::{HttpClientConfig, HttpResolver};
pub use invoker::{
    ResultHandler, SchematronInvoker, SchematronResultHandler, XQueryInvoker, XsltInvoker,
};
pub use processor::{
    Capability, CompileOptions, DefaultItemFactory, Executable, ItemFactory, Processor,
    ProcessorHandle, ProcessorId, ProcessorRegistry,
};
pub use resolver::{
    Credentials, Resolver, ResolverRegistry, ResolverRegistryBuilder, UriResolutionService,
};
pub use resolvers::{FileResolver, MemoryResolver};
pub use runtime::{OutputMethod, RuntimeOptions, SerializationOptions};
pub use schematron::{QueryBinding, SchematronBuildPipeline};
