use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::cache::{ArtifactKind, ExecutableCache};
use crate::config::{Config, ConfigError, ConfigManager};
use crate::processor::{Capability, Processor, ProcessorRegistry};
use crate::resolver::{Credentials, Resolver, ResolverRegistry, UriResolutionService};
use crate::schematron::SchematronBuildPipeline;

type ResolverFactory = Box<dyn Fn() -> Arc<dyn Resolver> + Send + Sync>;

/// Everything the invokers share: processors, resolution, caches and config.
///
/// Build one per application (or per test) and hand it around as
/// `Arc<RuntimeContext>`.
pub struct RuntimeContext {
    config: Config,
    processors: ProcessorRegistry,
    resolver: Arc<UriResolutionService>,
    xslt_cache: ExecutableCache,
    xquery_cache: ExecutableCache,
    schematron_cache: ExecutableCache,
    schematron: SchematronBuildPipeline,
}

impl RuntimeContext {
    pub fn builder(config: Config) -> RuntimeContextBuilder {
        RuntimeContextBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn resolver(&self) -> &Arc<UriResolutionService> {
        &self.resolver
    }

    /// The executable cache for one artifact kind
    pub fn cache(&self, kind: ArtifactKind) -> &ExecutableCache {
        match kind {
            ArtifactKind::Xslt => &self.xslt_cache,
            ArtifactKind::XQuery => &self.xquery_cache,
            ArtifactKind::Schematron => &self.schematron_cache,
        }
    }

    pub fn schematron_pipeline(&self) -> &SchematronBuildPipeline {
        &self.schematron
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

pub struct RuntimeContextBuilder {
    config: Config,
    default_resolvers: bool,
    resolvers: Vec<(String, ResolverFactory)>,
    credentials: Option<Credentials>,
    processors: ProcessorRegistry,
    defaults: Vec<(Capability, String)>,
}

impl RuntimeContextBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            default_resolvers: true,
            resolvers: Vec::new(),
            credentials: None,
            processors: ProcessorRegistry::new(),
            defaults: Vec::new(),
        }
    }

    /// Register a resolver instance for `scheme`, replacing any built-in one
    pub fn resolver(self, scheme: &str, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver_factory(scheme, move || resolver.clone())
    }

    /// Register a resolver constructed on first use of `scheme`
    pub fn resolver_factory<F>(mut self, scheme: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Resolver> + Send + Sync + 'static,
    {
        self.resolvers.push((scheme.to_string(), Box::new(factory)));
        self
    }

    /// Skip the built-in `file`, `http`, `https` and `res` resolvers
    pub fn without_default_resolvers(mut self) -> Self {
        self.default_resolvers = false;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn processor<F>(self, name: &str, capabilities: &[Capability], factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Processor>> + Send + Sync + 'static,
    {
        self.processors.register(name, capabilities, factory);
        self
    }

    /// Default processor for `capability`, taking precedence over the config
    pub fn default_processor(mut self, capability: Capability, name: &str) -> Self {
        self.defaults.push((capability, name.to_string()));
        self
    }

    pub fn build(self) -> Result<Arc<RuntimeContext>, ConfigError> {
        ConfigManager::validate_config(&self.config)?;
        let default_base: Url = ConfigManager::default_base_uri(&self.config)?;
        let resource_base = ConfigManager::schematron_base_uri(&self.config)?;

        let mut registry = ResolverRegistry::builder();
        if self.default_resolvers {
            registry = registry.with_defaults(&self.config.network)?;
        }
        for (scheme, factory) in self.resolvers {
            registry = registry.register(&scheme, move || factory());
        }

        let mut service = UriResolutionService::new(Arc::new(registry.build()), default_base);
        if let Some(credentials) = self.credentials {
            service = service.with_credentials(credentials);
        }
        let resolver = Arc::new(service);

        let configured = [
            (Capability::Xslt, &self.config.processors.default_xslt),
            (Capability::XQuery, &self.config.processors.default_xquery),
        ];
        for (capability, name) in configured {
            if let Some(name) = name {
                self.processors.set_default(capability, name);
            }
        }
        for (capability, name) in &self.defaults {
            self.processors.set_default(*capability, name);
        }

        Ok(Arc::new(RuntimeContext {
            schematron: SchematronBuildPipeline::new(resolver.clone(), resource_base),
            config: self.config,
            processors: self.processors,
            resolver,
            xslt_cache: ExecutableCache::new(ArtifactKind::Xslt),
            xquery_cache: ExecutableCache::new(ArtifactKind::XQuery),
            schematron_cache: ExecutableCache::new(ArtifactKind::Schematron),
        }))
    }
}
