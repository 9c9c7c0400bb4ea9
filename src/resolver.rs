//! Scheme-keyed URI resolution and entity retrieval.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use bytes::Bytes;
use tracing::{debug, trace};
use url::Url;

use crate::config::{ConfigError, NetworkConfig};
use crate::error::ResolutionError;
use crate::http_client::HttpResolver;
use crate::resolvers::{BUNDLED_SCHEMATRON_BASE, FileResolver, MemoryResolver};

/// Credentials passed to resolvers on every fetch
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new<U: Into<String>>(username: U, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Resolves references and fetches content for one or more URI schemes
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `relative` against `base`, RFC 3986 style by default
    fn resolve_uri(&self, base: &Url, relative: &str) -> Result<Url, ResolutionError> {
        base.join(relative)
            .map_err(|e| ResolutionError::InvalidReference {
                base: base.to_string(),
                reference: relative.to_string(),
                details: e.to_string(),
            })
    }

    async fn get_entity(
        &self,
        uri: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Bytes, ResolutionError>;
}

/// Drop the fragment so `a.xsl#x` and `a.xsl` share one cache entry
pub fn normalize_uri(uri: &Url) -> Url {
    let mut normalized = uri.clone();
    normalized.set_fragment(None);
    normalized
}

type ResolverFactory = Arc<dyn Fn() -> Arc<dyn Resolver> + Send + Sync>;

/// Frozen scheme → resolver factory table, built once at startup
pub struct ResolverRegistry {
    factories: HashMap<String, ResolverFactory>,
}

impl ResolverRegistry {
    pub fn builder() -> ResolverRegistryBuilder {
        ResolverRegistryBuilder::default()
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    fn create(&self, scheme: &str) -> Option<Arc<dyn Resolver>> {
        self.factories.get(scheme).map(|factory| factory())
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[derive(Default)]
pub struct ResolverRegistryBuilder {
    factories: HashMap<String, ResolverFactory>,
}

impl ResolverRegistryBuilder {
    /// Register a factory; the service calls it at most once per scheme
    pub fn register<F>(mut self, scheme: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Resolver> + Send + Sync + 'static,
    {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Register an already constructed resolver
    pub fn register_instance(self, scheme: &str, resolver: Arc<dyn Resolver>) -> Self {
        self.register(scheme, move || resolver.clone())
    }

    /// Register the built-in `file`, `http` and `https` resolvers, and `res` for the bundled stylesheets
    pub fn with_defaults(self, network: &NetworkConfig) -> Result<Self, ConfigError> {
        let http: Arc<dyn Resolver> = Arc::new(HttpResolver::from_network_config(network)?);
        let bundled: Arc<dyn Resolver> =
            Arc::new(MemoryResolver::bundled().map_err(|e| ConfigError::InvalidUri {
                uri: BUNDLED_SCHEMATRON_BASE.to_string(),
                details: e.to_string(),
            })?);
        Ok(self
            .register("file", || Arc::new(FileResolver))
            .register_instance("http", http.clone())
            .register_instance("https", http)
            .register_instance("res", bundled))
    }

    pub fn build(self) -> ResolverRegistry {
        ResolverRegistry {
            factories: self.factories,
        }
    }
}

/// Resolves identifiers and fetches content through a [`ResolverRegistry`]
pub struct UriResolutionService {
    registry: Arc<ResolverRegistry>,
    instances: RwLock<HashMap<String, Arc<dyn Resolver>>>,
    default_base: Url,
    credentials: Option<Credentials>,
}

impl UriResolutionService {
    pub fn new(registry: Arc<ResolverRegistry>, default_base: Url) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
            default_base,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn default_base(&self) -> &Url {
        &self.default_base
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Resolve `relative` against `base`, or the default base when absent
    pub fn resolve_uri(&self, base: Option<&Url>, relative: &str) -> Result<Url, ResolutionError> {
        let base = base.unwrap_or(&self.default_base);
        let resolver = self
            .resolver_for(base.scheme())
            .or_else(|| self.resolver_for("file"))
            .ok_or_else(|| ResolutionError::UnresolvableScheme {
                scheme: base.scheme().to_string(),
                reference: relative.to_string(),
            })?;

        let resolved = resolver.resolve_uri(base, relative)?;
        trace!(base = %base, reference = relative, resolved = %resolved, "resolved uri");
        Ok(resolved)
    }

    /// Fetch the content behind an absolute URI
    pub async fn get_entity(&self, uri: &Url) -> Result<Bytes, ResolutionError> {
        let resolver =
            self.resolver_for(uri.scheme())
                .ok_or_else(|| ResolutionError::UnregisteredScheme {
                    scheme: uri.scheme().to_string(),
                    uri: uri.to_string(),
                })?;
        resolver.get_entity(uri, self.credentials.as_ref()).await
    }

    fn resolver_for(&self, scheme: &str) -> Option<Arc<dyn Resolver>> {
        if let Some(resolver) = self.instances.read().get(scheme) {
            return Some(resolver.clone());
        }

        let mut instances = self.instances.write();
        if let Some(resolver) = instances.get(scheme) {
            return Some(resolver.clone());
        }
        let resolver = self.registry.create(scheme)?;
        debug!(scheme, "instantiated resolver");
        instances.insert(scheme.to_string(), resolver.clone());
        Some(resolver)
    }
}

impl fmt::Debug for UriResolutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriResolutionService")
            .field("registry", &self.registry)
            .field("default_base", &self.default_base.as_str())
            .field("credentials", &self.credentials)
            .finish()
    }
}
