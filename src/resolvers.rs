//! Built-in `file` and in-memory resolvers.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use bytes::Bytes;
use url::Url;

use crate::error::ResolutionError;
use crate::resolver::{Credentials, Resolver, normalize_uri};

/// Reads `file:` URIs from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FileResolver;

#[async_trait]
impl Resolver for FileResolver {
    async fn get_entity(
        &self,
        uri: &Url,
        _credentials: Option<&Credentials>,
    ) -> Result<Bytes, ResolutionError> {
        let path = uri
            .to_file_path()
            .map_err(|_| ResolutionError::InvalidReference {
                base: String::new(),
                reference: uri.to_string(),
                details: "not a local file path".to_string(),
            })?;

        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ResolutionError::NotFound {
                uri: uri.to_string(),
            }),
            Err(e) => Err(ResolutionError::Io {
                uri: uri.to_string(),
                source: e.into(),
            }),
        }
    }
}

/// Where the bundled Schematron stage stylesheets are served
pub const BUNDLED_SCHEMATRON_BASE: &str = "res:///schematron/";

/// Stage stylesheets compiled into the crate, relative to [`BUNDLED_SCHEMATRON_BASE`]
const BUNDLED_SCHEMATRON_STAGES: [(&str, &str); 6] = [
    (
        "xslt1/iso_dsdl_include.xsl",
        include_str!("../resources/schematron/xslt1/iso_dsdl_include.xsl"),
    ),
    (
        "xslt1/iso_abstract_expand.xsl",
        include_str!("../resources/schematron/xslt1/iso_abstract_expand.xsl"),
    ),
    (
        "xslt1/iso_svrl_for_xslt1.xsl",
        include_str!("../resources/schematron/xslt1/iso_svrl_for_xslt1.xsl"),
    ),
    (
        "xslt2/iso_dsdl_include.xsl",
        include_str!("../resources/schematron/xslt2/iso_dsdl_include.xsl"),
    ),
    (
        "xslt2/iso_abstract_expand.xsl",
        include_str!("../resources/schematron/xslt2/iso_abstract_expand.xsl"),
    ),
    (
        "xslt2/iso_svrl_for_xslt2.xsl",
        include_str!("../resources/schematron/xslt2/iso_svrl_for_xslt2.xsl"),
    ),
];

/// In-process resources keyed by URI, typically bundled stylesheets under `res:`
#[derive(Debug, Default)]
pub struct MemoryResolver {
    entries: RwLock<HashMap<Url, Bytes>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resources shipped with the crate: the Schematron stage stylesheets
    pub fn bundled() -> Result<Self, url::ParseError> {
        let base = Url::parse(BUNDLED_SCHEMATRON_BASE)?;
        let resolver = Self::new();
        for (path, content) in BUNDLED_SCHEMATRON_STAGES {
            resolver.insert(base.join(path)?, Bytes::from_static(content.as_bytes()));
        }
        Ok(resolver)
    }

    pub fn with_entry<C: Into<Bytes>>(self, uri: Url, content: C) -> Self {
        self.insert(uri, content);
        self
    }

    /// Add or replace a resource
    pub fn insert<C: Into<Bytes>>(&self, uri: Url, content: C) {
        self.entries.write().insert(normalize_uri(&uri), content.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn get_entity(
        &self,
        uri: &Url,
        _credentials: Option<&Credentials>,
    ) -> Result<Bytes, ResolutionError> {
        self.entries
            .read()
            .get(&normalize_uri(uri))
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound {
                uri: uri.to_string(),
            })
    }
}
