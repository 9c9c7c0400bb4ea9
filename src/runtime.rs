//! Per-invocation runtime options.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::{QualifiedName, XdmValue, XmlDocument};
use crate::resolver::UriResolutionService;

/// Serialization method for executable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    Xml,
    Html,
    Xhtml,
    Text,
}

/// Serialization overrides; unset fields defer to the executable's own settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializationOptions {
    pub method: Option<OutputMethod>,
    pub indent: Option<bool>,
    pub omit_xml_declaration: Option<bool>,
    pub encoding: Option<String>,
    pub media_type: Option<String>,
}

impl SerializationOptions {
    /// Overlay `other` on top of `self`, `other` winning where set
    pub fn merge(&self, other: &SerializationOptions) -> SerializationOptions {
        SerializationOptions {
            method: other.method.or(self.method),
            indent: other.indent.or(self.indent),
            omit_xml_declaration: other.omit_xml_declaration.or(self.omit_xml_declaration),
            encoding: other.encoding.clone().or_else(|| self.encoding.clone()),
            media_type: other.media_type.clone().or_else(|| self.media_type.clone()),
        }
    }
}

/// Everything an executable needs for one run
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub context_item: Option<XmlDocument>,
    pub parameters: HashMap<QualifiedName, XdmValue>,
    /// Schematron phase to evaluate
    pub phase: Option<String>,
    pub serialization: SerializationOptions,
    /// Resolver for `document()`/`doc()` calls during the run
    pub resolver: Option<Arc<UriResolutionService>>,
}

impl RuntimeOptions {
    pub fn new(context_item: Option<XmlDocument>) -> Self {
        Self {
            context_item,
            parameters: HashMap::new(),
            phase: None,
            serialization: SerializationOptions::default(),
            resolver: None,
        }
    }

    /// Bind a parameter, returning the value it replaced
    pub fn set_parameter<N, V>(&mut self, name: N, value: V) -> Option<XdmValue>
    where
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        self.parameters.insert(name.into(), value.into())
    }

    pub fn parameter(&self, name: &QualifiedName) -> Option<&XdmValue> {
        self.parameters.get(name)
    }

    pub fn with_resolver(mut self, resolver: Arc<UriResolutionService>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}
