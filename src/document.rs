//! In-memory XML documents, qualified names and parameter values.
//!
//! Documents are kept as their serialized text and checked for
//! well-formedness with `roxmltree` when they are constructed. The root
//! element's name, unprefixed attributes and child element names are recorded
//! at the same time, along with the text content.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use roxmltree::ParsingOptions;
use url::Url;

use crate::error::DocumentError;

/// Namespace of the Schematron Validation Report Language
pub const SVRL_NAMESPACE: &str = "http://purl.oclc.org/dsdl/svrl";

/// Cached regex for Clark-notation names: `{namespace}local`
static CLARK_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_clark_name_regex() -> &'static Regex {
    CLARK_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^(?:\{([^{}]*)\})?([^{}\s:]+)$").expect("Failed to compile Clark name regex")
    })
}

/// An expanded XML name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    namespace: Option<String>,
    local: String,
}

impl QualifiedName {
    /// A name in no namespace
    pub fn new<S: Into<String>>(local: S) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    pub fn with_namespace<N: Into<String>, S: Into<String>>(namespace: N, local: S) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
            local: local.into(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    fn from_tag(name: roxmltree::ExpandedName<'_, '_>) -> Self {
        match name.namespace() {
            Some(ns) => Self::with_namespace(ns, name.name()),
            None => Self::new(name.name()),
        }
    }
}

impl FromStr for QualifiedName {
    type Err = DocumentError;

    /// Parse a name in Clark notation (`{urn:ns}local`) or a bare local name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = get_clark_name_regex()
            .captures(s)
            .ok_or_else(|| DocumentError::InvalidName(s.to_string()))?;
        let local = caps[2].to_string();
        Ok(match caps.get(1) {
            Some(ns) => Self::with_namespace(ns.as_str(), local),
            None => Self::new(local),
        })
    }
}

impl From<&str> for QualifiedName {
    /// Lenient conversion: anything that is not valid Clark notation becomes a
    /// local name verbatim.
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| Self::new(s))
    }
}

impl From<String> for QualifiedName {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// A typed parameter or context value
#[derive(Debug, Clone, PartialEq)]
pub enum XdmValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Document(XmlDocument),
}

impl XdmValue {
    /// The string value, as `string()` would compute it
    pub fn string_value(&self) -> String {
        match self {
            XdmValue::String(s) => s.clone(),
            XdmValue::Integer(i) => i.to_string(),
            XdmValue::Double(d) => d.to_string(),
            XdmValue::Boolean(b) => b.to_string(),
            XdmValue::Document(doc) => doc.text_content(),
        }
    }
}

impl From<&str> for XdmValue {
    fn from(s: &str) -> Self {
        XdmValue::String(s.to_string())
    }
}

impl From<String> for XdmValue {
    fn from(s: String) -> Self {
        XdmValue::String(s)
    }
}

impl From<i64> for XdmValue {
    fn from(i: i64) -> Self {
        XdmValue::Integer(i)
    }
}

impl From<f64> for XdmValue {
    fn from(d: f64) -> Self {
        XdmValue::Double(d)
    }
}

impl From<bool> for XdmValue {
    fn from(b: bool) -> Self {
        XdmValue::Boolean(b)
    }
}

impl From<XmlDocument> for XdmValue {
    fn from(doc: XmlDocument) -> Self {
        XdmValue::Document(doc)
    }
}

/// A well-formed XML document with an optional base URI
#[derive(Clone, PartialEq)]
pub struct XmlDocument {
    text: Arc<str>,
    base_uri: Option<Url>,
    root: Arc<RootSummary>,
}

/// What inspection needs from the tree, taken while it is parsed
#[derive(Debug, PartialEq)]
struct RootSummary {
    name: QualifiedName,
    attributes: Vec<(String, String)>,
    children: Vec<QualifiedName>,
    text: String,
}

impl RootSummary {
    fn of(doc: &roxmltree::Document<'_>) -> Self {
        let root = doc.root_element();
        Self {
            name: QualifiedName::from_tag(root.tag_name()),
            attributes: root
                .attributes()
                .filter(|a| a.namespace().is_none())
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect(),
            children: root
                .children()
                .filter(|child| child.is_element())
                .map(|child| QualifiedName::from_tag(child.tag_name()))
                .collect(),
            text: doc
                .descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect(),
        }
    }
}

fn parsing_options() -> ParsingOptions {
    ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    }
}

impl XmlDocument {
    /// Parse document text, rejecting anything that is not well-formed
    pub fn parse<S: Into<String>>(text: S, base_uri: Option<Url>) -> Result<Self, DocumentError> {
        let text: String = text.into();
        let root = {
            let doc = roxmltree::Document::parse_with_options(&text, parsing_options()).map_err(
                |e| {
                    let pos = e.pos();
                    DocumentError::NotWellFormed {
                        line: pos.row,
                        column: pos.col,
                        details: e.to_string(),
                    }
                },
            )?;
            RootSummary::of(&doc)
        };

        Ok(Self {
            text: Arc::from(text),
            base_uri,
            root: Arc::new(root),
        })
    }

    /// Parse raw bytes, which must be UTF-8 (a leading byte order mark is skipped)
    pub fn from_bytes(bytes: &[u8], base_uri: Option<Url>) -> Result<Self, DocumentError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|_| DocumentError::InvalidUtf8)?;
        Self::parse(text, base_uri)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn base_uri(&self) -> Option<&Url> {
        self.base_uri.as_ref()
    }

    pub fn with_base_uri(mut self, base_uri: Url) -> Self {
        self.base_uri = Some(base_uri);
        self
    }

    pub fn root_name(&self) -> &QualifiedName {
        &self.root.name
    }

    /// Value of an unprefixed attribute on the root element
    pub fn root_attribute(&self, name: &str) -> Option<String> {
        self.root
            .attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value.clone())
    }

    /// Whether the root element has a child element with the given name
    pub fn root_has_child(&self, name: &QualifiedName) -> bool {
        self.root.children.contains(name)
    }

    /// Number of root children with the given name
    pub fn count_root_children(&self, name: &QualifiedName) -> usize {
        self.root.children.iter().filter(|child| *child == name).count()
    }

    /// Concatenated text nodes, in document order
    pub fn text_content(&self) -> String {
        self.root.text.clone()
    }
}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("root", &self.root.name.to_string())
            .field("base_uri", &self.base_uri.as_ref().map(Url::as_str))
            .field("len", &self.text.len())
            .finish()
    }
}
