use std::sync::Arc;

use thiserror::Error;

use crate::processor::Capability;

/// Main error type returned by invokers and result handlers.
///
/// Every variant is `Clone`: a failed build is observed by every caller that
/// was waiting on the same cache slot, so foreign sources are held behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum InvokeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    ProcessorSelection(#[from] ProcessorSelectionError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// URI resolution and entity retrieval failures
#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error(
        "Cannot resolve '{reference}': no resolver for scheme '{scheme}' and no file fallback registered"
    )]
    UnresolvableScheme { scheme: String, reference: String },

    #[error("No resolver registered for scheme '{scheme}': {uri}")]
    UnregisteredScheme { scheme: String, uri: String },

    #[error("Invalid URI reference '{reference}' against base {base}: {details}")]
    InvalidReference {
        base: String,
        reference: String,
        details: String,
    },

    #[error("Resource not found: {uri}")]
    NotFound { uri: String },

    #[error("IO error reading {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("HTTP error fetching {uri}: {source}")]
    Http {
        uri: String,
        #[source]
        source: Arc<reqwest::Error>,
    },

    #[error("HTTP status error: {status} for {uri} - {message}")]
    HttpStatus {
        uri: String,
        status: u16,
        message: String,
    },

    #[error("Request timeout: {uri} after {timeout_seconds} seconds")]
    Timeout { uri: String, timeout_seconds: u64 },

    #[error("Unsupported: {feature} ({uri})")]
    Unsupported { uri: String, feature: String },
}

/// Processor lookup and construction failures
#[derive(Error, Debug, Clone)]
pub enum ProcessorSelectionError {
    #[error("Unknown processor: {name}")]
    UnknownProcessor { name: String },

    #[error("No default {capability} processor configured")]
    NoDefaultConfigured { capability: Capability },

    #[error("Processor '{name}' does not support {capability}")]
    CapabilityMismatch { name: String, capability: Capability },

    #[error("Processor '{name}' could not be constructed: {details}")]
    ConstructionFailed { name: String, details: String },
}

/// Static (compile-time) failures
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("Static error in {uri}{}: {details}", line_suffix(.line))]
    Static {
        uri: String,
        line: Option<u32>,
        details: String,
    },

    #[error("Malformed source document {uri}: {source}")]
    MalformedDocument {
        uri: String,
        #[source]
        source: DocumentError,
    },

    #[error("Unsupported query binding '{binding}', expected one of: {valid}")]
    UnsupportedQueryBinding { binding: String, valid: String },

    #[error("Schematron stage {stage} failed for {base_uri}: {source}")]
    SchematronStage {
        stage: String,
        base_uri: String,
        #[source]
        source: Arc<InvokeError>,
    },
}

/// Dynamic (run-time) failures
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Dynamic error{}: {message}", location_suffix(.module_uri, .line))]
    Dynamic {
        message: String,
        line: Option<u32>,
        module_uri: Option<String>,
    },

    #[error("Failed to write output: {source}")]
    Output {
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Output is not a well-formed document: {source}")]
    MalformedOutput {
        #[source]
        source: DocumentError,
    },

    #[error("Output is not valid UTF-8")]
    Encoding,
}

/// XML document construction failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Document is not valid UTF-8")]
    InvalidUtf8,

    #[error("Document is not well-formed at line {line}, column {column}: {details}")]
    NotWellFormed {
        line: u32,
        column: u32,
        details: String,
    },

    #[error("Invalid qualified name: '{0}'")]
    InvalidName(String),
}

fn line_suffix(line: &Option<u32>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

fn location_suffix(module_uri: &Option<String>, line: &Option<u32>) -> String {
    match (module_uri, line) {
        (Some(uri), Some(line)) => format!(" in {} at line {}", uri, line),
        (Some(uri), None) => format!(" in {}", uri),
        (None, Some(line)) => format!(" at line {}", line),
        (None, None) => String::new(),
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Output {
            source: Arc::new(err),
        }
    }
}

impl ExecutionError {
    /// Create a dynamic error without location information
    pub fn dynamic<S: Into<String>>(message: S) -> Self {
        ExecutionError::Dynamic {
            message: message.into(),
            line: None,
            module_uri: None,
        }
    }
}

impl CompileError {
    /// Create a static error without a line number
    pub fn static_error<U: Into<String>, S: Into<String>>(uri: U, details: S) -> Self {
        CompileError::Static {
            uri: uri.into(),
            line: None,
            details: details.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, InvokeError>;
