#![allow(dead_code)]

//! A scripted processor and in-memory fixtures for driving the public API.
//!
//! Stylesheets understood by [`StubProcessor`] are single elements in the
//! `urn:stub` namespace; the local name picks the behaviour. Real
//! `xsl:stylesheet` documents are accepted only for the Schematron stages.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use xml_invoker::{
    Capability, CompileError, CompileOptions, Config, DocumentError, Executable, ExecutionError,
    MemoryResolver, Processor, RuntimeContext, RuntimeOptions, SVRL_NAMESPACE, XmlDocument,
};

pub const STUB_NS: &str = "urn:stub";
pub const SCHEMATRON_NS: &str = "http://purl.oclc.org/dsdl/schematron";
pub const XSL_NS: &str = "http://www.w3.org/1999/XSL/Transform";

/// Counts compiles and optionally slows them down
#[derive(Clone, Default)]
pub struct StubProcessor {
    pub compiles: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
    pub xslt_version: Option<f64>,
}

impl StubProcessor {
    pub fn new() -> Self {
        Self {
            xslt_version: Some(3.0),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for StubProcessor {
    async fn compile(
        &self,
        source: &[u8],
        options: &CompileOptions,
    ) -> Result<Arc<dyn Executable>, CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let module = options.base_uri.to_string();
        let text = std::str::from_utf8(source)
            .map_err(|_| CompileError::static_error(&module, "source is not UTF-8"))?;
        let doc = roxmltree::Document::parse(text).map_err(|e| CompileError::Static {
            uri: module.clone(),
            line: Some(e.pos().row),
            details: e.to_string(),
        })?;

        let root = doc.root_element();
        if root.has_tag_name((XSL_NS, "stylesheet")) {
            return bundled_stage(&module, &options.base_uri);
        }
        if root.tag_name().namespace() != Some(STUB_NS) {
            return Err(CompileError::static_error(&module, "not a stub stylesheet"));
        }

        let executable: Arc<dyn Executable> = match root.tag_name().name() {
            "identity" => Arc::new(Identity),
            "echo" => Arc::new(Echo),
            "param-value" => Arc::new(ParamValue {
                name: root.attribute("name").unwrap_or_default().to_string(),
            }),
            "svrl-generator" => Arc::new(SvrlGenerator),
            "emit" => Arc::new(Emit {
                text: root.attribute("text").unwrap_or_default().to_string(),
            }),
            "validator" => Arc::new(Validator {
                requirements: root
                    .children()
                    .filter(|n| n.has_tag_name((STUB_NS, "require")))
                    .map(|n| Requirement {
                        element: n.attribute("element").unwrap_or_default().to_string(),
                        message: n.attribute("message").unwrap_or_default().to_string(),
                        phase: n.attribute("phase").map(str::to_string),
                    })
                    .collect(),
            }),
            "fail" => Arc::new(Fail {
                module,
                line: root.attribute("line").and_then(|l| l.parse().ok()),
            }),
            other => {
                return Err(CompileError::static_error(
                    &module,
                    format!("unknown instruction '{}'", other),
                ));
            }
        };
        Ok(executable)
    }

    fn xslt_version(&self) -> Option<f64> {
        self.xslt_version
    }
}

/// Real stage stylesheets are stood in for by what their file name says they do
fn bundled_stage(module: &str, uri: &Url) -> Result<Arc<dyn Executable>, CompileError> {
    let stage = uri
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|file| file.strip_suffix(".xsl"))
        .unwrap_or_default();
    match stage {
        "iso_dsdl_include" | "iso_abstract_expand" => Ok(Arc::new(Identity)),
        "iso_svrl_for_xslt1" | "iso_svrl_for_xslt2" => Ok(Arc::new(SvrlGenerator)),
        other => Err(CompileError::static_error(
            module,
            format!("no stand-in for stylesheet '{}'", other),
        )),
    }
}

fn context_item(options: &RuntimeOptions) -> Result<&XmlDocument, ExecutionError> {
    options
        .context_item
        .as_ref()
        .ok_or_else(|| ExecutionError::dynamic("XPDY0002: context item is absent"))
}

/// Copies the context item through unchanged
struct Identity;

#[async_trait]
impl Executable for Identity {
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        output.write_all(context_item(options)?.as_bytes())?;
        Ok(())
    }
}

/// Wraps the context item's text content in `<echo>`
struct Echo;

#[async_trait]
impl Executable for Echo {
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        let text = options
            .context_item
            .as_ref()
            .map(|doc| doc.text_content())
            .unwrap_or_default();
        write!(output, "<echo>{}</echo>", text.trim())?;
        Ok(())
    }
}

/// Writes `text` verbatim, well-formed or not
struct Emit {
    text: String,
}

#[async_trait]
impl Executable for Emit {
    async fn run(
        &self,
        _options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        output.write_all(self.text.as_bytes())?;
        Ok(())
    }
}

/// Writes a parameter's string value as text
struct ParamValue {
    name: String,
}

#[async_trait]
impl Executable for ParamValue {
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        let value = options
            .parameter(&self.name.as_str().into())
            .ok_or_else(|| {
                ExecutionError::dynamic(format!("XTDE0050: no value for ${}", self.name))
            })?;
        output.write_all(value.string_value().as_bytes())?;
        Ok(())
    }
}

/// Turns `sch:assert` elements into a stub validator stylesheet
struct SvrlGenerator;

#[async_trait]
impl Executable for SvrlGenerator {
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        let schema = context_item(options)?;
        let doc = roxmltree::Document::parse(schema.text())
            .map_err(|e| ExecutionError::dynamic(e.to_string()))?;

        write!(output, r#"<stub:validator xmlns:stub="{}">"#, STUB_NS)?;
        for assert in doc
            .descendants()
            .filter(|n| n.has_tag_name((SCHEMATRON_NS, "assert")))
        {
            write!(
                output,
                r#"<stub:require element="{}" message="{}""#,
                assert.attribute("test").unwrap_or_default(),
                assert.text().unwrap_or_default().trim()
            )?;
            if let Some(phase) = assert.attribute("phase") {
                write!(output, r#" phase="{}""#, phase)?;
            }
            output.write_all(b"/>")?;
        }
        output.write_all(b"</stub:validator>")?;
        Ok(())
    }
}

struct Requirement {
    element: String,
    message: String,
    phase: Option<String>,
}

/// Reports each required root child that is missing as a failed assert
struct Validator {
    requirements: Vec<Requirement>,
}

#[async_trait]
impl Executable for Validator {
    async fn run(
        &self,
        options: &RuntimeOptions,
        output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        let instance = context_item(options)?;
        let doc = roxmltree::Document::parse(instance.text())
            .map_err(|e| ExecutionError::dynamic(e.to_string()))?;

        write!(
            output,
            r#"<svrl:schematron-output xmlns:svrl="{}" phase="{}">"#,
            SVRL_NAMESPACE,
            options.phase.as_deref().unwrap_or("#ALL")
        )?;
        output.write_all(b"<svrl:active-pattern/>")?;

        for requirement in &self.requirements {
            let active = match (&options.phase, &requirement.phase) {
                (Some(selected), Some(phase)) => selected == phase,
                _ => true,
            };
            if !active {
                continue;
            }

            let present = doc
                .root_element()
                .children()
                .any(|n| n.is_element() && n.tag_name().name() == requirement.element);
            if present {
                write!(
                    output,
                    r#"<svrl:fired-rule context="{}"/>"#,
                    requirement.element
                )?;
            } else {
                write!(
                    output,
                    r#"<svrl:failed-assert test="{}"><svrl:text>{}</svrl:text></svrl:failed-assert>"#,
                    requirement.element, requirement.message
                )?;
            }
        }

        output.write_all(b"</svrl:schematron-output>")?;
        Ok(())
    }
}

/// Raises a dynamic error located in its own module
struct Fail {
    module: String,
    line: Option<u32>,
}

#[async_trait]
impl Executable for Fail {
    async fn run(
        &self,
        _options: &RuntimeOptions,
        _output: &mut (dyn Write + Send),
    ) -> Result<(), ExecutionError> {
        Err(ExecutionError::Dynamic {
            message: "FOER0000: requested failure".to_string(),
            line: self.line,
            module_uri: Some(self.module.clone()),
        })
    }
}

pub fn stub_stylesheet(local: &str) -> String {
    format!(r#"<stub:{} xmlns:stub="{}"/>"#, local, STUB_NS)
}

/// A stylesheet whose output is exactly `text`
pub fn emit_stylesheet(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    format!(r#"<stub:emit xmlns:stub="{}" text="{}"/>"#, STUB_NS, escaped)
}

pub const SCHEMA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
  <sch:pattern>
    <sch:rule context="/book">
      <sch:assert test="title">A book needs a title</sch:assert>
      <sch:assert test="isbn" phase="publishing">A published book needs an ISBN</sch:assert>
    </sch:rule>
  </sch:pattern>
</sch:schema>"#;

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Bundled stage stylesheets plus application resources under `mem://app/`
pub fn fixture_resolver() -> Arc<MemoryResolver> {
    fixture_resolver_for(&["xslt1", "xslt2"])
}

/// Like [`fixture_resolver`], bundling stages only for the given bindings
pub fn fixture_resolver_for(bindings: &[&str]) -> Arc<MemoryResolver> {
    let resolver = MemoryResolver::new();
    for binding in bindings {
        let base = format!("mem://bundle/schematron/{}/", binding);
        resolver.insert(url(&format!("{}iso_dsdl_include.xsl", base)), stub_stylesheet("identity"));
        resolver.insert(url(&format!("{}iso_abstract_expand.xsl", base)), stub_stylesheet("identity"));
        resolver.insert(
            url(&format!("{}iso_svrl_for_{}.xsl", base, binding)),
            stub_stylesheet("svrl-generator"),
        );
    }

    resolver.insert(url("mem://app/schema.sch"), SCHEMA);
    resolver.insert(url("mem://app/echo.xsl"), stub_stylesheet("echo"));
    resolver.insert(url("mem://app/echo.xq"), stub_stylesheet("echo"));
    resolver.insert(
        url("mem://app/param.xsl"),
        format!(r#"<stub:param-value xmlns:stub="{}" name="greeting"/>"#, STUB_NS),
    );
    resolver.insert(
        url("mem://app/fail.xsl"),
        format!(r#"<stub:fail xmlns:stub="{}" line="7"/>"#, STUB_NS),
    );
    resolver.insert(url("mem://app/broken.xsl"), "<stub:echo xmlns:stub=\"urn:stub\">");
    resolver.insert(url("mem://app/not-xml.sch"), "<sch:schema>");
    Arc::new(resolver)
}

pub fn fixture_config() -> Config {
    let mut config = Config::default();
    config.resolution.default_base_uri = Some("mem://app/".to_string());
    config.schematron.resource_base_uri = "mem://bundle/schematron/".to_string();
    config
}

/// A context with `stub` as the default XSLT and XQuery processor
pub fn fixture_context(stub: &StubProcessor) -> Arc<RuntimeContext> {
    fixture_context_with(stub, fixture_resolver())
}

pub fn fixture_context_with(
    stub: &StubProcessor,
    resolver: Arc<MemoryResolver>,
) -> Arc<RuntimeContext> {
    let processor = stub.clone();
    RuntimeContext::builder(fixture_config())
        .without_default_resolvers()
        .resolver("mem", resolver)
        .processor("stub", &[Capability::Xslt, Capability::XQuery], move || {
            Ok(Arc::new(processor.clone()) as Arc<dyn Processor>)
        })
        .default_processor(Capability::Xslt, "stub")
        .default_processor(Capability::XQuery, "stub")
        .build()
        .unwrap()
}

pub fn book(children: &str) -> XmlDocument {
    XmlDocument::parse(
        format!("<book>{}</book>", children),
        Some(url("mem://app/book.xml")),
    )
    .unwrap()
}

pub fn not_well_formed(err: &DocumentError) -> bool {
    matches!(err, DocumentError::NotWellFormed { .. })
}
