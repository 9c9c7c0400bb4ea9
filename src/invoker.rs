//! Public entry points: compile-or-reuse an artifact, bind inputs, render results.

use std::io::Write;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::Event;
use url::Url;

use crate::cache::{ArtifactKind, CompiledExecutable};
use crate::context::RuntimeContext;
use crate::document::{QualifiedName, SVRL_NAMESPACE, XdmValue, XmlDocument};
use crate::error::{CompileError, ExecutionError, InvokeError, Result};
use crate::processor::{CompileOptions, Executable, ProcessorHandle};
use crate::resolver::normalize_uri;
use crate::runtime::{RuntimeOptions, SerializationOptions};

/// Compile on its own task; dropping the caller does not cancel a shared build
async fn compile_detached(
    ctx: &Arc<RuntimeContext>,
    base: Option<&Url>,
    uri: &str,
    processor: Option<&str>,
    kind: ArtifactKind,
) -> Result<Arc<CompiledExecutable>> {
    let task = {
        let ctx = ctx.clone();
        let base = base.cloned();
        let uri = uri.to_string();
        let processor = processor.map(str::to_string);
        tokio::spawn(async move {
            compile_artifact(&ctx, base.as_ref(), &uri, processor.as_deref(), kind).await
        })
    };

    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            Err(CompileError::static_error(uri, format!("compilation aborted: {}", e)).into())
        }
    }
}

async fn compile_artifact(
    ctx: &RuntimeContext,
    base: Option<&Url>,
    uri: &str,
    processor: Option<&str>,
    kind: ArtifactKind,
) -> Result<Arc<CompiledExecutable>> {
    let resolved = normalize_uri(&ctx.resolver().resolve_uri(base, uri)?);
    let handle = ctx.processors().select(processor, kind.capability())?;

    ctx.cache(kind)
        .get_or_build(&handle, &resolved, || {
            build_executable(ctx, &handle, &resolved, kind)
        })
        .await
}

async fn build_executable(
    ctx: &RuntimeContext,
    handle: &ProcessorHandle,
    uri: &Url,
    kind: ArtifactKind,
) -> Result<Arc<dyn Executable>> {
    let source = ctx.resolver().get_entity(uri).await?;

    match kind {
        ArtifactKind::Xslt | ArtifactKind::XQuery => {
            let options = CompileOptions {
                base_uri: uri.clone(),
                language: kind.capability(),
                resolver: ctx.resolver().clone(),
            };
            Ok(handle.processor().compile(&source, &options).await?)
        }
        ArtifactKind::Schematron => {
            let schema = handle
                .processor()
                .item_factory()
                .document_from_bytes(&source, Some(uri))
                .map_err(|source| CompileError::MalformedDocument {
                    uri: uri.to_string(),
                    source,
                })?;
            Ok(ctx.schematron_pipeline().build(handle, &schema).await?)
        }
    }
}

fn runtime_options(ctx: &RuntimeContext, input: Option<XmlDocument>) -> RuntimeOptions {
    RuntimeOptions::new(input).with_resolver(ctx.resolver().clone())
}

/// A compiled XSLT stylesheet ready to transform inputs
pub struct XsltInvoker {
    ctx: Arc<RuntimeContext>,
    compiled: Arc<CompiledExecutable>,
}

impl XsltInvoker {
    /// Resolve `uri` against the default base and compile it, or reuse the cached build
    pub async fn with(
        ctx: &Arc<RuntimeContext>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, None, uri, processor).await
    }

    /// Like [`XsltInvoker::with`], resolving `uri` against `base`
    pub async fn with_base(
        ctx: &Arc<RuntimeContext>,
        base: &Url,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, Some(base), uri, processor).await
    }

    async fn compile(
        ctx: &Arc<RuntimeContext>,
        base: Option<&Url>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        let compiled = compile_detached(ctx, base, uri, processor, ArtifactKind::Xslt).await?;
        Ok(Self {
            ctx: ctx.clone(),
            compiled,
        })
    }

    pub fn compiled(&self) -> &Arc<CompiledExecutable> {
        &self.compiled
    }

    pub fn transform(&self, input: Option<XmlDocument>) -> ResultHandler {
        ResultHandler::new(self.compiled.clone(), runtime_options(&self.ctx, input))
    }

    /// Transform with parameters; a repeated name keeps its last value
    pub fn transform_with_params<I, N, V>(
        &self,
        input: Option<XmlDocument>,
        parameters: I,
    ) -> ResultHandler
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        self.transform(input).params(parameters)
    }
}

/// A compiled XQuery main module
pub struct XQueryInvoker {
    ctx: Arc<RuntimeContext>,
    compiled: Arc<CompiledExecutable>,
}

impl XQueryInvoker {
    pub async fn with(
        ctx: &Arc<RuntimeContext>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, None, uri, processor).await
    }

    pub async fn with_base(
        ctx: &Arc<RuntimeContext>,
        base: &Url,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, Some(base), uri, processor).await
    }

    async fn compile(
        ctx: &Arc<RuntimeContext>,
        base: Option<&Url>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        let compiled = compile_detached(ctx, base, uri, processor, ArtifactKind::XQuery).await?;
        Ok(Self {
            ctx: ctx.clone(),
            compiled,
        })
    }

    pub fn compiled(&self) -> &Arc<CompiledExecutable> {
        &self.compiled
    }

    /// Bind the context item, if any
    pub fn query(&self, input: Option<XmlDocument>) -> ResultHandler {
        ResultHandler::new(self.compiled.clone(), runtime_options(&self.ctx, input))
    }

    /// Bind external variables; a repeated name keeps its last value
    pub fn query_with_params<I, N, V>(&self, input: Option<XmlDocument>, parameters: I) -> ResultHandler
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        self.query(input).params(parameters)
    }
}

/// A compiled Schematron validator
pub struct SchematronInvoker {
    ctx: Arc<RuntimeContext>,
    compiled: Arc<CompiledExecutable>,
}

impl SchematronInvoker {
    pub async fn with(
        ctx: &Arc<RuntimeContext>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, None, uri, processor).await
    }

    pub async fn with_base(
        ctx: &Arc<RuntimeContext>,
        base: &Url,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        Self::compile(ctx, Some(base), uri, processor).await
    }

    async fn compile(
        ctx: &Arc<RuntimeContext>,
        base: Option<&Url>,
        uri: &str,
        processor: Option<&str>,
    ) -> Result<Self> {
        let compiled =
            compile_detached(ctx, base, uri, processor, ArtifactKind::Schematron).await?;
        Ok(Self {
            ctx: ctx.clone(),
            compiled,
        })
    }

    pub fn compiled(&self) -> &Arc<CompiledExecutable> {
        &self.compiled
    }

    pub fn validate(&self, input: XmlDocument) -> SchematronResultHandler {
        SchematronResultHandler {
            inner: ResultHandler::new(
                self.compiled.clone(),
                runtime_options(&self.ctx, Some(input)),
            ),
        }
    }

    pub fn validate_with_params<I, N, V>(
        &self,
        input: XmlDocument,
        parameters: I,
        phase: Option<&str>,
    ) -> SchematronResultHandler
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        let mut handler = self.validate(input);
        handler.inner = handler.inner.params(parameters);
        match phase {
            Some(phase) => handler.phase(phase),
            None => handler,
        }
    }
}

/// A bound executable. Every `to_*` call runs it again.
pub struct ResultHandler {
    executable: Arc<CompiledExecutable>,
    options: RuntimeOptions,
}

impl ResultHandler {
    fn new(executable: Arc<CompiledExecutable>, options: RuntimeOptions) -> Self {
        Self {
            executable,
            options,
        }
    }

    /// Bind one parameter, replacing an earlier value for the same name
    pub fn param<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        self.options.set_parameter(name, value);
        self
    }

    fn params<I, N, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        for (name, value) in parameters {
            self.options.set_parameter(name, value);
        }
        self
    }

    pub fn serialization(mut self, serialization: SerializationOptions) -> Self {
        self.options.serialization = self.options.serialization.merge(&serialization);
        self
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn compiled(&self) -> &Arc<CompiledExecutable> {
        &self.executable
    }

    /// Run, streaming serialized output into `output`
    pub async fn to_writer<W: Write + Send>(&self, output: &mut W) -> Result<()> {
        self.run(&self.options, output).await
    }

    /// Run with serialization overrides for this call only
    pub async fn to_writer_with<W: Write + Send>(
        &self,
        output: &mut W,
        serialization: &SerializationOptions,
    ) -> Result<()> {
        let mut options = self.options.clone();
        options.serialization = options.serialization.merge(serialization);
        self.run(&options, output).await
    }

    pub async fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.to_writer(&mut output).await?;
        Ok(output)
    }

    pub async fn to_text(&self) -> Result<String> {
        String::from_utf8(self.to_bytes().await?)
            .map_err(|_| InvokeError::from(ExecutionError::Encoding))
    }

    /// Replay the output as events into an XML writer
    pub async fn to_xml_writer<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let document = self.to_document().await?;
        let mut reader = Reader::from_str(document.text());

        loop {
            let event = reader.read_event().map_err(output_error)?;
            if let Event::Eof = event {
                break;
            }
            writer.write_event(event).map_err(output_error)?;
        }
        Ok(())
    }

    /// Run and parse the output; its base URI is the executable's static base URI
    pub async fn to_document(&self) -> Result<XmlDocument> {
        let bytes = self.to_bytes().await?;
        self.executable
            .processor
            .processor()
            .item_factory()
            .document_from_bytes(&bytes, Some(&self.executable.base_uri))
            .map_err(|source| ExecutionError::MalformedOutput { source }.into())
    }

    async fn run<W: Write + Send>(&self, options: &RuntimeOptions, output: &mut W) -> Result<()> {
        self.executable.executable.run(options, output).await?;
        output.flush().map_err(ExecutionError::from)?;
        Ok(())
    }
}

fn output_error<E: std::fmt::Display>(err: E) -> InvokeError {
    ExecutionError::from(std::io::Error::other(err.to_string())).into()
}

/// Result handler for a Schematron validation
pub struct SchematronResultHandler {
    inner: ResultHandler,
}

impl SchematronResultHandler {
    /// Evaluate only the patterns active in `phase`
    pub fn phase(mut self, phase: &str) -> Self {
        self.inner.options.phase = Some(phase.to_string());
        self
    }

    pub fn param<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<QualifiedName>,
        V: Into<XdmValue>,
    {
        self.inner = self.inner.param(name, value);
        self
    }

    pub fn options(&self) -> &RuntimeOptions {
        self.inner.options()
    }

    pub async fn to_writer<W: Write + Send>(&self, output: &mut W) -> Result<()> {
        self.inner.to_writer(output).await
    }

    pub async fn to_text(&self) -> Result<String> {
        self.inner.to_text().await
    }

    pub async fn to_xml_writer<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        self.inner.to_xml_writer(writer).await
    }

    /// The SVRL report
    pub async fn to_document(&self) -> Result<XmlDocument> {
        self.inner.to_document().await
    }

    /// Validate once; false iff the report has a `svrl:failed-assert`
    pub async fn is_valid(&self) -> Result<bool> {
        let report = self.to_document().await?;
        Ok(!report.root_has_child(&failed_assert()))
    }

    pub async fn failed_assert_count(&self) -> Result<usize> {
        let report = self.to_document().await?;
        Ok(report.count_root_children(&failed_assert()))
    }
}

fn failed_assert() -> QualifiedName {
    QualifiedName::with_namespace(SVRL_NAMESPACE, "failed-assert")
}
