//! Compiles ISO Schematron schemas into validating stylesheets.
//!
//! A schema goes through three XSLT stages (include expansion, abstract
//! pattern expansion, SVRL generation). The stage stylesheets are fetched
//! from a resource base URI laid out as `xslt1/<stage>.xsl` and
//! `xslt2/<stage>.xsl`. Stages are compiled on every build; only the final
//! validator is worth caching, and that is the caller's job.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::document::XmlDocument;
use crate::error::{CompileError, ExecutionError, InvokeError, ResolutionError};
use crate::processor::{Capability, CompileOptions, Executable, ProcessorHandle};
use crate::resolver::UriResolutionService;
use crate::runtime::RuntimeOptions;

const INCLUDE_STAGE: &str = "iso_dsdl_include";
const ABSTRACT_STAGE: &str = "iso_abstract_expand";

/// XSLT version the generated validator targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryBinding {
    Xslt1,
    Xslt2,
}

impl QueryBinding {
    /// Accepted `queryBinding` attribute values
    pub const VALID: [&'static str; 3] = ["xslt", "xslt1", "xslt2"];

    pub fn parse(value: &str) -> Result<Self, CompileError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xslt" | "xslt1" => Ok(QueryBinding::Xslt1),
            "xslt2" => Ok(QueryBinding::Xslt2),
            _ => Err(CompileError::UnsupportedQueryBinding {
                binding: value.to_string(),
                valid: Self::VALID.join(", "),
            }),
        }
    }

    /// Pick the binding from the schema's declaration, else from what the processor supports
    pub fn negotiate(
        declared: Option<&str>,
        processor_version: Option<f64>,
    ) -> Result<Self, CompileError> {
        match declared {
            Some(value) => Self::parse(value),
            None => match processor_version {
                Some(version) if version >= 2.0 => Ok(QueryBinding::Xslt2),
                _ => Ok(QueryBinding::Xslt1),
            },
        }
    }

    pub fn version(self) -> u8 {
        match self {
            QueryBinding::Xslt1 => 1,
            QueryBinding::Xslt2 => 2,
        }
    }

    /// Resource directory holding this binding's stage stylesheets
    pub fn directory(self) -> &'static str {
        match self {
            QueryBinding::Xslt1 => "xslt1",
            QueryBinding::Xslt2 => "xslt2",
        }
    }

    /// Stage names in execution order
    pub fn stages(self) -> [&'static str; 3] {
        let svrl = match self {
            QueryBinding::Xslt1 => "iso_svrl_for_xslt1",
            QueryBinding::Xslt2 => "iso_svrl_for_xslt2",
        };
        [INCLUDE_STAGE, ABSTRACT_STAGE, svrl]
    }
}

impl fmt::Display for QueryBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory())
    }
}

/// Turns a Schematron schema into a compiled validator
pub struct SchematronBuildPipeline {
    resolver: Arc<UriResolutionService>,
    resource_base: Url,
}

impl SchematronBuildPipeline {
    pub fn new(resolver: Arc<UriResolutionService>, resource_base: Url) -> Self {
        Self {
            resolver,
            resource_base,
        }
    }

    pub fn resource_base(&self) -> &Url {
        &self.resource_base
    }

    /// URI of a stage stylesheet for `binding`
    pub fn stage_uri(&self, binding: QueryBinding, stage: &str) -> Result<Url, ResolutionError> {
        let reference = format!("{}/{}.xsl", binding.directory(), stage);
        self.resource_base
            .join(&reference)
            .map_err(|e| ResolutionError::InvalidReference {
                base: self.resource_base.to_string(),
                reference,
                details: e.to_string(),
            })
    }

    /// Run all stages over `schema` and compile the generated validator
    pub async fn build(
        &self,
        processor: &ProcessorHandle,
        schema: &XmlDocument,
    ) -> Result<Arc<dyn Executable>, CompileError> {
        let schema_uri = schema
            .base_uri()
            .cloned()
            .unwrap_or_else(|| self.resolver.default_base().clone());
        let binding = QueryBinding::negotiate(
            schema.root_attribute("queryBinding").as_deref(),
            processor.processor().xslt_version(),
        )?;
        let [include, expand, svrl] = binding.stages();

        let mut current = schema.clone().with_base_uri(schema_uri.clone());
        for stage in [include, expand] {
            let output = self
                .run_stage(processor, binding, stage, &current)
                .await
                .map_err(|e| stage_error(stage, &schema_uri, e))?;
            current = processor
                .processor()
                .item_factory()
                .document_from_bytes(&output, Some(&schema_uri))
                .map_err(|source| {
                    stage_error(
                        stage,
                        &schema_uri,
                        ExecutionError::MalformedOutput { source }.into(),
                    )
                })?;
        }

        let sink = self
            .run_stage(processor, binding, svrl, &current)
            .await
            .map_err(|e| stage_error(svrl, &schema_uri, e))?;

        let options = CompileOptions {
            base_uri: schema_uri.clone(),
            language: Capability::Xslt,
            resolver: self.resolver.clone(),
        };
        processor
            .processor()
            .compile(&sink, &options)
            .await
            .map_err(|e| stage_error(svrl, &schema_uri, e.into()))
    }

    async fn run_stage(
        &self,
        processor: &ProcessorHandle,
        binding: QueryBinding,
        stage: &str,
        input: &XmlDocument,
    ) -> Result<Vec<u8>, InvokeError> {
        let uri = self.stage_uri(binding, stage)?;
        debug!(stage, uri = %uri, schema = ?input.base_uri().map(Url::as_str), "running schematron stage");

        let source = self.resolver.get_entity(&uri).await?;
        let options = CompileOptions {
            base_uri: uri,
            language: Capability::Xslt,
            resolver: self.resolver.clone(),
        };
        let stylesheet = processor.processor().compile(&source, &options).await?;

        let runtime =
            RuntimeOptions::new(Some(input.clone())).with_resolver(self.resolver.clone());
        let mut output = Vec::new();
        stylesheet.run(&runtime, &mut output).await?;
        Ok(output)
    }
}

fn stage_error(stage: &str, schema_uri: &Url, source: InvokeError) -> CompileError {
    CompileError::SchematronStage {
        stage: stage.to_string(),
        base_uri: schema_uri.to_string(),
        source: Arc::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverRegistry;

    #[test]
    fn test_query_binding_values() {
        assert_eq!(QueryBinding::parse("xslt").unwrap(), QueryBinding::Xslt1);
        assert_eq!(QueryBinding::parse("xslt1").unwrap(), QueryBinding::Xslt1);
        assert_eq!(QueryBinding::parse("xslt2").unwrap(), QueryBinding::Xslt2);
        assert_eq!(QueryBinding::parse(" XSLT2 ").unwrap(), QueryBinding::Xslt2);
        assert_eq!(QueryBinding::Xslt2.version(), 2);
    }

    #[test]
    fn test_unknown_query_binding_lists_valid_values() {
        match QueryBinding::parse("xpath2") {
            Err(CompileError::UnsupportedQueryBinding { binding, valid }) => {
                assert_eq!(binding, "xpath2");
                assert_eq!(valid, "xslt, xslt1, xslt2");
            }
            other => panic!("Expected UnsupportedQueryBinding, got {:?}", other),
        }
    }

    #[test]
    fn test_negotiation_without_declaration() {
        assert_eq!(
            QueryBinding::negotiate(None, Some(3.0)).unwrap(),
            QueryBinding::Xslt2
        );
        assert_eq!(
            QueryBinding::negotiate(None, Some(2.0)).unwrap(),
            QueryBinding::Xslt2
        );
        assert_eq!(
            QueryBinding::negotiate(None, Some(1.0)).unwrap(),
            QueryBinding::Xslt1
        );
        assert_eq!(
            QueryBinding::negotiate(None, None).unwrap(),
            QueryBinding::Xslt1
        );
        // A declaration beats the processor version
        assert_eq!(
            QueryBinding::negotiate(Some("xslt1"), Some(3.0)).unwrap(),
            QueryBinding::Xslt1
        );
    }

    #[test]
    fn test_stage_uris() {
        let registry = ResolverRegistry::builder().build();
        let resolver = Arc::new(UriResolutionService::new(
            Arc::new(registry),
            Url::parse("file:///srv/").unwrap(),
        ));
        let pipeline =
            SchematronBuildPipeline::new(resolver, Url::parse("res:///schematron/").unwrap());

        let stages: Vec<String> = QueryBinding::Xslt2
            .stages()
            .iter()
            .map(|stage| {
                pipeline
                    .stage_uri(QueryBinding::Xslt2, stage)
                    .unwrap()
                    .to_string()
            })
            .collect();

        assert_eq!(
            stages,
            vec![
                "res:///schematron/xslt2/iso_dsdl_include.xsl",
                "res:///schematron/xslt2/iso_abstract_expand.xsl",
                "res:///schematron/xslt2/iso_svrl_for_xslt2.xsl",
            ]
        );
    }
}
