use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resolve and fetch XSLT, XQuery and Schematron resources
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-invoker")]
#[command(about = "Resolve and fetch XML processing resources the way the invoker runtime does")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Default base URI for relative references
    #[arg(long = "base", global = true)]
    pub base: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Resolve a reference to an absolute URI
    Resolve {
        /// URI reference, absolute or relative
        uri: String,
    },
    /// Resolve a reference and print its content
    Fetch {
        /// URI reference, absolute or relative
        uri: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log filter used when neither XML_INVOKER_LOG nor RUST_LOG is set
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "xml_invoker=debug"
        } else {
            "xml_invoker=warn"
        }
    }
}
