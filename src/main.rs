use std::io::Write;
use std::process;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use xml_invoker::cli::{Cli, Command};
use xml_invoker::config::{Config, ConfigManager};
use xml_invoker::context::RuntimeContext;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_env("XML_INVOKER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config: Config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;

    match &cli.command {
        Command::Config => {
            print!("{}", ConfigManager::to_toml(&config)?);
        }
        Command::Resolve { uri } => {
            let ctx = RuntimeContext::builder(config).build()?;
            let resolved = ctx.resolver().resolve_uri(None, uri)?;
            println!("{}", resolved);
        }
        Command::Fetch { uri } => {
            let ctx = RuntimeContext::builder(config).build()?;
            let resolved = ctx.resolver().resolve_uri(None, uri)?;
            let content = ctx
                .resolver()
                .get_entity(&resolved)
                .await
                .with_context(|| format!("failed to fetch {}", resolved))?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }

    Ok(())
}
