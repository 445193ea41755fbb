//! `agent-git`: the git agent, speaking JSON lines over stdin/stdout.
//!
//!   agent-git --config agent-git.toml
//!   AGENT_GIT_LOG=debug agent-git

use anyhow::Context;
use clap::Parser;
use crucibuild_agent_git::{AgentConfig, AgentGit, StdioTransport, stdio};
use crucibuild_core::{AgentCore, ConnectionState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agent-git", version, about = "Git agent for the crucibuild message bus")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "AGENT_GIT_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directives (written to stderr)
    #[arg(
        long,
        env = "AGENT_GIT_LOG",
        default_value = "agent_git=info,crucibuild_agent_git=info,crucibuild_core=info"
    )]
    log_filter: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // a pending stdin read holds a blocking thread that cannot be cancelled
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).context("invalid log filter")?)
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::load(cli.config.as_deref())?;
    let (transport, outbound) = StdioTransport::channel();
    let transport = Arc::new(transport);
    let agent = AgentGit::new(config.runtime, transport.clone())?;
    let core = agent.core().clone();

    tracing::info!(
        "Starting {} {}",
        core.manifest().name,
        core.manifest().version
    );
    let writer = tokio::spawn(stdio::write_loop(outbound, tokio::io::stdout()));

    blocking(&core, AgentCore::open)
        .await
        .context("failed to open connection")?;

    tokio::select! {
        result = stdio::read_loop(core.clone(), BufReader::new(tokio::io::stdin())) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, disconnecting");
            stdio::disconnect(&core).await?;
        }
    }

    transport.detach();
    writer.await??;
    tracing::info!("Stopped in state {}", core.state());
    Ok(())
}

/// Run a lifecycle call on the blocking pool; it runs state observers.
async fn blocking<F>(core: &Arc<AgentCore>, call: F) -> anyhow::Result<ConnectionState>
where
    F: FnOnce(&AgentCore) -> crucibuild_core::Result<ConnectionState> + Send + 'static,
{
    let core = core.clone();
    let state = tokio::task::spawn_blocking(move || call(&core)).await??;
    Ok(state)
}
