//! Cove CLI - run command lines through one sandboxed shell session
//!
//! Usage:
//!   cove -c "mkdir /a; ls /"   Execute a command string
//!   cove script.cove           Execute a script file, one line at a time
//!   cove                       Read the script from stdin

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cove::{
    CommandRegistry, MountTable, NetworkPolicy, ResourceLimits, SandboxPolicy, SessionConfig,
    SessionEvent, SessionHandle, Subscription,
};

/// Cove - sandboxed virtual shell sessions
#[derive(Parser, Debug)]
#[command(name = "cove")]
#[command(about = "Run command lines through a sandboxed virtual shell session")]
struct Args {
    /// Command string to execute
    #[arg(short = 'c')]
    command: Option<String>,

    /// Script file to execute (stdin if neither this nor -c is given)
    script: Option<PathBuf>,

    /// Workspace id the session's mounts belong to
    #[arg(long, default_value = "default")]
    workspace: String,

    /// Host directory to mount at `/` (in-memory filesystem if omitted)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Wall-clock limit per line, in milliseconds
    #[arg(long)]
    max_runtime_ms: Option<u64>,

    /// Output limit per line, in bytes
    #[arg(long)]
    max_output_bytes: Option<u64>,

    /// Domain (or glob) commands may reach; repeatable
    #[arg(long = "allow-domain")]
    allow_domains: Vec<String>,

    /// Port commands may reach; repeatable
    #[arg(long = "allow-port")]
    allow_ports: Vec<u16>,

    /// Print the raw event stream as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    fn policy(&self) -> SandboxPolicy {
        let mut network = NetworkPolicy::deny_all();
        for domain in &self.allow_domains {
            network = network.allow_domain(domain);
        }
        for port in &self.allow_ports {
            network = network.allow_port(*port);
        }

        let mut limits = ResourceLimits::unlimited();
        if let Some(ms) = self.max_runtime_ms.filter(|ms| *ms > 0) {
            limits = limits.with_max_runtime(Duration::from_millis(ms));
        }
        if let Some(bytes) = self.max_output_bytes.filter(|b| *b > 0) {
            limits = limits.with_max_output_bytes(bytes);
        }

        SandboxPolicy::new().with_network(network).with_limits(limits)
    }

    async fn script(&self) -> anyhow::Result<String> {
        if let Some(command) = &self.command {
            return Ok(command.clone());
        }
        if let Some(path) = &self.script {
            return tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()));
        }
        let mut script = String::new();
        tokio::io::stdin()
            .read_to_string(&mut script)
            .await
            .context("failed to read stdin")?;
        Ok(script)
    }
}

/// Print events until the current command ends; returns true on success.
async fn drain(events: &mut Subscription, json: bool) -> anyhow::Result<bool> {
    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            SessionEvent::Output { chunk } if !json => {
                print!("{chunk}");
                std::io::stdout().flush()?;
            }
            SessionEvent::CommandDone => return Ok(true),
            SessionEvent::Error { error } => {
                if !json {
                    eprintln!("cove: {error}");
                }
                return Ok(false);
            }
            SessionEvent::CommandCancelled => return Ok(false),
            SessionEvent::CommandCrashed { reason } => {
                if !json {
                    eprintln!("cove: command crashed: {reason}");
                }
                return Ok(false);
            }
            _ => {}
        }
    }
    anyhow::bail!("session ended unexpectedly")
}

/// Run every non-blank, non-comment line; returns true if all succeeded.
async fn run_script(
    session: &SessionHandle,
    script: &str,
    policy: &SandboxPolicy,
    json: bool,
) -> anyhow::Result<bool> {
    let mut events = session.subscribe().await?;
    let mut ok = true;
    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        ok &= match session.run(line, policy.clone()).await {
            Ok(_) => drain(&mut events, json).await?,
            Err(e) => {
                eprintln!("cove: {e}");
                false
            }
        };
    }
    Ok(ok)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never mix with command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let script = args.script().await?;
    let policy = args.policy();

    let mounts = Arc::new(MountTable::new());
    match &args.root {
        Some(root) => {
            let root = root.to_string_lossy();
            mounts
                .mount(&args.workspace, "/", "local", serde_json::json!({ "root": root }))
                .await?;
        }
        None => {
            mounts
                .mount(&args.workspace, "/", "memory", serde_json::Value::Null)
                .await?;
        }
    }

    let session = SessionHandle::start(
        SessionConfig::new("cli", &args.workspace),
        Arc::clone(&mounts),
        Arc::new(CommandRegistry::with_builtins()),
    )
    .await?;
    let ok = run_script(&session, &script, &policy, args.json).await?;

    session.stop().await?;
    mounts.unmount_all(&args.workspace).await;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn session() -> SessionHandle {
        let mounts = Arc::new(MountTable::new());
        mounts
            .mount("ws", "/", "memory", serde_json::Value::Null)
            .await
            .unwrap();
        SessionHandle::start(
            SessionConfig::new("cli", "ws"),
            mounts,
            Arc::new(CommandRegistry::with_builtins()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_any_failed_line_fails_script() {
        let session = session().await;
        let script = "cat /missing\necho after";
        assert!(!run_script(&session, script, &SandboxPolicy::new(), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_script_succeeds() {
        let session = session().await;
        let script = "# setup\nmkdir /a\n\nwrite /a/f hi";
        assert!(run_script(&session, script, &SandboxPolicy::new(), true).await.unwrap());
        assert_eq!(session.run_and_wait("cat /a/f", SandboxPolicy::new()).await.unwrap(), "hi");
    }
}
