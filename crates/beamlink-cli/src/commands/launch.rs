//! Interactive console on a supervised node

use super::{apply_node_args, process_supervisor};
use crate::args::LaunchArgs;
use crate::console::CliConsole;
use anyhow::{Context, bail};
use beamlink_core::{BeamlinkConfig, InitialCall, LaunchContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const SHELL_ID: &str = "main";

/// Launch, initialize, then forward stdin to the `main` shell until EOF or Ctrl-C
pub async fn execute(
    mut config: BeamlinkConfig,
    args: LaunchArgs,
    verbose: bool,
) -> anyhow::Result<()> {
    apply_launch_args(&mut config, &args)?;
    config.validate()?;
    let console = CliConsole::new(verbose);

    let supervisor = Arc::new(process_supervisor(&config));
    let handle = supervisor.launch().await?;
    console.success(&format!(
        "Connected to {} (OTP {})",
        handle.name(),
        handle.version().unwrap_or("unknown")
    ));

    if let Err(e) = supervisor.initialize(Vec::new()).await {
        supervisor.dispose().await;
        return Err(e).context("initializing the node");
    }
    console.info(&format!("Runtime state: {}", supervisor.state()));

    let session = supervisor.shells().open_shell(SHELL_ID);
    let printer = {
        let session = Arc::clone(&session);
        let console = CliConsole::new(verbose);
        tokio::spawn(async move {
            loop {
                if let Some(record) = session.next_record(Duration::from_millis(500)).await {
                    console.shell_output(&record);
                }
            }
        })
    };

    let closed = supervisor
        .channel()
        .map(|channel| channel.closed_token())
        .context("node has no channel")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = supervisor.shells().write(SHELL_ID, &format!("{line}\n")) {
                        break Err(anyhow::Error::from(e));
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break Ok(());
                }
                Err(e) => break Err(anyhow::Error::from(e).context("reading stdin")),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
            _ = closed.cancelled() => {
                break Err(anyhow::anyhow!("connection to '{}' was lost", handle.name()));
            }
        }
    };

    supervisor.dispose().await;
    printer.abort();
    for record in session.drain() {
        console.shell_output(&record);
    }
    if outcome.is_ok() {
        console.success(&format!("Disposed {}", handle.name()));
    }
    outcome
}

fn apply_launch_args(config: &mut BeamlinkConfig, args: &LaunchArgs) -> anyhow::Result<()> {
    apply_node_args(config, &args.node);
    let runtime = &mut config.runtime;
    if let Some(context) = args.context {
        runtime.launch_context = LaunchContext::from(context);
    }
    if let Some(spec) = &args.initial {
        let Some(call) = InitialCall::parse(spec) else {
            bail!("initial call must look like MODULE:FUNCTION[:ARGS], got '{spec}'");
        };
        runtime.initial_call = Some(call);
    }
    runtime.project_paths.extend(args.paths.iter().cloned());
    Ok(())
}
