//! CLI argument definitions using clap

use beamlink_core::LaunchContext;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "beamlink")]
#[command(about = "Supervise Erlang nodes and talk to them over one connection")]
#[command(
    long_about = r#"Supervise Erlang nodes and talk to them over one connection

USAGE:
  beamlink launch                    # Start a node with a console shell
  beamlink launch --context managed --initial app:start
  beamlink call erlang node          # One-shot call, prints the result
  beamlink call lists seq '[1, 5]'   # Arguments as a JSON array

UTILITY COMMANDS:
  beamlink config init               # Create config file
  beamlink config show               # Show effective config
  beamlink config validate           # Check a config file"#
)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "BEAMLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a node and attach a console shell to it
    Launch(LaunchArgs),

    /// Launch a node, run one call and print the result
    Call {
        /// Module to call
        module: String,

        /// Function to call
        function: String,

        /// Arguments as JSON; an array is spread into the argument list
        args: Option<String>,

        /// Seconds to wait for the reply
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        node: NodeArgs,
    },

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags overriding the runtime section of the config file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct NodeArgs {
    /// Node name, short or long
    #[arg(long)]
    pub name: Option<String>,

    /// Distribution cookie
    #[arg(long)]
    pub cookie: Option<String>,

    /// Working directory of the node
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Append a unique suffix to the node name
    #[arg(long)]
    pub unique_name: bool,

    /// Attach to an already running node instead of starting one
    #[arg(long)]
    pub attach: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub node: NodeArgs,

    /// How the node is used once it is up
    #[arg(long, value_enum)]
    pub context: Option<ContextArg>,

    /// Function fired once the node is up, as MODULE:FUNCTION[:ARGS]
    #[arg(long, value_name = "M:F[:ARGS]")]
    pub initial: Option<String>,

    /// Extra code path to make available on the node (repeatable)
    #[arg(long = "path", value_name = "DIR")]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContextArg {
    Interactive,
    Managed,
    Debug,
}

impl From<ContextArg> for LaunchContext {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Interactive => LaunchContext::Interactive,
            ContextArg::Managed => LaunchContext::Managed,
            ContextArg::Debug => LaunchContext::Debug,
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration
    Show,
    /// Validate a configuration file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_flags() {
        let cli = Cli::parse_from([
            "beamlink",
            "launch",
            "--name",
            "ide@localhost",
            "--context",
            "managed",
            "--initial",
            "app:start",
            "--path",
            "/a/ebin",
            "--path",
            "/b/ebin",
        ]);
        let Commands::Launch(args) = cli.command else {
            panic!("expected launch");
        };
        assert_eq!(args.node.name.as_deref(), Some("ide@localhost"));
        assert_eq!(args.context, Some(ContextArg::Managed));
        assert_eq!(args.initial.as_deref(), Some("app:start"));
        assert_eq!(args.paths.len(), 2);
    }

    #[test]
    fn test_call_with_global_config() {
        let cli = Cli::parse_from([
            "beamlink",
            "call",
            "lists",
            "seq",
            "[1, 3]",
            "--timeout",
            "5",
            "--config",
            "/tmp/b.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/b.toml")));
        match cli.command {
            Commands::Call {
                module,
                args,
                timeout,
                ..
            } => {
                assert_eq!(module, "lists");
                assert_eq!(args.as_deref(), Some("[1, 3]"));
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_context_maps_to_launch_context() {
        assert_eq!(LaunchContext::from(ContextArg::Debug), LaunchContext::Debug);
    }
}
