//! One-shot call against a freshly launched node

use super::{apply_node_args, process_supervisor};
use crate::args::NodeArgs;
use anyhow::Context;
use beamlink_core::{BackendError, BeamlinkConfig, Term};
use std::time::Duration;
use tracing::debug;

/// What to call and how long to wait
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub module: String,
    pub function: String,
    pub args: Option<String>,
    pub timeout: Option<Duration>,
}

/// Launch the configured node, run the call, print the result term and dispose
pub async fn execute(
    mut config: BeamlinkConfig,
    node: NodeArgs,
    request: CallRequest,
) -> anyhow::Result<()> {
    apply_node_args(&mut config, &node);
    config.validate()?;
    let args = parse_args(request.args.as_deref())?;
    let timeout = request.timeout.unwrap_or(config.timeouts.call);

    let supervisor = process_supervisor(&config);
    supervisor.launch().await?;
    let result = match supervisor.channel() {
        Some(channel) => {
            debug!(
                "Calling {}:{} with {} argument(s)",
                request.module,
                request.function,
                args.len()
            );
            channel
                .call(&request.module, &request.function, args, timeout)
                .await
        }
        None => Err(BackendError::not_running(supervisor.name())),
    };
    supervisor.dispose().await;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// A JSON array is the argument list; any other value is the single argument
pub fn parse_args(raw: Option<&str>) -> anyhow::Result<Vec<Term>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    let value: Term =
        serde_json::from_str(raw).with_context(|| format!("arguments are not valid JSON: {raw}"))?;
    Ok(match value {
        Term::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_args() {
        assert!(parse_args(None).unwrap().is_empty());
        assert!(parse_args(Some("  ")).unwrap().is_empty());
        assert_eq!(parse_args(Some("[1, \"a\"]")).unwrap(), vec![json!(1), json!("a")]);
        assert_eq!(parse_args(Some("{\"k\": 1}")).unwrap(), vec![json!({"k": 1})]);
        assert!(parse_args(Some("[1,")).is_err());
    }
}
