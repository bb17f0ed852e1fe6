//! Cross-reference queries against a runtime
//!
//! `start`, `stop` and `update` are best effort: failures are logged and
//! swallowed so a missing xref server never breaks a build.

use crate::channel::{MessageChannel, RpcFuture};
use crate::error::BackendResult;
use crate::protocol::Term;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const XREF_MODULE: &str = "beamlink_xref";

/// A `module:function/arity` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionRef {
    pub module: String,
    pub function: String,
    pub arity: u32,
}

impl FunctionRef {
    fn from_term(term: &Term) -> Option<Self> {
        let [module, function, arity] = term.as_array()?.as_slice() else {
            return None;
        };
        Some(Self {
            module: module.as_str()?.to_string(),
            function: function.as_str()?.to_string(),
            arity: u32::try_from(arity.as_u64()?).ok()?,
        })
    }
}

impl std::fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.function, self.arity)
    }
}

/// Client for the node-side cross-reference server
pub struct XrefClient {
    channel: Arc<MessageChannel>,
    timeout: Duration,
}

impl XrefClient {
    pub fn new(channel: Arc<MessageChannel>) -> Self {
        let timeout = channel.default_timeout();
        Self { channel, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn start(&self) {
        self.best_effort("start").await;
    }

    pub async fn stop(&self) {
        self.best_effort("stop").await;
    }

    pub async fn update(&self) {
        self.best_effort("update").await;
    }

    async fn best_effort(&self, function: &str) {
        if let Err(e) = self
            .channel
            .call(XREF_MODULE, function, vec![], self.timeout)
            .await
        {
            debug!("{}:{} failed: {}", XREF_MODULE, function, e);
        }
    }

    /// Index a project's output directory without waiting for it
    pub fn add_project(&self, output_dir: impl AsRef<Path>) -> BackendResult<RpcFuture> {
        self.channel.async_call(
            XREF_MODULE,
            "add_project",
            vec![json!(output_dir.as_ref().to_string_lossy())],
        )
    }

    /// Callers of `module:function/arity`
    pub async fn function_use(
        &self,
        module: &str,
        function: &str,
        arity: u32,
    ) -> BackendResult<Vec<FunctionRef>> {
        let result = self
            .channel
            .call(
                XREF_MODULE,
                "function_use",
                vec![json!(module), json!(function), json!(arity)],
                self.timeout,
            )
            .await?;
        Ok(parse_function_use(&result))
    }
}

/// `{ok, [[M, F, A], ...]}` in either tuple or map encoding; anything else is empty
fn parse_function_use(result: &Term) -> Vec<FunctionRef> {
    let list = match result {
        Value::Object(map) => map.get("ok"),
        Value::Array(items) if items.len() == 2 && items[0] == "ok" => items.get(1),
        _ => None,
    };
    list.and_then(Value::as_array)
        .map(|refs| refs.iter().filter_map(FunctionRef::from_term).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EventBroker;
    use crate::config::TimeoutConfig;
    use crate::protocol::{Outbound, Outcome};
    use crate::transport::{ScriptedNode, loopback};

    fn client<F>(handler: F) -> (XrefClient, ScriptedNode)
    where
        F: FnMut(&str, &str, &[Term]) -> Outcome + Send + 'static,
    {
        let (wire, remote) = loopback();
        let node = remote.serve(handler);
        let channel = Arc::new(MessageChannel::start(
            "xref@localhost",
            wire,
            Arc::new(EventBroker::new()),
            &TimeoutConfig::default(),
        ));
        (XrefClient::new(channel), node)
    }

    #[test]
    fn test_parse_function_use_shapes() {
        let expected = vec![
            FunctionRef {
                module: "lists".into(),
                function: "map".into(),
                arity: 2,
            },
            FunctionRef {
                module: "app".into(),
                function: "run".into(),
                arity: 0,
            },
        ];
        let refs = json!([["lists", "map", 2], ["app", "run", 0], ["bad"]]);

        assert_eq!(parse_function_use(&json!({"ok": refs.clone()})), expected);
        assert_eq!(parse_function_use(&json!(["ok", refs])), expected);
        assert!(parse_function_use(&json!(["error", "no_server"])).is_empty());
        assert!(parse_function_use(&json!("ok")).is_empty());
        assert_eq!(expected[0].to_string(), "lists:map/2");
    }

    #[tokio::test]
    async fn test_function_use_query() {
        let (xref, node) = client(|_, function, args| match function {
            "function_use" => Outcome::Ok(json!({"ok": [[args[0].clone(), "caller", 1]]})),
            _ => Outcome::Ok(json!("ok")),
        });

        let refs = xref.function_use("target", "f", 3).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].module, "target");

        let calls = node.invocations(XREF_MODULE, "function_use");
        assert_eq!(
            calls[0].mfa().map(|(_, _, args)| args.to_vec()),
            Some(vec![json!("target"), json!("f"), json!(3)])
        );
    }

    #[tokio::test]
    async fn test_best_effort_calls_swallow_errors() {
        let (xref, node) = client(|_, _, _| Outcome::Error(json!("not_started")));
        xref.start().await;
        xref.update().await;
        xref.stop().await;

        let functions: Vec<String> = node
            .received()
            .iter()
            .filter_map(Outbound::mfa)
            .map(|(_, f, _)| f.to_string())
            .collect();
        assert_eq!(functions, vec!["start", "update", "stop"]);
    }

    #[tokio::test]
    async fn test_add_project_is_async() {
        let (xref, _node) = client(|_, _, args| Outcome::Ok(args[0].clone()));
        let pending = xref.add_project("/work/app/ebin").unwrap();
        assert_eq!(pending.await.unwrap(), json!("/work/app/ebin"));
    }
}
