//! Code path bookkeeping per code context
//!
//! The registry is the local source of truth for which code paths a node
//! should have. While a channel is attached every change is mirrored to the
//! node with casts to the `code` module; attaching a new channel replays the
//! whole set, so a restarted node ends up with the same paths.

use crate::channel::MessageChannel;
use crate::protocol::Term;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CODE_MODULE: &str = "code";

/// Who the code is loaded for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeContext {
    /// Tooling support code running inside the IDE runtime
    Ide,
    /// Project code compiled and run by the build runtime
    #[default]
    Build,
}

impl std::fmt::Display for CodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ide => write!(f, "ide"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// A named unit of loadable code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBundle {
    pub name: String,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

impl CodeBundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }
}

/// Where an explicitly added path goes in the node's search order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPlacement {
    Prepend,
    Append,
}

impl PathPlacement {
    fn function(self) -> &'static str {
        match self {
            Self::Prepend => "add_patha",
            Self::Append => "add_pathz",
        }
    }
}

#[derive(Default)]
struct CodeState {
    bundles: HashMap<CodeContext, BTreeMap<String, CodeBundle>>,
    paths: Vec<(PathBuf, PathPlacement)>,
    channel: Option<Arc<MessageChannel>>,
}

impl CodeState {
    fn is_referenced(&self, path: &Path) -> bool {
        self.paths.iter().any(|(p, _)| p == path)
            || self
                .bundles
                .values()
                .flat_map(|bundles| bundles.values())
                .any(|bundle| bundle.paths.iter().any(|p| p == path))
    }

    fn mirror(&self, function: &str, path: &Path) {
        let Some(channel) = &self.channel else {
            return;
        };
        if let Err(e) = channel.cast(CODE_MODULE, function, vec![path_term(path)]) {
            warn!(
                "Could not mirror {}:{}({}) to '{}': {}",
                CODE_MODULE,
                function,
                path.display(),
                channel.name(),
                e
            );
        }
    }
}

fn path_term(path: &Path) -> Term {
    json!(path.to_string_lossy())
}

/// Registry of code bundles and explicit code paths
#[derive(Default)]
pub struct CodeRegistry {
    state: Mutex<CodeState>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle; returns false if an identical bundle is already registered
    pub fn register(&self, context: CodeContext, bundle: CodeBundle) -> bool {
        let mut state = self.state.lock();
        let existing = state
            .bundles
            .get_mut(&context)
            .and_then(|bundles| bundles.remove(&bundle.name));
        if existing.as_ref() == Some(&bundle) {
            state
                .bundles
                .entry(context)
                .or_default()
                .insert(bundle.name.clone(), bundle);
            return false;
        }

        let old_paths = existing.map(|old| old.paths).unwrap_or_default();
        for path in &old_paths {
            if !bundle.paths.contains(path) && !state.is_referenced(path) {
                state.mirror("del_path", path);
            }
        }
        for path in &bundle.paths {
            if !old_paths.contains(path) && !state.is_referenced(path) {
                state.mirror(PathPlacement::Prepend.function(), path);
            }
        }

        debug!("Registered bundle '{}' for {}", bundle.name, context);
        state
            .bundles
            .entry(context)
            .or_default()
            .insert(bundle.name.clone(), bundle);
        true
    }

    /// Unregister a bundle; unknown names are ignored
    pub fn unregister(&self, context: CodeContext, name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(bundle) = state
            .bundles
            .get_mut(&context)
            .and_then(|bundles| bundles.remove(name))
        else {
            return false;
        };

        for path in &bundle.paths {
            if !state.is_referenced(path) {
                state.mirror("del_path", path);
            }
        }
        debug!("Unregistered bundle '{}' from {}", name, context);
        true
    }

    /// Add an explicit path; returns false if the path is already known
    pub fn add_path(&self, path: impl Into<PathBuf>, use_pathz: bool) -> bool {
        let path = path.into();
        let placement = if use_pathz {
            PathPlacement::Append
        } else {
            PathPlacement::Prepend
        };

        let mut state = self.state.lock();
        if state.is_referenced(&path) {
            debug!("Code path {} already registered", path.display());
            return false;
        }
        state.mirror(placement.function(), &path);
        state.paths.push((path, placement));
        true
    }

    /// Remove an explicit path; returns false if it was not added
    pub fn remove_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut state = self.state.lock();
        let before = state.paths.len();
        state.paths.retain(|(p, _)| p != path);
        if state.paths.len() == before {
            return false;
        }
        if !state.is_referenced(path) {
            state.mirror("del_path", path);
        }
        true
    }

    /// Mirror to `channel` from now on, replaying every registered path first.
    ///
    /// Returns the number of paths replayed.
    pub fn attach(&self, channel: Arc<MessageChannel>) -> usize {
        let mut state = self.state.lock();
        state.channel = Some(channel);

        let mut replayed: Vec<&Path> = Vec::new();
        let mut contexts: Vec<_> = state.bundles.keys().copied().collect();
        contexts.sort();
        for context in contexts {
            for bundle in state.bundles[&context].values() {
                for path in &bundle.paths {
                    if !replayed.contains(&path.as_path()) {
                        state.mirror(PathPlacement::Prepend.function(), path);
                        replayed.push(path);
                    }
                }
            }
        }
        for (path, placement) in &state.paths {
            if !replayed.contains(&path.as_path()) {
                state.mirror(placement.function(), path);
                replayed.push(path);
            }
        }

        if !replayed.is_empty() {
            info!("Replayed {} code path(s)", replayed.len());
        }
        replayed.len()
    }

    /// Stop mirroring; local bookkeeping is kept
    pub fn detach(&self) -> Option<Arc<MessageChannel>> {
        self.state.lock().channel.take()
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    /// Bundles registered for `context`, ordered by name
    pub fn bundles(&self, context: CodeContext) -> Vec<CodeBundle> {
        self.state
            .lock()
            .bundles
            .get(&context)
            .map(|bundles| bundles.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, context: CodeContext, name: &str) -> bool {
        self.state
            .lock()
            .bundles
            .get(&context)
            .is_some_and(|bundles| bundles.contains_key(name))
    }

    /// Every registered path, each once: bundle paths first, then explicit ones
    pub fn paths(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        let mut contexts: Vec<_> = state.bundles.keys().copied().collect();
        contexts.sort();

        let mut paths: Vec<PathBuf> = Vec::new();
        let bundle_paths = contexts
            .iter()
            .flat_map(|context| state.bundles[context].values())
            .flat_map(|bundle| bundle.paths.iter());
        for path in bundle_paths.chain(state.paths.iter().map(|(p, _)| p)) {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EventBroker;
    use crate::config::TimeoutConfig;
    use crate::protocol::{Outbound, Outcome};
    use crate::transport::{ScriptedNode, loopback};
    use std::time::Duration;

    fn attached(registry: &CodeRegistry) -> (Arc<MessageChannel>, ScriptedNode) {
        let (wire, remote) = loopback();
        let node = remote.serve(|_, _, _| Outcome::Ok(json!("ok")));
        let channel = Arc::new(MessageChannel::start(
            "code@localhost",
            wire,
            Arc::new(EventBroker::new()),
            &TimeoutConfig::default(),
        ));
        registry.attach(Arc::clone(&channel));
        (channel, node)
    }

    fn code_calls(messages: &[Outbound]) -> Vec<(String, String)> {
        messages
            .iter()
            .filter_map(|m| m.mfa())
            .filter(|(module, _, _)| *module == CODE_MODULE)
            .map(|(_, function, args)| {
                (function.to_string(), args[0].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = CodeRegistry::new();
        let bundle = CodeBundle::new("stdlib_ext").with_path("/opt/ext/ebin");

        assert!(registry.register(CodeContext::Ide, bundle.clone()));
        assert!(!registry.register(CodeContext::Ide, bundle.clone()));
        assert_eq!(registry.bundles(CodeContext::Ide), vec![bundle]);
        assert!(registry.bundles(CodeContext::Build).is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let registry = CodeRegistry::new();
        assert!(!registry.unregister(CodeContext::Build, "missing"));
        registry.register(CodeContext::Build, CodeBundle::new("app"));
        assert!(!registry.unregister(CodeContext::Ide, "app"));
        assert!(registry.unregister(CodeContext::Build, "app"));
        assert!(!registry.contains(CodeContext::Build, "app"));
    }

    #[test]
    fn test_net_effect_of_register_sequence() {
        let registry = CodeRegistry::new();
        let ops: &[(bool, &str)] = &[
            (true, "a"),
            (true, "b"),
            (true, "a"),
            (false, "b"),
            (true, "c"),
            (false, "x"),
            (true, "b"),
            (false, "a"),
        ];
        for (add, name) in ops {
            if *add {
                registry.register(CodeContext::Build, CodeBundle::new(*name));
            } else {
                registry.unregister(CodeContext::Build, name);
            }
        }
        let names: Vec<String> = registry
            .bundles(CodeContext::Build)
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_paths_are_deduplicated() {
        let registry = CodeRegistry::new();
        registry.register(CodeContext::Ide, CodeBundle::new("a").with_path("/shared"));
        registry.register(CodeContext::Build, CodeBundle::new("b").with_path("/shared"));
        assert!(!registry.add_path("/shared", false));
        assert!(registry.add_path("/extra", true));
        assert_eq!(
            registry.paths(),
            vec![PathBuf::from("/shared"), PathBuf::from("/extra")]
        );
        assert!(registry.remove_path("/extra"));
        assert!(!registry.remove_path("/extra"));
    }

    #[tokio::test]
    async fn test_changes_are_mirrored_once() {
        let registry = CodeRegistry::new();
        let (_channel, node) = attached(&registry);

        let bundle = CodeBundle::new("tools").with_path("/tools/ebin");
        registry.register(CodeContext::Ide, bundle.clone());
        registry.register(CodeContext::Ide, bundle);
        registry.add_path("/late/ebin", true);
        registry.remove_path("/late/ebin");
        registry.unregister(CodeContext::Ide, "tools");

        assert!(node.wait_until(Duration::from_secs(1), |log| log.len() == 4).await);
        assert_eq!(
            code_calls(&node.received()),
            vec![
                ("add_patha".to_string(), "/tools/ebin".to_string()),
                ("add_pathz".to_string(), "/late/ebin".to_string()),
                ("del_path".to_string(), "/late/ebin".to_string()),
                ("del_path".to_string(), "/tools/ebin".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_attach_replays_registered_paths() {
        let registry = CodeRegistry::new();
        registry.register(CodeContext::Build, CodeBundle::new("app").with_path("/app/ebin"));
        registry.add_path("/deps/ebin", true);
        assert!(!registry.is_attached());

        let (_channel, node) = attached(&registry);
        assert!(node.wait_until(Duration::from_secs(1), |log| log.len() == 2).await);
        assert_eq!(
            code_calls(&node.received()),
            vec![
                ("add_patha".to_string(), "/app/ebin".to_string()),
                ("add_pathz".to_string(), "/deps/ebin".to_string()),
            ]
        );

        assert!(registry.detach().is_some());
        registry.add_path("/offline", false);
        assert_eq!(registry.paths().len(), 3);
    }
}
