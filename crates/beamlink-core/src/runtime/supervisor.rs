//! Lifecycle of one runtime node
//!
//! The supervisor composes the channel, code registry, shell registry and
//! event broker of a single node and drives it through
//! `Unstarted → Launching → Connected → (Debugging | ManagedRunning) → Disposed`.

use super::handle::{LaunchContext, RuntimeHandle};
use super::launcher::RuntimeLauncher;
use crate::broker::{EventBroker, SubscriptionId, categories, lifecycle};
use crate::channel::MessageChannel;
use crate::code::{CodeBundle, CodeContext, CodeRegistry};
use crate::config::{InitialCall, RuntimeConfig, TimeoutConfig};
use crate::error::{BackendError, BackendResult, ResultExt};
use crate::protocol::Term;
use crate::shell::ShellRegistry;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const COMMON_APP: &str = "beamlink_common_app";
const BUILDER_APP: &str = "beamlink_builder_app";
const IDE_APP: &str = "beamlink_ide_app";
const DEBUG_MODULE: &str = "beamlink_debug";

/// Lifecycle state of a supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    #[default]
    Unstarted,
    Launching,
    Connected,
    Debugging,
    ManagedRunning,
    Disposed,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::Launching => "launching",
            Self::Connected => "connected",
            Self::Debugging => "debugging",
            Self::ManagedRunning => "managed_running",
            Self::Disposed => "disposed",
        };
        write!(f, "{name}")
    }
}

/// Outcome of [`RuntimeSupervisor::add_path`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// The node could read the directory, so it was added as a code path
    pub path_registered: bool,
    /// Modules loaded one by one from a directory the node cannot see
    pub loaded: Vec<String>,
    /// Modules that failed to load, with the reason
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    fn registered() -> Self {
        Self {
            path_registered: true,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

type ShutdownCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SupervisorInner {
    state: RuntimeState,
    handle: Option<RuntimeHandle>,
    channel: Option<Arc<MessageChannel>>,
    monitor: Option<JoinHandle<()>>,
    debug_subscription: Option<SubscriptionId>,
    freshly_started: bool,
}

/// Supervises one runtime node and the components sharing its connection
pub struct RuntimeSupervisor {
    config: RuntimeConfig,
    timeouts: TimeoutConfig,
    launcher: Arc<dyn RuntimeLauncher>,
    broker: Arc<EventBroker>,
    code: Arc<CodeRegistry>,
    shells: Arc<ShellRegistry>,
    inner: Mutex<SupervisorInner>,
    shutdown_callbacks: Mutex<Vec<ShutdownCallback>>,
}

impl RuntimeSupervisor {
    pub fn new(
        config: RuntimeConfig,
        timeouts: TimeoutConfig,
        launcher: Arc<dyn RuntimeLauncher>,
    ) -> Self {
        let broker = Arc::new(EventBroker::new());
        let shells = Arc::new(ShellRegistry::new(
            config.node_name.clone(),
            Arc::clone(&broker),
        ));
        Self {
            config,
            timeouts,
            launcher,
            broker,
            code: Arc::new(CodeRegistry::new()),
            shells,
            inner: Mutex::new(SupervisorInner::default()),
            shutdown_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Configured node name, also the key in a runtime registry
    pub fn name(&self) -> &str {
        &self.config.node_name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        self.inner.lock().state
    }

    pub fn handle(&self) -> Option<RuntimeHandle> {
        self.inner.lock().handle.clone()
    }

    pub fn channel(&self) -> Option<Arc<MessageChannel>> {
        self.inner.lock().channel.clone()
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn code(&self) -> &Arc<CodeRegistry> {
        &self.code
    }

    pub fn shells(&self) -> &Arc<ShellRegistry> {
        &self.shells
    }

    /// Whether the node is up and its channel open
    pub fn is_running(&self) -> bool {
        self.live_channel().is_ok()
    }

    /// Register a callback run once when the runtime is disposed
    pub fn on_shutdown<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_callbacks.lock().push(Box::new(callback));
    }

    /// Start or attach to the node and complete the handshake
    #[instrument(skip(self), fields(runtime = %self.config.node_name))]
    pub async fn launch(&self) -> BackendResult<RuntimeHandle> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                RuntimeState::Unstarted => inner.state = RuntimeState::Launching,
                RuntimeState::Disposed => {
                    return Err(BackendError::already_disposed(self.name()));
                }
                other => {
                    return Err(BackendError::launch_node(
                        self.name(),
                        format!("runtime is already {other}"),
                    ));
                }
            }
        }

        let handle = self.establish().await?;
        for path in &self.config.project_paths {
            if let Err(e) = self.add_path(path, false).await {
                warn!("Could not add project path {}: {}", path.display(), e);
            }
        }
        Ok(handle)
    }

    /// Register bundles, start the node-side applications, then run
    /// [`post_launch`](Self::post_launch).
    ///
    /// Only a runtime that is not running fails this; every later step is
    /// logged and skipped on error.
    #[instrument(skip(self, bundles), fields(runtime = %self.config.node_name))]
    pub async fn initialize(&self, bundles: Vec<CodeBundle>) -> BackendResult<()> {
        let channel = self.live_channel()?;
        for bundle in bundles {
            self.code.register(self.config.code_context, bundle);
        }
        if let Err(e) = self.start_applications(&channel) {
            warn!(
                "Stopped initializing applications on '{}': {}",
                channel.name(),
                e
            );
        }
        if let Err(e) = self.post_launch().await {
            warn!("Post-launch step on '{}' failed: {}", channel.name(), e);
        }
        Ok(())
    }

    fn start_applications(&self, channel: &MessageChannel) -> BackendResult<()> {
        channel
            .cast(
                COMMON_APP,
                "init",
                vec![
                    json!(self.config.bridge_module),
                    json!(self.config.watch()),
                    json!(self.config.warn_process_size_mb),
                    json!(self.config.kill_process_size_mb),
                ],
            )
            .context(format!("{COMMON_APP}:init"))?;

        if self.config.code_context == CodeContext::Ide {
            channel
                .cast(BUILDER_APP, "init", vec![])
                .context(format!("{BUILDER_APP}:init"))?;
            channel
                .cast(IDE_APP, "init", vec![])
                .context(format!("{IDE_APP}:init"))?;
        }
        debug!("Started applications on '{}'", channel.name());
        Ok(())
    }

    /// Context-specific work once the node is connected
    pub async fn post_launch(&self) -> BackendResult<()> {
        let channel = self.live_channel()?;
        match self.config.launch_context {
            LaunchContext::Debug => self.start_debugging(&channel).await,
            LaunchContext::Managed => {
                let freshly_started = {
                    let mut inner = self.inner.lock();
                    if inner.state == RuntimeState::Disposed {
                        return Err(BackendError::already_disposed(self.name()));
                    }
                    inner.state = RuntimeState::ManagedRunning;
                    inner.freshly_started
                };
                if freshly_started {
                    self.run_initial()?;
                } else {
                    debug!("Node '{}' was already running, skipping initial call", channel.name());
                }
                Ok(())
            }
            LaunchContext::Interactive => Ok(()),
        }
    }

    /// Fire the configured initial call now; returns whether anything was sent
    pub fn run_initial(&self) -> BackendResult<bool> {
        let channel = self.live_channel()?;
        match &self.config.initial_call {
            Some(call) => run_initial_call(&channel, call),
            None => Ok(false),
        }
    }

    async fn start_debugging(&self, channel: &Arc<MessageChannel>) -> BackendResult<()> {
        let running = channel
            .call(DEBUG_MODULE, "is_running", vec![], self.timeouts.probe)
            .await?;
        if running == Value::Bool(true) {
            info!("Debugger already running on '{}'", channel.name());
            return Ok(());
        }

        let projects: Vec<Term> = self
            .config
            .project_paths
            .iter()
            .map(|p| json!(p.to_string_lossy()))
            .collect();
        // The node may report the armed target right after `attach`
        let subscription = self.arm_initial_call(channel);
        if let Err(e) = channel.cast(DEBUG_MODULE, "attach", vec![Term::Array(projects)]) {
            self.broker.unsubscribe(categories::DEBUG, subscription);
            return Err(e);
        }

        let mut inner = self.inner.lock();
        if inner.state == RuntimeState::Disposed {
            self.broker.unsubscribe(categories::DEBUG, subscription);
            return Err(BackendError::already_disposed(self.name()));
        }
        inner.state = RuntimeState::Debugging;
        inner.debug_subscription = Some(subscription);
        info!("Debugger attached to '{}'", channel.name());
        Ok(())
    }

    /// Fire the initial call on the first debug event, once
    fn arm_initial_call(&self, channel: &Arc<MessageChannel>) -> SubscriptionId {
        let fired = Arc::new(AtomicBool::new(false));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let broker = Arc::downgrade(&self.broker);
        let channel = Arc::downgrade(channel);
        let call = self.config.initial_call.clone();

        let own_slot = Arc::clone(&slot);
        let own_fired = Arc::clone(&fired);
        let id = self.broker.subscribe(categories::DEBUG, move |_| {
            if own_fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let (Some(id), Some(broker)) = (own_slot.lock().take(), broker.upgrade()) {
                broker.unsubscribe(categories::DEBUG, id);
            }
            let (Some(call), Some(channel)) = (&call, channel.upgrade()) else {
                return;
            };
            if let Err(e) = run_initial_call(&channel, call) {
                warn!("Initial call after first debug event failed: {}", e);
            }
        });
        *slot.lock() = Some(id);
        // Fired before the id was stored, so the listener could not remove itself
        if fired.load(Ordering::SeqCst) && slot.lock().take().is_some() {
            self.broker.unsubscribe(categories::DEBUG, id);
        }
        id
    }

    /// Tear everything down; later calls are no-ops
    pub async fn dispose(&self) {
        let (handle, channel, monitor, subscription) = {
            let mut inner = self.inner.lock();
            if inner.state == RuntimeState::Disposed {
                return;
            }
            inner.state = RuntimeState::Disposed;
            (
                inner.handle.clone(),
                inner.channel.take(),
                inner.monitor.take(),
                inner.debug_subscription.take(),
            )
        };

        if let Some(handle) = &handle {
            handle.mark_dead();
        }
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        if let Some(id) = subscription {
            self.broker.unsubscribe(categories::DEBUG, id);
        }
        self.shells.dispose();
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.code.detach();

        let callbacks = std::mem::take(&mut *self.shutdown_callbacks.lock());
        for callback in callbacks {
            callback();
        }

        self.broker.publish(
            categories::LIFECYCLE,
            json!({"event": lifecycle::RUNTIME_DISPOSED, "runtime": self.name()}),
        );
        info!("Disposed runtime '{}'", self.name());
    }

    /// Make `path` available on the node.
    ///
    /// A directory the node can read becomes a code path; otherwise every
    /// `.beam` file in it is loaded from here, one module at a time.
    pub async fn add_path(
        &self,
        path: impl AsRef<Path>,
        use_pathz: bool,
    ) -> BackendResult<LoadReport> {
        let path = path.as_ref();
        let channel = self.live_channel()?;
        let accessible = channel
            .call(
                "filelib",
                "is_dir",
                vec![json!(path.to_string_lossy())],
                self.timeouts.probe,
            )
            .await
            .context(format!("probing {}", path.display()))?;

        if accessible == Value::Bool(true) {
            self.code.add_path(path, use_pathz);
            return Ok(LoadReport::registered());
        }
        debug!(
            "Node '{}' cannot read {}, loading modules directly",
            channel.name(),
            path.display()
        );
        self.load_beams_from_dir(&channel, path).await
    }

    /// Forget a code path
    pub fn remove_path(&self, path: impl AsRef<Path>) -> BackendResult<bool> {
        if self.state() == RuntimeState::Disposed {
            return Err(BackendError::already_disposed(self.name()));
        }
        Ok(self.code.remove_path(path))
    }

    async fn load_beams_from_dir(
        &self,
        channel: &MessageChannel,
        dir: &Path,
    ) -> BackendResult<LoadReport> {
        let is_dir = tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir());
        if !is_dir {
            warn!("{} is not a local directory, nothing to load", dir.display());
            return Ok(LoadReport::default());
        }
        let io_err =
            |e: std::io::Error| BackendError::io_at(dir.display().to_string(), e.to_string());
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
        let mut beams: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "beam") {
                beams.push(path);
            }
        }
        beams.sort();

        let mut report = LoadReport::default();
        for path in beams {
            let Some(module) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match self.load_beam(channel, &module, &path).await {
                Ok(()) => report.loaded.push(module),
                Err(e) => {
                    error!("Could not load {}: {}", module, e);
                    report.failed.push((module, e.to_string()));
                }
            }
        }
        info!(
            "Loaded {} module(s) from {} ({} failed)",
            report.loaded.len(),
            dir.display(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn load_beam(
        &self,
        channel: &MessageChannel,
        module: &str,
        path: &Path,
    ) -> BackendResult<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::io_at(path.display().to_string(), e.to_string()))?;
        if !is_beam(&bytes) {
            return Err(BackendError::io_at(path.display().to_string(), "not a BEAM file"));
        }

        let result = channel
            .call(
                "code",
                "load_binary",
                vec![
                    json!(module),
                    json!(path.to_string_lossy()),
                    json!({"binary": STANDARD.encode(&bytes)}),
                ],
                self.timeouts.call,
            )
            .await?;
        if is_error_term(&result) {
            return Err(BackendError::remote(result));
        }
        Ok(())
    }

    /// Relaunch after the node died; registered code paths are replayed.
    ///
    /// A restart that failed leaves the runtime `Unstarted` with its old
    /// handle, and may be retried.
    #[instrument(skip(self), fields(runtime = %self.config.node_name))]
    pub async fn restart(&self) -> BackendResult<RuntimeHandle> {
        let (old_handle, channel, monitor, subscription) = {
            let mut inner = self.inner.lock();
            match inner.state {
                RuntimeState::Disposed => return Err(BackendError::already_disposed(self.name())),
                RuntimeState::Unstarted if inner.handle.is_some() => {}
                RuntimeState::Unstarted | RuntimeState::Launching => {
                    return Err(BackendError::launch_node(
                        self.name(),
                        format!("cannot restart a runtime that is {}", inner.state),
                    ));
                }
                _ => {}
            }
            let running = inner.handle.as_ref().is_some_and(RuntimeHandle::is_alive)
                && inner.channel.as_ref().is_some_and(|c| c.is_open());
            if running {
                return Err(BackendError::launch_node(self.name(), "runtime is still running"));
            }
            inner.state = RuntimeState::Launching;
            (
                inner.handle.clone(),
                inner.channel.take(),
                inner.monitor.take(),
                inner.debug_subscription.take(),
            )
        };

        if let Some(monitor) = monitor {
            monitor.abort();
        }
        if let Some(handle) = old_handle {
            handle.mark_dead();
        }
        if let Some(id) = subscription {
            self.broker.unsubscribe(categories::DEBUG, id);
        }
        if let Some(channel) = channel {
            channel.close().await;
        }

        info!("Restarting runtime '{}'", self.name());
        let handle = self.establish().await?;
        let channel = self.live_channel()?;
        if let Err(e) = self.start_applications(&channel) {
            warn!("Stopped initializing applications on '{}': {}", channel.name(), e);
        }
        self.post_launch().await?;
        Ok(handle)
    }

    /// Connect within the launch timeout and install the new connection
    async fn establish(&self) -> BackendResult<RuntimeHandle> {
        let connected = tokio::time::timeout(self.timeouts.launch, self.connect())
            .await
            .unwrap_or_else(|_| {
                Err(BackendError::launch_node(
                    self.name(),
                    format!("no handshake within {:?}", self.timeouts.launch),
                ))
            });

        let (handle, channel, freshly_started) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.state == RuntimeState::Launching {
                    inner.state = RuntimeState::Unstarted;
                }
                error!("Failed to launch '{}': {}", self.name(), e);
                return Err(e);
            }
        };

        let installed = {
            let mut inner = self.inner.lock();
            if inner.state == RuntimeState::Disposed {
                false
            } else {
                inner.state = RuntimeState::Connected;
                inner.handle = Some(handle.clone());
                inner.channel = Some(Arc::clone(&channel));
                inner.monitor = Some(self.spawn_monitor(handle.clone(), &channel));
                inner.freshly_started = freshly_started;
                self.code.attach(Arc::clone(&channel));
                self.shells.attach(Arc::clone(&channel));
                true
            }
        };
        if !installed {
            channel.close().await;
            return Err(BackendError::already_disposed(self.name()));
        }

        self.broker.publish(
            categories::LIFECYCLE,
            json!({
                "event": lifecycle::RUNTIME_STARTED,
                "runtime": handle.name(),
                "version": handle.version(),
            }),
        );
        info!(
            "Runtime '{}' connected (OTP {})",
            handle.name(),
            handle.version().unwrap_or("unknown")
        );
        Ok(handle)
    }

    async fn connect(&self) -> BackendResult<(RuntimeHandle, Arc<MessageChannel>, bool)> {
        let node_name = if self.config.attach {
            self.config.node_name.clone()
        } else {
            let suffix = Uuid::new_v4().simple().to_string();
            self.config.effective_node_name(&suffix[..8])
        };
        info!("Launching '{}' ({})", node_name, self.config.launch_context);

        let launched = self
            .launcher
            .launch(&self.config, &node_name, &self.timeouts)
            .await
            .map_err(|e| match e {
                BackendError::Launch { .. } => e,
                other => BackendError::launch_node(&node_name, other.to_string()),
            })?;

        let channel = Arc::new(MessageChannel::start(
            node_name.clone(),
            launched.wire,
            Arc::clone(&self.broker),
            &self.timeouts,
        ));
        let release = match channel
            .call(
                "erlang",
                "system_info",
                vec![json!("otp_release")],
                self.timeouts.launch,
            )
            .await
        {
            Ok(release) => release,
            Err(e) => {
                channel.close().await;
                return Err(BackendError::launch_node(
                    node_name,
                    format!("handshake failed: {e}"),
                ));
            }
        };

        let version = release
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| release.to_string());
        let handle =
            RuntimeHandle::new(node_name, self.config.launch_context).with_version(version);
        Ok((handle, channel, launched.freshly_started))
    }

    fn spawn_monitor(&self, handle: RuntimeHandle, channel: &MessageChannel) -> JoinHandle<()> {
        let closed = channel.closed_token();
        let code = Arc::clone(&self.code);
        tokio::spawn(async move {
            closed.cancelled().await;
            if handle.mark_dead() {
                warn!("Runtime '{}' stopped unexpectedly", handle.name());
                code.detach();
            }
        })
    }

    fn live_channel(&self) -> BackendResult<Arc<MessageChannel>> {
        let inner = self.inner.lock();
        if inner.state == RuntimeState::Disposed {
            return Err(BackendError::already_disposed(self.name()));
        }
        match (&inner.handle, &inner.channel) {
            (Some(handle), Some(channel)) if handle.is_alive() && channel.is_open() => {
                Ok(Arc::clone(channel))
            }
            _ => Err(BackendError::not_running(self.name())),
        }
    }
}

impl std::fmt::Debug for RuntimeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSupervisor")
            .field("name", &self.config.node_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Cast an initial call; empty module or function means there is nothing to run
fn run_initial_call(channel: &MessageChannel, call: &InitialCall) -> BackendResult<bool> {
    if !call.is_runnable() {
        debug!("Skipping empty initial call");
        return Ok(false);
    }
    let args = if call.args.is_empty() {
        Vec::new()
    } else {
        vec![json!(call.args)]
    };
    channel.cast(&call.module, &call.function, args)?;
    info!("Started {}:{} on '{}'", call.module, call.function, channel.name());
    Ok(true)
}

/// BEAM files are IFF containers: `FOR1 <size> BEAM ...`
fn is_beam(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"FOR1" && &bytes[8..12] == b"BEAM"
}

/// `{error, Reason}` arrives as `["error", Reason]` or `{"error": Reason}`
fn is_error_term(term: &Term) -> bool {
    match term {
        Value::Array(items) => items.first().and_then(Value::as_str) == Some("error"),
        Value::Object(map) => map.len() == 1 && map.contains_key("error"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outcome;
    use crate::runtime::launcher::{Launched, MockRuntimeLauncher};
    use crate::transport::{ScriptedNode, loopback};
    use std::sync::atomic::AtomicUsize;

    fn supervisor_with(launcher: MockRuntimeLauncher) -> RuntimeSupervisor {
        RuntimeSupervisor::new(
            RuntimeConfig::named("mocked"),
            TimeoutConfig::default(),
            Arc::new(launcher),
        )
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_supervisor_relaunchable() {
        let mut launcher = MockRuntimeLauncher::new();
        launcher
            .expect_launch()
            .times(2)
            .returning(|_, name, _| Err(BackendError::launch_node(name, "spawn failed")));
        let supervisor = supervisor_with(launcher);

        for _ in 0..2 {
            let err = supervisor.launch().await.unwrap_err();
            assert!(matches!(err, BackendError::Launch { .. }));
            assert_eq!(supervisor.state(), RuntimeState::Unstarted);
        }
        assert!(supervisor.handle().is_none());
    }

    #[tokio::test]
    async fn test_non_launch_errors_are_wrapped() {
        let mut launcher = MockRuntimeLauncher::new();
        launcher
            .expect_launch()
            .returning(|_, _, _| Err(BackendError::transport("pipe broke")));
        let supervisor = supervisor_with(launcher);

        match supervisor.launch().await.unwrap_err() {
            BackendError::Launch { node, message, .. } => {
                assert_eq!(node.as_deref(), Some("mocked"));
                assert!(message.contains("pipe broke"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_is_launch_error() {
        let mut launcher = MockRuntimeLauncher::new();
        launcher.expect_launch().returning(|_, _, _| {
            // The remote end is dropped at once, so the handshake sees end of stream
            let (wire, _remote) = loopback();
            Ok(Launched {
                wire,
                freshly_started: true,
            })
        });
        let supervisor = supervisor_with(launcher);

        let err = supervisor.launch().await.unwrap_err();
        assert!(matches!(err, BackendError::Launch { .. }));
        assert_eq!(supervisor.state(), RuntimeState::Unstarted);
    }

    #[tokio::test]
    async fn test_failed_restart_can_be_retried() {
        let nodes: Arc<Mutex<Vec<ScriptedNode>>> = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let served = Arc::clone(&nodes);
        let count = Arc::clone(&attempts);
        let mut launcher = MockRuntimeLauncher::new();
        launcher.expect_launch().times(3).returning(move |_, name, _| {
            if count.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(BackendError::launch_node(name, "port in use"));
            }
            let (wire, remote) = loopback();
            served
                .lock()
                .push(remote.serve(|_, _, _| Outcome::Ok(json!("26"))));
            Ok(Launched {
                wire,
                freshly_started: true,
            })
        });
        let supervisor = supervisor_with(launcher);

        let first = supervisor.launch().await.unwrap();
        let closed = supervisor.channel().unwrap().closed_token();
        nodes.lock()[0].hang_up();
        closed.cancelled().await;

        let err = supervisor.restart().await.unwrap_err();
        assert!(matches!(err, BackendError::Launch { .. }));
        assert_eq!(supervisor.state(), RuntimeState::Unstarted);
        assert!(!first.is_alive());

        let second = supervisor.restart().await.unwrap();
        assert!(second.is_alive());
        assert_ne!(first.node_id(), second.node_id());
        assert_eq!(supervisor.state(), RuntimeState::Connected);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        supervisor.dispose().await;
    }

    #[tokio::test]
    async fn test_disposed_supervisor_rejects_everything() {
        let supervisor = supervisor_with(MockRuntimeLauncher::new());
        supervisor.dispose().await;
        supervisor.dispose().await;

        assert_eq!(supervisor.state(), RuntimeState::Disposed);
        assert!(matches!(
            supervisor.launch().await.unwrap_err(),
            BackendError::AlreadyDisposed { .. }
        ));
        assert!(matches!(
            supervisor.initialize(vec![]).await.unwrap_err(),
            BackendError::AlreadyDisposed { .. }
        ));
        assert!(matches!(
            supervisor.remove_path("/x").unwrap_err(),
            BackendError::AlreadyDisposed { .. }
        ));
        assert!(matches!(
            supervisor.restart().await.unwrap_err(),
            BackendError::AlreadyDisposed { .. }
        ));
    }

    #[tokio::test]
    async fn test_unstarted_operations_are_not_running() {
        let supervisor = supervisor_with(MockRuntimeLauncher::new());
        assert!(matches!(
            supervisor.add_path("/x", false).await.unwrap_err(),
            BackendError::NotRunning { .. }
        ));
        assert!(!supervisor.is_running());
        assert!(supervisor.restart().await.is_err());
    }

    #[test]
    fn test_is_beam() {
        let mut beam = b"FOR1".to_vec();
        beam.extend_from_slice(&[0, 0, 0, 4]);
        beam.extend_from_slice(b"BEAM");
        assert!(is_beam(&beam));
        assert!(!is_beam(b"FOR1\0\0\0\x04JUNK"));
        assert!(!is_beam(b"FOR1"));
    }

    #[test]
    fn test_is_error_term() {
        assert!(is_error_term(&json!(["error", "badfile"])));
        assert!(is_error_term(&json!({"error": "badfile"})));
        assert!(!is_error_term(&json!(["module", "m"])));
        assert!(!is_error_term(&json!("ok")));
    }
}
