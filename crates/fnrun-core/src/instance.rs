//! FunctionInstance - one supervised function process and its directory.

use crate::client::FunctionClient;
use crate::config::RunnerConfig;
use crate::error::{CoreError, Result};
use crate::hash::FunctionHash;
use crate::lease::{DirLease, DirRegistry};
use crate::materialize::{function_dir, materialize};
use crate::template::{RuntimeTemplate, SERVER_FILE};
use chrono::{DateTime, Utc};
use fnrun_process::{
    wait_ready, ChildProcess, LogSink, PortAllocator, ProcessError, ProcessStatus, SpawnSpec,
};
use serde::Serialize;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A booted function: a child engine process serving one wrapped function
/// on a loopback port, plus the directory it was materialized into.
///
/// Invocations are serialized: at most one request is in flight per
/// instance. The child is never restarted; once it exits every
/// [`invoke`](Self::invoke) fails with [`CoreError::ProcessExited`].
///
/// Instances of identical code share one directory, which is deleted when
/// the last of them is closed. Dropping an instance kills the child but
/// leaves the directory in place; call [`close`](Self::close) to remove both.
pub struct FunctionInstance {
    hash: FunctionHash,
    child: ChildProcess,
    client: FunctionClient,
    port: u16,
    function_dir: PathBuf,
    lease: std::sync::Mutex<Option<DirLease>>,
    run_lock: Mutex<()>,
    last_invoked: std::sync::Mutex<Option<DateTime<Utc>>>,
    created_at: DateTime<Utc>,
    kill_timeout: Duration,
}

impl FunctionInstance {
    /// Materialize `code`, start the engine on it, and wait until the
    /// function server accepts connections.
    ///
    /// `init_data` is serialized once and passed to the function's `init`.
    /// `cancel` aborts the readiness wait. Boots of identical code through
    /// the same `dirs` registry run one at a time. On any failure after the
    /// directory was created, the child is killed and the directory removed
    /// before the error is returned, unless another instance still uses it.
    #[allow(clippy::too_many_arguments)]
    pub async fn create<I: Serialize + ?Sized>(
        config: &RunnerConfig,
        runtime: &RuntimeTemplate,
        ports: &PortAllocator,
        dirs: &Arc<DirRegistry>,
        sink: Arc<dyn LogSink>,
        init_data: &I,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let start = Instant::now();
        let hash = FunctionHash::of(code);
        tracing::info!(function_hash = %hash, code_len = code.len(), "Creating function instance");

        let init_json = serde_json::to_string(init_data).map_err(|source| CoreError::Serialize {
            what: "init data",
            source,
        })?;

        let lease = dirs.acquire(&hash);
        let dir = function_dir(&config.work_dir, &hash);

        // Held until ready: the wrapper on disk belongs to this boot until
        // the engine has loaded it.
        let boot_lock = lease.boot_lock();
        let _booting = tokio::select! {
            biased;
            guard = boot_lock.lock() => guard,
            _ = cancel.cancelled() => {
                tracing::debug!(function_hash = %hash, "Cancelled waiting for a sibling boot");
                release_dir(lease, &dir).await;
                return Err(ProcessError::Cancelled.into());
            }
        };

        if let Err(e) = materialize(&config.work_dir, &hash, runtime, code, &init_json).await {
            tracing::error!(function_hash = %hash, error = %e, "Materialization failed");
            release_dir(lease, &dir).await;
            return Err(e);
        }

        let (port, client, child) = match Self::launch(config, ports, &dir, sink) {
            Ok(launched) => launched,
            Err(e) => {
                tracing::error!(function_hash = %hash, error = %e, "Function process launch failed");
                release_dir(lease, &dir).await;
                return Err(e);
            }
        };

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let ready = wait_ready(
            addr,
            &child.exit_watch(),
            cancel,
            &config.readiness_options(),
        )
        .await;
        if let Err(e) = ready {
            tracing::error!(function_hash = %hash, port, error = %e, "Function failed to boot");
            if let Err(kill_err) = child.kill(config.kill_timeout).await {
                tracing::warn!(function_hash = %hash, error = %kill_err, "Kill after failed boot");
            }
            release_dir(lease, &dir).await;
            return Err(e.into());
        }

        tracing::info!(
            function_hash = %hash,
            port,
            pid = ?child.pid(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Function instance ready"
        );

        Ok(Self {
            hash,
            child,
            client,
            port,
            function_dir: dir,
            lease: std::sync::Mutex::new(Some(lease)),
            run_lock: Mutex::new(()),
            last_invoked: std::sync::Mutex::new(None),
            created_at: Utc::now(),
            kill_timeout: config.kill_timeout,
        })
    }

    /// Allocate a port and start the engine on the server file in `dir`.
    fn launch(
        config: &RunnerConfig,
        ports: &PortAllocator,
        dir: &Path,
        sink: Arc<dyn LogSink>,
    ) -> Result<(u16, FunctionClient, ChildProcess)> {
        let port = ports.allocate()?;
        let client = FunctionClient::for_port(port)?;

        // Network and env access only; no read/write/run permissions.
        let mut spec = SpawnSpec::new(config.resolved_engine_path())
            .arg("run")
            .arg("--allow-net")
            .arg("--allow-env")
            .arg(dir.join(SERVER_FILE))
            .arg(port.to_string())
            .clear_env(true)
            .env("NO_COLOR", "1")
            .env("DENO_DIR", config.engine_cache_dir());
        for (key, value) in &config.env {
            spec = spec.env(key, value);
        }

        let child = ChildProcess::spawn(&spec, sink)?;
        Ok((port, client, child))
    }

    /// Send `event` to the function and return what its handler returned.
    ///
    /// Waits for any in-flight invocation on this instance to finish first.
    /// The last-invoked time is updated before anything else, so it moves
    /// even when the call fails.
    pub async fn invoke<E: Serialize + ?Sized>(&self, event: &E) -> Result<Value> {
        let _guard = self.run_lock.lock().await;
        self.touch();

        let status = self.child.status();
        if !status.is_running() {
            tracing::debug!(function_hash = %self.hash, %status, "Invoke on exited process");
            return Err(CoreError::ProcessExited);
        }

        let start = Instant::now();
        let result = self.client.call(event).await;
        match &result {
            Ok(_) => tracing::debug!(
                function_hash = %self.hash,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Invocation completed"
            ),
            Err(e) => tracing::debug!(
                function_hash = %self.hash,
                error = %e,
                remote = e.is_remote(),
                "Invocation failed"
            ),
        }
        result
    }

    /// [`invoke`](Self::invoke), aborted when `cancel` fires.
    ///
    /// Cancellation drops the in-flight request and releases the instance
    /// for the next caller; the child keeps running.
    pub async fn invoke_with_cancel<E: Serialize + ?Sized>(
        &self,
        event: &E,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(function_hash = %self.hash, "Invocation cancelled");
                Err(CoreError::Cancelled)
            }
            result = self.invoke(event) => result,
        }
    }

    /// Kill the child and delete the function directory once no other
    /// instance uses it.
    ///
    /// Best-effort: cleanup problems are logged, never returned. Safe to
    /// call more than once.
    pub async fn close(&self) {
        let start = Instant::now();
        tracing::info!(function_hash = %self.hash, pid = ?self.child.pid(), "Closing function instance");

        if let Err(e) = self.child.kill(self.kill_timeout).await {
            tracing::warn!(function_hash = %self.hash, error = %e, "Failed to kill function process");
        }
        let lease = self
            .lease
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(lease) = lease {
            release_dir(lease, &self.function_dir).await;
        }

        tracing::info!(
            function_hash = %self.hash,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Function instance closed"
        );
    }

    /// Content hash of the function source.
    pub fn hash(&self) -> &FunctionHash {
        &self.hash
    }

    /// Loopback port the function server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Endpoint URL invocations are sent to.
    pub fn endpoint(&self) -> String {
        self.client.endpoint().to_string()
    }

    /// Directory the function was materialized into.
    pub fn function_dir(&self) -> &Path {
        &self.function_dir
    }

    /// OS process id of the engine.
    pub fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    /// When the instance became ready.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start time of the most recent invocation attempt.
    pub fn last_invoked(&self) -> Option<DateTime<Utc>> {
        *self
            .last_invoked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current process status.
    pub fn status(&self) -> ProcessStatus {
        self.child.status()
    }

    /// True once the engine process has terminated.
    pub fn has_exited(&self) -> bool {
        self.child.has_exited()
    }

    /// Resolves when the engine process terminates.
    pub async fn wait_exit(&self) -> ProcessStatus {
        self.child.exit_watch().wait().await
    }

    fn touch(&self) {
        let now = Utc::now();
        let mut last = self
            .last_invoked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Wall clock may step backwards; never let the timestamp follow it.
        *last = Some(match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }
}

impl std::fmt::Debug for FunctionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionInstance")
            .field("hash", &self.hash)
            .field("port", &self.port)
            .field("pid", &self.child.pid())
            .field("function_dir", &self.function_dir)
            .field("status", &self.child.status())
            .finish()
    }
}

/// Drop `lease` and delete `dir` if it was the last one.
async fn release_dir(lease: DirLease, dir: &Path) {
    if !lease.release() {
        tracing::debug!(path = %dir.display(), "Function directory still in use, keeping it");
        return;
    }
    remove_dir(dir).await;
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!(path = %dir.display(), "Removed function directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Could not delete function directory"
        ),
    }
}

#[cfg(test)]
impl FunctionInstance {
    /// Wrap an already running child and an arbitrary endpoint.
    pub(crate) fn from_parts(child: ChildProcess, endpoint: &str, function_dir: PathBuf) -> Self {
        let dirs = Arc::new(DirRegistry::default());
        Self::from_parts_in(&dirs, FunctionHash::of(endpoint), child, endpoint, function_dir)
    }

    /// [`from_parts`](Self::from_parts) holding a lease from `dirs`.
    pub(crate) fn from_parts_in(
        dirs: &Arc<DirRegistry>,
        hash: FunctionHash,
        child: ChildProcess,
        endpoint: &str,
        function_dir: PathBuf,
    ) -> Self {
        Self {
            lease: std::sync::Mutex::new(Some(dirs.acquire(&hash))),
            hash,
            child,
            client: FunctionClient::new(endpoint).unwrap(),
            port: 0,
            function_dir,
            run_lock: Mutex::new(()),
            last_invoked: std::sync::Mutex::new(None),
            created_at: Utc::now(),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use crate::template::FUNCTION_FILE;
    use fnrun_process::NullSink;
    use hyper::{Body, Response, StatusCode};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn sleeper() -> ChildProcess {
        let spec = SpawnSpec::new("/bin/sh").arg("-c").arg("exec sleep 60");
        ChildProcess::spawn(&spec, Arc::new(NullSink)).unwrap()
    }

    async fn echo_instance(dir: PathBuf) -> FunctionInstance {
        let addr = spawn_server(|body| async move { Response::new(Body::from(body)) }).await;
        FunctionInstance::from_parts(sleeper(), &format!("http://{addr}/"), dir)
    }

    fn config(work_dir: &Path, engine: &str) -> RunnerConfig {
        RunnerConfig::builder()
            .work_dir(work_dir)
            .engine_path(engine)
            .boot_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    const ECHO: &str = "function handle(event) { return event; }";

    #[tokio::test]
    async fn test_invoke_returns_handler_value() {
        let work = tempfile::tempdir().unwrap();
        let instance = echo_instance(work.path().to_path_buf()).await;

        let event = json!({"name": "Pete", "message": "Hi"});
        assert_eq!(instance.invoke(&event).await.unwrap(), event);
        assert_eq!(instance.invoke(&json!([1, "two"])).await.unwrap(), json!([1, "two"]));

        instance.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_invocations_never_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let (flight, overlap) = (Arc::clone(&in_flight), Arc::clone(&overlapped));
        let addr = spawn_server(move |body| {
            let (flight, overlap) = (Arc::clone(&flight), Arc::clone(&overlap));
            async move {
                if flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
                Response::new(Body::from(body))
            }
        })
        .await;

        let work = tempfile::tempdir().unwrap();
        let instance = Arc::new(FunctionInstance::from_parts(
            sleeper(),
            &format!("http://{addr}/"),
            work.path().to_path_buf(),
        ));

        let calls: Vec<_> = (0..8)
            .map(|i| {
                let instance = Arc::clone(&instance);
                tokio::spawn(async move {
                    let event = json!({"n": i});
                    let result = instance.invoke(&event).await.unwrap();
                    assert_eq!(result, event);
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap();
        }

        assert!(!overlapped.load(Ordering::SeqCst));
        instance.close().await;
    }

    #[tokio::test]
    async fn test_last_invoked_moves_on_failure() {
        let addr = spawn_server(|_| async {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("nope"))
                .unwrap()
        })
        .await;
        let work = tempfile::tempdir().unwrap();
        let instance = FunctionInstance::from_parts(
            sleeper(),
            &format!("http://{addr}/"),
            work.path().to_path_buf(),
        );
        assert!(instance.last_invoked().is_none());

        let err = instance.invoke(&json!({})).await.unwrap_err();
        assert!(matches!(err, CoreError::Http { status: 500, .. }));
        let first = instance.last_invoked().expect("timestamp set on failure");

        instance.invoke(&json!({})).await.unwrap_err();
        assert!(instance.last_invoked().unwrap() >= first);

        instance.close().await;
    }

    #[tokio::test]
    async fn test_remote_error_keeps_instance_usable() {
        let addr = spawn_server(|body| async move {
            let event: Value = serde_json::from_slice(&body).unwrap();
            let reply = if event["fail"] == json!(true) {
                json!({"error": {"message": "handler threw", "stack": "Error: handler threw"}})
            } else {
                event
            };
            Response::new(Body::from(reply.to_string()))
        })
        .await;
        let work = tempfile::tempdir().unwrap();
        let instance = FunctionInstance::from_parts(
            sleeper(),
            &format!("http://{addr}/"),
            work.path().to_path_buf(),
        );

        let err = instance.invoke(&json!({"fail": true})).await.unwrap_err();
        assert!(matches!(err, CoreError::Runtime { ref message, .. } if !message.is_empty()));
        assert_eq!(
            instance.invoke(&json!({"fail": false})).await.unwrap(),
            json!({"fail": false})
        );

        instance.close().await;
    }

    #[tokio::test]
    async fn test_close_removes_dir_and_blocks_invoke() {
        let work = tempfile::tempdir().unwrap();
        let dir = work.path().join("function-x");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("function.js"), b"").unwrap();

        let instance = echo_instance(dir.clone()).await;
        instance.close().await;

        assert!(!dir.exists());
        assert!(instance.has_exited());
        assert!(matches!(
            instance.invoke(&json!({})).await,
            Err(CoreError::ProcessExited)
        ));

        // Idempotent
        instance.close().await;
    }

    #[tokio::test]
    async fn test_dead_process_short_circuits() {
        let work = tempfile::tempdir().unwrap();
        let spec = SpawnSpec::new("/bin/sh").arg("-c").arg("exit 1");
        let child = ChildProcess::spawn(&spec, Arc::new(NullSink)).unwrap();
        // Endpoint nobody listens on: reaching the network would be a Transport error.
        let instance =
            FunctionInstance::from_parts(child, "http://127.0.0.1:9/", work.path().to_path_buf());

        instance.wait_exit().await;
        assert!(matches!(
            instance.invoke(&json!({})).await,
            Err(CoreError::ProcessExited)
        ));
        assert!(instance.last_invoked().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_invoke_releases_lock() {
        let addr = spawn_server(|body| async move {
            let event: Value = serde_json::from_slice(&body).unwrap();
            if event["slow"] == json!(true) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Response::new(Body::from(body))
        })
        .await;
        let work = tempfile::tempdir().unwrap();
        let instance = FunctionInstance::from_parts(
            sleeper(),
            &format!("http://{addr}/"),
            work.path().to_path_buf(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = instance
            .invoke_with_cancel(&json!({"slow": true}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            instance.invoke(&json!({"slow": false})),
        )
        .await
        .expect("lock released after cancel")
        .unwrap();
        assert_eq!(result, json!({"slow": false}));
        assert!(!instance.has_exited());

        instance.close().await;
    }

    #[tokio::test]
    async fn test_missing_engine_leaves_no_dir() {
        let work = tempfile::tempdir().unwrap();
        let config = config(work.path(), "/nonexistent/deno");
        let ports = PortAllocator::default();

        let err = FunctionInstance::create(
            &config,
            &RuntimeTemplate::deno(),
            &ports,
            &Arc::new(DirRegistry::default()),
            Arc::new(NullSink),
            &json!({}),
            ECHO,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::Process(ProcessError::Spawn { .. })));
        assert!(!function_dir(work.path(), &FunctionHash::of(ECHO)).exists());
    }

    #[tokio::test]
    async fn test_engine_exit_during_boot_rolls_back() {
        let work = tempfile::tempdir().unwrap();
        let config = config(work.path(), "/bin/false");

        let err = FunctionInstance::create(
            &config,
            &RuntimeTemplate::deno(),
            &PortAllocator::default(),
            &Arc::new(DirRegistry::default()),
            Arc::new(NullSink),
            &json!({}),
            ECHO,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CoreError::Process(ProcessError::ExitedDuringBoot(_))
        ));
        assert!(!function_dir(work.path(), &FunctionHash::of(ECHO)).exists());
    }

    #[tokio::test]
    async fn test_cancelled_boot_rolls_back() {
        let work = tempfile::tempdir().unwrap();
        let config = config(work.path(), "/bin/sh");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = FunctionInstance::create(
            &config,
            &RuntimeTemplate::deno(),
            &PortAllocator::default(),
            &Arc::new(DirRegistry::default()),
            Arc::new(NullSink),
            &json!({}),
            ECHO,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CoreError::Process(ProcessError::Cancelled)));
        assert!(!function_dir(work.path(), &FunctionHash::of(ECHO)).exists());
    }

    #[tokio::test]
    async fn test_failed_sibling_boot_keeps_live_dir() {
        let work = tempfile::tempdir().unwrap();
        let dirs = Arc::new(DirRegistry::default());
        let hash = FunctionHash::of(ECHO);
        let dir = materialize(work.path(), &hash, &RuntimeTemplate::deno(), ECHO, "{}")
            .await
            .unwrap();

        let addr = spawn_server(|body| async move { Response::new(Body::from(body)) }).await;
        let live = FunctionInstance::from_parts_in(
            &dirs,
            hash.clone(),
            sleeper(),
            &format!("http://{addr}/"),
            dir.clone(),
        );

        let err = FunctionInstance::create(
            &config(work.path(), "/bin/false"),
            &RuntimeTemplate::deno(),
            &PortAllocator::default(),
            &dirs,
            Arc::new(NullSink),
            &json!({}),
            ECHO,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Process(ProcessError::ExitedDuringBoot(_))
        ));

        assert!(dir.join(FUNCTION_FILE).exists());
        assert_eq!(dirs.users(&hash), 1);
        assert_eq!(live.invoke(&json!({"a": 1})).await.unwrap(), json!({"a": 1}));

        live.close().await;
        assert!(!dir.exists());
        assert_eq!(dirs.users(&hash), 0);
    }

    #[tokio::test]
    async fn test_shared_dir_outlives_first_close() {
        let work = tempfile::tempdir().unwrap();
        let dir = work.path().join("function-shared");
        std::fs::create_dir_all(&dir).unwrap();
        let dirs = Arc::new(DirRegistry::default());
        let hash = FunctionHash::of(ECHO);
        let endpoint = "http://127.0.0.1:9/";

        let first =
            FunctionInstance::from_parts_in(&dirs, hash.clone(), sleeper(), endpoint, dir.clone());
        let second =
            FunctionInstance::from_parts_in(&dirs, hash.clone(), sleeper(), endpoint, dir.clone());

        first.close().await;
        first.close().await;
        assert!(dir.exists());
        assert_eq!(dirs.users(&hash), 1);

        second.close().await;
        assert!(!dir.exists());
        assert_eq!(dirs.users(&hash), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_lease_and_keeps_dir() {
        let work = tempfile::tempdir().unwrap();
        let dir = work.path().join("function-dropped");
        std::fs::create_dir_all(&dir).unwrap();
        let dirs = Arc::new(DirRegistry::default());
        let hash = FunctionHash::of(ECHO);

        let instance = FunctionInstance::from_parts_in(
            &dirs,
            hash.clone(),
            sleeper(),
            "http://127.0.0.1:9/",
            dir.clone(),
        );
        assert_eq!(dirs.users(&hash), 1);
        drop(instance);

        assert_eq!(dirs.users(&hash), 0);
        assert!(dir.exists());
    }
}
