//! FunctionRunner - creates instances that share a config, a port allocator
//! and the function directory registry.

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::hash::FunctionHash;
use crate::instance::FunctionInstance;
use crate::lease::DirRegistry;
use crate::template::RuntimeTemplate;
use fnrun_process::{LogSink, PortAllocator};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Factory for [`FunctionInstance`]s.
///
/// Instances created by the same runner never receive the same port, and a
/// directory shared by identical code is only deleted when the last of them
/// closes. Cloning is cheap and clones share both.
#[derive(Debug, Clone)]
pub struct FunctionRunner {
    config: Arc<RunnerConfig>,
    runtime: Arc<RuntimeTemplate>,
    ports: Arc<PortAllocator>,
    dirs: Arc<DirRegistry>,
}

impl FunctionRunner {
    /// Create a runner using the bundled Deno runtime.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        Self::with_runtime(config, RuntimeTemplate::deno())
    }

    /// Create a runner with a custom runtime template.
    pub fn with_runtime(config: RunnerConfig, runtime: RuntimeTemplate) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            work_dir = %config.work_dir.display(),
            engine = %config.engine_path.display(),
            port_base = config.port_base,
            "Creating function runner"
        );
        Ok(Self {
            ports: Arc::new(PortAllocator::new(config.port_base)),
            dirs: Arc::new(DirRegistry::default()),
            config: Arc::new(config),
            runtime: Arc::new(runtime),
        })
    }

    /// Configuration every instance is created with.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of ports handed out so far.
    pub fn ports_handed_out(&self) -> usize {
        self.ports.handed_out()
    }

    /// Number of live instances using the directory for `hash`.
    pub fn dir_users(&self, hash: &FunctionHash) -> usize {
        self.dirs.users(hash)
    }

    /// Boot a new instance of `code`. See [`FunctionInstance::create`].
    pub async fn start<I: Serialize + ?Sized>(
        &self,
        sink: Arc<dyn LogSink>,
        init_data: &I,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<FunctionInstance> {
        FunctionInstance::create(
            &self.config,
            &self.runtime,
            &self.ports,
            &self.dirs,
            sink,
            init_data,
            code,
            cancel,
        )
        .await
    }
}
