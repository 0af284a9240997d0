//! Runner configuration types.

use crate::error::CoreError;
use fnrun_process::{ReadinessOptions, DEFAULT_POLL_INTERVAL, DEFAULT_PORT_BASE};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the cache directory created under the work dir.
pub const CACHE_DIR: &str = ".cache";

/// Configuration shared by every instance a runner creates.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root for function directories and the engine cache.
    pub work_dir: PathBuf,
    /// Path to the execution engine binary (default: `deno`).
    pub engine_path: PathBuf,
    /// First port of the allocation window (default: 8000).
    pub port_base: u16,
    /// Maximum time to wait for a new instance to accept connections
    /// (default: 30s). `None` waits until cancelled or the child exits.
    pub boot_timeout: Option<Duration>,
    /// Interval between readiness probes (default: 100ms).
    pub poll_interval: Duration,
    /// Optional hard cap on readiness probes.
    pub max_boot_polls: Option<u32>,
    /// Bound on waiting for the child and its log drains after a kill
    /// (default: 5s).
    pub kill_timeout: Duration,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            engine_path: PathBuf::from("deno"),
            port_base: DEFAULT_PORT_BASE,
            boot_timeout: Some(Duration::from_secs(30)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_boot_polls: None,
            kill_timeout: Duration::from_secs(5),
            env: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Create a new config builder.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(CoreError::Config("work_dir is required".into()));
        }
        if self.engine_path.as_os_str().is_empty() {
            return Err(CoreError::Config("engine_path is required".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::Config("poll_interval must be > 0".into()));
        }
        if self.max_boot_polls == Some(0) {
            return Err(CoreError::Config("max_boot_polls must be > 0".into()));
        }
        if let Some((key, _)) = self.env.iter().find(|(k, _)| k.is_empty() || k.contains('=')) {
            return Err(CoreError::Config(format!("invalid env var name {key:?}")));
        }
        Ok(())
    }

    /// `<work_dir>/.cache`
    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join(CACHE_DIR)
    }

    /// Engine module cache, `<work_dir>/.cache/deno`.
    pub fn engine_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("deno")
    }

    /// Readiness bounds derived from this config.
    pub fn readiness_options(&self) -> ReadinessOptions {
        ReadinessOptions {
            poll_interval: self.poll_interval,
            timeout: self.boot_timeout,
            max_attempts: self.max_boot_polls,
        }
    }

    /// Engine path with bare program names looked up on this process's
    /// `PATH`. The child runs with a cleared environment, so the lookup has
    /// to happen here.
    pub fn resolved_engine_path(&self) -> PathBuf {
        resolve_program(&self.engine_path)
    }
}

fn resolve_program(program: &Path) -> PathBuf {
    if program.components().count() != 1 || program.is_absolute() {
        return program.to_path_buf();
    }
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(program))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| program.to_path_buf())
}

/// Builder for RunnerConfig.
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// Set the work directory.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Set the engine binary path.
    pub fn engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.engine_path = path.into();
        self
    }

    /// Set the first port of the allocation window.
    pub fn port_base(mut self, port: u16) -> Self {
        self.config.port_base = port;
        self
    }

    /// Set the boot deadline.
    pub fn boot_timeout(mut self, timeout: Duration) -> Self {
        self.config.boot_timeout = Some(timeout);
        self
    }

    /// Wait for readiness without a deadline.
    pub fn no_boot_timeout(mut self) -> Self {
        self.config.boot_timeout = None;
        self
    }

    /// Set the readiness probe interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Cap the number of readiness probes.
    pub fn max_boot_polls(mut self, polls: u32) -> Self {
        self.config.max_boot_polls = Some(polls);
        self
    }

    /// Set the post-kill wait bound.
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.config.kill_timeout = timeout;
        self
    }

    /// Add an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<RunnerConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.engine_path, PathBuf::from("deno"));
        assert_eq!(config.port_base, 8000);
        assert_eq!(config.boot_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.max_boot_polls.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_layout() {
        let config = RunnerConfig::builder()
            .work_dir("/srv/fnrun")
            .build()
            .unwrap();
        assert_eq!(config.cache_dir(), PathBuf::from("/srv/fnrun/.cache"));
        assert_eq!(
            config.engine_cache_dir(),
            PathBuf::from("/srv/fnrun/.cache/deno")
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(RunnerConfig::builder().engine_path("").build().is_err());
        assert!(RunnerConfig::builder().work_dir("").build().is_err());
        assert!(RunnerConfig::builder()
            .poll_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(RunnerConfig::builder().max_boot_polls(0).build().is_err());
        assert!(RunnerConfig::builder().env("A=B", "c").build().is_err());
    }

    #[test]
    fn test_readiness_options() {
        let config = RunnerConfig::builder()
            .no_boot_timeout()
            .poll_interval(Duration::from_millis(20))
            .max_boot_polls(50)
            .build()
            .unwrap();
        let options = config.readiness_options();
        assert_eq!(options.timeout, None);
        assert_eq!(options.poll_interval, Duration::from_millis(20));
        assert_eq!(options.max_attempts, Some(50));
    }

    #[test]
    fn test_resolve_program() {
        assert_eq!(
            resolve_program(Path::new("/opt/deno/bin/deno")),
            PathBuf::from("/opt/deno/bin/deno")
        );
        assert_eq!(
            resolve_program(Path::new("./deno")),
            PathBuf::from("./deno")
        );
        let sh = resolve_program(Path::new("sh"));
        assert!(sh.is_absolute(), "sh should resolve via PATH: {sh:?}");
        assert_eq!(
            resolve_program(Path::new("fnrun-no-such-engine")),
            PathBuf::from("fnrun-no-such-engine")
        );
    }
}
