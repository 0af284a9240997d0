//! Content-addressed function directories.
//!
//! Layout under the work dir:
//!
//! ```text
//! <work_dir>/.cache/function-<hash>/
//!     function_server.ts   (static runtime support)
//!     function.js          (rendered wrapper around the user source)
//! ```

use crate::config::CACHE_DIR;
use crate::error::{CoreError, Result};
use crate::hash::FunctionHash;
use crate::template::{RuntimeTemplate, FUNCTION_FILE};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Directory a function with `hash` is materialized into.
pub fn function_dir(work_dir: &Path, hash: &FunctionHash) -> PathBuf {
    work_dir.join(CACHE_DIR).join(format!("function-{hash}"))
}

/// Write the runtime files and the rendered wrapper for `code` into the
/// function directory for `hash`, creating it if needed.
///
/// An existing directory for the same hash is reused and its files are
/// overwritten.
pub async fn materialize(
    work_dir: &Path,
    hash: &FunctionHash,
    runtime: &RuntimeTemplate,
    code: &str,
    init_json: &str,
) -> Result<PathBuf> {
    let dir = function_dir(work_dir, hash);
    tracing::debug!(function_hash = %hash, path = %dir.display(), "Materializing function");

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(&dir)
        .await
        .map_err(|source| CoreError::Setup {
            op: "create function dir",
            source,
        })?;

    for (name, contents) in runtime.files() {
        write_private(&dir.join(name), contents.as_bytes())
            .await
            .map_err(|source| CoreError::Setup {
                op: "copy runtime file",
                source,
            })?;
    }

    let wrapped = runtime.render(code, init_json)?;
    write_private(&dir.join(FUNCTION_FILE), wrapped.as_bytes())
        .await
        .map_err(|source| CoreError::Setup {
            op: "write function file",
            source,
        })?;

    tracing::trace!(
        function_hash = %hash,
        files = runtime.files().len() + 1,
        "Function materialized"
    );
    Ok(dir)
}

async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await
}
