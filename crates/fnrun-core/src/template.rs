//! Runtime-support files and the function wrapper template.

use crate::error::{CoreError, Result};

/// File the rendered wrapper is written to.
pub const FUNCTION_FILE: &str = "function.js";

/// Entry point the engine is started on.
pub const SERVER_FILE: &str = "function_server.ts";

const CODE_PLACEHOLDER: &str = "CODE";
const INIT_DATA_PLACEHOLDER: &str = "INIT_DATA";

/// Static files copied into every function directory, plus the wrapper
/// template rendered around the user's source.
#[derive(Debug, Clone)]
pub struct RuntimeTemplate {
    files: Vec<(String, String)>,
    wrapper: String,
}

impl Default for RuntimeTemplate {
    fn default() -> Self {
        Self::deno()
    }
}

impl RuntimeTemplate {
    /// The bundled Deno runtime: `function_server.ts` serving the wrapper.
    pub fn deno() -> Self {
        Self {
            files: vec![(
                SERVER_FILE.to_string(),
                include_str!("../runtime/function_server.ts").to_string(),
            )],
            wrapper: include_str!("../runtime/function_template.js").to_string(),
        }
    }

    /// A custom runtime. `wrapper` must contain `{{CODE}}` and `{{INIT_DATA}}`.
    pub fn new(files: Vec<(String, String)>, wrapper: impl Into<String>) -> Self {
        Self {
            files,
            wrapper: wrapper.into(),
        }
    }

    /// Static support files as `(file name, contents)`.
    pub fn files(&self) -> &[(String, String)] {
        &self.files
    }

    /// Render the wrapper around `code`, binding `init_json` as the
    /// argument to `init`.
    pub fn render(&self, code: &str, init_json: &str) -> Result<String> {
        render_wrapper(&self.wrapper, code, init_json)
    }
}

/// Substitute `{{CODE}}` and `{{INIT_DATA}}` in one pass.
///
/// Substituted text is never rescanned, so source that happens to contain
/// placeholder syntax is embedded verbatim.
fn render_wrapper(template: &str, code: &str, init_json: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len() + code.len() + init_json.len());
    let mut rest = template;
    let mut saw_code = false;
    let mut saw_init = false;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| CoreError::Template("unterminated placeholder".into()))?;
        match after[..close].trim() {
            CODE_PLACEHOLDER => {
                out.push_str(code);
                saw_code = true;
            }
            INIT_DATA_PLACEHOLDER => {
                out.push_str(init_json);
                saw_init = true;
            }
            other => {
                return Err(CoreError::Template(format!("unknown placeholder {other:?}")));
            }
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);

    if !saw_code {
        return Err(CoreError::Template("missing CODE placeholder".into()));
    }
    if !saw_init {
        return Err(CoreError::Template("missing INIT_DATA placeholder".into()));
    }
    Ok(out)
}
