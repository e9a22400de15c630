//! Bootstrap helpers for fca-session.
//!
//! Env vars can be persisted in `~/.fca/.env` so credentials and the
//! login API key need not live in the JSON settings file.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use crate::settings::fca_dir;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "fca_session=info";

/// Path to the fca-specific `.env` file: `~/.fca/.env`.
pub fn fca_env_path() -> PathBuf {
    fca_dir().join(".env")
}

/// Load env vars from `~/.fca/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority over `~/.fca/.env`. dotenvy never overwrites existing
/// env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.fca/.env`
pub fn load_fca_env() {
    let path = fca_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        eprintln!("Warning: failed to load {}: {}", path.display(), e);
    }
}

/// Write vars to `~/.fca/.env`, keeping entries not named in `vars`.
///
/// Values are double-quoted so that `#` and other shell-special characters
/// survive dotenvy parsing.
pub fn save_fca_env(vars: &[(&str, &str)]) -> std::io::Result<()> {
    let path = fca_env_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let existing: Vec<(String, String)> = match dotenvy::from_path_iter(&path) {
        Ok(iter) => iter.filter_map(|r| r.ok()).collect(),
        Err(_) => Vec::new(),
    };
    std::fs::write(&path, render_env(&merge_env(existing, vars)))
}

fn merge_env(existing: Vec<(String, String)>, vars: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = existing
        .into_iter()
        .filter(|(key, _)| !vars.iter().any(|(k, _)| k == key))
        .collect();
    merged.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    merged
}

fn render_env(vars: &[(String, String)]) -> String {
    let mut content = String::new();
    for (key, value) in vars {
        // Escape backslashes and double quotes so a value cannot open a new line entry
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        content.push_str(&format!("{}=\"{}\"\n", key, escaped));
    }
    content
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` selects the filter (default [`DEFAULT_LOG_FILTER`]);
/// `FCA_LOG_FORMAT=json` switches to JSON lines. Logs go to stderr so
/// command output on stdout stays clean.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("FCA_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("Warning: tracing already initialised: {}", e);
    }
}
