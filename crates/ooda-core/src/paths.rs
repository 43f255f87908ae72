use crate::error::{OodaError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const OODA_DIR: &str = ".ooda";
pub const CONFIG_FILE: &str = ".ooda/config.yaml";
pub const DB_FILE: &str = ".ooda/ooda.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn ooda_dir(root: &Path) -> PathBuf {
    root.join(OODA_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

// ---------------------------------------------------------------------------
// Agent name validation
// ---------------------------------------------------------------------------

static AGENT_RE: OnceLock<Regex> = OnceLock::new();

fn agent_re() -> &'static Regex {
    AGENT_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_\-]*$").expect("static regex"))
}

/// Agent names appear in store keys and content-addressed action ids, so
/// they must not contain separators (`:`) or NUL bytes.
pub fn validate_agent(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !agent_re().is_match(name) {
        return Err(OodaError::InvalidAgentName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
