//! The Docker daemon configuration document (`daemon.json`).
//!
//! The document is held as a plain `serde_json::Value` so keys this tool does
//! not know about survive a round trip untouched, in their original order.
//! File I/O happens only in [`load`] and [`commit`]; everything in [`edit`]
//! is a pure transform.

pub mod edit;
pub mod network;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::atomic_write::write_atomic;
use crate::error::Error;

pub use edit::{Edit, apply_all};

/// Load the document, or an empty object when the file does not exist.
///
/// A missing or blank file is a fresh install, not an error. Anything that is
/// not a JSON object is refused so it never gets overwritten.
pub fn load(path: &Path) -> Result<Value, Error> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "daemon_json:absent, starting empty");
            return Ok(empty());
        }
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };

    parse(&content).map_err(|reason| Error::ConfigRead {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse(content: &str) -> Result<Value, String> {
    if content.trim().is_empty() {
        return Ok(empty());
    }
    let value: Value = serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;
    if !value.is_object() {
        return Err("root is not a JSON object".to_string());
    }
    Ok(value)
}

pub fn empty() -> Value {
    Value::Object(Map::new())
}

/// Serialize the document the way it is written to disk.
pub fn render(doc: &Value) -> String {
    // Serializing a Value cannot fail: all map keys are strings.
    let mut out = serde_json::to_string_pretty(doc).unwrap_or_else(|_| "{}".to_string());
    out.push('\n');
    out
}

/// Persist the document atomically. Under `dry_run` nothing is written.
pub fn commit(doc: &Value, path: &Path, dry_run: bool) -> Result<(), Error> {
    if dry_run {
        debug!(path = %path.display(), "daemon_json:dry-run, commit skipped");
        return Ok(());
    }
    write_atomic(path, render(doc).as_bytes())?;
    info!(path = %path.display(), "daemon_json:committed");
    Ok(())
}
