//! Database targets and their canonical identity.
//!
//! File targets are canonicalized so that `./auth.db`, `auth.db`, and the
//! absolute path all name the same pool. In-memory targets carry a label:
//! connections opened against the same label share one database through
//! SQLite's shared-cache memory URI, and different labels never see each
//! other's data.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use warden_settings::MEMORY_PATH;

/// Label used when configuration names the bare `":memory:"` path.
pub const DEFAULT_MEMORY_LABEL: &str = "default";

/// The database a connection is opened against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// A database file, stored as a canonical absolute path.
    File(PathBuf),
    /// A named in-memory database.
    Memory(String),
}

impl Target {
    /// A file target. The path is canonicalized even if the file does not
    /// exist yet.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(canonicalize_path(path.as_ref()))
    }

    /// A named in-memory target. Pools requested with the same label share
    /// one database.
    pub fn memory(label: impl Into<String>) -> Self {
        Self::Memory(label.into())
    }

    /// An in-memory target with a fresh unique label.
    pub fn anonymous_memory() -> Self {
        Self::Memory(format!("anon-{}", uuid::Uuid::now_v7()))
    }

    /// Interpret a configured path string: `":memory:"` maps to the default
    /// memory label, anything else is a file.
    pub fn from_config_path(path: &str) -> Self {
        if path == MEMORY_PATH {
            Self::memory(DEFAULT_MEMORY_LABEL)
        } else {
            Self::file(path)
        }
    }

    /// Whether this target lives in memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// The shared-cache URI opened for a memory target.
    ///
    /// Table-lock conflicts between these connections block through
    /// `sqlite3_unlock_notify` rather than the busy timeout.
    pub(crate) fn memory_uri(label: &str) -> String {
        format!("file:warden-{}?mode=memory&cache=shared", percent_encode(label))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory(label) => write!(f, "memory:{label}"),
        }
    }
}

/// Resolve `path` to an absolute, symlink-free form.
///
/// Existing paths go through `canonicalize`. For a file that does not exist
/// yet, the parent directory is canonicalized and the file name re-joined;
/// if that fails too, the lexically normalized absolute path is used.
fn canonicalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }

    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let normalized = normalize_lexically(&absolute);
    match (normalized.parent(), normalized.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map_or_else(|_| normalized.clone(), |p| p.join(name)),
        _ => normalized,
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn percent_encode(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for byte in label.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
