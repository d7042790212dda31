//! Path normalization for metadata keys.
//!
//! Proxies hand us `\`-delimited (Dokan) or `/`-delimited (FUSE) paths. Both
//! are reduced to one canonical key: `/`-separated, a single leading `/`, no
//! trailing separator, no empty or `.` segments. The root is `/`.

use crate::error::{FsError, Result};

/// Metadata key of the root directory.
pub const ROOT: &str = "/";

/// Store-wide path case policy, fixed when the store is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathPolicy {
    pub case_sensitive: bool,
}

impl PathPolicy {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive }
    }

    /// Normalize `raw` into the key it is stored under.
    pub fn key(&self, raw: &str) -> Result<String> {
        let normalized = normalize(raw)?;
        Ok(self.fold(&normalized))
    }

    /// Apply the case policy to an already normalized path or name.
    pub fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Normalize a path without applying any case policy.
pub fn normalize(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(FsError::InvalidPath(format!("{raw:?} contains NUL")));
    }

    let mut out = String::with_capacity(raw.len() + 1);
    for segment in raw.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(FsError::InvalidPath(format!(
                    "{raw:?} contains a parent reference"
                )))
            }
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

pub fn is_root(key: &str) -> bool {
    key == ROOT
}

/// Parent key, `None` for the root.
pub fn parent(key: &str) -> Option<&str> {
    if is_root(key) {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&key[..idx]),
        None => None,
    }
}

/// Final segment of a normalized path; empty for the root.
pub fn file_name(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[idx + 1..],
        None => key,
    }
}

/// Join a normalized parent and a single segment.
pub fn join(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Key prefix shared by everything below `key`.
pub fn descendant_prefix(key: &str) -> String {
    if is_root(key) {
        ROOT.to_string()
    } else {
        format!("{key}/")
    }
}

/// True if `candidate` is strictly below `ancestor`.
pub fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    candidate != ancestor && candidate.starts_with(&descendant_prefix(ancestor))
}

/// True if `candidate` is exactly one segment below the directory whose
/// descendant prefix is `prefix`.
pub fn is_direct_child(prefix: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(prefix) {
        Some(rest) => !rest.is_empty() && !rest.contains('/'),
        None => false,
    }
}

/// Rewrite the `from` prefix of `key` to `to`. `key` must be `from` itself
/// or one of its descendants.
pub fn rebase(key: &str, from: &str, to: &str) -> String {
    if key == from {
        return to.to_string();
    }
    let rest = &key[descendant_prefix(from).len()..];
    join(to, rest)
}
