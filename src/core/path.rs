//! Path helpers: normalization, bounding and temporary names

use crate::error::{Result, VfsError};

/// Collapse `.`, `..` and repeated separators in a `/`-separated path
///
/// Relative paths are anchored at `/`. `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    out.push_str(&parts.join("/"));
    out
}

/// Reject paths longer than `max` bytes
pub fn bounded(path: String, max: usize) -> Result<String> {
    if path.len() > max {
        return Err(VfsError::TooBig {
            len: path.len(),
            max,
        });
    }
    Ok(path)
}

/// Name for an anonymous temporary file
pub fn temp_name(prefix: &str, entropy: &[u8]) -> String {
    let mut name = format!("/{}-tmp-", prefix);
    for byte in entropy {
        name.push_str(&format!("{:02x}", byte));
    }
    name
}
