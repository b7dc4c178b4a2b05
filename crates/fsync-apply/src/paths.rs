// paths.rs — Path confinement.
//
// Every path in an operation stream is interpreted relative to the target
// root. Anything absolute, anything with `..`, and anything with a drive
// or root prefix is rejected before it touches the filesystem.

use std::path::{Component, Path, PathBuf};

use crate::error::ApplyError;

/// Join a stream-supplied relative path onto the target root, refusing
/// every escape vector.
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf, ApplyError> {
    let rel_path = Path::new(rel);
    if rel.is_empty() {
        return Err(ApplyError::PathEscapes {
            path: rel.to_string(),
        });
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApplyError::PathEscapes {
                    path: rel.to_string(),
                });
            }
        }
    }
    // Backslashes never appear in legitimate stream paths; a Windows-style
    // traversal hidden in one component is rejected wholesale.
    if rel.contains('\\') {
        return Err(ApplyError::PathEscapes {
            path: rel.to_string(),
        });
    }
    Ok(root.join(rel_path))
}
