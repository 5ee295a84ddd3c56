//! Tilde (`~`) expansion for configured paths.

use std::path::{Path, PathBuf};

/// Expand a leading `~` in place.
pub fn expand_tilde(path: &mut PathBuf) {
    let expanded = expand_tilde_path(path);
    *path = expanded;
}

/// Expand a leading `~` to the home directory. Paths without one are returned as is.
pub fn expand_tilde_path(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            let rest = path.strip_prefix("~").unwrap_or(Path::new(""));
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let mut path = PathBuf::from("~/notes/10-19 Work");
        expand_tilde(&mut path);

        assert!(path.starts_with(&home));
        assert!(path.ends_with("notes/10-19 Work"));
    }

    #[test]
    fn test_expand_tilde_no_tilde() {
        let path = PathBuf::from("/srv/notes");
        assert_eq!(expand_tilde_path(&path), path);

        // "~user" is not the current user's home.
        let other = PathBuf::from("~alice/notes");
        assert_eq!(expand_tilde_path(&other), other);
    }
}
