//! Path arithmetic for namespace entries.
//!
//! Full paths are absolute, `/`-separated and carry no trailing slash except
//! for the root itself.

use common::{Error, Result};

/// Name of the namespace root inside lookup paths.
pub const ROOT_NAME: &str = "_dr_";

/// Separator substituted for `/` in document ids.
const LOOKUP_SEPARATOR: char = '\u{1c}';

pub const ROOT: &str = "/";

/// Collapse repeated separators, add the leading `/` and drop any trailing one.
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Like [`normalize`], but rejects `.` and `..` segments.
pub fn validate(path: &str) -> Result<String> {
    if path.split('/').any(|s| s == "." || s == "..") {
        return Err(Error::invalid_input(format!(
            "relative segments are not allowed in '{path}'"
        )));
    }
    Ok(normalize(path))
}

/// Parent of a normalized full path; `None` for the root.
pub fn parent(full_path: &str) -> Option<String> {
    if full_path == ROOT {
        return None;
    }
    match full_path.rfind('/') {
        Some(0) => Some(ROOT.to_string()),
        Some(idx) => Some(full_path[..idx].to_string()),
        None => Some(ROOT.to_string()),
    }
}

/// Last segment of a normalized full path; empty for the root.
pub fn name(full_path: &str) -> &str {
    full_path.rsplit('/').next().unwrap_or_default()
}

/// Join a containing directory and a name into a full path.
pub fn join(path: &str, name: &str) -> String {
    if path.is_empty() && name.is_empty() {
        ROOT.to_string()
    } else if path == ROOT || path.is_empty() {
        format!("/{name}")
    } else {
        format!("{path}/{name}")
    }
}

/// Document id for a normalized full path.
pub fn lookup_path(full_path: &str) -> String {
    let mut id = String::with_capacity(ROOT_NAME.len() + full_path.len());
    id.push_str(ROOT_NAME);
    id.extend(
        full_path
            .chars()
            .map(|c| if c == '/' { LOOKUP_SEPARATOR } else { c }),
    );
    id
}

/// The directory itself followed by each of its ancestors, ending at the root.
pub fn ancestors(dir_path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = Some(normalize(dir_path));
    while let Some(dir) = current {
        current = parent(&dir);
        out.push(dir);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a/b/"), "/a/b");
        assert_eq!(normalize("//a///b"), "/a/b");
    }

    #[test]
    fn test_validate_rejects_relative_segments() {
        assert!(validate("/a/../b").is_err());
        assert!(validate("./a").is_err());
        assert_eq!(validate("/a/b/").unwrap(), "/a/b");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a").as_deref(), Some("/"));
        assert_eq!(parent("/a/b/c").as_deref(), Some("/a/b"));
        assert_eq!(name("/a/b/c"), "c");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", ""), "/");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/b", "c"), "/a/b/c");
    }

    #[test]
    fn test_lookup_path() {
        assert_eq!(lookup_path("/"), "_dr_\u{1c}");
        assert_eq!(lookup_path("/a/b"), "_dr_\u{1c}a\u{1c}b");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b"), vec!["/a/b", "/a", "/"]);
        assert_eq!(ancestors("/"), vec!["/"]);
    }
}
