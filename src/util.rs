//! Small helpers shared across modules.
//!
//! Remote paths are always POSIX (`/`-separated) regardless of the host the
//! gateway runs on, so these helpers work on `&str` instead of `std::path`.

/// Collapse repeated slashes and drop a trailing slash (except for `/` itself).
///
/// - `"/tmp//a/"` → `"/tmp/a"`
/// - `"/"` → `"/"`
/// - `"a/b/"` → `"a/b"`
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let joined = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/");
    match (absolute, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, _) => joined,
    }
}

/// Parent directory of `path`, or `None` when there is nothing to create.
///
/// - `"/tmp/new/file.txt"` → `Some("/tmp/new")`
/// - `"/file.txt"` → `None` (the root always exists)
/// - `"file.txt"` → `None` (relative to the login directory)
pub fn parent(path: &str) -> Option<String> {
    let path = normalize(path);
    let idx = path.rfind('/')?;
    if idx == 0 {
        return None;
    }
    Some(path[..idx].to_string())
}

/// Every prefix directory of `path`, shortest first, including `path` itself.
///
/// - `"/a/b/c"` → `["/a", "/a/b", "/a/b/c"]`
/// - `"a/b"` → `["a", "a/b"]`
/// - `"/"` → `[]`
pub fn ancestors(path: &str) -> Vec<String> {
    let path = normalize(path);
    let absolute = path.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);
        out.push(current.clone());
    }
    out
}

/// Last path component, used as the download filename.
pub fn basename(path: &str) -> String {
    let path = normalize(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Round seconds to two decimals (for `time_elapsed`).
pub fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}
