//! Mount path helpers
//!
//! Every backend is mounted at `<base path>/<name>/`, where the base path is
//! the path component of the configured public base URL.

use url::Url;

/// Base used to resolve relative base URLs such as `/mcp`
const RELATIVE_BASE: &str = "http://localhost";

/// Errors that can occur while deriving a mount path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Extract the path component of `base_url`.
///
/// An empty string yields an empty base path; a value without a scheme is
/// treated as a path.
pub fn base_path(base_url: &str) -> Result<String, RoutingError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(trimmed))
            .map_err(|e| invalid(trimmed, e))?,
        Err(e) => return Err(invalid(trimmed, e)),
    };

    if parsed.cannot_be_a_base() {
        return Err(RoutingError::InvalidBaseUrl {
            url: trimmed.to_string(),
            reason: "URL has no path component".to_string(),
        });
    }
    Ok(parsed.path().to_string())
}

fn invalid(url: &str, e: url::ParseError) -> RoutingError {
    RoutingError::InvalidBaseUrl {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Mount path for backend `name` under `base`: cleaned and slash-terminated
pub fn mount_path(base: &str, name: &str) -> String {
    let segments = clean_segments(base.split('/').chain(name.split('/')));
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

/// Canonical form of a request path.
///
/// Empty and `.` segments are dropped and `..` removes its parent. A
/// trailing slash survives, so `/mcp/a/../b/` becomes `/mcp/b/`.
pub fn clean_path(path: &str) -> String {
    let segments = clean_segments(path.split('/'));
    if segments.is_empty() {
        return "/".to_string();
    }

    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

fn clean_segments<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut segments = Vec::new();
    for segment in parts {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments
}
