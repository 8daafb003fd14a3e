// Destination resolution: configured address, then origin, then mock

use crate::config::DEFAULT_DESTINATION_PATH;
use crate::error::{ConnectionError, ConnectionResult};
use tracing::{debug, warn};
use url::Url;

/// Outcome of destination resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Real(String),
    Mock,
}

/// Normalize a user supplied address into a `ws`/`wss` URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, and a bare `host:port[/path]`
/// is treated as `ws://host:port[/path]`.
pub fn normalize_address(raw: &str) -> ConnectionResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConnectionError::invalid_address("address is empty"));
    }

    let candidate = match trimmed.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => format!("ws://{}", rest),
            "https" | "wss" => format!("wss://{}", rest),
            other => {
                return Err(ConnectionError::invalid_address(format!(
                    "unsupported scheme '{}' in {}",
                    other, trimmed
                )))
            }
        },
        None => format!("ws://{}", trimmed.trim_start_matches('/')),
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ConnectionError::invalid_address(format!("{}: {}", trimmed, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConnectionError::invalid_address(format!("{} has no host", trimmed)));
    }
    Ok(url)
}

fn normalize_path(path: Option<&str>) -> String {
    let path = path.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(DEFAULT_DESTINATION_PATH);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Pick where to connect.
///
/// An explicit address wins (its own path is kept, otherwise
/// `destination_path` is appended); failing that the address is inferred
/// from `origin`; otherwise, or without network support, the result is
/// [`Destination::Mock`].
pub fn resolve_destination(
    address: Option<&str>,
    origin: Option<&str>,
    destination_path: Option<&str>,
    network_available: bool,
) -> Destination {
    if !network_available {
        debug!("no network transport available, using mock");
        return Destination::Mock;
    }

    let path = normalize_path(destination_path);

    if let Some(address) = address.filter(|a| !a.trim().is_empty()) {
        match normalize_address(address) {
            Ok(mut url) => {
                if url.path().is_empty() || url.path() == "/" {
                    url.set_path(&path);
                }
                return Destination::Real(url.to_string());
            }
            Err(e) => warn!(error = %e, "ignoring configured address"),
        }
    }

    if let Some(origin) = origin.filter(|o| !o.trim().is_empty()) {
        match normalize_address(origin) {
            Ok(mut url) => {
                url.set_path(&path);
                url.set_query(None);
                url.set_fragment(None);
                return Destination::Real(url.to_string());
            }
            Err(e) => warn!(error = %e, "cannot infer address from origin"),
        }
    }

    Destination::Mock
}
