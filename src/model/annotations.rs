//! Annotation keys and parsing for opted-in Services

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Set to `"true"` on a Service to let the controller manage its Endpoints
pub const ENABLE_ANNOTATION: &str = "endpoint-controller/enable";

/// Comma-separated list of target addresses backing the Service
pub const TARGETS_ANNOTATION: &str = "endpoint-controller/targets";

pub const ENABLE_VALUE: &str = "true";

/// Whether the annotation block opts the object into management
pub fn is_enabled(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(ENABLE_ANNOTATION))
        .map(|v| v.trim() == ENABLE_VALUE)
        .unwrap_or(false)
}

/// Parse the raw targets annotation into an ordered address list.
///
/// Entries are trimmed, empty entries are dropped and duplicates keep their
/// first position. A missing annotation, or one that yields no address, is a
/// configuration error.
pub fn parse_targets(service: &str, raw: Option<&str>) -> Result<Vec<String>> {
    let raw = raw.ok_or_else(|| {
        Error::ConfigError(format!(
            "{}: annotation {} is missing",
            service, TARGETS_ANNOTATION
        ))
    })?;

    let mut targets: Vec<String> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if !targets.iter().any(|t| t == entry) {
            targets.push(entry.to_string());
        }
    }

    if targets.is_empty() {
        return Err(Error::ConfigError(format!(
            "{}: annotation {} is empty",
            service, TARGETS_ANNOTATION
        )));
    }

    Ok(targets)
}
