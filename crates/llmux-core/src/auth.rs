use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;

use llmux_common::{ProxyError, ProxyResult};

/// Client-facing bearer auth against the configured `api-keys` allowlist.
/// The allowlist is swapped atomically on config reload; an empty list
/// disables client auth.
#[derive(Debug)]
pub struct ClientAuth {
    keys: ArcSwap<HashSet<String>>,
}

impl ClientAuth {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: ArcSwap::from_pointee(keys.into_iter().collect()),
        }
    }

    pub fn replace(&self, keys: impl IntoIterator<Item = String>) {
        self.keys.store(Arc::new(keys.into_iter().collect()));
    }

    /// `Authorization: Bearer <key>` (or `x-api-key`) must match the
    /// allowlist. Absence is a 401.
    pub fn authenticate(&self, headers: &[(String, String)]) -> ProxyResult<()> {
        let keys = self.keys.load();
        if keys.is_empty() {
            return Ok(());
        }
        let presented = extract_api_key(headers)
            .ok_or_else(|| ProxyError::auth("missing api key"))?;
        if keys.contains(&presented) {
            Ok(())
        } else {
            Err(ProxyError::auth("invalid api key").with_status(403))
        }
    }
}

fn extract_api_key(headers: &[(String, String)]) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }
    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

/// Optional pin header forcing a specific credential id.
pub fn pinned_auth_id(headers: &[(String, String)]) -> Option<String> {
    header_value(headers, "x-pinned-auth-id").filter(|value| !value.is_empty())
}
