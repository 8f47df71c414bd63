use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use llmux_common::{ProxyError, ProxyResult};

/// Cache of shared wreq clients keyed by proxy. Cached clients carry **no**
/// timeout; per-call deadlines are applied with `tokio::time::timeout`
/// wrappers so one request's deadline never leaks into another.
static CLIENT_CACHE: OnceLock<Mutex<HashMap<Option<String>, wreq::Client>>> = OnceLock::new();

pub fn client_for_proxy(proxy: Option<&str>) -> ProxyResult<wreq::Client> {
    let key = normalize_proxy(proxy);
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }
    let client = build_client(key.as_deref())?;
    guard.insert(key, client.clone());
    Ok(client)
}

fn build_client(proxy: Option<&str>) -> ProxyResult<wreq::Client> {
    let mut builder = wreq::Client::builder();
    if let Some(proxy_url) = proxy {
        builder = builder.proxy(
            wreq::Proxy::all(proxy_url)
                .map_err(|err| ProxyError::config(format!("invalid proxy url: {err}")))?,
        );
    }
    builder
        .build()
        .map_err(|err| ProxyError::internal(format!("http client build failed: {err}")))
}

fn normalize_proxy(value: Option<&str>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

/// NO_PROXY / no_proxy host bypass. Entries are comma-separated; a leading
/// dot (or bare suffix) matches subdomains; `*` matches everything.
pub fn no_proxy_matches(host: &str) -> bool {
    let raw = std::env::var("NO_PROXY")
        .or_else(|_| std::env::var("no_proxy"))
        .unwrap_or_default();
    host_in_no_proxy(host, &raw)
}

pub(crate) fn host_in_no_proxy(host: &str, no_proxy: &str) -> bool {
    if no_proxy.trim().is_empty() {
        return false;
    }
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    for entry in no_proxy.split(',') {
        let entry = entry.trim().trim_end_matches('.').to_ascii_lowercase();
        if entry.is_empty() {
            continue;
        }
        if entry == "*" {
            return true;
        }
        let suffix = entry.trim_start_matches('.');
        if host == suffix || host.ends_with(&format!(".{suffix}")) {
            return true;
        }
    }
    false
}

pub fn host_of(url: &str) -> &str {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let rest = rest.split(['/', '?']).next().unwrap_or(rest);
    // Strip userinfo and port.
    let rest = rest.rsplit_once('@').map(|(_, host)| host).unwrap_or(rest);
    rest.split(':').next().unwrap_or(rest)
}
