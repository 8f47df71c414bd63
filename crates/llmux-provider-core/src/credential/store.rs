use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use llmux_common::{ProxyError, ProxyResult};

use super::{Credential, CredentialFile, CredentialStorage};

/// A static-key credential synthesized from configuration rather than a
/// file on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticKeyConfig {
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl StaticKeyConfig {
    /// Deterministic id: the same config yields the same id on every run.
    pub fn stable_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.provider.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.api_key.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.base_url.as_deref().unwrap_or("").as_bytes());
        hasher.update(&[0]);
        hasher.update(self.prefix.as_deref().unwrap_or("").as_bytes());
        let digest = hasher.finalize();
        format!("cfg-{}", &digest.to_hex().as_str()[..16])
    }

    pub fn into_credential(self) -> Credential {
        let id = self.stable_id();
        let mut cred = Credential::new(
            id,
            self.provider.clone(),
            CredentialStorage::ApiKey {
                api_key: self.api_key,
                base_url: self.base_url,
                extra_headers: self.extra_headers.into_iter().collect(),
            },
        );
        if let Some(label) = self.label {
            cred.label = label;
        }
        cred.prefix = self.prefix;
        cred.proxy_url = self.proxy_url;
        cred.attributes = self.attributes;
        cred
    }
}

/// Owns every credential record. Writers are serialized behind the lock;
/// readers get cloned snapshots.
#[derive(Default)]
pub struct CredentialStore {
    inner: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the store from the auth directory and the config's static keys.
    pub fn load(auth_dir: Option<&Path>, static_keys: &[StaticKeyConfig]) -> ProxyResult<Self> {
        let store = Self::new();
        if let Some(dir) = auth_dir {
            for cred in load_dir(dir)? {
                store.register(cred);
            }
        }
        for config in static_keys {
            store.register(config.clone().into_credential());
        }
        Ok(store)
    }

    pub fn register(&self, credential: Credential) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.insert(credential.id.clone(), credential);
    }

    pub fn remove(&self, id: &str) -> Option<Credential> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Credential> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut all = inner.values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn list_for_provider(&self, provider: &str) -> Vec<Credential> {
        self.list()
            .into_iter()
            .filter(|cred| cred.provider == provider)
            .collect()
    }

    /// Applies a mutation to one credential under the store lock. Only the
    /// auth manager should call this.
    pub fn update<F>(&self, id: &str, mutate: F) -> Option<Credential>
    where
        F: FnOnce(&mut Credential),
    {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let cred = inner.get_mut(id)?;
        mutate(cred);
        Some(cred.clone())
    }

    /// Hot reload: re-reads the auth directory, replacing file-backed
    /// records. Runtime state (status, failure accounting) survives for ids
    /// that still exist; records whose files disappeared are dropped.
    /// Config-synthesized entries (`cfg-` ids) are untouched.
    pub fn replace_from_disk(&self, auth_dir: &Path) -> ProxyResult<()> {
        let fresh = load_dir(auth_dir)?;
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let fresh_ids = fresh.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
        inner.retain(|id, _| id.starts_with("cfg-") || fresh_ids.contains(id));

        for mut cred in fresh {
            if let Some(existing) = inner.get(&cred.id) {
                cred.status = existing.status;
                cred.failed_count = existing.failed_count;
                cred.cooldown_until = existing.cooldown_until;
                cred.last_failure_at = existing.last_failure_at;
                cred.metadata = existing.metadata.clone();
            }
            inner.insert(cred.id.clone(), cred);
        }
        Ok(())
    }
}

fn load_dir(dir: &Path) -> ProxyResult<Vec<Credential>> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        ProxyError::config(format!("cannot read auth directory {}: {err}", dir.display()))
    })?;

    let mut out = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "credential_file_unreadable", path = %path.display(), error = %err);
                continue;
            }
        };
        match serde_json::from_str::<CredentialFile>(&raw) {
            Ok(file) => out.push(file.into_credential(stem)),
            Err(err) => {
                warn!(event = "credential_file_invalid", path = %path.display(), error = %err);
            }
        }
    }
    Ok(out)
}
