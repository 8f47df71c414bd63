use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{info, warn};

use llmux_common::{ErrorKind, ProxyError, ProxyResult};
use llmux_provider_core::{
    Credential, CredentialStatus, CredentialStore, ExecutorRegistry, MAX_AUTH_FAILURES,
};

/// Cooldown applied when a transient failure carries no retry hint.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Result of one upstream call, as reported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Success,
    /// 401-class failure attributable to the credential.
    AuthFailure,
    /// 429/5xx/transport; cools the credential down.
    Transient { retry_after: Option<Duration> },
    /// Client went away; never transitions credential state.
    Cancelled,
}

/// Owns credential selection, refresh and failure accounting. All state
/// transitions of a credential happen here and nowhere else.
pub struct AuthManager {
    store: Arc<CredentialStore>,
    executors: Arc<ExecutorRegistry>,
    force_model_prefix: bool,
}

impl AuthManager {
    pub fn new(
        store: Arc<CredentialStore>,
        executors: Arc<ExecutorRegistry>,
        force_model_prefix: bool,
    ) -> Self {
        Self {
            store,
            executors,
            force_model_prefix,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Picks a credential for `provider`, honoring an explicit pin, the
    /// prefix scoping rule and excluded ids (already tried this request).
    /// Selection is least-recently-failed.
    pub fn pick(
        &self,
        provider: &str,
        requested_model: &str,
        pinned: Option<&str>,
        exclude: &[String],
    ) -> ProxyResult<Credential> {
        if let Some(pinned_id) = pinned {
            let cred = self
                .store
                .get(pinned_id)
                .ok_or_else(|| ProxyError::auth(format!("pinned auth {pinned_id} not found")))?;
            if cred.provider != provider {
                return Err(ProxyError::auth(format!(
                    "pinned auth {pinned_id} belongs to {}",
                    cred.provider
                )));
            }
            return Ok(cred);
        }

        let now = OffsetDateTime::now_utc();
        let mut eligible = self
            .store
            .list_for_provider(provider)
            .into_iter()
            .filter(|cred| cred.status.is_eligible(now))
            .filter(|cred| !exclude.contains(&cred.id))
            .filter(|cred| self.prefix_allows(cred, requested_model))
            .collect::<Vec<_>>();

        if eligible.is_empty() {
            return Err(ProxyError::auth(format!(
                "no active credentials for provider {provider}"
            )));
        }

        // Least-recently-failed: never-failed first, then oldest failure.
        eligible.sort_by(|a, b| {
            let rank = |cred: &Credential| cred.last_failure_at;
            rank(a).cmp(&rank(b)).then_with(|| a.id.cmp(&b.id))
        });
        Ok(eligible.remove(0))
    }

    /// When `force_model_prefix` is set, prefixed credentials only serve
    /// model ids carrying the same prefix. Otherwise prefixed credentials
    /// remain eligible for unprefixed requests.
    fn prefix_allows(&self, cred: &Credential, requested_model: &str) -> bool {
        let Some(prefix) = cred.prefix.as_deref().filter(|p| !p.is_empty()) else {
            return true;
        };
        if !self.force_model_prefix {
            return true;
        }
        requested_model.starts_with(prefix)
    }

    /// Runs the provider's refresh hook and persists the outcome. Static-key
    /// providers are a no-op. Refresh failures transition credential state
    /// by error kind before propagating.
    pub async fn refresh_if_needed(&self, credential: &Credential) -> ProxyResult<Credential> {
        let Some(executor) = self.executors.get(&credential.provider) else {
            return Err(ProxyError::internal(format!(
                "no executor registered for provider {}",
                credential.provider
            )));
        };
        match executor.refresh(credential).await {
            Ok(updated) => {
                if updated.last_refresh_at != credential.last_refresh_at {
                    self.store.register(updated.clone());
                    info!(
                        event = "credential_refreshed",
                        credential_id = %updated.id,
                        provider = %updated.provider,
                    );
                }
                Ok(updated)
            }
            Err(err) => {
                match err.kind {
                    ErrorKind::Auth => self.report(&credential.id, Outcome::AuthFailure),
                    ErrorKind::UpstreamTransient => self.report(
                        &credential.id,
                        Outcome::Transient {
                            retry_after: err.retry_after,
                        },
                    ),
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Applies the credential state machine: active -> cooling on 429/5xx,
    /// cooling -> active after cooldown or success, active -> expired after
    /// `MAX_AUTH_FAILURES` consecutive auth failures. Cancellation never
    /// transitions state.
    pub fn report(&self, credential_id: &str, outcome: Outcome) {
        let now = OffsetDateTime::now_utc();
        match outcome {
            Outcome::Cancelled => {}
            Outcome::Success => {
                self.store.update(credential_id, |cred| {
                    cred.failed_count = 0;
                    cred.cooldown_until = None;
                    if matches!(cred.status, CredentialStatus::Cooling { .. }) {
                        cred.status = CredentialStatus::Active;
                    }
                });
            }
            Outcome::AuthFailure => {
                self.store.update(credential_id, |cred| {
                    cred.failed_count += 1;
                    cred.last_failure_at = Some(now);
                    if cred.failed_count >= MAX_AUTH_FAILURES {
                        cred.status = CredentialStatus::Expired;
                        warn!(
                            event = "credential_expired",
                            credential_id = %cred.id,
                            provider = %cred.provider,
                            failed_count = cred.failed_count,
                        );
                    }
                });
            }
            Outcome::Transient { retry_after } => {
                let until = now + retry_after.unwrap_or(DEFAULT_COOLDOWN);
                self.store.update(credential_id, |cred| {
                    cred.last_failure_at = Some(now);
                    cred.cooldown_until = Some(until);
                    if !matches!(cred.status, CredentialStatus::Expired) {
                        cred.status = CredentialStatus::Cooling { until };
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::{CredentialStorage, StaticKeyConfig};

    fn store_with(creds: Vec<Credential>) -> Arc<CredentialStore> {
        let store = CredentialStore::new();
        for cred in creds {
            store.register(cred);
        }
        Arc::new(store)
    }

    fn manager(store: Arc<CredentialStore>, force_prefix: bool) -> AuthManager {
        AuthManager::new(store, Arc::new(ExecutorRegistry::new()), force_prefix)
    }

    fn api_key_cred(id: &str, provider: &str) -> Credential {
        Credential::new(
            id,
            provider,
            CredentialStorage::ApiKey {
                api_key: "sk".to_string(),
                base_url: None,
                extra_headers: Vec::new(),
            },
        )
    }

    #[test]
    fn pick_prefers_never_failed_credentials() {
        let mut failed = api_key_cred("a-failed", "claude");
        failed.last_failure_at = Some(OffsetDateTime::now_utc());
        let fresh = api_key_cred("b-fresh", "claude");
        let manager = manager(store_with(vec![failed, fresh]), false);
        let picked = manager.pick("claude", "claude-sonnet-4-5", None, &[]).unwrap();
        assert_eq!(picked.id, "b-fresh");
    }

    #[test]
    fn excluded_credentials_are_skipped() {
        let manager = manager(
            store_with(vec![api_key_cred("one", "claude"), api_key_cred("two", "claude")]),
            false,
        );
        let picked = manager
            .pick("claude", "m", None, &["one".to_string()])
            .unwrap();
        assert_eq!(picked.id, "two");
    }

    #[test]
    fn expired_credentials_are_ineligible() {
        let mut expired = api_key_cred("dead", "claude");
        expired.status = CredentialStatus::Expired;
        let manager = manager(store_with(vec![expired]), false);
        assert!(manager.pick("claude", "m", None, &[]).is_err());
    }

    #[test]
    fn pinned_credential_must_match_provider() {
        let manager = manager(store_with(vec![api_key_cred("pin", "claude")]), false);
        let picked = manager.pick("claude", "m", Some("pin"), &[]).unwrap();
        assert_eq!(picked.id, "pin");
        assert!(manager.pick("gemini", "m", Some("pin"), &[]).is_err());
    }

    #[test]
    fn prefix_scoping_follows_force_flag() {
        let mut scoped = api_key_cred("scoped", "claude");
        scoped.prefix = Some("team-".to_string());
        let store = store_with(vec![scoped]);

        // Without force, prefixed credentials serve unprefixed requests.
        let relaxed = manager(store.clone(), false);
        assert!(relaxed.pick("claude", "claude-sonnet-4-5", None, &[]).is_ok());

        // With force, only matching-prefix models are allowed.
        let forced = manager(store, true);
        assert!(forced.pick("claude", "claude-sonnet-4-5", None, &[]).is_err());
        assert!(forced.pick("claude", "team-claude-sonnet-4-5", None, &[]).is_ok());
    }

    #[test]
    fn auth_failures_expire_after_threshold() {
        let store = store_with(vec![api_key_cred("c", "claude")]);
        let manager = manager(store.clone(), false);
        for _ in 0..MAX_AUTH_FAILURES {
            manager.report("c", Outcome::AuthFailure);
        }
        assert_eq!(store.get("c").unwrap().status, CredentialStatus::Expired);
    }

    #[test]
    fn transient_failures_cool_down_and_success_recovers() {
        let store = store_with(vec![api_key_cred("c", "claude")]);
        let manager = manager(store.clone(), false);
        manager.report(
            "c",
            Outcome::Transient {
                retry_after: Some(Duration::from_secs(60)),
            },
        );
        let cred = store.get("c").unwrap();
        assert!(matches!(cred.status, CredentialStatus::Cooling { .. }));
        assert!(!cred.status.is_eligible(OffsetDateTime::now_utc()));

        manager.report("c", Outcome::Success);
        assert_eq!(store.get("c").unwrap().status, CredentialStatus::Active);
        assert_eq!(store.get("c").unwrap().failed_count, 0);
    }

    #[test]
    fn cancellation_never_transitions_state() {
        let store = store_with(vec![api_key_cred("c", "claude")]);
        let manager = manager(store.clone(), false);
        manager.report("c", Outcome::Cancelled);
        let cred = store.get("c").unwrap();
        assert_eq!(cred.status, CredentialStatus::Active);
        assert_eq!(cred.failed_count, 0);
        assert!(cred.last_failure_at.is_none());
    }

    #[test]
    fn synthesized_store_round_trips_through_manager() {
        let store = Arc::new(
            CredentialStore::load(
                None,
                &[StaticKeyConfig {
                    provider: "claude".to_string(),
                    api_key: "sk-1".to_string(),
                    ..StaticKeyConfig::default()
                }],
            )
            .unwrap(),
        );
        let manager = manager(store, false);
        assert!(manager.pick("claude", "m", None, &[]).is_ok());
    }
}
