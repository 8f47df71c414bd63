use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use notify::{RecursiveMode, Watcher};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use llmux_core::{AuthManager, ClientAuth, Config, Dispatcher};
use llmux_provider_core::{CredentialStore, ModelRegistry};
use llmux_provider_impl::transport::ElectronTransport;
use llmux_provider_impl::{ExecutorEnv, build_executors};

mod cli;
mod models;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = cli::Cli::parse();

    let mut config = load_config(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(auth_dir) = args.auth_dir {
        config.auth_dir = Some(auth_dir.into());
    }
    config.apply_env_overrides();
    config.validate().context("configuration invalid")?;

    let store = Arc::new(
        CredentialStore::load(config.auth_dir.as_deref(), &config.credentials)
            .context("credential store load failed")?,
    );
    let credentials = store.list();
    info!(
        event = "credentials_loaded",
        count = credentials.len(),
        auth_dir = ?config.auth_dir,
    );

    let mut env = ExecutorEnv {
        proxy: config.proxy_settings(),
        payload_rules: config.payload_rules(),
        usage: Arc::new(llmux_provider_core::TracingUsageReporter),
        providers: config.provider_runtime(),
        transport: None,
    };
    if let Some(shim) = &config.electron_transport {
        env.transport = Some(Arc::new(ElectronTransport::new(
            shim.program.clone(),
            shim.args.clone(),
        )));
        info!(event = "electron_transport_enabled", program = %shim.program);
    }
    let executors = Arc::new(build_executors(Arc::new(env)));

    let registry = Arc::new(ModelRegistry::new());
    let mut providers_with_creds = credentials
        .iter()
        .map(|cred| cred.provider.clone())
        .collect::<Vec<_>>();
    providers_with_creds.sort();
    providers_with_creds.dedup();
    models::seed_registry(&registry, &config, &providers_with_creds);

    let auth_manager = Arc::new(AuthManager::new(
        store.clone(),
        executors.clone(),
        config.force_model_prefix,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        executors,
        auth_manager.clone(),
        config.bootstrap_retries(),
        config.nonstream_keepalive(),
        config.stream_keepalive(),
    ));
    let state = Arc::new(llmux_router::AppState {
        dispatcher,
        client_auth: Arc::new(ClientAuth::new(config.api_keys.clone())),
        disable_proxy_buffering: config.streaming.disable_proxy_buffering,
        passthrough_headers: config.passthrough_headers,
        request_log: config.request_log,
    });

    // Hot reload: file changes in the auth directory re-read the store.
    let _watcher = config
        .auth_dir
        .clone()
        .and_then(|dir| watch_auth_dir(dir.as_ref(), store.clone()));

    // Pre-emptive refresh keeps short-lived tokens (copilot) warm so the
    // request path rarely pays the exchange.
    spawn_refresh_worker(store.clone(), auth_manager);

    let app = llmux_router::proxy_router(state);
    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(event = "listening", bind = %bind);
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let default = if std::env::var("VERBOSE_LOGGING").is_ok_and(|v| v == "1" || v == "true") {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        info!(event = "config_missing", path = %path, "using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    serde_yaml::from_str(&raw).with_context(|| format!("cannot parse {path}"))
}

fn spawn_refresh_worker(store: Arc<CredentialStore>, auth_manager: Arc<AuthManager>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for credential in store.list() {
                if credential.provider != "copilot" {
                    continue;
                }
                if let Err(err) = auth_manager.refresh_if_needed(&credential).await {
                    warn!(
                        event = "background_refresh_failed",
                        credential_id = %credential.id,
                        error = %err,
                    );
                }
            }
        }
    });
}

fn watch_auth_dir(
    dir: &Path,
    store: Arc<CredentialStore>,
) -> Option<notify::RecommendedWatcher> {
    let dir_owned = dir.to_path_buf();
    let mut watcher = match notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_err() {
            return;
        }
        if let Err(err) = store.replace_from_disk(&dir_owned) {
            warn!(event = "auth_dir_reload_failed", error = %err);
        } else {
            info!(event = "auth_dir_reloaded");
        }
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(event = "auth_dir_watch_failed", error = %err);
            return None;
        }
    };
    if let Err(err) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(event = "auth_dir_watch_failed", error = %err);
        return None;
    }
    Some(watcher)
}
