use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::App;
use crate::cms::Cms;
use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::mail::Mailer;
use crate::media::MediaStorage;
use crate::store::SqliteCms;
use crate::{db, providers, schedule, server, store};

const TRIGGER_TOKEN_OPTION: &str = "trigger_token";

/// Open the database and wire the SQLite host, mailer and provider clients.
pub async fn open(config: Config) -> Result<(SqlitePool, Arc<App>)> {
    let pool = db::create_pool(&config).await.context("creating database")?;
    info!(db_path = %config.db_path().display(), "database ready");

    let media = MediaStorage::new(config.uploads_dir(), &config.site.uploads_url);
    let mailer = match &config.mail {
        Some(mail) => Some(Mailer::new(mail).context("creating mailer")?),
        None => {
            info!("no [mail] section, notifications are disabled");
            None
        }
    };

    let http = providers::http_client(config.provider_timeout());
    let cms: Arc<dyn Cms> = Arc::new(SqliteCms::new(pool.clone(), http, media.clone(), mailer));
    let app = App::build(config, cms, media, CredentialResolver::from_process_env());
    Ok((pool, Arc::new(app)))
}

pub async fn run(config: Config) -> Result<()> {
    let listen = config.autoinsight.listen.clone();
    let (pool, app) = open(config).await?;

    let trigger_token = bootstrap_trigger_token(&pool, &app.config).await?;

    // Re-arm the recurring task in case the database was restored without it
    let generation = app.generation_config().await.context("loading generation config")?;
    if schedule::next_run(app.cms.as_ref()).await?.is_none() && generation.cadence.interval().is_some() {
        schedule::apply_cadence(app.cms.as_ref(), generation.cadence, chrono::Utc::now()).await?;
    }

    let cancel = CancellationToken::new();

    let scheduler_handle = tokio::spawn(schedule::scheduler_loop(pool.clone(), app.clone(), cancel.clone()));

    let router = server::build_router(server::AppState {
        app: app.clone(),
        trigger_token,
    });
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding to {listen}"))?;

    info!(listen = %listen, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");

    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = scheduler_handle.await;
        let _ = server_handle.await;
    })
    .await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn bootstrap_trigger_token(pool: &SqlitePool, config: &Config) -> Result<String> {
    // Priority: config value → DB stored value → auto-generate
    if let Some(ref token) = config.autoinsight.trigger_token {
        store::set_option(pool, TRIGGER_TOKEN_OPTION, token).await?;
        info!("using trigger token from config");
        return Ok(token.clone());
    }

    if let Some(token) = store::get_option(pool, TRIGGER_TOKEN_OPTION).await? {
        info!("using stored trigger token");
        return Ok(token);
    }

    let token = generate_token();
    store::set_option(pool, TRIGGER_TOKEN_OPTION, &token).await?;
    warn!(token = %token, "trigger token generated, save it: it won't be shown again");
    Ok(token)
}

fn generate_token() -> String {
    use rand::distr::Alphanumeric;
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler, waiting for ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::test_config;

    #[tokio::test]
    async fn trigger_token_is_generated_once_then_reused() {
        let pool = db::memory_pool().await;
        let config = test_config();

        let first = bootstrap_trigger_token(&pool, &config).await.unwrap();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));

        let second = bootstrap_trigger_token(&pool, &config).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn configured_trigger_token_wins() {
        let pool = db::memory_pool().await;
        store::set_option(&pool, TRIGGER_TOKEN_OPTION, "stored").await.unwrap();
        let mut config = test_config();
        config.autoinsight.trigger_token = Some("from-config".to_string());

        assert_eq!(bootstrap_trigger_token(&pool, &config).await.unwrap(), "from-config");
        assert_eq!(
            store::get_option(&pool, TRIGGER_TOKEN_OPTION).await.unwrap().as_deref(),
            Some("from-config")
        );
    }
}
