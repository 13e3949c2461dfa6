use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::cms::Cms;
use crate::config::Config;
use crate::credentials::{CredentialResolver, CredentialSet, Vendor};
use crate::images::ImageClients;
use crate::media::MediaStorage;
use crate::model_cache::{ModelCache, RemoteModel};
use crate::orchestrator::{PostOrchestrator, RunSettings};
use crate::prompt::SiteIdentity;
use crate::providers::claude::ClaudeClient;
use crate::providers::gemini::GeminiClient;
use crate::providers::openai::OpenAiClient;
use crate::providers::stability::StabilityClient;
use crate::providers::{self, TextClients};
use crate::schedule;
use crate::settings::{self, GenerationConfig};

/// Everything a trigger needs: the host, the workflow and shared caches.
pub struct App {
    pub config: Config,
    pub cms: Arc<dyn Cms>,
    pub orchestrator: PostOrchestrator,
    pub model_cache: Arc<ModelCache>,
    pub resolver: CredentialResolver,
    /// Held across load, compare and store of a settings save.
    save_lock: Mutex<()>,
}

impl App {
    pub fn new(
        config: Config,
        cms: Arc<dyn Cms>,
        orchestrator: PostOrchestrator,
        model_cache: Arc<ModelCache>,
        resolver: CredentialResolver,
    ) -> Self {
        Self {
            config,
            cms,
            orchestrator,
            model_cache,
            resolver,
            save_lock: Mutex::new(()),
        }
    }

    /// Wire the real provider clients from the deployment config.
    pub fn build(config: Config, cms: Arc<dyn Cms>, media: MediaStorage, resolver: CredentialResolver) -> Self {
        let http = providers::http_client(config.provider_timeout());
        let model_cache = Arc::new(ModelCache::new(
            providers::http_client(config.models_timeout()),
            config.model_cache_ttl(),
        ));

        let p = &config.providers;
        let openai = Arc::new(OpenAiClient::new(http.clone(), &p.openai_base_url, model_cache.clone()));
        let text = TextClients::new()
            .register(openai.clone())
            .register(Arc::new(ClaudeClient::new(http.clone(), &p.claude_base_url)))
            .register(Arc::new(GeminiClient::new(http.clone(), &p.gemini_base_url)));
        let images = ImageClients::new(
            openai,
            Arc::new(StabilityClient::new(http, &p.stability_base_url, media)),
        );

        let settings = run_settings(&config);
        let orchestrator = PostOrchestrator::new(cms.clone(), text, images, settings);
        Self::new(config, cms, orchestrator, model_cache, resolver)
    }

    pub async fn generation_config(&self) -> Result<GenerationConfig> {
        settings::load(self.cms.as_ref()).await
    }

    pub async fn credentials(&self) -> Result<CredentialSet> {
        self.resolver.resolve_all(self.cms.as_ref()).await
    }

    /// Validate and store new settings, then reschedule and drop cached
    /// model lists as the changes require.
    pub async fn save_generation_config(&self, config: GenerationConfig) -> Result<GenerationConfig> {
        let _guard = self.save_lock.lock().await;
        let (saved, changes) = settings::save(self.cms.as_ref(), config).await?;
        if changes.cadence_changed {
            schedule::apply_cadence(self.cms.as_ref(), saved.cadence, Utc::now())
                .await
                .context("updating schedule")?;
        }
        if changes.endpoint_changed {
            self.model_cache.invalidate();
            info!(endpoint = saved.custom_endpoint.as_deref().unwrap_or("official"), "custom endpoint changed");
        }
        Ok(saved)
    }

    /// Models advertised by the configured custom endpoint, if there is one.
    pub async fn custom_endpoint_models(&self) -> Result<Option<Arc<Vec<RemoteModel>>>> {
        let config = self.generation_config().await?;
        let Some(endpoint) = config.custom_endpoint else {
            return Ok(None);
        };
        let credentials = self.credentials().await?;
        let models = self
            .model_cache
            .get_models(&endpoint, credentials.key(Vendor::OpenAi), true)
            .await;
        Ok(Some(models))
    }
}

pub fn run_settings(config: &Config) -> RunSettings {
    RunSettings {
        site: SiteIdentity {
            name: config.site.name.clone(),
            tagline: config.site.tagline.clone(),
        },
        author_id: config.site.author_id,
        admin_email: config.admin_email(),
        image_size: config.providers.image_size.clone(),
        image_count: config.providers.image_count,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::test_app;
    use super::*;
    use crate::cms::fake::FakeCms;
    use crate::providers::stub::StubText;
    use crate::schedule::Cadence;

    #[tokio::test]
    async fn cadence_change_reschedules_and_none_clears() {
        let cms = Arc::new(FakeCms::new());
        let app = test_app(cms.clone(), Arc::new(StubText::replying(&[])));

        let mut config = GenerationConfig::default();
        config.cadence = Cadence::Hourly;
        app.save_generation_config(config.clone()).await.unwrap();
        let info = schedule::next_run(app.cms.as_ref()).await.unwrap().unwrap();
        assert_eq!(info.cadence, Cadence::Hourly);
        assert!(info.next_run_at > Utc::now());

        config.cadence = Cadence::None;
        app.save_generation_config(config).await.unwrap();
        assert!(schedule::next_run(app.cms.as_ref()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unchanged_cadence_keeps_existing_schedule() {
        let cms = Arc::new(FakeCms::new());
        let app = test_app(cms.clone(), Arc::new(StubText::replying(&[])));

        let mut config = GenerationConfig::default();
        config.cadence = Cadence::Daily;
        app.save_generation_config(config.clone()).await.unwrap();
        let first = schedule::next_run(app.cms.as_ref()).await.unwrap().unwrap();

        config.keywords = vec!["roses".to_string()];
        app.save_generation_config(config).await.unwrap();
        assert_eq!(schedule::next_run(app.cms.as_ref()).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn concurrent_saves_leave_schedule_matching_stored_cadence() {
        let cms = Arc::new(FakeCms::new());
        let app = test_app(cms.clone(), Arc::new(StubText::replying(&[])));

        let daily = GenerationConfig {
            cadence: Cadence::Daily,
            ..Default::default()
        };
        let off = GenerationConfig {
            cadence: Cadence::None,
            ..Default::default()
        };
        let (a, b) = tokio::join!(app.save_generation_config(daily), app.save_generation_config(off));
        a.unwrap();
        b.unwrap();

        let stored = app.generation_config().await.unwrap();
        let scheduled = schedule::next_run(app.cms.as_ref()).await.unwrap().map(|info| info.cadence);
        assert_eq!(scheduled.unwrap_or(Cadence::None), stored.cadence);
    }

    #[tokio::test]
    async fn no_custom_endpoint_means_no_remote_models() {
        let cms = Arc::new(FakeCms::new());
        let app = test_app(cms, Arc::new(StubText::replying(&[])));
        assert!(app.custom_endpoint_models().await.unwrap().is_none());
    }
}
