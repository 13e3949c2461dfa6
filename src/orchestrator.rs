use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assemble::{self, AssembledPost};
use crate::cms::{Cms, ImageSource, NewDraftPost};
use crate::credentials::{CredentialSet, Vendor};
use crate::error::WorkflowError;
use crate::images::{self, ImageClients, ImageJob};
use crate::prompt::{self, PromptPair, SiteIdentity};
use crate::providers::{TextClients, TextRequest};
use crate::registry::{self, Provider};
use crate::settings::GenerationConfig;

pub const NOTIFICATION_SUBJECT: &str = "New Automated Post Created";

const EXCERPT_WIDTH: usize = 78;
const EXCERPT_CHARS: usize = 600;

/// Host-level parameters that stay fixed across runs.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub site: SiteIdentity,
    pub author_id: i64,
    pub admin_email: Option<String>,
    pub image_size: String,
    pub image_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Built,
    TextGenerated,
    Assembled,
    Persisted,
    ImageAttached,
    Notified,
    Complete,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a run that persisted a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub post_id: i64,
    pub title: String,
    pub featured_media: Option<i64>,
    pub notified: bool,
}

/// Runs the generation workflow: prompts, text, assembly, persistence, then
/// the optional featured image and notification.
///
/// At most one run is in flight per orchestrator; a concurrent trigger gets
/// [`WorkflowError::Busy`].
pub struct PostOrchestrator {
    cms: Arc<dyn Cms>,
    text: TextClients,
    images: ImageClients,
    settings: RunSettings,
    running: Mutex<()>,
}

impl PostOrchestrator {
    pub fn new(cms: Arc<dyn Cms>, text: TextClients, images: ImageClients, settings: RunSettings) -> Self {
        Self {
            cms,
            text,
            images,
            settings,
            running: Mutex::new(()),
        }
    }

    /// `config` and `credentials` are snapshots taken by the caller; nothing
    /// is re-read mid-run.
    pub async fn run(&self, config: &GenerationConfig, credentials: &CredentialSet) -> Result<RunOutcome, WorkflowError> {
        let _guard = self.running.try_lock().map_err(|_| WorkflowError::Busy)?;

        let provider = resolve_provider(&config.text_model, config.custom_endpoint.as_deref())?;
        let api_key = credentials.key(Vendor::from(provider));
        if api_key.is_empty() {
            return Err(WorkflowError::Configuration(format!("no API key configured for {provider}")));
        }
        let client = self
            .text
            .get(provider)
            .ok_or_else(|| WorkflowError::Configuration(format!("no text client registered for {provider}")))?;

        let category_names = match self.cms.category_names(&config.category_ids).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "failed to load category names, continuing without them");
                Vec::new()
            }
        };
        let prompts = prompt::build_prompts(
            &config.keywords,
            config.tone,
            &config.custom_tone,
            &category_names,
            &self.settings.site,
            config.token_limit,
        );
        transition(RunState::Built);

        let lines = client
            .generate(&TextRequest {
                api_key,
                prompt: &prompts.content_prompt,
                token_limit: config.token_limit,
                model_id: &config.text_model,
                custom_endpoint: match provider {
                    Provider::OpenAi => config.custom_endpoint.as_deref(),
                    _ => None,
                },
            })
            .await?;
        transition(RunState::TextGenerated);

        let post = assemble::assemble(&lines)?;
        transition(RunState::Assembled);

        let post_id = self.persist(&post, config).await?;
        transition(RunState::Persisted);
        info!(post_id, title = %post.title, provider = %provider, "draft post created");

        let featured_media = if config.images_enabled {
            self.add_featured_image(post_id, config, credentials, &prompts).await
        } else {
            None
        };
        if featured_media.is_some() {
            transition(RunState::ImageAttached);
        }

        let notified = config.email_notifications && self.notify(post_id, &post).await;
        if notified {
            transition(RunState::Notified);
        }

        transition(RunState::Complete);
        Ok(RunOutcome {
            post_id,
            title: post.title,
            featured_media,
            notified,
        })
    }

    async fn persist(&self, post: &AssembledPost, config: &GenerationConfig) -> Result<i64, WorkflowError> {
        let draft = NewDraftPost {
            title: post.title.clone(),
            body_markup: post.body_markup(),
            category_ids: config.category_ids.clone(),
            author_id: self.settings.author_id,
        };
        self.cms
            .insert_draft_post(&draft)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("{e:#}")))
    }

    /// Generate and attach a featured image. Every failure here is logged
    /// and leaves the post without an image.
    async fn add_featured_image(
        &self,
        post_id: i64,
        config: &GenerationConfig,
        credentials: &CredentialSet,
        prompts: &PromptPair,
    ) -> Option<i64> {
        let Some(selection) = images::select_service(&config.text_model, config.image_service, credentials) else {
            info!(post_id, "no image service configured, skipping featured image");
            return None;
        };

        let job = ImageJob {
            prompt: &prompts.image_prompt,
            count: self.settings.image_count,
            size: &self.settings.image_size,
            custom_endpoint: config.custom_endpoint.as_deref(),
        };
        let sources = images::generate_with_fallback(&self.images, &selection, credentials, job).await?;
        self.attach_first(post_id, &sources).await
    }

    /// Attach candidates in order until one succeeds. Stored files that end
    /// up unattached are deleted.
    async fn attach_first(&self, post_id: i64, sources: &[ImageSource]) -> Option<i64> {
        for (i, source) in sources.iter().enumerate() {
            let media_id = match self.cms.attach_media(source, post_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(post_id, url = %source.url(), error = %e, "failed to attach image");
                    continue;
                }
            };
            match self.cms.set_featured_image(post_id, media_id).await {
                Ok(()) => {
                    info!(post_id, media_id, "featured image set");
                    discard_stored(&sources[i + 1..]).await;
                    return Some(media_id);
                }
                Err(e) => warn!(post_id, media_id, error = %e, "failed to set featured image"),
            }
        }
        None
    }

    async fn notify(&self, post_id: i64, post: &AssembledPost) -> bool {
        let Some(to) = self.settings.admin_email.as_deref().filter(|to| !to.is_empty()) else {
            warn!(post_id, "email notifications enabled but no admin email configured");
            return false;
        };
        let body = notification_body(post_id, post);
        let sent = self.cms.send_mail(to, NOTIFICATION_SUBJECT, &body).await;
        if !sent {
            warn!(post_id, to, "notification mail was not accepted");
        }
        sent
    }
}

async fn discard_stored(sources: &[ImageSource]) {
    for source in sources {
        if let ImageSource::Stored { path, .. } = source
            && let Err(e) = tokio::fs::remove_file(path).await
        {
            warn!(path = %path.display(), error = %e, "failed to remove unused image");
        }
    }
}

fn transition(state: RunState) {
    debug!(state = %state, "generation run state");
}

/// Provider serving `model_id`: catalog entry first, then the id's family
/// prefix. Unknown ids are sent to the custom endpoint when one is set.
pub fn resolve_provider(model_id: &str, custom_endpoint: Option<&str>) -> Result<Provider, WorkflowError> {
    registry::find_provider_for_model(model_id)
        .or_else(|| Provider::infer_from_model_id(model_id))
        .or_else(|| custom_endpoint.filter(|e| !e.is_empty()).map(|_| Provider::OpenAi))
        .ok_or_else(|| WorkflowError::Configuration(format!("unknown text model '{model_id}'")))
}

fn notification_body(post_id: i64, post: &AssembledPost) -> String {
    let html: String = post.blocks.iter().map(|b| format!("{}\n", b.content)).collect();
    let text = html2text::from_read(html.as_bytes(), EXCERPT_WIDTH).unwrap_or(html);
    let mut excerpt: String = text.trim().chars().take(EXCERPT_CHARS).collect();
    if text.trim().chars().count() > EXCERPT_CHARS {
        excerpt.push_str("...");
    }
    format!(
        "A new post has been created automatically and saved as a draft.\n\n\
         Title: {}\nPost ID: {post_id}\n\n{excerpt}\n",
        post.title
    )
}

#[cfg(test)]
mod tests {
    use tokio::sync::Notify;

    use super::*;
    use crate::cms::fake::FakeCms;
    use crate::error::ProviderError;
    use crate::images::ImageService;
    use crate::prompt::Tone;
    use crate::providers::stub::{StubImages, StubText};

    fn settings() -> RunSettings {
        RunSettings {
            site: SiteIdentity {
                name: "Green Thumbs".to_string(),
                tagline: String::new(),
            },
            author_id: 7,
            admin_email: Some("admin@example.com".to_string()),
            image_size: "1792x1024".to_string(),
            image_count: 1,
        }
    }

    fn orchestrator(cms: Arc<FakeCms>, text: Arc<StubText>, openai_images: Arc<StubImages>) -> PostOrchestrator {
        PostOrchestrator::new(
            cms,
            TextClients::new().register(text),
            ImageClients::new(openai_images, StubImages::new(ImageService::Stability, &[])),
            settings(),
        )
    }

    fn gardening_config() -> GenerationConfig {
        GenerationConfig {
            keywords: vec!["gardening".to_string()],
            tone: Tone::Funny,
            token_limit: 150,
            text_model: "gpt-3.5-turbo".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn gardening_post_without_image_key() {
        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText::replying(&["<h1>Why Gardening Rocks</h1>", "It's great."]));
        let images = StubImages::new(ImageService::OpenAi, &[]);
        let orch = orchestrator(cms.clone(), text.clone(), images.clone());
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);
        let config = gardening_config();

        let outcome = orch.run(&config, &creds).await.unwrap();

        let posts = cms.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, outcome.post_id);
        assert_eq!(posts[0].post.title, "Why Gardening Rocks");
        assert_eq!(posts[0].status, "draft");
        assert_eq!(posts[0].post.author_id, 7);
        assert_eq!(
            posts[0].post.body_markup,
            "<!-- wp:paragraph {\"align\":\"left\"} -->It's great.<!-- /wp:paragraph -->"
        );
        assert_eq!(posts[0].featured_media, None);
        assert_eq!(outcome.featured_media, None);
        assert_eq!(images.calls(), 1);

        let prompt = &text.prompts.lock().unwrap()[0];
        assert!(prompt.contains("within 150 tokens"));
        assert!(prompt.contains("gardening"));
    }

    #[tokio::test]
    async fn claude_model_without_image_keys_skips_image() {
        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText {
            provider: Provider::Claude,
            ..StubText::replying(&["<h1>Why Gardening Rocks</h1>", "It's great."])
        });
        let images = StubImages::new(ImageService::OpenAi, &["https://img/a.png"]);
        let orch = orchestrator(cms.clone(), text, images.clone());
        let creds = CredentialSet::from_pairs(&[(Vendor::Claude, "sk-ant")]);
        let config = GenerationConfig {
            text_model: "claude-3-haiku".to_string(),
            ..gardening_config()
        };

        let outcome = orch.run(&config, &creds).await.unwrap();
        assert_eq!(outcome.title, "Why Gardening Rocks");
        assert_eq!(outcome.featured_media, None);
        assert_eq!(images.calls(), 0);
        assert_eq!(cms.posts().len(), 1);
    }

    #[tokio::test]
    async fn missing_title_never_reaches_persistence() {
        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText::replying(&["Just a paragraph.", "Another."]));
        let orch = orchestrator(cms.clone(), text, StubImages::new(ImageService::OpenAi, &[]));
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        let err = orch.run(&gardening_config(), &creds).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Assembly(_)));
        assert!(cms.posts().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_aborts_without_post() {
        let cms = Arc::new(FakeCms::new());
        let orch = orchestrator(
            cms.clone(),
            Arc::new(StubText::failing(503)),
            StubImages::new(ImageService::OpenAi, &[]),
        );
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        let err = orch.run(&gardening_config(), &creds).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Provider(ProviderError::Status { status: 503, .. })));
        assert!(cms.posts().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error() {
        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText::replying(&["<h1>T</h1>"]));
        let orch = orchestrator(cms.clone(), text.clone(), StubImages::new(ImageService::OpenAi, &[]));

        let err = orch.run(&gardening_config(), &CredentialSet::default()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
        assert_eq!(text.calls(), 0);
    }

    #[tokio::test]
    async fn rejected_post_surfaces_cms_message() {
        let cms = Arc::new(FakeCms {
            reject_posts: true,
            ..FakeCms::new()
        });
        let text = Arc::new(StubText::replying(&["<h1>T</h1>", "Body"]));
        let orch = orchestrator(cms, text, StubImages::new(ImageService::OpenAi, &[]));
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        match orch.run(&gardening_config(), &creds).await.unwrap_err() {
            WorkflowError::Persistence(message) => assert!(message.contains("rejected the draft")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn first_attachable_image_becomes_featured() {
        let cms = Arc::new(FakeCms {
            broken_media: vec!["https://img/broken.png".to_string()],
            ..FakeCms::new()
        });
        let text = Arc::new(StubText::replying(&["<h1>T</h1>", "Body"]));
        let images = StubImages::new(ImageService::OpenAi, &["https://img/broken.png", "https://img/ok.png"]);
        let orch = orchestrator(cms.clone(), text, images);
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        let outcome = orch.run(&gardening_config(), &creds).await.unwrap();
        let media = cms.media.lock().unwrap().clone();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].1.url(), "https://img/ok.png");
        assert_eq!(cms.posts()[0].featured_media, outcome.featured_media);
        assert!(outcome.featured_media.is_some());
    }

    #[tokio::test]
    async fn unused_stored_images_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = crate::media::MediaStorage::new(dir.path(), "/uploads");
        let mut sources = Vec::new();
        for _ in 0..2 {
            let (path, url) = storage.store("stability", "png", b"png").await.unwrap();
            sources.push(ImageSource::Stored { path, url });
        }
        let paths: Vec<_> = sources
            .iter()
            .filter_map(|s| match s {
                ImageSource::Stored { path, .. } => Some(path.clone()),
                ImageSource::Remote { .. } => None,
            })
            .collect();

        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText::replying(&["<h1>T</h1>", "Body"]));
        let orch = orchestrator(cms.clone(), text, StubImages::with_sources(ImageService::OpenAi, sources));
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        let outcome = orch.run(&gardening_config(), &creds).await.unwrap();
        assert!(outcome.featured_media.is_some());
        assert!(paths[0].exists());
        assert!(!paths[1].exists());
    }

    #[tokio::test]
    async fn attachment_failure_keeps_the_post() {
        let cms = Arc::new(FakeCms {
            broken_media: vec!["https://img/broken.png".to_string()],
            ..FakeCms::new()
        });
        let text = Arc::new(StubText::replying(&["<h1>T</h1>", "Body"]));
        let images = StubImages::new(ImageService::OpenAi, &["https://img/broken.png"]);
        let orch = orchestrator(cms.clone(), text, images);
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);

        let outcome = orch.run(&gardening_config(), &creds).await.unwrap();
        assert_eq!(outcome.featured_media, None);
        assert_eq!(cms.posts().len(), 1);
    }

    #[tokio::test]
    async fn notification_names_post_and_failures_are_not_fatal() {
        let cms = Arc::new(FakeCms::new());
        let text = Arc::new(StubText::replying(&["<h1>Bees</h1>", "<p>They <b>buzz</b>.</p>"]));
        let orch = orchestrator(cms.clone(), text, StubImages::new(ImageService::OpenAi, &[]));
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);
        let config = GenerationConfig {
            email_notifications: true,
            images_enabled: false,
            ..gardening_config()
        };

        let outcome = orch.run(&config, &creds).await.unwrap();
        assert!(outcome.notified);
        let mails = cms.mails();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].to, "admin@example.com");
        assert_eq!(mails[0].subject, NOTIFICATION_SUBJECT);
        assert!(mails[0].body.contains("Title: Bees"));
        assert!(mails[0].body.contains(&format!("Post ID: {}", outcome.post_id)));
        assert!(mails[0].body.contains("buzz"));
        assert!(!mails[0].body.contains("<b>"));

        let cms = Arc::new(FakeCms {
            mail_accepted: false,
            ..FakeCms::new()
        });
        let text = Arc::new(StubText::replying(&["<h1>Bees</h1>"]));
        let orch = orchestrator(cms.clone(), text, StubImages::new(ImageService::OpenAi, &[]));
        let outcome = orch.run(&config, &creds).await.unwrap();
        assert!(!outcome.notified);
        assert_eq!(cms.posts().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected_as_busy() {
        let cms = Arc::new(FakeCms::new());
        let gate = Arc::new(Notify::new());
        let text = Arc::new(StubText {
            gate: Some(gate.clone()),
            ..StubText::replying(&["<h1>T</h1>", "Body"])
        });
        let orch = Arc::new(orchestrator(cms.clone(), text.clone(), StubImages::new(ImageService::OpenAi, &[])));
        let creds = CredentialSet::from_pairs(&[(Vendor::OpenAi, "sk")]);
        let config = GenerationConfig {
            images_enabled: false,
            ..gardening_config()
        };

        let first = {
            let orch = orch.clone();
            let creds = creds.clone();
            let config = config.clone();
            tokio::spawn(async move { orch.run(&config, &creds).await })
        };
        while text.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(orch.run(&config, &creds).await, Err(WorkflowError::Busy)));

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(cms.posts().len(), 1);
    }

    #[test]
    fn provider_resolution_order() {
        assert_eq!(resolve_provider("claude-3-opus", None).unwrap(), Provider::Claude);
        assert_eq!(resolve_provider("gemini-2.0-flash", None).unwrap(), Provider::Gemini);
        assert_eq!(resolve_provider("llama-3-70b", Some("https://x/v1")).unwrap(), Provider::OpenAi);
        assert!(matches!(
            resolve_provider("llama-3-70b", None),
            Err(WorkflowError::Configuration(_))
        ));
    }
}
