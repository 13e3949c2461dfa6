//! Entry points for scheduled and manually triggered generation.

use tracing::{error, info, warn};

use crate::app::App;
use crate::credentials::{CredentialSet, Vendor};
use crate::error::WorkflowError;
use crate::orchestrator::{self, RunOutcome};
use crate::schedule::{Cadence, GENERATE_POST_ACTION};
use crate::settings::GenerationConfig;

pub const MISSING_SETUP_MESSAGE: &str = "API key or keywords not set.";
pub const SUCCESS_MESSAGE: &str = "Post created successfully!";
pub const FAILURE_SUBJECT: &str = "Automated Post Creation Failed";

/// Dispatch a scheduled action to its handler.
pub async fn trigger_handler(app: &App, action: &str) {
    match action {
        GENERATE_POST_ACTION => {
            run_scheduled(app).await;
        }
        other => warn!(action = other, "no handler registered for action"),
    }
}

/// The selected model's provider has a key and there is something to write about.
fn check_ready(config: &GenerationConfig, credentials: &CredentialSet) -> Result<(), WorkflowError> {
    let provider = orchestrator::resolve_provider(&config.text_model, config.custom_endpoint.as_deref())?;
    if !credentials.has(Vendor::from(provider)) || config.keywords.is_empty() {
        return Err(WorkflowError::Configuration(MISSING_SETUP_MESSAGE.to_string()));
    }
    Ok(())
}

async fn snapshot(app: &App) -> Result<(GenerationConfig, CredentialSet), WorkflowError> {
    let config = app
        .generation_config()
        .await
        .map_err(|e| WorkflowError::Configuration(format!("{e:#}")))?;
    let credentials = app
        .credentials()
        .await
        .map_err(|e| WorkflowError::Configuration(format!("{e:#}")))?;
    Ok((config, credentials))
}

/// Run once on behalf of an operator. Errors are returned to the caller.
pub async fn run_manual(app: &App) -> Result<RunOutcome, WorkflowError> {
    let (config, credentials) = snapshot(app).await?;
    check_ready(&config, &credentials)?;
    let outcome = app.orchestrator.run(&config, &credentials).await?;
    info!(post_id = outcome.post_id, title = %outcome.title, "manual generation finished");
    Ok(outcome)
}

/// Run on behalf of the scheduler. Nothing is returned; failures are logged
/// and, when notifications are on, mailed to the admin.
pub async fn run_scheduled(app: &App) -> Option<RunOutcome> {
    let (config, credentials) = match snapshot(app).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "scheduled generation could not load settings");
            return None;
        }
    };

    if config.cadence == Cadence::None {
        info!("automatic generation is off, skipping scheduled run");
        return None;
    }
    if let Err(e) = check_ready(&config, &credentials) {
        warn!(error = %e, "skipping scheduled generation");
        return None;
    }

    match app.orchestrator.run(&config, &credentials).await {
        Ok(outcome) => {
            info!(post_id = outcome.post_id, title = %outcome.title, "scheduled generation finished");
            Some(outcome)
        }
        Err(WorkflowError::Busy) => {
            warn!("previous generation still running, skipping scheduled run");
            None
        }
        Err(e) => {
            error!(error = %e, "scheduled generation failed");
            if config.email_notifications {
                notify_failure(app, &e).await;
            }
            None
        }
    }
}

async fn notify_failure(app: &App, failure: &WorkflowError) {
    let Some(admin) = app.config.admin_email() else {
        warn!("no admin email configured for failure notices");
        return;
    };
    let body = format!("The scheduled post could not be created.\n\nReason: {failure}\n");
    if !app.cms.send_mail(&admin, FAILURE_SUBJECT, &body).await {
        warn!(to = %admin, "failure notice was not accepted");
    }
}
