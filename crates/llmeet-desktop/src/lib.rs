use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmeet_core::events::listener_fn;
use llmeet_core::{
    AuthService, ClientConfig, ConnectionState, EventBus, EventEnvelope, EventKind,
    FileCredentialStore, LlmeetError, RequestGateway, TracingSessionNotifier,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the screens need: one gateway, one event bus.
pub struct AppState {
    pub config: ClientConfig,
    pub gateway: Arc<RequestGateway>,
    pub events: Arc<EventBus>,
}

impl AppState {
    /// Load config and credentials from `data_dir` and wire the core services.
    pub async fn init(data_dir: &Path) -> Result<Self, LlmeetError> {
        let config = ClientConfig::load(data_dir).with_env_overrides()?;
        config.validate()?;

        let store = Arc::new(FileCredentialStore::open(data_dir).await);
        tracing::debug!("credential store at {}", store.path().display());

        let gateway = RequestGateway::new(
            config.gateway_config(),
            store,
            Arc::new(TracingSessionNotifier),
        )?;
        let events = EventBus::install(config.event_bus_config());

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            events,
        })
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(self.gateway.clone())
    }
}

// ---------------------------------------------------------------------------
// Event listener: recording notices
// ---------------------------------------------------------------------------

/// Text of the notice shown when a recording finished merging.
pub fn recording_notice(envelope: &EventEnvelope) -> Option<String> {
    let merge = envelope.merge_complete()?;
    let meeting = merge.meeting_id.as_deref().unwrap_or("unknown meeting");
    Some(match merge.merged_url {
        Some(url) => format!("Recording for {meeting} is ready: {url}"),
        None => format!("Recording for {meeting} is ready"),
    })
}

fn log_recording_notice(envelope: &EventEnvelope) {
    if let Some(notice) = recording_notice(envelope) {
        tracing::info!("{notice}");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("llmeet")
}

pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("llmeet_core=info,llmeet_desktop=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run(data_dir: &Path) -> Result<(), LlmeetError> {
    let state = AppState::init(data_dir).await?;
    tracing::info!("LLMeet desktop started, api at {}", state.config.api_base_url);

    match state.auth().current_user().await {
        Some(user) => tracing::info!("signed in as {}", user.username),
        None => tracing::info!("not signed in"),
    }

    let notices = listener_fn(log_recording_notice);
    state.events.subscribe(EventKind::MergeComplete, notices.clone());
    state.events.ensure_connected();

    let mut connection = state.events.watch_connection_state();
    let watcher = tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let current = connection.borrow_and_update().clone();
            match current {
                ConnectionState::Connected => tracing::info!("event channel connected"),
                ConnectionState::Disconnected => tracing::warn!("event channel disconnected"),
                other => tracing::debug!("event channel {other:?}"),
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to wait for shutdown signal: {e}");
    }

    state.events.unsubscribe(EventKind::MergeComplete, &notices);
    state.events.disconnect().await;
    watcher.abort();
    tracing::info!("LLMeet desktop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_includes_url_when_present() {
        let env = EventEnvelope::parse(
            r#"{"event":"merge_complete","payload":{"meetingId":"m1","mergedUrl":"https://cdn/m1.mp4"}}"#,
        )
        .unwrap();
        assert_eq!(
            recording_notice(&env).as_deref(),
            Some("Recording for m1 is ready: https://cdn/m1.mp4")
        );
    }

    #[test]
    fn notice_for_flat_backend_message() {
        let env = EventEnvelope::parse(r#"{"event":"merge_complete","meeting_id":"m2"}"#).unwrap();
        assert_eq!(recording_notice(&env).as_deref(), Some("Recording for m2 is ready"));
    }

    #[tokio::test]
    async fn init_rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"event_base_url":"http://localhost:8000"}"#,
        )
        .unwrap();
        assert!(matches!(
            AppState::init(dir.path()).await,
            Err(LlmeetError::Config(_))
        ));
    }
}
