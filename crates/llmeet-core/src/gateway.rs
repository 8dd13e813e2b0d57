use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::config::join_url;
use crate::credentials::{ACCESS_TOKEN_KEY, CredentialStore};
use crate::errors::{LlmeetError, RequestError};
use crate::request::{Outcome, RequestSpec, UNAUTHORIZED};
use crate::session::{SESSION_EXPIRED_MESSAGE, SessionNotifier};

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Origin prepended to every request path unless the request overrides it.
    pub api_base_url: String,
    /// Automatic re-issues per call chain after a non-success status.
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            max_retries: 0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Retry bookkeeping for one logical call. Lives on the stack of `send`.
#[derive(Debug, Default)]
struct CallChain {
    retries: u32,
}

impl CallChain {
    /// Consume one retry if the budget allows it.
    fn try_retry(&mut self, max_retries: u32) -> bool {
        if self.retries < max_retries {
            self.retries += 1;
            true
        } else {
            false
        }
    }

    fn attempt(&self) -> u32 {
        self.retries + 1
    }
}

/// Remembers which credential was last invalidated so concurrent 401s
/// collapse into a single expiry.
#[derive(Debug, Default)]
struct ExpiryGuard {
    /// `None` until the first expiry; then the credential that was rejected.
    last_invalidated: Option<Option<String>>,
}

impl ExpiryGuard {
    fn already_handled(&self, rejected: Option<&str>) -> bool {
        match (&self.last_invalidated, rejected) {
            (None, _) => false,
            // Nothing stored any more: the user was already sent to login.
            (Some(_), None) => true,
            (Some(prev), Some(token)) => prev.as_deref() == Some(token),
        }
    }

    fn record(&mut self, rejected: Option<&str>) {
        self.last_invalidated = Some(rejected.map(str::to_string));
    }
}

enum Attempt {
    Response(reqwest::Response),
    NoResponse,
}

/// Single entry point for backend HTTP calls.
///
/// Attaches the stored bearer token, retries non-success statuses within a
/// per-call budget, and turns a final 401 on an authenticated call into a
/// session expiry (credential wiped, user sent back to login).
pub struct RequestGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    store: Arc<dyn CredentialStore>,
    notifier: Arc<dyn SessionNotifier>,
    expiry: Mutex<ExpiryGuard>,
}

impl RequestGateway {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Result<Self, LlmeetError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmeetError::Client(e.to_string()))?;
        Ok(Self::with_client(client, config, store, notifier))
    }

    pub fn with_client(
        client: reqwest::Client,
        config: GatewayConfig,
        store: Arc<dyn CredentialStore>,
        notifier: Arc<dyn SessionNotifier>,
    ) -> Self {
        Self {
            client,
            config,
            store,
            notifier,
            expiry: Mutex::new(ExpiryGuard::default()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Run one call chain to completion.
    pub async fn send(&self, spec: &RequestSpec) -> Outcome {
        let mut chain = CallChain::default();
        loop {
            let credential = if spec.requires_auth() {
                self.current_credential().await
            } else {
                None
            };

            let resp = match self.attempt(spec, credential.as_deref(), chain.attempt()).await {
                Attempt::Response(resp) => resp,
                Attempt::NoResponse => return Outcome::TransportError,
            };

            let status = resp.status();
            if status.is_success() {
                return Outcome::Success(resp);
            }

            if chain.try_retry(self.config.max_retries) {
                tracing::debug!(
                    "{} returned {}, retry {}/{}",
                    spec.path(),
                    status.as_u16(),
                    chain.retries,
                    self.config.max_retries
                );
                continue;
            }

            if status.as_u16() == UNAUTHORIZED && spec.requires_auth() {
                self.expire_session(credential.as_deref()).await;
            }
            return Outcome::Failure(status.as_u16());
        }
    }

    /// `send`, with the outcome mapped onto [`RequestError`].
    pub async fn send_checked(&self, spec: &RequestSpec) -> Result<reqwest::Response, RequestError> {
        self.send(spec).await.into_result(spec.requires_auth())
    }

    /// `send_checked`, then decode the body as JSON.
    pub async fn send_json<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T, RequestError> {
        let resp = self.send_checked(spec).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RequestError::Decode(e.to_string()))
    }

    async fn current_credential(&self) -> Option<String> {
        match self.store.get(ACCESS_TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!("credential lookup failed, sending without auth: {e}");
                None
            }
        }
    }

    async fn attempt(&self, spec: &RequestSpec, credential: Option<&str>, attempt: u32) -> Attempt {
        if spec.abort_signal().is_some_and(|t| t.is_cancelled()) {
            tracing::debug!("{} aborted before attempt {attempt}", spec.path());
            return Attempt::NoResponse;
        }

        let origin = spec.origin_override().unwrap_or(&self.config.api_base_url);
        let url = join_url(origin, spec.path());
        tracing::debug!("{} {url} (attempt {attempt})", spec.http_method().as_str());

        let mut req = self
            .client
            .request(spec.http_method().into(), &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = credential {
            req = req.bearer_auth(token);
        }
        if let Some(body) = spec.payload() {
            req = req.json(body);
        }

        let result = match spec.abort_signal() {
            Some(abort) => tokio::select! {
                _ = abort.cancelled() => {
                    tracing::debug!("{url} aborted in flight");
                    return Attempt::NoResponse;
                }
                r = req.send() => r,
            },
            None => req.send().await,
        };

        match result {
            Ok(resp) => Attempt::Response(resp),
            Err(e) => {
                tracing::error!("{url}: no response: {e}");
                Attempt::NoResponse
            }
        }
    }

    async fn expire_session(&self, rejected: Option<&str>) {
        let mut guard = self.expiry.lock().await;
        if guard.already_handled(rejected) {
            tracing::debug!("session expiry already handled for this credential");
            return;
        }
        guard.record(rejected);

        tracing::info!("credential rejected, expiring session");
        if let Err(e) = self.store.delete(ACCESS_TOKEN_KEY).await {
            tracing::warn!("failed to delete credential: {e}");
        }
        if let Err(e) = self.store.save().await {
            tracing::warn!("failed to persist credential deletion: {e}");
        }
        self.notifier.force_logout();
        self.notifier.navigate_to_login();
        self.notifier.notify_user(SESSION_EXPIRED_MESSAGE);
    }
}
