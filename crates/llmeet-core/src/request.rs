use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::RequestError;

/// Numeric code reported for calls that never reached the server.
pub const TRANSPORT_ERROR_CODE: i32 = -1;

pub const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    Get,
    #[default]
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One backend call, as handed to [`RequestGateway::send`](crate::gateway::RequestGateway::send).
///
/// Built once and then only read; retries re-issue the same spec.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    path: String,
    body: Option<Value>,
    method: Method,
    abort: Option<CancellationToken>,
    requires_auth: bool,
    base_override: Option<String>,
}

impl RequestSpec {
    /// POST to `path` with credentials attached.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            body: None,
            method: Method::Post,
            abort: None,
            requires_auth: true,
            base_override: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path).method(Method::Get)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` into the request payload.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, RequestError> {
        let value = serde_json::to_value(body).map_err(|e| RequestError::Encode(e.to_string()))?;
        Ok(self.body(value))
    }

    pub fn abort_on(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Send to `origin` instead of the gateway's default API origin.
    pub fn base_override(mut self, origin: impl Into<String>) -> Self {
        self.base_override = Some(origin.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn http_method(&self) -> Method {
        self.method
    }

    pub fn abort_signal(&self) -> Option<&CancellationToken> {
        self.abort.as_ref()
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn origin_override(&self) -> Option<&str> {
        self.base_override.as_deref()
    }
}

/// Result of one call chain. Exactly one variant per `send`.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx response; the body is left unread for the caller.
    Success(reqwest::Response),
    /// Non-success status after the retry budget was spent.
    Failure(u16),
    /// No response was received.
    TransportError,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Legacy numeric view: HTTP status, or `-1` for transport errors.
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Success(resp) => i32::from(resp.status().as_u16()),
            Outcome::Failure(status) => i32::from(*status),
            Outcome::TransportError => TRANSPORT_ERROR_CODE,
        }
    }

    /// Map onto [`RequestError`]. A 401 on an authenticated call is
    /// reported as `AuthExpired`.
    pub fn into_result(self, requires_auth: bool) -> Result<reqwest::Response, RequestError> {
        match self {
            Outcome::Success(resp) => Ok(resp),
            Outcome::Failure(UNAUTHORIZED) if requires_auth => Err(RequestError::AuthExpired),
            Outcome::Failure(status) => Err(RequestError::RequestFailed(status)),
            Outcome::TransportError => Err(RequestError::Transport),
        }
    }
}
