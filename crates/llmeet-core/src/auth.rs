use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::credentials::{ACCESS_TOKEN_KEY, USER_INFO_KEY};
use crate::errors::{LlmeetError, RequestError};
use crate::gateway::RequestGateway;
use crate::request::RequestSpec;

const LOGIN_PATH: &str = "/api/auth/login";
const REGISTER_PATH: &str = "/api/auth/register";
const TIMEZONE_PATH: &str = "/auth/timezone";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{4,20}$").expect("static regex"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

const PASSWORD_SPECIALS: &str = "@$!%*?&";

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    /// Apply the backend's account rules before sending anything.
    pub fn validate(&self) -> Result<(), LlmeetError> {
        if !USERNAME_RE.is_match(&self.username) {
            return Err(LlmeetError::Validation(
                "username must be 4-20 letters, digits or underscores".into(),
            ));
        }
        if !EMAIL_RE.is_match(&self.email) {
            return Err(LlmeetError::Validation(format!(
                "invalid email address: '{}'",
                self.email
            )));
        }
        validate_password(&self.password)
    }
}

fn validate_password(password: &str) -> Result<(), LlmeetError> {
    let len = password.chars().count();
    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
    let ok = (8..=32).contains(&len)
        && allowed
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if ok {
        Ok(())
    } else {
        Err(LlmeetError::Validation(format!(
            "password must be 8-32 characters with upper and lower case letters, a digit and one of {PASSWORD_SPECIALS}"
        )))
    }
}

/// Body of a successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Profile persisted next to the token under `userInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub success: bool,
}

/// Account calls: login, registration, profile settings.
pub struct AuthService {
    gateway: Arc<RequestGateway>,
}

impl AuthService {
    pub fn new(gateway: Arc<RequestGateway>) -> Self {
        Self { gateway }
    }

    /// Log in and persist the returned token and profile.
    pub async fn signin(&self, credentials: &Credentials) -> Result<LoginResponse, LlmeetError> {
        let spec = RequestSpec::post(LOGIN_PATH).without_auth().json(credentials)?;
        let login: LoginResponse = self.gateway.send_json(&spec).await?;

        let user = StoredUser {
            username: login.username.clone(),
            user_id: login.user_id,
        };
        let user_json = serde_json::to_string(&user).map_err(|e| RequestError::Encode(e.to_string()))?;

        let store = self.gateway.credential_store();
        store.set(ACCESS_TOKEN_KEY, login.access_token.clone()).await?;
        store.set(USER_INFO_KEY, user_json).await?;
        store.save().await?;
        tracing::info!("signed in as {}", login.username);
        Ok(login)
    }

    pub async fn signup(&self, registration: &Registration) -> Result<Acknowledgement, LlmeetError> {
        registration.validate()?;
        let spec = RequestSpec::post(REGISTER_PATH).without_auth().json(registration)?;
        Ok(self.gateway.send_json::<Acknowledgement>(&spec).await?)
    }

    pub async fn set_timezone(&self, timezone: &str) -> Result<Acknowledgement, RequestError> {
        let spec = RequestSpec::post(TIMEZONE_PATH).body(serde_json::json!({ "timezone": timezone }));
        self.gateway.send_json(&spec).await
    }

    /// Forget the stored token and profile.
    pub async fn signout(&self) -> Result<(), LlmeetError> {
        let store = self.gateway.credential_store();
        store.delete(ACCESS_TOKEN_KEY).await?;
        store.delete(USER_INFO_KEY).await?;
        store.save().await?;
        Ok(())
    }

    pub async fn current_user(&self) -> Option<StoredUser> {
        let raw = self
            .gateway
            .credential_store()
            .get(USER_INFO_KEY)
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, email: &str, password: &str) -> Registration {
        Registration {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(registration("alice_01", "alice@example.com", "Passw0rd!").validate().is_ok());
    }

    #[test]
    fn username_rules() {
        assert!(registration("abc", "a@b.co", "Passw0rd!").validate().is_err());
        assert!(registration("has space", "a@b.co", "Passw0rd!").validate().is_err());
        assert!(registration(&"x".repeat(21), "a@b.co", "Passw0rd!").validate().is_err());
    }

    #[test]
    fn email_rules() {
        assert!(registration("alice", "alice.example.com", "Passw0rd!").validate().is_err());
        assert!(registration("alice", "alice@localhost", "Passw0rd!").validate().is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("Passw0rd!").is_ok());
        assert!(validate_password("short1!A").is_ok());
        assert!(validate_password("Sh0rt!").is_err());
        assert!(validate_password("password1!").is_err());
        assert!(validate_password("PASSWORD1!").is_err());
        assert!(validate_password("Password!!").is_err());
        assert!(validate_password("Password12").is_err());
        assert!(validate_password("Passw0rd!#").is_err());
    }

    #[test]
    fn stored_user_json_shape() {
        let user = StoredUser {
            username: "alice".into(),
            user_id: Some(7),
        };
        assert_eq!(
            serde_json::to_string(&user).unwrap(),
            r#"{"username":"alice","userId":7}"#
        );
    }

    #[test]
    fn login_response_accepts_camel_case() {
        let login: LoginResponse =
            serde_json::from_str(r#"{"accessToken":"jwt","userId":3,"username":"bob"}"#).unwrap();
        assert_eq!(login.access_token, "jwt");
        assert_eq!(login.user_id, Some(3));
        assert_eq!(login.email, None);
    }
}
