//! Firebase Identity Toolkit credential service (email + password).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use kiska_core::auth::{AuthError, AuthErrorKind, CredentialService, User, validate_credentials};

const IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OobRequest<'a> {
    request_type: &'a str,
    email: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    email: String,
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a failed Identity Toolkit response body to an [`AuthError`].
pub fn map_error_body(body: &str) -> AuthError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => AuthError::from_provider(&envelope.error.message, &envelope.error.message),
        Err(_) => AuthError::Provider(body.trim().to_string()),
    }
}

struct Session {
    user: User,
    id_token: String,
}

pub struct FirebaseCredentialService {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    session: Mutex<Option<Session>>,
    auth_tx: watch::Sender<Option<User>>,
}

impl FirebaseCredentialService {
    pub fn new(api_key: impl Into<String>) -> Self {
        let (auth_tx, _) = watch::channel(None);
        Self {
            api_key: api_key.into(),
            base_url: IDENTITY_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            session: Mutex::new(None),
            auth_tx,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// ID token of the signed-in user, for calling authenticated backends.
    pub fn id_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.id_token.clone())
    }

    fn url(&self, method: &str) -> String {
        format!("{}/accounts:{method}?key={}", self.base_url, self.api_key)
    }

    async fn post<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<String, AuthError> {
        debug!(method, "Identity Toolkit request");
        let resp = self
            .client
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(method, error = %e, "Identity Toolkit unreachable");
                AuthError::Known(AuthErrorKind::Network)
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|_| AuthError::Known(AuthErrorKind::Network))?;
        if !status.is_success() {
            return Err(map_error_body(&text));
        }
        Ok(text)
    }

    async fn password_call(&self, method: &str, email: &str, secret: &str) -> Result<User, AuthError> {
        let body = self
            .post(
                method,
                &PasswordRequest {
                    email: email.trim(),
                    password: secret,
                    return_secure_token: true,
                },
            )
            .await?;
        let resp: PasswordResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Provider(e.to_string()))?;

        let user = User {
            uid: resp.local_id,
            email: resp.email,
            signed_in_at: Utc::now(),
        };
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(Session {
            user: user.clone(),
            id_token: resp.id_token,
        });
        self.auth_tx.send_replace(Some(user.clone()));
        Ok(user)
    }
}

#[async_trait]
impl CredentialService for FirebaseCredentialService {
    async fn sign_in(&self, email: &str, secret: &str) -> Result<User, AuthError> {
        let user = self.password_call("signInWithPassword", email, secret).await?;
        info!(uid = %user.uid, "Signed in");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, secret: &str) -> Result<User, AuthError> {
        validate_credentials(email, secret)?;
        let user = self.password_call("signUp", email, secret).await?;
        info!(uid = %user.uid, "Account created");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(session) = session {
            info!(uid = %session.user.uid, "Signed out");
        }
        self.auth_tx.send_replace(None);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.post(
            "sendOobCode",
            &OobRequest {
                request_type: "PASSWORD_RESET",
                email: email.trim(),
            },
        )
        .await?;
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        self.auth_tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.auth_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_error_codes_map_to_kinds() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_NOT_FOUND","errors":[]}}"#;
        assert_eq!(map_error_body(body).kind(), Some(AuthErrorKind::NotFound));

        let body = r#"{"error":{"code":400,"message":"WEAK_PASSWORD : Password should be at least 6 characters"}}"#;
        assert_eq!(map_error_body(body).kind(), Some(AuthErrorKind::WeakSecret));
    }

    #[test]
    fn test_unknown_codes_keep_provider_message() {
        let body = r#"{"error":{"code":400,"message":"OPERATION_NOT_ALLOWED"}}"#;
        assert_eq!(
            map_error_body(body),
            AuthError::Provider("OPERATION_NOT_ALLOWED".into())
        );
        assert_eq!(
            map_error_body("<html>bad gateway</html>\n"),
            AuthError::Provider("<html>bad gateway</html>".into())
        );
    }

    #[test]
    fn test_request_urls() {
        let service = FirebaseCredentialService::new("AIza-test").with_base_url("http://localhost:9099/v1/");
        assert_eq!(
            service.url("signUp"),
            "http://localhost:9099/v1/accounts:signUp?key=AIza-test"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let service = FirebaseCredentialService::new("AIza-test").with_base_url("http://127.0.0.1:9");
        let err = service.sign_in("ada@example.com", "hunter22").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::Network));
        assert!(service.current_user().is_none());
        assert!(service.id_token().is_none());
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_calling_out() {
        let service = FirebaseCredentialService::new("AIza-test").with_base_url("http://127.0.0.1:9");
        let err = service.sign_up("ada@example.com", "abc").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::WeakSecret));
    }
}
