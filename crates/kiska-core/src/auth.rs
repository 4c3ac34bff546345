//! Credential service contract and an in-memory implementation.
//!
//! The hosting application decides which top-level view to show from the
//! auth-changed subscription; the turn coordinator only ever calls `sign_out`.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// Minimum accepted secret length.
pub const MIN_SECRET_LEN: usize = 6;

/// Failed sign-in attempts tolerated before an account is throttled.
const MAX_FAILED_ATTEMPTS: u32 = 5;

static EMAIL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern is valid")
});

/// Closed set of credential failures the presentation layer knows how to word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    NotFound,
    WrongSecret,
    MalformedIdentifier,
    InvalidCredential,
    AlreadyInUse,
    WeakSecret,
    Network,
    Disabled,
    RateLimited,
}

impl AuthErrorKind {
    /// Fixed user-facing message for this failure.
    pub fn message(self) -> &'static str {
        match self {
            Self::NotFound => "No account found with this email address.",
            Self::WrongSecret => "Incorrect password. Please try again.",
            Self::MalformedIdentifier => "Please enter a valid email address.",
            Self::InvalidCredential => "Invalid login credentials. Please try again.",
            Self::AlreadyInUse => "This email is already in use. Please try another one.",
            Self::WeakSecret => "Password is too weak. It should be at least 6 characters.",
            Self::Network => "Network error. Please check your connection.",
            Self::Disabled => "This account has been disabled.",
            Self::RateLimited => "Too many failed login attempts. Please try again later.",
        }
    }

    /// Map a provider error code to a known kind.
    ///
    /// Accepts both the SDK style (`auth/user-not-found`) and the REST style
    /// (`EMAIL_NOT_FOUND`, optionally followed by ` : detail`).
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.split(" : ").next().unwrap_or(code).trim();
        let kind = match code {
            "auth/user-not-found" | "EMAIL_NOT_FOUND" => Self::NotFound,
            "auth/wrong-password" | "INVALID_PASSWORD" => Self::WrongSecret,
            "auth/invalid-email" | "INVALID_EMAIL" | "MISSING_EMAIL" => Self::MalformedIdentifier,
            "auth/invalid-credential" | "INVALID_LOGIN_CREDENTIALS" => Self::InvalidCredential,
            "auth/email-already-in-use" | "EMAIL_EXISTS" => Self::AlreadyInUse,
            "auth/weak-password" | "WEAK_PASSWORD" => Self::WeakSecret,
            "auth/network-request-failed" => Self::Network,
            "auth/user-disabled" | "USER_DISABLED" => Self::Disabled,
            "auth/too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::RateLimited,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{}", .0.message())]
    Known(AuthErrorKind),

    /// Unrecognized provider code; carries the provider's own message.
    #[error("{0}")]
    Provider(String),
}

impl AuthError {
    /// Build an error from a provider code, falling back to its raw message.
    pub fn from_provider(code: &str, raw_message: &str) -> Self {
        match AuthErrorKind::from_code(code) {
            Some(kind) => Self::Known(kind),
            None => Self::Provider(raw_message.to_string()),
        }
    }

    pub fn kind(&self) -> Option<AuthErrorKind> {
        match self {
            Self::Known(kind) => Some(*kind),
            Self::Provider(_) => None,
        }
    }
}

impl From<AuthErrorKind> for AuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self::Known(kind)
    }
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

/// External credential service.
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn sign_in(&self, email: &str, secret: &str) -> Result<User, AuthError>;

    async fn sign_up(&self, email: &str, secret: &str) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn reset_password(&self, email: &str) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<User>;

    /// Auth-changed subscription: yields the signed-in user or `None`.
    fn subscribe(&self) -> watch::Receiver<Option<User>>;
}

/// Check identifier shape and secret strength before contacting a provider.
pub fn validate_credentials(email: &str, secret: &str) -> Result<(), AuthError> {
    if !EMAIL_RE.is_match(email.trim()) {
        return Err(AuthErrorKind::MalformedIdentifier.into());
    }
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(AuthErrorKind::WeakSecret.into());
    }
    Ok(())
}

#[derive(Debug)]
struct Account {
    uid: String,
    secret_hash: String,
    disabled: bool,
    failed_attempts: u32,
}

/// In-memory credential service for local sessions and tests.
pub struct LocalCredentialService {
    accounts: Mutex<HashMap<String, Account>>,
    auth_tx: watch::Sender<Option<User>>,
}

impl Default for LocalCredentialService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCredentialService {
    pub fn new() -> Self {
        let (auth_tx, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            auth_tx,
        }
    }

    /// Disable an account; later sign-ins fail with [`AuthErrorKind::Disabled`].
    pub fn disable(&self, email: &str) -> bool {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        match accounts.get_mut(&normalize(email)) {
            Some(account) => {
                account.disabled = true;
                true
            }
            None => false,
        }
    }

    fn publish(&self, user: Option<User>) {
        self.auth_tx.send_replace(user);
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_secret(uid: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl CredentialService for LocalCredentialService {
    async fn sign_in(&self, email: &str, secret: &str) -> Result<User, AuthError> {
        if !EMAIL_RE.is_match(email.trim()) {
            return Err(AuthErrorKind::MalformedIdentifier.into());
        }
        let key = normalize(email);

        let uid = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            let account = accounts
                .get_mut(&key)
                .ok_or(AuthError::Known(AuthErrorKind::NotFound))?;

            if account.disabled {
                return Err(AuthErrorKind::Disabled.into());
            }
            if account.failed_attempts >= MAX_FAILED_ATTEMPTS {
                return Err(AuthErrorKind::RateLimited.into());
            }
            if account.secret_hash != hash_secret(&account.uid, secret) {
                account.failed_attempts += 1;
                debug!(attempts = account.failed_attempts, "Rejected sign-in");
                return Err(AuthErrorKind::WrongSecret.into());
            }
            account.failed_attempts = 0;
            account.uid.clone()
        };

        let user = User {
            uid,
            email: key,
            signed_in_at: Utc::now(),
        };
        info!(uid = %user.uid, "Signed in");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn sign_up(&self, email: &str, secret: &str) -> Result<User, AuthError> {
        validate_credentials(email, secret)?;
        let key = normalize(email);

        let uid = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            if accounts.contains_key(&key) {
                return Err(AuthErrorKind::AlreadyInUse.into());
            }
            let uid = uuid::Uuid::new_v4().simple().to_string();
            accounts.insert(
                key.clone(),
                Account {
                    secret_hash: hash_secret(&uid, secret),
                    uid: uid.clone(),
                    disabled: false,
                    failed_attempts: 0,
                },
            );
            uid
        };

        let user = User {
            uid,
            email: key,
            signed_in_at: Utc::now(),
        };
        info!(uid = %user.uid, "Account created");
        self.publish(Some(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(user) = self.current_user() {
            info!(uid = %user.uid, "Signed out");
        }
        self.publish(None);
        Ok(())
    }

    async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        if !EMAIL_RE.is_match(email.trim()) {
            return Err(AuthErrorKind::MalformedIdentifier.into());
        }
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let account = accounts
            .get_mut(&normalize(email))
            .ok_or(AuthError::Known(AuthErrorKind::NotFound))?;
        // A local store has no mailbox to deliver a reset link to; lift the throttle instead.
        account.failed_attempts = 0;
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
    fn test_known_codes_map_to_fixed_messages() {
        let err = AuthError::from_provider("auth/wrong-password", "raw");
        assert_eq!(err.to_string(), "Incorrect password. Please try again.");

        let err = AuthError::from_provider("EMAIL_EXISTS", "raw");
        assert_eq!(err.kind(), Some(AuthErrorKind::AlreadyInUse));

        let err = AuthError::from_provider("WEAK_PASSWORD : Password should be at least 6 characters", "raw");
        assert_eq!(err.kind(), Some(AuthErrorKind::WeakSecret));
    }

    #[test]
    fn test_unknown_code_falls_back_to_raw_message() {
        let err = AuthError::from_provider("auth/quota-exceeded", "Quota exceeded for project.");
        assert_eq!(err, AuthError::Provider("Quota exceeded for project.".into()));
        assert_eq!(err.to_string(), "Quota exceeded for project.");
    }

    #[test]
    fn test_validate_credentials() {
        assert!(validate_credentials("ada@example.com", "secret1").is_ok());
        assert_eq!(
            validate_credentials("not-an-email", "secret1").unwrap_err().kind(),
            Some(AuthErrorKind::MalformedIdentifier)
        );
        assert_eq!(
            validate_credentials("ada@example.com", "abc").unwrap_err().kind(),
            Some(AuthErrorKind::WeakSecret)
        );
    }

    #[tokio::test]
    async fn test_sign_up_sign_in_sign_out_publishes_changes() {
        let service = LocalCredentialService::new();
        let mut rx = service.subscribe();
        assert!(rx.borrow().is_none());

        let user = service.sign_up("Ada@Example.com", "hunter22").await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        service.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
        assert!(service.current_user().is_none());

        let again = service.sign_in("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(again.uid, user.uid);
    }

    #[tokio::test]
    async fn test_sign_in_failures() {
        let service = LocalCredentialService::new();
        service.sign_up("bob@example.com", "password").await.unwrap();

        let err = service.sign_in("nobody@example.com", "password").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::NotFound));

        let err = service.sign_in("bob@example.com", "wrong-one").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::WrongSecret));

        let err = service.sign_up("bob@example.com", "password").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::AlreadyInUse));

        assert!(service.disable("bob@example.com"));
        let err = service.sign_in("bob@example.com", "password").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::Disabled));
    }

    #[tokio::test]
    async fn test_repeated_failures_throttle_until_reset() {
        let service = LocalCredentialService::new();
        service.sign_up("eve@example.com", "correct-horse").await.unwrap();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            let _ = service.sign_in("eve@example.com", "nope-nope").await;
        }
        let err = service.sign_in("eve@example.com", "correct-horse").await.unwrap_err();
        assert_eq!(err.kind(), Some(AuthErrorKind::RateLimited));

        service.reset_password("eve@example.com").await.unwrap();
        assert!(service.sign_in("eve@example.com", "correct-horse").await.is_ok());
    }
}
