//! Authentication collaborator.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::UpstreamFailure;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub credentials: Credentials,
    /// User metadata stored alongside the account.
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Callback invoked on every auth state transition.
pub type AuthStateListener = Box<dyn Fn(AuthChangeEvent, Option<&Session>) + Send + Sync>;

/// Handle for a registered [`AuthStateListener`].
///
/// Dropping the handle keeps the listener registered; call
/// [`AuthSubscription::unsubscribe`] to remove it.
pub struct AuthSubscription {
    id: Uuid,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl AuthSubscription {
    pub fn new(id: Uuid, unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    type AuthError: UpstreamFailure;

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, Self::AuthError>;

    async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, Self::AuthError>;

    async fn sign_out(&self) -> Result<(), Self::AuthError>;

    async fn get_session(&self) -> Result<Option<Session>, Self::AuthError>;

    /// Resolve the user behind `access_token`, or the current session's user.
    async fn get_user(&self, access_token: Option<&str>) -> Result<Option<User>, Self::AuthError>;

    /// Exchange `refresh_token` (or the current session's) for a new session.
    async fn refresh_session(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<AuthResponse, Self::AuthError>;

    fn on_auth_state_change(&self, listener: AuthStateListener) -> AuthSubscription;
}
