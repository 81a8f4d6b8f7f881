use std::sync::Arc;

use crate::instrument::CallContext;
use crate::upstream::{
    AuthBackend, AuthResponse, AuthStateListener, AuthSubscription, Credentials, Session,
    SignUpRequest, User,
};

use super::{ClientInner, track};

/// Auth calls, timed and counted but never cached.
pub struct AuthClient<B> {
    client: Arc<ClientInner<B>>,
}

impl<B: AuthBackend> AuthClient<B> {
    pub(super) fn new(client: Arc<ClientInner<B>>) -> Self {
        Self { client }
    }

    pub async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthResponse, B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("sign_in_with_password"),
            self.client.backend.sign_in_with_password(credentials),
        )
        .await
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<AuthResponse, B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("sign_up"),
            self.client.backend.sign_up(request),
        )
        .await
    }

    pub async fn sign_out(&self) -> Result<(), B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("sign_out"),
            self.client.backend.sign_out(),
        )
        .await
    }

    pub async fn get_session(&self) -> Result<Option<Session>, B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("get_session"),
            self.client.backend.get_session(),
        )
        .await
    }

    pub async fn get_user(&self, access_token: Option<&str>) -> Result<Option<User>, B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("get_user"),
            self.client.backend.get_user(access_token),
        )
        .await
    }

    pub async fn refresh_session(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<AuthResponse, B::AuthError> {
        track(
            &self.client.instrumentation,
            CallContext::auth("refresh_session"),
            self.client.backend.refresh_session(refresh_token),
        )
        .await
    }

    /// Register `listener` with the backend as-is. Not timed or counted.
    pub fn on_auth_state_change(&self, listener: AuthStateListener) -> AuthSubscription {
        self.client.backend.on_auth_state_change(listener)
    }
}
