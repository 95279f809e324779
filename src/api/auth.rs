use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::to_body;
use crate::client::error::ClientError;
use crate::client::ApiClient;
use crate::security::session::SessionUser;
use crate::transport::{ApiRequest, Transport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_address: Option<String>,
}

impl<T: Transport> ApiClient<T> {
    pub async fn register(&self, user: &SignUpRequest) -> Result<Value, ClientError> {
        self.send(ApiRequest::post("/auth/signup", to_body(user)?).without_refresh())
            .await
    }

    /// Sign in and cache the returned access token and user metadata.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<Value, ClientError> {
        let body = self
            .send(ApiRequest::post("/auth/login", to_body(credentials)?).without_refresh())
            .await?;
        self.remember_sign_in(&body).await;
        Ok(body)
    }

    pub async fn google_login(&self, token_id: &str) -> Result<Value, ClientError> {
        let body = self
            .send(
                ApiRequest::post("/auth/oauth2/google", json!({ "tokenId": token_id }))
                    .without_refresh(),
            )
            .await?;
        self.remember_sign_in(&body).await;
        Ok(body)
    }

    /// Sign out remotely; the local session is cleared even if the call fails.
    pub async fn logout(&self) -> Result<Value, ClientError> {
        let result = self
            .send(ApiRequest::post("/auth/logout", json!({})).without_refresh())
            .await;
        self.session().sign_out().await;
        result
    }

    pub async fn verify_email(&self, token: &str) -> Result<Value, ClientError> {
        self.send(ApiRequest::get("/auth/verify-email").with_query("token", token))
            .await
    }

    pub async fn resend_verification(&self, email: &str) -> Result<Value, ClientError> {
        self.send(
            ApiRequest::new(Method::POST, "/auth/resend-verification").with_query("email", email),
        )
        .await
    }

    pub async fn current_user(&self) -> Result<Value, ClientError> {
        self.send(ApiRequest::get("/auth/user/me")).await
    }

    pub async fn update_profile(
        &self,
        profile: &ProfileUpdateRequest,
    ) -> Result<Value, ClientError> {
        let body = self
            .send(ApiRequest::put("/auth/user/update", to_body(profile)?))
            .await?;
        let name = profile.name.clone();
        self.session().update_user(|u| u.name = Some(name)).await;
        Ok(body)
    }

    /// Whether the current session is accepted by the peer, with its user.
    pub async fn check_auth(&self) -> (bool, Option<Value>) {
        match self.current_user().await {
            Ok(user) => (true, Some(user)),
            Err(_) => (false, None),
        }
    }

    async fn remember_sign_in(&self, body: &Value) {
        let token = body
            .get("accessToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.session()
            .sign_in(SessionUser::from_auth_response(body), token)
            .await;
    }
}
