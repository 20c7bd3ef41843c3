use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use parley_sync::{ChatApi, FetchError, UserDirectory};
use parley_types::{LoginRequest, LoginResponse, MessageDto, ParticipantId, Role, UserDetail};

/// REST client for the chat server. Every request after login carries the
/// session token as a bearer credential.
#[derive(Clone)]
pub struct RestApi {
    client: Client,
    base_url: String,
    token: String,
}

impl RestApi {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    /// Exchange credentials for a token and the user's profile.
    pub async fn login(base_url: &str, email: &str, password: &str) -> Result<LoginResponse, FetchError> {
        let url = format!("{}/login", base_url.trim_end_matches('/'));
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            role: Role::User,
        };
        let resp = Client::new()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        decode(check(resp).await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response, FetchError> {
        debug!("GET {}", path);
        self.client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(request_error)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let resp = self.get(path).await?;
        decode(check(resp).await?).await
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    FetchError::Request(e.to_string())
}

async fn check(resp: Response) -> Result<Response, FetchError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, FetchError> {
    resp.json()
        .await
        .map_err(|e| FetchError::Decode(e.to_string()))
}

#[async_trait]
impl UserDirectory for RestApi {
    async fn fetch_detail(&self, id: ParticipantId) -> Result<UserDetail, FetchError> {
        self.get_json(&format!("/details/{}", id)).await
    }
}

#[async_trait]
impl ChatApi for RestApi {
    async fn fetch_summaries(&self, self_id: ParticipantId) -> Result<Vec<MessageDto>, FetchError> {
        let resp = self.get(&format!("/getting/{}", self_id)).await?;
        // a user without conversations gets a 404
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        decode(check(resp).await?).await
    }

    async fn fetch_history(
        &self,
        self_id: ParticipantId,
        other: ParticipantId,
    ) -> Result<Vec<MessageDto>, FetchError> {
        self.get_json(&format!("/api/messages/chat/{}/{}", self_id, other))
            .await
    }

    async fn list_users(&self) -> Result<Vec<UserDetail>, FetchError> {
        self.get_json("/dropdown").await
    }
}
