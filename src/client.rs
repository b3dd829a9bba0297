use reqwest::{multipart, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::dto::{AuthResponse, LoginRequest, RegisterRequest, UserEnvelope},
    error::ErrorBody,
    session::{ClientSession, TokenStore},
    users::{
        dto::{CreateUserRequest, CreatedUser, MessageResponse, SearchPage, UpdateUserRequest},
        repo_types::PublicUser,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Api { status: StatusCode, message: String },

    #[error("not logged in")]
    NotLoggedIn,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status(),
            ClientError::NotLoggedIn => None,
        }
    }
}

/// Image attached to a profile edit.
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct ProfileForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<ImageFile>,
}

/// HTTP client for the `/api` surface. Calls that change who is logged in
/// take the session and update it.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

async fn parse<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res.json::<T>().await?);
    }
    let message = match res.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    debug!(%status, %message, "api error");
    Err(ClientError::Api { status, message })
}

impl ApiClient {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn authed<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        req: RequestBuilder,
    ) -> Result<RequestBuilder, ClientError> {
        let token = session.token().ok_or(ClientError::NotLoggedIn)?;
        Ok(req.bearer_auth(token))
    }

    async fn authenticate<S: TokenStore>(
        &self,
        session: &mut ClientSession<S>,
        req: RequestBuilder,
    ) -> Result<PublicUser, ClientError> {
        session.begin();
        let res = match req.send().await {
            Ok(res) => parse::<AuthResponse>(res).await,
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(auth) => {
                let user = auth.user.clone();
                session.authenticated(auth);
                Ok(user)
            }
            Err(e) => {
                session.rejected(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn register<S: TokenStore>(
        &self,
        session: &mut ClientSession<S>,
        body: &RegisterRequest,
    ) -> Result<PublicUser, ClientError> {
        let req = self.http.post(self.url("/auth/register")).json(body);
        self.authenticate(session, req).await
    }

    pub async fn login<S: TokenStore>(
        &self,
        session: &mut ClientSession<S>,
        body: &LoginRequest,
    ) -> Result<PublicUser, ClientError> {
        let req = self.http.post(self.url("/auth/login")).json(body);
        self.authenticate(session, req).await
    }

    /// Confirms a rehydrated token. A token the server refuses is dropped
    /// from the session and `Ok(None)` is returned.
    pub async fn restore<S: TokenStore>(
        &self,
        session: &mut ClientSession<S>,
    ) -> Result<Option<PublicUser>, ClientError> {
        if !session.is_authenticated() {
            return Ok(None);
        }
        session.begin();
        let req = self.authed(session, self.http.get(self.url("/auth/me")))?;
        let res = match req.send().await {
            Ok(res) => parse::<UserEnvelope>(res).await,
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(env) => {
                session.set_user(env.user.clone());
                Ok(Some(env.user))
            }
            Err(ClientError::Api { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                warn!("stored token rejected; clearing session");
                session.restore_failed();
                Ok(None)
            }
            Err(e) => {
                session.rejected(e.to_string());
                Err(e)
            }
        }
    }

    pub fn logout<S: TokenStore>(&self, session: &mut ClientSession<S>) {
        session.logout();
    }

    pub async fn update_profile<S: TokenStore>(
        &self,
        session: &mut ClientSession<S>,
        form: ProfileForm,
    ) -> Result<PublicUser, ClientError> {
        let mut body = multipart::Form::new();
        if let Some(name) = form.name {
            body = body.text("name", name);
        }
        if let Some(email) = form.email {
            body = body.text("email", email);
        }
        if let Some(image) = form.image {
            let part = multipart::Part::bytes(image.bytes)
                .file_name(image.file_name)
                .mime_str(&image.content_type)?;
            body = body.part("profileImage", part);
        }

        let req = self.authed(session, self.http.put(self.url("/users/profile")))?;
        session.begin();
        let res = match req.multipart(body).send().await {
            Ok(res) => parse::<UserEnvelope>(res).await,
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(env) => {
                session.set_user(env.user.clone());
                Ok(env.user)
            }
            Err(e) => {
                session.rejected(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn get_user<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        id: Uuid,
    ) -> Result<PublicUser, ClientError> {
        let req = self.authed(session, self.http.get(self.url(&format!("/users/{id}"))))?;
        parse(req.send().await?).await
    }

    pub async fn list_users<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
    ) -> Result<Vec<PublicUser>, ClientError> {
        let req = self.authed(session, self.http.get(self.url("/users")))?;
        parse(req.send().await?).await
    }

    pub async fn search_users<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        q: &str,
        page: i64,
        limit: i64,
    ) -> Result<SearchPage, ClientError> {
        let req = self
            .authed(session, self.http.get(self.url("/users/search")))?
            .query(&[("q", q.to_string()), ("page", page.to_string()), ("limit", limit.to_string())]);
        parse(req.send().await?).await
    }

    pub async fn create_user<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        body: &CreateUserRequest,
    ) -> Result<CreatedUser, ClientError> {
        let req = self.authed(session, self.http.post(self.url("/users")))?.json(body);
        parse(req.send().await?).await
    }

    pub async fn update_user<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        id: Uuid,
        body: &UpdateUserRequest,
    ) -> Result<PublicUser, ClientError> {
        let req = self
            .authed(session, self.http.put(self.url(&format!("/users/{id}"))))?
            .json(body);
        parse(req.send().await?).await
    }

    pub async fn delete_user<S: TokenStore>(
        &self,
        session: &ClientSession<S>,
        id: Uuid,
    ) -> Result<String, ClientError> {
        let req = self.authed(session, self.http.delete(self.url(&format!("/users/{id}"))))?;
        let res: MessageResponse = parse(req.send().await?).await?;
        Ok(res.message)
    }
}
