//! REST client for the administration backend.

use std::{fmt, time::Duration};

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    auth::{AuthContext, Credentials},
    config::ApiConfig,
    error::{ApiError, PayloadError},
    hub::transport::API_KEY_HEADER,
    models::{normalize_list, ApiResult, Envelope},
};

/// Prefix of every REST route below the base URL.
const API_PREFIX: &str = "api";

/// Resource collections exposed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Staff and administrator accounts.
    Users,
    /// Course catalogue.
    Courses,
    /// Rooms and labs.
    TeachingPlaces,
    /// Published schedules.
    Schedules,
    /// Login and token refresh.
    Authentications,
    /// Dashboard figures.
    Statistics,
    /// Bulk imports from spreadsheets.
    FromFileRegistrations,
}

impl Resource {
    /// Route segment of the collection.
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Users => "Users",
            Resource::Courses => "Courses",
            Resource::TeachingPlaces => "TeachingPlaces",
            Resource::Schedules => "Schedules",
            Resource::Authentications => "Authentications",
            Resource::Statistics => "Statistics",
            Resource::FromFileRegistrations => "FromFileRegistrations",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// JSON client with bearer and API key headers.
///
/// A `401` answer triggers exactly one token refresh and one retry of the
/// request; a second `401` clears the stored credential.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    auth: AuthContext,
}

impl ApiClient {
    /// Build a client for `config`, sharing `auth` with the hub session.
    pub fn new(config: &ApiConfig, auth: AuthContext) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base: base_url(&config.base_url)?,
            api_key: config.api_key.clone(),
            auth,
        })
    }

    /// Credentials used by this client.
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// URL of `resource` followed by `segments`.
    pub fn url(&self, resource: Resource, segments: &[&str]) -> Result<Url, ApiError> {
        let mut path = format!("{API_PREFIX}/{}", resource.path());
        for segment in segments {
            path.push('/');
            path.push_str(segment.trim_matches('/'));
        }
        Ok(self.base.join(&path)?)
    }

    /// `GET resource/segments...`.
    pub async fn get(&self, resource: Resource, segments: &[&str]) -> Result<Value, ApiError> {
        let url = self.url(resource, segments)?;
        self.send(Method::GET, url, None).await
    }

    /// `GET resource` normalised into a typed list.
    pub async fn list<T: DeserializeOwned>(&self, resource: Resource) -> Result<ApiResult<Vec<T>>, ApiError> {
        let body = self.get(resource, &[]).await?;
        Ok(normalize_list(body)?)
    }

    /// `POST resource/segments...` with a JSON body.
    pub async fn post(&self, resource: Resource, segments: &[&str], body: &Value) -> Result<Value, ApiError> {
        let url = self.url(resource, segments)?;
        self.send(Method::POST, url, Some(body)).await
    }

    /// `PUT resource/segments...` with a JSON body.
    pub async fn put(&self, resource: Resource, segments: &[&str], body: &Value) -> Result<Value, ApiError> {
        let url = self.url(resource, segments)?;
        self.send(Method::PUT, url, Some(body)).await
    }

    /// `DELETE resource/segments...`.
    pub async fn delete(&self, resource: Resource, segments: &[&str]) -> Result<Value, ApiError> {
        let url = self.url(resource, segments)?;
        self.send(Method::DELETE, url, None).await
    }

    /// Exchange a username and password for credentials and keep them.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials, ApiError> {
        let url = self.url(Resource::Authentications, &["login"])?;
        let body = json!({ "username": username, "password": password });
        let response = self.execute(Method::POST, url, Some(&body), false).await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ApiError::Unauthorized("invalid username or password".into()));
        }

        let credentials = credentials_from(read_body(response).await?)?;
        self.auth.set(credentials.clone());
        info!(username, "signed in");
        Ok(credentials)
    }

    /// Renew the access token with the stored refresh token.
    pub async fn refresh(&self) -> Result<Credentials, ApiError> {
        let current = self
            .auth
            .credentials()
            .ok_or_else(|| ApiError::Unauthorized("no credential to refresh".into()))?;
        let Some(refresh_token) = current.refresh_token.clone() else {
            self.auth.clear();
            return Err(ApiError::Unauthorized("no refresh token".into()));
        };

        let url = self.url(Resource::Authentications, &["refresh"])?;
        let body = json!({
            "accessToken": current.access_token,
            "refreshToken": refresh_token,
        });
        let response = self.execute(Method::POST, url, Some(&body), false).await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            self.auth.clear();
            return Err(ApiError::Unauthorized("refresh token rejected".into()));
        }

        let mut renewed = credentials_from(read_body(response).await?)?;
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }
        self.auth.set(renewed.clone());
        debug!("access token refreshed");
        Ok(renewed)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, ApiError> {
        let response = self.execute(method.clone(), url.clone(), body, true).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_body(response).await;
        }

        info!(%url, "request unauthorized, refreshing credential");
        self.refresh().await?;
        let retried = self.execute(method, url, body, true).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!("credential rejected after refresh");
            self.auth.clear();
            return Err(ApiError::Unauthorized("credential rejected after refresh".into()));
        }
        read_body(retried).await
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        authorized: bool,
    ) -> Result<Response, ApiError> {
        debug!(%method, %url, "api request");
        let mut request = self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key);
        if authorized {
            if let Some(credentials) = self.auth.credentials() {
                request = request.bearer_auth(credentials.access_token);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

fn base_url(raw: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn read_body(response: Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).map_err(PayloadError::from)?)
}

/// Server message of an error body, or the raw text.
fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            ["message", "errorMessage", "title", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| text.trim().to_string())
}

/// Credentials from a login or refresh answer, with or without an envelope.
fn credentials_from(body: Value) -> Result<Credentials, ApiError> {
    let body = match Envelope::detect(&body) {
        Some(envelope) => envelope
            .into_api_result()
            .into_result()?
            .ok_or(PayloadError::MissingField("data"))?,
        None => body,
    };
    let credentials: Credentials = serde_json::from_value(body).map_err(PayloadError::from)?;
    if !credentials.is_present() {
        return Err(PayloadError::MissingField("accessToken").into());
    }
    Ok(credentials)
}
