//! REST client for the marketplace back end.
//!
//! Every authenticated call carries the token from the injected
//! [`CredentialProvider`] in the `Authentication-Token` header, read at
//! call time. A missing token fails locally instead of sending an empty
//! header.
//!
//! ERROR HANDLING
//! ==============
//! 401 becomes [`ApiError::Unauthorized`]. Other non-success statuses carry
//! the server's `error`/`message` text so callers can show it verbatim.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::types::{
    ActivationResponse, AssignedRequest, BookingResponse, ClosedService, CustomerRequest, ExportStarted,
    LoginRequest, LoginResponse, MessageResponse, Registration, RequestStatus, RequestUpdate, ReviewBody,
    Service, ServiceInput, StatusChange, User,
};
use crate::config::PortalConfig;
use crate::export::{ExportTransport, PollReply, StartReply};
use crate::session::CredentialProvider;

pub const AUTH_HEADER: &str = "Authentication-Token";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not logged in; run `portal login` or set PORTAL_AUTH_TOKEN")]
    MissingCredential,
    #[error("Authentication required")]
    Unauthorized,
    #[error("server returned HTTP {status}: {message}")]
    Server { status: u16, message: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Which credential rule a request follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    /// Token required; 401 means the token was rejected.
    Required,
    /// Token sent when present (public catalogue).
    Optional,
    /// No token; 401 is an ordinary failure such as a wrong password.
    None,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    /// Build a client for `config.base_url` with the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &PortalConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()?;
        Ok(Self { http, base_url: config.base_url.clone(), credentials })
    }

    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// `POST /login`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Server`] with the server's reason on bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = self.request(Method::POST, "/login", Auth::None)?;
        send_json(request.json(&LoginRequest { email, password }), Auth::None).await
    }

    /// `POST /register`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Server`] when the back end rejects the sign-up.
    pub async fn register(&self, registration: &Registration) -> Result<MessageResponse, ApiError> {
        let request = self.request(Method::POST, "/register", Auth::None)?;
        send_json(request.json(registration), Auth::None).await
    }

    /// `GET /users` (admin)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get_json("/users").await
    }

    /// `POST /activate/user/{id}` (admin). Flips the account's active flag.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn toggle_user_activation(&self, user_id: i64) -> Result<ActivationResponse, ApiError> {
        let request = self.request(Method::POST, &format!("/activate/user/{user_id}"), Auth::Required)?;
        send_json(request, Auth::Required).await
    }

    // =========================================================================
    // SERVICES
    // =========================================================================

    /// `GET /api/service`
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn list_services(&self) -> Result<Vec<Service>, ApiError> {
        let request = self.request(Method::GET, "/api/service", Auth::Optional)?;
        send_json(request, Auth::Optional).await
    }

    /// `POST /api/service` (admin)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn create_service(&self, service: &ServiceInput) -> Result<MessageResponse, ApiError> {
        self.send_body(Method::POST, "/api/service", service).await
    }

    /// `PUT /api/service/{id}` (admin)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn update_service(&self, service_id: i64, service: &ServiceInput) -> Result<MessageResponse, ApiError> {
        self.send_body(Method::PUT, &format!("/api/service/{service_id}"), service)
            .await
    }

    /// `DELETE /api/service/{id}` (admin)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn delete_service(&self, service_id: i64) -> Result<MessageResponse, ApiError> {
        let request = self.request(Method::DELETE, &format!("/api/service/{service_id}"), Auth::Required)?;
        send_json(request, Auth::Required).await
    }

    /// `POST /book/{id}` (customer)
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Server`] when no professional is available.
    pub async fn book_service(&self, service_id: i64) -> Result<BookingResponse, ApiError> {
        let request = self.request(Method::POST, &format!("/book/{service_id}"), Auth::Required)?;
        send_json(request, Auth::Required).await
    }

    // =========================================================================
    // SERVICE REQUESTS
    // =========================================================================

    /// `GET /api/my-services` (customer)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn my_services(&self) -> Result<Vec<CustomerRequest>, ApiError> {
        self.get_json("/api/my-services").await
    }

    /// `GET /api/my-requests` (professional)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn my_requests(&self) -> Result<Vec<AssignedRequest>, ApiError> {
        self.get_json("/api/my-requests").await
    }

    /// `PUT /api/request/{id}/status`
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Server`] when the caller may not make this change.
    pub async fn update_request_status(&self, request_id: i64, status: RequestStatus) -> Result<RequestUpdate, ApiError> {
        self.send_body(Method::PUT, &format!("/api/request/{request_id}/status"), &StatusChange { status })
            .await
    }

    /// `PUT /api/request/{id}/review` (customer, completed requests only)
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Server`] when the request is not reviewable.
    pub async fn submit_review(&self, request_id: i64, review: &str) -> Result<RequestUpdate, ApiError> {
        self.send_body(Method::PUT, &format!("/api/request/{request_id}/review"), &ReviewBody { review })
            .await
    }

    /// `GET /api/services/closed` (admin)
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn closed_services(&self) -> Result<Vec<ClosedService>, ApiError> {
        self.get_json("/api/services/closed").await
    }

    // =========================================================================
    // PLUMBING
    // =========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/get-csv/{task}` with the task id as a single encoded segment.
    pub(crate) fn task_url(&self, task_id: &str) -> Result<Url, ApiError> {
        let mut url = parse_url(&self.url("/get-csv"))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.clone()))?
            .push(task_id);
        Ok(url)
    }

    fn request(&self, method: Method, path: &str, auth: Auth) -> Result<RequestBuilder, ApiError> {
        self.request_url(method, parse_url(&self.url(path))?, auth)
    }

    fn request_url(&self, method: Method, url: Url, auth: Auth) -> Result<RequestBuilder, ApiError> {
        debug!(%method, path = url.path(), "api request");
        let request = self.http.request(method, url);
        let token = self.credentials.auth_token();
        match (auth, token) {
            (Auth::None, _) | (Auth::Optional, None) => Ok(request),
            (Auth::Required, None) => Err(ApiError::MissingCredential),
            (Auth::Required | Auth::Optional, Some(token)) => {
                Ok(request.header(AUTH_HEADER, HeaderValue::from_str(&token)?))
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::GET, path, Auth::Required)?;
        send_json(request, Auth::Required).await
    }

    async fn send_body<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let request = self.request(method, path, Auth::Required)?;
        send_json(request.json(body), Auth::Required).await
    }
}

fn parse_url(raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw).map_err(|error| ApiError::InvalidUrl(format!("{raw}: {error}")))
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder, auth: Auth) -> Result<T, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if status == StatusCode::UNAUTHORIZED && auth != Auth::None {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Server { status: status.as_u16(), message: error_message(&text, status) });
    }
    Ok(serde_json::from_str(&text)?)
}

/// Pull a readable reason out of an error body.
///
/// The back end answers `{"error": ...}` from its own routes and
/// `{"message": ...}` from framework aborts; anything else falls back to
/// the status line.
pub(crate) fn error_message(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["error", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str).map(ToOwned::to_owned))
    });
    from_json.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    })
}

async fn rejection(response: Response) -> (u16, String) {
    let status = response.status();
    let detail = match response.text().await {
        Ok(body) => error_message(&body, status),
        Err(error) => error.to_string(),
    };
    (status.as_u16(), detail)
}

#[async_trait]
impl ExportTransport for ApiClient {
    async fn start_export(&self) -> Result<StartReply, ApiError> {
        let response = self
            .request(Method::GET, "/download-csv", Auth::Required)?
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let started: ExportStarted = serde_json::from_str(&response.text().await?)?;
                Ok(StartReply::Accepted { task_id: started.task_id })
            }
            StatusCode::UNAUTHORIZED => Ok(StartReply::Unauthorized),
            _ => {
                let (status, detail) = rejection(response).await;
                Ok(StartReply::Rejected { status, detail })
            }
        }
    }

    async fn poll_export(&self, task_id: &str) -> Result<PollReply, ApiError> {
        let response = self
            .request_url(Method::GET, self.task_url(task_id)?, Auth::Required)?
            .header(ACCEPT, "application/json, text/csv")
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(PollReply::Ready(response.bytes().await?.to_vec())),
            StatusCode::ACCEPTED => Ok(PollReply::Processing),
            StatusCode::UNAUTHORIZED => Ok(PollReply::Unauthorized),
            _ => {
                let (status, detail) = rejection(response).await;
                Ok(PollReply::Rejected { status, detail })
            }
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
