//! Wire types for the marketplace REST API.
//!
//! Field names follow the JSON the back end emits, including its mix of
//! `snake_case` keys and the hyphenated `task-id`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// ROLES
// =============================================================================

/// Account role. Every user carries exactly one in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
    Professional,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Customer => "customer",
            Self::Professional => "professional",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "customer" => Ok(Self::Customer),
            "professional" => Ok(Self::Professional),
            _ => Err(UnknownRole(raw.to_owned())),
        }
    }
}

// =============================================================================
// ACCOUNTS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    /// The back end sends the first role name under the plural key.
    pub roles: Role,
    pub active: bool,
    pub id: i64,
}

/// Sign-up payload. Professionals must also send `service_type` and
/// `experience_years`, and start inactive until an admin approves them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub role: Role,
    pub location: String,
    pub pincode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub active: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub experience_years: Option<i64>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub pincode: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
}

impl User {
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    pub message: String,
    pub active: bool,
}

// =============================================================================
// SERVICES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub time_required: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Create/update body for `/api/service`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInput {
    pub name: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingResponse {
    pub message: String,
    pub request_id: i64,
}

// =============================================================================
// SERVICE REQUESTS
// =============================================================================

/// Lifecycle of a booked service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    /// Completed and cancelled requests are closed; everything else is active.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "requested" => Ok(Self::Requested),
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownStatus(raw.to_owned())),
        }
    }
}

/// A customer's own booking, from `/api/my-services`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub id: i64,
    pub service_name: String,
    pub date_requested: String,
    pub status: RequestStatus,
    pub professional_id: i64,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub date_completed: Option<String>,
}

/// A request assigned to the calling professional, from `/api/my-requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedRequest {
    pub id: i64,
    pub service_name: String,
    pub customer_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub date_requested: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub date_completed: Option<String>,
}

/// A completed or cancelled request, from `/api/services/closed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedService {
    pub id: i64,
    pub service_name: String,
    #[serde(default)]
    pub date_completed: Option<String>,
    pub status: RequestStatus,
    pub customer_id: i64,
    pub professional_id: i64,
    #[serde(default)]
    pub review: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusChange {
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReviewBody<'a> {
    pub review: &'a str,
}

/// Response to status and review updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUpdate {
    pub message: String,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[serde(default)]
    pub review: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// =============================================================================
// EXPORT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportStarted {
    #[serde(rename = "task-id")]
    pub task_id: String,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
