//! Canonical document shapes for the four collections, plus request and
//! response payloads.
//!
//! Older revisions of the data used snake_case names (`job_name`,
//! `pipeline_step`, `customer_id`, ...) and lowercase status labels. Those
//! are accepted through serde aliases on read; documents are always written
//! back in the canonical camelCase form.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::storage::{ListQuery, Record, SortKey};

/// `null` and missing both mean "default".
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any JSON number, rounded and clamped to a 0-100 percentage. `null` and
/// missing read as 0.
fn lenient_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or_default();
    if raw.is_nan() {
        return Ok(0);
    }
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in partial updates.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

// --- Enums ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    Lead,
    #[default]
    Active,
    Inactive,
    Churned,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Lead => "lead",
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Churned => "churned",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    #[default]
    Email,
    Phone,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    #[serde(rename = "none")]
    NoContact,
}

/// Job lifecycle. `Active` only exists for documents written by the older
/// lowercase schema and counts as an active job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ToSchema)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "Planning", alias = "planning")]
    Planning,
    #[serde(rename = "In Progress", alias = "in-progress", alias = "in_progress")]
    InProgress,
    #[serde(rename = "Active", alias = "active")]
    Active,
    #[serde(rename = "Completed", alias = "completed")]
    Completed,
    #[serde(rename = "On Hold", alias = "on-hold", alias = "on_hold")]
    OnHold,
    #[serde(rename = "Cancelled", alias = "cancelled")]
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Planning,
        JobStatus::InProgress,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::OnHold,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Planning => "Planning",
            JobStatus::InProgress => "In Progress",
            JobStatus::Active => "Active",
            JobStatus::Completed => "Completed",
            JobStatus::OnHold => "On Hold",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    /// Counted in the dashboard's `activeJobs`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Planning | JobStatus::InProgress | JobStatus::Active
        )
    }

    /// Still expected to be worked on.
    pub fn is_open(&self) -> bool {
        !matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// Case-insensitive; accepts `In Progress`, `in-progress` and `in_progress`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], " ");
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().to_lowercase() == normalized)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

// --- Customer ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(alias = "_id")]
    pub id: Uuid,
    #[serde(alias = "first_name")]
    pub first_name: String,
    #[serde(alias = "last_name")]
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: CustomerStatus,
    #[serde(default = "default_true")]
    pub opt_in_email: bool,
    #[serde(default, alias = "optInWhatsapp")]
    pub opt_in_whats_app: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferred_contact_method: ContactMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_source: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Record for Customer {
    const COLLECTION: &'static str = "customers";
    const KIND: &'static str = "Customer";
    const SORT_FIELDS: &'static [&'static str] = &[
        "createdAt",
        "updatedAt",
        "firstName",
        "lastName",
        "email",
        "status",
        "lastActivityAt",
    ];

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.email.clone())
    }

    fn sort_key(&self, field: &str) -> Option<SortKey> {
        match field {
            "createdAt" => Some(SortKey::Time(self.created_at)),
            "updatedAt" => Some(SortKey::Time(self.updated_at)),
            "firstName" => Some(SortKey::text(&self.first_name)),
            "lastName" => Some(SortKey::text(&self.last_name)),
            "email" => Some(SortKey::text(&self.email)),
            "status" => Some(SortKey::text(self.status.as_str())),
            "lastActivityAt" => self.last_activity_at.map(SortKey::Time),
            _ => None,
        }
    }

    fn matches(&self, query: &ListQuery) -> bool {
        if let Some(status) = &query.status {
            if !self.status.as_str().eq_ignore_ascii_case(status.trim()) {
                return false;
            }
        }
        query.text_matches(
            [
                Some(self.first_name.as_str()),
                Some(self.last_name.as_str()),
                Some(self.email.as_str()),
                self.phone.as_deref(),
                self.notes.as_deref(),
            ]
            .into_iter()
            .flatten(),
        )
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.last_activity_at = Some(at);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    #[serde(alias = "first_name")]
    pub first_name: String,
    #[serde(alias = "last_name")]
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub status: Option<CustomerStatus>,
    pub opt_in_email: Option<bool>,
    #[serde(alias = "optInWhatsapp")]
    pub opt_in_whats_app: Option<bool>,
    pub preferred_contact_method: Option<ContactMethod>,
    pub lead_source: Option<String>,
}

/// Partial update: only the fields present are written.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPatch {
    #[serde(alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(alias = "last_name")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub status: Option<CustomerStatus>,
    pub opt_in_email: Option<bool>,
    #[serde(alias = "optInWhatsapp")]
    pub opt_in_whats_app: Option<bool>,
    pub preferred_contact_method: Option<ContactMethod>,
    pub lead_source: Option<String>,
}

impl CustomerPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.address.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.opt_in_email.is_none()
            && self.opt_in_whats_app.is_none()
            && self.preferred_contact_method.is_none()
            && self.lead_source.is_none()
    }
}

// --- Job ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(alias = "_id")]
    pub id: Uuid,
    #[serde(alias = "job_name", alias = "name")]
    pub title: String,
    #[serde(default, alias = "customer_id")]
    pub customer: Option<Uuid>,
    #[serde(default, alias = "pipeline_id")]
    pub pipeline: Option<Uuid>,
    #[serde(default, alias = "pipeline_step")]
    pub current_step: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: f64,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Record for Job {
    const COLLECTION: &'static str = "jobs";
    const KIND: &'static str = "Job";
    const SORT_FIELDS: &'static [&'static str] = &[
        "createdAt",
        "updatedAt",
        "title",
        "status",
        "value",
        "dueDate",
        "completedAt",
        "progress",
    ];
    const DEFAULT_SORT: &'static str = "-createdAt";
    const DEFAULT_LIMIT: Option<usize> = Some(10);

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self, field: &str) -> Option<SortKey> {
        match field {
            "createdAt" => Some(SortKey::Time(self.created_at)),
            "updatedAt" => Some(SortKey::Time(self.updated_at)),
            "title" => Some(SortKey::text(&self.title)),
            "status" => Some(SortKey::text(self.status.as_str())),
            "value" => Some(SortKey::Number(self.value)),
            "dueDate" => self.due_date.map(SortKey::Time),
            "completedAt" => self.completed_at.map(SortKey::Time),
            "progress" => Some(SortKey::Number(f64::from(self.progress))),
            _ => None,
        }
    }

    fn matches(&self, query: &ListQuery) -> bool {
        if let Some(status) = &query.status {
            match status.parse::<JobStatus>() {
                Ok(status) if status == self.status => {}
                _ => return false,
            }
        }
        if query.pipeline.is_some() && query.pipeline != self.pipeline {
            return false;
        }
        if query.customer.is_some() && query.customer != self.customer {
            return false;
        }
        if let Some(step) = &query.step {
            if self.current_step.as_deref() != Some(step.as_str()) {
                return false;
            }
        }
        query.text_matches(
            [
                Some(self.title.as_str()),
                self.comments.as_deref(),
                self.address.as_deref(),
            ]
            .into_iter()
            .flatten(),
        )
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(alias = "job_name", alias = "name")]
    pub title: String,
    #[serde(alias = "customer_id")]
    pub customer: Option<Uuid>,
    #[serde(alias = "pipeline_id")]
    pub pipeline: Option<Uuid>,
    #[serde(alias = "pipeline_step")]
    pub current_step: Option<String>,
    pub status: Option<JobStatus>,
    pub value: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub comments: Option<String>,
    pub address: Option<String>,
}

/// Partial update. `customer`, `pipeline` and `dueDate` may be sent as
/// `null` to clear them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(alias = "job_name", alias = "name")]
    pub title: Option<String>,
    #[serde(default, alias = "customer_id", deserialize_with = "nullable")]
    #[schema(value_type = Option<Uuid>)]
    pub customer: Option<Option<Uuid>>,
    #[serde(default, alias = "pipeline_id", deserialize_with = "nullable")]
    #[schema(value_type = Option<Uuid>)]
    pub pipeline: Option<Option<Uuid>>,
    #[serde(alias = "pipeline_step")]
    pub current_step: Option<String>,
    pub status: Option<JobStatus>,
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub comments: Option<String>,
    pub address: Option<String>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.customer.is_none()
            && self.pipeline.is_none()
            && self.current_step.is_none()
            && self.status.is_none()
            && self.value.is_none()
            && self.due_date.is_none()
            && self.completed_at.is_none()
            && self.progress.is_none()
            && self.comments.is_none()
            && self.address.is_none()
    }
}

/// Body of `POST /api/jobs/:id/move`.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveJobRequest {
    /// Step the caller believes the job is on; rejected when stale.
    pub from_step: Option<String>,
    pub to_step: String,
    /// Pipeline of the board the move came from. A job without a pipeline
    /// joins it; a job on another pipeline is a conflict.
    #[serde(default, alias = "pipeline_id")]
    pub pipeline: Option<Uuid>,
}

// --- Pipeline ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    #[serde(alias = "_id")]
    pub id: Uuid,
    pub name: String,
    #[serde(default, alias = "stages")]
    pub steps: Vec<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    pub fn has_step(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s == step)
    }

    pub fn first_step(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }
}

impl Record for Pipeline {
    const COLLECTION: &'static str = "pipelines";
    const KIND: &'static str = "Pipeline";
    const SORT_FIELDS: &'static [&'static str] = &["createdAt", "updatedAt", "name"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self, field: &str) -> Option<SortKey> {
        match field {
            "createdAt" => Some(SortKey::Time(self.created_at)),
            "updatedAt" => Some(SortKey::Time(self.updated_at)),
            "name" => Some(SortKey::text(&self.name)),
            _ => None,
        }
    }

    fn matches(&self, query: &ListQuery) -> bool {
        query.text_matches(
            std::iter::once(self.name.as_str()).chain(self.steps.iter().map(String::as_str)),
        )
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPipeline {
    pub name: String,
    #[serde(alias = "stages")]
    pub steps: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePatch {
    pub name: Option<String>,
    #[serde(alias = "stages")]
    pub steps: Option<Vec<String>>,
}

impl PipelinePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.steps.is_none()
    }
}

// --- User ---

/// Stored user. Never serialized to clients; see [`UserProfile`].
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(alias = "password")]
    pub password_hash: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: Role,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Record for User {
    const COLLECTION: &'static str = "users";
    const KIND: &'static str = "User";
    const SORT_FIELDS: &'static [&'static str] =
        &["createdAt", "updatedAt", "name", "email", "role"];

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_key(&self) -> Option<String> {
        Some(self.email.clone())
    }

    fn sort_key(&self, field: &str) -> Option<SortKey> {
        match field {
            "createdAt" => Some(SortKey::Time(self.created_at)),
            "updatedAt" => Some(SortKey::Time(self.updated_at)),
            "name" => Some(SortKey::text(&self.name)),
            "email" => Some(SortKey::text(&self.email)),
            "role" => Some(SortKey::text(match self.role {
                Role::Admin => "admin",
                Role::User => "user",
            })),
            _ => None,
        }
    }

    fn matches(&self, query: &ListQuery) -> bool {
        query.text_matches([self.name.as_str(), self.email.as_str()])
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// What clients get to see of a user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.password.is_none() && self.role.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

/// JWT claims.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String, // user id
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

impl AuthPayload {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// --- Small responses ---

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
