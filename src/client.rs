//! Typed client for the REST API, used by `jobs-cli` and the board.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::board::{JobMover, PipelineBoard};
use crate::dashboard::{status_distribution, upcoming_deadlines, StatusShare};
use crate::error::ErrorBody;
use crate::models::{
    CountResponse, Job, LoginRequest, LoginResponse, MessageResponse, MoveJobRequest, Pipeline,
};
use crate::query::{DashboardMetrics, MetricsWindow, RevenueResponse};
use crate::storage::ListQuery;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status}: {message}")]
    Api { status: u16, message: String },

    #[error("not logged in")]
    MissingToken,
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::MissingToken)?;
        Ok(request.bearer_auth(token))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = self.authorized(request)?.send().await?;
        Self::decode(response).await
    }

    /// Exchange credentials for a session token and keep it on the client.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let response = self
            .http
            .post(self.url("users/login"))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let session: LoginResponse = Self::decode(response).await?;
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn list<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<T>, ClientError> {
        self.send(self.http.get(self.url(collection)).query(query)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<T, ClientError> {
        self.send(self.http.get(self.url(&format!("{}/{}", collection, id))))
            .await
    }

    pub async fn create<T, B>(&self, collection: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(self.http.post(self.url(collection)).json(body)).await
    }

    pub async fn update<T, B>(&self, collection: &str, id: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(
            self.http
                .put(self.url(&format!("{}/{}", collection, id)))
                .json(body),
        )
        .await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<MessageResponse, ClientError> {
        self.send(self.http.delete(self.url(&format!("{}/{}", collection, id))))
            .await
    }

    pub async fn customer_count(&self) -> Result<u64, ClientError> {
        let body: CountResponse = self.send(self.http.get(self.url("customers/count"))).await?;
        Ok(body.count)
    }

    pub async fn metrics(&self, window: &MetricsWindow) -> Result<DashboardMetrics, ClientError> {
        self.send(self.http.get(self.url("dashboard/metrics")).query(window))
            .await
    }

    pub async fn revenue(&self) -> Result<RevenueResponse, ClientError> {
        self.send(self.http.get(self.url("dashboard/revenue"))).await
    }

    pub async fn board(&self, pipeline_id: Uuid) -> Result<PipelineBoard, ClientError> {
        self.send(
            self.http
                .get(self.url(&format!("pipelines/{}/board", pipeline_id))),
        )
        .await
    }

    /// Board for `pipeline`, or for the first pipeline when none is given.
    /// `None` when there are no pipelines yet.
    pub async fn active_board(
        &self,
        pipeline: Option<Uuid>,
    ) -> Result<Option<PipelineBoard>, ClientError> {
        if let Some(id) = pipeline {
            return self.board(id).await.map(Some);
        }
        let query = everything();
        let (pipelines, jobs) = futures::try_join!(
            self.list::<Pipeline>("pipelines", &query),
            self.list::<Job>("jobs", &query),
        )?;
        Ok(PipelineBoard::active(&pipelines, jobs))
    }

    /// Metrics card plus the views derived from the full job list.
    pub async fn dashboard(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
        limit: usize,
    ) -> Result<DashboardSnapshot, ClientError> {
        let window = MetricsWindow::default();
        let query = everything();
        let (metrics, jobs) = futures::try_join!(
            self.metrics(&window),
            self.list::<Job>("jobs", &query),
        )?;
        Ok(DashboardSnapshot {
            metrics,
            distribution: status_distribution(&jobs),
            upcoming: upcoming_deadlines(&jobs, now, horizon, limit),
        })
    }
}

fn everything() -> ListQuery {
    ListQuery {
        limit: Some(0),
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub metrics: DashboardMetrics,
    pub distribution: Vec<StatusShare>,
    pub upcoming: Vec<Job>,
}

#[async_trait]
impl JobMover for ApiClient {
    type Error = ClientError;

    async fn move_job(
        &self,
        pipeline: Uuid,
        job_id: Uuid,
        from_step: Option<&str>,
        to_step: &str,
    ) -> Result<Job, ClientError> {
        let body = MoveJobRequest {
            from_step: from_step.map(str::to_string),
            to_step: to_step.to_string(),
            pipeline: Some(pipeline),
        };
        self.send(
            self.http
                .post(self.url(&format!("jobs/{}/move", job_id)))
                .json(&body),
        )
        .await
    }
}
