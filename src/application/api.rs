use crate::application::session::TokenSource;
use crate::domain::models::{NewTask, Task, TaskId, TaskListPayload, TaskPage, TaskPatch, TaskQuery};
use crate::infrastructure::api_transport::{ApiRequest, ApiResponse, ApiTransport, HttpMethod};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::Arc;

/// How a rejected request is retried. Only authorization failures are retried,
/// each one after exchanging the refresh credential for a new access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_auth_retries: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_auth_retries: 1 }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_auth_retries: 0 }
    }

    fn allows_auth_retry(&self, attempted: u8) -> bool {
        attempted < self.max_auth_retries
    }
}

pub struct ApiClient<T: ApiTransport> {
    transport: Arc<T>,
    tokens: Arc<dyn TokenSource>,
    retry_policy: RetryPolicy,
}

impl<T: ApiTransport> ApiClient<T> {
    pub fn new(transport: Arc<T>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            transport,
            tokens,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sends `request` with whatever access token is current at dispatch time.
    ///
    /// A 401 triggers one refresh (shared with any concurrent caller) and a retry
    /// with the new token. If the refresh fails the local session is cleared and
    /// the original rejection comes back as [`InfraError::Unauthorized`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        let mut token = self.tokens.access_token();
        let mut auth_retries = 0;
        loop {
            let mut outgoing = request.clone();
            outgoing.bearer = token.clone();
            let response = self.transport.send(outgoing).await?;
            if response.status != 401 {
                return response.error_for_status();
            }

            let rejection = response.error_message();
            if !self.retry_policy.allows_auth_retry(auth_retries) {
                return Err(InfraError::Unauthorized(rejection));
            }
            auth_retries += 1;

            tracing::debug!(path = %request.path(), "access token rejected, refreshing");
            match self.tokens.refresh(token.as_deref()).await {
                Some(fresh) => token = Some(fresh),
                None => {
                    tracing::info!(path = %request.path(), "refresh failed, session cleared");
                    self.tokens.clear();
                    return Err(InfraError::Unauthorized(rejection));
                }
            }
        }
    }
}

/// Task endpoints the cache controller talks to.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskPage, InfraError>;
    async fn create_task(&self, new_task: &NewTask) -> Result<Task, InfraError>;
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, InfraError>;
    async fn delete_task(&self, id: &TaskId) -> Result<(), InfraError>;

    async fn complete_task(&self, id: &TaskId) -> Result<Task, InfraError> {
        self.update_task(id, &TaskPatch::completion()).await
    }
}

#[async_trait]
impl<T: ApiTransport> TaskApi for ApiClient<T> {
    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskPage, InfraError> {
        let request = ApiRequest::new(HttpMethod::Get, ["tasks", "user"]).with_query(query.query_pairs());
        let payload: TaskListPayload = self.send(request).await?.json()?;
        Ok(payload.into_page())
    }

    async fn create_task(&self, new_task: &NewTask) -> Result<Task, InfraError> {
        let request = ApiRequest::new(HttpMethod::Post, ["tasks"]).with_json(new_task)?;
        self.send(request).await?.json()
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, InfraError> {
        let request = ApiRequest::new(HttpMethod::Patch, ["tasks".to_string(), id.to_string()])
            .with_json(patch)?;
        self.send(request).await?.json()
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), InfraError> {
        let request = ApiRequest::new(HttpMethod::Delete, ["tasks".to_string(), id.to_string()]);
        self.send(request).await?;
        Ok(())
    }
}
