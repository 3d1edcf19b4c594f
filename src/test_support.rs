use crate::infrastructure::api_transport::{ApiRequest, ApiResponse, ApiTransport};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, InfraError> + Send + Sync>;

/// Fake transport answering from a closure and keeping every request it saw.
pub struct ScriptedTransport {
    handler: Handler,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, InfraError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delays: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.path() == path)
            .count()
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        if let Some(delay) = self.delays.get(&request.path()) {
            tokio::time::sleep(*delay).await;
        }
        (self.handler)(&request)
    }
}
