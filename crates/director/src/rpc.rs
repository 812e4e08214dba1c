//! Status-RPC subsystem — consumed, not implemented here. The director only
//! needs to issue `REQUEST_STATUS` calls against running services and read
//! back their response; how that call is transported is an external
//! collaborator's concern.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DirectorError;

pub const REQUEST_STATUS: &str = "REQUEST_STATUS";

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn request(
        &self,
        service: &str,
        method: &str,
        payload: Value,
    ) -> Result<Value, DirectorError>;
}

/// In-memory mock backing tests and the demonstration binary. Each service
/// can be seeded with a canned response; services with no canned response
/// time out, matching how an unreachable real service would behave.
#[derive(Default)]
pub struct MockRpcClient {
    responses: Mutex<HashMap<String, Value>>,
}

impl MockRpcClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, service: &str, response: Value) {
        self.responses
            .lock()
            .expect("mock rpc client mutex poisoned")
            .insert(service.to_string(), response);
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    async fn request(
        &self,
        service: &str,
        _method: &str,
        _payload: Value,
    ) -> Result<Value, DirectorError> {
        self.responses
            .lock()
            .expect("mock rpc client mutex poisoned")
            .get(service)
            .cloned()
            .ok_or_else(|| DirectorError::RpcTimeout { service: service.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn seeded_response_is_returned() {
        let client = MockRpcClient::new();
        client.seed("web", json!({"ok": true}));
        let response = client.request("web", REQUEST_STATUS, json!({})).await.unwrap();
        assert_eq!(response, json!({"ok": true}));
    }

    #[tokio::test]
    async fn unseeded_service_times_out() {
        let client = MockRpcClient::new();
        let err = client.request("ghost", REQUEST_STATUS, json!({})).await.unwrap_err();
        assert!(matches!(err, DirectorError::RpcTimeout { .. }));
    }
}
