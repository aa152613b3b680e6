use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::SendTimeoutError;

use pointy_core::{ConnectionId, Message, PushError, PushOutcome, Pusher};

use crate::client::ClientRegistry;

/// Delivers messages over the WebSocket connections held by this process.
///
/// Only a registered client whose queue has closed counts as gone. An id this
/// process never held may belong to another process sharing the database, so
/// it is reported as [`PushError::NotLocal`] and its watcher is kept. A client
/// whose queue stays full past `push_timeout` is reported as a timeout.
pub struct WsPusher {
    registry: Arc<ClientRegistry>,
    push_timeout: Duration,
}

impl WsPusher {
    pub fn new(registry: Arc<ClientRegistry>, push_timeout: Duration) -> Self {
        Self {
            registry,
            push_timeout,
        }
    }
}

#[async_trait]
impl Pusher for WsPusher {
    async fn send(
        &self,
        connection_id: &ConnectionId,
        message: &Message,
    ) -> Result<PushOutcome, PushError> {
        let Some(client) = self.registry.get(connection_id) else {
            return Err(PushError::NotLocal(connection_id.to_string()));
        };
        if !client.is_connected() {
            return Ok(PushOutcome::Gone);
        }
        let tx = client.sender();
        let json = message
            .to_json()
            .map_err(|e| PushError::Encode(e.to_string()))?;

        match tx.send_timeout(json, self.push_timeout).await {
            Ok(()) => Ok(PushOutcome::Delivered),
            Err(SendTimeoutError::Timeout(_)) => Err(PushError::Timeout(self.push_timeout)),
            Err(SendTimeoutError::Closed(_)) => Ok(PushOutcome::Gone),
        }
    }
}
