//! In-memory test doubles for the delivery seams.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::PushError;
use crate::ids::ConnectionId;
use crate::messages::Message;
use crate::session::Session;
use crate::traits::{BroadcastReport, Notifier, PushOutcome, Pusher};

#[derive(Default)]
struct PusherState {
    deliveries: Vec<(ConnectionId, Message)>,
    gone: HashSet<ConnectionId>,
    failing: HashMap<ConnectionId, PushError>,
    timing_out: HashSet<ConnectionId>,
}

/// Records every delivery. Connections can be scripted to be gone, to fail,
/// or to time out; a global latency can slow every send.
#[derive(Default)]
pub struct MockPusher {
    state: Mutex<PusherState>,
    latency: Mutex<Option<Duration>>,
    timeout: Mutex<Duration>,
}

impl MockPusher {
    pub fn new() -> Self {
        Self {
            timeout: Mutex::new(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    pub fn mark_gone(&self, connection_id: &ConnectionId) {
        self.state.lock().gone.insert(connection_id.clone());
    }

    pub fn fail_with(&self, connection_id: &ConnectionId, error: PushError) {
        self.state.lock().failing.insert(connection_id.clone(), error);
    }

    /// Sends to this connection wait out the push timeout, then fail.
    pub fn time_out(&self, connection_id: &ConnectionId, after: Duration) {
        *self.timeout.lock() = after;
        self.state.lock().timing_out.insert(connection_id.clone());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn deliveries(&self) -> Vec<(ConnectionId, Message)> {
        self.state.lock().deliveries.clone()
    }

    pub fn deliveries_to(&self, connection_id: &ConnectionId) -> Vec<Message> {
        self.state
            .lock()
            .deliveries
            .iter()
            .filter(|(c, _)| c == connection_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().deliveries.clear();
    }
}

#[async_trait]
impl Pusher for MockPusher {
    async fn send(
        &self,
        connection_id: &ConnectionId,
        message: &Message,
    ) -> Result<PushOutcome, PushError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let timing_out = self.state.lock().timing_out.contains(connection_id);
        if timing_out {
            let after = *self.timeout.lock();
            tokio::time::sleep(after).await;
            return Err(PushError::Timeout(after));
        }

        let mut state = self.state.lock();
        if state.gone.contains(connection_id) {
            return Ok(PushOutcome::Gone);
        }
        if let Some(err) = state.failing.get(connection_id) {
            return Err(err.clone());
        }
        state.deliveries.push((connection_id.clone(), message.clone()));
        Ok(PushOutcome::Delivered)
    }
}

/// Notifier that only remembers which session states it was asked to broadcast.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Session>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcasts(&self) -> Vec<Session> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn broadcast(&self, session: &Session) -> BroadcastReport {
        self.seen.lock().push(session.clone());
        BroadcastReport::default()
    }
}
