use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use pointy_core::{
    BroadcastReport, ConnectionId, InterestRegistry, Message, Notifier, PushOutcome, Pusher,
    Session,
};
use pointy_telemetry::{
    BROADCAST_DELIVERED_TOTAL, BROADCAST_DURATION_SECONDS, BROADCAST_FAILED_TOTAL,
    BROADCAST_PRUNED_TOTAL,
};

enum Delivery {
    Delivered(ConnectionId),
    Pruned(ConnectionId),
    Failed(ConnectionId, String),
}

/// Pushes each watcher its own projection of a changed session and drops
/// watchers whose connection is gone.
///
/// A round runs while the session lock is held, so it is cut off at
/// `round_deadline`, which must stay below the lock lease. Deliveries still in
/// flight at the deadline are abandoned and reported as failed.
pub struct ChangeNotifier {
    interest: Arc<dyn InterestRegistry>,
    pusher: Arc<dyn Pusher>,
    concurrency: usize,
    round_deadline: Duration,
}

pub const DEADLINE_EXCEEDED: &str = "broadcast deadline exceeded";

impl ChangeNotifier {
    pub fn new(
        interest: Arc<dyn InterestRegistry>,
        pusher: Arc<dyn Pusher>,
        concurrency: usize,
        round_deadline: Duration,
    ) -> Self {
        Self {
            interest,
            pusher,
            concurrency: concurrency.max(1),
            round_deadline,
        }
    }

    async fn deliver(&self, session: &Session, connection_id: ConnectionId) -> Delivery {
        let message = Message::SessionUpdated(session.view_for(&connection_id));
        match self.pusher.send(&connection_id, &message).await {
            Ok(PushOutcome::Delivered) => Delivery::Delivered(connection_id),
            Ok(PushOutcome::Gone) => {
                debug!(connection_id = %connection_id, "connection gone, pruning watcher");
                match self
                    .interest
                    .remove_watcher(&session.session_id, &connection_id)
                    .await
                {
                    Ok(()) => Delivery::Pruned(connection_id),
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "failed to prune watcher");
                        Delivery::Failed(connection_id, format!("prune failed: {e}"))
                    }
                }
            }
            Err(e) => {
                metrics::counter!(BROADCAST_FAILED_TOTAL, "error_kind" => e.error_kind())
                    .increment(1);
                warn!(connection_id = %connection_id, error = %e, "push failed");
                Delivery::Failed(connection_id, e.to_string())
            }
        }
    }
}

#[async_trait]
impl Notifier for ChangeNotifier {
    async fn broadcast(&self, session: &Session) -> BroadcastReport {
        let started = Instant::now();
        let mut report = BroadcastReport::default();

        let watchers = match self.interest.list_active_watchers(&session.session_id).await {
            Ok(w) => w,
            Err(e) => {
                warn!(session_id = %session.session_id, error = %e, "failed to list watchers");
                return report;
            }
        };

        let deadline = tokio::time::Instant::now() + self.round_deadline;
        let mut pending: HashSet<ConnectionId> = watchers.iter().cloned().collect();
        let mut deliveries = stream::iter(watchers.iter().cloned())
            .map(|connection_id| self.deliver(session, connection_id))
            .buffer_unordered(self.concurrency);

        loop {
            match tokio::time::timeout_at(deadline, deliveries.next()).await {
                Ok(Some(Delivery::Delivered(c))) => {
                    pending.remove(&c);
                    report.delivered += 1;
                }
                Ok(Some(Delivery::Pruned(c))) => {
                    pending.remove(&c);
                    report.pruned.push(c);
                }
                Ok(Some(Delivery::Failed(c, e))) => {
                    pending.remove(&c);
                    report.failed.push((c, e));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        session_id = %session.session_id,
                        abandoned = pending.len(),
                        deadline = ?self.round_deadline,
                        "broadcast round hit its deadline"
                    );
                    metrics::counter!(BROADCAST_FAILED_TOTAL, "error_kind" => "deadline")
                        .increment(pending.len() as u64);
                    // Keep listing order for the abandoned ones.
                    for c in watchers.iter().filter(|c| pending.contains(*c)) {
                        report.failed.push((c.clone(), DEADLINE_EXCEEDED.to_string()));
                    }
                    break;
                }
            }
        }
        drop(deliveries);

        metrics::counter!(BROADCAST_DELIVERED_TOTAL).increment(report.delivered as u64);
        metrics::counter!(BROADCAST_PRUNED_TOTAL).increment(report.pruned.len() as u64);
        metrics::histogram!(BROADCAST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(
            session_id = %session.session_id,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            "broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointy_core::mock::MockPusher;
    use pointy_core::{Clock, ManualClock, Participant, PushError, SessionId, StoreError, UserId};
    use std::time::Duration;

    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    /// Registry over a plain set, with an optional forced failure.
    #[derive(Default)]
    struct SetRegistry {
        watchers: Mutex<BTreeSet<String>>,
        fail_list: bool,
    }

    #[async_trait]
    impl InterestRegistry for SetRegistry {
        async fn record_interest(
            &self,
            _session_id: &SessionId,
            connection_id: &ConnectionId,
        ) -> Result<(), StoreError> {
            self.watchers.lock().insert(connection_id.to_string());
            Ok(())
        }

        async fn list_active_watchers(
            &self,
            _session_id: &SessionId,
        ) -> Result<Vec<ConnectionId>, StoreError> {
            if self.fail_list {
                return Err(StoreError::Database("unavailable".into()));
            }
            Ok(self
                .watchers
                .lock()
                .iter()
                .map(ConnectionId::from_raw)
                .collect())
        }

        async fn remove_watcher(
            &self,
            _session_id: &SessionId,
            connection_id: &ConnectionId,
        ) -> Result<(), StoreError> {
            self.watchers.lock().remove(connection_id.as_str());
            Ok(())
        }

        async fn forget_connection(&self, connection_id: &ConnectionId) -> Result<usize, StoreError> {
            Ok(usize::from(self.watchers.lock().remove(connection_id.as_str())))
        }
    }

    const ROUND: Duration = Duration::from_secs(5);

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from_raw(id)
    }

    fn session() -> Session {
        let clock = ManualClock::fixed();
        let mut s = Session::start(
            Participant::new(UserId::from_raw("u0"), "Alice", conn("c0")),
            clock.now(),
        );
        s.join(Participant::new(UserId::from_raw("u1"), "Bob", conn("c1")));
        s.record_vote(&conn("c1"), "8");
        s
    }

    async fn registry_with(ids: &[&str]) -> Arc<SetRegistry> {
        let reg = Arc::new(SetRegistry::default());
        for id in ids {
            reg.record_interest(&SessionId::from_raw("S1"), &conn(id))
                .await
                .unwrap();
        }
        reg
    }

    #[tokio::test]
    async fn each_watcher_gets_its_own_projection() {
        let reg = registry_with(&["c0", "c1"]).await;
        let pusher = Arc::new(MockPusher::new());
        let notifier = ChangeNotifier::new(reg, pusher.clone(), 4, ROUND);

        let report = notifier.broadcast(&session()).await;
        assert_eq!(report.delivered, 2);

        let to_alice = pusher.deliveries_to(&conn("c0"));
        let to_bob = pusher.deliveries_to(&conn("c1"));
        match (&to_alice[0], &to_bob[0]) {
            (Message::SessionUpdated(a), Message::SessionUpdated(b)) => {
                assert_eq!(a.participants[1].current_vote, None);
                assert!(a.participants[1].has_voted);
                assert_eq!(b.participants[1].current_vote.as_deref(), Some("8"));
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[tokio::test]
    async fn gone_watchers_are_pruned() {
        let reg = registry_with(&["c0", "c1", "c2"]).await;
        let pusher = Arc::new(MockPusher::new());
        pusher.mark_gone(&conn("c2"));
        let notifier = ChangeNotifier::new(reg.clone(), pusher.clone(), 4, ROUND);

        let report = notifier.broadcast(&session()).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec![conn("c2")]);
        assert!(report.is_clean());

        let remaining = reg
            .list_active_watchers(&SessionId::from_raw("S1"))
            .await
            .unwrap();
        assert_eq!(remaining, vec![conn("c0"), conn("c1")]);
    }

    #[tokio::test]
    async fn failures_are_reported_but_do_not_stop_the_round() {
        let reg = registry_with(&["c0", "c1"]).await;
        let pusher = Arc::new(MockPusher::new());
        pusher.fail_with(&conn("c0"), PushError::Status { status: 500, body: "oops".into() });
        let notifier = ChangeNotifier::new(reg.clone(), pusher.clone(), 1, ROUND);

        let report = notifier.broadcast(&session()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, conn("c0"));
        assert!(report.pruned.is_empty());
        // Failing connections keep their watcher record.
        assert_eq!(
            reg.list_active_watchers(&SessionId::from_raw("S1")).await.unwrap().len(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_watcher_times_out_without_blocking_others() {
        let reg = registry_with(&["c0", "c1"]).await;
        let pusher = Arc::new(MockPusher::new());
        pusher.time_out(&conn("c1"), Duration::from_secs(2));
        let notifier = ChangeNotifier::new(reg, pusher.clone(), 4, ROUND);

        let report = notifier.broadcast(&session()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn listing_failure_yields_empty_report() {
        let reg = Arc::new(SetRegistry {
            fail_list: true,
            ..Default::default()
        });
        let pusher = Arc::new(MockPusher::new());
        let notifier = ChangeNotifier::new(reg, pusher.clone(), 4, ROUND);

        assert_eq!(notifier.broadcast(&session()).await, BroadcastReport::default());
        assert!(pusher.deliveries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_stops_at_its_deadline() {
        let reg = registry_with(&["c0", "c1", "c2"]).await;
        let pusher = Arc::new(MockPusher::new());
        pusher.time_out(&conn("c1"), Duration::from_secs(2));
        pusher.time_out(&conn("c2"), Duration::from_secs(2));
        let notifier =
            ChangeNotifier::new(reg.clone(), pusher.clone(), 4, Duration::from_millis(750));

        let started = tokio::time::Instant::now();
        let report = notifier.broadcast(&session()).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.failed,
            vec![
                (conn("c1"), DEADLINE_EXCEEDED.to_string()),
                (conn("c2"), DEADLINE_EXCEEDED.to_string()),
            ]
        );
        // Abandoned deliveries keep their watcher record.
        assert_eq!(
            reg.list_active_watchers(&SessionId::from_raw("S1")).await.unwrap().len(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_deliveries_count_against_the_deadline() {
        let reg = registry_with(&["c0", "c1", "c2"]).await;
        let pusher = Arc::new(MockPusher::new());
        pusher.set_latency(Duration::from_millis(400));
        let notifier = ChangeNotifier::new(reg, pusher.clone(), 1, Duration::from_millis(750));

        let report = notifier.broadcast(&session()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().all(|(_, e)| e == DEADLINE_EXCEEDED));
    }
}
