//! Session operations: start, join, load, vote, show votes, clear votes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use pointy_core::clock::{self, Clock};
use pointy_core::requests::{
    FacilitatorRequest, JoinRequest, LoadRequest, StartRequest, Validate, VoteRequest,
};
use pointy_core::{
    ConnectionId, InterestRegistry, LockGuard, LockKey, LockManager, Message, Participant,
    PushOutcome, Pusher, Session, SessionId, SessionStore,
};
use pointy_telemetry::{OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};

use crate::errors::OperationError;

/// Collaborators are built once per process and shared by every request.
pub struct SessionService {
    locks: Arc<dyn LockManager>,
    sessions: Arc<dyn SessionStore>,
    interest: Arc<dyn InterestRegistry>,
    pusher: Arc<dyn Pusher>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl SessionService {
    pub fn new(
        locks: Arc<dyn LockManager>,
        sessions: Arc<dyn SessionStore>,
        interest: Arc<dyn InterestRegistry>,
        pusher: Arc<dyn Pusher>,
        clock: Arc<dyn Clock>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            locks,
            sessions,
            interest,
            pusher,
            clock,
            session_timeout,
        }
    }

    /// Create a session with the caller as facilitator.
    #[instrument(skip(self, request), fields(connection_id = %connection_id))]
    pub async fn start(
        &self,
        connection_id: &ConnectionId,
        request: StartRequest,
    ) -> Result<Message, OperationError> {
        let result = observe("session.start", async {
            request.validate().map_err(OperationError::Validation)?;
            let facilitator = Participant::new(
                request.facilitator.user_id(),
                request.facilitator.display_name(),
                connection_id.clone(),
            );
            let expires_at = clock::after(self.clock.now(), self.session_timeout);
            let session = self.sessions.create(Session::start(facilitator, expires_at)).await?;
            self.interest
                .record_interest(&session.session_id, connection_id)
                .await?;
            info!(session_id = %session.session_id, "session started");
            Ok(Message::SessionCreated(session.facilitator_view(connection_id)))
        })
        .await;

        match &result {
            Ok(message) => self.reply(connection_id, message).await,
            Err(e) => {
                if e.is_internal() {
                    error!(error = %e, "error starting session");
                    self.reply(connection_id, &e.to_message()).await;
                }
            }
        }
        result
    }

    /// Add the caller to a session, or update their slot if the user id is
    /// already present.
    #[instrument(skip(self, request), fields(connection_id = %connection_id, session_id = %request.session_id))]
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        request: JoinRequest,
    ) -> Result<Message, OperationError> {
        observe("session.join", async {
            request.validate().map_err(OperationError::Validation)?;
            let session_id = request.session_id();
            let participant = Participant::new(
                request.user.user_id(),
                request.user.display_name(),
                connection_id.clone(),
            );

            let saved = self
                .with_session_lock(&session_id, || async {
                    let mut session = self.load_existing(&session_id).await?;
                    let outcome = session.join(participant);
                    debug!(?outcome, "participant joined");
                    self.interest
                        .record_interest(&session_id, connection_id)
                        .await?;
                    Ok(self.sessions.save(session).await?)
                })
                .await?;
            Ok(Message::SessionUpdated(saved.view_for(connection_id)))
        })
        .await
    }

    /// Fetch a session and subscribe the caller to its updates.
    #[instrument(skip(self, request), fields(connection_id = %connection_id, session_id = %request.session_id))]
    pub async fn load(
        &self,
        connection_id: &ConnectionId,
        request: LoadRequest,
    ) -> Result<Message, OperationError> {
        let result = observe("session.load", async {
            request.validate().map_err(OperationError::Validation)?;
            let session_id = request.session_id();
            let session = self
                .with_session_lock(&session_id, || async {
                    let session = self.load_existing(&session_id).await?;
                    self.interest
                        .record_interest(&session_id, connection_id)
                        .await?;
                    Ok(session)
                })
                .await?;
            Ok(Message::SessionLoaded(session.view_for(connection_id)))
        })
        .await;

        if let Ok(message) = &result {
            self.reply(connection_id, message).await;
        }
        result
    }

    /// Record the caller's vote.
    #[instrument(skip(self, request), fields(connection_id = %connection_id, session_id = %request.session_id))]
    pub async fn vote(
        &self,
        connection_id: &ConnectionId,
        request: VoteRequest,
    ) -> Result<Message, OperationError> {
        observe("session.vote", async {
            request.validate().map_err(OperationError::Validation)?;
            let session_id = request.session_id();
            let vote = request.vote.trim().to_string();

            let saved = self
                .with_session_lock(&session_id, || async {
                    let mut session = self.load_existing(&session_id).await?;
                    if !session.record_vote(connection_id, vote) {
                        warn!("vote from a connection that is not a participant");
                        return Err(OperationError::PermissionDenied);
                    }
                    Ok(self.sessions.save(session).await?)
                })
                .await?;
            Ok(Message::SessionUpdated(saved.view_for(connection_id)))
        })
        .await
    }

    #[instrument(skip(self, request), fields(connection_id = %connection_id, session_id = %request.session_id))]
    pub async fn show_votes(
        &self,
        connection_id: &ConnectionId,
        request: FacilitatorRequest,
    ) -> Result<Message, OperationError> {
        observe("session.showVotes", async {
            let saved = self
                .facilitator_update(&request, "show votes", Session::show_votes)
                .await?;
            Ok(Message::SessionUpdated(saved.view_for(connection_id)))
        })
        .await
    }

    #[instrument(skip(self, request), fields(connection_id = %connection_id, session_id = %request.session_id))]
    pub async fn clear_votes(
        &self,
        connection_id: &ConnectionId,
        request: FacilitatorRequest,
    ) -> Result<Message, OperationError> {
        observe("session.clearVotes", async {
            let saved = self
                .facilitator_update(&request, "clear votes", Session::clear_votes)
                .await?;
            Ok(Message::SessionUpdated(saved.view_for(connection_id)))
        })
        .await
    }

    /// Drop every watcher record of a closed connection.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Result<usize, OperationError> {
        let removed = self.interest.forget_connection(connection_id).await?;
        if removed > 0 {
            debug!(connection_id = %connection_id, removed, "watchers forgotten");
        }
        Ok(removed)
    }

    async fn facilitator_update(
        &self,
        request: &FacilitatorRequest,
        action: &'static str,
        apply: fn(&mut Session),
    ) -> Result<Session, OperationError> {
        request.validate().map_err(OperationError::Validation)?;
        let session_id = request.session_id();
        self.with_session_lock(&session_id, || async {
            let mut session = self.load_existing(&session_id).await?;
            if !session.facilitator_key_matches(&request.facilitator_session_key) {
                warn!(
                    session_id = %session_id,
                    "attempt to {action} with incorrect facilitator key"
                );
                return Err(OperationError::PermissionDenied);
            }
            apply(&mut session);
            Ok(self.sessions.save(session).await?)
        })
        .await
    }

    /// Run `body` while holding the session's lock. The lock is released on
    /// every path before this returns; a failed release is only logged.
    pub async fn with_session_lock<T, F, Fut>(
        &self,
        session_id: &SessionId,
        body: F,
    ) -> Result<T, OperationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let guard = LockGuard::acquire(self.locks.clone(), LockKey::for_session(session_id))
            .await
            .inspect_err(|e| error!(session_id = %session_id, error = %e, "error locking session"))?;
        let result = body().await;
        if let Err(e) = guard.release().await {
            error!(session_id = %session_id, error = %e, "unable to release lock");
        }
        result
    }

    async fn load_existing(&self, session_id: &SessionId) -> Result<Session, OperationError> {
        match self.sessions.load(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => {
                warn!(session_id = %session_id, "session not found");
                Err(OperationError::PermissionDenied)
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "error reading session");
                Err(OperationError::PermissionDenied)
            }
        }
    }

    /// Push a direct reply to the requester. Failures never affect the operation.
    async fn reply(&self, connection_id: &ConnectionId, message: &Message) {
        match self.pusher.send(connection_id, message).await {
            Ok(PushOutcome::Delivered) => {}
            Ok(PushOutcome::Gone) => {
                debug!(
                    connection_id = %connection_id,
                    message_type = %message.message_type(),
                    "requester gone before reply"
                );
            }
            Err(e) => {
                error!(
                    connection_id = %connection_id,
                    message_type = %message.message_type(),
                    error = %e,
                    "error dispatching message"
                );
            }
        }
    }
}

async fn observe<T>(
    action: &'static str,
    operation: impl Future<Output = Result<T, OperationError>>,
) -> Result<T, OperationError> {
    let started = Instant::now();
    let result = operation.await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.error_kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "action" => action, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "action" => action)
        .record(started.elapsed().as_secs_f64());
    result
}
