pub mod clock;
pub mod errors;
pub mod ids;
pub mod lock;
pub mod messages;
pub mod mock;
pub mod requests;
pub mod retry;
pub mod session;
pub mod token;
pub mod traits;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{LockError, PushError, StoreError};
pub use ids::{ConnectionId, SessionId, UserId};
pub use lock::{LockGuard, LockHandle, LockKey};
pub use messages::{Message, MessageType};
pub use session::{Participant, Session};
pub use traits::{BroadcastReport, InterestRegistry, LockManager, Notifier, PushOutcome, Pusher, SessionStore};
pub use view::{FacilitatorView, ParticipantView, SessionView};
