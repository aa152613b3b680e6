//! Session operations and change fan-out on top of the core seams.

pub mod errors;
pub mod notifier;
pub mod service;

pub use errors::OperationError;
pub use notifier::ChangeNotifier;
pub use service::SessionService;
