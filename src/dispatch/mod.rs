//! Connection dispatch
//!
//! - [`Dispatcher`]: routes datagrams to sessions, time-wait, or nowhere
//! - [`TimeWaitRegistry`]: rate-limited answers for forgotten connections
//! - [`WriteBlockedQueue`]: round-robin resumption of blocked writers
//! - [`FatePolicy`]: validity checks for connection-initiating packets

mod dispatcher;
mod fate;
mod session;
mod time_wait;
mod write_blocked;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{Dispatched, Dispatcher, DispatcherStats, DropReason};
pub use fate::{FatePolicy, PacketFate};
pub use session::{Session, SessionContext, SessionEvent, SessionFactory, SessionParams};
pub use time_wait::{TimeWaitRegistry, TimeWaitResponse};
pub use write_blocked::{BlockedWriter, WriteBlockedQueue, WritePass};
