//! Gateway: inbound dispatch, outbound sends and delayed sends.
//!
//! Everything that talks to the link goes through [`OutboundGateway`].

mod dedup;
pub mod dispatch;
pub mod outbound;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::Dispatcher;
pub use outbound::{LinkSource, OutboundGateway};
pub use scheduler::Scheduler;
