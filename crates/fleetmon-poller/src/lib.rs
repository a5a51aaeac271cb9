//! Fleetmon collection engine.
//!
//! The poller fans out one fetch pipeline per registered agent every cycle,
//! updates the in-memory snapshot cache, and writes through to the durable
//! store. The scheduler drives cycles at the configured interval.

pub mod client;
pub mod poller;
pub mod scheduler;

pub use client::AgentClient;
pub use poller::Poller;
pub use scheduler::Scheduler;
