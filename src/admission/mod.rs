//! Per-endpoint admission control for outbound remote calls.
//!
//! Every remote call is counted against a sliding window for its endpoint
//! class. Calls over the limit are rejected immediately with a retry hint,
//! a remote "too many requests" fills the window locally, and every success
//! is followed by a randomized cooldown.

pub mod controller;
pub mod policy;
pub mod usage;

pub use controller::{AdmissionController, Outcome, Reservation};
pub use policy::{AdmissionSettings, CooldownRange, EndpointPolicy, PolicyTable};
pub use usage::UsageLog;
