//! End-of-call rules

pub mod controller;

pub use controller::{CallController, CallHandle, CallInput, CallPhase, CallRecord, CallStatus, EndReason};
