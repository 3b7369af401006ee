//! gRPC service implementation.
//!
//! This module adapts tonic requests into [`Call`](crate::server::calls::channel::Call)s,
//! assigns each call its deadline, and hands it to the matching call-shape
//! handler.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`ScoreService`).
//! - [`arrival`] - request arrival stamp that call deadlines are measured from.

pub mod arrival;
pub mod handler;
