//! Ratelimiter - In-memory Rate Limiting Service
//!
//! This crate implements admission control for API requests. Users manage
//! rate limit rules (a limit, a window, an algorithm and a key pattern) and
//! ask, per rule and caller, whether a request may proceed. Decisions are
//! made against an exact log of recent events per (rule, caller) pair.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
