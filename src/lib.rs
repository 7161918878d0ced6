//! labdash - homelab dashboard health monitoring.
//!
//! Registered services are probed on a fixed interval with bounded
//! concurrency, each outcome is appended to a status log, and a retention
//! sweeper keeps that log from growing without bound.

pub mod config;
pub mod db;
pub mod probe;
pub mod scheduler;
pub mod web;
