//! Transaction lifecycle and webhook delivery core.
//!
//! This crate exposes its internals for the worker binary in `main.rs`
//! and for integration tests; the binary is the actual entry point.

#![allow(dead_code)]

pub mod admin;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod eventbus;
pub mod idempotency;
pub mod ids;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod repositories;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod signature;
pub mod workerpool;

pub use routes::AppState;
