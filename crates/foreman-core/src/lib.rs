//! foreman-core
//!
//! Autonomous task orchestration: a bounded pool of workers pulls tasks from
//! category queues, runs an external producer, pushes the artifact through a
//! fixed quality gate, and retries or escalates failures. The state store's
//! compare-and-set transition is the only coordination point.
//!
//! # Modules
//! - **domain**: ids, task record, state graph, failures, decisions, metrics
//! - **ports**: TaskStore, Clock, IdGenerator, Producer, GateCheck, TestRunner
//! - **impls**: in-memory store (+ JSON snapshot), no-op gate tooling
//! - **queue**: TaskQueue over the store
//! - **gate**: QualityGatePipeline
//! - **app**: workers, retry controller, reconciliation, orchestrator, builder
//! - **config** / **manifest**: startup inputs

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod gate;
pub mod impls;
pub mod manifest;
pub mod ports;
pub mod queue;

pub use crate::error::{ForemanError, Result};
