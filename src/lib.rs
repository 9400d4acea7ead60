//! # Task Manager
//!
//! In-memory task service wired together by a small component container.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────┐
//!   │                  Container                   │
//!   │  modules ─► dependency graph ─► hook stack   │
//!   └──────────────────────┬───────────────────────┘
//!                          │ constructs, starts, stops
//!        ┌─────────┬───────┴───┬──────────┬─────────┐
//!        ▼         ▼           ▼          ▼         ▼
//!    database ─► storage ─► tasks ◄─ metrics ◄─── api
//! ```
//!
//! ## Modules
//! - `container`: modules, providers, lifecycle hooks, flags, introspection
//! - `logger`, `database`, `storage`, `metrics`: infrastructure components
//! - `tasks`: task records and the rules around them
//! - `api`: HTTP surface over the task manager
//! - `app`, `cli`: composition root and command-line entrypoint

pub mod api;
pub mod app;
pub mod cli;
pub mod container;
pub mod database;
pub mod logger;
pub mod metrics;
pub mod storage;
pub mod tasks;

pub use container::{Container, ContainerError, Module};
pub use tasks::{Task, TaskError, TaskManager};
