//! Request and error counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::container::{Hook, Module, Provider};
use crate::logger::Logger;

/// Point-in-time view of the counters. Each counter is loaded on its own,
/// so the pair is not read atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests(),
            errors: self.errors(),
        }
    }
}

pub fn module() -> Module {
    Module::new("metrics", "Metrics Collector").provide(Provider::new(
        "new_metrics",
        |lc, (log,): (Logger,)| {
            let metrics = Arc::new(Metrics::new());
            let summary = Arc::clone(&metrics);
            lc.append(
                Hook::new("counters")
                    .instrument(log.with_component("metrics").span())
                    .on_start(move |_ctx| async move {
                        info!("metrics collector started");
                        anyhow::Ok(())
                    })
                    .on_stop(move |_ctx| async move {
                        let MetricsSnapshot { requests, errors } = summary.snapshot();
                        info!(total_requests = requests, total_errors = errors, "metrics summary");
                        anyhow::Ok(())
                    }),
            );
            Ok(metrics)
        },
    ))
}
