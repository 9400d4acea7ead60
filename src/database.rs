//! Simulated database connection.
//!
//! There is no real I/O: the start hook waits a fixed handshake delay and
//! flips the connection flag, the stop hook flips it back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::container::{Hook, HookContext, Module, Provider};
use crate::logger::Logger;

/// Time the simulated handshake takes.
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("database unavailable: not connected")]
    Unavailable,

    #[error("database ping cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Liveness check, abandoned once `ctx` is cancelled or past its
    /// deadline.
    async fn ping(&self, ctx: &HookContext) -> Result<(), DatabaseError>;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct SimulatedDatabase {
    connected: AtomicBool,
}

impl SimulatedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn hook(self: &Arc<Self>, log: Logger) -> Hook {
        let (starting, stopping) = (Arc::clone(self), Arc::clone(self));
        Hook::new("simulated connection")
            .instrument(log.span())
            .on_start(move |ctx| async move {
                info!("connecting to database");
                tokio::select! {
                    _ = tokio::time::sleep(HANDSHAKE_DELAY) => {}
                    _ = ctx.cancelled() => anyhow::bail!("database handshake cancelled"),
                }
                starting.set_connected(true);
                info!("database connected");
                anyhow::Ok(())
            })
            .on_stop(move |_ctx| async move {
                info!("closing database connection");
                stopping.set_connected(false);
                info!("database connection closed");
                anyhow::Ok(())
            })
    }
}

#[async_trait]
impl Database for SimulatedDatabase {
    async fn ping(&self, ctx: &HookContext) -> Result<(), DatabaseError> {
        if ctx.expired() {
            return Err(DatabaseError::Cancelled);
        }
        if self.is_connected() {
            Ok(())
        } else {
            Err(DatabaseError::Unavailable)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub fn module() -> Module {
    Module::new("database", "Database Connection Manager").provide(Provider::new(
        "new_database",
        |lc, (log,): (Logger,)| {
            let database = Arc::new(SimulatedDatabase::new());
            lc.append(database.hook(log.with_component("database")));
            Ok(database as Arc<dyn Database>)
        },
    ))
}
