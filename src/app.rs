//! Composition root.

use std::sync::Arc;

use tracing::debug;

use crate::api::{self, ApiServer};
use crate::container::{Invoker, Module};
use crate::tasks::{self, Task};
use crate::{database, logger, metrics, storage};

pub const APP_ID: &str = "task-manager";

/// The whole service as one module tree.
pub fn module() -> Module {
    Module::new(APP_ID, "Task Management API")
        .module(logger::module())
        .module(database::module())
        .module(storage::module::<Task>())
        .module(metrics::module())
        .module(tasks::module())
        .module(api::module())
        .invoke(Invoker::new(
            "ensure_api_server",
            |(server,): (Arc<ApiServer>,)| {
                debug!(bound = server.local_addr().is_some(), "API server constructed");
                Ok(())
            },
        ))
}
