//! Named units of composition.

use std::time::Duration;

use super::config::{Config, ConfigCell, ConfigHolder};
use super::provider::{Invoker, Provider};

pub(crate) enum Cell {
    Config(Box<dyn ConfigCell>),
    Provide(Provider),
    Invoke(Invoker),
    Module(Module),
}

/// A named bundle of config records, providers, invokers and sub-modules.
/// Declaration order is preserved and used to break ordering ties.
pub struct Module {
    pub(crate) id: String,
    pub(crate) description: String,
    pub(crate) stop_timeout: Option<Duration>,
    pub(crate) cells: Vec<Cell>,
}

impl Module {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            stop_timeout: None,
            cells: Vec::new(),
        }
    }

    /// Declare a config record with its default values.
    pub fn config<C: Config>(mut self, default: C) -> Self {
        self.cells
            .push(Cell::Config(Box::new(ConfigHolder { value: default })));
        self
    }

    pub fn provide(mut self, provider: Provider) -> Self {
        self.cells.push(Cell::Provide(provider));
        self
    }

    pub fn invoke(mut self, invoker: Invoker) -> Self {
        self.cells.push(Cell::Invoke(invoker));
        self
    }

    pub fn module(mut self, module: Module) -> Self {
        self.cells.push(Cell::Module(module));
        self
    }

    /// Override the stop deadline for hooks appended by this module's
    /// providers and those of its sub-modules.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }
}
