//! Component container.
//!
//! Accepts a tree of [`Module`]s, resolves the type dependencies between
//! their providers, instantiates every provider exactly once in a stable
//! topological order, and drives the start/stop hooks those providers
//! record. It also owns the command-line surface the modules declare:
//!
//! ```text
//!  compose(root) ──► register_flags(cmd) ──► apply_flags(matches)
//!                                              │
//!              ┌───────────────┬───────────────┴──────────┐
//!              ▼               ▼                          ▼
//!         run(logger)    inspect(logger)             dot_graph()
//! ```

mod config;
mod error;
mod graph;
mod inspect;
mod lifecycle;
mod module;
mod provider;
mod signal;

pub use config::{parse_integer, Config, Flag, FlagKind, LifecycleConfig};
pub use error::{ContainerError, ErrorKind};
pub use lifecycle::{Hook, HookContext, Lifecycle, Shutdowner};
pub use module::Module;
pub use provider::{Inputs, Invoker, Outputs, Provider, Registry, TypeKey};
pub use signal::shutdown_signal;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use clap::{ArgMatches, Command};
use tracing::{debug, error, info, warn};

use crate::logger::Logger;
use config::{apply_matches, ConfigCell, ConfigHolder};
use graph::{DependencyGraph, Vertex};
use module::Cell;
use provider::ConstructFn;

/// Owner name used for the container's own flags.
const CONTAINER_OWNER: &str = "container";

pub(crate) struct ModuleInfo {
    pub(crate) id: String,
    pub(crate) description: String,
    pub(crate) depth: usize,
    pub(crate) stop_timeout: Option<Duration>,
}

pub(crate) enum NodeKind {
    Config(usize),
    Provider,
    Invoker,
}

struct Node {
    kind: NodeKind,
    construct: Option<ConstructFn>,
}

struct ConfigEntry {
    module: usize,
    cell: Box<dyn ConfigCell>,
}

pub struct Container {
    modules: Vec<ModuleInfo>,
    nodes: Vec<Node>,
    vertices: Vec<Vertex>,
    graph: DependencyGraph,
    configs: Vec<ConfigEntry>,
    lifecycle_config: ConfigHolder<LifecycleConfig>,
    lifecycle: Lifecycle,
    registry: Registry,
    shutdowner: Shutdowner,
    populated: bool,
}

/// Types the container supplies itself.
fn ambient_types() -> Vec<TypeKey> {
    vec![TypeKey::of::<Logger>(), TypeKey::of::<Shutdowner>()]
}

#[derive(Default)]
struct Flattened {
    modules: Vec<ModuleInfo>,
    nodes: Vec<Node>,
    vertices: Vec<Vertex>,
    configs: Vec<ConfigEntry>,
    seen: HashSet<String>,
}

impl Flattened {
    fn push_module(
        &mut self,
        module: Module,
        depth: usize,
        inherited_timeout: Option<Duration>,
    ) -> Result<(), ContainerError> {
        if !self.seen.insert(module.id.clone()) {
            return Err(ContainerError::DuplicateModule(module.id));
        }
        let index = self.modules.len();
        let stop_timeout = module.stop_timeout.or(inherited_timeout);
        self.modules.push(ModuleInfo {
            id: module.id,
            description: module.description,
            depth,
            stop_timeout,
        });

        for cell in module.cells {
            match cell {
                Cell::Config(cell) => {
                    let key = cell.type_key();
                    self.vertices.push(Vertex {
                        module: index,
                        name: format!("config {}", key.short_name()),
                        inputs: Vec::new(),
                        outputs: vec![key],
                    });
                    self.nodes.push(Node {
                        kind: NodeKind::Config(self.configs.len()),
                        construct: None,
                    });
                    self.configs.push(ConfigEntry {
                        module: index,
                        cell,
                    });
                }
                Cell::Provide(provider) => {
                    self.vertices.push(Vertex {
                        module: index,
                        name: provider.name,
                        inputs: provider.inputs,
                        outputs: provider.outputs,
                    });
                    self.nodes.push(Node {
                        kind: NodeKind::Provider,
                        construct: Some(provider.construct),
                    });
                }
                Cell::Invoke(invoker) => {
                    self.vertices.push(Vertex {
                        module: index,
                        name: invoker.name,
                        inputs: invoker.inputs,
                        outputs: Vec::new(),
                    });
                    self.nodes.push(Node {
                        kind: NodeKind::Invoker,
                        construct: Some(invoker.construct),
                    });
                }
                Cell::Module(child) => self.push_module(child, depth + 1, stop_timeout)?,
            }
        }
        Ok(())
    }
}

impl Container {
    /// Validate the module tree and prepare the dependency graph. Nothing is
    /// constructed yet.
    pub fn compose(root: Module) -> Result<Self, ContainerError> {
        let mut flattened = Flattened::default();
        flattened.push_module(root, 0, None)?;

        let module_ids: Vec<String> = flattened.modules.iter().map(|m| m.id.clone()).collect();
        let graph = DependencyGraph::build(&flattened.vertices, &module_ids, &ambient_types())?;

        Ok(Self {
            modules: flattened.modules,
            nodes: flattened.nodes,
            vertices: flattened.vertices,
            graph,
            configs: flattened.configs,
            lifecycle_config: ConfigHolder {
                value: LifecycleConfig::default(),
            },
            lifecycle: Lifecycle::new(),
            registry: Registry::new(),
            shutdowner: Shutdowner::new(),
            populated: false,
        })
    }

    /// Bind every config record's flags to `cmd`. Flag names must be unique
    /// across the whole tree, including the container's own flags.
    pub fn register_flags(&self, cmd: Command) -> Result<Command, ContainerError> {
        let mut owners: HashMap<&'static str, &str> = HashMap::new();
        let mut cmd = cmd;

        let container_flags = self.lifecycle_config.flags();
        let module_flags = self.configs.iter().flat_map(|entry| {
            let owner = self.modules[entry.module].id.as_str();
            entry.cell.flags().into_iter().map(move |flag| (owner, flag))
        });

        for (owner, flag) in container_flags
            .into_iter()
            .map(|flag| (CONTAINER_OWNER, flag))
            .chain(module_flags)
        {
            if let Some(previous) = owners.insert(flag.name, owner) {
                return Err(ContainerError::DuplicateFlag {
                    flag: flag.name.to_string(),
                    module: owner.to_string(),
                    previous: previous.to_string(),
                });
            }
            cmd = cmd.arg(flag.to_arg());
        }
        Ok(cmd)
    }

    /// Copy parsed flag values into the config records.
    pub fn apply_flags(&mut self, matches: &ArgMatches) -> Result<(), ContainerError> {
        apply_matches(&mut self.lifecycle_config, matches)?;
        for entry in &mut self.configs {
            apply_matches(entry.cell.as_mut(), matches)?;
        }
        Ok(())
    }

    /// Current value of a config record.
    pub fn config<C: Config>(&self) -> Option<&C> {
        if let Some(value) = self.lifecycle_config.as_any().downcast_ref::<C>() {
            return Some(value);
        }
        self.configs
            .iter()
            .find_map(|entry| entry.cell.as_any().downcast_ref::<C>())
    }

    /// Subcommands exposing the container's introspection.
    pub fn command(&self) -> Vec<Command> {
        vec![
            Command::new("inspect")
                .about("Print modules, their configs, providers and lifecycle hooks"),
            Command::new("dot-graph").about("Print the module dependency graph in DOT form"),
        ]
    }

    /// Instantiate every provider once, in topological order, and run the
    /// invokers. Idempotent.
    pub fn populate(&mut self, logger: &Logger) -> Result<(), ContainerError> {
        if self.populated {
            return Ok(());
        }
        self.registry.insert(logger.clone());
        self.registry.insert(self.shutdowner.clone());

        for index in self.graph.order() {
            let vertex = &self.vertices[index];
            let module = &self.modules[vertex.module];
            self.lifecycle.enter(&module.id, module.stop_timeout);

            let node = &mut self.nodes[index];
            match node.kind {
                NodeKind::Config(config) => self.configs[config].cell.provide(&mut self.registry),
                NodeKind::Provider | NodeKind::Invoker => {
                    let Some(construct) = node.construct.take() else {
                        continue;
                    };
                    debug!(module = %module.id, node = %vertex.name, "constructing");
                    construct(&mut self.lifecycle, &mut self.registry).map_err(|source| {
                        ContainerError::Construct {
                            node: format!("{} in module {:?}", vertex.name, module.id),
                            source,
                        }
                    })?;
                }
            }
        }
        self.populated = true;
        Ok(())
    }

    /// Run until an interrupt signal arrives.
    pub async fn run(&mut self, logger: Logger) -> Result<(), ContainerError> {
        self.run_until(logger, shutdown_signal()).await
    }

    /// Populate, start every hook in order, wait for `shutdown` (or a
    /// [`Shutdowner`] request), then stop the started hooks in reverse.
    pub async fn run_until<F>(&mut self, logger: Logger, shutdown: F) -> Result<(), ContainerError>
    where
        F: Future<Output = ()>,
    {
        self.populate(&logger)?;

        let LifecycleConfig {
            start_timeout,
            stop_timeout,
        } = self.lifecycle_config.value.clone();

        info!(hooks = self.lifecycle.hooks().len(), "starting");
        self.lifecycle.start(start_timeout, stop_timeout).await?;
        info!("started");

        let shutdowner = self.shutdowner.clone();
        tokio::select! {
            _ = shutdown => info!("interrupt received, shutting down"),
            _ = shutdowner.requested() => warn!("shutdown requested by a component"),
        }

        let stopped = self.lifecycle.stop(stop_timeout).await;
        if let Some(reason) = shutdowner.reason() {
            if let Err(stop_err) = &stopped {
                error!(error = %stop_err, "stop failed during aborted run");
            }
            return Err(ContainerError::Aborted(reason));
        }
        stopped?;
        info!("stopped");
        Ok(())
    }

    /// Plain-text listing of modules, configs, providers and hooks. Builds
    /// every provider (without starting anything) so hooks can be listed.
    pub fn inspect(&mut self, logger: &Logger) -> Result<String, ContainerError> {
        self.populate(logger)?;
        Ok(inspect::render(self))
    }

    /// DOT rendering of the module dependency relation.
    pub fn dot_graph(&self) -> String {
        let module_ids: Vec<String> = self.modules.iter().map(|m| m.id.clone()).collect();
        self.graph.to_dot(&self.vertices, &module_ids)
    }
}
