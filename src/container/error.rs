//! Container error taxonomy.
//!
//! Static problems (graph, flags) are reported before any provider runs.
//! Lifecycle problems carry the description of the hook that failed.

use thiserror::Error;

/// Broad category of a [`ContainerError`], used to pick the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid module tree or dependency graph.
    Config,
    /// A flag value could not be applied to its config record.
    Flag,
    /// A provider, invoker or start hook failed.
    Start,
    /// A stop hook failed.
    Shutdown,
    /// A component requested shutdown with an error.
    Aborted,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("duplicate module id {0:?}")]
    DuplicateModule(String),

    #[error("flag --{flag} of module {module:?} is already registered by module {previous:?}")]
    DuplicateFlag {
        flag: String,
        module: String,
        previous: String,
    },

    #[error("{node} in module {module:?} requires {type_name}, which no provider contributes")]
    MissingType {
        node: String,
        module: String,
        type_name: String,
    },

    #[error("{type_name} is provided by both {first} and {second}")]
    AmbiguousType {
        type_name: String,
        first: String,
        second: String,
    },

    #[error("dependency cycle between {0}")]
    Cycle(String),

    #[error("invalid value {value:?} for --{flag}: {reason}")]
    InvalidFlag {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("no instance of {0} in the container")]
    MissingInstance(String),

    #[error("{node} failed: {source:#}")]
    Construct {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("start hook {hook:?} failed: {source:#}")]
    Start {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stop hook {hook:?} failed: {source:#}")]
    Shutdown {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("shutdown requested after failure: {0}")]
    Aborted(String),
}

impl ContainerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateModule(_)
            | Self::DuplicateFlag { .. }
            | Self::MissingType { .. }
            | Self::AmbiguousType { .. }
            | Self::Cycle(_) => ErrorKind::Config,
            Self::InvalidFlag { .. } => ErrorKind::Flag,
            Self::MissingInstance(_) | Self::Construct { .. } | Self::Start { .. } => {
                ErrorKind::Start
            }
            Self::Shutdown { .. } => ErrorKind::Shutdown,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }

    /// Process exit code for this error: 2 for flag problems, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Flag => 2,
            _ => 1,
        }
    }
}
