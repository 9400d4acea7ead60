//! Configuration records and their command-line flags.
//!
//! A record declares its flags with its current values as defaults. After
//! the command line is parsed every flag's raw value is handed back to the
//! record through [`Config::set_flag`], and the record is then provided to
//! the container as an ordinary capability.

use std::any::Any;
use std::time::Duration;

use clap::{Arg, ArgMatches};

use super::error::ContainerError;
use super::provider::{Registry, TypeKey};

/// Value shape of a flag, used to pick clap's value parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    String,
    Integer,
}

/// A single command-line flag bound to a field of a config record.
#[derive(Debug, Clone)]
pub struct Flag {
    pub name: &'static str,
    pub value: String,
    pub help: &'static str,
    pub kind: FlagKind,
}

impl Flag {
    pub fn string(name: &'static str, value: impl ToString, help: &'static str) -> Self {
        Self {
            name,
            value: value.to_string(),
            help,
            kind: FlagKind::String,
        }
    }

    pub fn integer(name: &'static str, value: impl ToString, help: &'static str) -> Self {
        Self {
            name,
            value: value.to_string(),
            help,
            kind: FlagKind::Integer,
        }
    }

    pub(crate) fn to_arg(&self) -> Arg {
        let arg = Arg::new(self.name)
            .long(self.name)
            .help(self.help)
            .default_value(self.value.clone())
            .global(true);
        match self.kind {
            FlagKind::String => arg.value_parser(clap::value_parser!(String)),
            FlagKind::Integer => arg.value_parser(clap::value_parser!(i64)),
        }
    }
}

/// A default-valued configuration record.
pub trait Config: Clone + Send + Sync + 'static {
    /// Flags for this record, carrying the record's current values.
    fn flags(&self) -> Vec<Flag>;

    /// Apply the raw command-line value of one of this record's flags.
    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String>;
}

/// Parse an integer flag value into any integer type, reporting range
/// problems as a message.
pub fn parse_integer<T>(value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| e.to_string())
}

/// Object-safe view of a config record held by the container.
pub(crate) trait ConfigCell: Send {
    fn type_key(&self) -> TypeKey;
    fn flags(&self) -> Vec<Flag>;
    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String>;
    fn provide(&self, registry: &mut Registry);
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct ConfigHolder<C: Config> {
    pub(crate) value: C,
}

impl<C: Config> ConfigCell for ConfigHolder<C> {
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<C>()
    }

    fn flags(&self) -> Vec<Flag> {
        self.value.flags()
    }

    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String> {
        self.value.set_flag(name, value)
    }

    fn provide(&self, registry: &mut Registry) {
        registry.insert(self.value.clone());
    }

    fn as_any(&self) -> &dyn Any {
        &self.value
    }
}

/// Copy every parsed flag of `cell` back into the record.
pub(crate) fn apply_matches(
    cell: &mut dyn ConfigCell,
    matches: &ArgMatches,
) -> Result<(), ContainerError> {
    for flag in cell.flags() {
        let Some(raw) = matches
            .try_get_raw(flag.name)
            .ok()
            .flatten()
            .and_then(|mut values| values.next())
        else {
            continue;
        };
        let raw = raw.to_string_lossy();
        cell.set_flag(flag.name, &raw)
            .map_err(|reason| ContainerError::InvalidFlag {
                flag: flag.name.to_string(),
                value: raw.to_string(),
                reason,
            })?;
    }
    Ok(())
}

/// Container-wide hook deadlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Bound on each start hook; `None` means unbounded.
    pub start_timeout: Option<Duration>,
    /// Bound on each stop hook unless its module overrides it.
    pub stop_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout: None,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl Config for LifecycleConfig {
    fn flags(&self) -> Vec<Flag> {
        vec![
            Flag::integer(
                "start-timeout",
                self.start_timeout.map_or(0, |t| t.as_secs()),
                "Seconds each start hook may take (0 = unbounded)",
            ),
            Flag::integer(
                "stop-timeout",
                self.stop_timeout.as_secs(),
                "Seconds each stop hook may take",
            ),
        ]
    }

    fn set_flag(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "start-timeout" => {
                let secs: u64 = parse_integer(value)?;
                self.start_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "stop-timeout" => {
                let secs: u64 = parse_integer(value)?;
                if secs == 0 {
                    return Err("stop timeout must be at least one second".to_string());
                }
                self.stop_timeout = Duration::from_secs(secs);
            }
            other => return Err(format!("unknown flag {other}")),
        }
        Ok(())
    }
}
