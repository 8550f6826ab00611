//! Decoration-time configuration.
//!
//! [`Defaults`] is the class-level defaults table consulted by the
//! [parameter resolver](crate::resolve); [`MemoConfig`] is the typed view of a
//! resolved [`ConfigurationRecord`].

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::backing::{CacheArgs, CacheClass, CacheDescriptor, CacheParams, Capacity};
use crate::error::ConfigurationError;
use crate::keys::{KeyFunction, StateAccessor};
use crate::outcome::{FailurePolicy, TraceFilter};
use crate::params::{ConfigValue, ConfigurationRecord, DefaultSource, ParamSpec, UNSET_SUFFIX};

/// Parameters accepted by every memoizing decoration, in binding order.
pub const DECORATION_PARAMS: [&str; 9] = [
    "max_size",
    "time_to_live",
    "typed",
    "exceptions",
    "stateful",
    "shared",
    "key",
    "cache_class",
    "cache_args",
];

/// The declared parameter list of a memoizing decoration.
pub fn decoration_schema() -> Vec<ParamSpec> {
    DECORATION_PARAMS
        .iter()
        .map(|name| ParamSpec::positional(*name))
        .collect()
}

/// Decoration-level fallbacks: every parameter may be left out.
pub fn decoration_defaults() -> BTreeMap<String, ConfigValue> {
    DECORATION_PARAMS
        .iter()
        .map(|name| (name.to_string(), ConfigValue::Unset))
        .collect()
}

fn standard_values() -> BTreeMap<String, ConfigValue> {
    let unset = |name: &str| format!("{name}{UNSET_SUFFIX}");
    BTreeMap::from([
        ("max_size".to_string(), ConfigValue::Capacity(Capacity::Bounded(128))),
        (unset("max_size"), ConfigValue::Capacity(Capacity::Unbounded)),
        (
            "time_to_live".to_string(),
            ConfigValue::Lifetime(Some(Duration::from_secs(600))),
        ),
        (unset("time_to_live"), ConfigValue::Lifetime(None)),
        ("typed".to_string(), ConfigValue::Bool(false)),
        ("exceptions".to_string(), ConfigValue::Failures(FailurePolicy::None)),
        ("stateful".to_string(), ConfigValue::Bool(false)),
        ("shared".to_string(), ConfigValue::Bool(true)),
        ("cache_class".to_string(), ConfigValue::CacheClass(CacheClass::Lru)),
        (unset("cache_class"), ConfigValue::Unset),
    ])
}

/// The class-level defaults table, plus a few protected settings.
///
/// A process-wide instance is available through [`Defaults::global`]; owned
/// instances can be handed to a single decoration instead.
///
/// # Examples
///
/// ```
/// use memoist_core::{Capacity, ConfigValue, Defaults};
///
/// let defaults = Defaults::new();
/// defaults.set("max_size", ConfigValue::Capacity(Capacity::Bounded(16)));
/// assert_eq!(defaults.get("max_size"), Some(ConfigValue::Capacity(Capacity::Bounded(16))));
///
/// defaults.reset();
/// assert_eq!(defaults.get("max_size"), Some(ConfigValue::Capacity(Capacity::Bounded(128))));
/// ```
#[derive(Debug)]
pub struct Defaults {
    values: RwLock<BTreeMap<String, ConfigValue>>,
    receiver_aliases: RwLock<Vec<String>>,
    cache_attribute: RwLock<String>,
    trace_filter: RwLock<TraceFilter>,
}

static GLOBAL_DEFAULTS: Lazy<Defaults> = Lazy::new(Defaults::new);

impl Defaults {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(standard_values()),
            receiver_aliases: RwLock::new(vec!["self".to_string()]),
            cache_attribute: RwLock::new("__caches".to_string()),
            trace_filter: RwLock::new(TraceFilter::engine()),
        }
    }

    /// The process-wide table used by decorations without explicit defaults.
    pub fn global() -> &'static Defaults {
        &GLOBAL_DEFAULTS
    }

    pub fn get(&self, name: &str) -> Option<ConfigValue> {
        self.values.read().get(name).cloned()
    }

    /// Sets a default. Takes effect for decorations made afterwards.
    pub fn set(&self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.write().insert(name.into(), value.into());
    }

    /// Removes a default, so the decoration-level fallback applies.
    pub fn remove(&self, name: &str) -> Option<ConfigValue> {
        self.values.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Restores every entry and protected setting to its initial value.
    pub fn reset(&self) {
        *self.values.write() = standard_values();
        *self.receiver_aliases.write() = vec!["self".to_string()];
        *self.cache_attribute.write() = "__caches".to_string();
        *self.trace_filter.write() = TraceFilter::engine();
    }

    /// First-parameter names that mark a callable as a method.
    pub fn receiver_aliases(&self) -> Vec<String> {
        self.receiver_aliases.read().clone()
    }

    pub fn set_receiver_aliases<I, S>(&self, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.receiver_aliases.write() = aliases.into_iter().map(Into::into).collect();
    }

    /// Attribute name under which per-instance caches are stored; excluded from receiver state.
    pub fn cache_attribute(&self) -> String {
        self.cache_attribute.read().clone()
    }

    pub fn set_cache_attribute(&self, name: impl Into<String>) {
        *self.cache_attribute.write() = name.into();
    }

    pub fn trace_filter(&self) -> TraceFilter {
        self.trace_filter.read().clone()
    }

    pub fn set_trace_filter(&self, filter: TraceFilter) {
        *self.trace_filter.write() = filter;
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultSource for Defaults {
    fn lookup(&self, name: &str) -> Option<ConfigValue> {
        self.get(name)
    }
}

/// How the receiver takes part in the cache key.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Stateful {
    /// Not at all, unless the cache is shared by every receiver.
    #[default]
    Off,
    /// Through the state the receiver reports.
    Snapshot,
    /// Through a custom accessor.
    Accessor(StateAccessor),
}

impl Stateful {
    pub fn is_on(&self) -> bool {
        !matches!(self, Stateful::Off)
    }

    pub fn accessor(&self) -> Option<&StateAccessor> {
        match self {
            Stateful::Accessor(accessor) => Some(accessor),
            _ => None,
        }
    }
}

/// Typed view of a resolved decoration record.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoConfig {
    pub max_size: Capacity,
    pub time_to_live: Option<Duration>,
    pub typed: bool,
    pub failures: FailurePolicy,
    pub stateful: Stateful,
    pub shared: bool,
    pub key: Option<KeyFunction>,
    /// `None` disables caching altogether.
    pub cache_class: Option<CacheClass>,
    pub cache_args: CacheArgs,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            max_size: Capacity::Bounded(128),
            time_to_live: Some(Duration::from_secs(600)),
            typed: false,
            failures: FailurePolicy::None,
            stateful: Stateful::Off,
            shared: true,
            key: None,
            cache_class: Some(CacheClass::Lru),
            cache_args: CacheArgs::default(),
        }
    }
}

fn invalid(name: &str, expected: &'static str, found: &ConfigValue) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        name: name.to_string(),
        expected,
        found: found.kind_name(),
    }
}

fn capacity(value: &ConfigValue) -> Result<Capacity, ConfigurationError> {
    match value {
        ConfigValue::Capacity(capacity) => Ok(*capacity),
        ConfigValue::Int(n) => usize::try_from(*n)
            .map(Capacity::Bounded)
            .map_err(|_| invalid("max_size", "a non-negative size", value)),
        ConfigValue::Unset => Ok(Capacity::Unbounded),
        other => Err(invalid("max_size", "a capacity", other)),
    }
}

fn lifetime(value: &ConfigValue) -> Result<Option<Duration>, ConfigurationError> {
    match value {
        ConfigValue::Lifetime(ttl) => Ok(*ttl),
        ConfigValue::Int(secs) => u64::try_from(*secs)
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| invalid("time_to_live", "a non-negative duration", value)),
        ConfigValue::Float(secs) => Duration::try_from_secs_f64(*secs)
            .map(Some)
            .map_err(|_| invalid("time_to_live", "a non-negative duration", value)),
        ConfigValue::Unset => Ok(None),
        other => Err(invalid("time_to_live", "a duration", other)),
    }
}

fn flag(name: &str, value: &ConfigValue, unset: bool) -> Result<bool, ConfigurationError> {
    match value {
        ConfigValue::Bool(b) => Ok(*b),
        ConfigValue::Unset => Ok(unset),
        other => Err(invalid(name, "a bool", other)),
    }
}

impl MemoConfig {
    /// Converts a resolved record, accepting the loose forms a caller is
    /// likely to pass (plain integers for sizes and seconds, names for classes).
    ///
    /// Names outside the decoration surface are ignored.
    pub fn from_record(record: &ConfigurationRecord) -> Result<Self, ConfigurationError> {
        let mut config = MemoConfig::default();
        for (name, value) in record.iter() {
            match name {
                "max_size" => config.max_size = capacity(value)?,
                "time_to_live" => config.time_to_live = lifetime(value)?,
                "typed" => config.typed = flag(name, value, false)?,
                "exceptions" => {
                    config.failures = match value {
                        ConfigValue::Failures(policy) => policy.clone(),
                        ConfigValue::Bool(true) => FailurePolicy::All,
                        ConfigValue::Bool(false) | ConfigValue::Unset => FailurePolicy::None,
                        ConfigValue::Text(kind) => FailurePolicy::kind(kind.clone()),
                        other => return Err(invalid(name, "a failure policy", other)),
                    }
                }
                "stateful" => {
                    config.stateful = match value {
                        ConfigValue::StateAccessor(accessor) => Stateful::Accessor(accessor.clone()),
                        other => {
                            if flag(name, other, false)? {
                                Stateful::Snapshot
                            } else {
                                Stateful::Off
                            }
                        }
                    }
                }
                "shared" => config.shared = flag(name, value, true)?,
                "key" => {
                    config.key = match value {
                        ConfigValue::Key(key) => Some(key.clone()),
                        ConfigValue::Unset => None,
                        other => return Err(invalid(name, "a key function", other)),
                    }
                }
                "cache_class" => {
                    config.cache_class = match value {
                        ConfigValue::CacheClass(class) => Some(class.clone()),
                        ConfigValue::Text(class) => Some(
                            CacheClass::from_name(class)
                                .ok_or_else(|| invalid(name, "a known cache class", value))?,
                        ),
                        ConfigValue::Unset => None,
                        other => return Err(invalid(name, "a cache class", other)),
                    }
                }
                "cache_args" => {
                    config.cache_args = match value {
                        ConfigValue::CacheArgs(args) => args.clone(),
                        ConfigValue::Unset => CacheArgs::default(),
                        other => return Err(invalid(name, "cache arguments", other)),
                    }
                }
                other => debug!(parameter = other, "ignoring unknown configuration parameter"),
            }
        }
        Ok(config)
    }

    /// The key function in effect: an explicit one, else derived from `typed`.
    pub fn key_function(&self) -> KeyFunction {
        self.key
            .clone()
            .unwrap_or_else(|| KeyFunction::from_typed(self.typed))
    }

    /// The template new caches are built from, or `None` when caching is off.
    pub fn descriptor(&self) -> Option<CacheDescriptor> {
        let class = self.cache_class.clone()?;
        let params = CacheParams::new(self.max_size, self.time_to_live).with_args(&self.cache_args);
        Some(CacheDescriptor::new(class, params))
    }
}
