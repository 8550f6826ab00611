//! Parameter resolution.
//!
//! Binds the arguments given at decoration time against an explicitly
//! declared parameter list and two layers of defaults, producing an ordered
//! [`ConfigurationRecord`]. Class-level defaults win over callable-level ones.
//!
//! An explicit [`ConfigValue::Unset`] is resolved through a separate
//! `<name>_for_unset` default, so "not given" and "given as unset" can mean
//! different things: a missing `max_size` is 128, an unset one is unbounded.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::backing::{CacheArgs, CacheClass, CacheDescriptor, Capacity};
use crate::error::ConfigurationError;
use crate::keys::{KeyFunction, StateAccessor};
use crate::outcome::FailurePolicy;

/// Suffix of the default consulted for a parameter explicitly set to [`ConfigValue::Unset`].
pub const UNSET_SUFFIX: &str = "_for_unset";

/// A configuration value.
#[derive(Clone, PartialEq)]
pub enum ConfigValue {
    /// The "no value" sentinel.
    Unset,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Capacity(Capacity),
    Lifetime(Option<Duration>),
    Failures(FailurePolicy),
    StateAccessor(StateAccessor),
    Key(KeyFunction),
    CacheClass(CacheClass),
    CacheArgs(CacheArgs),
    /// Description of an instantiated cache, as reported by introspection.
    Cache(CacheDescriptor),
}

impl ConfigValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, ConfigValue::Unset)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ConfigValue::Unset => "unset",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Text(_) => "text",
            ConfigValue::Capacity(_) => "capacity",
            ConfigValue::Lifetime(_) => "lifetime",
            ConfigValue::Failures(_) => "failure policy",
            ConfigValue::StateAccessor(_) => "state accessor",
            ConfigValue::Key(_) => "key function",
            ConfigValue::CacheClass(_) => "cache class",
            ConfigValue::CacheArgs(_) => "cache arguments",
            ConfigValue::Cache(_) => "cache",
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Unset => f.write_str("Unset"),
            ConfigValue::Bool(v) => write!(f, "{v}"),
            ConfigValue::Int(v) => write!(f, "{v}"),
            ConfigValue::Float(v) => write!(f, "{v:?}"),
            ConfigValue::Text(v) => write!(f, "{v:?}"),
            ConfigValue::Capacity(v) => write!(f, "{v}"),
            ConfigValue::Lifetime(Some(v)) => write!(f, "{v:?}"),
            ConfigValue::Lifetime(None) => f.write_str("forever"),
            ConfigValue::Failures(v) => write!(f, "{v:?}"),
            ConfigValue::StateAccessor(v) => write!(f, "{v:?}"),
            ConfigValue::Key(v) => write!(f, "{v:?}"),
            ConfigValue::CacheClass(v) => write!(f, "{v:?}"),
            ConfigValue::CacheArgs(v) => write!(f, "{v:?}"),
            ConfigValue::Cache(v) => write!(f, "{v:?}"),
        }
    }
}

macro_rules! config_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for ConfigValue {
                fn from(v: $t) -> Self {
                    ConfigValue::$variant(v.into())
                }
            }
        )*
    };
}

config_from!(
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Capacity => Capacity,
    Option<Duration> => Lifetime,
    FailurePolicy => Failures,
    StateAccessor => StateAccessor,
    KeyFunction => Key,
    CacheClass => CacheClass,
    CacheArgs => CacheArgs,
    CacheDescriptor => Cache,
);

impl From<usize> for ConfigValue {
    fn from(v: usize) -> Self {
        ConfigValue::Capacity(Capacity::Bounded(v))
    }
}

impl From<Duration> for ConfigValue {
    fn from(v: Duration) -> Self {
        ConfigValue::Lifetime(Some(v))
    }
}

/// How a declared parameter binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Binds by keyword or by position.
    Positional,
    /// `*args`: never bound individually.
    VarPositional,
    /// `**kwargs`: accepts any unexpected keyword.
    VarKeyword,
}

/// One declared parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Positional,
        }
    }

    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarPositional,
        }
    }

    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarKeyword,
        }
    }
}

/// A table of defaults looked up by parameter name.
pub trait DefaultSource {
    fn lookup(&self, name: &str) -> Option<ConfigValue>;
}

impl DefaultSource for HashMap<String, ConfigValue> {
    fn lookup(&self, name: &str) -> Option<ConfigValue> {
        self.get(name).cloned()
    }
}

impl DefaultSource for BTreeMap<String, ConfigValue> {
    fn lookup(&self, name: &str) -> Option<ConfigValue> {
        self.get(name).cloned()
    }
}

impl DefaultSource for [(&str, ConfigValue)] {
    fn lookup(&self, name: &str) -> Option<ConfigValue> {
        self.iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }
}

/// Ordered mapping of parameter name to resolved value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigurationRecord {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigurationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Sets a value, keeping the position of an existing entry.
    pub fn insert(&mut self, name: impl Into<String>, value: ConfigValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Inserts at the front, replacing an existing entry.
    pub fn insert_first(&mut self, name: impl Into<String>, value: ConfigValue) {
        let name = name.into();
        self.remove(&name);
        self.entries.insert(0, (name, value));
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfigValue> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DefaultSource for ConfigurationRecord {
    fn lookup(&self, name: &str) -> Option<ConfigValue> {
        self.get(name).cloned()
    }
}

/// Binding options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindOptions {
    /// Reject excess positional and unexpected keyword arguments instead of
    /// discarding or passing them through.
    pub strict: bool,
}

impl BindOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn lenient() -> Self {
        Self { strict: false }
    }
}

/// Binds call-site arguments to `declared` parameters.
///
/// A keyword argument wins over the next positional one. A parameter given
/// neither takes the class default, then the function default, and fails
/// with [`ConfigurationError::MissingParameter`] when there is none.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use memoist_core::{resolve, BindOptions, ConfigValue, ParamSpec};
///
/// let declared = [ParamSpec::positional("a"), ParamSpec::positional("b"), ParamSpec::positional("c")];
/// let class_defaults = HashMap::from([("b".to_string(), ConfigValue::Int(10))]);
/// let function_defaults = HashMap::from([("c".to_string(), ConfigValue::Int(20))]);
///
/// let record = resolve(&declared, &[ConfigValue::Int(1)], &[], &class_defaults, &function_defaults, BindOptions::default()).unwrap();
/// assert_eq!(record.get("a"), Some(&ConfigValue::Int(1)));
/// assert_eq!(record.get("b"), Some(&ConfigValue::Int(10)));
/// assert_eq!(record.get("c"), Some(&ConfigValue::Int(20)));
/// ```
pub fn resolve(
    declared: &[ParamSpec],
    positional: &[ConfigValue],
    keyword: &[(String, ConfigValue)],
    class_defaults: &dyn DefaultSource,
    function_defaults: &dyn DefaultSource,
    options: BindOptions,
) -> Result<ConfigurationRecord, ConfigurationError> {
    let mut keyword: Vec<(String, ConfigValue)> = keyword.to_vec();
    let mut positional = positional.iter().enumerate().peekable();
    let accepts_any_keyword = declared.iter().any(|p| p.kind == ParamKind::VarKeyword);
    let mut record = ConfigurationRecord::new();
    let mut bindable = 0;

    let default_for = |name: &str| {
        class_defaults
            .lookup(name)
            .or_else(|| function_defaults.lookup(name))
    };

    for param in declared {
        if param.kind != ParamKind::Positional {
            continue;
        }
        bindable += 1;
        let name = param.name.as_str();

        let value = if let Some(pos) = keyword.iter().position(|(n, _)| n == name) {
            keyword.remove(pos).1
        } else if let Some((_, value)) = positional.next() {
            value.clone()
        } else {
            default_for(name).ok_or_else(|| ConfigurationError::MissingParameter(name.to_string()))?
        };

        let value = if value.is_unset() {
            class_defaults
                .lookup(&format!("{name}{UNSET_SUFFIX}"))
                .or_else(|| default_for(name))
                .unwrap_or(ConfigValue::Unset)
        } else {
            value
        };

        record.insert(name, value);
    }

    if let Some((index, _)) = positional.peek() {
        if options.strict {
            return Err(ConfigurationError::UnexpectedPositional {
                index: *index,
                declared: bindable,
            });
        }
        debug!(
            discarded = positional.count(),
            "discarding excess positional configuration arguments"
        );
    }

    if let Some((name, _)) = keyword.first() {
        if options.strict && !accepts_any_keyword {
            return Err(ConfigurationError::UnexpectedKeyword(name.clone()));
        }
        for (name, value) in keyword {
            record.insert(name, value);
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> Vec<ParamSpec> {
        names.iter().map(|n| ParamSpec::positional(*n)).collect()
    }

    fn table(entries: &[(&str, ConfigValue)]) -> HashMap<String, ConfigValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn none() -> HashMap<String, ConfigValue> {
        HashMap::new()
    }

    #[test]
    fn test_class_then_function_defaults() {
        let record = resolve(
            &schema(&["a", "b", "c"]),
            &[ConfigValue::Int(1)],
            &[],
            &table(&[("b", ConfigValue::Int(10))]),
            &table(&[("c", ConfigValue::Int(20)), ("b", ConfigValue::Int(99))]),
            BindOptions::default(),
        )
        .unwrap();

        let names: Vec<&str> = record.names().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(record.get("a"), Some(&ConfigValue::Int(1)));
        assert_eq!(record.get("b"), Some(&ConfigValue::Int(10)));
        assert_eq!(record.get("c"), Some(&ConfigValue::Int(20)));
    }

    #[test]
    fn test_keyword_wins_over_positional() {
        let record = resolve(
            &schema(&["a", "b"]),
            &[ConfigValue::Int(1)],
            &[("a".to_string(), ConfigValue::Int(5))],
            &none(),
            &none(),
            BindOptions::default(),
        )
        .unwrap();
        // `a` came by keyword, so the positional value binds to `b`
        assert_eq!(record.get("a"), Some(&ConfigValue::Int(5)));
        assert_eq!(record.get("b"), Some(&ConfigValue::Int(1)));
    }

    #[test]
    fn test_missing_without_default_fails() {
        let err = resolve(&schema(&["a"]), &[], &[], &none(), &none(), BindOptions::default());
        assert_eq!(err, Err(ConfigurationError::MissingParameter("a".to_string())));
    }

    #[test]
    fn test_unset_uses_unset_default() {
        let class = table(&[
            ("max_size", ConfigValue::Capacity(Capacity::Bounded(128))),
            ("max_size_for_unset", ConfigValue::Capacity(Capacity::Unbounded)),
        ]);
        let record = resolve(
            &schema(&["max_size"]),
            &[ConfigValue::Unset],
            &[],
            &class,
            &none(),
            BindOptions::default(),
        )
        .unwrap();
        assert_eq!(record.get("max_size"), Some(&ConfigValue::Capacity(Capacity::Unbounded)));

        let missing = resolve(&schema(&["max_size"]), &[], &[], &class, &none(), BindOptions::default()).unwrap();
        assert_eq!(missing.get("max_size"), Some(&ConfigValue::Capacity(Capacity::Bounded(128))));
    }

    #[test]
    fn test_unset_falls_back_to_plain_default() {
        let record = resolve(
            &schema(&["typed"]),
            &[],
            &[("typed".to_string(), ConfigValue::Unset)],
            &table(&[("typed", ConfigValue::Bool(false))]),
            &none(),
            BindOptions::default(),
        )
        .unwrap();
        assert_eq!(record.get("typed"), Some(&ConfigValue::Bool(false)));

        let record = resolve(
            &schema(&["key"]),
            &[ConfigValue::Unset],
            &[],
            &none(),
            &none(),
            BindOptions::default(),
        )
        .unwrap();
        assert_eq!(record.get("key"), Some(&ConfigValue::Unset));
    }

    #[test]
    fn test_excess_positional() {
        let lenient = resolve(
            &schema(&["a"]),
            &[ConfigValue::Int(1), ConfigValue::Int(2)],
            &[],
            &none(),
            &none(),
            BindOptions::lenient(),
        )
        .unwrap();
        assert_eq!(lenient.len(), 1);

        let strict = resolve(
            &schema(&["a"]),
            &[ConfigValue::Int(1), ConfigValue::Int(2)],
            &[],
            &none(),
            &none(),
            BindOptions::strict(),
        );
        assert_eq!(
            strict,
            Err(ConfigurationError::UnexpectedPositional { index: 1, declared: 1 })
        );
    }

    #[test]
    fn test_unexpected_keyword() {
        let kwargs = [("extra".to_string(), ConfigValue::Bool(true))];
        let lenient = resolve(&schema(&["a"]), &[ConfigValue::Int(1)], &kwargs, &none(), &none(), BindOptions::lenient())
            .unwrap();
        assert_eq!(lenient.get("extra"), Some(&ConfigValue::Bool(true)));

        let strict = resolve(&schema(&["a"]), &[ConfigValue::Int(1)], &kwargs, &none(), &none(), BindOptions::strict());
        assert_eq!(strict, Err(ConfigurationError::UnexpectedKeyword("extra".to_string())));

        let mut with_kwargs = schema(&["a"]);
        with_kwargs.push(ParamSpec::var_keyword("kwargs"));
        let relaxed = resolve(&with_kwargs, &[ConfigValue::Int(1)], &kwargs, &none(), &none(), BindOptions::strict())
            .unwrap();
        assert!(relaxed.contains("extra"));
        assert!(!relaxed.contains("kwargs"));
    }

    #[test]
    fn test_var_positional_is_skipped() {
        let declared = vec![
            ParamSpec::positional("a"),
            ParamSpec::var_positional("args"),
            ParamSpec::positional("b"),
        ];
        let record = resolve(
            &declared,
            &[ConfigValue::Int(1), ConfigValue::Int(2)],
            &[],
            &none(),
            &none(),
            BindOptions::strict(),
        )
        .unwrap();
        assert!(!record.contains("args"));
        assert_eq!(record.get("b"), Some(&ConfigValue::Int(2)));
    }
}
