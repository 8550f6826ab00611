//! Key canonicalization.
//!
//! Arguments are first *reduced* into [`Hashable`] values: mappings become
//! order-independent, sequences keep their order, caches and opaque objects
//! are keyed by identity. The reduced arguments are then combined into a
//! [`CacheKey`], optionally carrying per-argument type tags.
//!
//! Numbers compare loosely, the way they do in dynamically typed languages:
//! `1`, `true` and `1.0` are equal and hash alike. Only a typed key tells them
//! apart, and only at the top level of each argument.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{KeyDerivationError, UnhashableKeyError};
use crate::slot::CacheId;
use crate::value::{object_address, Arg, Attr, Hashing, ObjectRef, Receiver, State};

/// A reduced, hashable argument.
#[derive(Clone)]
pub enum Hashable {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Hashable>),
    /// Unordered: equality and hash ignore pair order.
    Map(Vec<(Hashable, Hashable)>),
    Cache(CacheId),
    /// Keyed by the object's address. Holds the object alive while the key lives.
    Identity(ObjectRef),
}

#[derive(PartialEq, Eq, Hash)]
enum Number {
    Int(i64),
    Float(u64),
}

const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;
// 2^63, the first float past i64::MAX
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl Hashable {
    fn number(&self) -> Option<Number> {
        match self {
            Hashable::Bool(b) => Some(Number::Int(i64::from(*b))),
            Hashable::Int(i) => Some(Number::Int(*i)),
            Hashable::Float(f) => Some(float_number(*f)),
            _ => None,
        }
    }

    /// Tag used by typed keys.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Hashable::None => "none",
            Hashable::Bool(_) => "bool",
            Hashable::Int(_) => "int",
            Hashable::Float(_) => "float",
            Hashable::Str(_) => "str",
            Hashable::Bytes(_) => "bytes",
            Hashable::Seq(_) => "seq",
            Hashable::Map(_) => "map",
            Hashable::Cache(_) => "cache",
            Hashable::Identity(obj) => obj.type_name(),
        }
    }
}

fn float_number(f: f64) -> Number {
    if f.is_nan() {
        Number::Float(CANONICAL_NAN)
    } else if f.fract() == 0.0 && f >= -I64_BOUND && f < I64_BOUND {
        Number::Int(f as i64)
    } else {
        Number::Float(f.to_bits())
    }
}

fn map_eq(a: &[(Hashable, Hashable)], b: &[(Hashable, Hashable)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
}

impl PartialEq for Hashable {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.number(), other.number()) {
            return a == b;
        }
        match (self, other) {
            (Hashable::None, Hashable::None) => true,
            (Hashable::Str(a), Hashable::Str(b)) => a == b,
            (Hashable::Bytes(a), Hashable::Bytes(b)) => a == b,
            (Hashable::Seq(a), Hashable::Seq(b)) => a == b,
            (Hashable::Map(a), Hashable::Map(b)) => map_eq(a, b),
            (Hashable::Cache(a), Hashable::Cache(b)) => a == b,
            (Hashable::Identity(a), Hashable::Identity(b)) => {
                object_address(a) == object_address(b)
            }
            _ => false,
        }
    }
}

impl Eq for Hashable {}

impl Hash for Hashable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(number) = self.number() {
            0u8.hash(state);
            number.hash(state);
            return;
        }
        match self {
            Hashable::None => 1u8.hash(state),
            Hashable::Str(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Hashable::Bytes(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Hashable::Seq(items) => {
                4u8.hash(state);
                items.hash(state);
            }
            Hashable::Map(pairs) => {
                5u8.hash(state);
                pairs.len().hash(state);
                let combined = pairs.iter().fold(0u64, |acc, pair| {
                    let mut hasher = DefaultHasher::new();
                    pair.hash(&mut hasher);
                    acc.wrapping_add(hasher.finish())
                });
                combined.hash(state);
            }
            Hashable::Cache(id) => {
                6u8.hash(state);
                id.hash(state);
            }
            Hashable::Identity(obj) => {
                7u8.hash(state);
                object_address(obj).hash(state);
            }
            Hashable::Bool(_) | Hashable::Int(_) | Hashable::Float(_) => {}
        }
    }
}

impl fmt::Debug for Hashable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hashable::None => f.write_str("None"),
            Hashable::Bool(v) => write!(f, "{v}"),
            Hashable::Int(v) => write!(f, "{v}"),
            Hashable::Float(v) => write!(f, "{v:?}"),
            Hashable::Str(v) => write!(f, "{v:?}"),
            Hashable::Bytes(v) => write!(f, "b{v:?}"),
            Hashable::Seq(v) => f.debug_tuple("").field(v).finish(),
            Hashable::Map(v) => f
                .debug_map()
                .entries(v.iter().map(|(k, v)| (k, v)))
                .finish(),
            Hashable::Cache(id) => write!(f, "<cache {id}>"),
            Hashable::Identity(obj) => {
                write!(f, "<{} at {:#x}>", obj.type_name(), object_address(obj))
            }
        }
    }
}

/// Reduces an argument to its hashable form.
///
/// # Examples
///
/// ```
/// use memoist_core::{reduce, Arg};
///
/// let a = reduce(&Arg::map([("a", 1), ("b", 2)])).unwrap();
/// let b = reduce(&Arg::map([("b", 2), ("a", 1)])).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn reduce(arg: &Arg) -> Result<Hashable, UnhashableKeyError> {
    Ok(match arg {
        Arg::None => Hashable::None,
        Arg::Bool(v) => Hashable::Bool(*v),
        Arg::Int(v) => Hashable::Int(*v),
        Arg::Float(v) => Hashable::Float(*v),
        Arg::Str(v) => Hashable::Str(v.clone()),
        Arg::Bytes(v) => Hashable::Bytes(v.clone()),
        Arg::Seq(items) => Hashable::Seq(items.iter().map(reduce).collect::<Result<_, _>>()?),
        Arg::Map(pairs) => {
            let mut reduced: Vec<(Hashable, Hashable)> = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let key = reduce(k)?;
                let value = reduce(v)?;
                match reduced.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(slot) => slot.1 = value,
                    None => reduced.push((key, value)),
                }
            }
            Hashable::Map(reduced)
        }
        Arg::Cache(id) => Hashable::Cache(*id),
        Arg::Object(obj) => match obj.hashing() {
            Hashing::Identity => Hashable::Identity(Arc::clone(obj)),
            Hashing::Value(value) => reduce(&value)?,
            Hashing::Unhashable => return Err(UnhashableKeyError::new(obj.type_name())),
        },
    })
}

/// Cache key of one call.
///
/// Keyword arguments are kept sorted by name. A typed key also carries the
/// type tag of every top-level argument, positional first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    args: Vec<Hashable>,
    kwargs: Vec<(String, Hashable)>,
    types: Option<Vec<&'static str>>,
}

impl CacheKey {
    /// Builds a key from already reduced arguments.
    ///
    /// Type tags are taken from the reduced values, so an object keyed by
    /// value is tagged like that value. Keys derived from the call itself
    /// tag the runtime type of each argument instead.
    pub fn new(args: Vec<Hashable>, kwargs: Vec<(String, Hashable)>, typed: bool) -> Self {
        let arg_types = args.iter().map(Hashable::type_tag).collect();
        let kwarg_types = kwargs.iter().map(|(_, v)| v.type_tag()).collect();
        Self::from_call(
            ReducedCall {
                args,
                kwargs,
                arg_types,
                kwarg_types,
            },
            typed,
        )
    }

    pub(crate) fn from_call(call: ReducedCall, typed: bool) -> Self {
        let ReducedCall {
            args,
            kwargs,
            arg_types,
            kwarg_types,
        } = call;
        let mut named: Vec<_> = kwargs.into_iter().zip(kwarg_types).collect();
        named.sort_by(|((a, _), _), ((b, _), _)| a.cmp(b));
        let (kwargs, kwarg_types): (Vec<_>, Vec<_>) = named.into_iter().unzip();
        let types = typed.then(|| arg_types.into_iter().chain(kwarg_types).collect());
        Self {
            args,
            kwargs,
            types,
        }
    }

    pub fn untyped(args: Vec<Hashable>, kwargs: Vec<(String, Hashable)>) -> Self {
        Self::new(args, kwargs, false)
    }

    pub fn typed(args: Vec<Hashable>, kwargs: Vec<(String, Hashable)>) -> Self {
        Self::new(args, kwargs, true)
    }

    pub fn args(&self) -> &[Hashable] {
        &self.args
    }

    pub fn kwargs(&self) -> &[(String, Hashable)] {
        &self.kwargs
    }

    pub fn is_typed(&self) -> bool {
        self.types.is_some()
    }
}

/// Reduces the arguments of a call and combines them into a key.
///
/// # Examples
///
/// ```
/// use memoist_core::{make_key, Arg};
///
/// let int = make_key(&[Arg::Int(1)], &[], false).unwrap();
/// let boolean = make_key(&[Arg::Bool(true)], &[], false).unwrap();
/// assert_eq!(int, boolean);
///
/// let int = make_key(&[Arg::Int(1)], &[], true).unwrap();
/// let boolean = make_key(&[Arg::Bool(true)], &[], true).unwrap();
/// assert_ne!(int, boolean);
/// ```
pub fn make_key(
    args: &[Arg],
    kwargs: &[(String, Arg)],
    typed: bool,
) -> Result<CacheKey, KeyDerivationError> {
    Ok(CacheKey::from_call(reduce_call(args, kwargs)?, typed))
}

/// Reduced arguments of one call, with the runtime type of every top-level
/// argument as it was passed.
pub(crate) struct ReducedCall {
    args: Vec<Hashable>,
    kwargs: Vec<(String, Hashable)>,
    arg_types: Vec<&'static str>,
    kwarg_types: Vec<&'static str>,
}

impl ReducedCall {
    /// Puts `value` in front of the positional arguments.
    pub(crate) fn prepend(&mut self, value: Hashable, type_name: &'static str) {
        self.args.insert(0, value);
        self.arg_types.insert(0, type_name);
    }
}

pub(crate) fn reduce_call(
    args: &[Arg],
    kwargs: &[(String, Arg)],
) -> Result<ReducedCall, KeyDerivationError> {
    let reduced_args = args.iter().map(reduce).collect::<Result<Vec<_>, _>>()?;
    let reduced_kwargs = kwargs
        .iter()
        .map(|(name, value)| Ok((name.clone(), reduce(value)?)))
        .collect::<Result<Vec<_>, UnhashableKeyError>>()?;
    Ok(ReducedCall {
        args: reduced_args,
        kwargs: reduced_kwargs,
        arg_types: args.iter().map(Arg::type_name).collect(),
        kwarg_types: kwargs.iter().map(|(_, value)| value.type_name()).collect(),
    })
}

type KeyFn = dyn Fn(&[Hashable], &[(String, Hashable)]) -> CacheKey + Send + Sync;

/// Key function override.
///
/// `Untyped` and `Typed` take precedence over the `typed` flag; a custom
/// function receives the reduced positional and keyword arguments.
#[derive(Clone)]
pub enum KeyFunction {
    Untyped,
    Typed,
    Custom(Arc<KeyFn>),
}

impl KeyFunction {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[Hashable], &[(String, Hashable)]) -> CacheKey + Send + Sync + 'static,
    {
        KeyFunction::Custom(Arc::new(f))
    }

    pub fn from_typed(typed: bool) -> Self {
        if typed {
            KeyFunction::Typed
        } else {
            KeyFunction::Untyped
        }
    }

    pub fn derive(&self, args: Vec<Hashable>, kwargs: Vec<(String, Hashable)>) -> CacheKey {
        match self {
            KeyFunction::Untyped => CacheKey::untyped(args, kwargs),
            KeyFunction::Typed => CacheKey::typed(args, kwargs),
            KeyFunction::Custom(f) => f(&args, &kwargs),
        }
    }

    pub(crate) fn derive_call(&self, call: ReducedCall) -> CacheKey {
        match self {
            KeyFunction::Untyped => CacheKey::from_call(call, false),
            KeyFunction::Typed => CacheKey::from_call(call, true),
            KeyFunction::Custom(f) => f(&call.args, &call.kwargs),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyFunction::Untyped => "untyped",
            KeyFunction::Typed => "typed",
            KeyFunction::Custom(_) => "custom",
        }
    }
}

impl PartialEq for KeyFunction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyFunction::Custom(a), KeyFunction::Custom(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl fmt::Debug for KeyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFunction::{}", self.name())
    }
}

type StateFn = dyn Fn(&dyn Receiver) -> Arg + Send + Sync;

/// Custom receiver-state accessor, preferred over anything the receiver reports.
#[derive(Clone)]
pub struct StateAccessor(Arc<StateFn>);

impl StateAccessor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn Receiver) -> Arg + Send + Sync + 'static,
    {
        StateAccessor(Arc::new(f))
    }

    pub fn call(&self, receiver: &dyn Receiver) -> Arg {
        (self.0)(receiver)
    }
}

impl PartialEq for StateAccessor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StateAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateAccessor(..)")
    }
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn allowed(name: &str, value: &Attr, cache_attribute: &str) -> bool {
    name != cache_attribute
        && !is_dunder(name)
        && matches!(value, Attr::Value(arg) if !matches!(arg, Arg::Cache(_)))
}

fn snapshot<'a, I>(attrs: I, cache_attribute: &str) -> Arg
where
    I: Iterator<Item = (&'a str, Attr)>,
{
    Arg::Map(
        attrs
            .filter(|(name, value)| allowed(name, value, cache_attribute))
            .filter_map(|(name, value)| match value {
                Attr::Value(arg) => Some((Arg::Str(name.to_string()), arg)),
                Attr::Accessor => None,
            })
            .collect(),
    )
}

fn filter_explicit(state: Arg) -> Arg {
    match state {
        Arg::Map(pairs) => Arg::Map(
            pairs
                .into_iter()
                .filter(|(k, v)| {
                    !matches!(k, Arg::Str(name) if is_dunder(name)) && !matches!(v, Arg::Cache(_))
                })
                .collect(),
        ),
        Arg::Seq(items) => Arg::Seq(
            items
                .into_iter()
                .filter(|item| !matches!(item, Arg::Cache(_)))
                .collect(),
        ),
        other => other,
    }
}

/// Snapshot of a receiver's observable state, reduced to a hashable value.
///
/// Preference: the custom `accessor`, then [`State::Explicit`], then
/// [`State::Attributes`], then [`State::Slots`]. An opaque receiver is keyed
/// by identity. Dunder-style names, accessors, caches and the attribute named
/// `cache_attribute` never contribute.
pub fn receiver_state(
    receiver: &ObjectRef,
    accessor: Option<&StateAccessor>,
    cache_attribute: &str,
) -> Result<Hashable, KeyDerivationError> {
    let state = match accessor {
        Some(accessor) => filter_explicit(accessor.call(&**receiver)),
        None => match receiver.state() {
            State::Explicit(state) => filter_explicit(state),
            State::Attributes(attrs) => snapshot(
                attrs.iter().map(|(name, value)| (name.as_str(), value.clone())),
                cache_attribute,
            ),
            State::Slots(slots) => snapshot(
                slots.iter().map(|(name, value)| {
                    (
                        name.as_str(),
                        value.clone().unwrap_or(Attr::Value(Arg::None)),
                    )
                }),
                cache_attribute,
            ),
            State::Opaque => return Ok(Hashable::Identity(Arc::clone(receiver))),
        },
    };
    reduce(&state).map_err(|source| KeyDerivationError::State {
        type_name: receiver.type_name().to_string(),
        source,
    })
}
