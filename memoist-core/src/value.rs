//! Dynamic argument model.
//!
//! Memoized callables receive their arguments as a [`CallArgs`] list of [`Arg`]
//! values. Plain data is carried by value; objects are carried as an
//! [`ObjectRef`] and describe themselves through the [`Receiver`] capability
//! trait instead of being inspected by reflection.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::outcome::Fault;
use crate::slot::CacheId;

/// Shared handle to an object passed as an argument or used as a receiver.
pub type ObjectRef = Arc<dyn Receiver>;

/// A single call argument.
#[derive(Clone)]
pub enum Arg {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Arg>),
    /// Key/value pairs in insertion order.
    Map(Vec<(Arg, Arg)>),
    /// A memoization cache passed around as a value. Keyed by identity.
    Cache(CacheId),
    Object(ObjectRef),
}

impl Arg {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Arg::Bytes(bytes.into())
    }

    pub fn object<T: Receiver>(object: Arc<T>) -> Self {
        Arg::Object(object)
    }

    pub fn map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arg>,
        V: Into<Arg>,
    {
        Arg::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Runtime type name, used for typed keys and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::None => "none",
            Arg::Bool(_) => "bool",
            Arg::Int(_) => "int",
            Arg::Float(_) => "float",
            Arg::Str(_) => "str",
            Arg::Bytes(_) => "bytes",
            Arg::Seq(_) => "seq",
            Arg::Map(_) => "map",
            Arg::Cache(_) => "cache",
            Arg::Object(obj) => obj.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Arg::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(v) => Some(*v),
            Arg::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Float(v) => Some(*v),
            Arg::Int(v) => Some(*v as f64),
            Arg::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Arg::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::None, Arg::None) => true,
            (Arg::Bool(a), Arg::Bool(b)) => a == b,
            (Arg::Int(a), Arg::Int(b)) => a == b,
            (Arg::Float(a), Arg::Float(b)) => a == b,
            (Arg::Str(a), Arg::Str(b)) => a == b,
            (Arg::Bytes(a), Arg::Bytes(b)) => a == b,
            (Arg::Seq(a), Arg::Seq(b)) => a == b,
            (Arg::Map(a), Arg::Map(b)) => a == b,
            (Arg::Cache(a), Arg::Cache(b)) => a == b,
            (Arg::Object(a), Arg::Object(b)) => object_address(a) == object_address(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::None => f.write_str("None"),
            Arg::Bool(v) => write!(f, "{v}"),
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v:?}"),
            Arg::Str(v) => write!(f, "{v:?}"),
            Arg::Bytes(v) => write!(f, "b{v:?}"),
            Arg::Seq(v) => f.debug_list().entries(v).finish(),
            Arg::Map(v) => f
                .debug_map()
                .entries(v.iter().map(|(k, v)| (k, v)))
                .finish(),
            Arg::Cache(id) => write!(f, "<cache {id}>"),
            Arg::Object(obj) => write!(f, "<{} at {:#x}>", obj.type_name(), object_address(obj)),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(v: $t) -> Self {
                    Arg::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u16, u32);

impl From<usize> for Arg {
    fn from(v: usize) -> Self {
        Arg::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        Arg::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(f64::from(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(v: Vec<T>) -> Self {
        Arg::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Arg::None, Into::into)
    }
}

impl<K: Into<Arg>, V: Into<Arg>> From<BTreeMap<K, V>> for Arg {
    fn from(v: BTreeMap<K, V>) -> Self {
        Arg::map(v)
    }
}

impl<K: Into<Arg>, V: Into<Arg>, S> From<HashMap<K, V, S>> for Arg {
    fn from(v: HashMap<K, V, S>) -> Self {
        Arg::map(v)
    }
}

impl<T: Receiver> From<Arc<T>> for Arg {
    fn from(v: Arc<T>) -> Self {
        Arg::Object(v)
    }
}

impl From<ObjectRef> for Arg {
    fn from(v: ObjectRef) -> Self {
        Arg::Object(v)
    }
}

/// Object-safe access to the concrete type behind a `dyn Receiver`.
///
/// Implemented for every `'static` type; never implement it by hand.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn any_type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn any_type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<T>())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    match full.find('<') {
        Some(generic) => full[..generic].rsplit("::").next().unwrap_or(full),
        None => full.rsplit("::").next().unwrap_or(full),
    }
}

/// Capability trait for objects that take part in memoized calls.
///
/// Both methods have defaults, so `impl Receiver for MyType {}` is enough for
/// an object keyed by identity. Types that want stateful memoization return
/// their observable state from [`Receiver::state`].
///
/// # Examples
///
/// ```
/// use memoist_core::{Arg, Attr, Receiver, State};
/// use parking_lot::Mutex;
///
/// struct Rectangle {
///     width: Mutex<i64>,
///     height: i64,
/// }
///
/// impl Receiver for Rectangle {
///     fn state(&self) -> State {
///         State::Attributes(vec![
///             ("width".to_string(), Attr::Value(Arg::Int(*self.width.lock()))),
///             ("height".to_string(), Attr::Value(Arg::Int(self.height))),
///         ])
///     }
/// }
/// ```
pub trait Receiver: AsAny + Send + Sync {
    /// Observable state used when keys are derived statefully.
    fn state(&self) -> State {
        State::Opaque
    }

    /// How the object hashes when it appears as an argument.
    fn hashing(&self) -> Hashing {
        Hashing::Identity
    }
}

impl dyn Receiver {
    pub fn downcast_ref<T: Receiver>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        AsAny::any_type_name(self)
    }

    /// Address of the object's data, stable for its lifetime.
    pub fn address(&self) -> usize {
        self as *const dyn Receiver as *const () as usize
    }
}

pub(crate) fn object_address(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

/// Observable state of a receiver, in order of preference.
#[derive(Clone, Debug, PartialEq)]
pub enum State {
    /// The object states exactly what its state is.
    Explicit(Arg),
    /// Named attribute snapshot, like an instance dictionary.
    Attributes(Vec<(String, Attr)>),
    /// Fixed slots; `None` marks an unset slot.
    Slots(Vec<(String, Option<Attr>)>),
    /// No structured state: key by identity.
    Opaque,
}

/// A single named attribute of a receiver.
#[derive(Clone, Debug, PartialEq)]
pub enum Attr {
    Value(Arg),
    /// A computed accessor. Never evaluated while snapshotting.
    Accessor,
}

/// Hashing behaviour of an object argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Hashing {
    Identity,
    Value(Arg),
    Unhashable,
}

/// Positional and keyword arguments of one call.
///
/// Build it with the builder methods or with the [`call_args!`](crate::call_args) macro.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Arg>,
    keyword: Vec<(String, Arg)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Adds a keyword argument, replacing an earlier one with the same name.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.keyword.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.keyword.push((name, value)),
        }
        self
    }

    pub fn positional(&self) -> &[Arg] {
        &self.positional
    }

    pub fn keyword(&self) -> &[(String, Arg)] {
        &self.keyword
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&Arg> {
        self.keyword
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Positional argument at `index`, falling back to the keyword `name`.
    pub fn lookup(&self, index: usize, name: &str) -> Option<&Arg> {
        self.get(index).or_else(|| self.named(name))
    }

    /// The first positional argument as a concrete receiver type.
    pub fn receiver<T: Receiver>(&self) -> Option<&T> {
        self.positional
            .first()
            .and_then(Arg::as_object)
            .and_then(|obj| obj.downcast_ref::<T>())
    }

    /// A copy of these arguments with `receiver` prepended.
    pub fn with_receiver(&self, receiver: ObjectRef) -> CallArgs {
        let mut positional = Vec::with_capacity(self.positional.len() + 1);
        positional.push(Arg::Object(receiver));
        positional.extend(self.positional.iter().cloned());
        CallArgs {
            positional,
            keyword: self.keyword.clone(),
        }
    }

    /// The positional argument at `index` as an integer.
    #[track_caller]
    pub fn int(&self, index: usize) -> Result<i64, Fault> {
        let arg = self.require(index)?;
        arg.as_int()
            .ok_or_else(|| type_fault(index, "int", arg.type_name()))
    }

    #[track_caller]
    pub fn float(&self, index: usize) -> Result<f64, Fault> {
        let arg = self.require(index)?;
        arg.as_float()
            .ok_or_else(|| type_fault(index, "float", arg.type_name()))
    }

    #[track_caller]
    pub fn text(&self, index: usize) -> Result<&str, Fault> {
        let arg = self.require(index)?;
        arg.as_str()
            .ok_or_else(|| type_fault(index, "str", arg.type_name()))
    }

    #[track_caller]
    fn require(&self, index: usize) -> Result<&Arg, Fault> {
        self.positional.get(index).ok_or_else(|| {
            Fault::new(
                "TypeError",
                format!("missing positional argument at index {index}"),
            )
        })
    }
}

#[track_caller]
fn type_fault(index: usize, expected: &str, found: &str) -> Fault {
    Fault::new(
        "TypeError",
        format!("argument {index} must be {expected}, not {found}"),
    )
}

/// Builds a [`CallArgs`] from positional values and optional `name = value` keywords.
///
/// ```
/// use memoist_core::call_args;
///
/// let args = call_args![2, "label"; scale = 1.5];
/// assert_eq!(args.positional().len(), 2);
/// assert!(args.named("scale").is_some());
/// ```
#[macro_export]
macro_rules! call_args {
    ($($arg:expr),* $(,)? $(; $($name:ident = $value:expr),* $(,)?)?) => {{
        let args = $crate::CallArgs::new() $(.arg($arg))*;
        $($(let args = args.kwarg(stringify!($name), $value);)*)?
        args
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i64,
    }

    impl Receiver for Point {
        fn hashing(&self) -> Hashing {
            Hashing::Value(Arg::Int(self.x))
        }
    }

    #[test]
    fn test_call_args_macro() {
        let args = call_args![1, "two", 3.0; flag = true];
        assert_eq!(args.positional().len(), 3);
        assert_eq!(args.named("flag"), Some(&Arg::Bool(true)));

        let empty = call_args![];
        assert!(empty.positional().is_empty());
        assert!(empty.keyword().is_empty());

        let only_kw = call_args![; n = 4];
        assert_eq!(only_kw.named("n"), Some(&Arg::Int(4)));
    }

    #[test]
    fn test_kwarg_replaces_duplicate() {
        let args = CallArgs::new().kwarg("a", 1).kwarg("a", 2);
        assert_eq!(args.keyword().len(), 1);
        assert_eq!(args.named("a"), Some(&Arg::Int(2)));
    }

    #[test]
    fn test_receiver_downcast() {
        let point = Arc::new(Point { x: 7 });
        let args = CallArgs::new().arg(1).with_receiver(point);
        assert_eq!(args.receiver::<Point>().map(|p| p.x), Some(7));
        assert_eq!(args.positional().len(), 2);
    }

    #[test]
    fn test_type_names() {
        let point: ObjectRef = Arc::new(Point { x: 0 });
        assert_eq!(Arg::Object(point).type_name(), "Point");
        assert_eq!(Arg::from(1.5).type_name(), "float");
        assert_eq!(Arg::from(vec![1, 2]).type_name(), "seq");
    }

    #[test]
    fn test_typed_accessors_fail_with_type_error() {
        let args = call_args!["x"];
        let fault = args.int(0).unwrap_err();
        assert_eq!(fault.kind(), "TypeError");
        assert!(args.float(3).is_err());
        assert_eq!(args.text(0).unwrap(), "x");
    }

    #[test]
    fn test_object_equality_is_identity() {
        let a: ObjectRef = Arc::new(Point { x: 1 });
        let b: ObjectRef = Arc::new(Point { x: 1 });
        assert_eq!(Arg::Object(a.clone()), Arg::Object(a.clone()));
        assert_ne!(Arg::Object(a), Arg::Object(b));
    }
}
