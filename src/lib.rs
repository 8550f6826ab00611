//! # Memoist
//!
//! A memoization engine for Rust: cache the results of functions and methods
//! called with dynamically typed arguments.
//!
//! ## Features
//!
//! - **Stable keys**: nested sequences, order-independent mappings, loose numbers
//! - **Stateful methods**: key on what a receiver looks like, not on which object it is
//! - **Layered configuration**: call-site values over a global defaults table
//! - **Cached failures**: chosen failure kinds replay exactly like values
//! - **Cache placement**: one cache per callable, or one per receiver
//!
//! ## Quick Start
//!
//! ```rust
//! use memoist::{call_args, memoize};
//!
//! let fib = memoize("fib", &["n"], |args| {
//!     let n = args.int(0)?;
//!     Ok(if n < 2 { n } else { (2..=n).fold((0_i64, 1_i64), |(a, b), _| (b, a + b)).1 })
//! })
//! .unwrap();
//!
//! // First call computes the result
//! assert_eq!(fib.call(&call_args![30]).unwrap(), 832040);
//! // Second call returns the cached result
//! assert_eq!(fib.call(&call_args![30]).unwrap(), 832040);
//! assert_eq!(fib.cache_info(None).unwrap().hits, 1);
//! ```
//!
//! ## Methods
//!
//! A callable whose first declared parameter is `self` is a method. Its
//! receiver is passed as the first argument and, with `stateful`, keyed by the
//! state it reports:
//!
//! ```rust
//! use std::sync::Arc;
//! use memoist::{call_args, Arg, Attr, CallArgs, Decorate, Receiver, State};
//!
//! struct Circle {
//!     radius: f64,
//! }
//!
//! impl Receiver for Circle {
//!     fn state(&self) -> State {
//!         State::Attributes(vec![("radius".to_string(), Attr::Value(Arg::Float(self.radius)))])
//!     }
//! }
//!
//! let area = Decorate::function()
//!     .stateful(true)
//!     .build("area", &["self"], |args: &CallArgs| {
//!         let circle = args.receiver::<Circle>().map_or(0.0, |c| c.radius);
//!         Ok(std::f64::consts::PI * circle * circle)
//!     })
//!     .unwrap();
//!
//! let a = area.call(&call_args![Arc::new(Circle { radius: 2.0 })]).unwrap();
//! let b = area.call(&call_args![Arc::new(Circle { radius: 2.0 })]).unwrap();
//! assert_eq!(a, b);
//! ```
//!
//! ## Failures
//!
//! Failures are not cached unless asked for:
//!
//! ```rust
//! use memoist::{call_args, Decorate, FailurePolicy, Fault};
//!
//! let parse = Decorate::function()
//!     .exceptions(FailurePolicy::kind("ValueError"))
//!     .build("parse", &["text"], |args| {
//!         args.text(0)?
//!             .parse::<i64>()
//!             .map_err(|e| Fault::new("ValueError", e.to_string()))
//!     })
//!     .unwrap();
//!
//! assert!(parse.call(&call_args!["x"]).is_err());
//! // replayed from the cache
//! assert!(parse.call(&call_args!["x"]).is_err());
//! assert_eq!(parse.cache_info(None).unwrap().hits, 1);
//! ```

use std::sync::Arc;

pub use memoist_core::*;

/// Memoizes a free function with the global defaults.
///
/// # Examples
///
/// ```rust
/// use memoist::{call_args, memoize};
///
/// let double = memoize("double", &["n"], |args| Ok(args.int(0)? * 2)).unwrap();
/// assert_eq!(double.call(&call_args![21]).unwrap(), 42);
/// ```
pub fn memoize<R, F>(name: &str, params: &[&str], call: F) -> Result<Memoized<R>, ConfigurationError>
where
    R: Clone + Send + Sync + 'static,
    F: Fn(&CallArgs) -> Result<R, Fault> + Send + Sync + 'static,
{
    Decorate::function().build(name, params, call)
}

/// The global defaults table.
///
/// Changes apply to callables decorated afterwards.
///
/// # Examples
///
/// ```rust
/// use memoist::{defaults, ConfigValue};
///
/// defaults().set("typed", true);
/// assert_eq!(defaults().get("typed"), Some(ConfigValue::Bool(true)));
/// defaults().reset();
/// ```
pub fn defaults() -> &'static Defaults {
    Defaults::global()
}

/// Drops the per-instance caches held for `receiver` in the global registry.
///
/// Meant for the receiver's `Drop`.
pub fn release(receiver: &dyn Receiver) -> usize {
    Registry::global().release(receiver)
}

/// A private defaults table, starting from the standard values.
pub fn fresh_defaults() -> Arc<Defaults> {
    Arc::new(Defaults::new())
}
