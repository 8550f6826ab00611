//! Outcome wrapper: results and failures as storable values.
//!
//! A memoized callable returns `Result<R, Fault>`. On a miss its result is
//! captured into an [`Outcome`], stored, and replayed to the caller; failures
//! whose kind is allowed by the [`FailurePolicy`] are stored too, so a second
//! call with the same key fails again without running the computation.
//!
//! Every [`Fault`] carries a trace of [`Frame`]s, outermost first. Before a
//! failure is stored, its leading engine frames are stripped by a
//! [`TraceFilter`], so a replayed failure only shows the user's call chain and
//! its point of origin.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::Location;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// One source location in a fault's trace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame {
    file: Cow<'static, str>,
    line: u32,
    column: u32,
}

impl Frame {
    pub fn new(file: impl Into<Cow<'static, str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// The location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: Cow::Borrowed(location.file()),
            line: location.line(),
            column: location.column(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A failure raised by a memoized callable.
///
/// `kind` plays the role of an exception class: it is what the
/// [`FailurePolicy`] matches on.
///
/// # Examples
///
/// ```
/// use memoist_core::Fault;
///
/// fn parse(input: &str) -> Result<i64, Fault> {
///     input
///         .parse()
///         .map_err(|e| Fault::new("ValueError", format!("{e}")))
/// }
///
/// let fault = parse("x").unwrap_err();
/// assert_eq!(fault.kind(), "ValueError");
/// assert_eq!(fault.trace().len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    kind: Cow<'static, str>,
    message: String,
    trace: Vec<Frame>,
}

impl Fault {
    /// Creates a fault whose origin is the caller's location.
    #[track_caller]
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: vec![Frame::caller()],
        }
    }

    /// Records the caller as the new outermost frame.
    #[track_caller]
    pub fn traced(mut self) -> Self {
        self.enter(Frame::caller());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Frames from the outermost call down to the origin.
    pub fn trace(&self) -> &[Frame] {
        &self.trace
    }

    pub fn origin(&self) -> Option<&Frame> {
        self.trace.last()
    }

    pub(crate) fn enter(&mut self, frame: Frame) {
        self.trace.insert(0, frame);
    }
}

/// Which failures are cached.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failures always propagate and are never stored.
    #[default]
    None,
    All,
    Kinds(BTreeSet<String>),
}

impl FailurePolicy {
    /// Caches failures of the given kinds. An empty list caches nothing.
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds: BTreeSet<String> = kinds.into_iter().map(Into::into).collect();
        if kinds.is_empty() {
            FailurePolicy::None
        } else {
            FailurePolicy::Kinds(kinds)
        }
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self::kinds([kind.into()])
    }

    pub fn caches(&self, kind: &str) -> bool {
        match self {
            FailurePolicy::None => false,
            FailurePolicy::All => true,
            FailurePolicy::Kinds(kinds) => kinds.contains(kind),
        }
    }
}

/// Strips leading trace frames whose file matches one of a list of globs.
///
/// In a glob `*` matches a run of word characters and `/` matches either path
/// separator. Any directory prefix is allowed in front of a pattern, so
/// `src/*.rs` matches `/home/me/proj/src/lib.rs` but not `src/a/b.rs`.
#[derive(Clone, Debug)]
pub struct TraceFilter {
    patterns: Vec<String>,
    regex: Option<Regex>,
}

impl TraceFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let regex = compile(&patterns);
        Self { patterns, regex }
    }

    /// Matches the frames of this engine only.
    pub fn engine() -> Self {
        let file = file!();
        let glob = match file.rfind(|c| c == '/' || c == '\\') {
            Some(end) => format!("{}/*.*", &file[..end]),
            None => "*.*".to_string(),
        };
        Self::new([glob])
    }

    /// Matches nothing.
    pub fn disabled() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, file: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(file))
    }

    /// Removes the leading matching frames. The origin frame is always kept.
    pub fn sanitize(&self, fault: &mut Fault) {
        let strip = fault
            .trace
            .iter()
            .take(fault.trace.len().saturating_sub(1))
            .take_while(|frame| self.matches(frame.file()))
            .count();
        fault.trace.drain(..strip);
    }
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self::engine()
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => out.push_str(r"[\w]*"),
            '/' | '\\' => out.push_str(r"[/\\]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out
}

fn compile(patterns: &[String]) -> Option<Regex> {
    if patterns.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = patterns.iter().map(|p| glob_to_regex(p)).collect();
    let source = format!(r"^(?:.*[/\\])?(?:{})$", alternatives.join("|"));
    match Regex::new(&source) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(error = %err, ?patterns, "invalid trace filter, no frames will be stripped");
            None
        }
    }
}

/// The stored result of one computation.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<R> {
    Value(R),
    Failure(Fault),
}

impl<R: Clone> Outcome<R> {
    /// Runs `thunk` and wraps its result.
    ///
    /// A failure allowed by `policy` is sanitized with `filter` and captured;
    /// any other failure is returned as `Err` and must not be stored.
    pub fn capture<F>(thunk: F, policy: &FailurePolicy, filter: &TraceFilter) -> Result<Self, Fault>
    where
        F: FnOnce() -> Result<R, Fault>,
    {
        match thunk() {
            Ok(value) => Ok(Outcome::Value(value)),
            Err(mut fault) => {
                fault.enter(Frame::caller());
                if policy.caches(fault.kind()) {
                    filter.sanitize(&mut fault);
                    Ok(Outcome::Failure(fault))
                } else {
                    Err(fault)
                }
            }
        }
    }

    /// Returns the stored value, or the stored failure as `Err`.
    ///
    /// Values are cloned as they are: an `Arc` result aliases the cached one.
    pub fn replay(&self) -> Result<R, Fault> {
        match self {
            Outcome::Value(value) => Ok(value.clone()),
            Outcome::Failure(fault) => Err(fault.clone()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}
