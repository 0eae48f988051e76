use crate::types::SeqType;
use crate::xdm::{XdmItem, XdmSequence};
use compact_str::CompactString;
use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub type Arity = usize;

/// Error type returned by function resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No function with that name exists.
    Unknown(CompactString),
    /// Function exists, but not for the requested arity. Provides known arities.
    WrongArity { name: CompactString, available: Vec<Arity> },
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Unknown(name) => {
                Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}()"))
            }
            ResolveError::WrongArity { name, available } => Error::from_code(
                ErrorCode::XPST0017,
                format!("function {name}() cannot be called with this arity (known: {available:?})"),
            ),
        }
    }
}

/// Properties the optimizer consults before moving, inlining or dropping a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionFlags {
    /// Same arguments always yield the same result and nothing observable happens.
    pub deterministic: bool,
    pub updating: bool,
    /// Result contains freshly constructed nodes.
    pub constructs: bool,
}

impl FunctionFlags {
    pub const PURE: Self = Self { deterministic: true, updating: false, constructs: false };
    pub const NONDETERMINISTIC: Self = Self { deterministic: false, updating: false, constructs: false };
    pub const UPDATING: Self = Self { deterministic: false, updating: true, constructs: false };
    pub const CONSTRUCTING: Self = Self { deterministic: true, updating: false, constructs: true };
}

impl Default for FunctionFlags {
    fn default() -> Self {
        Self::PURE
    }
}

/// Context passed into function implementations.
pub struct CallCtx<'a> {
    pub dyn_ctx: &'a DynamicContext,
}

pub type FunctionImpl = Arc<dyn Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error> + Send + Sync>;

pub struct FunctionDef {
    pub name: CompactString,
    pub min_arity: Arity,
    /// `None` for variadic functions.
    pub max_arity: Option<Arity>,
    pub flags: FunctionFlags,
    /// Declared result type, if known.
    pub result: Option<SeqType>,
    func: FunctionImpl,
}

impl FunctionDef {
    pub fn accepts(&self, arity: Arity) -> bool {
        arity >= self.min_arity && self.max_arity.is_none_or(|m| arity <= m)
    }

    pub fn invoke(&self, ctx: &CallCtx, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_arity", &self.min_arity)
            .field("max_arity", &self.max_arity)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl PartialEq for FunctionDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.min_arity == other.min_arity && self.max_arity == other.max_arity
    }
}

#[derive(Default)]
pub struct FunctionRegistry {
    // Each name holds one or more arity ranges. A call matches when
    // argc >= min_arity and (max_arity is None or argc <= max_arity).
    fns: HashMap<CompactString, Vec<Arc<FunctionDef>>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.fns.keys().map(CompactString::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_range<F>(
        &mut self,
        name: &str,
        min_arity: Arity,
        max_arity: Option<Arity>,
        flags: FunctionFlags,
        result: Option<SeqType>,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        let def = FunctionDef { name: name.into(), min_arity, max_arity, flags, result, func: Arc::new(f) };
        let entry = self.fns.entry(CompactString::from(name)).or_default();
        // A later registration with the same range replaces the earlier one.
        entry.retain(|d| !(d.min_arity == min_arity && d.max_arity == max_arity));
        entry.push(Arc::new(def));
    }

    pub fn register_fn<F>(&mut self, name: &str, arity: Arity, flags: FunctionFlags, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(name, arity, Some(arity), flags, None, f);
    }

    pub fn register_typed<F>(&mut self, name: &str, arity: Arity, flags: FunctionFlags, result: SeqType, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(name, arity, Some(arity), flags, Some(result), f);
    }

    pub fn register_variadic<F>(&mut self, name: &str, min_arity: Arity, flags: FunctionFlags, result: SeqType, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(name, min_arity, None, flags, Some(result), f);
    }

    /// Resolve a function by name and arity.
    pub fn resolve(&self, name: &str, arity: Arity) -> Result<Arc<FunctionDef>, ResolveError> {
        let Some(cands) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.into()));
        };
        if let Some(def) = cands.iter().find(|d| d.accepts(arity)) {
            return Ok(Arc::clone(def));
        }
        let mut available: Vec<Arity> = cands.iter().filter_map(|d| d.max_arity.map(|m| d.min_arity..=m)).flatten().collect();
        available.sort_unstable();
        available.dedup();
        Err(ResolveError::WrongArity { name: name.into(), available })
    }
}

/// Broad class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A clause violates a structural invariant (engine defect, never user-caused).
    StaticAnalysis,
    /// Raised by a sub-expression during evaluation.
    Evaluation,
    /// A sequence did not have the required number of items.
    Cardinality,
}

/// XQuery error codes emitted by this crate.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FOAR0001, // divide by zero
    FOAR0002, // numeric overflow
    FOER0000, // fn:error default
    FORG0001, // invalid lexical form / casting failure
    FORG0004, // zero-or-one violated
    FORG0005, // exactly-one violated
    FORG0006, // invalid argument type (effective boolean value)
    XPTY0004, // type error
    XPDY0002, // context item undefined
    XPST0017, // unknown function
    FLWR0001, // project specific: clause pipeline invariant violated
    FLWR0002, // project specific: evaluation cancelled
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FOAR0001 => "err:FOAR0001",
            ErrorCode::FOAR0002 => "err:FOAR0002",
            ErrorCode::FOER0000 => "err:FOER0000",
            ErrorCode::FORG0001 => "err:FORG0001",
            ErrorCode::FORG0004 => "err:FORG0004",
            ErrorCode::FORG0005 => "err:FORG0005",
            ErrorCode::FORG0006 => "err:FORG0006",
            ErrorCode::XPTY0004 => "err:XPTY0004",
            ErrorCode::XPDY0002 => "err:XPDY0002",
            ErrorCode::XPST0017 => "err:XPST0017",
            ErrorCode::FLWR0001 => "err:FLWR0001",
            ErrorCode::FLWR0002 => "err:FLWR0002",
        }
    }

    /// Kind an error with this code has unless stated otherwise.
    pub fn default_kind(&self) -> ErrorKind {
        match self {
            ErrorCode::FORG0004 | ErrorCode::FORG0005 => ErrorKind::Cardinality,
            ErrorCode::FLWR0001 => ErrorKind::StaticAnalysis,
            _ => ErrorKind::Evaluation,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, kind: code.default_kind(), message: message.into(), source: None }
    }

    pub fn static_analysis(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::FLWR0001, message)
    }

    pub fn cardinality(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Cardinality, ..Self::from_code(code, message) }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.kind == other.kind && self.message == other.message
    }
}

/// Compile-time environment: where function names are resolved.
#[derive(Debug, Clone)]
pub struct StaticContext {
    pub functions: Arc<FunctionRegistry>,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self { functions: default_functions() }
    }
}

fn default_functions() -> Arc<FunctionRegistry> {
    static DEFAULT: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| Arc::new(crate::functions::default_function_registry())))
}

/// Builder for `StaticContext`.
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self { ctx: StaticContext::default() }
    }

    #[must_use]
    pub fn with_functions(mut self, reg: Arc<FunctionRegistry>) -> Self {
        self.ctx.functions = reg;
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Debug, Clone, Default)]
pub struct DynamicContext {
    pub context_item: Option<XdmItem>,
    pub now: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl DynamicContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::from_code(ErrorCode::FLWR0002, "evaluation cancelled"));
        }
        Ok(())
    }
}

pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl Default for DynamicContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self { ctx: DynamicContext::default() }
    }

    #[must_use]
    pub fn with_context_item(mut self, item: impl Into<XdmItem>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    /// Fix the instant reported by `current-dateTime()`.
    #[must_use]
    pub fn with_now(mut self, now: chrono::DateTime<chrono::FixedOffset>) -> Self {
        self.ctx.now = Some(now);
        self
    }

    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.ctx.cancel_flag = Some(flag);
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}
