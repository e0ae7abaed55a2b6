use thiserror::Error;

/// Errors surfaced by the update entry points (§4.1 / §7).
///
/// `Ok(UpdateOutcome)` covers both "stored" and "already current" — neither
/// is an error condition. Only genuine rejections become `Err`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("host {0:?} does not exist")]
    MissingHost(String),
    #[error("service {service:?} on host {host:?} does not exist")]
    MissingService { host: String, service: String },
    #[error("metric {metric:?} on host {host:?} does not exist")]
    MissingMetric { host: String, metric: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// What happened as a result of an accepted (non-erroring) update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new object was created, or an existing one was mutated because
    /// `ts` was strictly newer than its `last_update`.
    Stored,
    /// `ts <= last_update`; the object was left untouched.
    Unchanged,
}

pub type UpdateResult = Result<UpdateOutcome, UpdateError>;

/// Errors from expression evaluation (§4.3).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("type mismatch evaluating {op}: {lhs:?} vs {rhs:?}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("field {0:?} is not set on this object")]
    FieldUnset(&'static str),
}

/// Errors from matcher evaluation (§4.4). Most predicates degrade to
/// `false` rather than erroring (type mismatch ⇒ false, per spec); this
/// type only covers cases the matcher tree itself cannot recover from.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("regex right-hand side must be a string or compiled pattern")]
    NotARegex,
    #[error("`in` right-hand side must be an array")]
    InNotAnArray,
}

/// Errors from `Store::iterate` (§4.2 / §7).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IterateError {
    #[error("store has no hosts")]
    Empty,
    #[error("callback aborted iteration with code {0}")]
    Aborted(i32),
}

/// Errors from the JSON serializer (§4.5).
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("write failed: {0}")]
    Write(#[from] std::fmt::Error),
    #[error(transparent)]
    Match(#[from] MatchError),
}
