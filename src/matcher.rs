//! The matcher engine (§4.4): boolean predicates over a store object,
//! built out of expressions and composed with the usual boolean algebra
//! plus two structural quantifiers over a host's children.
//!
//! Unlike the original C implementation's manually refcounted matcher
//! nodes, sub-matchers here are just owned (`Box`'d) children — Rust's
//! ownership model already gives us "owned and released on destruction"
//! for free (see DESIGN.md).

use regex::Regex;

use crate::datum::Datum;
use crate::error::{EvalError, MatchError};
use crate::expr::{self, Expr};
use crate::object::ChildKind;
use crate::store::ObjRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Cmp {
        op: CmpOp,
        lhs: Expr,
        rhs: Expr,
    },
    Regex {
        expr: Expr,
        pattern: Regex,
        negate: bool,
    },
    IsNull {
        expr: Expr,
        negate: bool,
    },
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
    Any {
        kind: ChildKind,
        inner: Box<Matcher>,
    },
    All {
        kind: ChildKind,
        inner: Box<Matcher>,
    },
    In {
        expr: Expr,
        set: Expr,
    },
}

impl Matcher {
    pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Matcher {
        Matcher::Cmp { op, lhs, rhs }
    }

    pub fn regex(expr: Expr, pattern: Regex) -> Matcher {
        Matcher::Regex {
            expr,
            pattern,
            negate: false,
        }
    }

    pub fn nregex(expr: Expr, pattern: Regex) -> Matcher {
        Matcher::Regex {
            expr,
            pattern,
            negate: true,
        }
    }

    pub fn isnull(expr: Expr) -> Matcher {
        Matcher::IsNull { expr, negate: false }
    }

    pub fn isnnull(expr: Expr) -> Matcher {
        Matcher::IsNull { expr, negate: true }
    }

    pub fn not(inner: Matcher) -> Matcher {
        Matcher::Not(Box::new(inner))
    }

    pub fn any(kind: ChildKind, inner: Matcher) -> Matcher {
        Matcher::Any {
            kind,
            inner: Box::new(inner),
        }
    }

    pub fn all(kind: ChildKind, inner: Matcher) -> Matcher {
        Matcher::All {
            kind,
            inner: Box::new(inner),
        }
    }
}

/// Evaluate `matcher` against `obj`. `now` is threaded through to any
/// `FieldId::Age` reference the way it is in `expr::eval`.
pub fn eval(matcher: &Matcher, obj: ObjRef<'_>, now: i64) -> Result<bool, MatchError> {
    match matcher {
        Matcher::Cmp { op, lhs, rhs } => {
            let lhs = expr::eval(lhs, obj, now);
            let rhs = expr::eval(rhs, obj, now);
            // A field that's unset (e.g. a missing attribute reference)
            // makes the comparison false rather than an error, same as a
            // type mismatch (§4.4: "Type mismatch ⇒ false (not error)").
            let (lhs, rhs) = match (lhs, rhs) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(EvalError::FieldUnset(_)), _) | (_, Err(EvalError::FieldUnset(_))) => {
                    return Ok(false);
                }
                (Err(e), _) | (_, Err(e)) => return Err(e.into()),
            };
            Ok(compare(*op, &lhs, &rhs))
        }
        Matcher::Regex { expr, pattern, negate } => {
            let v = match expr::eval(expr, obj, now) {
                Ok(v) => v,
                Err(EvalError::FieldUnset(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            let Datum::Str(s) = v else {
                return Err(MatchError::NotARegex);
            };
            Ok(pattern.is_match(&s) != *negate)
        }
        Matcher::IsNull { expr, negate } => {
            let is_null = matches!(expr::eval(expr, obj, now), Err(EvalError::FieldUnset(_)));
            Ok(is_null != *negate)
        }
        Matcher::And(parts) => {
            for part in parts {
                if !eval(part, obj, now)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Matcher::Or(parts) => {
            for part in parts {
                if eval(part, obj, now)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Matcher::Not(inner) => Ok(!eval(inner, obj, now)?),
        Matcher::Any { kind, inner } => {
            for child in obj.children(*kind) {
                if eval(inner, child, now)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Matcher::All { kind, inner } => {
            for child in obj.children(*kind) {
                if !eval(inner, child, now)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Matcher::In { expr, set } => {
            let needle = expr::eval(expr, obj, now)?;
            let haystack = expr::eval(set, obj, now)?;
            let Datum::Array(items) = haystack else {
                return Err(MatchError::InNotAnArray);
            };
            Ok(items.iter().any(|item| item.compare(&needle) == Some(std::cmp::Ordering::Equal)))
        }
    }
}

fn compare(op: CmpOp, lhs: &Datum, rhs: &Datum) -> bool {
    use std::cmp::Ordering::*;
    let Some(ord) = lhs.compare(rhs) else {
        // Type mismatch: false, never an error (§4.4).
        return false;
    };
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
    }
}
