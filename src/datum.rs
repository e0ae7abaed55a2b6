//! Tagged values (§3 / §4.3): the one value type every attribute, field
//! extraction, expression and matcher ultimately traffics in.

use std::cmp::Ordering;
use std::fmt;

use crate::error::EvalError;

/// A tagged value. Arrays are homogeneous — `Array` holds same-variant
/// elements, enforced by construction rather than by the type system, the
/// same tradeoff the spec's own "typed array of any of those" makes.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Int(i64),
    Double(f64),
    Str(String),
    /// Microseconds since the Unix epoch.
    DateTime(i64),
    Blob(Vec<u8>),
    Array(Vec<Datum>),
}

impl Datum {
    /// Rough byte footprint, used by callers that want to bound buffer
    /// growth before serializing a large projection.
    pub fn estimated_size(&self) -> usize {
        match self {
            Datum::Int(_) | Datum::DateTime(_) => 8,
            Datum::Double(_) => 8,
            Datum::Str(s) => s.len(),
            Datum::Blob(b) => b.len(),
            Datum::Array(items) => items.iter().map(Datum::estimated_size).sum(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Int(_) => "int",
            Datum::Double(_) => "double",
            Datum::Str(_) => "string",
            Datum::DateTime(_) => "datetime",
            Datum::Blob(_) => "blob",
            Datum::Array(_) => "array",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Double(d) => Some(*d),
            Datum::DateTime(us) => Some(*us as f64),
            _ => None,
        }
    }

    /// Comparator used by `cmp_{eq,ne,lt,le,gt,ge}`. Numeric kinds
    /// (int/double/datetime) compare across variants; anything else must
    /// match variant-for-variant. `None` means "incomparable", which the
    /// matcher layer turns into `false` rather than an error.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        match (self, other) {
            (Datum::Str(a), Datum::Str(b)) => a.partial_cmp(b),
            (Datum::Blob(a), Datum::Blob(b)) => a.partial_cmp(b),
            (Datum::Array(a), Datum::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Some(Ordering::Equal) => continue,
                        other => return other,
                    }
                }
                a.len().partial_cmp(&b.len())
            }
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Format the value the way the JSON serializer and debug logging want
    /// to see it — not the JSON encoding itself (see `json::write_datum`).
    pub fn format_to_string(&self) -> String {
        match self {
            Datum::Int(i) => i.to_string(),
            Datum::Double(d) => d.to_string(),
            Datum::Str(s) => s.clone(),
            Datum::DateTime(us) => crate::json::format_timestamp_micros(*us),
            Datum::Blob(b) => hex_encode(b),
            Datum::Array(items) => {
                let parts: Vec<String> = items.iter().map(Datum::format_to_string).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_to_string())
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "mod",
            ArithOp::Concat => "concat",
        }
    }
}

/// Binary arithmetic with the datum-promotion rules from §4.3: integer
/// promotes to double when mixed with a double, `concat` requires two
/// strings, everything else that isn't numeric-with-numeric is a type
/// error.
pub fn eval_binary(op: ArithOp, lhs: &Datum, rhs: &Datum) -> Result<Datum, EvalError> {
    if op == ArithOp::Concat {
        return match (lhs, rhs) {
            (Datum::Str(a), Datum::Str(b)) => Ok(Datum::Str(format!("{a}{b}"))),
            _ => Err(mismatch(op, lhs, rhs)),
        };
    }

    match (lhs, rhs) {
        (Datum::Int(a), Datum::Int(b)) => int_arith(op, *a, *b),
        (Datum::Str(a), Datum::Str(b)) if op == ArithOp::Add => {
            Ok(Datum::Str(format!("{a}{b}")))
        }
        _ => {
            let (a, b) = (
                lhs.as_f64().ok_or_else(|| mismatch(op, lhs, rhs))?,
                rhs.as_f64().ok_or_else(|| mismatch(op, lhs, rhs))?,
            );
            double_arith(op, a, b)
        }
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Datum, EvalError> {
    match op {
        ArithOp::Add => Ok(Datum::Int(a.wrapping_add(b))),
        ArithOp::Sub => Ok(Datum::Int(a.wrapping_sub(b))),
        ArithOp::Mul => Ok(Datum::Int(a.wrapping_mul(b))),
        ArithOp::Div => {
            if b == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Datum::Int(a / b))
            }
        }
        ArithOp::Mod => {
            if b == 0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Datum::Int(a % b))
            }
        }
        ArithOp::Concat => unreachable!("handled by caller"),
    }
}

fn double_arith(op: ArithOp, a: f64, b: f64) -> Result<Datum, EvalError> {
    match op {
        ArithOp::Add => Ok(Datum::Double(a + b)),
        ArithOp::Sub => Ok(Datum::Double(a - b)),
        ArithOp::Mul => Ok(Datum::Double(a * b)),
        ArithOp::Div => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Datum::Double(a / b))
            }
        }
        ArithOp::Mod => {
            if b == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Datum::Double(a % b))
            }
        }
        ArithOp::Concat => unreachable!("handled by caller"),
    }
}

fn mismatch(op: ArithOp, lhs: &Datum, rhs: &Datum) -> EvalError {
    EvalError::TypeMismatch {
        op: op.name(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_numeric_across_variants() {
        assert_eq!(Datum::Int(5).compare(&Datum::Double(5.0)), Some(Ordering::Equal));
        assert_eq!(Datum::DateTime(1).compare(&Datum::Int(2)), Some(Ordering::Less));
    }

    #[test]
    fn compare_incomparable_is_none() {
        assert_eq!(Datum::Str("a".into()).compare(&Datum::Int(1)), None);
    }

    #[test]
    fn concat_requires_strings() {
        assert!(eval_binary(ArithOp::Concat, &Datum::Str("a".into()), &Datum::Str("b".into())).is_ok());
        assert!(eval_binary(ArithOp::Concat, &Datum::Int(1), &Datum::Str("b".into())).is_err());
    }

    #[test]
    fn int_promotes_to_double_when_mixed() {
        let r = eval_binary(ArithOp::Add, &Datum::Int(2), &Datum::Double(0.5)).unwrap();
        assert_eq!(r, Datum::Double(2.5));
    }

    #[test]
    fn division_by_zero_errors() {
        assert_eq!(
            eval_binary(ArithOp::Div, &Datum::Int(1), &Datum::Int(0)),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn string_plus_string_is_concatenation() {
        let r = eval_binary(ArithOp::Add, &Datum::Str("foo".into()), &Datum::Str("bar".into())).unwrap();
        assert_eq!(r, Datum::Str("foobar".into()));
    }

    #[test]
    fn hex_encoding_is_lowercase_fixed_width() {
        assert_eq!(hex_encode(&[0, 255, 16]), "00ff10");
    }
}
