//! The expression engine (§4.3): field references, constants and binary
//! arithmetic, evaluated against a borrowed store object. Evaluation never
//! mutates the object it's run against.

use crate::datum::{self, ArithOp, Datum};
use crate::error::EvalError;
use crate::object::{ChildKind, FieldId};
use crate::store::ObjRef;

#[derive(Debug, Clone)]
pub enum Expr {
    Field(FieldId),
    Const(Datum),
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// The value of the named attribute directly attached to the current
    /// object (not a descendant's). Errors with `FieldUnset` when no such
    /// attribute exists — this is what `isnull`/`isnnull` key off of.
    AttributeValue(String),
}

impl Expr {
    pub fn field(id: FieldId) -> Expr {
        Expr::Field(id)
    }

    pub fn constant(value: Datum) -> Expr {
        Expr::Const(value)
    }

    pub fn binary(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn attribute(key: impl Into<String>) -> Expr {
        Expr::AttributeValue(key.into())
    }
}

/// Evaluate `expr` against `obj`. `now` is the caller-supplied clock used
/// by `FieldId::Age` — injected rather than read from the system clock so
/// that evaluation stays deterministic and testable.
pub fn eval(expr: &Expr, obj: ObjRef<'_>, now: i64) -> Result<Datum, EvalError> {
    match expr {
        Expr::Field(id) => Ok(obj.field(*id, now).into_datum()),
        Expr::Const(value) => Ok(value.clone()),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, obj, now)?;
            let rhs = eval(rhs, obj, now)?;
            datum::eval_binary(*op, &lhs, &rhs)
        }
        Expr::AttributeValue(key) => obj
            .children(ChildKind::Attributes)
            .into_iter()
            .find(|child| child.header().name.eq_ignore_ascii_case(key))
            .and_then(|child| child.value().cloned())
            .ok_or(EvalError::FieldUnset("attribute")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TimedHeader;
    use crate::store::{Attribute, Host};
    use std::collections::BTreeMap;

    fn sample_host() -> Host {
        Host {
            key: "h1".into(),
            header: TimedHeader::new("h1", 100),
            attributes: BTreeMap::new(),
            services: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn field_value_projects_name() {
        let host = sample_host();
        let v = eval(&Expr::field(FieldId::Name), ObjRef::Host(&host), 200).unwrap();
        assert_eq!(v, Datum::Str("h1".into()));
    }

    #[test]
    fn age_uses_injected_clock() {
        let host = sample_host();
        let v = eval(&Expr::field(FieldId::Age), ObjRef::Host(&host), 150).unwrap();
        assert_eq!(v, Datum::DateTime(50));
    }

    #[test]
    fn arithmetic_over_two_constants() {
        let host = sample_host();
        let expr = Expr::binary(ArithOp::Add, Expr::constant(Datum::Int(2)), Expr::constant(Datum::Int(3)));
        assert_eq!(eval(&expr, ObjRef::Host(&host), 0).unwrap(), Datum::Int(5));
    }

    #[test]
    fn attribute_value_is_reachable_via_objref() {
        let attr = Attribute {
            key: "k".into(),
            header: TimedHeader::new("k", 1),
            value: Datum::Int(42),
        };
        let v = eval(&Expr::field(FieldId::Name), ObjRef::Attribute(&attr), 0).unwrap();
        assert_eq!(v, Datum::Str("k".into()));
        assert_eq!(ObjRef::Attribute(&attr).value(), Some(&Datum::Int(42)));
    }

    #[test]
    fn attribute_lookup_is_case_insensitive_and_errs_when_missing() {
        let mut host = sample_host();
        host.attributes.insert(
            "region".into(),
            Attribute {
                key: "region".into(),
                header: TimedHeader::new("region", 1),
                value: Datum::Str("eu".into()),
            },
        );
        assert_eq!(
            eval(&Expr::attribute("REGION"), ObjRef::Host(&host), 0).unwrap(),
            Datum::Str("eu".into())
        );
        assert_eq!(
            eval(&Expr::attribute("missing"), ObjRef::Host(&host), 0),
            Err(EvalError::FieldUnset("attribute"))
        );
    }
}
