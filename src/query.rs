//! Translation from the HTTP facade's JSON query AST into `Matcher`/`Expr`
//! trees (§10.5). This stands in for the "query parser produces abstract
//! syntax nodes that the core translates into matcher trees" step spec.md
//! §1 attributes to an external collaborator — the grammar here is JSON,
//! not the real SQL-like surface syntax, which stays out of scope.

use regex::Regex;
use serde::Deserialize;

use crate::datum::Datum;
use crate::expr::Expr;
use crate::json::SerializeFlags;
use crate::matcher::{CmpOp, Matcher};
use crate::object::{ChildKind, FieldId};

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid regex pattern: {0}")]
    BadRegex(#[from] regex::Error),
}

/// A field reference: either one of the fixed header fields, or a named
/// attribute directly attached to the object being matched (§4.3's
/// `AttributeValue`, which `isnull`/`isnnull` key off of).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FieldRefDto {
    Named(FieldNameDto),
    Attribute { attribute: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldNameDto {
    Name,
    LastUpdate,
    Age,
    Interval,
    Backend,
}

impl FieldRefDto {
    fn into_expr(self) -> Expr {
        match self {
            FieldRefDto::Attribute { attribute } => Expr::attribute(attribute),
            FieldRefDto::Named(FieldNameDto::Name) => Expr::field(FieldId::Name),
            FieldRefDto::Named(FieldNameDto::LastUpdate) => Expr::field(FieldId::LastUpdate),
            FieldRefDto::Named(FieldNameDto::Age) => Expr::field(FieldId::Age),
            FieldRefDto::Named(FieldNameDto::Interval) => Expr::field(FieldId::Interval),
            FieldRefDto::Named(FieldNameDto::Backend) => Expr::field(FieldId::Backend),
        }
    }
}

/// A JSON-encoded constant datum. `datetime`/`blob` need a tagged form since
/// a bare JSON string is ambiguous with a `Datum::Str`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ValueDto {
    Int(i64),
    Double(f64),
    Str(String),
    Tagged(TaggedValueDto),
    Array(Vec<ValueDto>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggedValueDto {
    Datetime(i64),
    Blob(String),
}

impl ValueDto {
    pub fn into_datum(self) -> Datum {
        match self {
            ValueDto::Int(i) => Datum::Int(i),
            ValueDto::Double(d) => Datum::Double(d),
            ValueDto::Str(s) => Datum::Str(s),
            ValueDto::Tagged(TaggedValueDto::Datetime(us)) => Datum::DateTime(us),
            ValueDto::Tagged(TaggedValueDto::Blob(hex)) => Datum::Blob(decode_hex(&hex)),
            ValueDto::Array(items) => Datum::Array(items.into_iter().map(ValueDto::into_datum).collect()),
        }
    }
}

fn decode_hex(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() / 2);
    let mut i = 0;
    while i + 2 <= s.len() {
        if let Ok(b) = u8::from_str_radix(&s[i..i + 2], 16) {
            out.push(b);
        }
        i += 2;
    }
    out
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum ChildKindDto {
    Attributes,
    Services,
    Metrics,
}

impl From<ChildKindDto> for ChildKind {
    fn from(value: ChildKindDto) -> Self {
        match value {
            ChildKindDto::Attributes => ChildKind::Attributes,
            ChildKindDto::Services => ChildKind::Services,
            ChildKindDto::Metrics => ChildKind::Metrics,
        }
    }
}

/// The JSON matcher-tree AST itself.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MatcherDto {
    Eq { field: FieldRefDto, value: ValueDto },
    Ne { field: FieldRefDto, value: ValueDto },
    Lt { field: FieldRefDto, value: ValueDto },
    Le { field: FieldRefDto, value: ValueDto },
    Gt { field: FieldRefDto, value: ValueDto },
    Ge { field: FieldRefDto, value: ValueDto },
    Regex { field: FieldRefDto, pattern: String },
    Nregex { field: FieldRefDto, pattern: String },
    Isnull { field: FieldRefDto },
    Isnnull { field: FieldRefDto },
    And { matchers: Vec<MatcherDto> },
    Or { matchers: Vec<MatcherDto> },
    Not { matcher: Box<MatcherDto> },
    Any { kind: ChildKindDto, matcher: Box<MatcherDto> },
    All { kind: ChildKindDto, matcher: Box<MatcherDto> },
    In { field: FieldRefDto, set: Vec<ValueDto> },
}

/// Translate a parsed AST node into an evaluable `Matcher` (§4.4 / §10.5).
pub fn translate(dto: MatcherDto) -> Result<Matcher, TranslateError> {
    Ok(match dto {
        MatcherDto::Eq { field, value } => cmp(CmpOp::Eq, field, value),
        MatcherDto::Ne { field, value } => cmp(CmpOp::Ne, field, value),
        MatcherDto::Lt { field, value } => cmp(CmpOp::Lt, field, value),
        MatcherDto::Le { field, value } => cmp(CmpOp::Le, field, value),
        MatcherDto::Gt { field, value } => cmp(CmpOp::Gt, field, value),
        MatcherDto::Ge { field, value } => cmp(CmpOp::Ge, field, value),
        MatcherDto::Regex { field, pattern } => {
            Matcher::regex(field.into_expr(), Regex::new(&pattern)?)
        }
        MatcherDto::Nregex { field, pattern } => {
            Matcher::nregex(field.into_expr(), Regex::new(&pattern)?)
        }
        MatcherDto::Isnull { field } => Matcher::isnull(field.into_expr()),
        MatcherDto::Isnnull { field } => Matcher::isnnull(field.into_expr()),
        MatcherDto::And { matchers } => {
            Matcher::And(matchers.into_iter().map(translate).collect::<Result<_, _>>()?)
        }
        MatcherDto::Or { matchers } => {
            Matcher::Or(matchers.into_iter().map(translate).collect::<Result<_, _>>()?)
        }
        MatcherDto::Not { matcher } => Matcher::not(translate(*matcher)?),
        MatcherDto::Any { kind, matcher } => Matcher::any(kind.into(), translate(*matcher)?),
        MatcherDto::All { kind, matcher } => Matcher::all(kind.into(), translate(*matcher)?),
        MatcherDto::In { field, set } => Matcher::In {
            expr: field.into_expr(),
            set: Expr::constant(Datum::Array(set.into_iter().map(ValueDto::into_datum).collect())),
        },
    })
}

fn cmp(op: CmpOp, field: FieldRefDto, value: ValueDto) -> Matcher {
    Matcher::cmp(op, field.into_expr(), Expr::constant(value.into_datum()))
}

/// The body of `POST /v1/query` (§10.5): an optional filter plus the
/// serializer flags to apply to the projection.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub filter: Option<MatcherDto>,
    pub skip_attributes: bool,
    pub skip_metrics: bool,
    pub skip_services: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        QueryRequest {
            filter: None,
            skip_attributes: false,
            skip_metrics: false,
            skip_services: false,
        }
    }
}

impl QueryRequest {
    pub fn flags(&self) -> SerializeFlags {
        let mut flags = SerializeFlags::NONE;
        if self.skip_attributes {
            flags = flags | SerializeFlags::SKIP_ATTRIBUTES;
        }
        if self.skip_metrics {
            flags = flags | SerializeFlags::SKIP_METRICS;
        }
        if self.skip_services {
            flags = flags | SerializeFlags::SKIP_SERVICES;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_simple_comparison() {
        let json = r#"{"op":"gt","field":"last_update","value":{"datetime":1}}"#;
        let dto: MatcherDto = serde_json::from_str(json).unwrap();
        let matcher = translate(dto).unwrap();
        assert!(matches!(matcher, Matcher::Cmp { op: CmpOp::Gt, .. }));
    }

    #[test]
    fn translates_attribute_reference() {
        let json = r#"{"op":"eq","field":{"attribute":"role"},"value":"db"}"#;
        let dto: MatcherDto = serde_json::from_str(json).unwrap();
        let matcher = translate(dto).unwrap();
        match matcher {
            Matcher::Cmp { lhs: Expr::AttributeValue(key), .. } => assert_eq!(key, "role"),
            other => panic!("expected attribute comparison, got {other:?}"),
        }
    }

    #[test]
    fn translates_nested_boolean_tree() {
        let json = r#"{
            "op": "and",
            "matchers": [
                {"op": "eq", "field": "name", "value": "h1"},
                {"op": "not", "matcher": {"op": "isnull", "field": {"attribute": "env"}}}
            ]
        }"#;
        let dto: MatcherDto = serde_json::from_str(json).unwrap();
        let matcher = translate(dto).unwrap();
        assert!(matches!(matcher, Matcher::And(parts) if parts.len() == 2));
    }

    #[test]
    fn translates_structural_any_over_services() {
        let json = r#"{
            "op": "any",
            "kind": "services",
            "matcher": {"op": "regex", "field": "name", "pattern": "^web"}
        }"#;
        let dto: MatcherDto = serde_json::from_str(json).unwrap();
        let matcher = translate(dto).unwrap();
        assert!(matches!(matcher, Matcher::Any { kind: ChildKind::Services, .. }));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let json = r#"{"op":"regex","field":"name","pattern":"("}"#;
        let dto: MatcherDto = serde_json::from_str(json).unwrap();
        assert!(translate(dto).is_err());
    }

    #[test]
    fn query_request_flags_default_to_none() {
        let req: QueryRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.flags(), SerializeFlags::NONE);
    }

    #[test]
    fn query_request_flags_pick_up_skip_bits() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"skip_attributes":true,"skip_services":true}"#).unwrap();
        assert_eq!(req.flags(), SerializeFlags::SKIP_ATTRIBUTES | SerializeFlags::SKIP_SERVICES);
    }
}
