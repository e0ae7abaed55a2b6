//! Named/timed object headers shared by every store entity (§3), the
//! object-type registry and field ids (§6.3), and the update-interval
//! estimator (§4.1).

use crate::datum::Datum;

/// Bit-or'able type tags, matching the wire-level registry in §6.3
/// (`service-attribute = SERVICE|ATTRIBUTE`, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectType(pub u8);

impl ObjectType {
    pub const HOST: ObjectType = ObjectType(1);
    pub const SERVICE: ObjectType = ObjectType(2);
    pub const METRIC: ObjectType = ObjectType(4);
    pub const ATTRIBUTE: ObjectType = ObjectType(8);

    pub const fn contains(self, other: ObjectType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ObjectType {
    type Output = ObjectType;
    fn bitor(self, rhs: ObjectType) -> ObjectType {
        ObjectType(self.0 | rhs.0)
    }
}

/// Field ids understood by `get_field` / the expression engine (§4.2, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    Name,
    LastUpdate,
    Age,
    Interval,
    Backend,
}

/// Result of extracting a field from a store object — a uniform view that
/// doesn't force every caller back through `Datum` (e.g. `Backend` is a
/// list of plain strings, not a `Datum::Array`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Name(String),
    Timestamp(i64),
    Duration(i64),
    Backends(Vec<String>),
}

impl FieldValue {
    /// Project a field value down into a `Datum`, for use by the
    /// expression engine's `Expr::Field` node.
    pub fn into_datum(self) -> Datum {
        match self {
            FieldValue::Name(s) => Datum::Str(s),
            FieldValue::Timestamp(us) => Datum::DateTime(us),
            FieldValue::Duration(us) => Datum::DateTime(us),
            FieldValue::Backends(list) => {
                Datum::Array(list.into_iter().map(Datum::Str).collect())
            }
        }
    }
}

/// Common mutable state for Host, Service, Metric and Attribute (§3's
/// "timed object"). `name` keeps first-observed casing; identity and
/// ordering elsewhere are always computed from the lower-cased key.
#[derive(Debug, Clone)]
pub struct TimedHeader {
    pub name: String,
    pub last_update: i64,
    pub update_interval: i64,
    pub backends: Vec<String>,
}

impl TimedHeader {
    pub fn new(name: impl Into<String>, ts: i64) -> Self {
        TimedHeader {
            name: name.into(),
            last_update: ts,
            update_interval: 0,
            backends: Vec::new(),
        }
    }

    /// Apply an accepted (`ts > last_update`) update in place: advance
    /// `last_update`, refresh `update_interval`, and record the
    /// contributing backend if it's new. Callers are responsible for the
    /// `ts <= last_update` staleness check (§4.1's algorithm) — this never
    /// runs on a stale update, so it's infallible.
    pub fn advance(&mut self, ts: i64, backend: Option<&str>) {
        let delta = ts - self.last_update;
        self.update_interval = refresh_interval(self.update_interval, delta);
        self.last_update = ts;
        if let Some(backend) = backend {
            if !self.backends.iter().any(|b| b == backend) {
                self.backends.push(backend.to_string());
            }
        }
    }

    pub fn field(&self, field: FieldId, now: i64) -> FieldValue {
        match field {
            FieldId::Name => FieldValue::Name(self.name.clone()),
            FieldId::LastUpdate => FieldValue::Timestamp(self.last_update),
            FieldId::Age => FieldValue::Duration(now - self.last_update),
            FieldId::Interval => FieldValue::Duration(self.update_interval),
            FieldId::Backend => FieldValue::Backends(self.backends.clone()),
        }
    }
}

/// The update-interval EMA from §4.2: `(prior*9 + delta) / 10`, integer
/// arithmetic, except that a still-unmeasured interval (`prior == 0`) is
/// *set* to the first observed delta rather than blended — blending from a
/// zero baseline would take many updates to converge and doesn't match the
/// pinned fixture in spec.md §4.2/§8 (10,10,10,10 → 10; +20 → 11; +40 → 13).
/// `delta == 0` leaves the interval untouched, per spec.
fn refresh_interval(prior: i64, delta: i64) -> i64 {
    if delta == 0 {
        prior
    } else if prior == 0 {
        delta
    } else {
        (prior * 9 + delta) / 10
    }
}

/// Which child collection a structural matcher (`any`/`all`) ranges over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Attributes,
    Services,
    Metrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_fixture_from_spec() {
        let mut h = TimedHeader::new("host", 10);
        assert_eq!(h.update_interval, 0);
        h.advance(20, None);
        assert_eq!(h.update_interval, 10);
        h.advance(30, None);
        h.advance(40, None);
        assert_eq!(h.update_interval, 10);
        h.advance(60, None);
        assert_eq!(h.update_interval, 11);
        h.advance(100, None);
        assert_eq!(h.update_interval, 13);
    }

    #[test]
    fn zero_delta_leaves_interval_unchanged() {
        let mut h = TimedHeader::new("host", 10);
        h.advance(20, None);
        let before = h.update_interval;
        h.advance(20, None);
        assert_eq!(h.update_interval, before);
    }

    #[test]
    fn backend_recorded_once() {
        let mut h = TimedHeader::new("host", 1);
        h.advance(2, Some("collectd"));
        h.advance(3, Some("collectd"));
        h.advance(4, Some("statsd"));
        assert_eq!(h.backends, vec!["collectd", "statsd"]);
    }

    #[test]
    fn object_type_bitor_matches_registry() {
        let combo = ObjectType::SERVICE | ObjectType::ATTRIBUTE;
        assert!(combo.contains(ObjectType::SERVICE));
        assert!(combo.contains(ObjectType::ATTRIBUTE));
        assert!(!combo.contains(ObjectType::HOST));
    }
}
