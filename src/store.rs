//! The object graph and the update/lookup/iteration surface over it (§3,
//! §4.1, §4.2, §4.6, §5).
//!
//! A single `RwLock` guards the whole host set, matching the concurrency
//! note in §5: "a reader/writer lock on the store root suffices and
//! matches observable behavior". Host/Service/Metric/Attribute are kept as
//! plain owned data inside that lock rather than individually wrapped —
//! `get_host` hands back a cloned snapshot, so the caller's "reference
//! count" (§3 invariant 4) is just the strong count of the `Arc` wrapping
//! that clone. See DESIGN.md for why this is preferred over a nested
//! per-host lock hierarchy here.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::datum::Datum;
use crate::error::{IterateError, UpdateError, UpdateOutcome, UpdateResult};
use crate::object::{ChildKind, FieldId, FieldValue, ObjectType, TimedHeader};

/// Optional pointer into an external metric-store, attached to a `Metric`
/// (§3's "optional metric-store descriptor {type, id}").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricStoreRef {
    pub store_type: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub(crate) key: String,
    pub header: TimedHeader,
    pub value: Datum,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub(crate) key: String,
    pub header: TimedHeader,
    pub attributes: BTreeMap<String, Attribute>,
}

#[derive(Debug, Clone)]
pub struct Metric {
    pub(crate) key: String,
    pub header: TimedHeader,
    pub attributes: BTreeMap<String, Attribute>,
    pub metric_store: Option<MetricStoreRef>,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub(crate) key: String,
    pub header: TimedHeader,
    pub attributes: BTreeMap<String, Attribute>,
    pub services: BTreeMap<String, Service>,
    pub metrics: BTreeMap<String, Metric>,
}

/// Borrowed, polymorphic view over any of the four store object kinds —
/// the "sum type with a common header" the design notes (spec.md §9) ask
/// for. Used by the expression/matcher engines and the serializer so they
/// don't need four near-identical code paths.
#[derive(Clone, Copy)]
pub enum ObjRef<'a> {
    Host(&'a Host),
    Service(&'a Service),
    Metric(&'a Metric),
    Attribute(&'a Attribute),
}

impl<'a> ObjRef<'a> {
    pub fn header(&self) -> &'a TimedHeader {
        match self {
            ObjRef::Host(h) => &h.header,
            ObjRef::Service(s) => &s.header,
            ObjRef::Metric(m) => &m.header,
            ObjRef::Attribute(a) => &a.header,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjRef::Host(_) => ObjectType::HOST,
            ObjRef::Service(_) => ObjectType::SERVICE,
            ObjRef::Metric(_) => ObjectType::METRIC,
            ObjRef::Attribute(_) => ObjectType::ATTRIBUTE,
        }
    }

    /// Only `Attribute` carries a value; everything else is `None`.
    pub fn value(&self) -> Option<&'a Datum> {
        match self {
            ObjRef::Attribute(a) => Some(&a.value),
            _ => None,
        }
    }

    pub fn field(&self, field: FieldId, now: i64) -> FieldValue {
        self.header().field(field, now)
    }

    /// The child collection of the given kind, or an empty vec if this
    /// object kind doesn't have one (e.g. an `Attribute` has no children at
    /// all; a `Service` has no `Services`/`Metrics` of its own).
    pub fn children(&self, kind: ChildKind) -> Vec<ObjRef<'a>> {
        match (self, kind) {
            (ObjRef::Host(h), ChildKind::Attributes) => {
                h.attributes.values().map(ObjRef::Attribute).collect()
            }
            (ObjRef::Host(h), ChildKind::Services) => {
                h.services.values().map(ObjRef::Service).collect()
            }
            (ObjRef::Host(h), ChildKind::Metrics) => {
                h.metrics.values().map(ObjRef::Metric).collect()
            }
            (ObjRef::Service(s), ChildKind::Attributes) => {
                s.attributes.values().map(ObjRef::Attribute).collect()
            }
            (ObjRef::Metric(m), ChildKind::Attributes) => {
                m.attributes.values().map(ObjRef::Attribute).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn ci_key(name: &str) -> String {
    name.to_lowercase()
}

fn check_name(name: &str) -> Result<(), UpdateError> {
    if name.is_empty() {
        Err(UpdateError::InvalidArgument("name must not be empty".into()))
    } else {
        Ok(())
    }
}

/// Logs the outcome of an update entry point (§4.1/§7/§10.1): debug on
/// success (stored or already current — neither is an error), warn on a
/// rejected update (missing parent, invalid argument). Called directly from
/// `Store`'s update entry points so every caller of the Update API gets
/// logging, not just the HTTP facade sitting on top of it.
fn log_update(op: &str, target: &str, result: &UpdateResult) {
    match result {
        Ok(UpdateOutcome::Stored) => tracing::debug!("{op} {target:?}: stored"),
        Ok(UpdateOutcome::Unchanged) => tracing::debug!("{op} {target:?}: already current"),
        Err(e) => tracing::warn!("{op} {target:?}: rejected: {e}"),
    }
}

/// Insert-or-advance a child in an ordered, case-insensitive map, applying
/// the shared accept/reject/advance algorithm from §4.1. `make_new` builds
/// a fresh child when the key isn't present yet.
fn upsert<T, F>(map: &mut BTreeMap<String, T>, key: &str, ts: i64, make_new: F) -> UpdateOutcome
where
    T: HasHeader,
    F: FnOnce() -> T,
{
    match map.get_mut(key) {
        Some(existing) => {
            if ts <= existing.header().last_update {
                UpdateOutcome::Unchanged
            } else {
                existing.header_mut().advance(ts, None);
                UpdateOutcome::Stored
            }
        }
        None => {
            map.insert(key.to_string(), make_new());
            UpdateOutcome::Stored
        }
    }
}

trait HasHeader {
    fn header(&self) -> &TimedHeader;
    fn header_mut(&mut self) -> &mut TimedHeader;
}

impl HasHeader for Host {
    fn header(&self) -> &TimedHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut TimedHeader {
        &mut self.header
    }
}
impl HasHeader for Service {
    fn header(&self) -> &TimedHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut TimedHeader {
        &mut self.header
    }
}
impl HasHeader for Metric {
    fn header(&self) -> &TimedHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut TimedHeader {
        &mut self.header
    }
}
impl HasHeader for Attribute {
    fn header(&self) -> &TimedHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut TimedHeader {
        &mut self.header
    }
}

/// The store root (§3's "Store"): an ordered set of hosts plus global
/// coordination. One instance is normally shared behind an `Arc` across
/// the HTTP facade's handlers, the way `AppState` wraps shared services in
/// the teacher's `axum` app.
#[derive(Default)]
pub struct Store {
    hosts: RwLock<BTreeMap<String, Host>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            hosts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Drops every host and resets to an empty store (§4.6). Intended for
    /// use between test cases / fixture resets, not as a production reset
    /// button — there is no persistence to undo.
    pub fn clear(&self) {
        self.hosts.write().unwrap().clear();
    }

    // ---- Update API (§4.1, §6.1) ----------------------------------------

    pub fn store_host(&self, name: &str, ts: i64) -> UpdateResult {
        self.store_host_from(name, ts, None)
    }

    pub fn store_host_from(&self, name: &str, ts: i64, backend: Option<&str>) -> UpdateResult {
        let result = self.store_host_from_impl(name, ts, backend);
        log_update("store_host", name, &result);
        result
    }

    fn store_host_from_impl(&self, name: &str, ts: i64, backend: Option<&str>) -> UpdateResult {
        check_name(name)?;
        let key = ci_key(name);
        let mut hosts = self.hosts.write().unwrap();
        let outcome = upsert(&mut hosts, &key, ts, || Host {
            key: key.clone(),
            header: TimedHeader::new(name, ts),
            attributes: BTreeMap::new(),
            services: BTreeMap::new(),
            metrics: BTreeMap::new(),
        });
        if outcome == UpdateOutcome::Stored {
            if let Some(backend) = backend {
                hosts.get_mut(&key).unwrap().header.backends_insert(backend);
            }
        }
        Ok(outcome)
    }

    pub fn store_service(&self, host: &str, name: &str, ts: i64) -> UpdateResult {
        self.store_service_from(host, name, ts, None)
    }

    pub fn store_service_from(
        &self,
        host: &str,
        name: &str,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        let result = self.store_service_from_impl(host, name, ts, backend);
        log_update("store_service", &format!("{host}/{name}"), &result);
        result
    }

    fn store_service_from_impl(
        &self,
        host: &str,
        name: &str,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        check_name(name)?;
        let host_key = ci_key(host);
        let key = ci_key(name);
        let mut hosts = self.hosts.write().unwrap();
        let host = hosts
            .get_mut(&host_key)
            .ok_or_else(|| UpdateError::MissingHost(host.to_string()))?;
        let outcome = upsert(&mut host.services, &key, ts, || Service {
            key: key.clone(),
            header: TimedHeader::new(name, ts),
            attributes: BTreeMap::new(),
        });
        if outcome == UpdateOutcome::Stored {
            if let Some(backend) = backend {
                host.services.get_mut(&key).unwrap().header.backends_insert(backend);
            }
        }
        Ok(outcome)
    }

    pub fn store_metric(
        &self,
        host: &str,
        name: &str,
        metric_store: Option<MetricStoreRef>,
        ts: i64,
    ) -> UpdateResult {
        self.store_metric_from(host, name, metric_store, ts, None)
    }

    pub fn store_metric_from(
        &self,
        host: &str,
        name: &str,
        metric_store: Option<MetricStoreRef>,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        let result = self.store_metric_from_impl(host, name, metric_store, ts, backend);
        log_update("store_metric", &format!("{host}/{name}"), &result);
        result
    }

    fn store_metric_from_impl(
        &self,
        host: &str,
        name: &str,
        metric_store: Option<MetricStoreRef>,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        check_name(name)?;
        let host_key = ci_key(host);
        let key = ci_key(name);
        let mut hosts = self.hosts.write().unwrap();
        let host = hosts
            .get_mut(&host_key)
            .ok_or_else(|| UpdateError::MissingHost(host.to_string()))?;

        let outcome = match host.metrics.get_mut(&key) {
            Some(existing) => {
                if ts <= existing.header.last_update {
                    UpdateOutcome::Unchanged
                } else {
                    existing.header.advance(ts, backend);
                    // A provided descriptor overwrites; an absent one
                    // leaves the prior descriptor as-is (§8: "a null
                    // descriptor ... does not revert").
                    if let Some(desc) = metric_store {
                        existing.metric_store = Some(desc);
                    }
                    UpdateOutcome::Stored
                }
            }
            None => {
                let mut header = TimedHeader::new(name, ts);
                if let Some(backend) = backend {
                    header.backends_insert(backend);
                }
                host.metrics.insert(
                    key,
                    Metric {
                        key: ci_key(name),
                        header,
                        attributes: BTreeMap::new(),
                        metric_store,
                    },
                );
                UpdateOutcome::Stored
            }
        };
        Ok(outcome)
    }

    pub fn store_attribute(&self, host: &str, key: &str, value: Datum, ts: i64) -> UpdateResult {
        self.store_attribute_from(host, key, value, ts, None)
    }

    pub fn store_attribute_from(
        &self,
        host: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        let result = self.store_attribute_from_impl(host, key, value, ts, backend);
        log_update("store_attribute", &format!("{host}:{key}"), &result);
        result
    }

    fn store_attribute_from_impl(
        &self,
        host: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        check_name(key)?;
        let host_key = ci_key(host);
        let mut hosts = self.hosts.write().unwrap();
        let host = hosts
            .get_mut(&host_key)
            .ok_or_else(|| UpdateError::MissingHost(host.to_string()))?;
        Ok(upsert_attribute(&mut host.attributes, key, value, ts, backend))
    }

    pub fn store_service_attribute(
        &self,
        host: &str,
        service: &str,
        key: &str,
        value: Datum,
        ts: i64,
    ) -> UpdateResult {
        self.store_service_attribute_from(host, service, key, value, ts, None)
    }

    pub fn store_service_attribute_from(
        &self,
        host: &str,
        service: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        let result = self.store_service_attribute_from_impl(host, service, key, value, ts, backend);
        log_update("store_service_attribute", &format!("{host}/{service}:{key}"), &result);
        result
    }

    fn store_service_attribute_from_impl(
        &self,
        host: &str,
        service: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        check_name(key)?;
        let host_key = ci_key(host);
        let service_key = ci_key(service);
        let mut hosts = self.hosts.write().unwrap();
        let host = hosts
            .get_mut(&host_key)
            .ok_or_else(|| UpdateError::MissingHost(host.to_string()))?;
        let service_obj = host.services.get_mut(&service_key).ok_or_else(|| {
            UpdateError::MissingService {
                host: host.header.name.clone(),
                service: service.to_string(),
            }
        })?;
        Ok(upsert_attribute(&mut service_obj.attributes, key, value, ts, backend))
    }

    pub fn store_metric_attribute(
        &self,
        host: &str,
        metric: &str,
        key: &str,
        value: Datum,
        ts: i64,
    ) -> UpdateResult {
        self.store_metric_attribute_from(host, metric, key, value, ts, None)
    }

    pub fn store_metric_attribute_from(
        &self,
        host: &str,
        metric: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        let result = self.store_metric_attribute_from_impl(host, metric, key, value, ts, backend);
        log_update("store_metric_attribute", &format!("{host}/{metric}:{key}"), &result);
        result
    }

    fn store_metric_attribute_from_impl(
        &self,
        host: &str,
        metric: &str,
        key: &str,
        value: Datum,
        ts: i64,
        backend: Option<&str>,
    ) -> UpdateResult {
        check_name(key)?;
        let host_key = ci_key(host);
        let metric_key = ci_key(metric);
        let mut hosts = self.hosts.write().unwrap();
        let host = hosts
            .get_mut(&host_key)
            .ok_or_else(|| UpdateError::MissingHost(host.to_string()))?;
        let metric_obj = host.metrics.get_mut(&metric_key).ok_or_else(|| {
            UpdateError::MissingMetric {
                host: host.header.name.clone(),
                metric: metric.to_string(),
            }
        })?;
        Ok(upsert_attribute(&mut metric_obj.attributes, key, value, ts, backend))
    }

    // ---- Lookup & iteration (§4.2) --------------------------------------

    pub fn has_host(&self, name: &str) -> bool {
        self.hosts.read().unwrap().contains_key(&ci_key(name))
    }

    /// Returns a cloned handle — the Rust realization of "increments the
    /// refcount" (§4.2): dropping it is the caller's release.
    pub fn get_host(&self, name: &str) -> Option<Arc<Host>> {
        self.hosts
            .read()
            .unwrap()
            .get(&ci_key(name))
            .cloned()
            .map(Arc::new)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.read().unwrap().len()
    }

    /// Visits hosts in case-insensitive name order. An empty store is a
    /// distinct error from a zero-visit walk of a non-empty one (there
    /// isn't one, since a non-empty store always visits at least one
    /// host) — see §4.2 / §8.
    pub fn iterate<F>(&self, mut callback: F) -> Result<(), IterateError>
    where
        F: FnMut(&Host) -> i32,
    {
        let hosts = self.hosts.read().unwrap();
        if hosts.is_empty() {
            return Err(IterateError::Empty);
        }
        for host in hosts.values() {
            let code = callback(host);
            if code < 0 {
                return Err(IterateError::Aborted(code));
            }
        }
        Ok(())
    }

    /// Runs `f` with a read-locked, ordered view of all hosts — used by
    /// the serializer, which needs to walk the whole tree under one
    /// consistent snapshot rather than one `get_host` at a time.
    pub fn with_hosts<R>(&self, f: impl FnOnce(&BTreeMap<String, Host>) -> R) -> R {
        let hosts = self.hosts.read().unwrap();
        f(&hosts)
    }
}

fn upsert_attribute(
    map: &mut BTreeMap<String, Attribute>,
    key: &str,
    value: Datum,
    ts: i64,
    backend: Option<&str>,
) -> UpdateOutcome {
    let ci = ci_key(key);
    match map.get_mut(&ci) {
        Some(existing) => {
            if ts <= existing.header.last_update {
                UpdateOutcome::Unchanged
            } else {
                existing.header.advance(ts, backend);
                existing.value = value;
                UpdateOutcome::Stored
            }
        }
        None => {
            let mut header = TimedHeader::new(key, ts);
            if let Some(backend) = backend {
                header.backends_insert(backend);
            }
            map.insert(
                ci.clone(),
                Attribute {
                    key: ci,
                    header,
                    value,
                },
            );
            UpdateOutcome::Stored
        }
    }
}

impl TimedHeader {
    fn backends_insert(&mut self, backend: &str) {
        if !self.backends.iter().any(|b| b == backend) {
            self.backends.push(backend.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_host_casing_and_staleness() {
        let store = Store::new();
        assert_eq!(store.store_host("a", 1), Ok(UpdateOutcome::Stored));
        assert_eq!(store.store_host("a", 2), Ok(UpdateOutcome::Stored));
        assert_eq!(store.store_host("a", 1), Ok(UpdateOutcome::Unchanged));
        assert_eq!(store.store_host("A", 1), Ok(UpdateOutcome::Unchanged));
        assert_eq!(store.store_host("A", 3), Ok(UpdateOutcome::Stored));
        assert!(!store.has_host("c"));
        assert!(store.has_host("a"));
        assert!(store.has_host("A"));
    }

    #[test]
    fn scenario_3_attribute_on_missing_host_rejected() {
        let store = Store::new();
        store.store_host("l", 0).unwrap();
        assert_eq!(
            store.store_attribute("l", "k1", Datum::Str("v1".into()), 1),
            Ok(UpdateOutcome::Stored)
        );
        assert_eq!(
            store.store_attribute("l", "k1", Datum::Str("v1".into()), 2),
            Ok(UpdateOutcome::Stored)
        );
        assert_eq!(
            store.store_attribute("l", "k1", Datum::Str("v3".into()), 2),
            Ok(UpdateOutcome::Unchanged)
        );

        let err = store
            .store_attribute("k", "k", Datum::Str("v".into()), 1)
            .unwrap_err();
        assert_eq!(err, UpdateError::MissingHost("k".to_string()));
        assert!(!store.has_host("k"));
        let err2 = store
            .store_attribute("k", "k", Datum::Str("v".into()), 1)
            .unwrap_err();
        assert_eq!(err2, UpdateError::MissingHost("k".to_string()));
    }

    #[test]
    fn scenario_4_metric_descriptor_overwrite_and_no_revert() {
        let store = Store::new();
        store.store_host("l", 0).unwrap();
        assert_eq!(store.store_metric("l", "m1", None, 1), Ok(UpdateOutcome::Stored));
        let desc = MetricStoreRef {
            store_type: "store1".into(),
            id: "store1".into(),
        };
        assert_eq!(
            store.store_metric("l", "m1", Some(desc.clone()), 2),
            Ok(UpdateOutcome::Stored)
        );
        assert_eq!(
            store.store_metric("l", "m1", Some(desc.clone()), 3),
            Ok(UpdateOutcome::Stored)
        );
        // Same ts again, this time with a null descriptor: no-op, doesn't revert.
        assert_eq!(store.store_metric("l", "m1", None, 3), Ok(UpdateOutcome::Unchanged));

        let host = store.get_host("l").unwrap();
        let metric = host.metrics.get("m1").unwrap();
        assert_eq!(metric.metric_store, Some(desc));
    }

    #[test]
    fn missing_parent_never_autocreates() {
        let store = Store::new();
        assert_eq!(
            store.store_service("nope", "svc", 1),
            Err(UpdateError::MissingHost("nope".to_string()))
        );
        assert!(!store.has_host("nope"));
    }

    #[test]
    fn iterate_empty_then_populated() {
        let store = Store::new();
        let mut visits = 0;
        assert_eq!(store.iterate(|_| { visits += 1; 0 }), Err(IterateError::Empty));
        assert_eq!(visits, 0);

        store.store_host("h1", 1).unwrap();
        store.store_host("h2", 1).unwrap();
        let mut names = Vec::new();
        store
            .iterate(|h| {
                names.push(h.header.name.clone());
                0
            })
            .unwrap();
        assert_eq!(names, vec!["h1", "h2"]);
    }

    #[test]
    fn iterate_aborts_on_negative_callback() {
        let store = Store::new();
        store.store_host("h1", 1).unwrap();
        store.store_host("h2", 1).unwrap();
        let mut visits = 0;
        let result = store.iterate(|_| {
            visits += 1;
            -7
        });
        assert_eq!(result, Err(IterateError::Aborted(-7)));
        assert_eq!(visits, 1);
    }

    #[test]
    fn get_host_is_case_insensitive_and_refcount_neutral() {
        let store = Store::new();
        store.store_host("Host", 1).unwrap();
        let a = store.get_host("host").unwrap();
        let b = store.get_host("HOST").unwrap();
        assert_eq!(a.header.name, "Host");
        assert_eq!(b.header.name, "Host");
        drop(a);
        drop(b);
        assert!(store.has_host("host"));
    }

    #[test]
    fn host_ordering_is_case_insensitive() {
        let store = Store::new();
        store.store_host("Charlie", 1).unwrap();
        store.store_host("alpha", 1).unwrap();
        store.store_host("Bravo", 1).unwrap();
        let mut names = Vec::new();
        store.iterate(|h| { names.push(h.header.name.clone()); 0 }).unwrap();
        assert_eq!(names, vec!["alpha", "Bravo", "Charlie"]);
    }

    #[test]
    fn service_and_metric_attributes_require_their_parent() {
        let store = Store::new();
        store.store_host("h", 0).unwrap();
        assert!(matches!(
            store.store_service_attribute("h", "missing", "k", Datum::Int(1), 1),
            Err(UpdateError::MissingService { .. })
        ));
        store.store_service("h", "svc", 0).unwrap();
        assert_eq!(
            store.store_service_attribute("h", "svc", "k", Datum::Int(1), 1),
            Ok(UpdateOutcome::Stored)
        );

        assert!(matches!(
            store.store_metric_attribute("h", "missing", "k", Datum::Int(1), 1),
            Err(UpdateError::MissingMetric { .. })
        ));
        store.store_metric("h", "met", None, 0).unwrap();
        assert_eq!(
            store.store_metric_attribute("h", "met", "k", Datum::Int(1), 1),
            Ok(UpdateOutcome::Stored)
        );
    }
}
