//! The JSON serializer (§4.5): a filtered projection of the whole store,
//! streamed directly into a `std::fmt::Write` sink rather than built up as
//! an intermediate `serde_json::Value` tree — that keeps key order under
//! our control without depending on `serde_json`'s `preserve_order`
//! feature, and matches the "stream directly into the output buffer"
//! design note in spec.md §9.

use std::fmt::Write;

use chrono::{TimeZone, Utc};

use crate::datum::Datum;
use crate::error::SerializeError;
use crate::matcher::{self, Matcher};
use crate::object::FieldId;
use crate::store::{Attribute, Host, Metric, ObjRef, Service, Store};

/// Which child collections to omit from the output, bit-or'able like
/// `ObjectType` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeFlags(pub u8);

impl SerializeFlags {
    pub const NONE: SerializeFlags = SerializeFlags(0);
    pub const SKIP_ATTRIBUTES: SerializeFlags = SerializeFlags(1);
    pub const SKIP_METRICS: SerializeFlags = SerializeFlags(2);
    pub const SKIP_SERVICES: SerializeFlags = SerializeFlags(4);
    pub const SKIP_ALL: SerializeFlags = SerializeFlags(1 | 2 | 4);

    fn has(self, flag: SerializeFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for SerializeFlags {
    type Output = SerializeFlags;
    fn bitor(self, rhs: SerializeFlags) -> SerializeFlags {
        SerializeFlags(self.0 | rhs.0)
    }
}

impl Default for SerializeFlags {
    fn default() -> Self {
        SerializeFlags::NONE
    }
}

/// Render the whole store as a JSON array of hosts into `out`.
///
/// `matcher`, when given, is applied at *every* level (§4.5): a host that
/// doesn't match is omitted outright; a service/metric/attribute under a
/// host that does match is filtered the same way, but the container it
/// lives in still appears (as `[]` if everything inside was filtered out).
pub fn to_json(
    store: &Store,
    matcher: Option<&Matcher>,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    store.with_hosts(|hosts| write_hosts(hosts.values(), matcher, flags, now, out))
}

fn write_hosts<'a>(
    hosts: impl Iterator<Item = &'a Host>,
    matcher: Option<&Matcher>,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    out.write_char('[')?;
    let mut first = true;
    for host in hosts {
        if !passes(matcher, ObjRef::Host(host), now)? {
            continue;
        }
        if !first {
            out.write_char(',')?;
        }
        first = false;
        write_host(host, matcher, flags, now, out)?;
    }
    out.write_char(']')?;
    Ok(())
}

fn passes(matcher: Option<&Matcher>, obj: ObjRef<'_>, now: i64) -> Result<bool, SerializeError> {
    match matcher {
        None => Ok(true),
        Some(m) => Ok(matcher::eval(m, obj, now)?),
    }
}

/// Render a single host (the shape `GET /v1/hosts/:host` hands back), with
/// no host-level filter — the caller has already picked the host by name.
pub fn host_to_json(
    host: &Host,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    write_host(host, None, flags, now, out)
}

fn write_host(
    host: &Host,
    matcher: Option<&Matcher>,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    out.write_char('{')?;
    write_key(out, "name")?;
    write_str(out, &host.header.name)?;

    out.write_char(',')?;
    write_key(out, "last_update")?;
    write_str(out, &format_timestamp_micros(host.header.last_update))?;

    out.write_char(',')?;
    write_key(out, "update_interval")?;
    write_str(out, &format_duration_micros(host.header.update_interval))?;

    out.write_char(',')?;
    write_key(out, "backends")?;
    write_string_array(out, &host.header.backends)?;

    if !flags.has(SerializeFlags::SKIP_ATTRIBUTES) {
        out.write_char(',')?;
        write_key(out, "attributes")?;
        write_attributes(host.attributes.values(), matcher, now, out)?;
    }
    if !flags.has(SerializeFlags::SKIP_METRICS) {
        out.write_char(',')?;
        write_key(out, "metrics")?;
        write_metrics(host.metrics.values(), matcher, flags, now, out)?;
    }
    if !flags.has(SerializeFlags::SKIP_SERVICES) {
        out.write_char(',')?;
        write_key(out, "services")?;
        write_services(host.services.values(), matcher, flags, now, out)?;
    }

    out.write_char('}')?;
    Ok(())
}

fn write_services<'a>(
    services: impl Iterator<Item = &'a Service>,
    matcher: Option<&Matcher>,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    out.write_char('[')?;
    let mut first = true;
    for service in services {
        if !passes(matcher, ObjRef::Service(service), now)? {
            continue;
        }
        if !first {
            out.write_char(',')?;
        }
        first = false;

        out.write_char('{')?;
        write_key(out, "name")?;
        write_str(out, &service.header.name)?;
        out.write_char(',')?;
        write_key(out, "last_update")?;
        write_str(out, &format_timestamp_micros(service.header.last_update))?;
        out.write_char(',')?;
        write_key(out, "update_interval")?;
        write_str(out, &format_duration_micros(service.header.update_interval))?;
        out.write_char(',')?;
        write_key(out, "backends")?;
        write_string_array(out, &service.header.backends)?;

        if !flags.has(SerializeFlags::SKIP_ATTRIBUTES) {
            out.write_char(',')?;
            write_key(out, "attributes")?;
            write_attributes(service.attributes.values(), matcher, now, out)?;
        }
        out.write_char('}')?;
    }
    out.write_char(']')?;
    Ok(())
}

fn write_metrics<'a>(
    metrics: impl Iterator<Item = &'a Metric>,
    matcher: Option<&Matcher>,
    flags: SerializeFlags,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    out.write_char('[')?;
    let mut first = true;
    for metric in metrics {
        if !passes(matcher, ObjRef::Metric(metric), now)? {
            continue;
        }
        if !first {
            out.write_char(',')?;
        }
        first = false;

        out.write_char('{')?;
        write_key(out, "name")?;
        write_str(out, &metric.header.name)?;
        out.write_char(',')?;
        write_key(out, "last_update")?;
        write_str(out, &format_timestamp_micros(metric.header.last_update))?;
        out.write_char(',')?;
        write_key(out, "update_interval")?;
        write_str(out, &format_duration_micros(metric.header.update_interval))?;
        out.write_char(',')?;
        write_key(out, "backends")?;
        write_string_array(out, &metric.header.backends)?;

        if let Some(desc) = &metric.metric_store {
            out.write_char(',')?;
            write_key(out, "metric_store")?;
            out.write_char('{')?;
            write_key(out, "type")?;
            write_str(out, &desc.store_type)?;
            out.write_char(',')?;
            write_key(out, "id")?;
            write_str(out, &desc.id)?;
            out.write_char('}')?;
        }

        if !flags.has(SerializeFlags::SKIP_ATTRIBUTES) {
            out.write_char(',')?;
            write_key(out, "attributes")?;
            write_attributes(metric.attributes.values(), matcher, now, out)?;
        }
        out.write_char('}')?;
    }
    out.write_char(']')?;
    Ok(())
}

fn write_attributes<'a>(
    attributes: impl Iterator<Item = &'a Attribute>,
    matcher: Option<&Matcher>,
    now: i64,
    out: &mut impl Write,
) -> Result<(), SerializeError> {
    out.write_char('[')?;
    let mut first = true;
    for attr in attributes {
        if !passes(matcher, ObjRef::Attribute(attr), now)? {
            continue;
        }
        if !first {
            out.write_char(',')?;
        }
        first = false;

        out.write_char('{')?;
        write_key(out, "name")?;
        write_str(out, &attr.header.name)?;
        out.write_char(',')?;
        write_key(out, "value")?;
        write_datum(out, &attr.value)?;
        out.write_char(',')?;
        write_key(out, "last_update")?;
        write_str(out, &format_timestamp_micros(attr.header.last_update))?;
        out.write_char(',')?;
        write_key(out, "update_interval")?;
        write_str(out, &format_duration_micros(attr.header.update_interval))?;
        out.write_char(',')?;
        write_key(out, "backends")?;
        write_string_array(out, &attr.header.backends)?;
        out.write_char('}')?;
    }
    out.write_char(']')?;
    Ok(())
}

fn write_key(out: &mut impl Write, key: &str) -> Result<(), SerializeError> {
    write_str(out, key)?;
    out.write_char(':')?;
    Ok(())
}

fn write_string_array(out: &mut impl Write, items: &[String]) -> Result<(), SerializeError> {
    out.write_char('[')?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        write_str(out, item)?;
    }
    out.write_char(']')?;
    Ok(())
}

/// §6: integer/decimal unquoted, string/datetime quoted, binary hex-encoded
/// and quoted, arrays recurse element-wise.
fn write_datum(out: &mut impl Write, value: &Datum) -> Result<(), SerializeError> {
    match value {
        Datum::Int(i) => write!(out, "{i}").map_err(SerializeError::from),
        Datum::Double(d) => write!(out, "{d}").map_err(SerializeError::from),
        Datum::Str(s) => write_str(out, s),
        Datum::DateTime(us) => write_str(out, &format_timestamp_micros(*us)),
        Datum::Blob(b) => write_str(out, &crate::datum::hex_encode(b)),
        Datum::Array(items) => {
            out.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_char(',')?;
                }
                write_datum(out, item)?;
            }
            out.write_char(']')?;
            Ok(())
        }
    }
}

fn write_str(out: &mut impl Write, s: &str) -> Result<(), SerializeError> {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')?;
    Ok(())
}

/// `"YYYY-MM-DD HH:MM:SS +0000"`, UTC, from microseconds since the epoch
/// (§4.5/§6).
pub fn format_timestamp_micros(us: i64) -> String {
    let secs = us.div_euclid(1_000_000);
    let dt = Utc.timestamp_opt(secs, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    dt.format("%Y-%m-%d %H:%M:%S +0000").to_string()
}

/// Human duration in whole seconds, smallest unit breakdown first — no
/// floating point, per the design note in spec.md §9.
pub fn format_duration_micros(us: i64) -> String {
    let mut secs = us.div_euclid(1_000_000);
    if secs == 0 {
        return "0s".to_string();
    }
    let negative = secs < 0;
    if negative {
        secs = -secs;
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    let mut s = String::new();
    if negative {
        s.push('-');
    }
    if days > 0 {
        write!(s, "{days}d").unwrap();
    }
    if hours > 0 {
        write!(s, "{hours}h").unwrap();
    }
    if minutes > 0 {
        write!(s, "{minutes}m").unwrap();
    }
    if seconds > 0 || s.is_empty() {
        write!(s, "{seconds}s").unwrap();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Datum;
    use crate::expr::Expr;
    use crate::matcher::CmpOp;
    use crate::store::Store;

    #[test]
    fn zero_interval_formats_as_0s() {
        assert_eq!(format_duration_micros(0), "0s");
    }

    #[test]
    fn duration_breaks_down_into_units() {
        assert_eq!(format_duration_micros(90 * 1_000_000), "1m30s");
        assert_eq!(format_duration_micros(3_661 * 1_000_000), "1h1m1s");
    }

    #[test]
    fn epoch_formats_as_expected() {
        assert_eq!(format_timestamp_micros(0), "1970-01-01 00:00:00 +0000");
        assert_eq!(format_timestamp_micros(3_000_000), "1970-01-01 00:00:03 +0000");
    }

    fn populate() -> Store {
        let store = Store::new();
        store.store_host("h1", 1).unwrap();
        store.store_attribute("h1", "k1", Datum::Str("v1".into()), 1).unwrap();
        store.store_attribute("h1", "k2", Datum::Str("v2".into()), 1).unwrap();
        store.store_attribute("h1", "k3", Datum::Str("v3".into()), 1).unwrap();
        store.store_metric("h1", "m1", None, 1).unwrap();
        store.store_metric_attribute("h1", "m1", "k3", Datum::Int(42), 1).unwrap();
        store.store_metric("h1", "m2", None, 1).unwrap();

        store.store_host("h2", 3).unwrap();
        store
    }

    #[test]
    fn scenario_5_unfiltered_shape() {
        let store = populate();
        let mut buf = String::new();
        to_json(&store, None, SerializeFlags::NONE, 100, &mut buf).unwrap();
        assert!(buf.starts_with('['));
        assert!(buf.contains(r#""name":"h1""#));
        assert!(buf.contains(r#""name":"h2""#));
        assert!(buf.contains(r#""name":"k1","value":"v1""#));
        assert!(buf.contains(r#""name":"m1""#));
        assert!(buf.contains(r#""name":"k3","value":42"#));
        assert!(buf.contains(r#""services":[]"#));
    }

    #[test]
    fn scenario_6_host_filter_by_last_update() {
        let store = populate();
        let matcher = Matcher::cmp(
            CmpOp::Gt,
            Expr::field(FieldId::LastUpdate),
            Expr::constant(Datum::DateTime(1)),
        );
        let mut buf = String::new();
        to_json(&store, Some(&matcher), SerializeFlags::NONE, 100, &mut buf).unwrap();
        assert!(!buf.contains(r#""name":"h1""#));
        assert!(buf.contains(r#""name":"h2""#));
    }

    #[test]
    fn skip_all_omits_container_keys() {
        let store = populate();
        let mut buf = String::new();
        to_json(&store, None, SerializeFlags::SKIP_ALL, 100, &mut buf).unwrap();
        assert!(!buf.contains("\"attributes\""));
        assert!(!buf.contains("\"metrics\""));
        assert!(!buf.contains("\"services\""));
    }

    #[test]
    fn empty_store_serializes_to_empty_array() {
        let store = Store::new();
        let mut buf = String::new();
        to_json(&store, None, SerializeFlags::NONE, 0, &mut buf).unwrap();
        assert_eq!(buf, "[]");
    }
}
