//! Sighting cache: duplicate suppression for polled sources.
//!
//! A poller fetches the full set of active alerts on every cycle. The cache
//! remembers the fingerprint of everything already forwarded, so only new
//! items go out, and forgets fingerprints once their item leaves the active
//! set, so a later recurrence is reported again.
//!
//! An optional fuzzy layer additionally suppresses items whose coarse key
//! (category + message, say) was seen within a short window, for upstreams
//! that re-emit the same event with jittered timestamps.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CompileError;
use crate::template::JsonPath;
use crate::transforms::{epoch_to_utc, parse_timestamp};

/// Hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Which fields identify an item.
#[derive(Debug, Clone, Default)]
pub struct SightingConfig {
    /// Paths whose values make up the strict fingerprint.
    pub identity: Vec<String>,
    pub fuzzy: Option<FuzzyConfig>,
}

#[derive(Debug, Clone)]
pub struct FuzzyConfig {
    /// Paths forming the coarse dedup key.
    pub key: Vec<String>,
    /// Path of the item timestamp (epoch seconds or RFC 3339).
    pub timestamp: String,
    pub window: Duration,
}

impl SightingConfig {
    pub fn new<I, S>(identity: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identity: identity.into_iter().map(Into::into).collect(),
            fuzzy: None,
        }
    }

    pub fn with_fuzzy(mut self, fuzzy: FuzzyConfig) -> Self {
        self.fuzzy = Some(fuzzy);
        self
    }
}

#[derive(Debug)]
struct FuzzyLayer {
    key: Vec<JsonPath>,
    timestamp: JsonPath,
    window: Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SightingCache {
    identity: Vec<JsonPath>,
    seen: HashSet<String>,
    fuzzy: Option<FuzzyLayer>,
}

impl SightingCache {
    /// Compiles the configured paths. The cache starts empty.
    pub fn new(config: &SightingConfig) -> Result<Self, CompileError> {
        let identity = parse_all(&config.identity, "/identity")?;
        let fuzzy = match &config.fuzzy {
            None => None,
            Some(f) => Some(FuzzyLayer {
                key: parse_all(&f.key, "/fuzzy/key")?,
                timestamp: parse_one(&f.timestamp, "/fuzzy/timestamp".into())?,
                window: f.window,
                last_seen: HashMap::new(),
                newest: None,
            }),
        };
        Ok(Self {
            identity,
            seen: HashSet::new(),
            fuzzy,
        })
    }

    /// Strict fingerprint of `item`.
    ///
    /// Identity values are rendered (strings raw, everything else as compact
    /// JSON, absent as empty), joined with `:` and hashed. An item carrying
    /// none of the identity fields is hashed whole.
    pub fn fingerprint(&self, item: &Value) -> String {
        let parts: Vec<Option<&Value>> = self.identity.iter().map(|p| p.first(item)).collect();
        let data = if parts.iter().all(Option::is_none) {
            canonical(item).to_string()
        } else {
            parts
                .into_iter()
                .map(|v| v.map(render).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(":")
        };
        let digest = Sha256::digest(data.as_bytes());
        let mut hex = String::with_capacity(FINGERPRINT_LEN);
        for b in digest.iter().take(FINGERPRINT_LEN / 2) {
            hex.push_str(&format!("{b:02x}"));
        }
        hex
    }

    /// Records the fingerprints of `items` without reporting any of them.
    /// Returns the number of distinct fingerprints now known.
    pub fn seed<'a, I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = &'a Value>,
    {
        for item in items {
            let fp = self.fingerprint(item);
            self.seen.insert(fp);
        }
        self.seen.len()
    }

    /// Returns `true` when `item` is a duplicate; otherwise records it.
    pub fn observe(&mut self, item: &Value) -> bool {
        self.observe_at(item, Utc::now())
    }

    /// Same as [`observe`](Self::observe), with `now` standing in for items
    /// that carry no usable timestamp.
    pub fn observe_at(&mut self, item: &Value, now: DateTime<Utc>) -> bool {
        let fp = self.fingerprint(item);
        if self.seen.contains(&fp) {
            return true;
        }
        if let Some(fuzzy) = self.fuzzy.as_mut() {
            if fuzzy.is_recent(item, now) {
                tracing::debug!(fingerprint = %fp, "near-duplicate suppressed");
                // the copy stays a duplicate for as long as it is active
                self.seen.insert(fp);
                return true;
            }
        }
        self.seen.insert(fp);
        false
    }

    /// Drops every fingerprint absent from `active`, and fuzzy entries more
    /// than one window older than the newest timestamp seen.
    pub fn reconcile(&mut self, active: &HashSet<String>) {
        let before = self.seen.len();
        self.seen.retain(|fp| active.contains(fp));
        let evicted = before - self.seen.len();
        if evicted > 0 {
            tracing::debug!(evicted, "resolved items evicted from sighting cache");
        }
        if let Some(fuzzy) = self.fuzzy.as_mut() {
            fuzzy.prune();
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl FuzzyLayer {
    /// Checks the coarse key against the window, recording the item when it
    /// is not a near-duplicate.
    fn is_recent(&mut self, item: &Value, now: DateTime<Utc>) -> bool {
        let key = self
            .key
            .iter()
            .map(|p| p.first(item).map(render).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(":");
        let ts = self
            .timestamp
            .first(item)
            .and_then(item_timestamp)
            .unwrap_or(now);

        if let Some(last) = self.last_seen.get(&key) {
            if (ts - *last).abs() < self.window {
                return true;
            }
        }
        self.last_seen.insert(key, ts);
        self.newest = Some(self.newest.map_or(ts, |n| n.max(ts)));
        false
    }

    fn prune(&mut self) {
        if let Some(newest) = self.newest {
            let horizon = newest - self.window;
            self.last_seen.retain(|_, ts| *ts >= horizon);
        }
    }
}

fn item_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n.as_f64().and_then(epoch_to_utc),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(secs) => epoch_to_utc(secs),
            Err(_) => parse_timestamp(s).map(|dt| dt.with_timezone(&Utc)),
        },
        _ => None,
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => canonical(other).to_string(),
    }
}

/// Copy of `v` with object keys sorted at every level, so renderings do not
/// depend on the upstream's key order.
fn canonical(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn parse_all(paths: &[String], at: &str) -> Result<Vec<JsonPath>, CompileError> {
    paths
        .iter()
        .enumerate()
        .map(|(i, p)| parse_one(p, format!("{at}/{i}")))
        .collect()
}

fn parse_one(path: &str, at: String) -> Result<JsonPath, CompileError> {
    JsonPath::parse(path).map_err(|reason| CompileError::MalformedPath {
        path: path.to_string(),
        at,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn prometheus_like() -> SightingCache {
        SightingCache::new(&SightingConfig::new([
            "$.labels.alertname",
            "$.activeAt",
            "$.labels",
        ]))
        .unwrap()
    }

    fn alert(name: &str, active_at: &str) -> Value {
        json!({"labels": {"alertname": name, "instance": "db:9100"}, "activeAt": active_at})
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let cache = prometheus_like();
        let a = alert("HostDown", "2025-01-01T00:00:00Z");
        let fp = cache.fingerprint(&a);
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, cache.fingerprint(&a.clone()));
        assert_ne!(fp, cache.fingerprint(&alert("HostDown", "2025-01-01T00:05:00Z")));
    }

    #[test]
    fn fingerprint_joins_identity_renderings() {
        let cache = SightingCache::new(&SightingConfig::new(["$.a", "$.b"])).unwrap();
        let expected: String = Sha256::digest(b"x:1")
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(cache.fingerprint(&json!({"a": "x", "b": 1})), expected);
    }

    #[test]
    fn fingerprint_without_identity_hashes_whole_item() {
        let cache = prometheus_like();
        let a = json!({"unrelated": 1});
        let b = json!({"unrelated": 2});
        assert_ne!(cache.fingerprint(&a), cache.fingerprint(&b));
        assert_eq!(cache.fingerprint(&json!("scalar")).len(), FINGERPRINT_LEN);
    }

    #[test]
    fn seed_then_observe_is_duplicate() {
        let mut cache = prometheus_like();
        let x = alert("HostDown", "t0");
        assert_eq!(cache.seed([&x]), 1);
        assert!(cache.observe(&x));
    }

    #[test]
    fn reconcile_lets_resolved_items_reappear() {
        let mut cache = prometheus_like();
        let x = alert("HostDown", "t0");
        cache.seed([&x]);
        cache.reconcile(&HashSet::new());
        assert!(cache.is_empty());
        assert!(!cache.observe(&x));
        assert!(cache.observe(&x));
    }

    #[test]
    fn reconcile_keeps_active_items() {
        let mut cache = prometheus_like();
        let x = alert("A", "t0");
        let y = alert("B", "t0");
        assert!(!cache.observe(&x));
        assert!(!cache.observe(&y));
        let active: HashSet<String> = [cache.fingerprint(&x)].into();
        cache.reconcile(&active);
        assert!(cache.contains(&cache.fingerprint(&x)));
        assert!(!cache.contains(&cache.fingerprint(&y)));
    }

    fn kismet_like(window_ms: i64) -> SightingCache {
        let config = SightingConfig::new([
            r#"$."kismet.alert.timestamp""#,
            r#"$."kismet.alert.header""#,
            r#"$."kismet.alert.text""#,
        ])
        .with_fuzzy(FuzzyConfig {
            key: vec![
                r#"$."kismet.alert.header""#.into(),
                r#"$."kismet.alert.text""#.into(),
            ],
            timestamp: r#"$."kismet.alert.timestamp""#.into(),
            window: Duration::milliseconds(window_ms),
        });
        SightingCache::new(&config).unwrap()
    }

    fn kismet_alert(ts: f64) -> Value {
        json!({
            "kismet.alert.timestamp": ts,
            "kismet.alert.header": "DEAUTHFLOOD",
            "kismet.alert.text": "Deauth flood from 00:11:22:33:44:55",
        })
    }

    #[test]
    fn fuzzy_window_suppresses_jittered_copies() {
        let mut cache = kismet_like(2_000);
        assert!(!cache.observe(&kismet_alert(1_700_000_000.2)));
        assert!(cache.observe(&kismet_alert(1_700_000_001.1)));
    }

    #[test]
    fn fuzzy_window_passes_distant_copies() {
        let mut cache = kismet_like(2_000);
        assert!(!cache.observe(&kismet_alert(1_700_000_000.0)));
        assert!(!cache.observe(&kismet_alert(1_700_000_005.0)));
    }

    #[test]
    fn fuzzy_falls_back_to_observation_time() {
        let mut cache = SightingCache::new(&SightingConfig::new(["$.n"]).with_fuzzy(FuzzyConfig {
            key: vec![r#"$."kismet.alert.header""#.into(), r#"$."kismet.alert.text""#.into()],
            timestamp: "$.ts".into(),
            window: Duration::seconds(2),
        }))
        .unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        let a = json!({"kismet.alert.header": "H", "kismet.alert.text": "T", "n": 1});
        let b = json!({"kismet.alert.header": "H", "kismet.alert.text": "T", "n": 2});
        let c = json!({"kismet.alert.header": "H", "kismet.alert.text": "T", "n": 3});
        assert!(!cache.observe_at(&a, t0));
        assert!(cache.observe_at(&b, t0 + Duration::milliseconds(500)));
        assert!(!cache.observe_at(&c, t0 + Duration::seconds(3)));
    }

    #[test]
    fn reconcile_prunes_stale_fuzzy_keys() {
        let mut cache = kismet_like(2_000);
        let old = json!({
            "kismet.alert.timestamp": 100.0,
            "kismet.alert.header": "OLD",
            "kismet.alert.text": "x",
        });
        assert!(!cache.observe(&old));
        assert!(!cache.observe(&kismet_alert(200.0)));
        cache.reconcile(&HashSet::new());
        let fuzzy = cache.fuzzy.as_ref().unwrap();
        assert_eq!(fuzzy.last_seen.len(), 1);
    }

    #[test]
    fn suppressed_copy_stays_suppressed_while_active() {
        let mut cache = kismet_like(2_000);
        let a = kismet_alert(100.0);
        let b = kismet_alert(101.0);
        let c = json!({
            "kismet.alert.timestamp": 200.0,
            "kismet.alert.header": "APSPOOF",
            "kismet.alert.text": "spoofed beacon",
        });

        let cycle = |cache: &mut SightingCache, items: &[&Value]| -> Vec<bool> {
            let seen = items.iter().map(|i| cache.observe(i)).collect();
            let active: HashSet<String> = items.iter().map(|i| cache.fingerprint(i)).collect();
            cache.reconcile(&active);
            seen
        };

        assert_eq!(cycle(&mut cache, &[&a, &b]), [false, true]);
        assert_eq!(cycle(&mut cache, &[&a, &b, &c]), [true, true, false]);
        // the fuzzy key for a/b is pruned by now; b must still be known
        assert_eq!(cycle(&mut cache, &[&a, &b, &c]), [true, true, true]);

        cycle(&mut cache, &[&c]);
        assert!(!cache.contains(&cache.fingerprint(&b)), "b left the active set");
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let cache = SightingCache::new(&SightingConfig::new(["$.labels"])).unwrap();
        let a: Value = serde_json::from_str(r#"{"labels": {"job": "node", "instance": "db"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"labels": {"instance": "db", "job": "node"}}"#).unwrap();
        assert_eq!(cache.fingerprint(&a), cache.fingerprint(&b));

        let whole = prometheus_like();
        let x: Value = serde_json::from_str(r#"{"z": 1, "y": [{"b": 2, "a": 1}]}"#).unwrap();
        let y: Value = serde_json::from_str(r#"{"y": [{"a": 1, "b": 2}], "z": 1}"#).unwrap();
        assert_eq!(whole.fingerprint(&x), whole.fingerprint(&y));
    }

    #[test]
    fn bad_paths_fail_construction() {
        let err = SightingCache::new(&SightingConfig::new(["$.ok", "nope"])).unwrap_err();
        let CompileError::MalformedPath { at, .. } = err;
        assert_eq!(at, "/identity/1");
    }
}
