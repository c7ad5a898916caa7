use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use place_types::GeocodeRecord;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Cache schema ───────────────────────────────────────────────────
//
// Rows written by older runs look like:
//   {"geocode_lat": 45.0, "geocode_lon": 10.9}
//   {"geocode_name": "...", "geocode_type": "city", "geocode_id": "relation:44874", ...}
//   {"geocode_precision": "administrative", ...}          (no addresstype yet)
//
// Every loaded row is projected onto the current seven fields, and the
// rules below decide whether the projection can be trusted.

/// Legacy key names accepted for each canonical field, checked in order.
const FIELD_ALIASES: &[(&str, &[&str])] = &[("geocode_precision", &["geocode_type"])];

/// Address types that leave an `administrative` precision ambiguous.
const ADMINISTRATIVE_ADDRESSTYPES: &[&str] = &[
    "administrative",
    "country",
    "state",
    "region",
    "province",
    "county",
    "continent",
];

fn missing_name(r: &GeocodeRecord) -> bool {
    r.name.is_none()
}

fn missing_precision(r: &GeocodeRecord) -> bool {
    r.precision.is_none()
}

fn missing_id(r: &GeocodeRecord) -> bool {
    r.id.is_none()
}

/// Saved before address types were tracked: the postfilter would read the
/// boundary relation as a non-settlement.
fn untyped_administrative(r: &GeocodeRecord) -> bool {
    r.precision.as_deref().map(str::to_lowercase).as_deref() == Some("administrative")
        && r.addresstype
            .as_deref()
            .is_none_or(|a| ADMINISTRATIVE_ADDRESSTYPES.contains(&a.to_lowercase().as_str()))
}

/// Staleness rules, one per schema migration.
const STALE_RULES: &[(&str, fn(&GeocodeRecord) -> bool)] = &[
    ("missing name", missing_name),
    ("missing precision", missing_precision),
    ("missing id", missing_id),
    ("administrative without settlement addresstype", untyped_administrative),
];

fn canonical_field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(canonical, _)| *canonical == name)
        .map_or(&[][..], |(_, legacy)| *legacy);

    std::iter::once(name)
        .chain(aliases.iter().copied())
        .filter_map(|key| obj.get(key))
        .find(|v| !v.is_null())
}

pub(crate) fn coerce_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub(crate) fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Project a raw cache value onto the canonical record.
///
/// Returns the record (or `None` for "not found" / unreadable) and whether
/// the entry is stale and must be fetched again.
pub fn normalize_cache_entry(raw: &Value) -> (Option<GeocodeRecord>, bool) {
    let obj = match raw {
        Value::Null => return (None, false),
        Value::Object(obj) => obj,
        _ => return (None, true),
    };

    let (Some(lat), Some(lon)) = (
        coerce_f64(canonical_field(obj, "geocode_lat")),
        coerce_f64(canonical_field(obj, "geocode_lon")),
    ) else {
        return (None, true);
    };

    let record = GeocodeRecord {
        name: coerce_text(canonical_field(obj, "geocode_name")),
        lat,
        lon,
        precision: coerce_text(canonical_field(obj, "geocode_precision")),
        addresstype: coerce_text(canonical_field(obj, "geocode_addresstype")),
        class: coerce_text(canonical_field(obj, "geocode_class")),
        id: coerce_text(canonical_field(obj, "geocode_id")),
    };
    let stale = stale_reason(&record).is_some();
    (Some(record), stale)
}

fn stale_reason(record: &GeocodeRecord) -> Option<&'static str> {
    STALE_RULES
        .iter()
        .find(|(_, rule)| rule(record))
        .map(|(reason, _)| *reason)
}

// ── Geocoder collaborator ──────────────────────────────────────────

/// An external place search returning at most one hit.
pub trait Geocoder {
    /// `settlement_only` restricts the search to populated places.
    fn search(&self, query: &str, settlement_only: bool) -> Result<Option<GeocodeRecord>>;
}

/// Blocking client for the public Nominatim search endpoint.
pub struct NominatimClient {
    client: reqwest::blocking::Client,
    base_url: String,
    email: Option<String>,
}

impl NominatimClient {
    pub fn new(user_agent: &str, email: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: NOMINATIM_URL.to_string(),
            email,
        })
    }
}

impl Geocoder for NominatimClient {
    fn search(&self, query: &str, settlement_only: bool) -> Result<Option<GeocodeRecord>> {
        let mut params: Vec<(&str, &str)> = vec![("q", query), ("format", "jsonv2"), ("limit", "1")];
        if let Some(email) = &self.email {
            params.push(("email", email.as_str()));
        }
        if settlement_only {
            params.push(("featureType", "settlement"));
        }

        let places: Vec<NominatimPlace> = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()?
            .error_for_status()?
            .json()?;

        places.into_iter().next().map(NominatimPlace::into_record).transpose()
    }
}

/// One element of a `format=jsonv2` search response.
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    display_name: Option<String>,
    lat: Value,
    lon: Value,
    #[serde(rename = "type")]
    kind: Option<String>,
    addresstype: Option<String>,
    class: Option<String>,
    osm_type: Option<String>,
    osm_id: Option<Value>,
}

impl NominatimPlace {
    fn into_record(self) -> Result<GeocodeRecord> {
        let lat = coerce_f64(Some(&self.lat))
            .ok_or_else(|| Error::Payload(format!("latitude {}", self.lat)))?;
        let lon = coerce_f64(Some(&self.lon))
            .ok_or_else(|| Error::Payload(format!("longitude {}", self.lon)))?;
        let id = match (self.osm_type, coerce_text(self.osm_id.as_ref())) {
            (Some(osm_type), Some(osm_id)) => Some(format!("{osm_type}:{osm_id}")),
            _ => None,
        };
        Ok(GeocodeRecord {
            name: self.display_name,
            lat,
            lon,
            precision: self.kind,
            addresstype: self.addresstype,
            class: self.class,
            id,
        })
    }
}

// ── Cache ──────────────────────────────────────────────────────────

/// Query → record (or confirmed miss), loaded once and saved once per run.
#[derive(Debug, Default)]
pub struct GeocodeCache {
    entries: BTreeMap<String, Option<GeocodeRecord>>,
    stale: HashSet<String>,
}

impl GeocodeCache {
    /// Load and normalize; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let raw: Map<String, Value> = serde_json::from_str(&json).map_err(|e| Error::json(path, e))?;
        let cache = Self::from_raw(raw);
        info!(
            path = %path.display(),
            entries = cache.entries.len(),
            stale = cache.stale.len(),
            "loaded geocode cache"
        );
        Ok(cache)
    }

    pub fn from_raw(raw: Map<String, Value>) -> Self {
        let mut cache = Self::default();
        for (query, value) in raw {
            let (record, stale) = normalize_cache_entry(&value);
            if stale {
                let reason = record.as_ref().and_then(stale_reason).unwrap_or("unreadable");
                debug!(query = %query, reason, "stale cache entry");
                cache.stale.insert(query.clone());
            }
            cache.entries.insert(query, record);
        }
        cache
    }

    /// Write key-sorted, pretty JSON. Unreadable rows that were never
    /// refreshed are dropped so the next run fetches them.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let persisted: BTreeMap<&String, &Option<GeocodeRecord>> = self
            .entries
            .iter()
            .filter(|(query, record)| record.is_some() || !self.is_stale(query))
            .collect();
        let json = serde_json::to_string_pretty(&persisted).map_err(|e| Error::json(path, e))?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    /// Cached value when present and trusted. `Some(None)` is a confirmed miss.
    pub fn fresh(&self, query: &str) -> Option<&Option<GeocodeRecord>> {
        if self.stale.contains(query) {
            return None;
        }
        self.entries.get(query)
    }

    pub fn insert(&mut self, query: &str, record: Option<GeocodeRecord>) {
        self.stale.remove(query);
        self.entries.insert(query.to_string(), record);
    }

    pub fn is_stale(&self, query: &str) -> bool {
        self.stale.contains(query)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Cached answer, or a settlement-typed lookup followed by an untyped
    /// one. Transport failures are cached as "not found".
    pub fn resolve(
        &mut self,
        query: &str,
        geocoder: &dyn Geocoder,
        pause: Duration,
    ) -> Option<GeocodeRecord> {
        if let Some(cached) = self.fresh(query) {
            debug!(query, hit = cached.is_some(), "geocode cache hit");
            return cached.clone();
        }

        let mut result = None;
        for settlement_only in [true, false] {
            let attempt = geocoder.search(query, settlement_only);
            if !pause.is_zero() {
                thread::sleep(pause);
            }
            match attempt {
                Ok(Some(record)) => {
                    result = Some(record);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(query, error = %e, "geocode lookup failed, caching as not found");
                    break;
                }
            }
        }

        info!(query, found = result.is_some(), "geocoded");
        self.insert(query, result.clone());
        result
    }
}
