use std::fmt;

use serde::{Deserialize, Serialize};

// ── Rejection reasons ────────────────────────────────────────────────────

/// Why a mention was excluded from the mappable corpus.
///
/// Variants are listed in pipeline order: metadata filter, lexical
/// prefilter, then the geocode postfilter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    LlmMarkedReject,
    LlmNotPlace,
    LlmNotRealWorld,
    LlmNotSettlement,
    PreEmptyCandidate,
    PreCharacterName,
    PreDeity,
    PrePersonTitle,
    PrePossessiveLandmark,
    PreSubtokenSpan,
    GeocodeMissingType,
    PostNotSettlementType,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmMarkedReject => "llm_marked_reject",
            Self::LlmNotPlace => "llm_not_place",
            Self::LlmNotRealWorld => "llm_not_real_world",
            Self::LlmNotSettlement => "llm_not_settlement",
            Self::PreEmptyCandidate => "pre_empty_candidate",
            Self::PreCharacterName => "pre_character_name",
            Self::PreDeity => "pre_deity",
            Self::PrePersonTitle => "pre_person_title",
            Self::PrePossessiveLandmark => "pre_possessive_landmark",
            Self::PreSubtokenSpan => "pre_subtoken_span",
            Self::GeocodeMissingType => "geocode_missing_type",
            Self::PostNotSettlementType => "post_not_settlement_type",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Spatial outcome ──────────────────────────────────────────────────────

/// Why a kept (or postfilter-rejected) mention has no usable coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialBlock {
    /// Both lookups came back empty, or the transport failed.
    GeocodeNotFound,
    /// A result exists but its classification is not a settlement.
    PostfilterRejected,
}

// ── Canonical geocode record ─────────────────────────────────────────────

/// One geocoder hit in the canonical cache schema.
///
/// The serialized form has exactly seven fields; `None` is written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeRecord {
    #[serde(rename = "geocode_name")]
    pub name: Option<String>,
    #[serde(rename = "geocode_lat")]
    pub lat: f64,
    #[serde(rename = "geocode_lon")]
    pub lon: f64,
    #[serde(rename = "geocode_precision")]
    pub precision: Option<String>,
    #[serde(rename = "geocode_addresstype")]
    pub addresstype: Option<String>,
    #[serde(rename = "geocode_class")]
    pub class: Option<String>,
    /// `<osm_type>:<osm_id>`
    #[serde(rename = "geocode_id")]
    pub id: Option<String>,
}

// ── Mention row ──────────────────────────────────────────────────────────

/// One extracted place-name candidate, enriched stage by stage.
///
/// Every field is flat so the row serializes directly to CSV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub play_id: String,
    pub play_title: String,
    pub act: Option<String>,
    pub scene: Option<String>,
    pub line: Option<usize>,
    pub speaker: Option<String>,
    pub mention_text: String,
    pub mention_sentence: Option<String>,
    pub span_start: Option<usize>,
    pub span_end: Option<usize>,
    pub normalized_place: Option<String>,
    pub entity_kind: Option<String>,
    pub place_granularity: Option<String>,
    pub settlement_scope: bool,
    pub is_real_world: Option<bool>,
    pub should_keep_llm: Option<bool>,
    pub confidence: Option<f64>,
    pub spatial_usable: bool,
    pub spatial_blocked_reason: Option<SpatialBlock>,
    pub geocode_query: Option<String>,
    pub geocode_name: Option<String>,
    pub geocode_lat: Option<f64>,
    pub geocode_lon: Option<f64>,
    pub geocode_precision: Option<String>,
    pub geocode_addresstype: Option<String>,
    pub geocode_class: Option<String>,
    pub geocode_id: Option<String>,
    pub keep: bool,
    pub rejected_reason: Option<RejectionReason>,
    pub source_url: Option<String>,
    pub model_name: String,
    pub run_id: String,
}

impl Mention {
    /// Record a rejection. The first reason sticks; a rejected mention is
    /// never kept again.
    pub fn reject(&mut self, reason: RejectionReason) {
        if self.keep {
            self.keep = false;
            self.rejected_reason = Some(reason);
        }
    }

    /// Copy the geocode attributes onto the row.
    pub fn apply_geocode(&mut self, record: &GeocodeRecord) {
        self.geocode_name = record.name.clone();
        self.geocode_lat = Some(record.lat);
        self.geocode_lon = Some(record.lon);
        self.geocode_precision = record.precision.clone();
        self.geocode_addresstype = record.addresstype.clone();
        self.geocode_class = record.class.clone();
        self.geocode_id = record.id.clone();
    }

    /// Kept and geocoded to a settlement.
    pub fn is_spatial(&self) -> bool {
        self.keep && self.spatial_usable
    }
}

// ── Places table ─────────────────────────────────────────────────────────

/// A deduplicated place, grouped by geocode id (or normalized name).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceRow {
    pub normalized_place: Option<String>,
    pub mention_sentence: Option<String>,
    pub geocode_name: Option<String>,
    pub geocode_lat: f64,
    pub geocode_lon: f64,
    pub geocode_precision: Option<String>,
    pub geocode_addresstype: Option<String>,
    pub geocode_class: Option<String>,
    pub geocode_id: Option<String>,
    pub mention_count: usize,
}

// ── Map summary ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub mention_count: usize,
}

/// Input handed to the map renderer: a center plus one marker per place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSummary {
    pub play_id: String,
    pub play_title: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub places: Vec<MapMarker>,
}
