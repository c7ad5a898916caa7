use std::collections::HashSet;
use std::sync::LazyLock;

use place_types::RejectionReason;
use regex::Regex;

// ── Vocabularies ───────────────────────────────────────────────────

/// Granularity labels from the extractor that count as settlements.
pub const SETTLEMENT_GRANULARITIES: &[&str] = &["city", "town", "village", "hamlet", "municipality"];

/// Granularity labels that are never settlements.
const EXCLUDED_GRANULARITIES: &[&str] = &[
    "country",
    "region",
    "state",
    "province",
    "continent",
    "landmark",
    "monument",
    "building",
    "address",
    "person",
    "deity",
    "organization",
    "fictional_place",
];

/// Geocoder `type` / `addresstype` values accepted as settlements.
const SETTLEMENT_GEOCODE_TYPES: &[&str] = &[
    "city",
    "town",
    "village",
    "hamlet",
    "municipality",
    "suburb",
    "borough",
    "quarter",
    "neighbourhood",
    "neighborhood",
];

const EXCLUDED_GEOCODE_TYPES: &[&str] = &[
    "country",
    "state",
    "region",
    "province",
    "county",
    "continent",
    "island",
    "archipelago",
    "monument",
    "building",
    "church",
    "cemetery",
    "memorial",
    "administrative",
];

const DEITY_TERMS: &[&str] = &["god", "jesus", "christ"];

// "Friar Lawrence", "Lady Capulet", "Sir Toby"
static RE_TITLE_PERSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:friar|lord|lady|sir|nurse|father|mother|brother|sister|prince|duke|count|countess)\s+[A-Za-z]",
    )
    .unwrap()
});

// "Capel's monument", "Juliet's tomb"
static RE_POSSESSIVE_LANDMARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\w+'s\s+(?:monument|tomb|house|vault|church|cell|palace|castle)\b").unwrap()
});

// ── Normalization ──────────────────────────────────────────────────

/// Lower-case, trim, and collapse whitespace runs.
pub fn normalize_text(value: Option<&str>) -> String {
    value
        .unwrap_or("")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Set of normalized speaker names seen anywhere in the play.
pub fn build_character_lexicon<'a, I>(speakers: I) -> HashSet<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    speakers
        .into_iter()
        .map(normalize_text)
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn is_settlement_scope(place_granularity: Option<&str>) -> bool {
    SETTLEMENT_GRANULARITIES.contains(&normalize_text(place_granularity).as_str())
}

// ── Stage A: extractor metadata ────────────────────────────────────

/// Reject on what the extraction model itself said about the candidate.
pub fn metadata_rejection_reason(
    entity_kind: Option<&str>,
    place_granularity: Option<&str>,
    is_real_world: Option<bool>,
    should_keep: Option<bool>,
) -> Option<RejectionReason> {
    if should_keep == Some(false) {
        return Some(RejectionReason::LlmMarkedReject);
    }

    let entity = normalize_text(entity_kind);
    if !entity.is_empty() && entity != "place" {
        return Some(RejectionReason::LlmNotPlace);
    }

    if is_real_world == Some(false) {
        return Some(RejectionReason::LlmNotRealWorld);
    }

    let granularity = normalize_text(place_granularity);
    if EXCLUDED_GRANULARITIES.contains(&granularity.as_str())
        || (!granularity.is_empty() && !SETTLEMENT_GRANULARITIES.contains(&granularity.as_str()))
    {
        return Some(RejectionReason::LlmNotSettlement);
    }

    None
}

// ── Stage B: lexical prefilter ─────────────────────────────────────

/// Reject candidates that read as people, gods, or named buildings.
pub fn prefilter_rejection_reason(
    mention_text: Option<&str>,
    normalized_place: Option<&str>,
    character_lexicon: &HashSet<String>,
) -> Option<RejectionReason> {
    let mention = mention_text
        .filter(|m| !m.is_empty())
        .or(normalized_place)
        .unwrap_or("");
    let norm_mention = normalize_text(Some(mention));
    let norm_place = normalize_text(normalized_place);

    if norm_mention.is_empty() && norm_place.is_empty() {
        return Some(RejectionReason::PreEmptyCandidate);
    }

    if character_lexicon.contains(&norm_mention) || character_lexicon.contains(&norm_place) {
        return Some(RejectionReason::PreCharacterName);
    }
    if DEITY_TERMS.contains(&norm_mention.as_str()) || DEITY_TERMS.contains(&norm_place.as_str()) {
        return Some(RejectionReason::PreDeity);
    }
    if RE_TITLE_PERSON.is_match(mention) {
        return Some(RejectionReason::PrePersonTitle);
    }
    if RE_POSSESSIVE_LANDMARK.is_match(mention) {
        return Some(RejectionReason::PrePossessiveLandmark);
    }

    None
}

/// True when the span sits inside a longer word, e.g. "Rome" in "Romeo".
///
/// Missing, reversed, or out-of-range spans are not sub-tokens.
pub fn is_subtoken_span(text: &str, span_start: Option<usize>, span_end: Option<usize>) -> bool {
    let (Some(start), Some(end)) = (span_start, span_end) else {
        return false;
    };
    if start >= end || end > text.len() {
        return false;
    }
    let (Some(before), Some(after)) = (text.get(..start), text.get(end..)) else {
        return false;
    };

    let left = before.chars().next_back();
    let right = after.chars().next();
    left.is_some_and(char::is_alphanumeric) || right.is_some_and(char::is_alphanumeric)
}

// ── Stage C: geocode postfilter ────────────────────────────────────

/// Judge a geocoder hit by its classification.
///
/// Nominatim files many cities as `boundary/administrative` with an
/// `addresstype` of `city`, so the address type is checked first.
pub fn postfilter_rejection_reason(
    geocode_class: Option<&str>,
    geocode_type: Option<&str>,
    geocode_addresstype: Option<&str>,
) -> Option<RejectionReason> {
    let class = normalize_text(geocode_class);
    let kind = normalize_text(geocode_type);
    let addresstype = normalize_text(geocode_addresstype);

    if kind.is_empty() && addresstype.is_empty() {
        return Some(RejectionReason::GeocodeMissingType);
    }

    if SETTLEMENT_GEOCODE_TYPES.contains(&kind.as_str())
        || SETTLEMENT_GEOCODE_TYPES.contains(&addresstype.as_str())
    {
        return None;
    }

    if class == "place" && kind == "administrative" {
        return None;
    }

    if EXCLUDED_GEOCODE_TYPES.contains(&kind.as_str())
        || EXCLUDED_GEOCODE_TYPES.contains(&addresstype.as_str())
    {
        return Some(RejectionReason::PostNotSettlementType);
    }

    // Unrecognized classifications are not trusted either.
    Some(RejectionReason::PostNotSettlementType)
}
