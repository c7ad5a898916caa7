use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::geocode::coerce_text;

// ── Extraction records ─────────────────────────────────────────────

/// One candidate as returned by the extraction model, in document order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Extraction {
    #[serde(default, alias = "text")]
    pub extraction_text: Option<String>,
    #[serde(default, alias = "start")]
    pub char_start: Option<Value>,
    #[serde(default, alias = "end")]
    pub char_end: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// What the model said about a candidate, with legacy keys folded in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceAttributes {
    pub normalized_place: Option<String>,
    pub entity_kind: Option<String>,
    pub place_granularity: Option<String>,
    pub is_real_world: Option<bool>,
    pub should_keep: Option<bool>,
}

/// "true"/"1"/"yes" and friends; anything else is unknown.
pub fn parse_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Null => None,
        other => {
            let text = match other {
                Value::String(s) => s.trim().to_lowercase(),
                v => v.to_string(),
            };
            match text.as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            }
        }
    }
}

/// Offsets arrive as ints, bools, or numeric strings depending on the model.
pub fn coerce_offset(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::Bool(b) => Some(usize::from(*b)),
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Extraction {
    pub fn text(&self) -> Option<&str> {
        self.extraction_text.as_deref().filter(|t| !t.is_empty())
    }

    fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// First offset found on the record itself, then in the attributes.
    fn offset(&self, own: Option<&Value>, keys: &[&str]) -> Option<usize> {
        own.filter(|v| !v.is_null())
            .into_iter()
            .chain(keys.iter().filter_map(|k| self.attr(k)))
            .next()
            .and_then(|v| coerce_offset(Some(v)))
    }

    /// Character offsets as reported, before any inference.
    pub fn reported_span(&self) -> (Option<usize>, Option<usize>) {
        (
            self.offset(self.char_start.as_ref(), &["span_start", "char_start", "start"]),
            self.offset(self.char_end.as_ref(), &["span_end", "char_end", "end"]),
        )
    }

    pub fn place_attributes(&self) -> PlaceAttributes {
        let normalized_place = coerce_text(self.attr("normalized_place"))
            .or_else(|| self.text().map(str::to_string));
        let place_granularity = ["place_granularity", "place_type", "normalized_type"]
            .iter()
            .find_map(|k| coerce_text(self.attr(k)));
        let is_real_world = parse_bool(self.attr("is_real_world"))
            .or_else(|| parse_bool(self.attr("is_fictional")).map(|fictional| !fictional));

        PlaceAttributes {
            normalized_place,
            entity_kind: coerce_text(self.attr("entity_kind")),
            place_granularity,
            is_real_world,
            should_keep: parse_bool(self.attr("should_keep")),
        }
    }
}

// ── Extraction collaborator ────────────────────────────────────────

/// Source of place-name candidates for a play text.
pub trait Extractor {
    fn extract(&self, text: &str, model_id: &str) -> Result<Vec<Extraction>>;
}

/// Reads the model output saved as JSON: either a bare array of records
/// or an object with an `extractions` array.
pub struct JsonFileExtractor {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractionFile {
    Bare(Vec<Extraction>),
    Wrapped { extractions: Vec<Extraction> },
}

impl JsonFileExtractor {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Extractor for JsonFileExtractor {
    fn extract(&self, text: &str, model_id: &str) -> Result<Vec<Extraction>> {
        let json = fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let file: ExtractionFile =
            serde_json::from_str(&json).map_err(|e| Error::json(&self.path, e))?;
        let extractions = match file {
            ExtractionFile::Bare(v) | ExtractionFile::Wrapped { extractions: v } => v,
        };
        info!(
            path = %self.path.display(),
            model = model_id,
            text_bytes = text.len(),
            count = extractions.len(),
            "loaded extractions"
        );
        Ok(extractions)
    }
}
