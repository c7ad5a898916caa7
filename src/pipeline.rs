use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use place_types::{
    GeocodeRecord, MapMarker, MapSummary, Mention, PlaceRow, RejectionReason, SpatialBlock,
};
use tracing::{debug, info};

use crate::aggregate::{GeoPoint, center_of_gravity};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::extract::{Extraction, Extractor};
use crate::filter::{
    build_character_lexicon, is_settlement_scope, is_subtoken_span, metadata_rejection_reason,
    postfilter_rejection_reason, prefilter_rejection_reason,
};
use crate::geocode::{GeocodeCache, Geocoder};
use crate::gutenberg::{fetch_text, strip_gutenberg_header_footer, trim_play_front_matter};
use crate::output::{write_json, write_table};
use crate::parser::{
    LineContext, char_to_byte_offset, extract_sentence_for_span, find_context_for_span,
    find_span_for_text, index_text_lines,
};

/// Run-level fields stamped onto every mention row.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub play_id: String,
    pub play_title: String,
    pub source_url: Option<String>,
    pub model_name: String,
    pub run_id: String,
}

impl RunMeta {
    pub fn from_config(config: &RunConfig, run_id: &str) -> Self {
        Self {
            play_id: config.play_id.clone(),
            play_title: config.title.clone(),
            source_url: Some(config.gutenberg_url.clone()),
            model_name: config.model.clone(),
            run_id: run_id.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  PLAY TEXT
// ═══════════════════════════════════════════════════════════════════════

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, text).map_err(|e| Error::io(path, e))
}

/// Play text with Gutenberg boilerplate and front matter removed.
///
/// An explicit `--play-file` is used as is (after trimming). Otherwise the
/// local copy under the data dir is reused, or downloaded once and saved.
pub fn load_play_text(config: &RunConfig) -> Result<String> {
    if let Some(path) = &config.play_file {
        return Ok(trim_play_front_matter(&read_text(path)?));
    }

    let cached = config.cached_play_path();
    let text = if cached.exists() {
        read_text(&cached)?
    } else {
        info!(url = %config.gutenberg_url, "downloading play text");
        let text = strip_gutenberg_header_footer(&fetch_text(&config.gutenberg_url)?);
        write_text(&cached, &text)?;
        text
    };

    let trimmed = trim_play_front_matter(&text);
    if trimmed != text {
        write_text(&cached, &trimmed)?;
    }
    Ok(trimmed)
}

// ═══════════════════════════════════════════════════════════════════════
//  MENTIONS: span → context → metadata filter → prefilter
// ═══════════════════════════════════════════════════════════════════════

/// Turn extractions into mention rows, in input order.
///
/// Extractions that do not land on a dialogue line (scene headings, stage
/// directions, front matter) are dropped entirely.
pub fn build_mentions(
    text: &str,
    contexts: &[LineContext],
    lexicon: &HashSet<String>,
    extractions: &[Extraction],
    meta: &RunMeta,
) -> Vec<Mention> {
    let mut cursor = 0;
    let mut mentions = Vec::new();

    for extraction in extractions {
        let mention_text = extraction.text();
        // Reported offsets count characters; everything below slices bytes.
        let (reported_start, reported_end) = extraction.reported_span();
        let mut span_start = reported_start.and_then(|n| char_to_byte_offset(text, n));
        let mut span_end = reported_end.and_then(|n| char_to_byte_offset(text, n));

        if span_start.is_none() {
            let found = find_span_for_text(text, mention_text.unwrap_or(""), cursor);
            cursor = found.next_cursor;
            span_start = found.start;
            span_end = span_end.or(found.end);
        }
        if let (Some(start), None, Some(t)) = (span_start, span_end, mention_text) {
            span_end = start.checked_add(t.len());
        }

        let attrs = extraction.place_attributes();
        let reason = metadata_rejection_reason(
            attrs.entity_kind.as_deref(),
            attrs.place_granularity.as_deref(),
            attrs.is_real_world,
            attrs.should_keep,
        )
        .or_else(|| {
            prefilter_rejection_reason(mention_text, attrs.normalized_place.as_deref(), lexicon)
        })
        .or_else(|| {
            is_subtoken_span(text, span_start, span_end)
                .then_some(RejectionReason::PreSubtokenSpan)
        });

        let Some(ctx) = span_start
            .and_then(|start| find_context_for_span(contexts, start))
            .filter(|ctx| ctx.is_dialogue)
        else {
            debug!(mention = ?mention_text, span_start, "not spoken dialogue, skipped");
            continue;
        };

        let mut mention = Mention {
            play_id: meta.play_id.clone(),
            play_title: meta.play_title.clone(),
            act: ctx.act.clone(),
            scene: ctx.scene.clone(),
            line: Some(ctx.line_number),
            speaker: ctx.speaker.clone(),
            mention_text: mention_text.unwrap_or("").to_string(),
            mention_sentence: extract_sentence_for_span(text, span_start, span_end),
            span_start,
            span_end,
            settlement_scope: is_settlement_scope(attrs.place_granularity.as_deref()),
            geocode_query: attrs.normalized_place.clone(),
            normalized_place: attrs.normalized_place,
            entity_kind: attrs.entity_kind,
            place_granularity: attrs.place_granularity,
            is_real_world: attrs.is_real_world,
            should_keep_llm: attrs.should_keep,
            confidence: extraction.confidence,
            keep: true,
            source_url: meta.source_url.clone(),
            model_name: meta.model_name.clone(),
            run_id: meta.run_id.clone(),
            ..Mention::default()
        };
        if let Some(reason) = reason {
            mention.reject(reason);
        }
        mentions.push(mention);
    }

    mentions
}

// ═══════════════════════════════════════════════════════════════════════
//  GEOCODING + POSTFILTER
// ═══════════════════════════════════════════════════════════════════════

/// Resolve each distinct query of the kept mentions once, then apply the
/// result (and the postfilter) to every mention sharing that query.
pub fn geocode_mentions(
    mentions: &mut [Mention],
    cache: &mut GeocodeCache,
    geocoder: &dyn Geocoder,
    pause: Duration,
) {
    let queries: BTreeSet<String> = mentions
        .iter()
        .filter(|m| m.keep)
        .filter_map(|m| m.geocode_query.clone())
        .filter(|q| !q.trim().is_empty())
        .collect();

    let results: HashMap<String, Option<GeocodeRecord>> = queries
        .into_iter()
        .map(|q| {
            let record = cache.resolve(&q, geocoder, pause);
            (q, record)
        })
        .collect();

    for mention in mentions.iter_mut().filter(|m| m.keep) {
        let record = mention
            .geocode_query
            .as_ref()
            .and_then(|q| results.get(q))
            .and_then(Option::as_ref);

        let Some(record) = record else {
            mention.spatial_usable = false;
            mention.spatial_blocked_reason = Some(SpatialBlock::GeocodeNotFound);
            continue;
        };

        mention.apply_geocode(record);
        match postfilter_rejection_reason(
            record.class.as_deref(),
            record.precision.as_deref(),
            record.addresstype.as_deref(),
        ) {
            Some(reason) => {
                mention.reject(reason);
                mention.spatial_usable = false;
                mention.spatial_blocked_reason = Some(SpatialBlock::PostfilterRejected);
            }
            None => {
                mention.spatial_usable = true;
                mention.spatial_blocked_reason = None;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  PLACES + CENTER OF GRAVITY
// ═══════════════════════════════════════════════════════════════════════

/// Group spatially usable mentions by geocode id (falling back to the
/// normalized place), in order of first appearance.
pub fn collect_places(mentions: &[Mention]) -> Vec<PlaceRow> {
    let mut places: Vec<PlaceRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for m in mentions.iter().filter(|m| m.is_spatial()) {
        let (Some(lat), Some(lon)) = (m.geocode_lat, m.geocode_lon) else {
            continue;
        };
        let key = m
            .geocode_id
            .clone()
            .or_else(|| m.normalized_place.clone())
            .unwrap_or_default();

        match index.get(&key).copied() {
            Some(i) => {
                let place = &mut places[i];
                place.mention_count += 1;
                if place.mention_sentence.is_none() {
                    place.mention_sentence = non_empty(&m.mention_sentence);
                }
            }
            None => {
                index.insert(key, places.len());
                places.push(PlaceRow {
                    normalized_place: m.normalized_place.clone(),
                    mention_sentence: non_empty(&m.mention_sentence),
                    geocode_name: m.geocode_name.clone(),
                    geocode_lat: lat,
                    geocode_lon: lon,
                    geocode_precision: m.geocode_precision.clone(),
                    geocode_addresstype: m.geocode_addresstype.clone(),
                    geocode_class: m.geocode_class.clone(),
                    geocode_id: m.geocode_id.clone(),
                    mention_count: 1,
                });
            }
        }
    }

    places
}

fn non_empty(sentence: &Option<String>) -> Option<String> {
    sentence
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// One unit-weight point per spatially usable mention.
pub fn spatial_points(mentions: &[Mention]) -> Vec<GeoPoint> {
    mentions
        .iter()
        .filter(|m| m.is_spatial())
        .map(|m| GeoPoint::new(m.geocode_lat, m.geocode_lon))
        .collect()
}

pub fn map_summary(meta: &RunMeta, center: (f64, f64), places: &[PlaceRow]) -> MapSummary {
    MapSummary {
        play_id: meta.play_id.clone(),
        play_title: meta.play_title.clone(),
        center_lat: center.0,
        center_lon: center.1,
        places: places
            .iter()
            .filter(|p| p.geocode_lat.is_finite() && p.geocode_lon.is_finite())
            .map(|p| MapMarker {
                name: p
                    .geocode_name
                    .clone()
                    .or_else(|| p.normalized_place.clone())
                    .unwrap_or_default(),
                lat: p.geocode_lat,
                lon: p.geocode_lon,
                mention_count: p.mention_count,
            })
            .collect(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  FULL RUN
// ═══════════════════════════════════════════════════════════════════════

/// Paths written and headline numbers of one run.
#[derive(Debug)]
pub struct RunReport {
    pub mentions_csv: PathBuf,
    pub rejections_csv: PathBuf,
    pub places_csv: PathBuf,
    pub map_json: PathBuf,
    pub mentions: Vec<Mention>,
    pub places: Vec<PlaceRow>,
    pub center: (f64, f64),
}

impl RunReport {
    pub fn kept(&self) -> usize {
        self.mentions.iter().filter(|m| m.keep).count()
    }

    pub fn rejected(&self) -> usize {
        self.mentions.iter().filter(|m| !m.keep).count()
    }

    pub fn spatial(&self) -> usize {
        self.mentions.iter().filter(|m| m.is_spatial()).count()
    }
}

/// Index → extract → filter → geocode → aggregate → write tables.
pub fn run_on_text(
    config: &RunConfig,
    meta: &RunMeta,
    text: &str,
    extractor: &dyn Extractor,
    geocoder: &dyn Geocoder,
) -> Result<RunReport> {
    let contexts = index_text_lines(text);
    let lexicon = build_character_lexicon(contexts.iter().map(|c| c.speaker.as_deref()));
    info!(lines = contexts.len(), characters = lexicon.len(), "indexed play");

    let extractions = extractor.extract(text, &config.model)?;
    let mut mentions = build_mentions(text, &contexts, &lexicon, &extractions, meta);

    let cache_path = config.cache_path();
    let mut cache = GeocodeCache::load(&cache_path)?;
    geocode_mentions(&mut mentions, &mut cache, geocoder, config.pause);
    cache.save(&cache_path)?;
    info!(path = %cache_path.display(), entries = cache.len(), "saved geocode cache");

    let rejections: Vec<Mention> = mentions.iter().filter(|m| !m.keep).cloned().collect();
    let places = collect_places(&mentions);
    let center = center_of_gravity(&spatial_points(&mentions));

    let report = RunReport {
        mentions_csv: config.output_path("mentions.csv"),
        rejections_csv: config.output_path("rejections.csv"),
        places_csv: config.output_path("places.csv"),
        map_json: config.output_path("map.json"),
        mentions,
        places,
        center,
    };

    write_table(&report.mentions_csv, &report.mentions)?;
    write_table(&report.rejections_csv, &rejections)?;
    write_table(&report.places_csv, &report.places)?;
    write_json(&report.map_json, &map_summary(meta, center, &report.places))?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use serde_json::{Value, json};
    use std::cell::RefCell;

    struct FakeExtractor(Vec<Extraction>);

    impl Extractor for FakeExtractor {
        fn extract(&self, _text: &str, _model_id: &str) -> Result<Vec<Extraction>> {
            Ok(self.0.clone())
        }
    }

    /// Answers every attempt from a fixed table and records the queries.
    #[derive(Default)]
    struct FakeGeocoder {
        hits: HashMap<String, GeocodeRecord>,
        calls: RefCell<Vec<String>>,
    }

    impl Geocoder for FakeGeocoder {
        fn search(&self, query: &str, _settlement_only: bool) -> Result<Option<GeocodeRecord>> {
            self.calls.borrow_mut().push(query.to_string());
            Ok(self.hits.get(query).cloned())
        }
    }

    fn geocoder(places: &[(&str, GeocodeRecord)]) -> FakeGeocoder {
        FakeGeocoder {
            hits: places
                .iter()
                .map(|(q, r)| (q.to_string(), r.clone()))
                .collect(),
            ..FakeGeocoder::default()
        }
    }

    fn city(name: &str, lat: f64, lon: f64, id: &str) -> GeocodeRecord {
        GeocodeRecord {
            name: Some(format!("{name}, Italia")),
            lat,
            lon,
            precision: Some("city".into()),
            addresstype: Some("city".into()),
            class: Some("place".into()),
            id: Some(id.into()),
        }
    }

    fn extraction(text: &str, span: Option<(usize, usize)>, granularity: &str) -> Extraction {
        let mut value = json!({
            "extraction_text": text,
            "confidence": 0.9,
            "attributes": {
                "normalized_place": text,
                "entity_kind": "place",
                "place_granularity": granularity,
                "is_real_world": "true",
                "should_keep": "true"
            }
        });
        if let Some((start, end)) = span {
            value["char_start"] = Value::from(start);
            value["char_end"] = Value::from(end);
        }
        serde_json::from_value(value).unwrap()
    }

    fn span_of(text: &str, needle: &str, from: usize) -> (usize, usize) {
        let start = text[from..].find(needle).unwrap() + from;
        (start, start + needle.len())
    }

    fn run(
        dir: &Path,
        text: &str,
        extractions: Vec<Extraction>,
        geocoder: &FakeGeocoder,
    ) -> RunReport {
        let config = test_config(dir);
        let meta = RunMeta::from_config(&config, "20260101T000000Z");
        run_on_text(&config, &meta, text, &FakeExtractor(extractions), geocoder).unwrap()
    }

    fn csv_rows(path: &Path) -> usize {
        csv::Reader::from_path(path).unwrap().records().count()
    }

    #[test]
    fn test_run_writes_outputs_and_groups_places() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I\nROMEO.\nVerona.\nBENVOLIO.\nMantua.\nROMEO.\nVerona.\n";
        let v1 = span_of(text, "Verona", 0);
        let m = span_of(text, "Mantua", v1.1);
        let v2 = span_of(text, "Verona", m.1);
        let geo = geocoder(&[
            ("Verona", city("Verona", 45.4384, 10.9916, "relation:44874")),
            ("Mantua", city("Mantua", 45.1564, 10.7914, "relation:44550")),
        ]);

        let report = run(
            dir.path(),
            text,
            vec![
                extraction("Verona", Some(v1), "city"),
                extraction("Mantua", Some(m), "city"),
                extraction("Verona", Some(v2), "city"),
            ],
            &geo,
        );

        for path in [
            &report.mentions_csv,
            &report.rejections_csv,
            &report.places_csv,
            &report.map_json,
        ] {
            assert!(path.exists(), "{} missing", path.display());
        }
        assert_eq!(report.mentions.len(), 3);
        assert!(report.mentions.iter().all(|m| m.mention_sentence.is_some()));
        assert_eq!(report.mentions[2].speaker.as_deref(), Some("ROMEO"));
        assert_eq!(report.mentions[2].line, Some(8));

        assert_eq!(report.places.len(), 2);
        assert_eq!(report.places[0].normalized_place.as_deref(), Some("Verona"));
        assert_eq!(report.places[0].mention_count, 2);
        assert_eq!(report.places[1].mention_count, 1);
        assert_eq!(csv_rows(&report.rejections_csv), 0);
        assert_eq!(csv_rows(&report.places_csv), 2);

        // One lookup per distinct query.
        assert_eq!(*geo.calls.borrow(), vec!["Mantua", "Verona"]);

        let expected_lat = (45.4384 * 2.0 + 45.1564) / 3.0;
        assert!((report.center.0 - expected_lat).abs() < 1e-9);
    }

    #[test]
    fn test_country_and_person_like_mentions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I\nROMEO.\nFriar John went from Italy to Verona.\n";
        let fj = span_of(text, "Friar John", 0);
        let it = span_of(text, "Italy", fj.1);
        let ve = span_of(text, "Verona", it.1);
        let geo = geocoder(&[("Verona", city("Verona", 45.4384, 10.9916, "relation:44874"))]);

        let report = run(
            dir.path(),
            text,
            vec![
                extraction("Friar John", Some(fj), "city"),
                extraction("Italy", Some(it), "country"),
                extraction("Verona", Some(ve), "city"),
            ],
            &geo,
        );

        let reasons: Vec<_> = report.mentions.iter().map(|m| m.rejected_reason).collect();
        assert_eq!(
            reasons,
            vec![
                Some(RejectionReason::PrePersonTitle),
                Some(RejectionReason::LlmNotSettlement),
                None
            ]
        );
        assert_eq!(csv_rows(&report.rejections_csv), 2);
        assert_eq!(report.places.len(), 1);
        // Rejected mentions are never geocoded.
        assert_eq!(*geo.calls.borrow(), vec!["Verona"]);
        let italy = &report.mentions[1];
        assert!(!italy.spatial_usable);
        assert_eq!(italy.spatial_blocked_reason, None);
        assert_eq!(italy.geocode_lat, None);
    }

    #[test]
    fn test_offsetless_extractions_are_located_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I.\nROMEO.\nVerona appears here.\n\
                    ACT II\nSCENE I.\nBENVOLIO.\nMantua appears here.\n";
        let geo = geocoder(&[
            ("Verona", city("Verona", 45.0, 10.9, "relation:Verona")),
            ("Mantua", city("Mantua", 45.1, 10.8, "relation:Mantua")),
        ]);

        let report = run(
            dir.path(),
            text,
            vec![extraction("Verona", None, "city"), extraction("Mantua", None, "city")],
            &geo,
        );

        let verona = &report.mentions[0];
        assert_eq!(verona.line, Some(4));
        assert_eq!(verona.act.as_deref(), Some("ACT I"));
        assert_eq!(verona.scene.as_deref(), Some("SCENE I."));
        assert_eq!(verona.span_end.unwrap() - verona.span_start.unwrap(), 6);

        let mantua = &report.mentions[1];
        assert_eq!(mantua.line, Some(8));
        assert_eq!(mantua.act.as_deref(), Some("ACT II"));
        assert_eq!(mantua.speaker.as_deref(), Some("BENVOLIO"));
    }

    #[test]
    fn test_repeated_offsetless_phrase_advances_cursor() {
        let text = "ACT I\nROMEO.\nTo Padua.\nROMEO.\nFrom Padua.\n";
        let contexts = index_text_lines(text);
        let lexicon = build_character_lexicon(contexts.iter().map(|c| c.speaker.as_deref()));
        let extractions = vec![extraction("Padua", None, "city"), extraction("Padua", None, "city")];

        let mentions = build_mentions(text, &contexts, &lexicon, &extractions, &RunMeta::default());
        assert_eq!(mentions.len(), 2);
        assert!(mentions[1].span_start > mentions[0].span_start);
        assert_eq!(mentions[0].line, Some(3));
        assert_eq!(mentions[1].line, Some(5));
    }

    #[test]
    fn test_reported_char_offsets_survive_curly_quotes() {
        let text = "ACT I\nROMEO.\n‘Tis Rome, fair Rome.\n";
        let contexts = index_text_lines(text);
        let lexicon = build_character_lexicon(contexts.iter().map(|c| c.speaker.as_deref()));
        // "Rome" is characters 18..22 but bytes 21..25.
        let extractions = vec![extraction("Rome", Some((18, 22)), "city")];

        let mentions = build_mentions(text, &contexts, &lexicon, &extractions, &RunMeta::default());
        assert_eq!(mentions.len(), 1);
        let rome = &mentions[0];
        assert_eq!((rome.span_start, rome.span_end), (Some(21), Some(25)));
        assert_eq!(&text[21..25], "Rome");
        assert!(rome.keep);
        assert_eq!(rome.rejected_reason, None);
        assert_eq!(rome.line, Some(3));
        assert_eq!(rome.speaker.as_deref(), Some("ROMEO"));
        assert_eq!(rome.mention_sentence.as_deref(), Some("‘Tis Rome, fair Rome"));
    }

    #[test]
    fn test_out_of_range_offsets_fall_back_to_search() {
        let text = "ACT I\nROMEO.\nTo Rome.\n";
        let contexts = index_text_lines(text);
        let lexicon = build_character_lexicon(contexts.iter().map(|c| c.speaker.as_deref()));
        let extractions = vec![
            serde_json::from_value(json!({
                "extraction_text": "Rome",
                "char_start": "18446744073709551615",
                "attributes": {"place_granularity": "city"}
            }))
            .unwrap(),
        ];

        let mentions = build_mentions(text, &contexts, &lexicon, &extractions, &RunMeta::default());
        assert_eq!(mentions.len(), 1);
        let start = text.find("Rome").unwrap();
        assert_eq!(mentions[0].span_start, Some(start));
        assert_eq!(mentions[0].span_end, Some(start + 4));
        assert!(mentions[0].keep);
    }

    #[test]
    fn test_scene_heading_mentions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I. Verona.\nROMEO.\nI travel to Mantua tonight.\n";
        let geo = geocoder(&[
            ("Verona", city("Verona", 45.0, 10.9, "relation:Verona")),
            ("Mantua", city("Mantua", 45.1, 10.8, "relation:Mantua")),
        ]);

        let report = run(
            dir.path(),
            text,
            vec![
                extraction("Verona", Some(span_of(text, "Verona", 0)), "city"),
                extraction("Mantua", Some(span_of(text, "Mantua", 0)), "city"),
            ],
            &geo,
        );

        let names: Vec<_> = report.mentions.iter().map(|m| m.mention_text.as_str()).collect();
        assert_eq!(names, vec!["Mantua"]);
        assert_eq!(report.places.len(), 1);
        assert_eq!(csv_rows(&report.rejections_csv), 0);
    }

    #[test]
    fn test_subtoken_rome_inside_romeo_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I.\nBENVOLIO.\nO Romeo, Romeo, brave Mercutio's dead.\n";
        let mut roma = city("Roma", 41.8933203, 12.4829321, "relation:41485");
        roma.precision = Some("administrative".into());
        roma.class = Some("boundary".into());
        let geo = geocoder(&[("Rome", roma.clone()), ("Romeo", roma)]);

        let report = run(
            dir.path(),
            text,
            vec![
                extraction("Rome", Some(span_of(text, "Rome", 0)), "city"),
                extraction("Romeo", Some(span_of(text, "Romeo", 0)), "other"),
            ],
            &geo,
        );

        assert_eq!(
            report.mentions[0].rejected_reason,
            Some(RejectionReason::PreSubtokenSpan)
        );
        assert_eq!(
            report.mentions[1].rejected_reason,
            Some(RejectionReason::LlmNotSettlement)
        );
        assert!(report.places.is_empty());
        assert_eq!(csv_rows(&report.rejections_csv), 2);
        assert!(geo.calls.borrow().is_empty());
    }

    #[test]
    fn test_geocode_failure_does_not_flip_keep() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I.\nROMEO.\nI go to Mantua.\n";
        let geo = FakeGeocoder::default();

        let report = run(
            dir.path(),
            text,
            vec![extraction("Mantua", Some(span_of(text, "Mantua", 0)), "city")],
            &geo,
        );

        let mantua = &report.mentions[0];
        assert!(mantua.keep);
        assert!(!mantua.spatial_usable);
        assert_eq!(mantua.spatial_blocked_reason, Some(SpatialBlock::GeocodeNotFound));
        assert_eq!(mantua.mention_sentence.as_deref(), Some("I go to Mantua"));
        assert!(report.places.is_empty());
        assert_eq!(report.center, (0.0, 0.0));
        assert_eq!(csv_rows(&report.rejections_csv), 0);
        assert_eq!(csv_rows(&report.places_csv), 0);

        // The miss is persisted and not retried on the next run.
        let cache = GeocodeCache::load(&test_config(dir.path()).cache_path()).unwrap();
        assert_eq!(cache.fresh("Mantua"), Some(&None));
    }

    #[test]
    fn test_postfilter_rejects_non_settlement_result() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nSCENE I.\nROMEO.\nI sail to Cyprus.\n";
        let mut cyprus = city("Cyprus", 35.0, 33.0, "relation:307787");
        cyprus.precision = Some("administrative".into());
        cyprus.addresstype = Some("country".into());
        cyprus.class = Some("boundary".into());
        let geo = geocoder(&[("Cyprus", cyprus)]);

        let report = run(
            dir.path(),
            text,
            vec![extraction("Cyprus", Some(span_of(text, "Cyprus", 0)), "city")],
            &geo,
        );

        let m = &report.mentions[0];
        assert!(!m.keep);
        assert_eq!(m.rejected_reason, Some(RejectionReason::PostNotSettlementType));
        assert_eq!(m.spatial_blocked_reason, Some(SpatialBlock::PostfilterRejected));
        assert_eq!(m.geocode_id.as_deref(), Some("relation:307787"));
        assert!(report.places.is_empty());
        assert_eq!(csv_rows(&report.rejections_csv), 1);
    }

    #[test]
    fn test_everything_rejected_still_produces_tables() {
        let dir = tempfile::tempdir().unwrap();
        let text = "ACT I\nROMEO.\nGod save thee.\n";
        let report = run(
            dir.path(),
            text,
            vec![extraction("God", Some(span_of(text, "God", 0)), "city")],
            &FakeGeocoder::default(),
        );

        assert_eq!(report.rejected(), 1);
        assert_eq!(report.kept(), 0);
        assert_eq!(report.spatial(), 0);
        assert_eq!(csv_rows(&report.places_csv), 0);
        let summary: MapSummary =
            serde_json::from_str(&fs::read_to_string(&report.map_json).unwrap()).unwrap();
        assert_eq!((summary.center_lat, summary.center_lon), (0.0, 0.0));
        assert!(summary.places.is_empty());
    }

    #[test]
    fn test_places_fall_back_to_normalized_name_and_first_sentence() {
        let mut a = Mention {
            keep: true,
            spatial_usable: true,
            normalized_place: Some("Padua".into()),
            geocode_lat: Some(45.4),
            geocode_lon: Some(11.9),
            ..Mention::default()
        };
        let mut b = a.clone();
        a.mention_sentence = Some("   ".into());
        b.mention_sentence = Some("Fair Padua, nursery of arts".into());

        let places = collect_places(&[a, b]);
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].mention_count, 2);
        assert_eq!(
            places[0].mention_sentence.as_deref(),
            Some("Fair Padua, nursery of arts")
        );
    }

    #[test]
    fn test_load_play_text_trims_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let play = dir.path().join("play.txt");
        fs::write(
            &play,
            "Contents\nACT V\nDramatis Personae\nCHORUS.\n\nTHE PROLOGUE\nCHORUS.\nIn fair Verona,\n",
        )
        .unwrap();
        let mut config = test_config(dir.path());
        config.play_file = Some(play);

        let text = load_play_text(&config).unwrap();
        assert!(text.starts_with("THE PROLOGUE"));
    }

    #[test]
    fn test_load_play_text_reuses_and_rewrites_cached_copy() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cached = config.cached_play_path();
        write_text(&cached, "Front matter\nACT I\nROMEO.\nVerona.").unwrap();

        assert_eq!(load_play_text(&config).unwrap(), "ACT I\nROMEO.\nVerona.");
        assert_eq!(fs::read_to_string(&cached).unwrap(), "ACT I\nROMEO.\nVerona.");
    }
}
