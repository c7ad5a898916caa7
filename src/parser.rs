use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

// ── Heading patterns ───────────────────────────────────────────────
//
// Real data examples (Project Gutenberg layout):
//   ACT I
//   SCENE II. A Street.
//   THE PROLOGUE
//   FRIAR LAWRENCE.
//   Enter Romeo and Juliet above, at the window.
//   [_Exit._]

static RE_ACT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^ACT\s+[IVX]+\b").unwrap());

static RE_SCENE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^SCENE\s+[IVX]+\b").unwrap());

static RE_PROLOGUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:THE\s+)?PROLOGUE\b").unwrap());

// Whole line in capitals, ending with a period: "ROMEO.", "LADY CAPULET."
static RE_SPEAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z\s'\-]+\.$").unwrap());

static RE_STAGE_DIRECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\[_?.*|_?\[.*|enter\b|exit\b|exeunt\b|re-enter\b|flourish\b|alarum\b)")
        .unwrap()
});

/// Sentinel used for both act and scene once a prologue heading is seen.
pub const PROLOGUE: &str = "PROLOGUE";

const SENTENCE_BREAKS: &[char] = &['.', '?', '!', '\n'];

// ── Types ──────────────────────────────────────────────────────────

/// Structural snapshot of one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineContext {
    /// 1-based
    pub line_number: usize,
    pub byte_start: usize,
    /// Exclusive; the trailing newline is not part of the line.
    pub byte_end: usize,
    pub raw_text: String,
    pub act: Option<String>,
    pub scene: Option<String>,
    pub speaker: Option<String>,
    pub is_dialogue: bool,
}

/// What a single trimmed line is, by heading priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Act,
    Prologue,
    Scene,
    Speaker,
    StageDirection,
    Text,
}

impl LineKind {
    fn classify(stripped: &str) -> Self {
        if RE_ACT.is_match(stripped) {
            Self::Act
        } else if RE_PROLOGUE.is_match(stripped) {
            Self::Prologue
        } else if RE_SCENE.is_match(stripped) {
            Self::Scene
        } else if RE_SPEAKER.is_match(stripped) {
            Self::Speaker
        } else if RE_STAGE_DIRECTION.is_match(stripped) {
            Self::StageDirection
        } else {
            Self::Text
        }
    }
}

/// Play-structure state carried from one line to the next.
#[derive(Debug, Clone, Default)]
struct PlayState {
    act: Option<String>,
    scene: Option<String>,
    speaker: Option<String>,
    in_body: bool,
}

impl PlayState {
    fn advance(&self, kind: LineKind, stripped: &str) -> Self {
        match kind {
            LineKind::Act => Self {
                act: Some(stripped.to_string()),
                scene: None,
                speaker: None,
                in_body: true,
            },
            LineKind::Prologue => Self {
                act: Some(PROLOGUE.to_string()),
                scene: Some(PROLOGUE.to_string()),
                speaker: None,
                in_body: true,
            },
            LineKind::Scene => Self {
                scene: Some(stripped.to_string()),
                speaker: None,
                ..self.clone()
            },
            LineKind::Speaker => Self {
                speaker: Some(stripped.trim_end_matches('.').to_string()),
                ..self.clone()
            },
            LineKind::StageDirection | LineKind::Text => self.clone(),
        }
    }

    fn is_dialogue(&self, kind: LineKind, stripped: &str) -> bool {
        self.in_body
            && !stripped.is_empty()
            && self.speaker.as_deref().is_some_and(|s| !s.is_empty())
            && kind == LineKind::Text
    }
}

// ── Indexing ───────────────────────────────────────────────────────

/// Split into lines on `\n`. A final trailing newline does not open an
/// extra empty line.
fn source_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.strip_suffix('\n').unwrap_or(text).split('\n').collect()
}

/// Scan the play once and snapshot the structural state at every line.
pub fn index_text_lines(text: &str) -> Vec<LineContext> {
    let (_, _, contexts) = source_lines(text).into_iter().enumerate().fold(
        (PlayState::default(), 0usize, Vec::new()),
        |(state, offset, mut contexts), (idx, line)| {
            let stripped = line.trim();
            let kind = LineKind::classify(stripped);
            let state = state.advance(kind, stripped);

            let byte_end = offset + line.len();
            contexts.push(LineContext {
                line_number: idx + 1,
                byte_start: offset,
                byte_end,
                raw_text: line.to_string(),
                act: state.act.clone(),
                scene: state.scene.clone(),
                speaker: state.speaker.clone(),
                is_dialogue: state.is_dialogue(kind, stripped),
            });
            (state, byte_end + 1, contexts)
        },
    );
    contexts
}

/// First line whose closed range `[byte_start, byte_end]` holds `position`.
pub fn find_context_for_span(contexts: &[LineContext], position: usize) -> Option<&LineContext> {
    // Linear scan is fine for a single play.
    contexts
        .iter()
        .find(|ctx| ctx.byte_start <= position && position <= ctx.byte_end)
}

// ── Span resolution ────────────────────────────────────────────────

/// A located candidate plus the cursor for the next search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanMatch {
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub next_cursor: usize,
}

/// Locate `candidate` at or after `cursor`, falling back to the first
/// occurrence anywhere when the forward search fails.
///
/// The fallback covers extractors that return mentions out of document
/// order; it can pick the wrong occurrence of a repeated phrase.
pub fn find_span_for_text(text: &str, candidate: &str, cursor: usize) -> SpanMatch {
    let candidate = candidate.trim();
    let clamped = cursor.min(text.len());
    let miss = SpanMatch {
        start: None,
        end: None,
        next_cursor: clamped,
    };
    if candidate.is_empty() {
        return miss;
    }

    let forward = text
        .get(clamped..)
        .and_then(|rest| rest.find(candidate))
        .map(|i| i + clamped);
    let found = match forward {
        Some(i) => Some(i),
        None if clamped > 0 => text.find(candidate),
        None => None,
    };

    match found {
        Some(start) => {
            let end = start + candidate.len();
            SpanMatch {
                start: Some(start),
                end: Some(end),
                next_cursor: end,
            }
        }
        None => miss,
    }
}

/// Byte offset of the `char_offset`-th character. The char count itself
/// maps to `text.len()`; anything past it is `None`.
pub fn char_to_byte_offset(text: &str, char_offset: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(char_offset)
}

// ── Sentence window ────────────────────────────────────────────────

fn floor_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Heuristic sentence around a span: from just after the previous
/// `.`/`?`/`!`/newline up to the next one, whitespace collapsed.
pub fn extract_sentence_for_span(
    text: &str,
    span_start: Option<usize>,
    span_end: Option<usize>,
) -> Option<String> {
    let span_start = span_start?;
    if text.is_empty() {
        return None;
    }

    let start = floor_boundary(text, span_start.min(text.len() - 1));
    let end = match span_end {
        Some(e) => floor_boundary(text, e.clamp(start, text.len())),
        None => start,
    };

    let left = text[..start].rfind(SENTENCE_BREAKS).map_or(0, |i| i + 1);
    let right = text[end..]
        .find(SENTENCE_BREAKS)
        .map_or(text.len(), |i| end + i);

    let sentence = text[left..right]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!sentence.is_empty()).then_some(sentence)
}
