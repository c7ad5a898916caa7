use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::Result;

static RE_DRAMATIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^dramatis person").unwrap());
static RE_PROLOGUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:the\s+)?prologue\b").unwrap());
static RE_ACT_I: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^act\s+i\b").unwrap());

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Download the raw ebook text.
pub fn fetch_text(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()?;
    Ok(client.get(url).send()?.error_for_status()?.text()?)
}

/// Cut everything up to the start of the play proper.
///
/// Gutenberg plays open with a contents list that repeats every act
/// heading, so the first `ACT I` is usually not the play.
pub fn trim_play_front_matter(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return text.to_string();
    }

    let mut starts = Vec::new();
    let mut prologues = Vec::new();
    let mut act_ones = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if RE_PROLOGUE.is_match(stripped) {
            prologues.push(i);
            starts.push(i);
        } else if RE_ACT_I.is_match(stripped) {
            act_ones.push(i);
            starts.push(i);
        }
    }

    let Some(&first) = starts.first() else {
        return text.trim().to_string();
    };

    let join_from = |idx: usize| lines[idx..].join("\n").trim().to_string();

    let dramatis = lines.iter().position(|l| RE_DRAMATIS.is_match(l.trim()));
    if let Some(d) = dramatis
        && let Some(&after) = starts.iter().find(|&&i| i > d)
    {
        return join_from(after);
    }

    if let Some(&second_act_one) = act_ones.get(1) {
        let start = prologues
            .iter()
            .copied()
            .filter(|&i| i < second_act_one)
            .max()
            .unwrap_or(second_act_one);
        return join_from(start);
    }

    join_from(first)
}

/// Keep the text between the `*** START OF` and `*** END OF` markers,
/// then trim front matter. Text without both markers is returned as is.
pub fn strip_gutenberg_header_footer(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| l.starts_with("*** START OF")).map(|i| i + 1);
    let end = lines.iter().position(|l| l.starts_with("*** END OF"));

    match (start, end) {
        (Some(s), Some(e)) if s < e => trim_play_front_matter(lines[s..e].join("\n").trim()),
        _ => text.to_string(),
    }
}
