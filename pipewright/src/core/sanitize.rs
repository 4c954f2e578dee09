//! Recover bare program text from a model response.

use std::sync::LazyLock;

use regex::Regex;

/// A line consisting only of a fence marker, optionally with a language tag.
static FENCE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[A-Za-z0-9_+.-]*$").expect("fence regex is valid"));

/// An opening fence glued to code on the same line. Only a known language tag is
/// consumed, so `` ```df = ... `` keeps its first token.
static LEADING_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^```(?:(?:python3?|py|sh|bash)\b)?").expect("leading fence regex is valid")
});

const FENCE: &str = "```";

/// Strip fence markers and surrounding whitespace from a model response.
///
/// Fence-only lines are dropped anywhere in the text; a fence glued to the first
/// or last line of code is cut off. Absent or empty input yields an empty
/// string; deciding what an empty candidate means is left to the execution
/// engine. The result is a fixed point: sanitizing it again returns it unchanged.
pub fn sanitize(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };

    let mut text = raw.trim().to_string();
    loop {
        let next = strip_pass(&text);
        if next == text {
            return next;
        }
        text = next;
    }
}

fn strip_pass(text: &str) -> String {
    let joined = text
        .lines()
        .filter(|line| !FENCE_LINE_RE.is_match(line.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    let mut rest = joined.trim();
    if let Some(found) = LEADING_FENCE_RE.find(rest) {
        rest = rest[found.end()..].trim();
    }
    if let Some(stripped) = rest.strip_suffix(FENCE) {
        rest = stripped.trim();
    }
    rest.to_string()
}
