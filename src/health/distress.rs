use once_cell::sync::Lazy;
use regex::Regex;

use crate::ansi;

/// How worried the managed process sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Distress {
    None,
    /// Approaching a limit; keep going but expect trouble
    Warning,
    /// A hard limit was reached
    Critical,
}

static RE_CRITICAL: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?mi)(limit\s+reached|reached\s+(the\s+|your\s+)?(\w+\s+)?limit|context\s+(window\s+)?(is\s+)?full\b|prompt\s+is\s+too\s+long|out\s+of\s+context)",
    )
    .ok()
});

static RE_WARNING: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?mi)(approaching\s+(the\s+|your\s+)?(\w+\s+)?limit|(context|conversation)\s+(window\s+)?(is\s+)?getting\s+(long|full)|context\s+left\s+until\s+auto-compact)",
    )
    .ok()
});

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Scan the tail of captured output for distress markers.
pub fn detect(content: &str) -> Distress {
    // Only the most recent screenful matters
    let lines: Vec<&str> = content.lines().rev().take(20).collect();
    let recent = ansi::strip(&lines.into_iter().rev().collect::<Vec<_>>().join("\n"));

    if matches(&RE_CRITICAL, &recent) {
        return Distress::Critical;
    }
    if matches(&RE_WARNING, &recent) {
        return Distress::Warning;
    }
    Distress::None
}
