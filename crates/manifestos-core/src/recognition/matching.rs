//! Lenient keyword matching between required keywords and recognized labels.
//!
//! Recognition labels rarely equal the words a user typed ("书" vs "书本",
//! "desk" vs "desk lamp"), so a required keyword matches a label when any of
//! these hold:
//!
//! - one contains the other,
//! - they share a two-character window,
//! - the keyword is at most two characters and shares any character,
//! - after stripping descriptive modifiers and splitting on separators, two
//!   words satisfy one of the rules above.
//!
//! Comparison is case-insensitive and works on characters, not bytes.

use serde::{Deserialize, Serialize};

/// Descriptive words dropped before word-level comparison.
const MODIFIERS: &[&str] = &[
    "干净的", "清爽的", "整齐的", "关掉的", "打开的", "漂亮的", "好看的", "新的", "旧的", "clean ",
    "tidy ", "new ", "old ",
];

/// Outcome of matching one evidence submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub recognized: Vec<String>,
    /// matched / required, 0.0 when nothing is required.
    pub match_rate: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordMatcher {
    threshold: f64,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl KeywordMatcher {
    /// `threshold` is clamped to 0.0..=1.0.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            0.2
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Match required keywords against recognized labels.
    ///
    /// Passing needs at least one matched keyword and a match rate of at
    /// least the threshold. No labels never passes.
    pub fn evaluate(&self, required: &[String], recognized: &[String]) -> MatchReport {
        let required: Vec<&String> = required.iter().filter(|k| !k.trim().is_empty()).collect();
        let (matched, unmatched): (Vec<&String>, Vec<&String>) = required
            .iter()
            .partition(|keyword| recognized.iter().any(|label| is_match(keyword, label)));

        let match_rate = if required.is_empty() {
            0.0
        } else {
            matched.len() as f64 / required.len() as f64
        };
        let passed = !recognized.is_empty() && !matched.is_empty() && match_rate >= self.threshold;

        MatchReport {
            matched: matched.into_iter().cloned().collect(),
            unmatched: unmatched.into_iter().cloned().collect(),
            recognized: recognized.to_vec(),
            match_rate,
            passed,
        }
    }
}

/// Whether a required keyword matches one recognized label.
pub fn is_match(required: &str, recognized: &str) -> bool {
    let req = required.trim().to_lowercase();
    let rec = recognized.trim().to_lowercase();
    if req.is_empty() || rec.is_empty() {
        return false;
    }
    if loose_match(&req, &rec) {
        return true;
    }
    if req.chars().count() <= 2 && req.chars().any(|c| !c.is_whitespace() && rec.contains(c)) {
        return true;
    }

    let req_words = words(&req);
    let rec_words = words(&rec);
    req_words
        .iter()
        .any(|r| rec_words.iter().any(|w| loose_match(r, w)))
}

/// Containment either way, or a shared two-character window.
fn loose_match(a: &str, b: &str) -> bool {
    if a.contains(b) || b.contains(a) {
        return true;
    }
    let chars: Vec<char> = a.chars().collect();
    chars
        .windows(2)
        .filter(|pair| !pair.iter().any(|c| c.is_whitespace()))
        .any(|pair| b.contains(&pair.iter().collect::<String>()))
}

fn words(text: &str) -> Vec<String> {
    let mut cleaned = text.to_string();
    for modifier in MODIFIERS {
        cleaned = cleaned.replace(modifier, " ");
    }
    cleaned
        .split(|c: char| c == '、' || c == '，' || c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn containment_matches_both_ways() {
        assert!(is_match("书", "书本"));
        assert!(is_match("running shoes", "shoes"));
        assert!(is_match("Desk", "desk lamp"));
    }

    #[test]
    fn shared_window_matches() {
        assert!(is_match("笔记本电脑", "电脑屏幕"));
        assert!(!is_match("keyboard", "mouse"));
    }

    #[test]
    fn short_keyword_matches_single_character() {
        assert!(is_match("牙刷", "牙膏"));
        assert!(!is_match("牙刷", "毛巾"));
    }

    #[test]
    fn modifiers_are_stripped() {
        assert!(is_match("干净的桌面", "桌面"));
        assert!(is_match("clean desk", "desk"));
    }

    #[test]
    fn one_match_passes_at_default_threshold() {
        let matcher = KeywordMatcher::default();
        let report = matcher.evaluate(&strings(&["书", "台灯", "咖啡"]), &strings(&["书本", "文具"]));
        assert!(report.passed);
        assert_eq!(report.matched, strings(&["书"]));
        assert_eq!(report.unmatched, strings(&["台灯", "咖啡"]));
        assert!((report.match_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn strict_threshold_needs_more_matches() {
        let matcher = KeywordMatcher::new(0.5);
        let report = matcher.evaluate(&strings(&["书", "台灯", "咖啡"]), &strings(&["书本"]));
        assert!(!report.passed);
    }

    #[test]
    fn nothing_recognized_never_passes() {
        let report = KeywordMatcher::new(0.0).evaluate(&strings(&["书"]), &[]);
        assert!(!report.passed);
        assert_eq!(report.unmatched, strings(&["书"]));
    }
}
