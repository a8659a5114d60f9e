//! Deterministic text signals computed without any model call: spam score,
//! repetition flag, threat score, plus the shared normalization and hashing
//! helpers the rest of the pipeline leans on.
//!
//! These run on every message (including pre-submission checks), so they must
//! stay cheap and side-effect free. All regexes are `regex`-crate compatible
//! (no lookarounds, no backreferences); near-duplicate detection uses
//! `strsim::normalized_levenshtein` instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use strsim::normalized_levenshtein;

/// Per-pattern-group contribution cap for the spam score.
const SPAM_GROUP_CAP: f32 = 0.2;
/// Contribution of a single pattern hit within a group.
const SPAM_HIT_WEIGHT: f32 = 0.1;
/// Weight of each distinct threat lexicon hit.
const THREAT_HIT_WEIGHT: f32 = 0.3;
/// Two sentences at least this similar count as a repeated phrase.
const REPEATED_PHRASE_SIMILARITY: f64 = 0.9;

/// Output of the local extractors for one message body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    /// Pattern-based spam likelihood in [0.0, 1.0].
    pub spam_score: f32,
    /// True when one word dominates a short message (copy-paste flooding).
    pub is_repetitive: bool,
    /// Weighted threat keyword accumulation; unbounded, consumers clamp.
    pub threat_score: f32,
}

static PROMO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(buy now|limited[- ]time|act now|act fast|click here|click the link|free (?:money|gift|trial|followers)|promo code|discount code|special offer|100% free)\b",
    )
    .expect("promo regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>()]+").expect("url regex"));

static LURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(dm me|message me|check (?:out )?my (?:profile|page|bio|link)|follow me|add me on|cash ?app|venmo|paypal\.me|onlyfans|telegram @?\w+)\b",
    )
    .expect("lure regex")
});

static PRIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(you (?:have |'ve )?won|winner|prize|jackpot|lottery|giveaway|claim your|earn \$?\d+|make money fast|get rich)\b",
    )
    .expect("prize regex")
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

/// Single words associated with violence or weapons. Matched per token by
/// stem so "killing" and "stabbed" still count.
const VIOLENCE_STEMS: &[&str] = &[
    "kill", "murder", "stab", "shoot", "gun", "knife", "knive", "weapon", "bomb", "attack",
    "strangle", "slaughter", "massacre",
];

/// Multi-word threat or retaliation phrases, matched on the normalized body.
const THREAT_PHRASES: &[&str] = &[
    "you'll regret",
    "you will regret",
    "watch your back",
    "i know where you live",
    "i know where you work",
    "going to get you",
    "gonna get you",
    "make you pay",
    "come for you",
    "coming for you",
    "you're dead",
    "you are dead",
    "i'll find you",
    "i will find you",
    "hurt you",
    "beat you",
];

/// Run every local extractor over one body.
pub fn extract(text: &str) -> SignalReport {
    let normalized = normalize(text);
    SignalReport {
        spam_score: spam_score(&normalized),
        is_repetitive: is_repetitive(&normalized),
        threat_score: threat_score(&normalized),
    }
}

/// HTML-decode, strip tags, and collapse whitespace. All extractors and
/// prompts operate on this form so entity tricks don't slip past patterns.
pub fn normalize(text: &str) -> String {
    let decoded = html_escape::decode_html_entities(text);
    let stripped = TAG_RE.replace_all(&decoded, " ");
    WHITESPACE_RE.replace_all(stripped.trim(), " ").to_string()
}

/// Pattern-based spam score. Each pattern group contributes up to 0.2
/// (0.1 per hit), repeated-phrase detection adds a flat 0.2, and the total
/// is capped at 1.0.
pub fn spam_score(text: &str) -> f32 {
    let mut score = group_score(&PROMO_RE, text)
        + group_score(&URL_RE, text)
        + group_score(&LURE_RE, text)
        + group_score(&PRIZE_RE, text);
    if has_repeated_phrase(text) {
        score += SPAM_GROUP_CAP;
    }
    score.min(1.0)
}

fn group_score(re: &Regex, text: &str) -> f32 {
    let hits = re.find_iter(text).count();
    (hits as f32 * SPAM_HIT_WEIGHT).min(SPAM_GROUP_CAP)
}

/// True when any two sentences in the body are near-identical.
fn has_repeated_phrase(text: &str) -> bool {
    let sentences: Vec<String> = text
        .split(['.', '!', '?', '\n'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| s.chars().count() >= 12)
        .collect();
    for (i, a) in sentences.iter().enumerate() {
        for b in sentences.iter().skip(i + 1) {
            if normalized_levenshtein(a, b) >= REPEATED_PHRASE_SIMILARITY {
                return true;
            }
        }
    }
    false
}

/// Copy-paste flooding check: the most frequent word longer than 3 chars
/// appears more than 10 times AND the whole body has fewer than 50 tokens.
pub fn is_repetitive(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let total = tokens.len();
    if total == 0 || total >= 50 {
        return false;
    }
    let mut freq: HashMap<String, u32> = HashMap::new();
    for token in tokens {
        let word: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        if word.chars().count() > 3 {
            *freq.entry(word).or_insert(0) += 1;
        }
    }
    freq.values().copied().max().unwrap_or(0) > 10
}

/// Weighted threat keyword accumulation. Each distinct lexicon entry that
/// matches contributes 0.3; the sum is intentionally unbounded and clamped
/// by the moderation formula where it is consumed.
pub fn threat_score(text: &str) -> f32 {
    let lowered = text.to_lowercase();
    let tokens: Vec<String> = lowered
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect())
        .collect();

    let mut hits = 0u32;
    for stem in VIOLENCE_STEMS {
        if tokens.iter().any(|t| token_matches_stem(t, stem)) {
            hits += 1;
        }
    }
    for phrase in THREAT_PHRASES {
        if lowered.contains(phrase) {
            hits += 1;
        }
    }
    hits as f32 * THREAT_HIT_WEIGHT
}

fn token_matches_stem(token: &str, stem: &str) -> bool {
    if stem.chars().count() >= 4 {
        token.starts_with(stem)
    } else {
        token == stem
    }
}

/// Cheap question heuristic used when the categorization model is
/// unavailable.
pub fn looks_like_question(text: &str) -> bool {
    text.trim_end().ends_with('?')
}

/// Short stable digest of a body for logs. Raw anonymous-message text never
/// goes to the log stream, only this.
pub fn anon_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_decodes_entities_and_strips_tags() {
        let raw = "hello&nbsp;<b>world</b>\n\n  &amp; friends";
        assert_eq!(normalize(raw), "hello world & friends");
    }

    #[test]
    fn benign_text_scores_near_zero() {
        let report = extract("I really appreciated your last post, it helped me a lot.");
        assert_eq!(report.spam_score, 0.0);
        assert_eq!(report.threat_score, 0.0);
        assert!(!report.is_repetitive);
    }

    #[test]
    fn promo_and_url_patterns_accumulate() {
        let s = spam_score("Buy now! Limited time offer, click here: https://spam.example/x");
        // promo group capped at 0.2 plus one url hit
        assert!(s >= 0.3, "got {s}");
        assert!(s <= 1.0);
    }

    #[test]
    fn spam_score_caps_at_one() {
        let noisy = "buy now click here free money promo code special offer \
                     https://a.example www.b.example dm me follow me cash app \
                     you have won winner prize jackpot lottery giveaway claim your";
        assert!(spam_score(noisy) <= 1.0);
    }

    #[test]
    fn repeated_sentences_count_as_spam_pattern() {
        let body = "Check out this amazing deal today. Check out this amazing deal today.";
        assert!(spam_score(body) >= 0.2);
    }

    fn distinct_filler(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("word{i}")).collect()
    }

    #[test]
    fn repetition_needs_eleven_hits_in_short_body() {
        // 11 hits of one long word inside a < 50 token body
        let mut words = vec!["spam".to_string(); 11];
        words.extend(distinct_filler(20));
        assert!(is_repetitive(&words.join(" ")));

        // 9 hits is below the flood threshold
        let mut words = vec!["spam".to_string(); 9];
        words.extend(distinct_filler(20));
        assert!(!is_repetitive(&words.join(" ")));
    }

    #[test]
    fn repetition_ignores_long_bodies_and_short_words() {
        // 12 hits but 60 tokens total: long enough to be a real message
        let mut words = vec!["spam".to_string(); 12];
        words.extend(distinct_filler(48));
        assert!(!is_repetitive(&words.join(" ")));

        // "so" is <= 3 chars and never counted
        assert!(!is_repetitive(&vec!["so"; 20].join(" ")));
    }

    #[test]
    fn threat_hits_weigh_point_three_each() {
        assert_eq!(threat_score("I will kill you"), 0.3);
        let double = threat_score("I will kill you, watch your back");
        assert!((double - 0.6).abs() < 1e-6, "got {double}");
        assert_eq!(threat_score("have a lovely day"), 0.0);
    }

    #[test]
    fn threat_stems_match_inflections() {
        assert!(threat_score("stop killing my vibe? no: killing threats count") > 0.0);
        assert!(threat_score("he was stabbed in the back metaphorically") > 0.0);
    }

    #[test]
    fn question_heuristic_checks_trailing_mark() {
        assert!(looks_like_question("when is the next drop?"));
        assert!(looks_like_question("really?  "));
        assert!(!looks_like_question("no questions here."));
    }

    #[test]
    fn anon_hash_is_stable_and_short() {
        assert_eq!(anon_hash("abc"), anon_hash("abc"));
        assert_ne!(anon_hash("abc"), anon_hash("abd"));
        assert_eq!(anon_hash("abc").len(), 12);
    }
}
