//! Guardrail
//!
//! Sanitizes the interpretation fields attached to a primary article before
//! they are persisted. Enforces the closed enumerations and bans advice
//! vocabulary: the pipeline informs, it never recommends trades.

use serde::{Deserialize, Serialize};

/// Advice vocabulary. A case-insensitive substring hit anywhere in the signal
/// downgrades it.
const ADVICE_WORDS: &[&str] = &[
    "buy",
    "sell",
    "entry point",
    "undervalued",
    "overvalued",
    "load up",
    "invest now",
    "should buy",
    "should sell",
];

const VERDICTS: &[&str] = &["ignore", "aware", "act"];

/// Allowed action phrases. Anything else collapses to "Do nothing".
const ACTIONS: &[&str] = &[
    "Do nothing",
    "Review your position",
    "Set a price alert",
    "Read the full story",
    "Watch for follow-up coverage",
];

const OPPORTUNITY_TYPES: &[&str] = &["none", "behavioral", "awareness", "allocation"];

/// Placeholder inserted when sanitization empties the `why` list.
const NEUTRAL_WHY: &str = "Relevant development for a tracked holding or topic";

/// The interpretation bundle attached to a cluster primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub title: String,
    pub verdict: String,
    pub why: Vec<String>,
    pub action: String,
    pub horizon: String,
    pub opportunity_type: String,
    pub opportunity_note: String,
    pub confidence: i64,
    pub importance_score: i64,
}

fn contains_advice(text: &str) -> bool {
    let lower = text.to_lowercase();
    ADVICE_WORDS.iter().any(|w| lower.contains(w))
}

/// Constrain a signal to the closed enumerations and strip advice language.
///
/// Always returns a valid signal; a violating input is downgraded to
/// `verdict=aware`, `action="Do nothing"`, `opportunity_type=none` rather
/// than rejected.
pub fn sanitize(mut signal: Signal) -> Signal {
    if !VERDICTS.contains(&signal.verdict.as_str()) {
        signal.verdict = "aware".to_string();
    }

    signal.why.truncate(3);

    if !ACTIONS.contains(&signal.action.as_str()) {
        signal.action = "Do nothing".to_string();
    }

    if !OPPORTUNITY_TYPES.contains(&signal.opportunity_type.as_str()) {
        signal.opportunity_type = "none".to_string();
    }

    let advice_hit = contains_advice(&signal.title)
        || contains_advice(&signal.action)
        || contains_advice(&signal.opportunity_note)
        || signal.why.iter().any(|w| contains_advice(w));

    if advice_hit {
        signal.verdict = "aware".to_string();
        signal.action = "Do nothing".to_string();
        signal.opportunity_type = "none".to_string();
        signal.opportunity_note = String::new();
        signal.why.retain(|w| !contains_advice(w));
        if signal.why.is_empty() {
            signal.why.push(NEUTRAL_WHY.to_string());
        }
    }

    signal.confidence = signal.confidence.clamp(0, 100);
    signal.importance_score = signal.importance_score.clamp(0, 100);

    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_signal() -> Signal {
        Signal {
            title: "Chipmaker posts record data center revenue".to_string(),
            verdict: "act".to_string(),
            why: vec!["Earnings beat consensus".to_string()],
            action: "Review your position".to_string(),
            horizon: "days".to_string(),
            opportunity_type: "awareness".to_string(),
            opportunity_note: "Watch the guidance call".to_string(),
            confidence: 80,
            importance_score: 70,
        }
    }

    #[test]
    fn clean_signal_passes_through() {
        let out = sanitize(base_signal());
        assert_eq!(out.verdict, "act");
        assert_eq!(out.action, "Review your position");
        assert_eq!(out.why, vec!["Earnings beat consensus".to_string()]);
    }

    #[test]
    fn unknown_verdict_becomes_aware() {
        let mut signal = base_signal();
        signal.verdict = "panic".to_string();
        assert_eq!(sanitize(signal).verdict, "aware");
    }

    #[test]
    fn unknown_action_becomes_do_nothing() {
        let mut signal = base_signal();
        signal.action = "Rebalance into bonds".to_string();
        assert_eq!(sanitize(signal).action, "Do nothing");
    }

    #[test]
    fn why_is_truncated_to_three() {
        let mut signal = base_signal();
        signal.why = (0..5).map(|i| format!("reason {}", i)).collect();
        assert_eq!(sanitize(signal).why.len(), 3);
    }

    #[test]
    fn advice_in_why_downgrades_and_filters() {
        let mut signal = base_signal();
        signal.why = vec![
            "Buy AAPL now".to_string(),
            "Earnings beat consensus".to_string(),
        ];
        let out = sanitize(signal);
        assert_eq!(out.verdict, "aware");
        assert_eq!(out.action, "Do nothing");
        assert_eq!(out.opportunity_type, "none");
        assert_eq!(out.opportunity_note, "");
        assert_eq!(out.why, vec!["Earnings beat consensus".to_string()]);
    }

    #[test]
    fn all_advice_why_gets_neutral_placeholder() {
        let mut signal = base_signal();
        signal.why = vec!["The stock looks undervalued".to_string()];
        let out = sanitize(signal);
        assert_eq!(out.why, vec![NEUTRAL_WHY.to_string()]);
    }

    #[test]
    fn advice_scan_is_case_insensitive() {
        let mut signal = base_signal();
        signal.opportunity_note = "INVEST NOW before the close".to_string();
        let out = sanitize(signal);
        assert_eq!(out.verdict, "aware");
        assert_eq!(out.opportunity_note, "");
    }

    #[test]
    fn scores_are_clamped() {
        let mut signal = base_signal();
        signal.confidence = 150;
        signal.importance_score = -4;
        let out = sanitize(signal);
        assert_eq!(out.confidence, 100);
        assert_eq!(out.importance_score, 0);
    }

    #[test]
    fn non_aware_verdicts_carry_no_advice_words() {
        // Closure property: anything that survives with verdict != aware is
        // advice-free in every scanned field.
        let mut signal = base_signal();
        signal.verdict = "act".to_string();
        let out = sanitize(signal);
        if out.verdict != "aware" {
            for field in out.why.iter().chain([&out.action, &out.opportunity_note]) {
                assert!(!contains_advice(field), "advice survived in {:?}", field);
            }
        }
    }
}
