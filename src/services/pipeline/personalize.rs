//! Stage 4 - Personalization
//!
//! Scores each classified article against the user's holdings and profile.
//! No text is generated here: only `holding_relevance_score`,
//! `profile_adjusted_score` and the profile tag are written. Matched
//! holdings are recomputed per request and never persisted.

use async_trait::async_trait;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus, Profile};
use crate::models::holding::{Holding, normalize_ticker};
use crate::services::article_store::ArticleUpdate;
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};
use crate::utils::unique_ordered;

/// Intersect an article's mentioned tickers with the user's holdings.
/// Both sides are normalized before comparison; the result keeps the
/// article's mention order, deduplicated.
pub fn matched_holdings(article_tickers: &[String], holdings: &[Holding]) -> Vec<String> {
    let held: Vec<String> = holdings.iter().map(|h| normalize_ticker(&h.ticker)).collect();
    let matched: Vec<String> = article_tickers
        .iter()
        .map(|t| normalize_ticker(t))
        .filter(|t| !t.is_empty() && held.contains(t))
        .collect();
    unique_ordered(matched)
}

/// base + match_bonus + per_match·N when matches exist, capped; base alone
/// otherwise.
pub fn holding_relevance(match_count: usize, thresholds: &Thresholds) -> i64 {
    if match_count == 0 {
        return thresholds.holding_relevance_base;
    }
    let score = thresholds.holding_relevance_base
        + thresholds.holding_relevance_match_bonus
        + thresholds.holding_relevance_per_match * match_count as i64;
    score.min(thresholds.holding_relevance_max)
}

/// Profile-weighted blend of holding relevance and global impact.
pub fn profile_blend(profile: Profile, holding_relevance: f64, impact: f64) -> f64 {
    let blended = match profile {
        Profile::Focus => 1.2 * holding_relevance + 0.3 * impact,
        Profile::Balanced => 0.6 * holding_relevance + 0.4 * impact,
        Profile::Broad => 0.4 * holding_relevance + 0.6 * impact,
    };
    blended.min(100.0)
}

pub struct PersonalizeStage {
    thresholds: Thresholds,
}

impl PersonalizeStage {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl PipelineStage for PersonalizeStage {
    fn name(&self) -> &'static str {
        "personalize"
    }

    fn check_prerequisites(&self, row: Option<&Article>, ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        if row.status_enum().is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }

        match row.status_enum() {
            ArticleStatus::LlmProcessed => {
                if row.impact_score.is_none() {
                    Eligibility::Skip(SkipReason::MissingPrerequisite)
                } else {
                    Eligibility::Eligible
                }
            },
            // A cached score is only valid for the profile that produced it;
            // a different profile forces a recompute.
            ArticleStatus::Personalized | ArticleStatus::Ranked => {
                let cached_matches = row.profile_type_cached.as_deref()
                    == Some(ctx.profile.as_str())
                    && row.profile_adjusted_score.is_some();
                if cached_matches {
                    Eligibility::Skip(SkipReason::AlreadyProcessed)
                } else if row.impact_score.is_none() {
                    Eligibility::Skip(SkipReason::MissingPrerequisite)
                } else {
                    Eligibility::Eligible
                }
            },
            _ => Eligibility::Skip(SkipReason::WrongStatus),
        }
    }

    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());
        let mut updates = Vec::with_capacity(rows.len());

        for row in &rows {
            let impact = row.impact_score.unwrap_or(0);
            let matches = matched_holdings(&row.matched_tickers_list(), &ctx.holdings);
            let relevance = holding_relevance(matches.len(), &self.thresholds);

            let (adjusted, status) = if impact < self.thresholds.stage4_cheap_path_below {
                // Low-impact shortcut: skip the blend, keep the article.
                ((impact as f64 * 0.6).min(100.0), ArticleStatus::Personalized)
            } else {
                let adjusted = profile_blend(ctx.profile, relevance as f64, impact as f64);
                let status = if adjusted >= self.thresholds.stage4_min_score {
                    ArticleStatus::Personalized
                } else {
                    ArticleStatus::Discarded
                };
                (adjusted, status)
            };

            updates.push((
                row.url.clone(),
                ArticleUpdate {
                    status: Some(status),
                    holding_relevance_score: Some(relevance),
                    profile_adjusted_score: Some(adjusted),
                    profile_type_cached: Some(ctx.profile.as_str().to_string()),
                    ..ArticleUpdate::default()
                },
            ));
            outcomes.push(StageOutcome::advanced(&row.url, status));
        }

        ctx.store.apply_updates(&updates).await?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn holding(ticker: &str) -> Holding {
        Holding {
            id: 1,
            user_id: 1,
            ticker: ticker.to_string(),
            label: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn matched_holdings_normalizes_both_sides() {
        let holdings = vec![holding("brk.b"), holding("AAPL")];
        let tickers = vec!["BRK-B".to_string(), "aapl".to_string(), "TSLA".to_string()];
        assert_eq!(
            matched_holdings(&tickers, &holdings),
            vec!["BRK-B".to_string(), "AAPL".to_string()]
        );
    }

    #[test]
    fn matched_holdings_dedupes() {
        let holdings = vec![holding("AAPL")];
        let tickers = vec!["AAPL".to_string(), "aapl".to_string()];
        assert_eq!(matched_holdings(&tickers, &holdings), vec!["AAPL".to_string()]);
    }

    #[test]
    fn holding_relevance_formula() {
        let t = Thresholds::default();
        assert_eq!(holding_relevance(0, &t), 20);
        assert_eq!(holding_relevance(1, &t), 35);
        assert_eq!(holding_relevance(2, &t), 40);
        assert_eq!(holding_relevance(3, &t), 45);
        assert_eq!(holding_relevance(10, &t), 45, "capped at max");
    }

    #[test]
    fn profile_blends() {
        // hr 35, impact 50
        assert_eq!(profile_blend(Profile::Focus, 35.0, 50.0), 57.0);
        assert_eq!(profile_blend(Profile::Balanced, 35.0, 50.0), 41.0);
        assert_eq!(profile_blend(Profile::Broad, 35.0, 50.0), 44.0);
    }

    #[test]
    fn blend_caps_at_hundred() {
        assert_eq!(profile_blend(Profile::Focus, 100.0, 100.0), 100.0);
    }
}
