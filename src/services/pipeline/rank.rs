//! Stage 5 - Ranking & Clustering
//!
//! Operates over the store rather than per article: groups near-duplicate
//! personalized articles into clusters, picks a primary per cluster, assigns
//! the final rank, and attaches a guardrail-sanitized signal to the primary.

use serde::Serialize;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus};
use crate::services::article_store::{ArticleStore, ArticleUpdate};
use crate::services::pipeline::guardrail::{Signal, sanitize};
use crate::utils::group_by;

/// Word-level Jaccard similarity over lowercased words longer than 3 chars.
pub fn title_jaccard(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> std::collections::HashSet<String> {
        s.to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| w.to_string())
            .collect()
    };
    let wa = words(a);
    let wb = words(b);
    if wa.is_empty() && wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    intersection / union
}

/// Two personalized articles are similar when they share an event type with
/// at least one overlapping ticker, or when their titles are near-identical.
pub fn articles_similar(a: &Article, b: &Article) -> bool {
    let same_event = a.event_type.is_some() && a.event_type == b.event_type;
    if same_event {
        let tickers_a = a.matched_tickers_list();
        let overlap = b.matched_tickers_list().iter().any(|t| tickers_a.contains(t));
        if overlap {
            return true;
        }
    }
    title_jaccard(&a.title, &b.title) > 0.7
}

/// Deterministic cluster id from the primary's title: lowercased,
/// non-alphanumerics stripped, first 50 chars, MD5, first 8 hex chars.
pub fn cluster_id_for(title: &str) -> String {
    let normalized: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(50)
        .collect();
    let digest = md5::compute(normalized.as_bytes());
    format!("cluster_{}", &format!("{:x}", digest)[..8])
}

/// Greedy single-pass grouping within (event_type, lead ticker) partitions.
/// Input order is the ranking order, so each cluster's first member is its
/// best-scored candidate.
pub fn form_clusters(articles: Vec<Article>) -> Vec<Vec<Article>> {
    let partitions = group_by(articles, |a| {
        (
            a.event_type.clone().unwrap_or_else(|| "other".to_string()),
            a.matched_tickers_list()
                .first()
                .cloned()
                .unwrap_or_else(|| "none".to_string()),
        )
    });

    let mut clusters: Vec<Vec<Article>> = Vec::new();
    for (_, partition) in partitions {
        let mut partition_clusters: Vec<Vec<Article>> = Vec::new();
        for article in partition {
            match partition_clusters
                .iter_mut()
                .find(|cluster| articles_similar(&cluster[0], &article))
            {
                Some(cluster) => cluster.push(article),
                None => partition_clusters.push(vec![article]),
            }
        }
        clusters.extend(partition_clusters);
    }
    clusters
}

/// `round(0.6 · profile_adjusted + 0.4 · impact)`, clamped to [0, 100].
pub fn final_rank_score(profile_adjusted: f64, impact: i64) -> i64 {
    let score = (0.6 * profile_adjusted + 0.4 * impact as f64).round() as i64;
    score.clamp(0, 100)
}

/// Build the primary's signal from its interpretation fields where present,
/// deriving neutral entries from the Stage 3 scores otherwise. The result
/// always passes through the guardrail before persisting.
fn synthesize_signal(primary: &Article, final_rank: i64) -> Signal {
    let impact = primary.impact_score.unwrap_or(0);

    let verdict = primary
        .verdict
        .clone()
        .unwrap_or_else(|| if impact >= 60 { "aware" } else { "ignore" }.to_string());

    let mut why = primary.why_list();
    if why.is_empty() {
        if let Some(event) = &primary.event_type {
            why.push(format!("{} coverage with impact {}", event, impact));
        }
        if let Some(label) = &primary.sentiment_label {
            why.push(format!("Tone of coverage is {}", label));
        }
        let tickers = primary.matched_tickers_list();
        if !tickers.is_empty() {
            why.push(format!("Mentions {}", tickers.join(", ")));
        }
    }

    let action = primary.action.clone().unwrap_or_else(|| {
        if impact >= 70 { "Read the full story" } else { "Do nothing" }.to_string()
    });

    let horizon = primary.horizon.clone().unwrap_or_else(|| {
        match primary.event_type.as_deref() {
            Some("earnings") | Some("guidance") => "days",
            Some("m&a") | Some("regulation") => "weeks",
            Some("macro") | Some("industry_trend") => "months",
            _ => "days",
        }
        .to_string()
    });

    let opportunity = primary.opportunity_score.unwrap_or(0);
    let opportunity_type = primary
        .opportunity_type
        .clone()
        .unwrap_or_else(|| if opportunity >= 60 { "awareness" } else { "none" }.to_string());
    let opportunity_note = primary.opportunity_note.clone().unwrap_or_else(|| {
        if opportunity >= 60 {
            "Coverage carries an elevated opportunity score".to_string()
        } else {
            String::new()
        }
    });

    Signal {
        title: primary.title.clone(),
        verdict,
        why,
        action,
        horizon,
        opportunity_type,
        opportunity_note,
        confidence: primary.confidence.unwrap_or(impact),
        importance_score: final_rank,
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RankingReport {
    pub input: usize,
    pub clusters: usize,
    pub ranked: usize,
    pub shown: usize,
    pub failed: usize,
}

pub struct RankingStage {
    thresholds: Thresholds,
}

impl RankingStage {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Rank everything currently personalized. `cutoff` overrides the
    /// configured shown-to-user threshold; `limit` bounds the run to the
    /// best-scored rows.
    pub async fn run(
        &self,
        store: &ArticleStore,
        cutoff: Option<i64>,
        limit: Option<i64>,
    ) -> anyhow::Result<RankingReport> {
        let cutoff = cutoff.unwrap_or(self.thresholds.rank_cutoff_score);
        let mut articles = store.list_personalized_ordered().await?;
        if let Some(limit) = limit {
            articles.truncate(limit.max(0) as usize);
        }

        let mut report = RankingReport { input: articles.len(), ..RankingReport::default() };
        if articles.is_empty() {
            return Ok(report);
        }

        let clusters = form_clusters(articles);
        report.clusters = clusters.len();

        for cluster in clusters {
            // One cluster failing must not abort the rest of the run.
            match self.rank_cluster(store, &cluster, cutoff).await {
                Ok(shown) => {
                    report.ranked += cluster.len();
                    if shown {
                        report.shown += 1;
                    }
                },
                Err(e) => {
                    tracing::error!("Ranking a cluster of {} articles failed: {}", cluster.len(), e);
                    report.failed += cluster.len();
                },
            }
        }

        Ok(report)
    }

    /// Persist one cluster; returns whether the primary was shown.
    async fn rank_cluster(
        &self,
        store: &ArticleStore,
        cluster: &[Article],
        cutoff: i64,
    ) -> anyhow::Result<bool> {
        let Some(primary) = cluster.iter().max_by(|a, b| {
            let sa = a.profile_adjusted_score.unwrap_or(0.0);
            let sb = b.profile_adjusted_score.unwrap_or(0.0);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return Ok(false);
        };

        let cluster_id = cluster_id_for(&primary.title);
        let rank = final_rank_score(
            primary.profile_adjusted_score.unwrap_or(0.0),
            primary.impact_score.unwrap_or(0),
        );
        let shown = rank >= cutoff;

        let signal = sanitize(synthesize_signal(primary, rank));

        let mut updates = Vec::with_capacity(cluster.len());
        for member in cluster {
            let is_primary = member.id == primary.id;
            let mut update = ArticleUpdate {
                status: Some(ArticleStatus::Ranked),
                cluster_id: Some(cluster_id.clone()),
                is_primary_in_cluster: Some(is_primary),
                final_rank_score: Some(rank),
                importance_score: Some(signal.importance_score),
                processing_completed_at: Some(chrono::Utc::now()),
                ..ArticleUpdate::default()
            };

            if is_primary {
                update.verdict = Some(signal.verdict.clone());
                update.why_json = Some(
                    serde_json::to_string(&signal.why).unwrap_or_else(|_| "[]".to_string()),
                );
                update.action = Some(signal.action.clone());
                update.horizon = Some(signal.horizon.clone());
                update.opportunity_type = Some(signal.opportunity_type.clone());
                update.opportunity_note = Some(signal.opportunity_note.clone());
                update.confidence = Some(signal.confidence);
                if shown {
                    update.shown_to_user = Some(true);
                    update.shown_timestamp = Some(chrono::Utc::now());
                }
            }

            updates.push((member.url.clone(), update));
        }

        store.apply_updates(&updates).await?;
        Ok(shown)
    }
}
