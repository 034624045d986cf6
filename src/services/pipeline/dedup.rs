//! Deduplicator
//!
//! Runs after content fetch, before classification. Candidates come from one
//! indexed scan (same canonical URL, same domain within the recency window,
//! or same title bucket); comparison short-circuits in priority order:
//! normalized URL, canonical URL, then fingerprint distance.

use async_trait::async_trait;

use crate::config::Thresholds;
use crate::models::article::{Article, ArticleStatus};
use crate::services::article_store::ArticleUpdate;
use crate::services::pipeline::fingerprint::hamming_distance;
use crate::services::pipeline::stage::{
    Eligibility, PipelineStage, SkipReason, StageContext, StageOutcome,
};

/// Bucket key for coarse title identity: the first three lowercased words,
/// joined by `_`. Punctuation collapses to whitespace before splitting, so
/// "Fed, holds rates" and "Fed holds rates" share a bucket.
pub fn title_hash_bucket(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join("_")
}

/// Find the first candidate the article duplicates, in priority order.
pub fn find_duplicate<'a>(
    article: &Article,
    candidates: &'a [Article],
    hamming_threshold: u32,
) -> Option<&'a Article> {
    if let Some(normalized) = &article.normalized_url {
        if let Some(hit) = candidates
            .iter()
            .find(|c| c.normalized_url.as_ref() == Some(normalized))
        {
            return Some(hit);
        }
    }

    if let Some(canonical) = &article.canonical_url {
        if let Some(hit) = candidates
            .iter()
            .find(|c| c.canonical_url.as_ref() == Some(canonical))
        {
            return Some(hit);
        }
    }

    candidates.iter().find(|c| {
        hamming_distance(
            article.content_fingerprint.as_deref(),
            c.content_fingerprint.as_deref(),
        ) <= hamming_threshold
    })
}

pub struct DedupStage {
    thresholds: Thresholds,
}

impl DedupStage {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl PipelineStage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn check_prerequisites(&self, row: Option<&Article>, _ctx: &StageContext) -> Eligibility {
        let Some(row) = row else {
            return Eligibility::Skip(SkipReason::NotFound);
        };
        if row.status_enum().is_terminal() {
            return Eligibility::Skip(SkipReason::Terminal);
        }
        if row.status_enum() != ArticleStatus::ContentFetched {
            return Eligibility::Skip(SkipReason::WrongStatus);
        }
        Eligibility::Eligible
    }

    async fn process_batch(
        &self,
        rows: Vec<Article>,
        ctx: &StageContext,
    ) -> anyhow::Result<Vec<StageOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());

        for row in rows {
            let candidates = ctx
                .store
                .dedup_candidates(
                    &row,
                    self.thresholds.dedup_recency_hours,
                    self.thresholds.dedup_candidate_limit,
                )
                .await?;

            match find_duplicate(&row, &candidates, self.thresholds.dedup_hamming_threshold) {
                Some(original) => {
                    tracing::debug!(
                        "Article {} is a duplicate of article {} ({})",
                        row.url,
                        original.id,
                        original.url
                    );
                    ctx.store
                        .apply_update(
                            &row.url,
                            &ArticleUpdate {
                                status: Some(ArticleStatus::Duplicate),
                                is_duplicate_of_article_id: Some(original.id),
                                ..ArticleUpdate::default()
                            },
                        )
                        .await?;
                    outcomes.push(StageOutcome::advanced(&row.url, ArticleStatus::Duplicate));
                },
                None => {
                    outcomes.push(StageOutcome::advanced(&row.url, ArticleStatus::ContentFetched));
                },
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::article::test_article;

    #[test]
    fn bucket_uses_first_three_words() {
        assert_eq!(title_hash_bucket("Fed holds rates steady again"), "fed_holds_rates");
        assert_eq!(title_hash_bucket("Fed, holds; rates!"), "fed_holds_rates");
        assert_eq!(title_hash_bucket("One two"), "one_two");
        assert_eq!(title_hash_bucket(""), "");
    }

    fn fetched(url: &str, id: i64) -> Article {
        let mut a = test_article(url, "Some headline for dedup tests");
        a.id = id;
        a.status = "content_fetched".to_string();
        a
    }

    #[test]
    fn normalized_url_match_wins_first() {
        let mut article = fetched("https://site.com/x", 1);
        article.normalized_url = Some("https://site.com/x".to_string());
        article.content_fingerprint = Some("00000000000000ff".to_string());

        let mut by_url = fetched("https://www.site.com/x/", 2);
        by_url.normalized_url = Some("https://site.com/x".to_string());
        let mut by_fp = fetched("https://other.com/y", 3);
        by_fp.content_fingerprint = Some("00000000000000ff".to_string());

        let candidates = vec![by_fp, by_url];
        let hit = find_duplicate(&article, &candidates, 3).unwrap();
        assert_eq!(hit.id, 2);
    }

    #[test]
    fn canonical_match_beats_fingerprint() {
        let mut article = fetched("https://a.com/1", 1);
        article.canonical_url = Some("https://origin.com/story".to_string());
        article.content_fingerprint = Some("0000000000000000".to_string());

        let mut by_canonical = fetched("https://b.com/2", 2);
        by_canonical.canonical_url = Some("https://origin.com/story".to_string());
        let mut by_fp = fetched("https://c.com/3", 3);
        by_fp.content_fingerprint = Some("0000000000000000".to_string());

        let candidates = vec![by_fp, by_canonical];
        assert_eq!(find_duplicate(&article, &candidates, 3).unwrap().id, 2);
    }

    #[test]
    fn fingerprint_within_threshold_matches() {
        let mut article = fetched("https://a.com/1", 1);
        article.content_fingerprint = Some("0000000000000000".to_string());

        let mut near = fetched("https://b.com/2", 2);
        near.content_fingerprint = Some("0000000000000007".to_string()); // distance 3
        assert_eq!(find_duplicate(&article, &[near], 3).unwrap().id, 2);

        let mut far = fetched("https://b.com/2", 2);
        far.content_fingerprint = Some("000000000000000f".to_string()); // distance 4
        assert!(find_duplicate(&article, &[far], 3).is_none());
    }

    #[test]
    fn empty_candidate_set_is_no_duplicate() {
        let article = fetched("https://a.com/1", 1);
        assert!(find_duplicate(&article, &[], 3).is_none());
    }
}
