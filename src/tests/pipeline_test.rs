// End-to-end pipeline scenarios over an in-memory store with scripted
// LLM and fetcher doubles.

use serde_json::json;
use std::sync::Arc;

use super::common::{
    MapFetcher, ScriptedLlm, article_html, create_test_db, raw_article, seed_holding,
    test_pipeline,
};
use crate::models::article::{ArticleStatus, Profile};
use crate::services::article_store::{ArticleStore, ArticleUpdate};
use crate::services::holding_service::HoldingService;

fn triage_entry(relevance: i64, event: &str, tickers: &[&str], fetch: bool) -> serde_json::Value {
    json!({
        "title_relevance": relevance,
        "title_event_type": event,
        "title_reason_short": "scripted triage",
        "title_ticker_matches": tickers,
        "title_sector_matches": [],
        "should_fetch_full": fetch,
    })
}

#[tokio::test]
async fn generic_pattern_is_discarded_without_llm() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    store
        .insert(&{
            let mut a = raw_article("https://site/a", "Morning Brief — Markets Today", "NVDA");
            a.source_name = Some("CNBC".to_string());
            a
        })
        .await
        .expect("insert");

    let llm = ScriptedLlm::empty();
    let pipeline = test_pipeline(&pool, llm.clone(), MapFetcher::new().into_arc());

    let report = pipeline
        .process_batch(vec!["https://site/a".to_string()], vec![], Profile::Balanced)
        .await;

    let row = store.get_by_url("https://site/a").await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::Discarded);
    assert_eq!(row.title_relevance, Some(0));
    assert_eq!(row.title_reason_short.as_deref(), Some("morning_brief"));
    assert_eq!(row.should_fetch_full, Some(false));
    assert!(row.likely_impact.is_none(), "no stage past 1 may run");
    assert_eq!(llm.remaining(), 0);

    // Every later stage must skip the terminal row.
    for stage_report in &report.stages[1..] {
        assert_eq!(stage_report.processed, 0, "stage {} ran", stage_report.stage);
    }
}

#[tokio::test]
async fn cost_gate_thresholds_split_holdings_and_macro() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    store
        .insert(&raw_article("https://x/1", "Apple logo update on website", "AAPL"))
        .await
        .expect("insert");
    store
        .insert(&raw_article("https://x/2", "Quiet macro week for quiet markets", "MACRO"))
        .await
        .expect("insert");

    let llm = ScriptedLlm::new(vec![
        json!({
            "https://x/1": triage_entry(1, "product_tech", &[], true),
            "https://x/2": triage_entry(1, "product_tech", &[], true),
        })
        .to_string(),
    ]);
    let pipeline = test_pipeline(&pool, llm.clone(), MapFetcher::new().into_arc());

    pipeline
        .process_batch(
            vec!["https://x/1".to_string(), "https://x/2".to_string()],
            vec![],
            Profile::Balanced,
        )
        .await;

    // 1*10 + 0 (product_tech is not a high-impact tag) + 0 + 0 = 10
    let holdings_row = store.get_by_url("https://x/1").await.unwrap().unwrap();
    assert_eq!(holdings_row.likely_impact, Some(10));
    // Passed the HOLDINGS gate (10) and went on to fetch, which 404s.
    assert_eq!(holdings_row.status_enum(), ArticleStatus::FetchFailed);
    assert_eq!(holdings_row.fetch_attempts, 1);
    assert!(holdings_row.last_error.is_some());

    // Same score is blocked at the MACRO gate (15).
    let macro_row = store.get_by_url("https://x/2").await.unwrap().unwrap();
    assert_eq!(macro_row.likely_impact, Some(10));
    assert_eq!(macro_row.status_enum(), ArticleStatus::LowPriority);
    assert_eq!(macro_row.should_fetch_full, Some(false));
    assert_eq!(macro_row.fetch_attempts, 0);

    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn short_content_is_discarded_before_classification() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    store
        .insert(&raw_article("https://x/s", "Small story with thin content", "AAPL"))
        .await
        .expect("insert");

    let body = "a".repeat(350);
    let html = format!("<html><body><article><p>{}</p></article></body></html>", body);
    let fetcher = MapFetcher::new().with_page("https://x/s", html).into_arc();

    let llm = ScriptedLlm::new(vec![
        json!({"https://x/s": triage_entry(2, "other", &[], true)}).to_string(),
    ]);
    let pipeline = test_pipeline(&pool, llm.clone(), fetcher);

    pipeline
        .process_batch(vec!["https://x/s".to_string()], vec![], Profile::Balanced)
        .await;

    let row = store.get_by_url("https://x/s").await.unwrap().unwrap();
    assert_eq!(row.content_length, Some(350));
    assert_eq!(row.status_enum(), ArticleStatus::Discarded);
    assert_eq!(row.clean_text.as_deref(), Some(body.as_str()));
    assert!(row.impact_score.is_none());
    assert_eq!(llm.remaining(), 0, "no classification call for short content");
}

#[tokio::test]
async fn same_normalized_url_marks_later_copy_duplicate() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());

    let url_a = "https://www.site.com/x/?utm_source=foo";
    let url_b = "http://site.com/x";
    store
        .insert(&raw_article(url_a, "Fed decision sends markets higher", "SPY"))
        .await
        .expect("insert");
    store
        .insert(&raw_article(url_b, "Markets rally after the Fed decision", "SPY"))
        .await
        .expect("insert");

    let fetcher = MapFetcher::new()
        .with_page(url_a, article_html(120))
        .with_page(url_b, article_html(120))
        .into_arc();

    let llm = ScriptedLlm::new(vec![
        // Run 1: A is triaged, fetched and fully classified.
        json!({url_a: triage_entry(2, "macro", &[], true)}).to_string(),
        json!({url_a: {"maybe_relevant": true, "impact_bucket": "medium"}}).to_string(),
        json!({url_a: {"event_type": "macro", "impact_score": 45, "sentiment": 0.1}}).to_string(),
        // Run 2: B only needs triage; dedup stops it before classification.
        json!({url_b: triage_entry(2, "macro", &[], true)}).to_string(),
    ]);
    let pipeline = test_pipeline(&pool, llm.clone(), fetcher);

    pipeline
        .process_batch(vec![url_a.to_string()], vec![], Profile::Balanced)
        .await;
    pipeline
        .process_batch(vec![url_b.to_string()], vec![], Profile::Balanced)
        .await;

    let row_a = store.get_by_url(url_a).await.unwrap().unwrap();
    let row_b = store.get_by_url(url_b).await.unwrap().unwrap();

    assert_eq!(row_a.normalized_url, row_b.normalized_url);
    assert_eq!(row_a.normalized_url.as_deref(), Some("https://site.com/x"));
    assert_eq!(row_a.status_enum(), ArticleStatus::Personalized);

    // B arrived after A, so B is the duplicate and A the original.
    assert_eq!(row_b.status_enum(), ArticleStatus::Duplicate);
    assert_eq!(row_b.is_duplicate_of_article_id, Some(row_a.id));
    assert!(row_b.impact_score.is_none(), "duplicates never reach classification");

    assert_eq!(llm.remaining(), 0);
}

#[tokio::test]
async fn ranking_clusters_and_guardrails_the_primary() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());

    async fn seed(
        store: &ArticleStore,
        url: &str,
        title: &str,
        adjusted: f64,
        impact: i64,
        why: Option<&str>,
    ) {
        store.insert(&raw_article(url, title, "AAPL")).await.expect("insert");
        store
            .apply_update(
                url,
                &ArticleUpdate {
                    status: Some(ArticleStatus::Personalized),
                    event_type: Some("earnings".to_string()),
                    matched_tickers: Some(r#"["AAPL"]"#.to_string()),
                    profile_adjusted_score: Some(adjusted),
                    impact_score: Some(impact),
                    profile_type_cached: Some("balanced".to_string()),
                    why_json: why.map(|w| w.to_string()),
                    ..ArticleUpdate::default()
                },
            )
            .await
            .expect("update");
    }

    seed(
        &store,
        "https://a/1",
        "Apple beats on earnings",
        80.0,
        72,
        Some(r#"["Buy AAPL now","Strong quarter"]"#),
    )
    .await;
    seed(&store, "https://b/2", "Apple tops profit estimates", 70.0, 65, None).await;

    let pipeline = test_pipeline(&pool, ScriptedLlm::empty(), MapFetcher::new().into_arc());
    let report = pipeline.process_batch_ranking(None, None).await.expect("ranking");

    assert_eq!(report.input, 2);
    assert_eq!(report.clusters, 1);
    assert_eq!(report.ranked, 2);
    assert_eq!(report.shown, 1);

    let primary = store.get_by_url("https://a/1").await.unwrap().unwrap();
    let member = store.get_by_url("https://b/2").await.unwrap().unwrap();

    assert_eq!(primary.status_enum(), ArticleStatus::Ranked);
    assert_eq!(primary.is_primary_in_cluster, Some(true));
    assert_eq!(member.is_primary_in_cluster, Some(false));
    assert_eq!(primary.cluster_id, member.cluster_id);
    assert!(primary.cluster_id.as_deref().unwrap().starts_with("cluster_"));

    // round(0.6*80 + 0.4*72) = 77, over the default cutoff of 50
    assert_eq!(primary.final_rank_score, Some(77));
    assert_eq!(member.final_rank_score, Some(77));
    assert!(primary.shown_to_user);
    assert!(primary.shown_timestamp.is_some());
    assert!(!member.shown_to_user);

    // Guardrail downgraded the advice-bearing signal.
    assert_eq!(primary.verdict.as_deref(), Some("aware"));
    assert_eq!(primary.action.as_deref(), Some("Do nothing"));
    assert_eq!(primary.why_list(), vec!["Strong quarter".to_string()]);
    assert_eq!(primary.opportunity_type.as_deref(), Some("none"));
    assert!(member.verdict.is_none(), "only the primary carries a signal");
}

#[tokio::test]
async fn profile_change_recomputes_personalization() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    seed_holding(&pool, "AAPL", Some("Apple")).await;

    store
        .insert(&raw_article("https://p/1", "Apple guidance surprises investors", "AAPL"))
        .await
        .expect("insert");
    store
        .apply_update(
            "https://p/1",
            &ArticleUpdate {
                status: Some(ArticleStatus::LlmProcessed),
                title_relevance: Some(3),
                likely_impact: Some(60),
                impact_score: Some(50),
                event_type: Some("guidance".to_string()),
                matched_tickers: Some(r#"["AAPL"]"#.to_string()),
                ..ArticleUpdate::default()
            },
        )
        .await
        .expect("update");

    let holdings = HoldingService::new(pool.clone()).list_holdings().await.expect("holdings");
    let pipeline = test_pipeline(&pool, ScriptedLlm::empty(), MapFetcher::new().into_arc());

    pipeline
        .process_batch(vec!["https://p/1".to_string()], holdings.clone(), Profile::Balanced)
        .await;

    let row = store.get_by_url("https://p/1").await.unwrap().unwrap();
    // hr = 20+10+5 = 35; balanced: 0.6*35 + 0.4*50 = 41
    assert_eq!(row.holding_relevance_score, Some(35));
    assert_eq!(row.profile_adjusted_score, Some(41.0));
    assert_eq!(row.profile_type_cached.as_deref(), Some("balanced"));
    assert_eq!(row.status_enum(), ArticleStatus::Personalized);

    // A different profile is a cache miss and recomputes.
    pipeline
        .process_batch(vec!["https://p/1".to_string()], holdings.clone(), Profile::Focus)
        .await;

    let row = store.get_by_url("https://p/1").await.unwrap().unwrap();
    // focus: 1.2*35 + 0.3*50 = 57
    assert_eq!(row.profile_adjusted_score, Some(57.0));
    assert_eq!(row.profile_type_cached.as_deref(), Some("focus"));

    // Same profile again: cache hit, nothing recomputed.
    let report = pipeline
        .process_batch(vec!["https://p/1".to_string()], holdings, Profile::Focus)
        .await;
    let personalize_report = report.stages.last().expect("personalize report");
    assert_eq!(personalize_report.processed, 0);
    assert_eq!(personalize_report.skip_reasons.get("already_processed"), Some(&1));
}

#[tokio::test]
async fn happy_path_reaches_feed_and_reruns_are_idempotent() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    seed_holding(&pool, "NVDA", Some("Nvidia")).await;

    let url = "https://n/1";
    store
        .insert(&raw_article(url, "Nvidia tops expectations on data center strength", "NVDA"))
        .await
        .expect("insert");

    let fetcher = MapFetcher::new().with_page(url, article_html(120)).into_arc();
    let llm = ScriptedLlm::new(vec![
        json!({url: triage_entry(3, "earnings", &["NVDA"], true)}).to_string(),
        json!({url: {"maybe_relevant": true, "impact_bucket": "high"}}).to_string(),
        json!({url: {
            "event_type": "earnings",
            "impact_score": 72,
            "sentiment": 0.6,
            "sentiment_label": "positive",
            "risk_score": 30,
            "opportunity_score": 65,
            "volatility_score": 40,
            "matched_tickers": ["NVDA"],
            "matched_sectors": ["SEMICONDUCTORS"],
        }})
        .to_string(),
    ]);

    let holdings = HoldingService::new(pool.clone()).list_holdings().await.expect("holdings");
    let pipeline = test_pipeline(&pool, llm.clone(), fetcher);

    let report = pipeline
        .process_batch(vec![url.to_string()], holdings.clone(), Profile::Balanced)
        .await;
    assert!(!report.aborted());
    assert_eq!(llm.remaining(), 0);

    let row = store.get_by_url(url).await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::Personalized);
    assert_eq!(row.impact_score, Some(72));
    assert_eq!(row.holding_relevance_score, Some(35));
    // balanced: 0.6*35 + 0.4*72 = 49.8
    let adjusted = row.profile_adjusted_score.expect("personalized score");
    assert!((adjusted - 49.8).abs() < 1e-9, "unexpected score {}", adjusted);
    assert!(row.content_fingerprint.is_some());
    assert!(row.matched_tickers_list().contains(&"NVDA".to_string()));

    let ranking = pipeline.process_batch_ranking(None, None).await.expect("ranking");
    assert_eq!(ranking.ranked, 1);
    assert_eq!(ranking.shown, 1);

    let ranked = store.get_by_url(url).await.unwrap().unwrap();
    // round(0.6*49.8 + 0.4*72) = 59
    assert_eq!(ranked.final_rank_score, Some(59));
    assert!(ranked.shown_to_user);
    assert_eq!(ranked.verdict.as_deref(), Some("aware"));

    // Second run: every stage must skip; no LLM call is made (the scripted
    // queue is empty, so any call would surface as a failure outcome).
    let rerun = pipeline
        .process_batch(vec![url.to_string()], holdings, Profile::Balanced)
        .await;
    for stage_report in &rerun.stages {
        assert_eq!(stage_report.processed, 0, "stage {} reran", stage_report.stage);
        assert_eq!(stage_report.failed, 0, "stage {} failed", stage_report.stage);
    }

    let after = store.get_by_url(url).await.unwrap().unwrap();
    assert_eq!(after.status, ranked.status);
    assert_eq!(after.impact_score, ranked.impact_score);
    assert_eq!(after.profile_adjusted_score, ranked.profile_adjusted_score);
    assert_eq!(after.final_rank_score, ranked.final_rank_score);
}

#[tokio::test]
async fn incremental_mode_splits_top_and_background_work() {
    let pool = create_test_db().await;
    let store = Arc::new(ArticleStore::new(pool.clone()));

    // Hard-filtered titles: the whole run needs no LLM.
    for i in 0..3 {
        store
            .insert(&raw_article(
                &format!("https://i/{}", i),
                "Morning Brief — Markets Today",
                "NVDA",
            ))
            .await
            .expect("insert");
    }
    let urls: Vec<String> = (0..3).map(|i| format!("https://i/{}", i)).collect();

    let pipeline = Arc::new(crate::services::pipeline::Pipeline::new(
        Arc::clone(&store),
        ScriptedLlm::empty(),
        MapFetcher::new().into_arc(),
        Arc::new(crate::services::fetcher::PassthroughResolver),
        super::common::test_thresholds(),
        1, // top_n
    ));

    let (top_report, handle) = Arc::clone(&pipeline)
        .process_batch_incremental(urls.clone(), vec![], Profile::Balanced, None)
        .await;
    assert_eq!(top_report.articles, 1);

    let rest_report = handle.expect("background batch").await.expect("join");
    assert_eq!(rest_report.articles, 2);

    for url in &urls {
        let row = store.get_by_url(url).await.unwrap().unwrap();
        assert_eq!(row.status_enum(), ArticleStatus::Discarded, "{} not processed", url);
    }
}

#[tokio::test]
async fn background_tick_processes_pending_articles() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    store
        .insert(&raw_article("https://t/1", "Morning Brief — Markets Today", "NVDA"))
        .await
        .expect("insert");

    // A hard-filtered title needs no LLM, so an empty script suffices.
    let pipeline = test_pipeline(&pool, ScriptedLlm::empty(), MapFetcher::new().into_arc());
    let tick = crate::services::pipeline::PipelineTickTask::new(
        Arc::clone(&pipeline),
        Arc::new(HoldingService::new(pool.clone())),
        Profile::Balanced,
        50,
    );
    let handle = tick.spawn(std::time::Duration::from_millis(20));

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    handle.abort();

    let row = store.get_by_url("https://t/1").await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::Discarded);
    assert_eq!(row.title_relevance, Some(0));
}

#[tokio::test]
async fn fetch_attempts_cap_terminates_article() {
    let pool = create_test_db().await;
    let store = ArticleStore::new(pool.clone());
    store
        .insert(&raw_article("https://f/1", "Story behind a flaky content server", "AAPL"))
        .await
        .expect("insert");

    let llm = ScriptedLlm::new(vec![
        json!({"https://f/1": triage_entry(2, "earnings", &[], true)}).to_string(),
    ]);
    // No pages: every fetch 404s.
    let pipeline = test_pipeline(&pool, llm.clone(), MapFetcher::new().into_arc());
    let urls = vec!["https://f/1".to_string()];

    pipeline.process_batch(urls.clone(), vec![], Profile::Balanced).await;
    let row = store.get_by_url("https://f/1").await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::FetchFailed);
    assert_eq!(row.fetch_attempts, 1);

    pipeline.process_batch(urls.clone(), vec![], Profile::Balanced).await;
    let row = store.get_by_url("https://f/1").await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::Discarded);
    assert_eq!(row.fetch_attempts, 2);
    assert!(row.last_error.is_some());

    // Terminal status never leaves: another run changes nothing.
    pipeline.process_batch(urls, vec![], Profile::Balanced).await;
    let row = store.get_by_url("https://f/1").await.unwrap().unwrap();
    assert_eq!(row.status_enum(), ArticleStatus::Discarded);
    assert_eq!(row.fetch_attempts, 2);
}
