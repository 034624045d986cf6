//! Holding Data Model
//!
//! A holding is one tracked ticker of a user. Tickers are normalized on the
//! way in so provider symbols ("BRK.B", "brk b") and holding symbols compare
//! equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub user_id: i64,
    pub ticker: String,
    pub label: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHoldingRequest {
    pub ticker: String,
    pub label: Option<String>,
    pub notes: Option<String>,
}

/// Normalize a ticker symbol: uppercase, trim, `.A`/`.B` share-class suffixes
/// become `-A`/`-B`, slashes and inner spaces are stripped.
pub fn normalize_ticker(raw: &str) -> String {
    let mut t = raw.trim().to_uppercase();
    if let Some(base) = t.strip_suffix(".A") {
        t = format!("{}-A", base);
    } else if let Some(base) = t.strip_suffix(".B") {
        t = format!("{}-B", base);
    }
    t.chars().filter(|c| *c != '/' && *c != ' ').collect()
}
