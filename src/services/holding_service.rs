//! Holdings management for the default user.

use sqlx::SqlitePool;

use crate::models::holding::{CreateHoldingRequest, Holding, normalize_ticker};
use crate::utils::{ApiError, ApiResult, StringExt};

/// Single-user model: every holding belongs to user 1.
pub const DEFAULT_USER_ID: i64 = 1;

#[derive(Clone)]
pub struct HoldingService {
    pool: SqlitePool,
}

impl HoldingService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_holdings(&self) -> ApiResult<Vec<Holding>> {
        let holdings = sqlx::query_as::<_, Holding>(
            "SELECT * FROM holdings WHERE user_id = ? ORDER BY ticker ASC",
        )
        .bind(DEFAULT_USER_ID)
        .fetch_all(&self.pool)
        .await?;
        Ok(holdings)
    }

    pub async fn add_holding(&self, req: CreateHoldingRequest) -> ApiResult<Holding> {
        let ticker = normalize_ticker(&req.ticker);
        if ticker.is_empty() {
            return Err(ApiError::validation_error("Ticker cannot be empty"));
        }

        let existing: Option<Holding> =
            sqlx::query_as("SELECT * FROM holdings WHERE user_id = ? AND ticker = ?")
                .bind(DEFAULT_USER_ID)
                .bind(&ticker)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(ApiError::validation_error(format!("{} is already tracked", ticker)));
        }

        let label = req.label.clean();
        let notes = req.notes.clean();

        let result = sqlx::query(
            "INSERT INTO holdings (user_id, ticker, label, notes) VALUES (?, ?, ?, ?)",
        )
        .bind(DEFAULT_USER_ID)
        .bind(&ticker)
        .bind(&label)
        .bind(&notes)
        .execute(&self.pool)
        .await?;

        let holding = sqlx::query_as::<_, Holding>("SELECT * FROM holdings WHERE id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;

        tracing::info!("Holding added: {} (id {})", holding.ticker, holding.id);
        Ok(holding)
    }

    pub async fn remove_holding(&self, id: i64) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM holdings WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(DEFAULT_USER_ID)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::not_found(format!("Holding {} not found", id)));
        }
        Ok(())
    }
}
