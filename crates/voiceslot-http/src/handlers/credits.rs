//! `GET /me/credits` (§6).

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use voiceslot_core::domain::{CreditLot, TransactionType};

use crate::error::HttpError;
use crate::handlers::UserId;
use crate::state::AppState;

fn default_history_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct CreditsQuery {
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default)]
    pub history_offset: u32,
    #[serde(default, rename = "type")]
    pub transaction_type: Option<TransactionType>,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub balance: i64,
    pub balance_cached: i64,
    pub balance_computed: i64,
    pub lots: Vec<CreditLot>,
    pub history: HistoryDto,
    pub unit_label: &'static str,
    pub unit_size: u64,
}

#[derive(Debug, Serialize)]
pub struct HistoryDto {
    pub items: Vec<voiceslot_core::domain::CreditTransaction>,
    pub limit: u32,
    pub offset: u32,
    pub total: i64,
    pub next_offset: Option<u32>,
}

pub async fn get_credits(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(query): Query<CreditsQuery>,
) -> Result<Json<CreditsResponse>, HttpError> {
    let balance = state.ledger.balance(user_id).await?;
    let lots = state.ledger.list_lots(user_id).await?;
    let history = state
        .ledger
        .history(user_id, query.history_limit, query.history_offset, query.transaction_type)
        .await?;

    Ok(Json(CreditsResponse {
        balance: balance.balance_computed,
        balance_cached: balance.balance_cached,
        balance_computed: balance.balance_computed,
        lots,
        history: HistoryDto {
            items: history.items,
            limit: history.limit,
            offset: history.offset,
            total: history.total,
            next_offset: history.next_offset,
        },
        unit_label: "character",
        unit_size: state.ledger.config().unit_size,
    }))
}
