use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult},
    ledger::{
        models::{
            AccountView, ActiveRule, DayOfWeek, DueRule, NewRecurringRule, ProviderCredentials,
            RecurringRule, TimeOfDay, UpdateRecurringRule,
        },
        LedgerStore,
    },
    reconcile::SnapshotReconciler,
    schedule::ScheduleMatcher,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub reconciler: Arc<SnapshotReconciler>,
    pub matcher: Arc<ScheduleMatcher>,
}

/// GET /health - Health check
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

// ========== ACCOUNT SNAPSHOTS ==========

/// Pull fresh accounts from the provider and return today's view
/// POST /sections/:section_idx/accounts/refresh
pub async fn refresh_accounts(
    State(state): State<AppState>,
    Path(section_idx): Path<i64>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<AccountView>> {
    request.validate()?;
    info!("🔄 Refresh requested for section {} by user {}", section_idx, request.user_idx);

    let view = state
        .reconciler
        .refresh(request.user_idx, section_idx)
        .await?;

    Ok(Json(view))
}

/// GET /sections/:section_idx/accounts
pub async fn get_accounts(
    State(state): State<AppState>,
    Path(section_idx): Path<i64>,
) -> AppResult<Json<AccountView>> {
    Ok(Json(state.reconciler.view(section_idx).await?))
}

/// POST /accounts/bulk
pub async fn bulk_create_accounts(
    State(state): State<AppState>,
    Json(request): Json<BulkCreateRequest>,
) -> AppResult<(StatusCode, Json<BulkCreateResponse>)> {
    request.validate()?;

    let credentials = ProviderCredentials::new(request.user_idx, request.access_token);
    let created = state
        .reconciler
        .bulk_create(&request.section_ids, &credentials)
        .await?;

    Ok((StatusCode::CREATED, Json(BulkCreateResponse { created })))
}

// ========== RECURRING RULES ==========

/// GET /schedule/due?day_of_week=3&time=0930
pub async fn get_due_rules(
    State(state): State<AppState>,
    Query(query): Query<DueQuery>,
) -> AppResult<Json<Vec<DueRule>>> {
    query.validate()?;

    let day = DayOfWeek::new(query.day_of_week)
        .ok_or_else(|| AppError::Validation(format!("invalid day of week: {}", query.day_of_week)))?;
    let time = TimeOfDay::parse(&query.time)?;

    Ok(Json(state.matcher.find_due(day, &time).await?))
}

/// POST /rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<NewRecurringRule>,
) -> AppResult<(StatusCode, Json<RecurringRule>)> {
    request.validate()?;

    let rule = state.store.insert_rule(request).await?;
    info!(
        "✅ Rule {} created for user {} ({} at {})",
        rule.transaction_idx,
        rule.user_idx,
        rule.recurrence.to_column(),
        rule.request_time
    );

    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /users/:user_idx/rules
pub async fn list_user_rules(
    State(state): State<AppState>,
    Path(user_idx): Path<i64>,
) -> AppResult<Json<Vec<ActiveRule>>> {
    Ok(Json(state.store.get_user_rules(user_idx).await?))
}

/// PUT /users/:user_idx/rules/:rule_idx
pub async fn update_rule(
    State(state): State<AppState>,
    Path((user_idx, transaction_idx)): Path<(i64, i64)>,
    Json(request): Json<UpdateRecurringRule>,
) -> AppResult<Json<RecurringRule>> {
    request.validate()?;

    let rule = state
        .store
        .update_rule(transaction_idx, user_idx, request)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("rule {} of user {}", transaction_idx, user_idx))
        })?;

    info!("✏️  Rule {} updated by user {}", transaction_idx, user_idx);
    Ok(Json(rule))
}

/// DELETE /users/:user_idx/rules/:rule_idx
pub async fn delete_rule(
    State(state): State<AppState>,
    Path((user_idx, transaction_idx)): Path<(i64, i64)>,
) -> AppResult<Json<DeleteRuleResponse>> {
    if !state.store.soft_delete_rule(transaction_idx, user_idx).await? {
        return Err(AppError::NotFound(format!(
            "rule {} of user {}",
            transaction_idx, user_idx
        )));
    }

    info!("🗑️  Rule {} deleted by user {}", transaction_idx, user_idx);
    Ok(Json(DeleteRuleResponse {
        transaction_idx,
        deleted: true,
    }))
}
