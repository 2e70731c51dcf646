use super::AppState;
use crate::error::{Result, TraderError};
use crate::ledger::{ResetSummary, TradeReceipt};
use crate::portfolio::{PortfolioSummary, ValuePoint};
use crate::types::{Stock, Transaction, User, UserProfile};
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// The logged-in user behind a bearer token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = TraderError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TraderError::Unauthorized)?
            .to_string();

        let user = state.auth.authenticate(&token).await?;
        Ok(CurrentUser { user, token })
    }
}

impl CurrentUser {
    async fn profile(&self, state: &AppState) -> Result<UserProfile> {
        state
            .db
            .get_or_create_profile(&self.user, state.initial_balance)
            .await
    }
}

/// JSON body whose parse failures answer in the usual error shape
type JsonBody<T> = std::result::Result<Json<T>, JsonRejection>;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub quantity: i64,
    /// Omit to trade at the current quote
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct TradeResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub receipt: TradeReceipt,
}

#[derive(Debug, Serialize)]
pub struct HomeView {
    pub profile: UserProfile,
    pub cash_balance: Decimal,
    pub stocks: Vec<Stock>,
    pub portfolio: PortfolioSummary,
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub transactions: Vec<Transaction>,
    pub portfolio_value: Vec<ValuePoint>,
}

#[derive(Debug, Serialize)]
pub struct ResetView {
    pub success: bool,
    pub reset: ResetSummary,
    pub home: HomeView,
}

pub(super) async fn health_check() -> &'static str {
    "OK"
}

pub(super) async fn register(
    State(state): State<Arc<AppState>>,
    body: JsonBody<LoginRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(req) = body?;
    let user = state.auth.register(&req.username, &req.password).await?;
    state.db.get_or_create_profile(&user, state.initial_balance).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user })),
    ))
}

pub(super) async fn login(
    State(state): State<Arc<AppState>>,
    body: JsonBody<LoginRequest>,
) -> Result<Json<Value>> {
    let Json(req) = body?;
    let (user, token) = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(json!({ "success": true, "user": user, "token": token })))
}

pub(super) async fn logout(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<Value>> {
    state.auth.logout(&current.token).await?;
    tracing::info!("{} logged out", current.user.username);
    Ok(Json(json!({ "success": true })))
}

async fn home_view(state: &AppState, current: &CurrentUser) -> Result<HomeView> {
    let profile = current.profile(state).await?;
    let portfolio = state.portfolio.summary(&profile).await?;
    let stocks = state.portfolio.stocks().await?;
    Ok(HomeView {
        cash_balance: profile.cash_balance,
        profile,
        stocks,
        portfolio,
    })
}

pub(super) async fn home(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<HomeView>> {
    Ok(Json(home_view(&state, &current).await?))
}

pub(super) async fn buy_stock(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    body: JsonBody<TradeRequest>,
) -> Result<Json<TradeResponse>> {
    let Json(req) = body?;
    let profile = current.profile(&state).await?;
    let receipt = state
        .ledger
        .buy(profile.user_id, &req.symbol, req.quantity, req.price)
        .await?;
    Ok(Json(TradeResponse {
        success: true,
        message: "Stock bought successfully.".to_string(),
        receipt,
    }))
}

pub(super) async fn sell_stock(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    body: JsonBody<TradeRequest>,
) -> Result<Json<TradeResponse>> {
    let Json(req) = body?;
    let profile = current.profile(&state).await?;
    let receipt = state
        .ledger
        .sell(profile.user_id, &req.symbol, req.quantity, req.price)
        .await?;
    Ok(Json(TradeResponse {
        success: true,
        message: "Stock sold successfully.".to_string(),
        receipt,
    }))
}

pub(super) async fn reset_account(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<ResetView>> {
    let profile = current.profile(&state).await?;
    let reset = state.ledger.reset(profile.user_id).await?;
    let home = home_view(&state, &current).await?;
    Ok(Json(ResetView {
        success: true,
        reset,
        home,
    }))
}

pub(super) async fn transaction_history(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<HistoryView>> {
    let profile = current.profile(&state).await?;
    let transactions = state.db.transactions_for(profile.user_id).await?;
    let portfolio_value = state.portfolio.value_history(profile.user_id).await?;
    Ok(Json(HistoryView {
        transactions,
        portfolio_value,
    }))
}

pub(super) async fn list_stocks(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
) -> Result<Json<Vec<Stock>>> {
    Ok(Json(state.db.list_stocks().await?))
}

pub(super) async fn quote(
    State(state): State<Arc<AppState>>,
    _current: CurrentUser,
    Path(symbol): Path<String>,
) -> Result<Json<Value>> {
    let symbol = Stock::normalize_symbol(&symbol);
    if !Stock::is_valid_symbol(&symbol) {
        return Err(TraderError::StockNotFound(symbol));
    }
    let price = state.quotes.current_price(&symbol).await?;
    Ok(Json(json!({ "symbol": symbol, "price": price })))
}
