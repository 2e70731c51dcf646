//! HTTP API
//!
//! JSON endpoints for accounts, trading, and history. Every trading route
//! needs an `Authorization: Bearer <token>` header from `/accounts/login`.

mod handlers;


pub use handlers::{CurrentUser, HistoryView, HomeView, LoginRequest, TradeRequest, TradeResponse};

use crate::auth::Authenticator;
use crate::client::QuoteSource;
use crate::config::Config;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::portfolio::Portfolio;
use crate::storage::Database;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Services shared across handlers
pub struct AppState {
    pub db: Database,
    pub auth: Authenticator,
    pub ledger: Ledger,
    pub portfolio: Portfolio,
    pub quotes: Arc<dyn QuoteSource>,
    pub initial_balance: Decimal,
}

impl AppState {
    pub fn new(db: Database, quotes: Arc<dyn QuoteSource>, config: &Config) -> Self {
        let initial_balance = config.account.initial_balance;
        Self {
            auth: Authenticator::new(db.clone(), config.auth.secret.clone())
                .with_session_ttl(Duration::hours(i64::from(config.auth.session_ttl_hours))),
            ledger: Ledger::new(db.clone(), quotes.clone(), initial_balance),
            portfolio: Portfolio::new(db.clone(), initial_balance),
            db,
            quotes,
            initial_balance,
        }
    }
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/accounts/register", post(handlers::register))
        .route("/accounts/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/home", get(handlers::home))
        .route("/buy", post(handlers::buy_stock))
        .route("/sell", post(handlers::sell_stock))
        .route("/reset_account", post(handlers::reset_account))
        .route("/history", get(handlers::transaction_history))
        .route("/stocks", get(handlers::list_stocks))
        .route("/quote/{symbol}", get(handlers::quote))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process is stopped
pub async fn start_server(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Paper trader listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
