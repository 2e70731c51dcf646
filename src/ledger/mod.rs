//! Paper trading ledger
//!
//! Buy, sell, and reset against a user's cash balance and holdings. Each
//! operation runs in one database transaction: balance, holding, and the
//! transaction log change together or not at all. Cash never goes negative
//! and a holding never drops below zero shares.

use crate::client::QuoteSource;
use crate::error::{Result, TraderError};
use crate::storage::{self, Database};
use crate::types::{round_cash, Stock, Transaction, TransactionType};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info};


/// Outcome of a filled trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeReceipt {
    pub transaction: Transaction,
    pub total: Decimal,
    pub cash_balance: Decimal,
    /// Shares held after the trade (0 once sold out)
    pub holding_quantity: i64,
}

/// Outcome of an account reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetSummary {
    pub cash_balance: Decimal,
    pub transactions_removed: u64,
    pub holdings_removed: u64,
}

#[derive(Clone)]
pub struct Ledger {
    db: Database,
    quotes: Arc<dyn QuoteSource>,
    initial_balance: Decimal,
}

impl Ledger {
    pub fn new(db: Database, quotes: Arc<dyn QuoteSource>, initial_balance: Decimal) -> Self {
        Self {
            db,
            quotes,
            initial_balance,
        }
    }

    pub async fn buy(
        &self,
        user_id: i64,
        symbol: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<TradeReceipt> {
        let symbol = self.checked_stock(symbol, quantity).await?;
        let price = self.resolve_price(&symbol, price).await?;
        let total = trade_total(quantity, price)?;

        let mut tx = self.db.begin().await?;
        lock_profile(&mut tx, user_id).await?;

        let balance = storage::cash_balance(&mut tx, user_id).await?;
        if balance < total {
            debug!("User {} short of funds: needs {}, has {}", user_id, total, balance);
            return Err(TraderError::InsufficientFunds {
                required: total,
                available: balance,
            });
        }
        let held = storage::holding_quantity(&mut tx, user_id, &symbol)
            .await?
            .unwrap_or(0);
        let new_quantity = held
            .checked_add(quantity)
            .ok_or(TraderError::InvalidQuantity(quantity))?;
        let new_balance = balance - total;

        storage::set_cash_balance(&mut tx, user_id, new_balance).await?;
        storage::set_holding_quantity(&mut tx, user_id, &symbol, new_quantity).await?;
        let transaction = storage::insert_transaction(
            &mut tx,
            user_id,
            &symbol,
            TransactionType::Buy,
            quantity,
            price,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!(
            "BUY {} x {} @ {} = {} (user {}, cash {})",
            quantity, symbol, price, total, user_id, new_balance
        );

        Ok(TradeReceipt {
            transaction,
            total,
            cash_balance: new_balance,
            holding_quantity: new_quantity,
        })
    }

    pub async fn sell(
        &self,
        user_id: i64,
        symbol: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<TradeReceipt> {
        let symbol = self.checked_stock(symbol, quantity).await?;

        // Fail on a missing or short holding before spending a quote lookup.
        {
            let mut conn = self.db.pool().acquire().await?;
            check_holding(&mut conn, user_id, &symbol, quantity).await?;
        }

        let price = self.resolve_price(&symbol, price).await?;
        let total = trade_total(quantity, price)?;

        let mut tx = self.db.begin().await?;
        lock_profile(&mut tx, user_id).await?;

        let held = check_holding(&mut tx, user_id, &symbol, quantity).await?;
        let balance = storage::cash_balance(&mut tx, user_id).await?;
        let new_balance = balance.checked_add(total).ok_or_else(|| {
            TraderError::Overflow(format!("cash balance {} plus {}", balance, total))
        })?;
        let new_quantity = held - quantity;

        storage::set_cash_balance(&mut tx, user_id, new_balance).await?;
        storage::set_holding_quantity(&mut tx, user_id, &symbol, new_quantity).await?;
        let transaction = storage::insert_transaction(
            &mut tx,
            user_id,
            &symbol,
            TransactionType::Sell,
            quantity,
            price,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!(
            "SELL {} x {} @ {} = {} (user {}, cash {})",
            quantity, symbol, price, total, user_id, new_balance
        );

        Ok(TradeReceipt {
            transaction,
            total,
            cash_balance: new_balance,
            holding_quantity: new_quantity,
        })
    }

    /// Restore the starting balance and wipe holdings and history
    pub async fn reset(&self, user_id: i64) -> Result<ResetSummary> {
        let mut tx = self.db.begin().await?;
        lock_profile(&mut tx, user_id).await?;

        storage::set_cash_balance(&mut tx, user_id, self.initial_balance).await?;
        let (transactions_removed, holdings_removed) = storage::clear_activity(&mut tx, user_id).await?;
        tx.commit().await?;

        info!(
            "Reset account for user {}: {} transactions, {} holdings removed",
            user_id, transactions_removed, holdings_removed
        );

        Ok(ResetSummary {
            cash_balance: self.initial_balance,
            transactions_removed,
            holdings_removed,
        })
    }

    /// Validate the order shape and return the normalized, listed symbol
    async fn checked_stock(&self, symbol: &str, quantity: i64) -> Result<String> {
        if quantity <= 0 {
            return Err(TraderError::InvalidQuantity(quantity));
        }
        let symbol = Stock::normalize_symbol(symbol);
        if !Stock::is_valid_symbol(&symbol) {
            return Err(TraderError::StockNotFound(symbol));
        }
        match self.db.get_stock(&symbol).await? {
            Some(stock) => Ok(stock.symbol),
            None => Err(TraderError::StockNotFound(symbol)),
        }
    }

    /// Caller-supplied price if given, otherwise the current quote
    async fn resolve_price(&self, symbol: &str, price: Option<Decimal>) -> Result<Decimal> {
        let price = match price {
            Some(p) => p,
            None => {
                let quoted = self.quotes.current_price(symbol).await?;
                debug!("Quoted {} at {}", symbol, quoted);
                quoted
            }
        };
        if price <= Decimal::ZERO {
            return Err(TraderError::InvalidPrice(price));
        }
        Ok(price)
    }
}

/// Cash value of `quantity` shares at `price`, rounded to cents. A trade
/// that rounds to nothing is rejected.
pub fn trade_total(quantity: i64, price: Decimal) -> Result<Decimal> {
    let total = Decimal::from(quantity)
        .checked_mul(price)
        .map(round_cash)
        .ok_or(TraderError::InvalidQuantity(quantity))?;
    if total.is_zero() {
        return Err(TraderError::InvalidInput(format!(
            "{} shares at {} is worth less than a cent",
            quantity, price
        )));
    }
    Ok(total)
}

/// Take SQLite's write lock before reading the balance so a concurrent
/// trade can't act on the same stale balance.
async fn lock_profile(conn: &mut SqliteConnection, user_id: i64) -> Result<()> {
    let done = sqlx::query("UPDATE user_profiles SET cash_balance = cash_balance WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    if done.rows_affected() == 0 {
        return Err(TraderError::ProfileNotFound(user_id));
    }
    Ok(())
}

async fn check_holding(conn: &mut SqliteConnection, user_id: i64, symbol: &str, quantity: i64) -> Result<i64> {
    let held = storage::holding_quantity(conn, user_id, symbol)
        .await?
        .ok_or_else(|| TraderError::HoldingNotFound(symbol.to_string()))?;
    if held < quantity {
        return Err(TraderError::InsufficientShares {
            requested: quantity,
            held,
        });
    }
    Ok(held)
}
