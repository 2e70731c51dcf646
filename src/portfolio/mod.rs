//! Portfolio valuation
//!
//! Marks holdings to the latest stored daily close and rebuilds a daily
//! value curve by replaying the transaction log against stored closes.

use crate::error::{Result, TraderError};
use crate::storage::Database;
use crate::types::{Holding, Stock, Transaction, TransactionType, UserProfile};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[cfg(test)]
mod tests;

/// One holding marked to market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingValue {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    /// Latest stored close, or the last trade price when no close is stored
    pub last_price: Option<Decimal>,
    pub market_value: Decimal,
}

/// Account snapshot shown on the home screen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub username: String,
    pub initial_balance: Decimal,
    pub cash_balance: Decimal,
    pub holdings: Vec<HoldingValue>,
    pub holdings_value: Decimal,
    /// Cash plus holdings value
    pub total_value: Decimal,
    /// Total value relative to the starting balance
    pub total_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Portfolio value at the close of one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub date: NaiveDate,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub total_value: Decimal,
}

#[derive(Clone)]
pub struct Portfolio {
    db: Database,
    initial_balance: Decimal,
}

impl Portfolio {
    pub fn new(db: Database, initial_balance: Decimal) -> Self {
        Self { db, initial_balance }
    }

    pub async fn summary(&self, profile: &UserProfile) -> Result<PortfolioSummary> {
        let holdings = self.db.holdings_for(profile.user_id).await?;
        let names: HashMap<String, String> = self
            .db
            .list_stocks()
            .await?
            .into_iter()
            .map(|s| (s.symbol, s.name))
            .collect();
        let history = self.db.transactions_for(profile.user_id).await?;

        let mut valued = Vec::with_capacity(holdings.len());
        for Holding { symbol, quantity } in holdings {
            let last_price = match self.db.latest_close(&symbol).await? {
                Some(close) => Some(close),
                None => last_trade_price(&history, &symbol),
            };
            let market_value = match last_price {
                Some(price) => position_value(&symbol, quantity, price)?,
                None => Decimal::ZERO,
            };
            valued.push(HoldingValue {
                name: names.get(&symbol).cloned().unwrap_or_else(|| symbol.clone()),
                market_value,
                symbol,
                quantity,
                last_price,
            });
        }

        let holdings_value = checked_sum(valued.iter().map(|h| h.market_value))?;
        let total_value = add(profile.cash_balance, holdings_value)?;
        let total_pnl = total_value
            .checked_sub(self.initial_balance)
            .ok_or_else(|| TraderError::Overflow("profit and loss".to_string()))?;

        Ok(PortfolioSummary {
            username: profile.username.clone(),
            initial_balance: self.initial_balance,
            cash_balance: profile.cash_balance,
            holdings: valued,
            holdings_value,
            total_value,
            total_pnl,
            updated_at: Utc::now(),
        })
    }

    /// Daily value curve since the user's first trade
    pub async fn value_history(&self, user_id: i64) -> Result<Vec<ValuePoint>> {
        let transactions = self.db.transactions_chronological(user_id).await?;

        let symbols: BTreeSet<&str> = transactions.iter().map(|t| t.symbol.as_str()).collect();
        let mut closes = HashMap::new();
        for symbol in symbols {
            let bars = self.db.historical_prices_for(symbol).await?;
            closes.insert(
                symbol.to_string(),
                bars.into_iter().map(|b| (b.date, b.close_price)).collect(),
            );
        }

        value_series(self.initial_balance, &transactions, &closes)
    }

    pub async fn stocks(&self) -> Result<Vec<Stock>> {
        self.db.list_stocks().await
    }
}

fn position_value(symbol: &str, quantity: i64, price: Decimal) -> Result<Decimal> {
    price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(|| TraderError::Overflow(format!("value of {} {} at {}", quantity, symbol, price)))
}

fn add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| TraderError::Overflow(format!("{} plus {}", a, b)))
}

fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, add)
}

fn last_trade_price(newest_first: &[Transaction], symbol: &str) -> Option<Decimal> {
    newest_first.iter().find(|t| t.symbol == symbol).map(|t| t.price)
}

/// Close on or before `date` from an ascending series
fn close_on_or_before(series: &[(NaiveDate, Decimal)], date: NaiveDate) -> Option<Decimal> {
    let idx = series.partition_point(|(d, _)| *d <= date);
    idx.checked_sub(1).map(|i| series[i].1)
}

/// Replay `transactions` (oldest first) from `initial_balance` and value the
/// book at each day's close. Days come from trade dates plus every stored
/// close on or after the first trade. A symbol with no close yet is valued
/// at its last trade price.
pub fn value_series(
    initial_balance: Decimal,
    transactions: &[Transaction],
    closes: &HashMap<String, Vec<(NaiveDate, Decimal)>>,
) -> Result<Vec<ValuePoint>> {
    let first_day = match transactions.first() {
        Some(t) => t.transaction_date.date_naive(),
        None => return Ok(Vec::new()),
    };

    let mut days: BTreeSet<NaiveDate> = transactions
        .iter()
        .map(|t| t.transaction_date.date_naive())
        .collect();
    for series in closes.values() {
        days.extend(series.iter().map(|(d, _)| *d).filter(|d| *d >= first_day));
    }

    let mut cash = initial_balance;
    let mut positions: HashMap<&str, i64> = HashMap::new();
    let mut last_trade: HashMap<&str, Decimal> = HashMap::new();
    let mut pending = transactions.iter().peekable();
    let mut points = Vec::with_capacity(days.len());

    for day in days {
        while let Some(t) = pending.next_if(|t| t.transaction_date.date_naive() <= day) {
            let total = t
                .total()
                .ok_or_else(|| TraderError::Overflow(format!("transaction {}", t.id)))?;
            let qty = positions.entry(t.symbol.as_str()).or_insert(0);
            let (new_cash, new_qty) = match t.transaction_type {
                TransactionType::Buy => (cash.checked_sub(total), qty.checked_add(t.quantity)),
                TransactionType::Sell => (cash.checked_add(total), qty.checked_sub(t.quantity)),
            };
            cash = new_cash
                .ok_or_else(|| TraderError::Overflow(format!("cash after transaction {}", t.id)))?;
            *qty = new_qty
                .ok_or_else(|| TraderError::Overflow(format!("shares after transaction {}", t.id)))?;
            last_trade.insert(t.symbol.as_str(), t.price);
        }

        let mut holdings_value = Decimal::ZERO;
        for (symbol, qty) in positions.iter().filter(|(_, qty)| **qty != 0) {
            let price = closes
                .get(*symbol)
                .and_then(|s| close_on_or_before(s, day))
                .or_else(|| last_trade.get(symbol).copied())
                .unwrap_or_default();
            holdings_value = add(holdings_value, position_value(symbol, *qty, price)?)?;
        }

        points.push(ValuePoint {
            date: day,
            cash,
            holdings_value,
            total_value: add(cash, holdings_value)?,
        });
    }

    Ok(points)
}
