//! SQLite persistence
//!
//! Money is stored as TEXT and parsed back into `Decimal` so no precision
//! is lost to SQLite's REAL affinity. Schema is created on connect.

use crate::error::{Result, TraderError};
use crate::types::{HistoricalPrice, Holding, Stock, Transaction, TransactionType, User, UserProfile};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;


const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    salt          TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_profiles (
    user_id      INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    cash_balance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stocks (
    symbol TEXT PRIMARY KEY,
    name   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS historical_prices (
    symbol      TEXT NOT NULL,
    date        TEXT NOT NULL,
    open_price  TEXT NOT NULL,
    high_price  TEXT NOT NULL,
    low_price   TEXT NOT NULL,
    close_price TEXT NOT NULL,
    volume      INTEGER NOT NULL,
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS holdings (
    user_id  INTEGER NOT NULL REFERENCES user_profiles(user_id) ON DELETE CASCADE,
    symbol   TEXT NOT NULL REFERENCES stocks(symbol),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    PRIMARY KEY (user_id, symbol)
);

CREATE TABLE IF NOT EXISTS transactions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          INTEGER NOT NULL REFERENCES user_profiles(user_id) ON DELETE CASCADE,
    symbol           TEXT NOT NULL REFERENCES stocks(symbol),
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('BUY', 'SELL')),
    quantity         INTEGER NOT NULL CHECK (quantity > 0),
    price            TEXT NOT NULL,
    transaction_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user_date
    ON transactions (user_id, transaction_date);
"#;

/// Stored credentials for a user
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: User,
    pub password_hash: String,
    pub salt: String,
}

/// Connection pool plus the queries the service needs
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `path`; `:memory:` for a scratch DB
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = if path == ":memory:" {
            // Every in-memory connection is its own database, so keep exactly one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .foreign_keys(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!("Database ready at {}", path);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ========== Users & sessions ==========

    pub async fn create_user(&self, username: &str, password_hash: &str, salt: &str) -> Result<User> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, salt, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(salt)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(User {
                id: done.last_insert_rowid(),
                username: username.to_string(),
            }),
            Err(e) if is_unique_violation(&e) => Err(TraderError::UsernameTaken(username.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_credentials(&self, username: &str) -> Result<Option<Credentials>> {
        let row = sqlx::query("SELECT id, username, password_hash, salt FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<Credentials> {
            Ok(Credentials {
                user: User {
                    id: r.try_get("id")?,
                    username: r.try_get("username")?,
                },
                password_hash: r.try_get("password_hash")?,
                salt: r.try_get("salt")?,
            })
        })
        .transpose()
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.find_credentials(username).await?.map(|c| c.user))
    }

    pub async fn create_session(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// User behind `token`, if the session was opened at or after `not_before`
    pub async fn user_for_session(&self, token: &str, not_before: DateTime<Utc>) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.username FROM sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.token = ? AND s.created_at >= ?",
        )
        .bind(token)
        .bind(not_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|r| -> std::result::Result<User, sqlx::Error> {
                Ok(User {
                    id: r.try_get("id")?,
                    username: r.try_get("username")?,
                })
            })
            .transpose()?)
    }

    /// Drop sessions opened before `cutoff`; returns how many went
    pub async fn purge_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM sessions WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    /// Returns whether a session was removed
    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    // ========== Profiles ==========

    pub async fn get_or_create_profile(&self, user: &User, initial_balance: Decimal) -> Result<UserProfile> {
        let done = sqlx::query("INSERT OR IGNORE INTO user_profiles (user_id, cash_balance) VALUES (?, ?)")
            .bind(user.id)
            .bind(initial_balance.to_string())
            .execute(&self.pool)
            .await?;
        if done.rows_affected() > 0 {
            info!("Created profile for {} with {}", user.username, initial_balance);
        }
        self.get_profile(user.id).await
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<UserProfile> {
        let row = sqlx::query(
            "SELECT p.user_id, u.username, p.cash_balance
             FROM user_profiles p JOIN users u ON u.id = p.user_id
             WHERE p.user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TraderError::ProfileNotFound(user_id))?;

        Ok(UserProfile {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            cash_balance: decimal_column(&row, "cash_balance")?,
        })
    }

    // ========== Stocks ==========

    pub async fn upsert_stock(&self, stock: &Stock) -> Result<()> {
        sqlx::query(
            "INSERT INTO stocks (symbol, name) VALUES (?, ?)
             ON CONFLICT (symbol) DO UPDATE SET name = excluded.name",
        )
        .bind(&stock.symbol)
        .bind(&stock.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_stock(&self, symbol: &str) -> Result<Option<Stock>> {
        let row = sqlx::query("SELECT symbol, name FROM stocks WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| stock_from_row(&r)).transpose()?)
    }

    pub async fn list_stocks(&self) -> Result<Vec<Stock>> {
        let rows = sqlx::query("SELECT symbol, name FROM stocks ORDER BY symbol ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(stock_from_row).collect::<std::result::Result<_, _>>()?)
    }

    // ========== Holdings & transactions ==========

    pub async fn holdings_for(&self, user_id: i64) -> Result<Vec<Holding>> {
        let rows = sqlx::query("SELECT symbol, quantity FROM holdings WHERE user_id = ? ORDER BY symbol ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|r| -> std::result::Result<Holding, sqlx::Error> {
                Ok(Holding {
                    symbol: r.try_get("symbol")?,
                    quantity: r.try_get("quantity")?,
                })
            })
            .collect::<std::result::Result<_, _>>()?)
    }

    /// Newest first
    pub async fn transactions_for(&self, user_id: i64) -> Result<Vec<Transaction>> {
        self.query_transactions(user_id, "DESC").await
    }

    /// Oldest first
    pub async fn transactions_chronological(&self, user_id: i64) -> Result<Vec<Transaction>> {
        self.query_transactions(user_id, "ASC").await
    }

    async fn query_transactions(&self, user_id: i64, order: &str) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT id, symbol, transaction_type, quantity, price, transaction_date
             FROM transactions WHERE user_id = ?
             ORDER BY transaction_date {order}, id {order}"
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }

    // ========== Historical prices ==========

    pub async fn save_historical_prices(&self, bars: &[HistoricalPrice]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for bar in bars {
            sqlx::query(
                "INSERT INTO historical_prices
                    (symbol, date, open_price, high_price, low_price, close_price, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (symbol, date) DO UPDATE SET
                    open_price = excluded.open_price,
                    high_price = excluded.high_price,
                    low_price = excluded.low_price,
                    close_price = excluded.close_price,
                    volume = excluded.volume",
            )
            .bind(&bar.symbol)
            .bind(bar.date)
            .bind(bar.open_price.to_string())
            .bind(bar.high_price.to_string())
            .bind(bar.low_price.to_string())
            .bind(bar.close_price.to_string())
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(bars.len())
    }

    /// Oldest first
    pub async fn historical_prices_for(&self, symbol: &str) -> Result<Vec<HistoricalPrice>> {
        let rows = sqlx::query(
            "SELECT symbol, date, open_price, high_price, low_price, close_price, volume
             FROM historical_prices WHERE symbol = ? ORDER BY date ASC",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<HistoricalPrice> {
                Ok(HistoricalPrice {
                    symbol: r.try_get("symbol")?,
                    date: r.try_get("date")?,
                    open_price: decimal_column(r, "open_price")?,
                    high_price: decimal_column(r, "high_price")?,
                    low_price: decimal_column(r, "low_price")?,
                    close_price: decimal_column(r, "close_price")?,
                    volume: r.try_get("volume")?,
                })
            })
            .collect()
    }

    pub async fn latest_close(&self, symbol: &str) -> Result<Option<Decimal>> {
        let row = sqlx::query(
            "SELECT close_price FROM historical_prices WHERE symbol = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decimal_column(&r, "close_price")).transpose()
    }
}

// ========== Statements run inside a caller's transaction ==========

pub async fn cash_balance(conn: &mut SqliteConnection, user_id: i64) -> Result<Decimal> {
    let row = sqlx::query("SELECT cash_balance FROM user_profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TraderError::ProfileNotFound(user_id))?;
    decimal_column(&row, "cash_balance")
}

pub async fn set_cash_balance(conn: &mut SqliteConnection, user_id: i64, balance: Decimal) -> Result<()> {
    sqlx::query("UPDATE user_profiles SET cash_balance = ? WHERE user_id = ?")
        .bind(balance.to_string())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn stock_exists(conn: &mut SqliteConnection, symbol: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM stocks WHERE symbol = ?")
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub async fn holding_quantity(conn: &mut SqliteConnection, user_id: i64, symbol: &str) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT quantity FROM holdings WHERE user_id = ? AND symbol = ?")
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.try_get::<i64, _>("quantity")).transpose()?)
}

/// Store the new quantity; zero removes the holding
pub async fn set_holding_quantity(
    conn: &mut SqliteConnection,
    user_id: i64,
    symbol: &str,
    quantity: i64,
) -> Result<()> {
    if quantity == 0 {
        sqlx::query("DELETE FROM holdings WHERE user_id = ? AND symbol = ?")
            .bind(user_id)
            .bind(symbol)
            .execute(&mut *conn)
            .await?;
    } else {
        sqlx::query(
            "INSERT INTO holdings (user_id, symbol, quantity) VALUES (?, ?, ?)
             ON CONFLICT (user_id, symbol) DO UPDATE SET quantity = excluded.quantity",
        )
        .bind(user_id)
        .bind(symbol)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn insert_transaction(
    conn: &mut SqliteConnection,
    user_id: i64,
    symbol: &str,
    transaction_type: TransactionType,
    quantity: i64,
    price: Decimal,
    at: DateTime<Utc>,
) -> Result<Transaction> {
    let done = sqlx::query(
        "INSERT INTO transactions (user_id, symbol, transaction_type, quantity, price, transaction_date)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(transaction_type.as_str())
    .bind(quantity)
    .bind(price.to_string())
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(Transaction {
        id: done.last_insert_rowid(),
        symbol: symbol.to_string(),
        transaction_type,
        quantity,
        price,
        transaction_date: at,
    })
}

/// Remove every transaction and holding of a user; returns (transactions, holdings) removed
pub async fn clear_activity(conn: &mut SqliteConnection, user_id: i64) -> Result<(u64, u64)> {
    let transactions = sqlx::query("DELETE FROM transactions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    let holdings = sqlx::query("DELETE FROM holdings WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok((transactions, holdings))
}

// ========== Row helpers ==========

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|e| TraderError::Corrupt(format!("{} = {:?}: {}", column, text, e)))
}

fn stock_from_row(row: &SqliteRow) -> std::result::Result<Stock, sqlx::Error> {
    Ok(Stock {
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction> {
    let kind: String = row.try_get("transaction_type")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        transaction_type: kind.parse().map_err(TraderError::Corrupt)?,
        quantity: row.try_get("quantity")?,
        price: decimal_column(row, "price")?,
        transaction_date: row.try_get("transaction_date")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
