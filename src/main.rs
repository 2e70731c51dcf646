//! Paper Stock Trader
//!
//! Serves the trading API and offers admin commands for stocks, users, and
//! market data.

use clap::{Parser, Subcommand};
use paper_trader::{
    api::{start_server, AppState},
    auth::Authenticator,
    client::{AlphaVantageClient, CachedQuoteSource, QuoteSource},
    config::Config,
    ledger::Ledger,
    storage::Database,
    types::Stock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "paper-trader")]
#[command(about = "Paper stock trading with Alpha Vantage prices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Register or rename a tradable stock
    AddStock {
        symbol: String,
        name: String,
    },
    /// Create a login
    CreateUser {
        username: String,
        password: String,
    },
    /// Print the current price of a stock
    Quote {
        symbol: String,
    },
    /// Download and store the full daily history of a stock
    Sync {
        symbol: String,
    },
    /// Show the shape of a raw API response
    Probe {
        symbol: String,
    },
    /// Restore a user's starting balance and clear their activity
    ResetAccount {
        username: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::AddStock { symbol, name } => add_stock(config, &symbol, &name).await,
        Commands::CreateUser { username, password } => create_user(config, &username, &password).await,
        Commands::Quote { symbol } => show_quote(config, &symbol).await,
        Commands::Sync { symbol } => sync_history(config, &symbol).await,
        Commands::Probe { symbol } => probe(config, &symbol).await,
        Commands::ResetAccount { username } => reset_account(config, &username).await,
    }
}

fn quote_source(config: &Config) -> anyhow::Result<Arc<dyn QuoteSource>> {
    let client = AlphaVantageClient::new(&config.market_data)?;
    let ttl = Duration::from_secs(config.market_data.cache_ttl_secs);
    Ok(Arc::new(CachedQuoteSource::new(client, ttl)))
}

async fn serve(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let db = Database::connect(&config.database.path).await?;
    let quotes = quote_source(&config)?;
    let state = Arc::new(AppState::new(db, quotes, &config));

    tracing::info!(
        "Starting paper trader (initial balance {})",
        config.account.initial_balance
    );
    start_server(state, &config.server_address()).await?;
    Ok(())
}

async fn add_stock(config: Config, symbol: &str, name: &str) -> anyhow::Result<()> {
    let symbol = Stock::normalize_symbol(symbol);
    if !Stock::is_valid_symbol(&symbol) {
        anyhow::bail!(
            "invalid symbol {:?} (1-{} letters, digits, '.' or '-')",
            symbol,
            Stock::MAX_SYMBOL_LEN
        );
    }

    let db = Database::connect(&config.database.path).await?;
    let stock = Stock {
        symbol,
        name: name.trim().to_string(),
    };
    db.upsert_stock(&stock).await?;
    println!("Saved {}", stock);
    Ok(())
}

async fn create_user(config: Config, username: &str, password: &str) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let auth = Authenticator::new(db.clone(), config.auth.secret.clone());
    let user = auth.register(username, password).await?;
    let profile = db
        .get_or_create_profile(&user, config.account.initial_balance)
        .await?;
    println!("Created {} with cash {}", profile, profile.cash_balance);
    Ok(())
}

async fn show_quote(config: Config, symbol: &str) -> anyhow::Result<()> {
    let client = AlphaVantageClient::new(&config.market_data)?;
    let symbol = Stock::normalize_symbol(symbol);
    let price = client.fetch_current_price(&symbol).await?;
    println!("{} {}", symbol, price);
    Ok(())
}

async fn sync_history(config: Config, symbol: &str) -> anyhow::Result<()> {
    let client = AlphaVantageClient::new(&config.market_data)?;
    let db = Database::connect(&config.database.path).await?;
    let symbol = Stock::normalize_symbol(symbol);

    let bars = client.fetch_daily_history(&symbol).await?;
    let saved = db.save_historical_prices(&bars).await?;

    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => println!(
            "Stored {} daily bars for {} ({} to {})",
            saved, symbol, first.date, last.date
        ),
        _ => println!("No daily bars returned for {}", symbol),
    }
    Ok(())
}

async fn probe(config: Config, symbol: &str) -> anyhow::Result<()> {
    let client = AlphaVantageClient::new(&config.market_data)?;
    let report = client.probe(&Stock::normalize_symbol(symbol)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.time_series_key.is_none() {
        tracing::warn!("No daily time series key in the response");
    }
    Ok(())
}

async fn reset_account(config: Config, username: &str) -> anyhow::Result<()> {
    let db = Database::connect(&config.database.path).await?;
    let user = db
        .find_user(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no such user {}", username))?;
    db.get_or_create_profile(&user, config.account.initial_balance)
        .await?;

    let ledger = Ledger::new(db, quote_source(&config)?, config.account.initial_balance);
    let summary = ledger.reset(user.id).await?;
    println!(
        "Reset {}: cash {}, removed {} transactions and {} holdings",
        username, summary.cash_balance, summary.transactions_removed, summary.holdings_removed
    );
    Ok(())
}
