use super::*;
use crate::types::HistoricalPrice;
use chrono::TimeZone;
use rust_decimal_macros::dec;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn tx(id: i64, symbol: &str, kind: TransactionType, quantity: i64, price: Decimal, d: u32) -> Transaction {
    Transaction {
        id,
        symbol: symbol.to_string(),
        transaction_type: kind,
        quantity,
        price,
        transaction_date: Utc.with_ymd_and_hms(2024, 3, d, 14, 30, 0).unwrap(),
    }
}

#[test]
fn test_no_transactions_no_series() {
    let series = value_series(dec!(10000), &[], &HashMap::new()).unwrap();
    assert!(series.is_empty());
}

#[test]
fn test_close_on_or_before() {
    let series = vec![(day(4), dec!(10)), (day(6), dec!(12))];
    assert_eq!(close_on_or_before(&series, day(3)), None);
    assert_eq!(close_on_or_before(&series, day(4)), Some(dec!(10)));
    assert_eq!(close_on_or_before(&series, day(5)), Some(dec!(10)));
    assert_eq!(close_on_or_before(&series, day(9)), Some(dec!(12)));
}

#[test]
fn test_value_series_marks_to_close() {
    let transactions = vec![
        tx(1, "IBM", TransactionType::Buy, 10, dec!(100), 4),
        tx(2, "IBM", TransactionType::Sell, 4, dec!(110), 6),
    ];
    let mut closes = HashMap::new();
    closes.insert(
        "IBM".to_string(),
        vec![
            (day(1), dec!(95)),
            (day(4), dec!(101)),
            (day(5), dec!(105)),
            (day(6), dec!(111)),
        ],
    );

    let series = value_series(dec!(10000), &transactions, &closes).unwrap();
    // Days before the first trade are skipped
    assert_eq!(series.iter().map(|p| p.date).collect::<Vec<_>>(), vec![day(4), day(5), day(6)]);

    assert_eq!(series[0].cash, dec!(9000));
    assert_eq!(series[0].holdings_value, dec!(1010));
    assert_eq!(series[0].total_value, dec!(10010));

    assert_eq!(series[1].holdings_value, dec!(1050));

    // 9000 + 440 cash, 6 shares at 111
    assert_eq!(series[2].cash, dec!(9440));
    assert_eq!(series[2].holdings_value, dec!(666));
    assert_eq!(series[2].total_value, dec!(10106));
}

#[test]
fn test_value_series_falls_back_to_trade_price() {
    let transactions = vec![tx(1, "NEW", TransactionType::Buy, 2, dec!(50), 7)];
    let series = value_series(dec!(1000), &transactions, &HashMap::new()).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].cash, dec!(900));
    assert_eq!(series[0].holdings_value, dec!(100));
    assert_eq!(series[0].total_value, dec!(1000));
}

#[test]
fn test_sold_out_position_has_no_value() {
    let transactions = vec![
        tx(1, "IBM", TransactionType::Buy, 1, dec!(100), 4),
        tx(2, "IBM", TransactionType::Sell, 1, dec!(120), 5),
    ];
    let series = value_series(dec!(1000), &transactions, &HashMap::new()).unwrap();
    assert_eq!(series[1].holdings_value, Decimal::ZERO);
    assert_eq!(series[1].total_value, dec!(1020));
}

#[tokio::test]
async fn test_summary_values_holdings() {
    let db = Database::connect(":memory:").await.unwrap();
    let user = db.create_user("carol", "h", "s").await.unwrap();
    db.get_or_create_profile(&user, dec!(1000)).await.unwrap();
    for symbol in ["IBM", "AAPL"] {
        db.upsert_stock(&Stock {
            symbol: symbol.to_string(),
            name: format!("{} Corp", symbol),
        })
        .await
        .unwrap();
    }

    let mut conn = db.pool().acquire().await.unwrap();
    crate::storage::set_cash_balance(&mut *conn, user.id, dec!(500)).await.unwrap();
    crate::storage::set_holding_quantity(&mut *conn, user.id, "IBM", 2).await.unwrap();
    crate::storage::set_holding_quantity(&mut *conn, user.id, "AAPL", 1).await.unwrap();
    crate::storage::insert_transaction(&mut *conn, user.id, "AAPL", TransactionType::Buy, 1, dec!(180), Utc::now())
        .await
        .unwrap();
    drop(conn);

    db.save_historical_prices(&[HistoricalPrice {
        symbol: "IBM".to_string(),
        date: day(1),
        open_price: dec!(150),
        high_price: dec!(160),
        low_price: dec!(149),
        close_price: dec!(155),
        volume: 10,
    }])
    .await
    .unwrap();

    let portfolio = Portfolio::new(db.clone(), dec!(1000));
    let profile = db.get_profile(user.id).await.unwrap();
    let summary = portfolio.summary(&profile).await.unwrap();

    assert_eq!(summary.holdings.len(), 2);
    let aapl = &summary.holdings[0];
    assert_eq!(aapl.symbol, "AAPL");
    assert_eq!(aapl.name, "AAPL Corp");
    assert_eq!(aapl.last_price, Some(dec!(180)));
    assert_eq!(summary.holdings[1].market_value, dec!(310));

    assert_eq!(summary.holdings_value, dec!(490));
    assert_eq!(summary.total_value, dec!(990));
    assert_eq!(summary.total_pnl, dec!(-10));
}

#[test]
fn test_value_series_overflow_is_an_error() {
    let transactions = vec![
        tx(1, "IBM", TransactionType::Buy, 1_000_000_000_000_000_000, Decimal::new(1, 20), 4),
        tx(2, "IBM", TransactionType::Sell, 1, dec!(1000000000000), 5),
    ];
    let result = value_series(dec!(10000), &transactions, &HashMap::new());
    assert!(matches!(result, Err(TraderError::Overflow(_))));
}

#[tokio::test]
async fn test_overflowing_book_is_an_error() {
    use crate::client::MockQuoteSource;
    use crate::ledger::Ledger;
    use std::sync::Arc;

    let db = Database::connect(":memory:").await.unwrap();
    let user = db.create_user("mallory", "h", "s").await.unwrap();
    db.get_or_create_profile(&user, dec!(10000)).await.unwrap();
    db.upsert_stock(&Stock {
        symbol: "IBM".to_string(),
        name: "International Business Machines".to_string(),
    })
    .await
    .unwrap();

    let mut quotes = MockQuoteSource::new();
    quotes.expect_current_price().never();
    let ledger = Ledger::new(db.clone(), Arc::new(quotes), dec!(10000));

    // A cent buys a quintillion shares, then one share sells at a huge price
    ledger
        .buy(user.id, "IBM", 1_000_000_000_000_000_000, Some(Decimal::new(1, 20)))
        .await
        .unwrap();
    ledger
        .sell(user.id, "IBM", 1, Some(dec!(1000000000000)))
        .await
        .unwrap();

    let portfolio = Portfolio::new(db.clone(), dec!(10000));
    let profile = db.get_profile(user.id).await.unwrap();
    assert!(matches!(
        portfolio.summary(&profile).await,
        Err(TraderError::Overflow(_))
    ));
    assert!(matches!(
        portfolio.value_history(user.id).await,
        Err(TraderError::Overflow(_))
    ));
}
