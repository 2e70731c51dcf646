//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.database.path, "data/trader.db");
        assert_eq!(config.market_data.base_url, "https://www.alphavantage.co");
        assert_eq!(config.market_data.timeout_secs, 30);
        assert_eq!(config.market_data.cache_ttl_secs, 60);
        assert_eq!(config.account.initial_balance, dec!(10000.00));
        assert_eq!(config.auth.session_ttl_hours, 168);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.account.initial_balance, DEFAULT_INITIAL_BALANCE);
    }

    #[test]
    fn test_market_data_config_deserialize() {
        let toml_str = r#"
base_url = "http://localhost:9999"
api_key = "abc123"
cache_ttl_secs = 0
"#;
        let config: MarketDataConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.api_key, "abc123");
        assert_eq!(config.cache_ttl_secs, 0);
        assert_eq!(config.timeout_secs, 30); // default
    }

    #[test]
    fn test_account_config_deserialize() {
        let toml_str = r#"
initial_balance = 2500.50
"#;
        let config: AccountConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.initial_balance, dec!(2500.50));
    }

    #[test]
    fn test_full_config_sections() {
        let toml_str = r#"
[server]
host = "0.0.0.0"
port = 9000

[database]
path = ":memory:"

[auth]
secret = "s3cret"
session_ttl_hours = 12
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:9000");
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(config.auth.session_ttl_hours, 12);
    }

    #[test]
    fn test_expand_default_fallback() {
        let mut config = Config::default();
        config.market_data.api_key = "${PAPER_TRADER_TEST_UNSET_VAR:-demo}".to_string();
        let config = config.expanded().unwrap();
        assert_eq!(config.market_data.api_key, "demo");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[market_data]
api_key = "from-file"

[account]
initial_balance = 500
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.market_data.api_key, "from-file");
        assert_eq!(config.account.initial_balance, dec!(500));
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8000);
    }
}
