use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// When unset the service runs on the in-memory store (dev / tests)
    pub database_url: Option<String>,
    pub bind_address: String,
    pub sweep_interval_secs: u64,
    pub escrow_fee_rate: Decimal,
    pub max_charge: Decimal,
    /// External payment gateway; unset means the auto-approve gateway
    pub payment_gateway_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", 120)?,
            escrow_fee_rate: parse_var("ESCROW_FEE_RATE", Decimal::new(5, 2))?,
            max_charge: parse_var("MAX_CHARGE", Decimal::new(10_000, 0))?,
            payment_gateway_url: std::env::var("PAYMENT_GATEWAY_URL").ok(),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            rate_limit_requests: parse_var("RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", 60)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, config::ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|_| {
            config::ConfigError::Message(format!("invalid value for {}: {:?}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Single test so the env mutations cannot race another config test
    #[test]
    fn env_parsing() {
        std::env::remove_var("ESCROW_FEE_RATE");
        let config = Config::from_env().unwrap();
        assert_eq!(config.escrow_fee_rate, dec!(0.05));
        assert_eq!(config.sweep_interval_secs, 120);
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);

        std::env::set_var("SWEEP_INTERVAL_SECS", "not-a-number");
        assert!(Config::from_env().is_err());
        std::env::remove_var("SWEEP_INTERVAL_SECS");
    }
}
