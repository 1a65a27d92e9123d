//! Market Data Client
//!
//! HTTP client for the external market-data collaborator (quotes and stock
//! metadata). Every call carries the pipeline's outbound deadline; network
//! failures and 5xx responses surface as `Unavailable` so bus handlers nak
//! and retry, while an unknown symbol is a deterministic
//! `InvalidArgument`.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::portfolio::Currency;

/// Latest market price for a symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: Decimal,
}

/// Static descriptor for a listed symbol; `currency` is the currency the
/// stock trades in, which drives the FX leg of settlement.
#[derive(Debug, Clone, Deserialize)]
pub struct StockMetadata {
    pub symbol: String,
    pub name: String,
    pub currency: Currency,
}

#[derive(Clone)]
pub struct MarketDataClient {
    http: reqwest::Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Current quote for one symbol.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, AppError> {
        let url = format!("{}/api/v1/stocks/{}/quote", self.base_url, symbol);
        let response = self.http.get(&url).send().await?;
        Self::decode(response, symbol).await
    }

    /// Batch quotes for the resting-book re-evaluation; one round trip for
    /// all active symbols.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, AppError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/api/v1/stocks/quotes?symbols={}",
            self.base_url,
            symbols.join(",")
        );
        let response = self.http.get(&url).send().await?;
        Self::decode(response, "batch").await
    }

    /// Stock metadata; also the symbol-validity check used at intake.
    pub async fn get_metadata(&self, symbol: &str) -> Result<StockMetadata, AppError> {
        let url = format!("{}/api/v1/stocks/{}", self.base_url, symbol);
        let response = self.http.get(&url).send().await?;
        Self::decode(response, symbol).await
    }

    /// Intake-side symbol validation: any deterministic failure from the
    /// collaborator means the symbol is not tradeable.
    pub async fn validate_symbol(&self, symbol: &str) -> Result<(), AppError> {
        match self.get_metadata(symbol).await {
            Ok(_) => Ok(()),
            Err(AppError::NotFound(_)) | Err(AppError::InvalidArgument(_)) => Err(
                AppError::invalid_argument(format!("invalid symbol: {}", symbol)),
            ),
            Err(other) => Err(other),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("symbol {}", what)));
        }
        if status.is_client_error() {
            return Err(AppError::invalid_argument(format!(
                "market data rejected {}: {}",
                what, status
            )));
        }

        Err(AppError::unavailable(format!(
            "market data service returned {} for {}",
            status, what
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_decodes_decimal_prices_exactly() {
        let quote: Quote =
            serde_json::from_str(r#"{"symbol":"AAPL","last_price":"100.05"}"#).unwrap();
        assert_eq!(quote.last_price, dec!(100.05));
    }

    #[test]
    fn metadata_carries_the_trading_currency() {
        let meta: StockMetadata =
            serde_json::from_str(r#"{"symbol":"SHOP","name":"Shopify Inc.","currency":"CAD"}"#)
                .unwrap();
        assert_eq!(meta.currency, Currency::Cad);
    }
}
