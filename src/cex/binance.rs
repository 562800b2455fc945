use crate::aggregator::PriceSource;
use crate::errors::Result;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const TICKER_PRICE_PATH: &str = "/api/v3/ticker/price";

#[derive(Debug, Deserialize)]
struct TickerPriceMsg {
    #[serde(rename = "symbol")]
    _symbol: String,
    price: String,
}

/// Last price of one Binance spot symbol, e.g. "ETHUSDT".
pub struct BinanceTicker {
    client: reqwest::Client,
    endpoint: Url,
    symbol: String,
}

impl BinanceTicker {
    pub fn new(client: reqwest::Client, base_url: &str, symbol: &str) -> Result<Self> {
        let endpoint = Url::parse(base_url)?.join(TICKER_PRICE_PATH)?;
        Ok(Self {
            client,
            endpoint,
            symbol: symbol.to_uppercase(),
        })
    }
}

fn parse_ticker_price(raw: &str) -> Result<f64> {
    let parsed: TickerPriceMsg = serde_json::from_str(raw)?;
    Ok(parsed.price.parse()?)
}

#[async_trait]
impl PriceSource for BinanceTicker {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_price(&self) -> Result<f64> {
        let body = self
            .client
            .get(self.endpoint.clone())
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_ticker_price(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OracleError;

    #[test]
    fn parse_ticker_message() {
        let raw = r#"{"symbol":"ETHUSDT","price":"3521.47000000"}"#;
        assert_eq!(parse_ticker_price(raw).unwrap(), 3521.47);
    }

    #[test]
    fn reject_malformed_payloads() {
        assert!(matches!(
            parse_ticker_price(r#"{"symbol":"ETHUSDT","price":"n/a"}"#),
            Err(OracleError::ParseFloat(_))
        ));
        assert!(matches!(
            parse_ticker_price(r#"{"code":-1121,"msg":"Invalid symbol."}"#),
            Err(OracleError::SerdeJson(_))
        ));
    }

    #[test]
    fn endpoint_is_joined_onto_base_url() {
        let t = BinanceTicker::new(reqwest::Client::new(), "https://api.binance.com", "ethusdt")
            .unwrap();
        assert_eq!(t.endpoint.as_str(), "https://api.binance.com/api/v3/ticker/price");
        assert_eq!(t.symbol, "ETHUSDT");
    }
}
