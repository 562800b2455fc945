use crate::aggregator::PriceSource;
use crate::errors::{OracleError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const TICKERS_PATH: &str = "/v5/market/tickers";

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<TickersResult>,
}

#[derive(Debug, Deserialize)]
struct TickersResult {
    #[serde(default)]
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
}

/// Last price of one Bybit spot symbol.
pub struct BybitTicker {
    client: reqwest::Client,
    endpoint: Url,
    symbol: String,
}

impl BybitTicker {
    pub fn new(client: reqwest::Client, base_url: &str, symbol: &str) -> Result<Self> {
        let endpoint = Url::parse(base_url)?.join(TICKERS_PATH)?;
        Ok(Self {
            client,
            endpoint,
            symbol: symbol.to_uppercase(),
        })
    }
}

fn parse_tickers(raw: &str, symbol: &str) -> Result<f64> {
    let parsed: TickersResponse = serde_json::from_str(raw)?;
    if parsed.ret_code != 0 {
        return Err(OracleError::Other(format!(
            "bybit error {}: {}",
            parsed.ret_code, parsed.ret_msg
        )));
    }
    let entry = parsed
        .result
        .into_iter()
        .flat_map(|r| r.list)
        .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| OracleError::Other(format!("bybit: no ticker for {symbol}")))?;
    Ok(entry.last_price.parse()?)
}

#[async_trait]
impl PriceSource for BybitTicker {
    fn name(&self) -> &str {
        "bybit"
    }

    async fn fetch_price(&self) -> Result<f64> {
        let body = self
            .client
            .get(self.endpoint.clone())
            .query(&[("category", "spot"), ("symbol", self.symbol.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_tickers(&body, &self.symbol)
    }
}
