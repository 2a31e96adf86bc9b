//! Binance spot REST API client.

use crate::config::BinanceConfig;
use crate::exchange::traits::ExchangeApi;
use crate::exchange::types::*;
use crate::indicators::RawKline;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Binance API client for market data, orders and user data streams.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    /// Market data endpoints (klines)
    base_url: String,
    /// Account endpoints (orders, listen keys)
    trade_base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            trade_base_url: config.trade_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn user_data_stream_url(&self) -> String {
        format!("{}/api/v3/userDataStream", self.trade_base_url)
    }

    /// Turn a non-2xx response into an error carrying the exchange message.
    async fn ensure_success(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => bail!("{action} failed with HTTP {status}: code {} ({})", err.code, err.msg),
            Err(_) => bail!("{action} failed with HTTP {status}: {body}"),
        }
    }

    fn order_query(order: &NewOrder, timestamp: u64) -> String {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.as_str().to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.normalize().to_string()),
        ];

        if let Some(price) = &order.price {
            params.push(("price", price.normalize().to_string()));
        }

        if let Some(tif) = &order.time_in_force {
            params.push(("timeInForce", tif.as_str().to_string()));
        }

        params.push(("timestamp", timestamp.to_string()));

        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    // ==================== Market Data (Public) ====================

    #[instrument(skip(self))]
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u16) -> Result<Vec<RawKline>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("Failed to fetch klines")?;

        Self::ensure_success(response, "Fetch klines")
            .await?
            .json()
            .await
            .context("Failed to parse klines response")
    }

    // ==================== Orders (Authenticated) ====================

    #[instrument(skip(self))]
    async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        let query_string = Self::order_query(order, Self::timestamp());
        let signature = self.sign(&query_string);
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.trade_base_url, query_string, signature
        );

        debug!("Placing spot order: {:?}", order);

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to place order")?;

        Self::ensure_success(response, "Place order")
            .await?
            .json()
            .await
            .context("Failed to parse order response")
    }

    // ==================== User Data Stream ====================

    #[instrument(skip(self))]
    async fn create_listen_key(&self) -> Result<String> {
        let response = self
            .http
            .post(self.user_data_stream_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .context("Failed to create listen key")?;

        let body: ListenKeyResponse = Self::ensure_success(response, "Create listen key")
            .await?
            .json()
            .await
            .context("Failed to parse listen key response")?;

        Ok(body.listen_key)
    }

    #[instrument(skip(self, listen_key))]
    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        let response = self
            .http
            .put(self.user_data_stream_url())
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("listenKey", listen_key)])
            .send()
            .await
            .context("Failed to renew listen key")?;

        Self::ensure_success(response, "Renew listen key").await?;
        Ok(())
    }

    #[instrument(skip(self, listen_key))]
    async fn close_listen_key(&self, listen_key: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.user_data_stream_url())
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("listenKey", listen_key)])
            .send()
            .await
            .context("Failed to close listen key")?;

        Self::ensure_success(response, "Close listen key").await?;
        Ok(())
    }
}
