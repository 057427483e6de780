//! Snapshot provider
//!
//! Fetches full level-3 snapshots over the REST API.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{MarketDataError, Result};
use crate::parser::BookSnapshot;

const USER_AGENT: &str = concat!("orderbook-sync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Source of full order book snapshots
pub trait SnapshotProvider: Send + Sync + 'static {
    /// Fetch the current level-3 book for `product_id`
    fn fetch(&self, product_id: &str) -> impl Future<Output = Result<BookSnapshot>> + Send;
}

/// Snapshot provider backed by the public REST API
#[derive(Debug, Clone)]
pub struct RestSnapshotProvider {
    client: reqwest::Client,
    rest_endpoint: String,
}

impl RestSnapshotProvider {
    pub fn new(rest_endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            rest_endpoint: rest_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn book_url(&self, product_id: &str) -> String {
        format!("{}/products/{}/book", self.rest_endpoint, product_id)
    }
}

impl SnapshotProvider for RestSnapshotProvider {
    async fn fetch(&self, product_id: &str) -> Result<BookSnapshot> {
        let url = self.book_url(product_id);
        info!(product = %product_id, url = %url, "Fetching order book snapshot");

        let response = self
            .client
            .get(&url)
            .query(&[("level", "3")])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(MarketDataError::SnapshotStatus {
                product: product_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let snapshot: BookSnapshot = serde_json::from_str(&body)?;

        debug!(
            product = %product_id,
            sequence = snapshot.sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Snapshot received"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one HTTP request with `status` and `body`, returning the request head
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    /// Provider for a local test server, bypassing any configured proxy
    fn local_provider(endpoint: &str) -> RestSnapshotProvider {
        RestSnapshotProvider {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
            rest_endpoint: endpoint.to_string(),
        }
    }

    #[test]
    fn test_book_url_strips_trailing_slash() {
        let provider = RestSnapshotProvider::new("https://api.exchange.coinbase.com/").unwrap();
        assert_eq!(
            provider.book_url("BTC-USD"),
            "https://api.exchange.coinbase.com/products/BTC-USD/book"
        );
    }

    #[tokio::test]
    async fn test_fetch_parses_level3_book() {
        let body = r#"{"sequence":12,"bids":[["100.5","2","b-1"]],"asks":[]}"#;
        let (endpoint, server) = serve_once("200 OK", body).await;
        let provider = local_provider(&endpoint);

        let snapshot = provider.fetch("BTC-USD").await.unwrap();
        assert_eq!(snapshot.sequence, 12);
        assert_eq!(snapshot.bids[0].price, dec!(100.5));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /products/BTC-USD/book?level=3 "));
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_200_status() {
        let (endpoint, server) = serve_once("202 Accepted", "").await;
        let provider = local_provider(&endpoint);

        let err = provider.fetch("BTC-USD").await.unwrap_err();
        assert!(matches!(
            err,
            MarketDataError::SnapshotStatus { ref product, status: 202 } if product == "BTC-USD"
        ));
        server.await.unwrap();
    }
}
