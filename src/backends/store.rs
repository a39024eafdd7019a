//! Redis clients for the session store and the cache.
//!
//! Only the lifecycle matters to the worker: connect, authenticate, quit.
//! Data access belongs to the request handler.

use std::time::Duration;

use futures_util::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::backends::BackingResource;
use crate::config::StoreConfig;
use crate::fault::BoxError;

/// Errors talking to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store address {0:?}")]
    Address(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("store command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("store connection closed")]
    Closed,
}

/// One multiplexed connection to a Redis-compatible store.
pub struct StoreClient {
    name: &'static str,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl StoreClient {
    /// Connect and verify the store answers. The password, when configured,
    /// is sent as part of the connection handshake.
    pub async fn connect(name: &'static str, config: &StoreConfig) -> Result<Self, StoreError> {
        let url = store_url(config)?;
        let client = redis::Client::open(url.as_str()).map_err(|source| StoreError::Connect {
            addr: config.address.clone(),
            source,
        })?;

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let conn = match tokio::time::timeout(timeout, client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                return Err(StoreError::Connect {
                    addr: config.address.clone(),
                    source,
                })
            }
            Err(_) => return Err(StoreError::ConnectTimeout(config.address.clone())),
        };

        let store = Self {
            name,
            conn: Mutex::new(Some(conn)),
        };
        store.ping().await?;

        tracing::info!(store = name, address = %config.address, "Store connected");
        Ok(store)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await.clone().ok_or(StoreError::Closed)?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Whether [`quit`](Self::quit) has not run yet.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Send QUIT and drop the connection. Later calls are no-ops.
    pub async fn quit(&self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        let _: () = redis::cmd("QUIT").query_async(&mut conn).await?;
        Ok(())
    }
}

impl BackingResource for StoreClient {
    fn name(&self) -> &str {
        self.name
    }

    fn release(&self) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move { self.quit().await.map_err(BoxError::from) })
    }
}

/// `redis://[:password@]host:port/` for a configured `host:port`.
fn store_url(config: &StoreConfig) -> Result<Url, StoreError> {
    let mut url = Url::parse(&format!("redis://{}/", config.address))
        .map_err(|_| StoreError::Address(config.address.clone()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(StoreError::Address(config.address.clone()));
    }
    if let Some(auth) = &config.auth {
        url.set_password(Some(auth))
            .map_err(|_| StoreError::Address(config.address.clone()))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Accepts one connection, answers every command, records the verbs.
    async fn mock_store(password: Option<&'static str>) -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_task = seen.clone();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
                    break;
                }
                let count: usize = header.trim()[1..].parse().unwrap();
                let mut args = Vec::new();
                for _ in 0..count {
                    let mut len = String::new();
                    reader.read_line(&mut len).await.unwrap();
                    let len: usize = len.trim()[1..].parse().unwrap();
                    let mut buf = vec![0u8; len + 2];
                    reader.read_exact(&mut buf).await.unwrap();
                    args.push(String::from_utf8_lossy(&buf[..len]).to_string());
                }
                let verb = args[0].to_ascii_uppercase();
                let reply: &[u8] = match verb.as_str() {
                    "AUTH" if Some(args[args.len() - 1].as_str()) == password => b"+OK\r\n",
                    "AUTH" => b"-ERR invalid password\r\n",
                    "PING" => b"+PONG\r\n",
                    _ => b"+OK\r\n",
                };
                // handshake extras such as CLIENT SETINFO are not recorded
                if verb != "CLIENT" {
                    seen_task.lock().unwrap().push(verb);
                }
                reader.get_mut().write_all(reply).await.unwrap();
            }
        });

        (addr, seen)
    }

    fn config(address: String, auth: Option<&str>) -> StoreConfig {
        StoreConfig {
            address,
            auth: auth.map(String::from),
            connect_timeout_ms: 1000,
        }
    }

    #[test]
    fn url_carries_password() {
        let url = store_url(&config("127.0.0.1:6379".into(), Some("p@ss"))).unwrap();
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(6379));
        assert_eq!(url.password(), Some("p%40ss"));

        let url = store_url(&config("cache.internal:6380".into(), None)).unwrap();
        assert_eq!(url.as_str(), "redis://cache.internal:6380/");
        assert!(matches!(store_url(&config("".into(), None)), Err(StoreError::Address(_))));
    }

    #[tokio::test]
    async fn authenticates_pings_and_quits_once() {
        let (addr, seen) = mock_store(Some("s3cret")).await;
        let client = StoreClient::connect("cache", &config(addr, Some("s3cret"))).await.unwrap();
        assert!(client.is_open().await);

        client.quit().await.unwrap();
        client.quit().await.unwrap();

        assert!(!client.is_open().await);
        assert!(matches!(client.ping().await, Err(StoreError::Closed)));
        assert_eq!(*seen.lock().unwrap(), vec!["AUTH", "PING", "QUIT"]);
    }

    #[tokio::test]
    async fn rejected_auth_fails_connect() {
        let (addr, _) = mock_store(Some("right")).await;
        let err = StoreClient::connect("session-store", &config(addr, Some("wrong")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Connect { .. }));
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = StoreClient::connect("cache", &config(addr, None)).await.err().unwrap();
        assert!(matches!(err, StoreError::Connect { .. }));
    }
}
