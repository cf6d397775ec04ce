//! TCP acceptor coordinating session spawning and admission control

use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::economy::Economy;
use crate::locks::PlayerLocks;
use crate::session::Session;
use crate::store::Store;

/// The accept loop: binds the configured endpoint and runs one session task
/// per connection. All sessions share the store, the economy engine and the
/// per-player lock registry.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    store: Store,
    economy: Economy,
    // Bounds concurrent sessions so a flood of connections cannot grow
    // the task count without limit.
    admissions: Arc<Semaphore>,
}

impl Server {
    /// Binds the listening socket. A failure here is fatal to the process.
    pub async fn bind(config: ServerConfig, store: Store) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(config.bind_address).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let economy = Economy::new(store.clone(), PlayerLocks::new());
        let admissions = Arc::new(Semaphore::new(config.max_clients));

        Ok(Server {
            listener,
            config,
            store,
            economy,
            admissions,
        })
    }

    /// Actual bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Individual accept failures are logged
    /// and skipped; only losing the listener itself ends the loop.
    pub async fn run(self) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            let permit = match Arc::clone(&self.admissions).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Refusing connection from {}: server full", peer);
                    let mut stream = stream;
                    tokio::spawn(async move {
                        let _ = stream.write_all(b"error server full").await;
                    });
                    continue;
                }
            };

            let session = Session::new(
                stream,
                peer,
                self.store.clone(),
                self.economy.clone(),
                &self.config,
            );
            tokio::spawn(async move {
                session.run().await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::MAX_MESSAGE_LEN;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn test_server(max_clients: usize) -> (Server, SocketAddr) {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            max_clients,
            ..ServerConfig::default()
        };
        let server = Server::bind(config, store).await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    #[tokio::test]
    async fn test_bind_assigns_ephemeral_port() {
        let (_server, addr) = test_server(4).await;
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_admission_cap_refuses_excess_connections() {
        let (server, addr) = test_server(1).await;
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // First connection occupies the only slot.
        let _held = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Second connection is turned away with an error line.
        let mut refused = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let n = refused.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"error server full");
    }
}
