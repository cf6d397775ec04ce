//! Per-connection session handling
//!
//! Each accepted connection gets one [`Session`]: a request/response loop
//! over a two-state machine (unauthenticated / authenticated). One socket
//! read is one message, capped at `MAX_MESSAGE_LEN` bytes. Protocol and
//! domain failures answer with a one-line rejection and keep the session
//! alive; transport failures, idle timeouts, oversized messages and repeated
//! failed logins tear the session down. Only the session state dies with the
//! connection; durable state lives in the store.
//!
//! The command dispatch itself lives in [`CommandHandler`], which owns no
//! socket so tests can drive it directly.

use log::{debug, info, warn};
use shared::protocol::{format_buildings, format_player_info, Command};
use shared::{Resources, LOGIN_ACCEPTED, LOGIN_REJECTED, MAX_MESSAGE_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::economy::{unix_now, Economy, EconomyError};
use crate::store::{Store, StoreError};

/// What the session loop should do after one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Send this line, keep the session open.
    Reply(String),
    /// Fire-and-forget command: send nothing, keep the session open.
    Silent,
    /// Optionally send a final line, then close the connection.
    Close(Option<String>),
}

/// The protocol state machine, separated from the socket.
pub struct CommandHandler {
    store: Store,
    economy: Economy,
    player: Option<i64>,
    login_failures: u32,
    max_login_failures: u32,
}

impl CommandHandler {
    pub fn new(store: Store, economy: Economy, max_login_failures: u32) -> Self {
        Self {
            store,
            economy,
            player: None,
            login_failures: 0,
            max_login_failures,
        }
    }

    /// Authenticated player id, if any.
    pub fn player(&self) -> Option<i64> {
        self.player
    }

    /// Handles one message and decides how the session continues.
    pub async fn handle(&mut self, text: &str, now: i64) -> Outcome {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                debug!("Protocol error: {}", e);
                return Outcome::Reply(format!("error {}", e));
            }
        };

        match (command, self.player) {
            (Command::Login { username, password }, _) => self.login(&username, &password).await,
            (Command::Register { username, password }, _) => {
                self.register(&username, &password, now).await
            }
            (command, Some(player_id)) => self.dispatch(player_id, command, now).await,
            (command, None) => {
                debug!("Command before login: {:?}", command);
                if command.expects_reply() {
                    Outcome::Reply("error login required".to_string())
                } else {
                    Outcome::Silent
                }
            }
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> Outcome {
        match self.store.authenticate(username, password).await {
            Ok(Some(player)) => {
                info!("Player {} (id {}) logged in", player.username, player.id);
                self.player = Some(player.id);
                self.login_failures = 0;
                Outcome::Reply(LOGIN_ACCEPTED.to_string())
            }
            Ok(None) => {
                self.login_failures += 1;
                warn!(
                    "Failed login for `{}` ({}/{})",
                    username, self.login_failures, self.max_login_failures
                );
                if self.login_failures >= self.max_login_failures {
                    Outcome::Close(Some(LOGIN_REJECTED.to_string()))
                } else {
                    Outcome::Reply(LOGIN_REJECTED.to_string())
                }
            }
            Err(e) => self.store_failure(e),
        }
    }

    async fn register(&mut self, username: &str, password: &str, now: i64) -> Outcome {
        match self
            .store
            .create_player(username, password, Resources::starting(), now)
            .await
        {
            Ok(_) => Outcome::Reply(LOGIN_ACCEPTED.to_string()),
            Err(StoreError::UsernameTaken) => Outcome::Reply(LOGIN_REJECTED.to_string()),
            Err(e) => self.store_failure(e),
        }
    }

    async fn dispatch(&mut self, player_id: i64, command: Command, now: i64) -> Outcome {
        match command {
            Command::GetPlayerInfo => match self.economy.settle(player_id, now).await {
                Ok(balances) => Outcome::Reply(format_player_info(&balances)),
                Err(e) => self.economy_failure(e),
            },
            Command::GetBuildings => match self.store.buildings(player_id).await {
                Ok(buildings) => {
                    let entries: Vec<_> = buildings.iter().map(|b| b.entry()).collect();
                    Outcome::Reply(format_buildings(&entries))
                }
                Err(e) => self.store_failure(e),
            },
            Command::AddBuilding {
                slot_id,
                kind,
                stage,
            } => {
                // Fire-and-forget: failures are logged, never answered.
                if let Err(e) = self
                    .economy
                    .upsert_raw(player_id, slot_id, &kind, stage, now)
                    .await
                {
                    warn!(
                        "add_building slot {} for player {} failed: {}",
                        slot_id, player_id, e
                    );
                }
                Outcome::Silent
            }
            Command::UpdatePlayer => {
                if let Err(e) = self.economy.settle(player_id, now).await {
                    warn!("update_player for player {} failed: {}", player_id, e);
                }
                Outcome::Silent
            }
            Command::Build { slot_id, kind } => {
                self.schedule_reply(self.economy.place(player_id, slot_id, &kind, now).await)
            }
            Command::Upgrade { slot_id } => {
                self.schedule_reply(self.economy.start_upgrade(player_id, slot_id, now).await)
            }
            Command::Demolish { slot_id } => {
                match self.economy.demolish(player_id, slot_id, now).await {
                    Ok(()) => Outcome::Reply("ok".to_string()),
                    Err(e) => self.economy_failure(e),
                }
            }
            // Login and register are handled before dispatch.
            Command::Login { .. } | Command::Register { .. } => Outcome::Silent,
        }
    }

    fn schedule_reply(&self, result: Result<i64, EconomyError>) -> Outcome {
        match result {
            Ok(end_time) => Outcome::Reply(format!("ok {}", end_time)),
            Err(e) => self.economy_failure(e),
        }
    }

    fn economy_failure(&self, e: EconomyError) -> Outcome {
        match e {
            EconomyError::Store(inner) => self.store_failure(inner),
            domain => Outcome::Reply(format!("error {}", domain)),
        }
    }

    /// Persistence failures answer a generic line; the session survives, the
    /// details go to the log.
    fn store_failure(&self, e: StoreError) -> Outcome {
        log::error!("Store failure: {}", e);
        Outcome::Reply("error internal".to_string())
    }
}

/// One open connection: socket plus handler plus timeouts.
pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    handler: CommandHandler,
    read_timeout: Duration,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        store: Store,
        economy: Economy,
        config: &ServerConfig,
    ) -> Self {
        Self {
            stream,
            peer,
            handler: CommandHandler::new(store, economy, config.max_login_failures),
            read_timeout: config.read_timeout,
        }
    }

    /// Drives the request/response loop until the peer disconnects, the idle
    /// timeout fires, or the protocol is violated beyond recovery.
    pub async fn run(mut self) {
        info!("Connection from {}", self.peer);
        // One spare byte distinguishes an oversized message from a full read.
        let mut buf = [0u8; MAX_MESSAGE_LEN + 1];

        loop {
            let n = match timeout(self.read_timeout, self.stream.read(&mut buf)).await {
                Err(_) => {
                    info!("Session {} idle past read timeout, closing", self.peer);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Read error from {}: {}", self.peer, e);
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
            };

            if n > MAX_MESSAGE_LEN {
                // The unread tail of an oversized message would be parsed as
                // the next command; reject it and drop the connection.
                warn!("Oversized message from {}, closing", self.peer);
                let _ = self.send("error message too long").await;
                break;
            }

            let text = match std::str::from_utf8(&buf[..n]) {
                Ok(text) => text.trim(),
                Err(_) => {
                    if self.send("error invalid utf-8").await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match self.handler.handle(text, unix_now()).await {
                Outcome::Reply(line) => {
                    if self.send(&line).await.is_err() {
                        break;
                    }
                }
                Outcome::Silent => {}
                Outcome::Close(last) => {
                    if let Some(line) = last {
                        let _ = self.send(&line).await;
                    }
                    break;
                }
            }
        }

        info!("Session for {} closed", self.peer);
    }

    async fn send(&mut self, line: &str) -> std::io::Result<()> {
        self.stream.write_all(line.as_bytes()).await.map_err(|e| {
            warn!("Write to {} failed: {}", self.peer, e);
            e
        })
    }
}
