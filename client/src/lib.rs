//! # Game Client Library
//!
//! Thin request/response stub for the server's text protocol: one method per
//! command over a single TCP connection. There is no rendering here; the
//! library exists for the CLI binary, for tooling, and for integration tests
//! that need to speak the protocol exactly like a deployed client.
//!
//! The protocol is lockstep: commands that expect a reply read exactly one
//! message back; fire-and-forget commands (`add_building`, `update_player`)
//! write and return immediately.

use log::{debug, info};
use shared::catalog::BuildingKind;
use shared::protocol::{self, BuildingEntry, Command, ProtocolError};
use shared::{Resources, LOGIN_ACCEPTED, MAX_MESSAGE_LEN};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server closed the connection")]
    Disconnected,
    #[error("server rejected the request: {0}")]
    Rejected(String),
}

/// One authenticated-or-not connection to the game server.
pub struct GameClient {
    stream: TcpStream,
}

impl GameClient {
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to server at {}", addr);
        Ok(GameClient { stream })
    }

    /// Sends one command line without waiting for anything back.
    async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        debug!("-> {}", line);
        self.stream.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Sends one command line and reads exactly one response message.
    async fn request(&mut self, line: &str) -> Result<String, ClientError> {
        self.send(line).await?;
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        debug!("<- {}", reply);
        Ok(reply)
    }

    /// Authenticates the session. `Ok(true)` on `accepted`.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<bool, ClientError> {
        let reply = self
            .request(&format!("login {} {}", username, password))
            .await?;
        Ok(reply == LOGIN_ACCEPTED)
    }

    /// Creates an account. `Ok(true)` on `accepted`; `Ok(false)` means the
    /// username is taken.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<bool, ClientError> {
        let reply = self
            .request(&format!("register {} {}", username, password))
            .await?;
        Ok(reply == LOGIN_ACCEPTED)
    }

    /// Settles and fetches the three stockpile balances.
    pub async fn player_info(&mut self) -> Result<Resources, ClientError> {
        let reply = self.request("get_player_info").await?;
        Ok(protocol::parse_player_info(&reply)?)
    }

    /// Fetches all buildings, empty slots absent.
    pub async fn buildings(&mut self) -> Result<Vec<BuildingEntry>, ClientError> {
        let reply = self.request("get_buildings").await?;
        Ok(protocol::parse_buildings(&reply)?)
    }

    /// Legacy slot upsert; fire-and-forget, the server never answers.
    pub async fn add_building(
        &mut self,
        slot_id: i64,
        kind: BuildingKind,
        stage: u32,
    ) -> Result<(), ClientError> {
        self.send(&format!("add_building {} {} {}", slot_id, kind.tag(), stage))
            .await
    }

    /// Asks the server for a settlement pass; fire-and-forget.
    pub async fn update_player(&mut self) -> Result<(), ClientError> {
        self.send("update_player").await
    }

    /// Places a new building. Returns the construction completion time.
    pub async fn build(&mut self, slot_id: i64, kind: BuildingKind) -> Result<i64, ClientError> {
        let reply = self
            .request(&format!("build {} {}", slot_id, kind.tag()))
            .await?;
        parse_ok_time(&reply)
    }

    /// Starts the next-stage upgrade. Returns the completion time.
    pub async fn upgrade(&mut self, slot_id: i64) -> Result<i64, ClientError> {
        let reply = self.request(&format!("upgrade {}", slot_id)).await?;
        parse_ok_time(&reply)
    }

    /// Tears down the building in a slot.
    pub async fn demolish(&mut self, slot_id: i64) -> Result<(), ClientError> {
        let reply = self.request(&format!("demolish {}", slot_id)).await?;
        if reply == "ok" {
            Ok(())
        } else {
            Err(ClientError::Rejected(reply))
        }
    }

    /// Forwards a raw command line, reading a reply only when the protocol
    /// defines one. Used by the interactive CLI.
    pub async fn raw(&mut self, line: &str) -> Result<Option<String>, ClientError> {
        let command = Command::parse(line)?;
        if command.expects_reply() {
            Ok(Some(self.request(line).await?))
        } else {
            self.send(line).await?;
            Ok(None)
        }
    }
}

fn parse_ok_time(reply: &str) -> Result<i64, ClientError> {
    reply
        .strip_prefix("ok ")
        .and_then(|rest| rest.parse::<i64>().ok())
        .ok_or_else(|| ClientError::Rejected(reply.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_time() {
        assert_eq!(parse_ok_time("ok 12345").unwrap(), 12_345);
        assert!(matches!(
            parse_ok_time("error insufficient resources"),
            Err(ClientError::Rejected(_))
        ));
        assert!(parse_ok_time("ok").is_err());
        assert!(parse_ok_time("ok soon").is_err());
    }

    #[test]
    fn test_raw_rejects_malformed_lines_locally() {
        tokio_test::block_on(async {
            // A malformed line fails in `raw` before reaching the wire, so a
            // listener that never answers is enough for the test.
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let mut client = GameClient::connect(&addr.to_string()).await.unwrap();
            let err = client.raw("login onlyuser").await.unwrap_err();
            assert!(matches!(
                err,
                ClientError::Protocol(ProtocolError::WrongArity { .. })
            ));
        });
    }
}
