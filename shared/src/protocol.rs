//! Text command protocol
//!
//! One message is one socket read: a line of whitespace-delimited tokens, at
//! most [`MAX_MESSAGE_LEN`](crate::MAX_MESSAGE_LEN) bytes. The first token
//! selects the command and the argument count must match exactly. Responses
//! are single text lines; `get_buildings` renders each building as a
//! `(id, slot, 'kind', stage)` tuple joined with `^^`, matching what deployed
//! clients already parse.
//!
//! Building-type tags are carried as raw strings here and resolved against
//! the catalog at dispatch time, so an unknown type is a domain failure
//! rather than a parse failure.

use crate::catalog::BuildingKind;
use crate::{Resources, BUILDING_SEPARATOR, EMPTY_BUILDINGS};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("`{command}` takes {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("malformed argument `{0}`")]
    BadArgument(String),
    #[error("malformed response `{0}`")]
    BadResponse(String),
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    Register { username: String, password: String },
    GetPlayerInfo,
    GetBuildings,
    AddBuilding { slot_id: i64, kind: String, stage: u32 },
    UpdatePlayer,
    Build { slot_id: i64, kind: String },
    Upgrade { slot_id: i64 },
    Demolish { slot_id: i64 },
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(ProtocolError::Empty)?;
        let args: Vec<&str> = tokens.collect();

        match name {
            "login" => {
                expect_arity("login", &args, 2)?;
                Ok(Command::Login {
                    username: args[0].to_string(),
                    password: args[1].to_string(),
                })
            }
            "register" => {
                expect_arity("register", &args, 2)?;
                Ok(Command::Register {
                    username: args[0].to_string(),
                    password: args[1].to_string(),
                })
            }
            "get_player_info" => {
                expect_arity("get_player_info", &args, 0)?;
                Ok(Command::GetPlayerInfo)
            }
            "get_buildings" => {
                expect_arity("get_buildings", &args, 0)?;
                Ok(Command::GetBuildings)
            }
            "add_building" => {
                expect_arity("add_building", &args, 3)?;
                Ok(Command::AddBuilding {
                    slot_id: parse_token(args[0])?,
                    kind: args[1].to_string(),
                    stage: parse_token(args[2])?,
                })
            }
            "update_player" => {
                expect_arity("update_player", &args, 0)?;
                Ok(Command::UpdatePlayer)
            }
            "build" => {
                expect_arity("build", &args, 2)?;
                Ok(Command::Build {
                    slot_id: parse_token(args[0])?,
                    kind: args[1].to_string(),
                })
            }
            "upgrade" => {
                expect_arity("upgrade", &args, 1)?;
                Ok(Command::Upgrade {
                    slot_id: parse_token(args[0])?,
                })
            }
            "demolish" => {
                expect_arity("demolish", &args, 1)?;
                Ok(Command::Demolish {
                    slot_id: parse_token(args[0])?,
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Whether the server answers this command at all. `add_building` and
    /// `update_player` are fire-and-forget: deployed clients never read after
    /// sending them, so a reply would desync their next read.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Command::AddBuilding { .. } | Command::UpdatePlayer)
    }

    /// Whether this command requires an authenticated session.
    pub fn needs_auth(&self) -> bool {
        !matches!(self, Command::Login { .. } | Command::Register { .. })
    }
}

fn expect_arity(
    command: &'static str,
    args: &[&str],
    expected: usize,
) -> Result<(), ProtocolError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::WrongArity {
            command,
            expected,
            got: args.len(),
        })
    }
}

fn parse_token<T: FromStr>(token: &str) -> Result<T, ProtocolError> {
    token
        .parse()
        .map_err(|_| ProtocolError::BadArgument(token.to_string()))
}

/// One building as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildingEntry {
    pub id: i64,
    pub slot_id: i64,
    pub kind: BuildingKind,
    pub stage: u32,
}

pub fn format_player_info(resources: &Resources) -> String {
    format!("{} {} {}", resources.food, resources.steel, resources.energy)
}

pub fn parse_player_info(payload: &str) -> Result<Resources, ProtocolError> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(ProtocolError::BadResponse(payload.to_string()));
    }
    Ok(Resources::new(
        parse_token(fields[0])?,
        parse_token(fields[1])?,
        parse_token(fields[2])?,
    ))
}

pub fn format_buildings(entries: &[BuildingEntry]) -> String {
    if entries.is_empty() {
        return EMPTY_BUILDINGS.to_string();
    }
    entries
        .iter()
        .map(|e| format!("({}, {}, '{}', {})", e.id, e.slot_id, e.kind.tag(), e.stage))
        .collect::<Vec<_>>()
        .join(BUILDING_SEPARATOR)
}

pub fn parse_buildings(payload: &str) -> Result<Vec<BuildingEntry>, ProtocolError> {
    let payload = payload.trim();
    if payload.is_empty() || payload == EMPTY_BUILDINGS {
        return Ok(Vec::new());
    }
    payload
        .split(BUILDING_SEPARATOR)
        .map(parse_building_entry)
        .collect()
}

fn parse_building_entry(tuple: &str) -> Result<BuildingEntry, ProtocolError> {
    let bad = || ProtocolError::BadResponse(tuple.to_string());
    let inner = tuple
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(bad)?;

    let fields: Vec<&str> = inner.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(bad());
    }

    let kind = fields[2]
        .trim_matches('\'')
        .parse::<BuildingKind>()
        .map_err(|_| bad())?;

    Ok(BuildingEntry {
        id: parse_token(fields[0])?,
        slot_id: parse_token(fields[1])?,
        kind,
        stage: parse_token(fields[3])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let cmd = Command::parse("login testuser testpass").unwrap();
        assert_eq!(
            cmd,
            Command::Login {
                username: "testuser".to_string(),
                password: "testpass".to_string(),
            }
        );
        assert!(cmd.expects_reply());
        assert!(!cmd.needs_auth());
    }

    #[test]
    fn test_parse_no_arg_commands() {
        assert_eq!(
            Command::parse("get_player_info").unwrap(),
            Command::GetPlayerInfo
        );
        assert_eq!(Command::parse("get_buildings").unwrap(), Command::GetBuildings);
        assert_eq!(Command::parse("update_player").unwrap(), Command::UpdatePlayer);
    }

    #[test]
    fn test_parse_add_building() {
        let cmd = Command::parse("add_building 2 plantation 1").unwrap();
        assert_eq!(
            cmd,
            Command::AddBuilding {
                slot_id: 2,
                kind: "plantation".to_string(),
                stage: 1,
            }
        );
        // Fire-and-forget: the client never reads a reply to this.
        assert!(!cmd.expects_reply());
        assert!(cmd.needs_auth());
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        let err = Command::parse("login onlyuser").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::WrongArity {
                command: "login",
                expected: 2,
                got: 1,
            }
        );
        assert!(Command::parse("get_player_info now").is_err());
        assert!(Command::parse("add_building 1 plantation").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        assert_eq!(
            Command::parse("teleport 1 2"),
            Err(ProtocolError::UnknownCommand("teleport".to_string()))
        );
        assert_eq!(Command::parse("   "), Err(ProtocolError::Empty));
    }

    #[test]
    fn test_parse_rejects_malformed_integers() {
        assert_eq!(
            Command::parse("upgrade two"),
            Err(ProtocolError::BadArgument("two".to_string()))
        );
        assert!(Command::parse("add_building 1 plantation -3").is_err());
    }

    #[test]
    fn test_unknown_building_kind_is_not_a_parse_error() {
        // Kind tags resolve against the catalog at dispatch, not here.
        let cmd = Command::parse("add_building 1 monorail 1").unwrap();
        assert_eq!(
            cmd,
            Command::AddBuilding {
                slot_id: 1,
                kind: "monorail".to_string(),
                stage: 1,
            }
        );
    }

    #[test]
    fn test_player_info_roundtrip() {
        let res = Resources::new(10_000, 10_000, 0);
        let line = format_player_info(&res);
        assert_eq!(line, "10000 10000 0");
        assert_eq!(parse_player_info(&line).unwrap(), res);
        assert!(parse_player_info("10 20").is_err());
        assert!(parse_player_info("10 20 x").is_err());
    }

    #[test]
    fn test_format_buildings_matches_deployed_clients() {
        let entries = [
            BuildingEntry {
                id: 1,
                slot_id: 1,
                kind: BuildingKind::Plantation,
                stage: 1,
            },
            BuildingEntry {
                id: 2,
                slot_id: 2,
                kind: BuildingKind::Cabins,
                stage: 1,
            },
        ];
        assert_eq!(
            format_buildings(&entries),
            "(1, 1, 'plantation', 1)^^(2, 2, 'cabins', 1)"
        );
    }

    #[test]
    fn test_parse_buildings_roundtrip() {
        let payload = "(1, 1, 'plantation', 1)^^(2, 2, 'cabins', 1)";
        let entries = parse_buildings(payload).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].slot_id, 1);
        assert_eq!(entries[0].kind, BuildingKind::Plantation);
        assert_eq!(entries[1].kind, BuildingKind::Cabins);
        assert_eq!(format_buildings(&entries), payload);
    }

    #[test]
    fn test_empty_building_list() {
        assert_eq!(format_buildings(&[]), EMPTY_BUILDINGS);
        assert_eq!(parse_buildings(EMPTY_BUILDINGS).unwrap(), Vec::new());
        assert_eq!(parse_buildings("").unwrap(), Vec::new());
    }

    #[test]
    fn test_parse_buildings_rejects_garbage() {
        assert!(parse_buildings("(1, 1, 'plantation')").is_err());
        assert!(parse_buildings("1, 1, 'plantation', 1").is_err());
        assert!(parse_buildings("(1, 1, 'monorail', 1)").is_err());
    }
}
