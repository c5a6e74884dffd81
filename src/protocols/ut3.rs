// src/protocols/ut3.rs
//! UT3 / GameSpy4 style query: a handshake that yields a challenge token,
//! followed by a full status request authorised by that token.
//!
//! Wire layout:
//! - handshake request  `FE FD 09 <session:4>`
//! - handshake response `[type:1][session:4][token ascii, NUL padded]`
//! - status request     `FE FD 00 <session:4><token:4 BE signed> FF FF FF 01`
//! - status response    `[type:1][session:4][padding:11][kv block]00 00 01 "player_" 00 00[players]`

use async_trait::async_trait;
use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

use super::{connect_udp, recv, send, QueryClient, QueryError};
use crate::models::server::QueryResult;

const MAGIC: [u8; 2] = [0xFE, 0xFD];
const HANDSHAKE: u8 = 0x09;
const STATUS: u8 = 0x00;
const FULL_STAT: [u8; 4] = [0xFF, 0xFF, 0xFF, 0x01];
const HANDSHAKE_HEADER_LEN: usize = 5;
const STATUS_HEADER_LEN: usize = 16;
const PLAYER_SENTINEL: &str = "\u{0}\u{0}\u{1}player_\u{0}\u{0}";

#[derive(Debug, Default)]
pub struct Ut3Query;

impl Ut3Query {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueryClient for Ut3Query {
    fn name(&self) -> &'static str {
        "UT3Query"
    }

    async fn query(&self, addr: &str, port: u16, timeout: Duration) -> Result<QueryResult, QueryError> {
        // Session ids are masked the way GameSpy4 servers expect.
        let session: u32 = rand::thread_rng().gen::<u32>() & 0x0F0F_0F0F;
        let session = session.to_be_bytes();

        let socket = connect_udp(addr, port).await?;

        send(&socket, &handshake_request(session)).await?;
        let response = recv(&socket, timeout).await?;
        let token = parse_challenge(&response)?;
        debug!("Received challenge token {} from {}:{}", token, addr, port);

        send(&socket, &status_request(session, token)).await?;
        let response = recv(&socket, timeout).await?;

        parse_status(&response, addr, port)
    }
}

pub fn handshake_request(session: [u8; 4]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(7);
    packet.extend_from_slice(&MAGIC);
    packet.push(HANDSHAKE);
    packet.extend_from_slice(&session);
    packet
}

pub fn status_request(session: [u8; 4], token: i32) -> Vec<u8> {
    let mut packet = Vec::with_capacity(15);
    packet.extend_from_slice(&MAGIC);
    packet.push(STATUS);
    packet.extend_from_slice(&session);
    // Writing into a Vec cannot fail.
    let _ = packet.write_i32::<BigEndian>(token);
    packet.extend_from_slice(&FULL_STAT);
    packet
}

/// Decodes the challenge token carried as NUL padded ASCII digits.
pub fn parse_challenge(response: &[u8]) -> Result<i32, QueryError> {
    if response.len() <= HANDSHAKE_HEADER_LEN {
        return Err(QueryError::MalformedResponse(format!(
            "Handshake response too short ({} bytes)",
            response.len()
        )));
    }

    let text = std::str::from_utf8(&response[HANDSHAKE_HEADER_LEN..])
        .map_err(|_| QueryError::MalformedResponse("Challenge token is not ASCII".to_string()))?;
    let text = text.trim_matches('\0');

    text.parse::<i32>()
        .map_err(|_| QueryError::MalformedResponse(format!("Invalid challenge token: {:?}", text)))
}

pub fn parse_status(response: &[u8], addr: &str, port: u16) -> Result<QueryResult, QueryError> {
    if response.len() < STATUS_HEADER_LEN {
        return Err(QueryError::MalformedResponse(format!(
            "Status response too short ({} bytes)",
            response.len()
        )));
    }

    let body = std::str::from_utf8(&response[STATUS_HEADER_LEN..])
        .map_err(|_| QueryError::MalformedResponse("Status payload is not UTF-8".to_string()))?;

    let (kv_block, player_block) = match body.split_once(PLAYER_SENTINEL) {
        Some((kv, players)) => (kv, Some(players)),
        None => (body, None),
    };

    let mut rules = parse_key_values(kv_block)?;
    let mut result = QueryResult {
        addr: addr.to_string(),
        port,
        ..QueryResult::default()
    };

    if let Some(name) = rules.remove("hostname") {
        result.name = name;
    }
    if let Some(map) = take_any(&mut rules, &["map", "mapname"]) {
        result.map = map;
    }
    if let Some(game) = take_any(&mut rules, &["game_id", "gamename", "gametype"]) {
        result.game = game;
    }
    if let Some(players) = take_any(&mut rules, &["numplayers"]) {
        result.players = parse_number("numplayers", &players)?;
    }
    if let Some(max_players) = take_any(&mut rules, &["maxplayers"]) {
        result.max_players = parse_number("maxplayers", &max_players)?;
    }
    if let Some(bots) = take_any(&mut rules, &["numbots", "bots"]) {
        result.bots = parse_number("numbots", &bots)?;
    }
    if let Some(password) = rules.remove("password") {
        result.password = matches!(password.as_str(), "1" | "true" | "True");
    }
    if let Some(host_ip) = rules.remove("hostip") {
        if !host_ip.is_empty() {
            result.addr = host_ip;
        }
    }
    if let Some(host_port) = rules.remove("hostport") {
        result.port = host_port
            .parse()
            .map_err(|_| QueryError::MalformedResponse(format!("Invalid hostport: {:?}", host_port)))?;
    }

    if let Some(players) = player_block {
        // An empty name ends the block; `score_`, `team_` and friends may follow.
        result.players_list = players
            .split('\0')
            .take_while(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
    }
    result.rules = rules;

    Ok(result)
}

/// Splits a NUL separated `key, value, key, value, ...` block. Later keys win.
pub fn parse_key_values(block: &str) -> Result<HashMap<String, String>, QueryError> {
    if block.is_empty() {
        return Err(QueryError::MalformedResponse("Empty key/value block".to_string()));
    }

    let items: Vec<&str> = block.split('\0').collect();
    if items.len() % 2 != 0 {
        return Err(QueryError::MalformedResponse(format!(
            "Odd number of key/value elements ({})",
            items.len()
        )));
    }

    Ok(items
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

fn take_any(rules: &mut HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| rules.remove(*key))
}

fn parse_number(field: &str, value: &str) -> Result<u32, QueryError> {
    value
        .trim()
        .parse()
        .map_err(|_| QueryError::MalformedResponse(format!("Non-numeric {}: {:?}", field, value)))
}
