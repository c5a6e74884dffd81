// src/protocols/source.rs
//! Source engine `A2S_INFO` query.

use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use std::io::{BufRead, Cursor};
use std::time::Duration;

use super::{connect_udp, recv, send, QueryClient, QueryError};
use crate::models::server::QueryResult;

const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const EDF_PORT: u8 = 0x80;

#[derive(Debug, Default)]
pub struct SourceQuery;

impl SourceQuery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueryClient for SourceQuery {
    fn name(&self) -> &'static str {
        "SourceQuery"
    }

    async fn query(&self, addr: &str, port: u16, timeout: Duration) -> Result<QueryResult, QueryError> {
        let socket = connect_udp(addr, port).await?;

        send(&socket, &info_request(None)).await?;
        let mut response = recv(&socket, timeout).await?;

        // Newer servers answer the first request with a challenge that must be echoed.
        if let Some(challenge) = parse_challenge(&response)? {
            debug!("Received A2S challenge from {}:{}", addr, port);
            send(&socket, &info_request(Some(challenge))).await?;
            response = recv(&socket, timeout).await?;
        }

        parse_info(&response, addr, port)
    }
}

pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&SIMPLE_HEADER);
    packet.push(A2S_INFO);
    packet.extend_from_slice(INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        packet.extend_from_slice(&challenge);
    }
    packet
}

/// Returns the challenge bytes if `response` is an `S2C_CHALLENGE` packet.
pub fn parse_challenge(response: &[u8]) -> Result<Option<[u8; 4]>, QueryError> {
    if response.len() < 5 || response[..4] != SIMPLE_HEADER {
        return Err(QueryError::MalformedResponse(
            "Missing simple response header".to_string(),
        ));
    }
    if response[4] != S2C_CHALLENGE {
        return Ok(None);
    }
    if response.len() < 9 {
        return Err(QueryError::MalformedResponse("Truncated challenge".to_string()));
    }
    let mut challenge = [0u8; 4];
    challenge.copy_from_slice(&response[5..9]);
    Ok(Some(challenge))
}

pub fn parse_info(response: &[u8], addr: &str, port: u16) -> Result<QueryResult, QueryError> {
    if response.len() < 5 || response[..4] != SIMPLE_HEADER || response[4] != S2A_INFO {
        return Err(QueryError::MalformedResponse("Not an A2S_INFO response".to_string()));
    }

    let truncated = |_: std::io::Error| QueryError::MalformedResponse("Truncated A2S_INFO response".to_string());
    let mut cursor = Cursor::new(&response[5..]);

    let _protocol = cursor.read_u8().map_err(truncated)?;
    let name = read_cstring(&mut cursor)?;
    let map = read_cstring(&mut cursor)?;
    let folder = read_cstring(&mut cursor)?;
    let game = read_cstring(&mut cursor)?;
    let app_id = cursor.read_i16::<LittleEndian>().map_err(truncated)?;
    let players = cursor.read_u8().map_err(truncated)?;
    let max_players = cursor.read_u8().map_err(truncated)?;
    let bots = cursor.read_u8().map_err(truncated)?;
    let server_type = cursor.read_u8().map_err(truncated)?;
    let environment = cursor.read_u8().map_err(truncated)?;
    let visibility = cursor.read_u8().map_err(truncated)?;
    let vac = cursor.read_u8().map_err(truncated)?;
    let version = read_cstring(&mut cursor)?;

    let mut result = QueryResult {
        name,
        map,
        game,
        players: u32::from(players),
        max_players: u32::from(max_players),
        bots: u32::from(bots),
        password: visibility == 1,
        addr: addr.to_string(),
        port,
        ..QueryResult::default()
    };

    // Extra data flag is optional; only the game port matters to us.
    if let Ok(edf) = cursor.read_u8() {
        if edf & EDF_PORT != 0 {
            result.port = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        }
    }

    result.rules.insert("folder".to_string(), folder);
    result.rules.insert("appid".to_string(), app_id.to_string());
    result.rules.insert("server_type".to_string(), char::from(server_type).to_string());
    result.rules.insert("environment".to_string(), char::from(environment).to_string());
    result.rules.insert("vac".to_string(), vac.to_string());
    result.rules.insert("version".to_string(), version);

    Ok(result)
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String, QueryError> {
    let mut bytes = Vec::new();
    cursor
        .read_until(0, &mut bytes)
        .map_err(|e| QueryError::MalformedResponse(e.to_string()))?;
    if bytes.pop() != Some(0) {
        return Err(QueryError::MalformedResponse("Unterminated string".to_string()));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
