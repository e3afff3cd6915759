use thiserror::Error;

use crate::address::{self, AddressError};
use crate::cursor::ByteCursor;

/// Shortest possible handshake: version + client ID + options-length byte,
/// with at least the command/port/address-type bytes still to come.
pub const MIN_HEADER_LEN: usize = 24;

pub const CMD_TCP: u8 = 1;
pub const CMD_UDP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("handshake header truncated")]
    Truncated,
    #[error("client ID not in accepted list")]
    InvalidUser,
    #[error("command {0} is not supported (01-tcp, 02-udp)")]
    UnsupportedCommand(u8),
    #[error("bad destination address: {0}")]
    BadAddress(#[from] AddressError),
}

/// Routing instructions carried by the first inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub version: u8,
    pub command: Command,
    pub port: u16,
    pub address: String,
    /// Offset into the first frame where client payload begins. Bytes
    /// before this offset are the handshake and are never forwarded.
    pub payload_offset: usize,
}

impl ConnectionRequest {
    /// The 2-byte acknowledgment prepended to the first chunk sent back.
    #[must_use]
    pub fn response_header(&self) -> [u8; 2] {
        [self.version, 0]
    }
}

/// Parses the handshake header off the front of the first inbound frame.
///
/// Validation is strict left-to-right; any underrun or unknown discriminant
/// fails the whole parse and no partial request is ever returned.
pub fn parse_header(
    buf: &[u8],
    accepted_ids: &[[u8; 16]],
) -> Result<ConnectionRequest, HeaderError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(HeaderError::Truncated);
    }

    let mut cursor = ByteCursor::new(buf);
    let version = cursor.read_u8().ok_or(HeaderError::Truncated)?;

    let client_id = cursor.read_bytes(16).ok_or(HeaderError::Truncated)?;
    if !accepted_ids.iter().any(|id| id.as_slice() == client_id) {
        return Err(HeaderError::InvalidUser);
    }

    let options_len = cursor.read_u8().ok_or(HeaderError::Truncated)? as usize;
    cursor.skip(options_len).ok_or(HeaderError::Truncated)?;

    let command = match cursor.read_u8().ok_or(HeaderError::Truncated)? {
        CMD_TCP => Command::Tcp,
        CMD_UDP => Command::Udp,
        other => return Err(HeaderError::UnsupportedCommand(other)),
    };

    let port = cursor.read_u16_be().ok_or(HeaderError::Truncated)?;
    let address_type = cursor.read_u8().ok_or(HeaderError::Truncated)?;
    let address = address::parse_address(&mut cursor, address_type)?;

    Ok(ConnectionRequest {
        version,
        command,
        port,
        address,
        payload_offset: cursor.position(),
    })
}

/// Parses a comma-separated list of UUIDs into raw 16-byte client IDs.
pub fn parse_accepted_ids(list: &str) -> anyhow::Result<Vec<[u8; 16]>> {
    use anyhow::Context;

    let mut ids = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let id = uuid::Uuid::parse_str(entry)
            .with_context(|| format!("Invalid client ID in config: {entry}"))?;
        ids.push(*id.as_bytes());
    }
    anyhow::ensure!(!ids.is_empty(), "No accepted client IDs configured");
    Ok(ids)
}

/// Inverse of the codec, used by tests to build synthetic handshakes.
#[cfg(test)]
pub fn encode_header(
    id: &[u8; 16],
    options: &[u8],
    command: u8,
    port: u16,
    address_type: u8,
    address_bytes: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = vec![0u8];
    buf.extend_from_slice(id);
    buf.push(options.len() as u8);
    buf.extend_from_slice(options);
    buf.push(command);
    buf.extend_from_slice(&port.to_be_bytes());
    buf.push(address_type);
    if address_type == crate::address::ATYP_DOMAIN {
        buf.push(address_bytes.len() as u8);
    }
    buf.extend_from_slice(address_bytes);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
pub const TEST_CLIENT_ID: [u8; 16] = [
    0x29, 0x82, 0xf1, 0x22, 0x96, 0x49, 0x40, 0xdc, 0xbc, 0x15, 0xfa, 0x3e, 0xc9, 0x1d, 0x89,
    0x21,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};

    const CLIENT_ID: [u8; 16] = TEST_CLIENT_ID;

    fn accepted() -> Vec<[u8; 16]> {
        vec![CLIENT_ID]
    }

    #[test]
    fn payload_offset_matches_consumed_bytes() {
        let payload = b"GET / HTTP/1.1\r\n";
        let frame = encode_header(
            &CLIENT_ID,
            &[0xAA, 0xBB],
            CMD_TCP,
            443,
            ATYP_IPV4,
            &[1, 2, 3, 4],
            payload,
        );
        let request = parse_header(&frame, &accepted()).unwrap();
        assert_eq!(request.payload_offset, frame.len() - payload.len());
        assert_eq!(&frame[request.payload_offset..], payload);
    }

    #[test]
    fn round_trips_address_port_command() {
        let frame = encode_header(
            &CLIENT_ID,
            &[],
            CMD_TCP,
            8080,
            ATYP_DOMAIN,
            b"example.com",
            &[],
        );
        let request = parse_header(&frame, &accepted()).unwrap();
        assert_eq!(request.command, Command::Tcp);
        assert_eq!(request.port, 8080);
        assert_eq!(request.address, "example.com");
        assert_eq!(request.response_header(), [0, 0]);
    }

    #[test]
    fn unknown_client_id_is_invalid_user() {
        let frame = encode_header(
            &[0xFF; 16],
            &[],
            CMD_TCP,
            80,
            ATYP_IPV4,
            &[1, 2, 3, 4],
            &[],
        );
        assert_eq!(
            parse_header(&frame, &accepted()),
            Err(HeaderError::InvalidUser)
        );
    }

    #[test]
    fn second_accepted_id_matches() {
        let other = [0x42; 16];
        let frame = encode_header(&other, &[], CMD_TCP, 80, ATYP_IPV4, &[1, 2, 3, 4], &[]);
        let ids = vec![CLIENT_ID, other];
        assert!(parse_header(&frame, &ids).is_ok());
    }

    #[test]
    fn short_buffer_is_truncated() {
        assert_eq!(
            parse_header(&[0u8; MIN_HEADER_LEN - 1], &accepted()),
            Err(HeaderError::Truncated)
        );
    }

    #[test]
    fn options_length_past_end_is_truncated() {
        let mut frame = encode_header(&CLIENT_ID, &[], CMD_TCP, 80, ATYP_IPV4, &[1, 2, 3, 4], &[]);
        frame[17] = 0xFF;
        assert_eq!(
            parse_header(&frame, &accepted()),
            Err(HeaderError::Truncated)
        );
    }

    #[test]
    fn mux_command_is_unsupported() {
        let frame = encode_header(&CLIENT_ID, &[], 3, 80, ATYP_IPV4, &[1, 2, 3, 4], &[]);
        assert_eq!(
            parse_header(&frame, &accepted()),
            Err(HeaderError::UnsupportedCommand(3))
        );
    }

    #[test]
    fn bad_address_type_is_bad_address() {
        let frame = encode_header(&CLIENT_ID, &[], CMD_TCP, 80, 9, &[0; 16], &[]);
        assert!(matches!(
            parse_header(&frame, &accepted()),
            Err(HeaderError::BadAddress(_))
        ));
    }

    #[test]
    fn ipv6_address_renders_plain_groups() {
        let frame = encode_header(&CLIENT_ID, &[], CMD_UDP, 53, ATYP_IPV6, &[0; 16], &[]);
        let request = parse_header(&frame, &accepted()).unwrap();
        assert_eq!(request.command, Command::Udp);
        assert_eq!(request.address, "0:0:0:0:0:0:0:0");
    }

    #[test]
    fn parses_comma_separated_id_list() {
        let ids =
            parse_accepted_ids("2982f122-9649-40dc-bc15-fa3ec91d8921, 00000000-0000-0000-0000-000000000001")
                .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], CLIENT_ID);
    }

    #[test]
    fn rejects_garbage_id_list() {
        assert!(parse_accepted_ids("not-a-uuid").is_err());
        assert!(parse_accepted_ids("").is_err());
    }
}
