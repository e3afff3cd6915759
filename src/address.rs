use thiserror::Error;

use crate::cursor::ByteCursor;

pub const ATYP_IPV4: u8 = 1;
pub const ATYP_DOMAIN: u8 = 2;
pub const ATYP_IPV6: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address field truncated")]
    Truncated,
    #[error("unknown address type {0}")]
    UnknownType(u8),
    #[error("resolved address is empty")]
    Empty,
    #[error("domain name is not valid UTF-8")]
    BadDomain,
}

/// Decodes the variable-length address field at the cursor's position.
///
/// IPv4 is rendered dotted-decimal, domains are decoded as UTF-8, and IPv6
/// is rendered as eight plain big-endian hex groups joined with `:` (no
/// RFC 5952 zero compression).
pub fn parse_address(cursor: &mut ByteCursor<'_>, address_type: u8) -> Result<String, AddressError> {
    let address = match address_type {
        ATYP_IPV4 => {
            let octets = cursor.read_bytes(4).ok_or(AddressError::Truncated)?;
            octets
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".")
        }
        ATYP_DOMAIN => {
            let len = cursor.read_u8().ok_or(AddressError::Truncated)? as usize;
            let bytes = cursor.read_bytes(len).ok_or(AddressError::Truncated)?;
            std::str::from_utf8(bytes)
                .map_err(|_| AddressError::BadDomain)?
                .to_string()
        }
        ATYP_IPV6 => {
            let bytes = cursor.read_bytes(16).ok_or(AddressError::Truncated)?;
            let groups: Vec<String> = bytes
                .chunks_exact(2)
                .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect();
            groups.join(":")
        }
        other => return Err(AddressError::UnknownType(other)),
    };

    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(address_type: u8, bytes: &[u8]) -> Result<String, AddressError> {
        let mut cursor = ByteCursor::new(bytes);
        parse_address(&mut cursor, address_type)
    }

    #[test]
    fn ipv4_dotted_decimal() {
        assert_eq!(parse(ATYP_IPV4, &[192, 168, 1, 1]).unwrap(), "192.168.1.1");
    }

    #[test]
    fn domain_decodes_exact_utf8() {
        let mut bytes = vec![9];
        bytes.extend_from_slice(b"example.c");
        assert_eq!(parse(ATYP_DOMAIN, &bytes).unwrap(), "example.c");
    }

    #[test]
    fn ipv6_zero_is_eight_plain_groups() {
        assert_eq!(parse(ATYP_IPV6, &[0; 16]).unwrap(), "0:0:0:0:0:0:0:0");
    }

    #[test]
    fn ipv6_groups_are_big_endian_hex() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0x20;
        bytes[1] = 0x01;
        bytes[2] = 0x0d;
        bytes[3] = 0xb8;
        let parsed = parse(ATYP_IPV6, &bytes).unwrap();
        assert_eq!(parsed, "2001:db8:0:0:0:0:0:0");
    }

    #[test]
    fn unknown_type_rejected() {
        assert_eq!(parse(4, &[0; 16]), Err(AddressError::UnknownType(4)));
    }

    #[test]
    fn empty_domain_rejected() {
        assert_eq!(parse(ATYP_DOMAIN, &[0]), Err(AddressError::Empty));
    }

    #[test]
    fn truncated_ipv4_rejected() {
        assert_eq!(parse(ATYP_IPV4, &[10, 0]), Err(AddressError::Truncated));
    }
}
