//! Decoding of the hexadecimal address fields found in `/proc/net/tcp{,6}`.
//!
//! The kernel prints addresses as `<hex-ip>:<hex-port>`. The IP part is one
//! (IPv4) or four (IPv6) 32-bit words, each in host (little-endian) byte
//! order; the port is plain big-endian hex.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{ExporterError, Result};

/// Address family of a kernel TCP table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Number of hex digits in the IP part of an address field.
    pub fn hex_width(self) -> usize {
        match self {
            AddressFamily::V4 => 8,
            AddressFamily::V6 => 32,
        }
    }

    /// Table file name relative to `<proc>/net`.
    pub fn table_name(self) -> &'static str {
        match self {
            AddressFamily::V4 => "tcp",
            AddressFamily::V6 => "tcp6",
        }
    }
}

/// A decoded socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    pub ip: String,
    pub port: u16,
}

/// Decodes a `<hex-ip>:<hex-port>` field for the given family.
pub fn decode_address(family: AddressFamily, field: &str) -> Result<SocketAddress> {
    let (ip_hex, port_hex) = field
        .split_once(':')
        .ok_or_else(|| ExporterError::MalformedAddress(field.to_string()))?;

    // Checked before slicing: words are cut at byte offsets.
    if ip_hex.len() != family.hex_width() || !is_hex(ip_hex) || !is_hex(port_hex) {
        return Err(ExporterError::MalformedAddress(field.to_string()));
    }

    let port = u16::from_str_radix(port_hex, 16)
        .map_err(|_| ExporterError::MalformedAddress(field.to_string()))?;

    let ip = match family {
        AddressFamily::V4 => {
            let word = parse_word(ip_hex)
                .ok_or_else(|| ExporterError::MalformedAddress(field.to_string()))?;
            Ipv4Addr::from(word.to_le_bytes()).to_string()
        }
        AddressFamily::V6 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = parse_word(&ip_hex[i * 8..i * 8 + 8])
                    .ok_or_else(|| ExporterError::MalformedAddress(field.to_string()))?;
                chunk.copy_from_slice(&word.to_le_bytes());
            }
            Ipv6Addr::from(octets).to_string()
        }
    };

    Ok(SocketAddress { ip, port })
}

/// Non-empty and hex digits only; `from_str_radix` alone accepts a sign.
fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parses eight hex digits as the native-order word the kernel printed.
fn parse_word(hex: &str) -> Option<u32> {
    if hex.len() != 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Returns true if `ip` denotes "no peer": the IPv4 wildcard, or an address
/// that is empty or `1` once surrounding colons are trimmed (`::`, `::1`).
pub fn is_unconnected_peer(ip: &str) -> bool {
    if ip == "0.0.0.0" {
        return true;
    }
    let trimmed = ip.trim_matches(':');
    trimmed.is_empty() || trimmed == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ipv4_loopback() {
        let addr = decode_address(AddressFamily::V4, "0100007F:0CEA").unwrap();
        assert_eq!(addr.ip, "127.0.0.1");
        assert_eq!(addr.port, 3306);
    }

    #[test]
    fn test_decode_ipv4_wildcard() {
        let addr = decode_address(AddressFamily::V4, "00000000:0000").unwrap();
        assert_eq!(addr.ip, "0.0.0.0");
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn test_decode_ipv4_private_address() {
        // 192.168.1.10 stored little-endian
        let addr = decode_address(AddressFamily::V4, "0A01A8C0:01BB").unwrap();
        assert_eq!(addr.ip, "192.168.1.10");
        assert_eq!(addr.port, 443);
    }

    #[test]
    fn test_decode_ipv6_any_and_loopback() {
        let any =
            decode_address(AddressFamily::V6, "00000000000000000000000000000000:1F90").unwrap();
        assert_eq!(any.ip, "::");
        assert_eq!(any.port, 8080);

        let lo =
            decode_address(AddressFamily::V6, "00000000000000000000000001000000:0016").unwrap();
        assert_eq!(lo.ip, "::1");
        assert_eq!(lo.port, 22);
    }

    #[test]
    fn test_decode_ipv6_global_address() {
        // 2001:db8::1
        let addr =
            decode_address(AddressFamily::V6, "B80D0120000000000000000001000000:0050").unwrap();
        assert_eq!(addr.ip, "2001:db8::1");
        assert_eq!(addr.port, 80);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        assert!(decode_address(AddressFamily::V4, "0100007F00:0016").is_err());
        assert!(decode_address(AddressFamily::V6, "0100007F:0016").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        assert!(matches!(
            decode_address(AddressFamily::V4, "0100007G:0016"),
            Err(ExporterError::MalformedAddress(_))
        ));
        assert!(decode_address(AddressFamily::V4, "0100007F:XYZ").is_err());
        assert!(decode_address(AddressFamily::V4, "0100007F").is_err());
        assert!(decode_address(AddressFamily::V4, "0100007F:").is_err());
    }

    #[test]
    fn test_decode_rejects_signed_fields() {
        assert!(matches!(
            decode_address(AddressFamily::V4, "+100007F:0050"),
            Err(ExporterError::MalformedAddress(_))
        ));
        assert!(decode_address(AddressFamily::V4, "0100007F:+050").is_err());
    }

    #[test]
    fn test_decode_rejects_multibyte_chars() {
        // 32 bytes wide, but 'é' straddles the first word boundary.
        let field = ["0000000\u{e9}", &"0".repeat(23), ":0050"].concat();
        assert_eq!(field.split(':').next().map(str::len), Some(32));
        assert!(matches!(
            decode_address(AddressFamily::V6, &field),
            Err(ExporterError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_unconnected_peer_heuristic() {
        assert!(is_unconnected_peer("0.0.0.0"));
        assert!(is_unconnected_peer("::"));
        assert!(is_unconnected_peer("::1"));
        assert!(!is_unconnected_peer("127.0.0.1"));
        assert!(!is_unconnected_peer("10.0.0.5"));
        assert!(!is_unconnected_peer("2001:db8::1"));
    }
}
