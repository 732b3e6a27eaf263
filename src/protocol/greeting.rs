use crate::constant::{CapabilityFlags, SCRAMBLE_LENGTH, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::read_err;

/// Initial greeting from the server (Protocol::HandshakeV10).
///
/// Packet format:
/// ```text
/// 1   protocol version (10)
/// n   server version (null-terminated string)
/// 4   thread id
/// 8   scramble part 1
/// 1   [00] filler
/// 2   capability flags (lower 2 bytes)
/// 1   character set
/// 2   status flags
/// 2   capability flags (upper 2 bytes)
/// 1   scramble length
/// 10  reserved (all 0x00)
/// n   scramble part 2 (null-terminated)
/// n   auth plugin name (null-terminated, if CLIENT_PLUGIN_AUTH)
/// ```
#[derive(Debug, Clone)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: [u8; SCRAMBLE_LENGTH],
    pub server_capabilities: CapabilityFlags,
    pub charset_no: u8,
    pub server_status: ServerStatusFlags,
    pub auth_plugin_name: Option<String>,
}

/// Parse the server greeting.
///
/// A 0xFF first byte is an ERR packet sent instead of a greeting (e.g. the
/// host is blocked); anything older than the 4.1 protocol is refused.
pub fn read_greeting(payload: &[u8]) -> Result<Greeting> {
    let (protocol_version, data) = read_int_1(payload)?;

    if protocol_version == 0xFF {
        return Err(Error::Server(read_err(payload)?));
    }

    let (server_version_bytes, data) = read_string_null(data)?;
    let server_version = String::from_utf8_lossy(server_version_bytes).into_owned();

    let (thread_id, data) = read_int_4(data)?;
    let (scramble_1, data) = read_bytes_fix(data, 8)?;
    let (_filler, data) = read_int_1(data)?;
    let (cap_lower, data) = read_int_2(data)?;

    // A 3.23/4.0 server stops here. The capability check below rejects it,
    // but only if we don't trip over the short payload first.
    if data.is_empty() {
        return Err(pre_41_refusal(&server_version));
    }

    let (charset_no, data) = read_int_1(data)?;
    let (status, data) = read_int_2(data)?;
    let (cap_upper, data) = read_int_2(data)?;
    let (scramble_len, data) = read_int_1(data)?;
    let (_reserved, data) = read_bytes_fix(data, 10)?;

    let server_capabilities = CapabilityFlags::from_bits_retain(
        (u32::from(cap_upper) << 16) | u32::from(cap_lower),
    );

    if !server_capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        return Err(pre_41_refusal(&server_version));
    }

    let part2_len = usize::from(scramble_len).saturating_sub(9).max(12);
    let (scramble_2, data) = read_bytes_fix(data, part2_len)?;

    let mut scramble = [0_u8; SCRAMBLE_LENGTH];
    scramble[..8].copy_from_slice(scramble_1);
    let tail = (SCRAMBLE_LENGTH - 8).min(scramble_2.len());
    scramble[8..8 + tail].copy_from_slice(&scramble_2[..tail]);

    // Trailing NUL after the scramble, then an optional plugin name.
    let data = match read_int_1(data) {
        Ok((_, rest)) => rest,
        Err(_) => &[],
    };
    let auth_plugin_name = if server_capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        && !data.is_empty()
    {
        let name = match read_string_null(data) {
            Ok((name, _)) => name,
            Err(_) => data,
        };
        Some(String::from_utf8_lossy(name).into_owned())
    } else {
        None
    };

    Ok(Greeting {
        protocol_version,
        server_version,
        thread_id,
        scramble,
        server_capabilities,
        charset_no,
        server_status: ServerStatusFlags::from_bits_truncate(status),
        auth_plugin_name,
    })
}

fn pre_41_refusal(server_version: &str) -> Error {
    Error::NotImplemented(format!(
        "Connecting to 3.22, 3.23 & 4.0 servers is not supported. Server is {server_version}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_greeting(caps: u32) -> Vec<u8> {
        let mut payload = vec![10];
        payload.extend_from_slice(b"5.6.10\0");
        payload.extend_from_slice(&42_u32.to_le_bytes());
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        payload.push(0);
        payload.extend_from_slice(&(caps as u16).to_le_bytes());
        payload.push(33); // utf8
        payload.extend_from_slice(&2_u16.to_le_bytes()); // autocommit
        payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        payload.push(21);
        payload.extend_from_slice(&[0; 10]);
        payload.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
        payload.push(0);
        payload
    }

    #[test]
    fn full_greeting_parses() {
        let greet = read_greeting(&sample_greeting(0x0000_F7FF)).unwrap();
        assert_eq!(greet.protocol_version, 10);
        assert_eq!(greet.server_version, "5.6.10");
        assert_eq!(greet.thread_id, 42);
        assert_eq!(greet.charset_no, 33);
        assert_eq!(greet.scramble[0], 1);
        assert_eq!(greet.scramble[19], 20);
        assert!(
            greet
                .server_status
                .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
        );
        assert!(greet.auth_plugin_name.is_none());
    }

    #[test]
    fn pre_41_server_is_refused() {
        // PROTOCOL_41 (0x0200) missing from the advertised capabilities.
        let err = read_greeting(&sample_greeting(0x0000_0001)).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn err_instead_of_greeting_propagates() {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&1129_u16.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(b"HY000");
        payload.extend_from_slice(b"Host blocked");
        let err = read_greeting(&payload).unwrap_err();
        match err {
            Error::Server(e) => assert_eq!(e.error_no, 1129),
            other => panic!("unexpected {other:?}"),
        }
    }
}
