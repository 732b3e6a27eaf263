use sha1::{Digest, Sha1};

use crate::constant::{
    CapabilityFlags, MAX_ALLOWED_DB_LEN, MAX_ALLOWED_USER_LEN, SCRAMBLE_LENGTH,
};
use crate::protocol::primitive::*;

/// Authentication response for the 4.1 protocol
/// (`mysql_native_password`): `SHA1(pass) XOR SHA1(nonce + SHA1(SHA1(pass)))`.
pub fn scramble_41(password: &str, nonce: &[u8]) -> [u8; SCRAMBLE_LENGTH] {
    let mut token = [0_u8; SCRAMBLE_LENGTH];
    if password.is_empty() {
        return token;
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let mask = hasher.finalize();

    for (slot, (a, b)) in token.iter_mut().zip(stage1.iter().zip(mask.iter())) {
        *slot = a ^ b;
    }
    token
}

/// Client handshake response (HandshakeResponse41).
///
/// Packet format:
/// ```text
/// 4   capability flags
/// 4   max packet size
/// 1   character set
/// 23  reserved (all 0x00)
/// n   username (null-terminated string)
/// n   auth response (1-byte length + data)
/// n   database name (null-terminated, if CLIENT_CONNECT_WITH_DB)
/// ```
#[derive(Debug, Clone)]
pub struct AuthPacket<'a> {
    pub client_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset_no: u8,
    pub user: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
}

pub fn write_auth_packet(out: &mut Vec<u8>, packet: &AuthPacket<'_>) {
    write_auth_prefix(
        out,
        packet.client_flags,
        packet.max_packet_size,
        packet.charset_no,
    );

    write_string_null(out, packet.user);

    write_int_1(out, packet.auth_response.len() as u8);
    out.extend_from_slice(packet.auth_response);

    if let Some(db) = packet.database
        && packet
            .client_flags
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, db);
    }
}

/// The first half of the handshake response, sent alone to request the TLS
/// switchover. Authentication continues with the full packet once the
/// transport is encrypted.
pub fn write_ssl_request(
    out: &mut Vec<u8>,
    client_flags: CapabilityFlags,
    max_packet_size: u32,
    charset_no: u8,
) {
    write_auth_prefix(out, client_flags, max_packet_size, charset_no);
}

fn write_auth_prefix(
    out: &mut Vec<u8>,
    client_flags: CapabilityFlags,
    max_packet_size: u32,
    charset_no: u8,
) {
    write_int_4(out, client_flags.bits());
    write_int_4(out, max_packet_size);
    write_int_1(out, charset_no);
    out.extend_from_slice(&[0_u8; 23]);
}

/// Serialize the body of `COM_CHANGE_USER`.
///
/// Layout: user (ASCIIZ, bounded), then either a single zero byte (empty
/// password) or a length-prefixed scramble, then database (ASCIIZ, possibly
/// empty), and for servers >= 5.1.23 the two-byte current charset number.
pub fn write_change_user(
    out: &mut Vec<u8>,
    user: &str,
    password: &str,
    db: &str,
    nonce: &[u8; SCRAMBLE_LENGTH],
    charset_no: u8,
    server_version_number: u32,
) {
    let user = truncated(user, MAX_ALLOWED_USER_LEN);
    out.extend_from_slice(user.as_bytes());
    out.push(0);

    if password.is_empty() {
        out.push(0);
    } else {
        write_int_1(out, SCRAMBLE_LENGTH as u8);
        out.extend_from_slice(&scramble_41(password, nonce));
    }

    if !db.is_empty() {
        let db = truncated(db, MAX_ALLOWED_DB_LEN);
        out.extend_from_slice(db.as_bytes());
    }
    out.push(0);

    if server_version_number >= 50123 {
        write_int_2(out, u16::from(charset_no));
    }
}

fn truncated(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    // Back off to a char boundary so the truncation never splits a sequence.
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_scrambles_to_zeroes() {
        assert_eq!(scramble_41("", &[0_u8; 20]), [0_u8; 20]);
    }

    #[test]
    fn scramble_matches_known_vector() {
        // Computed with the reference SHA1 formula.
        let nonce: [u8; 20] = *b"01234567890123456789";
        let token = scramble_41("secret", &nonce);
        assert_ne!(token, [0_u8; 20]);
        // XOR-ing the mask back recovers SHA1("secret").
        let stage1 = Sha1::digest(b"secret");
        let stage2 = Sha1::digest(stage1);
        let mut hasher = Sha1::new();
        hasher.update(nonce);
        hasher.update(stage2);
        let mask = hasher.finalize();
        for i in 0..20 {
            assert_eq!(token[i] ^ mask[i], stage1[i]);
        }
    }

    #[test]
    fn auth_packet_layout() {
        let mut out = Vec::new();
        let flags = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        write_auth_packet(
            &mut out,
            &AuthPacket {
                client_flags: flags,
                max_packet_size: 0x0100_0000,
                charset_no: 33,
                user: "root",
                auth_response: &[0xAA; 20],
                database: Some("test"),
            },
        );
        assert_eq!(&out[0..4], &flags.bits().to_le_bytes());
        assert_eq!(&out[4..8], &0x0100_0000_u32.to_le_bytes());
        assert_eq!(out[8], 33);
        assert_eq!(&out[9..32], &[0_u8; 23]);
        assert_eq!(&out[32..37], b"root\0");
        assert_eq!(out[37], 20);
        assert_eq!(&out[58..], b"test\0");
    }

    #[test]
    fn ssl_request_is_the_bare_prefix() {
        let mut out = Vec::new();
        write_ssl_request(&mut out, CapabilityFlags::CLIENT_SSL, 1024, 8);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn change_user_gates_charset_on_server_version() {
        let nonce = [7_u8; 20];

        let mut old = Vec::new();
        write_change_user(&mut old, "u", "", "db", &nonce, 33, 50122);
        assert_eq!(old, b"u\0\0db\0");

        let mut new = Vec::new();
        write_change_user(&mut new, "u", "", "db", &nonce, 33, 50123);
        assert_eq!(&new[..6], b"u\0\0db\0");
        assert_eq!(&new[6..], &33_u16.to_le_bytes());
    }

    #[test]
    fn change_user_scrambles_nonempty_password() {
        let nonce = [7_u8; 20];
        let mut out = Vec::new();
        write_change_user(&mut out, "u", "pw", "", &nonce, 33, 50000);
        assert_eq!(out[0..2], *b"u\0");
        assert_eq!(out[2] as usize, SCRAMBLE_LENGTH);
        assert_eq!(&out[3..23], &scramble_41("pw", &nonce));
        assert_eq!(out[23], 0); // empty db terminator
    }

    #[test]
    fn change_user_bounds_the_user_name() {
        let nonce = [0_u8; 20];
        let long_user = "u".repeat(MAX_ALLOWED_USER_LEN + 50);
        let mut out = Vec::new();
        write_change_user(&mut out, &long_user, "", "", &nonce, 33, 50000);
        let terminator = out.iter().position(|&b| b == 0).unwrap();
        assert_eq!(terminator, MAX_ALLOWED_USER_LEN);
    }
}
