use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Parsed OK packet (field count 0x00).
#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub server_status: ServerStatusFlags,
    pub warning_count: u16,
    pub message: String,
}

/// Parse an OK payload. Accepts the 0xFE header as well: EOF packets share
/// the shape for the fields this driver consumes.
pub fn read_ok(payload: &[u8]) -> Result<OkPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0x00 && header != 0xFE {
        return Err(Error::MalformedPacket);
    }

    let (affected_rows, data) = read_int_lenenc(data)?;
    let (last_insert_id, data) = read_int_lenenc(data)?;
    let (status, data) = read_int_2(data)?;
    let (warning_count, data) = read_int_2(data)?;

    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        server_status: ServerStatusFlags::from_bits_truncate(status),
        warning_count,
        message: String::from_utf8_lossy(data).into_owned(),
    })
}

/// EOF packet body after the 0xFE header byte (zero-copy).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofBody {
    warning_count: U16LE,
    server_status: U16LE,
}

#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    pub warning_count: u16,
    pub server_status: ServerStatusFlags,
}

/// Parse an EOF packet (header byte 0xFE, payload shorter than 9 bytes).
pub fn read_eof(payload: &[u8]) -> Result<EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE || data.len() < 4 {
        return Err(Error::MalformedPacket);
    }
    let body = EofBody::ref_from_bytes(&data[..4]).map_err(|_| Error::MalformedPacket)?;
    Ok(EofPacket {
        warning_count: body.warning_count.get(),
        server_status: ServerStatusFlags::from_bits_truncate(body.server_status.get()),
    })
}

/// True when `payload` is an EOF marker rather than a row: header 0xFE and a
/// short body. A 0xFE-led row would have to be at least a 16MB packet.
pub fn is_eof_payload(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

/// Parsed ERR packet (field count 0xFF).
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_no, self.sqlstate, self.message)]
pub struct ErrPacket {
    pub error_no: u16,
    pub sqlstate: String,
    pub message: String,
}

pub fn read_err(payload: &[u8]) -> Result<ErrPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFF {
        return Err(Error::MalformedPacket);
    }

    let (error_no, data) = read_int_2(data)?;

    // The 4.1 shape carries '#' plus a 5-byte sqlstate; the pre-4.1 shape
    // goes straight to the message.
    let (sqlstate, message) = if data.first() == Some(&b'#') {
        let (_, data) = read_int_1(data)?;
        let (sqlstate, data) = read_bytes_fix(data, 5)?;
        (String::from_utf8_lossy(sqlstate).into_owned(), data)
    } else {
        (crate::error::UNKNOWN_SQLSTATE.to_owned(), data)
    };

    Ok(ErrPacket {
        error_no,
        sqlstate,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

/// `COM_STATISTICS` reply: a single human-readable ASCII line.
pub fn read_statistics(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Reply to `COM_CHANGE_USER`.
#[derive(Debug)]
pub enum ChangeUserResponse {
    Ok(OkPacket),
    Err(ErrPacket),
    /// 0xFE: the server wants pre-4.1 authentication.
    OldAuthRequested,
}

pub fn read_change_user_response(payload: &[u8]) -> Result<ChangeUserResponse> {
    match payload.first() {
        Some(0xFF) => Ok(ChangeUserResponse::Err(read_err(payload)?)),
        Some(0xFE) => Ok(ChangeUserResponse::OldAuthRequested),
        Some(0x00) => Ok(ChangeUserResponse::Ok(read_ok(payload)?)),
        _ => Err(Error::MalformedPacket),
    }
}
