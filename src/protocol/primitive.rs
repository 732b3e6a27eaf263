use crate::error::{Error, Result};

/// Read 1-byte integer
pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(Error::MalformedPacket),
    }
}

/// Read 2-byte little-endian integer
pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::MalformedPacket);
    }
    Ok((u16::from_le_bytes([data[0], data[1]]), &data[2..]))
}

/// Read 3-byte little-endian integer
pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 3 {
        return Err(Error::MalformedPacket);
    }
    Ok((u32::from_le_bytes([data[0], data[1], data[2], 0]), &data[3..]))
}

/// Read 4-byte little-endian integer
pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::MalformedPacket);
    }
    Ok((
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        &data[4..],
    ))
}

/// Read 8-byte little-endian integer
pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    if data.len() < 8 {
        return Err(Error::MalformedPacket);
    }
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&data[..8]);
    Ok((u64::from_le_bytes(raw), &data[8..]))
}

/// Read length-encoded integer
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    let (first, rest) = read_int_1(data)?;
    match first {
        0xFC => {
            let (val, rest) = read_int_2(rest)?;
            Ok((u64::from(val), rest))
        }
        0xFD => {
            let (val, rest) = read_int_3(rest)?;
            Ok((u64::from(val), rest))
        }
        0xFE => read_int_8(rest),
        val => Ok((u64::from(val), rest)),
    }
}

/// Read fixed-length bytes
pub fn read_bytes_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::MalformedPacket);
    }
    Ok(data.split_at(len))
}

/// Read null-terminated string
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&b| b == 0) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::MalformedPacket),
    }
}

/// Read length-encoded string
pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    read_bytes_fix(rest, len as usize)
}

/// Write 1-byte integer
pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte little-endian integer
pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 3-byte little-endian integer
pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

/// Write 4-byte little-endian integer
pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write length-encoded integer
pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xFD);
        write_int_3(out, value as u32);
    } else {
        out.push(0xFE);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Write null-terminated string
pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Write length-encoded bytes
pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_integer_picks_the_shortest_form() {
        let mut out = Vec::new();
        write_int_lenenc(&mut out, 250);
        assert_eq!(out, [250]);

        out.clear();
        write_int_lenenc(&mut out, 251);
        assert_eq!(out, [0xFC, 251, 0]);

        out.clear();
        write_int_lenenc(&mut out, 0x0100_0000);
        assert_eq!(out[0], 0xFE);
        assert_eq!(read_int_lenenc(&out).unwrap().0, 0x0100_0000);
    }

    #[test]
    fn truncated_reads_are_rejected() {
        assert!(read_int_2(&[1]).is_err());
        assert!(read_int_4(&[1, 2, 3]).is_err());
        assert!(read_string_null(b"no terminator").is_err());
        assert!(read_string_lenenc(&[5, b'a', b'b']).is_err());
    }

    #[test]
    fn null_string_stops_at_terminator() {
        let (s, rest) = read_string_null(b"abc\0def").unwrap();
        assert_eq!(s, b"abc");
        assert_eq!(rest, b"def");
    }
}
