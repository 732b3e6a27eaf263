//! Result-set materialization: column metadata, text rows, buffered and
//! unbuffered iteration. The connection drives the wire; this module owns
//! the decoded shapes.

use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// One cell is either NULL or raw text-protocol bytes.
pub type Row = Vec<Option<Vec<u8>>>;

/// Column definition (Protocol::ColumnDefinition41), minus the catalog field
/// nobody consumes.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset_no: u16,
    pub length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

/// Parse a column definition packet.
pub fn read_column_meta(payload: &[u8]) -> Result<ColumnMeta> {
    let (_catalog, data) = read_string_lenenc(payload)?;
    let (schema, data) = read_string_lenenc(data)?;
    let (table, data) = read_string_lenenc(data)?;
    let (org_table, data) = read_string_lenenc(data)?;
    let (name, data) = read_string_lenenc(data)?;
    let (org_name, data) = read_string_lenenc(data)?;

    // Fixed-length tail: lenenc 0x0c, charset 2, length 4, type 1, flags 2,
    // decimals 1, filler 2.
    let (_tail_len, data) = read_int_lenenc(data)?;
    let (charset_no, data) = read_int_2(data)?;
    let (length, data) = read_int_4(data)?;
    let (column_type, data) = read_int_1(data)?;
    let (flags, data) = read_int_2(data)?;
    let (decimals, _data) = read_int_1(data)?;

    Ok(ColumnMeta {
        schema: String::from_utf8_lossy(schema).into_owned(),
        table: String::from_utf8_lossy(table).into_owned(),
        org_table: String::from_utf8_lossy(org_table).into_owned(),
        name: String::from_utf8_lossy(name).into_owned(),
        org_name: String::from_utf8_lossy(org_name).into_owned(),
        charset_no,
        length,
        column_type,
        flags,
        decimals,
    })
}

/// Parse a text-protocol row: one NULL marker (0xFB) or length-encoded
/// string per column.
pub fn parse_text_row(payload: &[u8], columns: usize) -> Result<Row> {
    let mut row = Vec::with_capacity(columns);
    let mut data = payload;
    for _ in 0..columns {
        if data.first() == Some(&0xFB) {
            row.push(None);
            data = &data[1..];
        } else {
            let (value, rest) = read_string_lenenc(data)?;
            row.push(Some(value.to_vec()));
            data = rest;
        }
    }
    if !data.is_empty() {
        return Err(Error::MalformedPacket);
    }
    Ok(row)
}

/// Metadata parked on the connection between the result-set header and the
/// caller's `use_result`/`store_result` decision.
#[derive(Debug)]
pub struct PendingResult {
    pub columns: Vec<ColumnMeta>,
}

/// A fully buffered result set, detached from the connection.
#[derive(Debug)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
    pub eof_reached: bool,
}

impl ResultSet {
    pub(crate) fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>, eof_reached: bool) -> Self {
        Self { columns, rows, eof_reached }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Streaming result set. Holds a counted reference to the connection; rows
/// are read from the wire on demand. Dropping it before the terminal EOF
/// skips the remaining rows so the connection returns to a commandable
/// state.
pub struct UnbufferedResult {
    conn: Connection,
    columns: Vec<ColumnMeta>,
    eof_reached: bool,
}

impl std::fmt::Debug for UnbufferedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnbufferedResult")
            .field("columns", &self.columns)
            .field("eof_reached", &self.eof_reached)
            .finish()
    }
}

impl UnbufferedResult {
    pub(crate) fn new(conn: Connection, columns: Vec<ColumnMeta>) -> Self {
        Self { conn, columns, eof_reached: false }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn eof_reached(&self) -> bool {
        self.eof_reached
    }

    /// Read the next row, or `None` after the terminal EOF.
    pub fn fetch_row(&mut self) -> Result<Option<Row>> {
        if self.eof_reached {
            return Ok(None);
        }
        let mut conn = self.conn.inner_mut();
        match conn.fetch_row_packet()? {
            Some(()) => match parse_text_row(conn.reply_payload(), self.columns.len()) {
                Ok(row) => Ok(Some(row)),
                Err(e) => Err(conn.protocol_failure(e)),
            },
            None => {
                self.eof_reached = true;
                Ok(None)
            }
        }
    }
}

impl Drop for UnbufferedResult {
    fn drop(&mut self) {
        if self.eof_reached {
            return;
        }
        let mut conn = self.conn.inner_mut();
        if conn.state() == crate::conn::State::FetchingData {
            while let Ok(Some(())) = conn.fetch_row_packet() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_payload(name: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        write_bytes_lenenc(&mut payload, b"def");
        write_bytes_lenenc(&mut payload, b"db");
        write_bytes_lenenc(&mut payload, b"t");
        write_bytes_lenenc(&mut payload, b"t");
        write_bytes_lenenc(&mut payload, name.as_bytes());
        write_bytes_lenenc(&mut payload, name.as_bytes());
        payload.push(0x0C);
        payload.extend_from_slice(&33_u16.to_le_bytes());
        payload.extend_from_slice(&255_u32.to_le_bytes());
        payload.push(0xFD); // var_string
        payload.extend_from_slice(&0_u16.to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(&[0, 0]);
        payload
    }

    #[test]
    fn column_definition_parses() {
        let meta = read_column_meta(&column_payload("id")).unwrap();
        assert_eq!(meta.schema, "db");
        assert_eq!(meta.name, "id");
        assert_eq!(meta.charset_no, 33);
        assert_eq!(meta.column_type, 0xFD);
    }

    #[test]
    fn text_row_handles_null_markers() {
        let mut payload = Vec::new();
        write_bytes_lenenc(&mut payload, b"42");
        payload.push(0xFB);
        write_bytes_lenenc(&mut payload, b"x");
        let row = parse_text_row(&payload, 3).unwrap();
        assert_eq!(row[0].as_deref(), Some(b"42".as_slice()));
        assert!(row[1].is_none());
        assert_eq!(row[2].as_deref(), Some(b"x".as_slice()));
    }

    #[test]
    fn text_row_rejects_column_count_mismatch() {
        let mut payload = Vec::new();
        write_bytes_lenenc(&mut payload, b"42");
        assert!(parse_text_row(&payload, 2).is_err());
        write_bytes_lenenc(&mut payload, b"overflow");
        assert!(parse_text_row(&payload, 1).is_err());
    }
}
