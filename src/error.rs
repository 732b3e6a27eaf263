use thiserror::Error;

use crate::protocol::response::ErrPacket;

pub type Result<T> = core::result::Result<T, Error>;

/// Client-side error codes, numbered like the classic libmysql `CR_*` set so
/// that callers matching on `errno()` see familiar values.
pub mod cr {
    pub const CR_UNKNOWN_ERROR: u16 = 2000;
    pub const CR_CONNECTION_ERROR: u16 = 2002;
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    pub const CR_COMMANDS_OUT_OF_SYNC: u16 = 2014;
    pub const CR_CANT_READ_CHARSET: u16 = 2019;
    pub const CR_MALFORMED_PACKET: u16 = 2027;
    pub const CR_NOT_IMPLEMENTED: u16 = 2054;
}

pub const UNKNOWN_SQLSTATE: &str = "HY000";
pub const SQLSTATE_NULL: &str = "00000";

pub const SERVER_GONE_MESSAGE: &str = "MySQL server has gone away";
pub const OUT_OF_SYNC_MESSAGE: &str =
    "Commands out of sync; you can't run this command now";
pub const OLD_PASSWD_MESSAGE: &str =
    "The server requested an authentication method this client considers \
     insecure and does not implement. Please use a 4.1+ style password hash";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Server(#[from] ErrPacket),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport could not be established; carries the OS error string.
    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("{SERVER_GONE_MESSAGE}")]
    ServerGone,

    #[error("{OUT_OF_SYNC_MESSAGE}")]
    CommandsOutOfSync,

    #[error("Malformed packet")]
    MalformedPacket,

    #[error("{OLD_PASSWD_MESSAGE}")]
    OldAuthRequired,

    #[error("Invalid characterset or character set not supported: {0}")]
    UnknownCharset(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("LOAD DATA LOCAL INFILE error: {0}")]
    LocalInfile(String),

    #[error("Bad config error: {0}")]
    BadConfig(String),
}

impl Error {
    /// True when the wire can no longer be trusted and the connection must
    /// stop issuing commands.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ServerGone | Error::MalformedPacket
        )
    }
}

/// Last-error diagnostics kept on the connection, readable after a failed
/// operation through `errno()` / `sqlstate()` / `error_message()`.
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    pub error_no: u16,
    pub sqlstate: String,
    pub error: String,
}

impl ErrorInfo {
    pub fn clear(&mut self) {
        self.error_no = 0;
        self.sqlstate.clear();
        self.error.clear();
    }

    pub fn set(&mut self, error_no: u16, sqlstate: &str, message: &str) {
        self.error_no = error_no;
        self.sqlstate = sqlstate.to_owned();
        self.error = message.to_owned();
    }

    pub fn is_set(&self) -> bool {
        self.error_no != 0 || !self.error.is_empty()
    }

    /// Records the diagnostics matching `err`.
    pub fn record(&mut self, err: &Error) {
        match err {
            Error::Server(e) => self.set(e.error_no, &e.sqlstate, &e.message),
            Error::Io(e) => {
                self.set(cr::CR_SERVER_GONE_ERROR, UNKNOWN_SQLSTATE, &e.to_string())
            }
            Error::Connection(msg) => {
                self.set(cr::CR_CONNECTION_ERROR, UNKNOWN_SQLSTATE, msg)
            }
            Error::ServerGone => {
                self.set(cr::CR_SERVER_GONE_ERROR, UNKNOWN_SQLSTATE, SERVER_GONE_MESSAGE)
            }
            Error::CommandsOutOfSync => self.set(
                cr::CR_COMMANDS_OUT_OF_SYNC,
                UNKNOWN_SQLSTATE,
                OUT_OF_SYNC_MESSAGE,
            ),
            Error::MalformedPacket => {
                self.set(cr::CR_MALFORMED_PACKET, UNKNOWN_SQLSTATE, "Malformed packet")
            }
            Error::OldAuthRequired => {
                self.set(cr::CR_UNKNOWN_ERROR, UNKNOWN_SQLSTATE, OLD_PASSWD_MESSAGE)
            }
            Error::UnknownCharset(_) => self.set(
                cr::CR_CANT_READ_CHARSET,
                UNKNOWN_SQLSTATE,
                &err.to_string(),
            ),
            Error::NotImplemented(_) => {
                self.set(cr::CR_NOT_IMPLEMENTED, UNKNOWN_SQLSTATE, &err.to_string())
            }
            Error::LocalInfile(_) | Error::BadConfig(_) => {
                self.set(cr::CR_UNKNOWN_ERROR, UNKNOWN_SQLSTATE, &err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_server_error() {
        let mut info = ErrorInfo::default();
        info.record(&Error::Server(ErrPacket {
            error_no: 1064,
            sqlstate: "42000".to_owned(),
            message: "syntax".to_owned(),
        }));
        assert_eq!(info.error_no, 1064);
        assert_eq!(info.sqlstate, "42000");
        assert_eq!(info.error, "syntax");
    }

    #[test]
    fn record_client_errors_use_unknown_sqlstate() {
        let mut info = ErrorInfo::default();
        info.record(&Error::ServerGone);
        assert_eq!(info.error_no, cr::CR_SERVER_GONE_ERROR);
        assert_eq!(info.sqlstate, UNKNOWN_SQLSTATE);

        info.record(&Error::CommandsOutOfSync);
        assert_eq!(info.error_no, cr::CR_COMMANDS_OUT_OF_SYNC);

        info.clear();
        assert!(!info.is_set());
    }
}
