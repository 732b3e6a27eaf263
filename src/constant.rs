/// Length of the authentication nonce the server sends in its greeting.
pub const SCRAMBLE_LENGTH: usize = 20;

/// Largest packet the client will assemble from 16MB wire chunks.
pub const MAX_ASSEMBLED_PACKET_SIZE: u32 = 3 * 1024 * 1024 * 1024;

/// Largest payload carried by a single wire chunk.
pub const MAX_PAYLOAD_CHUNK: usize = 0xFF_FFFF;

/// Bounds applied when serializing identifiers into fixed command buffers.
pub const MAX_ALLOWED_USER_LEN: usize = 96;
pub const MAX_ALLOWED_DB_LEN: usize = 192;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    ChangeUser = 0x11,
    SetOption = 0x1b,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapabilityFlags: u32 {
        /// Use the improved version of Old Password Authentication
        const CLIENT_LONG_PASSWORD = 0x00000001;
        /// Send found rows instead of affected rows
        const CLIENT_FOUND_ROWS = 0x00000002;
        /// Get all column flags
        const CLIENT_LONG_FLAG = 0x00000004;
        /// Database (schema) name can be specified on connect
        const CLIENT_CONNECT_WITH_DB = 0x00000008;
        /// Don't allow database.table.column (deprecated)
        const CLIENT_NO_SCHEMA = 0x00000010;
        /// Compression protocol supported
        const CLIENT_COMPRESS = 0x00000020;
        /// ODBC client (no special behavior since 3.22)
        const CLIENT_ODBC = 0x00000040;
        /// Can use LOAD DATA LOCAL
        const CLIENT_LOCAL_FILES = 0x00000080;
        /// Ignore spaces before '('
        const CLIENT_IGNORE_SPACE = 0x00000100;
        /// New 4.1 protocol
        const CLIENT_PROTOCOL_41 = 0x00000200;
        /// Interactive client (affects timeout)
        const CLIENT_INTERACTIVE = 0x00000400;
        /// Use SSL encryption for the session
        const CLIENT_SSL = 0x00000800;
        /// Client will not issue SIGPIPE (client-only)
        const CLIENT_IGNORE_SIGPIPE = 0x00001000;
        /// Client knows about transactions
        const CLIENT_TRANSACTIONS = 0x00002000;
        /// Old flag for 4.1 protocol (deprecated)
        const CLIENT_RESERVED = 0x00004000;
        /// 4.1 authentication
        const CLIENT_SECURE_CONNECTION = 0x00008000;
        /// Enable multi-statement support
        const CLIENT_MULTI_STATEMENTS = 0x00010000;
        /// Enable multi-results
        const CLIENT_MULTI_RESULTS = 0x00020000;
        /// Multi-results in prepared statements
        const CLIENT_PS_MULTI_RESULTS = 0x00040000;
        /// Pluggable authentication
        const CLIENT_PLUGIN_AUTH = 0x00080000;
        /// Verify server certificate
        const CLIENT_SSL_VERIFY_SERVER_CERT = 0x40000000;
        /// Remember options after failed connect (client-only)
        const CLIENT_REMEMBER_OPTIONS = 0x80000000;
    }
}

/// Capabilities the driver requests on every connect, regardless of the
/// caller's flags.
pub const MANDATORY_CAPABILITIES: CapabilityFlags = CapabilityFlags::CLIENT_LONG_PASSWORD
    .union(CapabilityFlags::CLIENT_LONG_FLAG)
    .union(CapabilityFlags::CLIENT_TRANSACTIONS)
    .union(CapabilityFlags::CLIENT_PROTOCOL_41)
    .union(CapabilityFlags::CLIENT_SECURE_CONNECTION)
    .union(CapabilityFlags::CLIENT_MULTI_RESULTS);

/// Requested by default but removable by policy (restricted filesystems drop
/// `CLIENT_LOCAL_FILES`).
pub const DEFAULT_EXTRA_CAPABILITIES: CapabilityFlags = CapabilityFlags::CLIENT_LOCAL_FILES
    .union(CapabilityFlags::CLIENT_PS_MULTI_RESULTS);

bitflags::bitflags! {
    /// Server status bits carried by OK and EOF packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServerStatusFlags: u16 {
        /// A transaction is active
        const SERVER_STATUS_IN_TRANS = 0x0001;
        /// Autocommit mode is enabled
        const SERVER_STATUS_AUTOCOMMIT = 0x0002;
        /// More results exist (multi-statement or stored procedure)
        const SERVER_MORE_RESULTS_EXISTS = 0x0008;
        /// Query did not use a good index
        const SERVER_STATUS_NO_GOOD_INDEX_USED = 0x0010;
        /// Query did not use any index
        const SERVER_STATUS_NO_INDEX_USED = 0x0020;
        /// Cursor exists (for prepared statements)
        const SERVER_STATUS_CURSOR_EXISTS = 0x0040;
        /// Last row was sent
        const SERVER_STATUS_LAST_ROW_SENT = 0x0080;
        /// Database was dropped
        const SERVER_STATUS_DB_DROPPED = 0x0100;
        /// No backslash escapes mode is enabled
        const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;
        /// Metadata changed (for prepared statements)
        const SERVER_STATUS_METADATA_CHANGED = 0x0400;
        /// Query was slow
        const SERVER_QUERY_WAS_SLOW = 0x0800;
        /// Prepared statement has output parameters
        const SERVER_PS_OUT_PARAMS = 0x1000;
    }
}

bitflags::bitflags! {
    /// Option bits for `COM_REFRESH`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RefreshOptions: u8 {
        const REFRESH_GRANT = 0x01;
        const REFRESH_LOG = 0x02;
        const REFRESH_TABLES = 0x04;
        const REFRESH_HOSTS = 0x08;
        const REFRESH_STATUS = 0x10;
        const REFRESH_THREADS = 0x20;
        const REFRESH_SLAVE = 0x40;
        const REFRESH_MASTER = 0x80;
    }
}

/// Argument for `COM_SET_OPTION`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOption {
    MultiStatementsOn = 0,
    MultiStatementsOff = 1,
}

/// Shutdown level byte for `COM_SHUTDOWN`.
pub const SHUTDOWN_DEFAULT: u8 = 0;
