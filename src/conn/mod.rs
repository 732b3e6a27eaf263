//! The connection object and its command/response state machine.
//!
//! A connection owns its transport, serializes one command at a time against
//! the server and tracks the session residue every reply leaves behind
//! (status flags, warnings, last-insert-id, affected rows, pending result).
//! All state transitions are checked: an operation issued from the wrong
//! state fails before any byte reaches the wire.

mod state;

use std::any::Any;
use std::cell::{RefCell, RefMut};
use std::io::Read;
use std::os::fd::RawFd;
use std::rc::Rc;

use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::charset::{self, Charset};
use crate::constant::{
    CapabilityFlags, CommandByte, DEFAULT_EXTRA_CAPABILITIES, MANDATORY_CAPABILITIES,
    MAX_ASSEMBLED_PACKET_SIZE, MAX_PAYLOAD_CHUNK, RefreshOptions, SCRAMBLE_LENGTH, ServerOption,
    ServerStatusFlags,
};
use crate::error::{Error, ErrorInfo, Result, SQLSTATE_NULL};
use crate::net::{Net, NetOptions, Scheme};
use crate::ops::{self, PluginId};
use crate::opts::Opts;
use crate::protocol::auth::{AuthPacket, scramble_41, write_auth_packet, write_change_user, write_ssl_request};
use crate::protocol::command::write_command;
use crate::protocol::greeting::{Greeting, read_greeting};
use crate::protocol::packet::PacketHeader;
use crate::protocol::response::{
    ChangeUserResponse, OkPacket, read_change_user_response, read_eof, read_err, read_ok,
    read_statistics,
};
use crate::result::{PendingResult, ResultSet, UnbufferedResult, parse_text_row, read_column_meta};
use crate::stats::{Stat, Stats, global_dec, global_inc};

pub use state::{ERROR_AFFECTED_ROWS, QueryType, State, UpsertStatus};

/// What `simple_command` should do with the server's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Read and settle an OK packet.
    Ok,
    /// Read and check an EOF packet.
    Eof,
    /// The caller reads the reply itself.
    None,
}

/// Close reasons, mapped onto distinct statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseType {
    Explicit,
    Implicit,
    Disconnect,
}

/// Driver internals behind a [`Connection`] handle.
///
/// Exposed so a replacement operation table ([`crate::ops::ConnOps`]) can
/// forward to, wrap, or reimplement individual operations.
pub struct Conn {
    net: Net,
    cmd_buffer: Vec<u8>,
    read_buffer: Vec<u8>,
    state: State,

    host: Option<String>,
    unix_socket: Option<String>,
    port: u16,
    user: String,
    password: String,
    database: Option<String>,
    scheme: Option<Scheme>,
    host_info: String,

    thread_id: u32,
    protocol_version: u8,
    server_version: Option<String>,
    server_capabilities: CapabilityFlags,
    scramble: [u8; SCRAMBLE_LENGTH],

    charset: Option<&'static Charset>,
    greet_charset: Option<&'static Charset>,
    client_flag: CapabilityFlags,
    max_packet_size: u32,

    upsert_status: UpsertStatus,
    error_info: ErrorInfo,
    last_message: Option<String>,
    field_count: u32,
    last_query_type: QueryType,
    current_result: Option<PendingResult>,

    stats: Stats,
    options: Opts,
    persistent: bool,
    plugin_data: Vec<Option<Box<dyn Any>>>,
}

impl Conn {
    fn new(persistent: bool) -> Self {
        Self {
            net: Net::new(NetOptions::default()),
            cmd_buffer: Vec::new(),
            read_buffer: Vec::new(),
            state: State::Allocated,
            host: None,
            unix_socket: None,
            port: 0,
            user: String::new(),
            password: String::new(),
            database: None,
            scheme: None,
            host_info: String::new(),
            thread_id: 0,
            protocol_version: 0,
            server_version: None,
            server_capabilities: CapabilityFlags::empty(),
            scramble: [0; SCRAMBLE_LENGTH],
            charset: None,
            greet_charset: None,
            client_flag: CapabilityFlags::empty(),
            max_packet_size: 0,
            upsert_status: UpsertStatus {
                affected_rows: ERROR_AFFECTED_ROWS,
                ..UpsertStatus::default()
            },
            error_info: ErrorInfo::default(),
            last_message: None,
            field_count: 0,
            last_query_type: QueryType::default(),
            current_result: None,
            stats: Stats::default(),
            options: Opts::default(),
            persistent,
            plugin_data: (0..ops::plugin_count()).map(|_| None).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics helpers
    // ------------------------------------------------------------------

    fn failed(&mut self, err: Error) -> Error {
        self.error_info.record(&err);
        err
    }

    /// Record the error and poison the connection: the wire position is no
    /// longer trustworthy, so fail-fast from here on.
    pub(crate) fn protocol_failure(&mut self, err: Error) -> Error {
        self.error_info.record(&err);
        self.state = State::QuitSent;
        err
    }

    pub(crate) fn stat_inc(&mut self, stat: Stat) {
        self.stats.inc(stat);
        global_inc(stat);
    }

    fn stat_add(&mut self, stat: Stat, value: u64) {
        if value > 0 {
            self.stats.add(stat, value);
            crate::stats::global_add(stat, value);
        }
    }

    pub(crate) fn stat_dec(&mut self, stat: Stat) {
        self.stats.dec(stat);
        global_dec(stat);
    }

    // ------------------------------------------------------------------
    // Packet IO
    // ------------------------------------------------------------------

    fn begin_command(&mut self) {
        self.cmd_buffer.clear();
        // Room for the header of the first chunk.
        self.cmd_buffer.extend_from_slice(&[0_u8; 4]);
    }

    /// Write the staged command buffer as one or more wire chunks. Returns
    /// the next free sequence id.
    fn send_command_buffer(&mut self, first_seq: u8) -> Result<u8> {
        let sent_before = self.net.bytes_sent;
        let result = {
            let Conn { net, cmd_buffer, .. } = self;
            write_chunked(net, cmd_buffer.as_mut_slice(), first_seq)
        };
        let delta = self.net.bytes_sent - sent_before;
        self.stat_add(Stat::BytesSent, delta);
        result.map_err(|e| self.protocol_failure(e))
    }

    /// Read one assembled payload into the reply buffer.
    fn recv_packet(&mut self) -> Result<()> {
        let received_before = self.net.bytes_received;
        let result = {
            let Conn { net, read_buffer, .. } = self;
            read_payload(net, read_buffer)
        };
        let delta = self.net.bytes_received - received_before;
        self.stat_add(Stat::BytesReceived, delta);
        result.map(|_seq| ()).map_err(|e| self.protocol_failure(e))
    }

    pub(crate) fn reply_payload(&self) -> &[u8] {
        &self.read_buffer
    }

    // ------------------------------------------------------------------
    // Command dispatch
    // ------------------------------------------------------------------

    /// Write a command packet and, unless `expect` is [`Reply::None`],
    /// consume its reply.
    ///
    /// `silent` suppresses user-visible warnings (never the diagnostics);
    /// `ignore_upsert` preserves the current upsert status instead of
    /// zeroing it.
    pub fn simple_command(
        &mut self,
        command: CommandByte,
        arg: &[u8],
        expect: Reply,
        silent: bool,
        ignore_upsert: bool,
    ) -> Result<()> {
        tracing::trace!(?command, ?expect, silent, state = ?self.state, "simple_command");
        match self.state {
            State::Ready => {}
            State::QuitSent => return Err(self.failed(Error::ServerGone)),
            _ => return Err(self.failed(Error::CommandsOutOfSync)),
        }

        if !ignore_upsert {
            self.upsert_status = UpsertStatus::default();
        }
        self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
        self.error_info.clear();

        self.begin_command();
        write_command(&mut self.cmd_buffer, command, arg);
        self.stat_inc(Stat::for_command(command));

        if let Err(e) = self.send_command_buffer(0) {
            if !silent {
                tracing::warn!(?command, error = %e, "error while sending command packet");
            }
            return Err(e);
        }

        match expect {
            Reply::None => Ok(()),
            _ => self.handle_response(expect, silent, ignore_upsert, command),
        }
    }

    fn handle_response(
        &mut self,
        expect: Reply,
        silent: bool,
        ignore_upsert: bool,
        command: CommandByte,
    ) -> Result<()> {
        self.recv_packet()?;
        match expect {
            Reply::Ok => {
                if self.read_buffer.first() == Some(&0xFF) {
                    let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                    // The error packet carries no server status, so the
                    // client cannot learn whether further result sets of a
                    // multi-statement were pending. An error aborts the whole
                    // statement, so the flag is turned off unconditionally.
                    self.upsert_status
                        .server_status
                        .remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
                    self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
                    if !silent {
                        tracing::warn!(?command, error = %err, "server error");
                    }
                    return Err(self.failed(Error::Server(err)));
                }
                let ok = read_ok(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.last_message = Some(ok.message.clone());
                if !ignore_upsert {
                    self.upsert_status.warning_count = ok.warning_count;
                    self.upsert_status.server_status = ok.server_status;
                    self.upsert_status.affected_rows = ok.affected_rows;
                    self.upsert_status.last_insert_id = ok.last_insert_id;
                }
                Ok(())
            }
            Reply::Eof => match self.read_buffer.first() {
                Some(&0xFF) => {
                    let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                    self.upsert_status
                        .server_status
                        .remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
                    self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
                    if !silent {
                        tracing::warn!(?command, error = %err, "server error");
                    }
                    Err(self.failed(Error::Server(err)))
                }
                Some(&0xFE) => Ok(()),
                _ => {
                    if !silent {
                        tracing::warn!(
                            ?command,
                            first_byte = ?self.read_buffer.first(),
                            "EOF packet expected"
                        );
                    }
                    Err(self.failed(Error::MalformedPacket))
                }
            },
            Reply::None => {
                // A caller-handled reply never reaches this function.
                tracing::error!(?command, "wrong response packet type passed to handle_response");
                Err(self.failed(Error::MalformedPacket))
            }
        }
    }

    // ------------------------------------------------------------------
    // Connect / authenticate
    // ------------------------------------------------------------------

    /// Establish (or re-establish) the session described by `opts`.
    ///
    /// Connecting on a live handle performs an implicit close first. On any
    /// failure the transport is released and the shell stays reusable; the
    /// diagnostics describe the cause.
    pub fn connect(&mut self, opts: &Opts) -> Result<()> {
        let mut reconnect = false;
        if self.state != State::Allocated {
            tracing::debug!(state = ?self.state, "connect on a connected handle");
            if self.state != State::QuitSent {
                self.stat_inc(Stat::CloseImplicit);
                reconnect = true;
                let _ = self.send_close();
            }
            self.free_contents();
            self.stat_dec(Stat::OpenedConnections);
            if self.persistent {
                self.stat_dec(Stat::OpenedPersistentConnections);
            }
            self.state = State::Allocated;
        }

        self.options = opts.clone();
        self.persistent = opts.persistent;
        self.net.options.connect_timeout = opts.connect_timeout;
        self.net.options.read_buffer_size = opts.net_read_buffer_size;
        self.cmd_buffer = Vec::with_capacity(opts.net_cmd_buffer_size + 4);
        for note in &self.options.ignored_option_notes {
            tracing::debug!(note = note.as_str(), "unsupported option");
        }

        match self.connect_inner() {
            Ok(()) => {
                self.stat_inc(Stat::ConnectSuccess);
                self.stat_inc(Stat::OpenedConnections);
                if reconnect {
                    global_inc(Stat::Reconnect);
                }
                if self.persistent {
                    self.stat_inc(Stat::PconnectSuccess);
                    self.stat_inc(Stat::OpenedPersistentConnections);
                }
                tracing::debug!(thread_id = self.thread_id, host_info = %self.host_info, "connected");
                Ok(())
            }
            Err(e) => {
                self.error_info.record(&e);
                self.stat_inc(Stat::ConnectFailure);
                self.free_contents();
                self.state = State::Allocated;
                Err(e)
            }
        }
    }

    fn connect_inner(&mut self) -> Result<()> {
        let host = match self.options.host.as_deref() {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => "localhost".to_owned(),
        };
        let port = if self.options.port == 0 { 3306 } else { self.options.port };

        let use_socket =
            cfg!(unix) && host.eq_ignore_ascii_case("localhost") && self.options.socket.is_some();
        let scheme = if use_socket {
            let path = match self.options.socket.clone() {
                Some(p) if !p.is_empty() => p,
                _ => "/tmp/mysql.sock".to_owned(),
            };
            Scheme::Unix { path }
        } else {
            Scheme::Tcp { host: host.clone(), port }
        };
        tracing::debug!(scheme = %scheme, "dialing");
        self.net.connect(&scheme)?;
        self.scheme = Some(scheme);

        self.recv_packet()?;
        let greet = read_greeting(&self.read_buffer)?;

        let mut flags =
            self.options.capabilities | MANDATORY_CAPABILITIES | DEFAULT_EXTRA_CAPABILITIES;
        if !self.options.local_infile || self.options.restrict_local_files {
            flags.remove(CapabilityFlags::CLIENT_LOCAL_FILES);
        }
        if self.options.db.is_some() {
            flags.insert(CapabilityFlags::CLIENT_CONNECT_WITH_DB);
        }
        // Compression framing is not implemented.
        flags.remove(CapabilityFlags::CLIENT_COMPRESS);
        if cfg!(feature = "tls") {
            if self.options.tls || self.net.options.has_ssl_material() {
                flags.insert(CapabilityFlags::CLIENT_SSL);
            }
            if self.net.options.ssl_verify_server_cert {
                flags.insert(CapabilityFlags::CLIENT_SSL_VERIFY_SERVER_CERT);
            }
        } else {
            flags.remove(CapabilityFlags::CLIENT_SSL);
        }

        self.thread_id = greet.thread_id;
        self.protocol_version = greet.protocol_version;
        self.server_version = Some(greet.server_version.clone());
        self.greet_charset = charset::find_by_nr(greet.charset_no);
        self.scramble = greet.scramble;
        self.server_capabilities = greet.server_capabilities;

        self.authenticate(&greet, flags, &host)?;

        self.state = State::Ready;
        self.user = self.options.user.clone();
        self.password = self.options.password.clone();
        self.database = self.options.db.clone();
        self.port = port;
        if use_socket {
            self.unix_socket = match &self.scheme {
                Some(Scheme::Unix { path }) => Some(path.clone()),
                _ => None,
            };
            self.host = None;
            self.host_info = "Localhost via UNIX socket".to_owned();
        } else {
            self.host = Some(host.clone());
            self.unix_socket = None;
            self.host_info = format!("{host} via TCP/IP");
        }
        self.client_flag = flags;
        self.max_packet_size = MAX_ASSEMBLED_PACKET_SIZE;
        self.upsert_status = UpsertStatus {
            server_status: greet.server_status,
            warning_count: 0,
            affected_rows: 0,
            last_insert_id: 0,
        };
        self.error_info.clear();

        let init_commands = self.options.init_commands.clone();
        for command in init_commands {
            self.stat_inc(Stat::InitCommandExecuted);
            if let Err(e) = self.query(&command) {
                self.stat_inc(Stat::InitCommandFailed);
                return Err(e);
            }
            self.drain_pending_results()?;
        }
        Ok(())
    }

    fn authenticate(&mut self, greet: &Greeting, flags: CapabilityFlags, host: &str) -> Result<()> {
        let charset_no = self
            .options
            .charset_name
            .as_deref()
            .and_then(charset::find_by_name)
            .map(|cs| cs.nr)
            .unwrap_or(greet.charset_no);
        let token = scramble_41(&self.options.password, &greet.scramble);

        let mut next_seq = 1_u8;
        if flags.contains(CapabilityFlags::CLIENT_SSL)
            && greet
                .server_capabilities
                .contains(CapabilityFlags::CLIENT_SSL)
        {
            // Half-packet first, then continue over the encrypted channel.
            self.begin_command();
            write_ssl_request(&mut self.cmd_buffer, flags, MAX_ASSEMBLED_PACKET_SIZE, charset_no);
            next_seq = self.send_command_buffer(next_seq)?;
            tracing::debug!("switching to TLS");
            self.net.upgrade_tls(host)?;
        }

        self.begin_command();
        let user = self.options.user.clone();
        let db = self.options.db.clone();
        write_auth_packet(
            &mut self.cmd_buffer,
            &AuthPacket {
                client_flags: flags,
                max_packet_size: MAX_ASSEMBLED_PACKET_SIZE,
                charset_no,
                user: &user,
                auth_response: &token,
                database: db.as_deref(),
            },
        );
        self.send_command_buffer(next_seq)?;

        self.recv_packet()?;
        match self.read_buffer.first() {
            // The server demands the pre-4.1 authentication exchange.
            Some(&0xFE) => Err(self.failed(Error::OldAuthRequired)),
            Some(&0xFF) => {
                let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                Err(self.failed(Error::Server(err)))
            }
            _ => {
                let ok = read_ok(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.last_message = Some(ok.message);
                self.charset = charset::find_by_nr(charset_no).or(self.greet_charset);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries and result-set chaining
    // ------------------------------------------------------------------

    /// Execute a statement and read the result-set header. Row data, if any,
    /// stays pending until `use_result`/`store_result`.
    pub fn query(&mut self, sql: &str) -> Result<()> {
        self.send_query(sql)?;
        self.read_result_set_header()?;
        if self.last_query_type == QueryType::Upsert {
            let affected = self.upsert_status.affected_rows;
            if affected != 0 && affected != ERROR_AFFECTED_ROWS {
                self.stat_add(Stat::RowsAffectedNormal, affected);
            }
        }
        Ok(())
    }

    /// Fire a statement without collecting the reply; pair with
    /// [`Conn::reap_query`] (usually after the readiness multiplexer says the
    /// reply arrived).
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.simple_command(CommandByte::Query, sql.as_bytes(), Reply::None, false, false)?;
        self.state = State::QuerySent;
        Ok(())
    }

    /// Collect the reply of an earlier [`Conn::send_query`].
    pub fn reap_query(&mut self) -> Result<()> {
        if self.state <= State::Ready || self.state == State::QuitSent {
            tracing::warn!(state = ?self.state, "reap_query: connection not opened, clear or closed");
            return Err(self.failed(Error::CommandsOutOfSync));
        }
        self.read_result_set_header()
    }

    /// True when the server announced another result set after the current
    /// one.
    pub fn more_results(&self) -> bool {
        self.upsert_status
            .server_status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    /// Advance to the next result set of a multi-statement.
    pub fn next_result(&mut self) -> Result<()> {
        if self.state != State::NextResultPending {
            return Err(self.failed(Error::CommandsOutOfSync));
        }
        self.error_info.clear();
        self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
        match self.read_result_set_header() {
            Ok(()) => Ok(()),
            Err(e) => {
                // A server error in the middle of a multi-statement cancels
                // the chain but leaves the session usable. Anything else
                // means the wire position is lost.
                if !matches!(e, Error::Server(_)) {
                    self.state = State::QuitSent;
                }
                Err(e)
            }
        }
    }

    fn read_result_set_header(&mut self) -> Result<()> {
        self.recv_packet()?;
        match self.read_buffer.first() {
            Some(&0xFF) => {
                let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.upsert_status
                    .server_status
                    .remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
                self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
                self.field_count = 0;
                self.state = State::Ready;
                Err(self.failed(Error::Server(err)))
            }
            Some(&0x00) => {
                let ok = read_ok(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.last_query_type = QueryType::Upsert;
                self.field_count = 0;
                self.apply_ok(&ok);
                self.state = if ok
                    .server_status
                    .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
                {
                    State::NextResultPending
                } else {
                    State::Ready
                };
                Ok(())
            }
            Some(&0xFB) => self.handle_local_infile(),
            Some(_) => self.read_result_metadata(),
            None => Err(self.protocol_failure(Error::MalformedPacket)),
        }
    }

    fn read_result_metadata(&mut self) -> Result<()> {
        let result = crate::protocol::primitive::read_int_lenenc(&self.read_buffer);
        let (column_count, rest) = match result {
            Ok(v) => v,
            Err(e) => return Err(self.protocol_failure(e)),
        };
        if !rest.is_empty() || column_count == 0 {
            return Err(self.protocol_failure(Error::MalformedPacket));
        }

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            self.recv_packet()?;
            if self.read_buffer.first() == Some(&0xFF) {
                let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.state = State::Ready;
                return Err(self.failed(Error::Server(err)));
            }
            let meta =
                read_column_meta(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
            columns.push(meta);
        }

        // Metadata terminator; its status bits are current session state.
        self.recv_packet()?;
        let eof = read_eof(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
        self.upsert_status.warning_count = eof.warning_count;
        self.upsert_status.server_status = eof.server_status;

        self.field_count = column_count as u32;
        self.last_query_type = QueryType::Select;
        self.current_result = Some(PendingResult { columns });
        self.state = State::FetchingData;
        Ok(())
    }

    fn handle_local_infile(&mut self) -> Result<()> {
        self.state = State::SendingLoadData;
        self.last_query_type = QueryType::LoadData;
        let filename = String::from_utf8_lossy(&self.read_buffer[1..]).into_owned();
        tracing::debug!(filename = filename.as_str(), "server requested LOCAL INFILE");

        let enabled = self.options.local_infile
            && self.client_flag.contains(CapabilityFlags::CLIENT_LOCAL_FILES);

        // The server's request was sequence 1; our data packets follow.
        let mut seq = 2_u8;
        let mut failure: Option<Error> = None;

        if enabled {
            match std::fs::File::open(&filename) {
                Ok(mut file) => {
                    let chunk_size = self.options.net_cmd_buffer_size.max(4096);
                    loop {
                        self.begin_command();
                        self.cmd_buffer.resize(4 + chunk_size, 0);
                        let n = match file.read(&mut self.cmd_buffer[4..]) {
                            Ok(n) => n,
                            Err(e) => {
                                failure = Some(Error::LocalInfile(format!(
                                    "error reading '{filename}': {e}"
                                )));
                                break;
                            }
                        };
                        self.cmd_buffer.truncate(4 + n);
                        seq = self.send_command_buffer(seq)?;
                        if n == 0 {
                            // The empty packet terminates the stream.
                            break;
                        }
                    }
                }
                Err(e) => {
                    failure = Some(Error::LocalInfile(format!(
                        "can't open file '{filename}': {e}"
                    )));
                }
            }
        } else {
            failure = Some(Error::LocalInfile(format!(
                "LOAD DATA LOCAL INFILE is disabled; refusing to send '{filename}'"
            )));
        }

        if failure.is_some() {
            // Complete the exchange regardless, so the session survives.
            self.begin_command();
            self.send_command_buffer(seq)?;
        }

        self.recv_packet()?;
        let reply: Result<()> = if self.read_buffer.first() == Some(&0xFF) {
            let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
            self.upsert_status
                .server_status
                .remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
            self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
            self.state = State::Ready;
            Err(Error::Server(err))
        } else {
            let ok = read_ok(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
            self.apply_ok(&ok);
            self.state = if ok
                .server_status
                .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
            {
                State::NextResultPending
            } else {
                State::Ready
            };
            Ok(())
        };

        match (reply, failure) {
            (Err(e), _) | (Ok(()), Some(e)) => Err(self.failed(e)),
            (Ok(()), None) => Ok(()),
        }
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.last_message = Some(ok.message.clone());
        self.upsert_status.warning_count = ok.warning_count;
        self.upsert_status.server_status = ok.server_status;
        self.upsert_status.affected_rows = ok.affected_rows;
        self.upsert_status.last_insert_id = ok.last_insert_id;
    }

    /// Read one row packet. `Ok(Some(()))` leaves the row bytes in
    /// [`Conn::reply_payload`]; `Ok(None)` means the terminal EOF was
    /// consumed and the state advanced.
    pub(crate) fn fetch_row_packet(&mut self) -> Result<Option<()>> {
        if self.state != State::FetchingData {
            return Err(self.failed(Error::CommandsOutOfSync));
        }
        self.recv_packet()?;
        match self.read_buffer.first() {
            Some(&0xFF) => {
                let err = read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.upsert_status
                    .server_status
                    .remove(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
                self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
                self.state = State::Ready;
                Err(self.failed(Error::Server(err)))
            }
            Some(&0xFE) if self.read_buffer.len() < 9 => {
                let eof = read_eof(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                self.upsert_status.warning_count = eof.warning_count;
                self.upsert_status.server_status = eof.server_status;
                self.state = if eof
                    .server_status
                    .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
                {
                    State::NextResultPending
                } else {
                    State::Ready
                };
                Ok(None)
            }
            Some(_) => Ok(Some(())),
            None => Err(self.protocol_failure(Error::MalformedPacket)),
        }
    }

    /// Buffer the pending result set completely and detach it.
    pub fn store_result(&mut self) -> Result<ResultSet> {
        if self.last_query_type != QueryType::Select || self.state != State::FetchingData {
            return Err(self.failed(Error::CommandsOutOfSync));
        }
        let Some(pending) = self.current_result.take() else {
            return Err(self.failed(Error::CommandsOutOfSync));
        };
        self.stat_inc(Stat::BufferedSets);

        let mut rows = Vec::new();
        loop {
            match self.fetch_row_packet()? {
                Some(()) => {
                    let row = parse_text_row(&self.read_buffer, pending.columns.len())
                        .map_err(|e| self.protocol_failure(e))?;
                    rows.push(row);
                }
                None => break,
            }
        }
        Ok(ResultSet::new(pending.columns, rows, true))
    }

    /// Hand the pending result metadata out for unbuffered iteration.
    pub(crate) fn take_pending_result(&mut self) -> Result<PendingResult> {
        if self.last_query_type != QueryType::Select || self.state != State::FetchingData {
            return Err(self.failed(Error::CommandsOutOfSync));
        }
        let Some(pending) = self.current_result.take() else {
            return Err(self.failed(Error::CommandsOutOfSync));
        };
        self.stat_inc(Stat::UnbufferedSets);
        Ok(pending)
    }

    /// Consume and discard everything the last statement produced.
    fn drain_pending_results(&mut self) -> Result<()> {
        loop {
            if self.state == State::FetchingData {
                self.current_result = None;
                while self.fetch_row_packet()?.is_some() {}
            }
            if self.state == State::NextResultPending {
                self.next_result()?;
            } else {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    pub fn select_db(&mut self, db: &str) -> Result<()> {
        let result =
            self.simple_command(CommandByte::InitDb, db.as_bytes(), Reply::Ok, false, true);
        // libmysql never reads the count the server sends here; keep its
        // convention of reporting -1.
        self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
        result?;
        self.database = Some(db.to_owned());
        Ok(())
    }

    pub fn ping(&mut self) -> Result<()> {
        let result = self.simple_command(CommandByte::Ping, &[], Reply::Ok, true, true);
        self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
        result
    }

    /// Fetch the server's one-line statistics string.
    pub fn stat(&mut self) -> Result<String> {
        self.simple_command(CommandByte::Statistics, &[], Reply::None, false, true)?;
        self.recv_packet()?;
        Ok(read_statistics(&self.read_buffer))
    }

    /// Ask the server to kill connection `pid`. Killing the own connection
    /// produces no reply; the handle transitions straight to `QuitSent`.
    pub fn kill(&mut self, pid: u32) -> Result<()> {
        let arg = pid.to_le_bytes();
        if pid != self.thread_id {
            let result =
                self.simple_command(CommandByte::ProcessKill, &arg, Reply::Ok, false, true);
            self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
            result
        } else {
            self.simple_command(CommandByte::ProcessKill, &arg, Reply::None, false, true)?;
            self.state = State::QuitSent;
            Ok(())
        }
    }

    pub fn refresh(&mut self, options: RefreshOptions) -> Result<()> {
        self.simple_command(CommandByte::Refresh, &[options.bits()], Reply::Ok, false, true)
    }

    pub fn shutdown(&mut self, level: u8) -> Result<()> {
        self.simple_command(CommandByte::Shutdown, &[level], Reply::Ok, false, true)
    }

    pub fn set_server_option(&mut self, option: ServerOption) -> Result<()> {
        let arg = (option as u16).to_le_bytes();
        self.simple_command(CommandByte::SetOption, &arg, Reply::Eof, false, true)
    }

    pub fn dump_debug_info(&mut self) -> Result<()> {
        self.simple_command(CommandByte::Debug, &[], Reply::Eof, false, true)
    }

    /// Switch the session character set with `SET NAMES`.
    pub fn set_charset(&mut self, name: &str) -> Result<()> {
        let Some(cs) = charset::find_by_name(name) else {
            return Err(self.failed(Error::UnknownCharset(name.to_owned())));
        };
        self.query(&format!("SET NAMES {name}"))?;
        self.charset = Some(cs);
        Ok(())
    }

    /// Escape a string for interpolation into a statement, honoring the
    /// session's NO_BACKSLASH_ESCAPES mode.
    pub fn escape_string(&self, input: &str) -> String {
        if self
            .upsert_status
            .server_status
            .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES)
        {
            charset::escape_quotes(input)
        } else {
            charset::escape_slashes(input)
        }
    }

    /// Store TLS material on the transport; any of these being set requests
    /// the SSL capability on the next connect.
    pub fn ssl_set(
        &mut self,
        key: Option<&str>,
        cert: Option<&str>,
        ca: Option<&str>,
        capath: Option<&str>,
        cipher: Option<&str>,
    ) {
        let options = &mut self.net.options;
        options.ssl_key = key.map(ToOwned::to_owned);
        options.ssl_cert = cert.map(ToOwned::to_owned);
        options.ssl_ca = ca.map(ToOwned::to_owned);
        options.ssl_capath = capath.map(ToOwned::to_owned);
        options.ssl_cipher = cipher.map(ToOwned::to_owned);
    }

    /// Metadata of a table's columns via `COM_FIELD_LIST`. Unlike a `SHOW
    /// COLUMNS` query there is no result-set header, and the terminating EOF
    /// is consumed by the metadata reader itself.
    pub fn list_fields(&mut self, table: &str, wild: Option<&str>) -> Result<ResultSet> {
        let mut arg = Vec::new();
        push_bounded(&mut arg, table, crate::constant::MAX_ALLOWED_DB_LEN);
        arg.push(0);
        if let Some(wild) = wild {
            push_bounded(&mut arg, wild, crate::constant::MAX_ALLOWED_DB_LEN);
            arg.push(0);
        }

        self.simple_command(CommandByte::FieldList, &arg, Reply::None, false, true)?;

        let mut columns = Vec::new();
        loop {
            self.recv_packet()?;
            match self.read_buffer.first() {
                Some(&0xFF) => {
                    let err =
                        read_err(&self.read_buffer).map_err(|e| self.protocol_failure(e))?;
                    return Err(self.failed(Error::Server(err)));
                }
                Some(&0xFE) if self.read_buffer.len() < 9 => break,
                Some(_) => {
                    let meta = read_column_meta(&self.read_buffer)
                        .map_err(|e| self.protocol_failure(e))?;
                    columns.push(meta);
                }
                None => return Err(self.protocol_failure(Error::MalformedPacket)),
            }
        }
        self.field_count = columns.len() as u32;
        Ok(ResultSet::new(columns, Vec::new(), true))
    }

    /// Run a SHOW-style query template and buffer its result. `{}`
    /// placeholders are substituted with `par1` then `wild`, in order.
    pub fn list_method(
        &mut self,
        query: &str,
        wild: Option<&str>,
        par1: Option<&str>,
    ) -> Result<ResultSet> {
        let mut show_query = query.to_owned();
        if let Some(par1) = par1 {
            show_query = show_query.replacen("{}", par1, 1);
        }
        if let Some(wild) = wild {
            show_query = show_query.replacen("{}", wild, 1);
        }
        self.query(&show_query)?;
        self.store_result()
    }

    /// Re-authenticate the session as a different user without reconnecting.
    pub fn change_user(
        &mut self,
        user: &str,
        password: &str,
        db: &str,
        silent: bool,
    ) -> Result<()> {
        self.upsert_status.affected_rows = ERROR_AFFECTED_ROWS;
        let old_charset_name = self.charset.map(|cs| cs.name);
        let charset_no = self
            .charset
            .or(self.greet_charset)
            .map(|cs| cs.nr)
            .unwrap_or(33);
        let version = self.server_version_number();

        let mut arg = Vec::new();
        write_change_user(&mut arg, user, password, db, &self.scramble, charset_no, version);

        self.simple_command(CommandByte::ChangeUser, &arg, Reply::None, silent, true)?;
        self.recv_packet()?;

        let response = read_change_user_response(&self.read_buffer)
            .map_err(|e| self.protocol_failure(e))?;
        match response {
            ChangeUserResponse::Err(err) => {
                let e = self.failed(Error::Server(err));
                // 5.1.14..=5.1.17 send the same ERR twice; drop the echo so
                // the next command does not read a stale packet.
                if version > 50113 && version < 50118 {
                    tracing::debug!(version, "discarding redundant ERR packet");
                    let _ = self.recv_packet();
                    self.error_info.record(&e);
                }
                Err(e)
            }
            ChangeUserResponse::OldAuthRequested => Err(self.failed(Error::OldAuthRequired)),
            ChangeUserResponse::Ok(_ok) => {
                self.user = user.to_owned();
                self.password = password.to_owned();
                self.last_message = None;
                self.upsert_status = UpsertStatus::default();
                // Servers that ignore the embedded charset bytes reset the
                // session charset; restore it with a round trip.
                if version < 50123
                    && let Some(name) = old_charset_name
                {
                    self.set_charset(name)?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Close and teardown
    // ------------------------------------------------------------------

    /// Issue the logical close appropriate for the current state, then mark
    /// the connection terminal.
    pub fn send_close(&mut self) -> Result<()> {
        tracing::debug!(state = ?self.state, "send_close");
        let result = match self.state {
            State::Ready => {
                if self.net.is_open() {
                    self.simple_command(CommandByte::Quit, &[], Reply::None, true, true)
                } else {
                    Ok(())
                }
            }
            // COM_QUIT in the middle of an exchange confuses the server;
            // dropping the transport lets it clean up on its own.
            State::SendingLoadData
            | State::NextResultPending
            | State::QuerySent
            | State::FetchingData => {
                self.stat_inc(Stat::CloseInMiddle);
                Ok(())
            }
            State::Allocated | State::QuitSent => Ok(()),
        };
        self.state = State::QuitSent;
        self.net.close();
        result
    }

    /// Per-session cleanup for persistent handles picked up by a new caller
    /// session.
    pub fn restart_session(&mut self) {
        self.stat_inc(Stat::ConnectReused);
        self.last_message = None;
    }

    /// Marks the end of a caller session on a persistent handle.
    pub fn end_session(&mut self) {}

    fn free_contents(&mut self) {
        self.current_result = None;
        self.net.close();
        self.host = None;
        self.unix_socket = None;
        self.scheme = None;
        self.user.clear();
        self.password.clear();
        self.database = None;
        self.host_info.clear();
        self.server_version = None;
        self.scramble = [0; SCRAMBLE_LENGTH];
        self.last_message = None;
        self.charset = None;
        self.greet_charset = None;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> State {
        self.state
    }

    pub fn errno(&self) -> u16 {
        self.error_info.error_no
    }

    pub fn sqlstate(&self) -> &str {
        if self.error_info.sqlstate.is_empty() {
            SQLSTATE_NULL
        } else {
            &self.error_info.sqlstate
        }
    }

    pub fn error_message(&self) -> &str {
        &self.error_info.error
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// `X.Y.Z` as `X*10000 + Y*100 + Z`, ignoring any suffix.
    pub fn server_version_number(&self) -> u32 {
        let Some(version) = self.server_version.as_deref() else {
            return 0;
        };
        let mut parts = version.split('.');
        let mut component = || -> u32 {
            parts
                .next()
                .map(|p| {
                    p.bytes()
                        .take_while(u8::is_ascii_digit)
                        .fold(0_u32, |acc, b| acc * 10 + u32::from(b - b'0'))
                })
                .unwrap_or(0)
        };
        let major = component();
        let minor = component();
        let patch = component();
        major * 10000 + minor * 100 + patch
    }

    pub fn host_info(&self) -> &str {
        &self.host_info
    }

    pub fn scheme(&self) -> Option<String> {
        self.scheme.as_ref().map(ToString::to_string)
    }

    /// The human message of the last OK packet.
    pub fn info(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn charset_name(&self) -> Option<&'static str> {
        self.charset.map(|cs| cs.name)
    }

    pub fn field_count(&self) -> u32 {
        self.field_count
    }

    pub fn insert_id(&self) -> u64 {
        self.upsert_status.last_insert_id
    }

    pub fn affected_rows(&self) -> u64 {
        self.upsert_status.affected_rows
    }

    pub fn warning_count(&self) -> u16 {
        self.upsert_status.warning_count
    }

    pub fn server_status(&self) -> ServerStatusFlags {
        self.upsert_status.server_status
    }

    pub fn client_capabilities(&self) -> CapabilityFlags {
        self.client_flag
    }

    pub fn server_capabilities(&self) -> CapabilityFlags {
        self.server_capabilities
    }

    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn current_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn connection_stats(&self) -> Stats {
        self.stats.clone()
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.net.raw_fd()
    }

    // ------------------------------------------------------------------
    // Plugin data slab
    // ------------------------------------------------------------------

    pub fn plugin_data(&self, id: PluginId) -> Option<&(dyn Any)> {
        self.plugin_data.get(id.index()).and_then(|slot| slot.as_deref())
    }

    pub fn set_plugin_data(&mut self, id: PluginId, data: Box<dyn Any>) {
        if self.plugin_data.len() <= id.index() {
            self.plugin_data
                .resize_with(ops::plugin_count().max(id.index() + 1), || None);
        }
        self.plugin_data[id.index()] = Some(data);
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.state != State::QuitSent {
            let _ = self.send_close();
        }
    }
}

/// Shared, counted handle to a [`Conn`].
///
/// Result sets and statements keep the connection alive by holding a clone;
/// the transport is torn down when the last clone drops (or on an explicit
/// [`Connection::close`]).
pub struct Connection {
    inner: Rc<RefCell<Conn>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Allocate a handle with no transport.
    pub fn init(persistent: bool) -> Connection {
        Connection {
            inner: Rc::new(RefCell::new(Conn::new(persistent))),
        }
    }

    /// Allocate and connect in one step; the handle is destroyed again if
    /// the connect fails.
    pub fn connect_with(opts: &Opts) -> Result<Connection> {
        let conn = Connection::init(opts.persistent);
        conn.connect(opts)?;
        Ok(conn)
    }

    /// Another counted reference to the same connection.
    pub fn get_reference(&self) -> Connection {
        Connection { inner: Rc::clone(&self.inner) }
    }

    pub fn reference_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub(crate) fn inner_mut(&self) -> RefMut<'_, Conn> {
        self.inner.borrow_mut()
    }

    pub fn connect(&self, opts: &Opts) -> Result<()> {
        ops::conn_ops().connect(&mut self.inner.borrow_mut(), opts)
    }

    pub fn query(&self, sql: &str) -> Result<()> {
        ops::conn_ops().query(&mut self.inner.borrow_mut(), sql)
    }

    pub fn send_query(&self, sql: &str) -> Result<()> {
        ops::conn_ops().send_query(&mut self.inner.borrow_mut(), sql)
    }

    pub fn reap_query(&self) -> Result<()> {
        ops::conn_ops().reap_query(&mut self.inner.borrow_mut())
    }

    pub fn next_result(&self) -> Result<()> {
        ops::conn_ops().next_result(&mut self.inner.borrow_mut())
    }

    pub fn more_results(&self) -> bool {
        self.inner.borrow().more_results()
    }

    pub fn store_result(&self) -> Result<ResultSet> {
        ops::conn_ops().store_result(&mut self.inner.borrow_mut())
    }

    /// Stream the pending result set. The returned iterator holds a counted
    /// reference to this connection.
    pub fn use_result(&self) -> Result<UnbufferedResult> {
        let pending = self.inner.borrow_mut().take_pending_result()?;
        Ok(UnbufferedResult::new(self.get_reference(), pending.columns))
    }

    pub fn select_db(&self, db: &str) -> Result<()> {
        ops::conn_ops().select_db(&mut self.inner.borrow_mut(), db)
    }

    pub fn ping(&self) -> Result<()> {
        ops::conn_ops().ping(&mut self.inner.borrow_mut())
    }

    pub fn stat(&self) -> Result<String> {
        ops::conn_ops().stat(&mut self.inner.borrow_mut())
    }

    pub fn kill(&self, pid: u32) -> Result<()> {
        ops::conn_ops().kill(&mut self.inner.borrow_mut(), pid)
    }

    pub fn refresh(&self, options: RefreshOptions) -> Result<()> {
        ops::conn_ops().refresh(&mut self.inner.borrow_mut(), options)
    }

    pub fn shutdown(&self, level: u8) -> Result<()> {
        ops::conn_ops().shutdown(&mut self.inner.borrow_mut(), level)
    }

    pub fn set_server_option(&self, option: ServerOption) -> Result<()> {
        ops::conn_ops().set_server_option(&mut self.inner.borrow_mut(), option)
    }

    pub fn dump_debug_info(&self) -> Result<()> {
        ops::conn_ops().dump_debug_info(&mut self.inner.borrow_mut())
    }

    pub fn set_charset(&self, name: &str) -> Result<()> {
        ops::conn_ops().set_charset(&mut self.inner.borrow_mut(), name)
    }

    pub fn change_user(&self, user: &str, password: &str, db: &str, silent: bool) -> Result<()> {
        ops::conn_ops().change_user(&mut self.inner.borrow_mut(), user, password, db, silent)
    }

    pub fn list_fields(&self, table: &str, wild: Option<&str>) -> Result<ResultSet> {
        self.inner.borrow_mut().list_fields(table, wild)
    }

    pub fn list_method(
        &self,
        query: &str,
        wild: Option<&str>,
        par1: Option<&str>,
    ) -> Result<ResultSet> {
        self.inner.borrow_mut().list_method(query, wild, par1)
    }

    pub fn escape_string(&self, input: &str) -> String {
        self.inner.borrow().escape_string(input)
    }

    pub fn ssl_set(
        &self,
        key: Option<&str>,
        cert: Option<&str>,
        ca: Option<&str>,
        capath: Option<&str>,
        cipher: Option<&str>,
    ) {
        self.inner.borrow_mut().ssl_set(key, cert, ca, capath, cipher);
    }

    pub fn restart_session(&self) {
        ops::conn_ops().restart_session(&mut self.inner.borrow_mut());
    }

    pub fn end_session(&self) {
        ops::conn_ops().end_session(&mut self.inner.borrow_mut());
    }

    pub fn send_close(&self) -> Result<()> {
        ops::conn_ops().send_close(&mut self.inner.borrow_mut())
    }

    /// Close the session and release this reference. The destructor runs
    /// once every other reference (result sets, statements) is gone.
    pub fn close(self, close_type: CloseType) -> Result<()> {
        let result = {
            let mut inner = self.inner.borrow_mut();
            if inner.state >= State::Ready && inner.state != State::QuitSent {
                let stat = match close_type {
                    CloseType::Explicit => Stat::CloseExplicit,
                    CloseType::Implicit => Stat::CloseImplicit,
                    CloseType::Disconnect => Stat::CloseDisconnect,
                };
                inner.stat_inc(stat);
                inner.stat_dec(Stat::OpenedConnections);
                if inner.persistent {
                    inner.stat_dec(Stat::OpenedPersistentConnections);
                }
            }
            ops::conn_ops().send_close(&mut inner)
        };
        drop(self);
        result
    }

    // Accessors: cheap snapshots through the shared cell.

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    pub fn errno(&self) -> u16 {
        self.inner.borrow().errno()
    }

    pub fn sqlstate(&self) -> String {
        self.inner.borrow().sqlstate().to_owned()
    }

    pub fn error_message(&self) -> String {
        self.inner.borrow().error_message().to_owned()
    }

    pub fn thread_id(&self) -> u32 {
        self.inner.borrow().thread_id()
    }

    pub fn protocol_version(&self) -> u8 {
        self.inner.borrow().protocol_version()
    }

    pub fn server_version(&self) -> Option<String> {
        self.inner.borrow().server_version().map(ToOwned::to_owned)
    }

    pub fn server_version_number(&self) -> u32 {
        self.inner.borrow().server_version_number()
    }

    pub fn host_info(&self) -> String {
        self.inner.borrow().host_info().to_owned()
    }

    pub fn scheme(&self) -> Option<String> {
        self.inner.borrow().scheme()
    }

    pub fn info(&self) -> Option<String> {
        self.inner.borrow().info().map(ToOwned::to_owned)
    }

    pub fn charset_name(&self) -> Option<&'static str> {
        self.inner.borrow().charset_name()
    }

    pub fn field_count(&self) -> u32 {
        self.inner.borrow().field_count()
    }

    pub fn insert_id(&self) -> u64 {
        self.inner.borrow().insert_id()
    }

    pub fn affected_rows(&self) -> u64 {
        self.inner.borrow().affected_rows()
    }

    pub fn warning_count(&self) -> u16 {
        self.inner.borrow().warning_count()
    }

    pub fn server_status(&self) -> ServerStatusFlags {
        self.inner.borrow().server_status()
    }

    pub fn client_capabilities(&self) -> CapabilityFlags {
        self.inner.borrow().client_capabilities()
    }

    pub fn server_capabilities(&self) -> CapabilityFlags {
        self.inner.borrow().server_capabilities()
    }

    pub fn connection_stats(&self) -> Stats {
        self.inner.borrow().connection_stats()
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.inner.borrow().raw_fd()
    }
}

fn push_bounded(out: &mut Vec<u8>, value: &str, limit: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(limit);
    out.extend_from_slice(&bytes[..take]);
}

/// Write `buffer` (4 reserved header bytes + payload) as 16MB-bounded wire
/// chunks, reusing the tail of each chunk as the next header slot.
fn write_chunked(net: &mut Net, mut buffer: &mut [u8], first_seq: u8) -> Result<u8> {
    let mut sequence_id = first_seq;
    loop {
        let chunk = buffer[4..].len().min(MAX_PAYLOAD_CHUNK);
        PacketHeader::mut_from_bytes(&mut buffer[0..4])
            .map_err(|_| Error::MalformedPacket)?
            .encode_in_place(chunk, sequence_id);
        net.write_all(&buffer[..4 + chunk])?;
        sequence_id = sequence_id.wrapping_add(1);
        if chunk < MAX_PAYLOAD_CHUNK {
            break;
        }
        let taken = std::mem::take(&mut buffer);
        buffer = &mut taken[MAX_PAYLOAD_CHUNK..];
    }
    net.flush()?;
    Ok(sequence_id)
}

/// Read one payload, concatenating 16MB continuation chunks. Returns the
/// sequence id of the last chunk.
fn read_payload(net: &mut Net, buffer: &mut Vec<u8>) -> Result<u8> {
    buffer.clear();
    let mut header = PacketHeader::new_zeroed();
    net.read_exact(header.as_mut_bytes())?;
    loop {
        let length = header.length();
        let start = buffer.len();
        buffer.resize(start + length, 0);
        net.read_exact(&mut buffer[start..])?;
        if length < MAX_PAYLOAD_CHUNK {
            break;
        }
        net.read_exact(header.as_mut_bytes())?;
    }
    Ok(header.sequence_id)
}
