//! The replaceable operation table and the plugin registry.
//!
//! Every [`Connection`](crate::Connection) operation routes through a
//! process-global [`ConnOps`] table whose default implementation forwards to
//! the concrete [`Conn`] methods. Instrumentation layers replace the whole
//! table with [`set_conn_ops`]; individual methods can be overridden while
//! delegating the rest to the defaults.
//!
//! Plugins draw monotonically increasing ids from [`plugin_register`] and
//! keep per-connection state in the connection's typed slab.

use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::conn::Conn;
use crate::constant::{RefreshOptions, ServerOption};
use crate::error::Result;
use crate::opts::Opts;
use crate::result::ResultSet;

/// The operation table. Default methods forward to [`Conn`].
pub trait ConnOps: Sync {
    fn connect(&self, conn: &mut Conn, opts: &Opts) -> Result<()> {
        conn.connect(opts)
    }
    fn query(&self, conn: &mut Conn, sql: &str) -> Result<()> {
        conn.query(sql)
    }
    fn send_query(&self, conn: &mut Conn, sql: &str) -> Result<()> {
        conn.send_query(sql)
    }
    fn reap_query(&self, conn: &mut Conn) -> Result<()> {
        conn.reap_query()
    }
    fn next_result(&self, conn: &mut Conn) -> Result<()> {
        conn.next_result()
    }
    fn store_result(&self, conn: &mut Conn) -> Result<ResultSet> {
        conn.store_result()
    }
    fn select_db(&self, conn: &mut Conn, db: &str) -> Result<()> {
        conn.select_db(db)
    }
    fn ping(&self, conn: &mut Conn) -> Result<()> {
        conn.ping()
    }
    fn stat(&self, conn: &mut Conn) -> Result<String> {
        conn.stat()
    }
    fn kill(&self, conn: &mut Conn, pid: u32) -> Result<()> {
        conn.kill(pid)
    }
    fn refresh(&self, conn: &mut Conn, options: RefreshOptions) -> Result<()> {
        conn.refresh(options)
    }
    fn shutdown(&self, conn: &mut Conn, level: u8) -> Result<()> {
        conn.shutdown(level)
    }
    fn set_server_option(&self, conn: &mut Conn, option: ServerOption) -> Result<()> {
        conn.set_server_option(option)
    }
    fn dump_debug_info(&self, conn: &mut Conn) -> Result<()> {
        conn.dump_debug_info()
    }
    fn set_charset(&self, conn: &mut Conn, name: &str) -> Result<()> {
        conn.set_charset(name)
    }
    fn change_user(
        &self,
        conn: &mut Conn,
        user: &str,
        password: &str,
        db: &str,
        silent: bool,
    ) -> Result<()> {
        conn.change_user(user, password, db, silent)
    }
    fn send_close(&self, conn: &mut Conn) -> Result<()> {
        conn.send_close()
    }
    fn restart_session(&self, conn: &mut Conn) {
        conn.restart_session();
    }
    fn end_session(&self, conn: &mut Conn) {
        conn.end_session();
    }
}

/// The stock table.
pub struct DefaultOps;

impl ConnOps for DefaultOps {}

static CONN_OPS: RwLock<&'static dyn ConnOps> = RwLock::new(&DefaultOps);

pub(crate) fn conn_ops() -> &'static dyn ConnOps {
    match CONN_OPS.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Swap the whole operation table. Affects every handle from this point on.
pub fn set_conn_ops(ops: &'static dyn ConnOps) {
    match CONN_OPS.write() {
        Ok(mut guard) => *guard = ops,
        Err(poisoned) => *poisoned.into_inner() = ops,
    }
}

/// Restore the stock table.
pub fn reset_conn_ops() {
    set_conn_ops(&DefaultOps);
}

/// Identifier handed out by [`plugin_register`], indexing the per-connection
/// data slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginId(usize);

impl PluginId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

static PLUGIN_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Allocate the next plugin id. Register before creating connections so
/// their slabs are sized to fit.
pub fn plugin_register() -> PluginId {
    PluginId(PLUGIN_COUNTER.fetch_add(1, Ordering::SeqCst))
}

pub fn plugin_count() -> usize {
    PLUGIN_COUNTER.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_ids_are_monotonic() {
        let first = plugin_register();
        let second = plugin_register();
        assert!(second.index() > first.index());
        assert!(plugin_count() > second.index());
    }
}
