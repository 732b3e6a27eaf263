//! Event counters.
//!
//! Every connection carries its own counter set; most increments are mirrored
//! into a process-wide set so long-lived programs can observe totals across
//! connections without holding any handle.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::constant::CommandByte;

#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    ConnectSuccess,
    ConnectFailure,
    ConnectReused,
    Reconnect,
    PconnectSuccess,
    OpenedConnections,
    OpenedPersistentConnections,
    CloseExplicit,
    CloseImplicit,
    CloseDisconnect,
    CloseInMiddle,
    InitCommandExecuted,
    InitCommandFailed,
    RowsAffectedNormal,
    BufferedSets,
    UnbufferedSets,
    BytesSent,
    BytesReceived,
    ComQuit,
    ComInitDb,
    ComQuery,
    ComFieldList,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComChangeUser,
    ComSetOption,
}

pub const STAT_COUNT: usize = Stat::ComSetOption as usize + 1;

impl Stat {
    /// Counter bumped when the given command opcode is written to the wire.
    pub fn for_command(cmd: CommandByte) -> Stat {
        match cmd {
            CommandByte::Quit => Stat::ComQuit,
            CommandByte::InitDb => Stat::ComInitDb,
            CommandByte::Query => Stat::ComQuery,
            CommandByte::FieldList => Stat::ComFieldList,
            CommandByte::Refresh => Stat::ComRefresh,
            CommandByte::Shutdown => Stat::ComShutdown,
            CommandByte::Statistics => Stat::ComStatistics,
            CommandByte::ProcessKill => Stat::ComProcessKill,
            CommandByte::Debug => Stat::ComDebug,
            CommandByte::Ping => Stat::ComPing,
            CommandByte::ChangeUser => Stat::ComChangeUser,
            CommandByte::SetOption => Stat::ComSetOption,
        }
    }
}

/// A snapshot-friendly counter set.
#[derive(Debug, Clone)]
pub struct Stats {
    counters: [u64; STAT_COUNT],
}

impl Default for Stats {
    fn default() -> Self {
        Self { counters: [0; STAT_COUNT] }
    }
}

impl Stats {
    pub fn inc(&mut self, stat: Stat) {
        self.add(stat, 1);
    }

    pub fn add(&mut self, stat: Stat, value: u64) {
        self.counters[stat as usize] = self.counters[stat as usize].wrapping_add(value);
    }

    /// Used for the opened-connection gauges.
    pub fn dec(&mut self, stat: Stat) {
        self.counters[stat as usize] = self.counters[stat as usize].saturating_sub(1);
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counters[stat as usize]
    }
}

static GLOBAL: [AtomicU64; STAT_COUNT] = [const { AtomicU64::new(0) }; STAT_COUNT];

pub fn global_add(stat: Stat, value: u64) {
    GLOBAL[stat as usize].fetch_add(value, Ordering::Relaxed);
}

pub fn global_inc(stat: Stat) {
    global_add(stat, 1);
}

pub fn global_dec(stat: Stat) {
    let _ = GLOBAL[stat as usize].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

/// Snapshot of the process-wide counters.
pub fn global_stats() -> Stats {
    let mut snapshot = Stats::default();
    for (slot, counter) in snapshot.counters.iter_mut().zip(GLOBAL.iter()) {
        *slot = counter.load(Ordering::Relaxed);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_decrement() {
        let mut stats = Stats::default();
        stats.inc(Stat::ConnectSuccess);
        stats.add(Stat::RowsAffectedNormal, 5);
        stats.inc(Stat::OpenedConnections);
        stats.dec(Stat::OpenedConnections);
        assert_eq!(stats.get(Stat::ConnectSuccess), 1);
        assert_eq!(stats.get(Stat::RowsAffectedNormal), 5);
        assert_eq!(stats.get(Stat::OpenedConnections), 0);
        // A gauge never goes below zero.
        stats.dec(Stat::OpenedConnections);
        assert_eq!(stats.get(Stat::OpenedConnections), 0);
    }

    #[test]
    fn every_command_maps_to_a_counter() {
        for cmd in [
            CommandByte::Quit,
            CommandByte::InitDb,
            CommandByte::Query,
            CommandByte::FieldList,
            CommandByte::Refresh,
            CommandByte::Shutdown,
            CommandByte::Statistics,
            CommandByte::ProcessKill,
            CommandByte::Debug,
            CommandByte::Ping,
            CommandByte::ChangeUser,
            CommandByte::SetOption,
        ] {
            // for_command is total over the opcode set; this is a compile-time
            // guarantee made visible to the reader.
            let _ = Stat::for_command(cmd);
        }
    }
}
