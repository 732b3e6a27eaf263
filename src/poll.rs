//! Readiness multiplexer: wait on several connections at once.
//!
//! The only place the driver observes more than one connection. Each handle
//! is still mutated exclusively through the caller's own arrays: the input
//! vectors are rewritten in place to the subset whose descriptor became
//! ready, preserving relative order.

use std::os::fd::RawFd;

use crate::conn::{Connection, State};
use crate::error::{Error, Result};

/// Result of a [`poll`] call.
#[derive(Debug)]
pub struct PollOutcome {
    /// Read-interest handles with nothing in flight (state at most `Ready`)
    /// or already closed; polling them would block forever or is pointless.
    pub dont_poll: Vec<Connection>,
    /// Number of descriptors `select` reported ready.
    pub ready: usize,
}

/// Wait until one of the connections' transports is readable (`read`) or
/// exceptional (`except`), or the timeout expires.
///
/// On return the input vectors contain only the handles whose descriptor was
/// reported ready. Fails when a timeout component is negative or when no
/// array contributed a pollable descriptor.
pub fn poll(
    mut read: Option<&mut Vec<Connection>>,
    mut except: Option<&mut Vec<Connection>>,
    sec: i64,
    usec: i64,
) -> Result<PollOutcome> {
    if sec < 0 || usec < 0 {
        return Err(Error::BadConfig(
            "Negative values passed for sec and/or usec".to_owned(),
        ));
    }

    let mut dont_poll = Vec::new();
    if let Some(read) = read.as_deref_mut() {
        let mut pollable = Vec::with_capacity(read.len());
        for conn in read.drain(..) {
            let state = conn.state();
            if state <= State::Ready || state == State::QuitSent {
                dont_poll.push(conn);
            } else {
                pollable.push(conn);
            }
        }
        *read = pollable;
    }

    let mut rfds = FdSet::new();
    let mut efds = FdSet::new();
    let mut max_fd: RawFd = -1;
    let mut sets = 0;
    if let Some(read) = read.as_deref() {
        sets += collect_fds(read, &mut rfds, &mut max_fd)?;
    }
    if let Some(except) = except.as_deref() {
        sets += collect_fds(except, &mut efds, &mut max_fd)?;
    }
    if sets == 0 {
        let message = if dont_poll.is_empty() {
            "No stream arrays were passed"
        } else {
            "All arrays passed are clear"
        };
        return Err(Error::BadConfig(message.to_owned()));
    }

    // Some platforms reject microsecond values of a second or more.
    let mut tv = libc::timeval {
        tv_sec: (sec + usec / 1_000_000) as libc::time_t,
        tv_usec: (usec % 1_000_000) as libc::suseconds_t,
    };

    // SAFETY: the sets were built above, max_fd bounds them, and tv outlives
    // the call.
    let ready = unsafe {
        libc::select(
            max_fd + 1,
            rfds.as_mut_ptr(),
            std::ptr::null_mut(),
            efds.as_mut_ptr(),
            &mut tv,
        )
    };
    if ready < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    if let Some(read) = read {
        retain_ready(read, &rfds);
    }
    if let Some(except) = except {
        retain_ready(except, &efds);
    }

    Ok(PollOutcome { dont_poll, ready: ready as usize })
}

struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        // SAFETY: an all-zero fd_set is a valid empty set; FD_ZERO makes it
        // canonical on platforms where that differs.
        unsafe {
            let mut set = std::mem::MaybeUninit::<libc::fd_set>::zeroed().assume_init();
            libc::FD_ZERO(&mut set);
            FdSet(set)
        }
    }

    fn insert(&mut self, fd: RawFd) {
        // SAFETY: callers verified fd < FD_SETSIZE.
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: fd was range-checked on insertion; probing others is safe.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.0
    }
}

fn collect_fds(conns: &[Connection], set: &mut FdSet, max_fd: &mut RawFd) -> Result<usize> {
    let mut count = 0;
    for conn in conns {
        if let Some(fd) = conn.raw_fd() {
            if fd < 0 || fd as usize >= libc::FD_SETSIZE {
                return Err(Error::BadConfig(format!(
                    "descriptor {fd} does not fit in a select set"
                )));
            }
            set.insert(fd);
            if fd > *max_fd {
                *max_fd = fd;
            }
            count += 1;
        }
    }
    Ok(count)
}

fn retain_ready(conns: &mut Vec<Connection>, set: &FdSet) {
    conns.retain(|conn| conn.raw_fd().is_some_and(|fd| set.contains(fd)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_timeout_is_rejected() {
        let err = poll(None, None, -1, 0).unwrap_err();
        assert!(err.to_string().contains("Negative values"));
        let err = poll(None, None, 0, -1).unwrap_err();
        assert!(err.to_string().contains("Negative values"));
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = poll(None, None, 0, 0).unwrap_err();
        assert!(err.to_string().contains("No stream arrays"));

        // An array holding only unpollable handles is "clear".
        let mut read = vec![Connection::init(false)];
        let err = poll(Some(&mut read), None, 0, 0).unwrap_err();
        assert!(err.to_string().contains("All arrays passed are clear"));
    }
}
