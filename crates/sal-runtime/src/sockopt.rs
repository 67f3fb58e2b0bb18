//! Socket options and descriptor flags
//!
//! Only the socket-level pending-error query and the receive timeout are
//! implemented, plus the non-blocking flag through `fcntl`.

use std::time::Duration;

use sal_core::{kdebug, Fd, SalError, SalResult};

use crate::sal::Sal;

/// Value of a socket option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOptValue {
    Int(i32),
    Duration(Duration),
}

impl Sal {
    /// Query a socket option
    ///
    /// `SO_ERROR` returns the pending error and clears it. When nothing is
    /// pending (or only `EINPROGRESS`) the connection's last transport
    /// error is reported instead.
    pub fn getsockopt(&self, fd: Fd, level: i32, optname: i32) -> SalResult<SockOptValue> {
        let view = self.conn_view(fd).or_else(|e| self.fail("getsockopt", fd, e))?;

        if level != libc::SOL_SOCKET {
            return self.fail("getsockopt", fd, SalError::OptionNotSupported);
        }
        let value = match optname {
            libc::SO_ERROR => self.with_socket(&view, |slot| {
                if slot.err == 0 || slot.err == libc::EINPROGRESS {
                    if let Some(conn) = slot.conn.as_deref() {
                        slot.err = conn.last_err;
                    }
                }
                SockOptValue::Int(std::mem::take(&mut slot.err))
            }),
            libc::SO_RCVTIMEO => self.with_socket(&view, |slot| {
                slot.err = 0;
                SockOptValue::Duration(view.recv_timeout)
            }),
            _ => return self.fail("getsockopt", fd, SalError::OptionNotSupported),
        };
        value.or_else(|e| self.fail("getsockopt", fd, e))
    }

    /// Set a socket option; only `SOL_SOCKET/SO_RCVTIMEO` is accepted
    ///
    /// A zero timeout disables it. Integer values are taken as milliseconds.
    pub fn setsockopt(
        &self,
        fd: Fd,
        level: i32,
        optname: i32,
        value: SockOptValue,
    ) -> SalResult<()> {
        let view = self.conn_view(fd).or_else(|e| self.fail("setsockopt", fd, e))?;

        if level != libc::SOL_SOCKET || optname != libc::SO_RCVTIMEO {
            return self.fail("setsockopt", fd, SalError::OptionNotSupported);
        }
        let timeout = match value {
            SockOptValue::Duration(d) => d,
            SockOptValue::Int(ms) if ms >= 0 => Duration::from_millis(ms as u64),
            SockOptValue::Int(_) => return self.fail("setsockopt", fd, SalError::InvalidArgument),
        };

        self.with_socket(&view, |slot| {
            if let Some(conn) = slot.conn.as_deref_mut() {
                conn.recv_timeout = timeout;
            }
            slot.err = 0;
        })
        .or_else(|e| self.fail("setsockopt", fd, e))?;

        kdebug!("setsockopt: fd {} SO_RCVTIMEO {:?}", fd, timeout);
        Ok(())
    }

    /// Shorthand for `setsockopt(SOL_SOCKET, SO_RCVTIMEO)`
    pub fn set_recv_timeout(&self, fd: Fd, timeout: Duration) -> SalResult<()> {
        self.setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, SockOptValue::Duration(timeout))
    }

    /// Get or set descriptor flags; only `O_NONBLOCK` is understood
    pub fn fcntl(&self, fd: Fd, cmd: i32, val: i32) -> SalResult<i32> {
        let view = self.conn_view(fd).or_else(|e| self.fail("fcntl", fd, e))?;

        match cmd {
            libc::F_GETFL => Ok(if view.nonblocking { libc::O_NONBLOCK } else { 0 }),
            libc::F_SETFL if val & !libc::O_NONBLOCK == 0 => {
                let nonblocking = val & libc::O_NONBLOCK != 0;
                self.with_socket(&view, |slot| {
                    if let Some(conn) = slot.conn.as_deref_mut() {
                        conn.nonblocking = nonblocking;
                    }
                })
                .or_else(|e| self.fail("fcntl", fd, e))?;
                kdebug!("fcntl: fd {} nonblocking={}", fd, nonblocking);
                Ok(0)
            }
            _ => self.fail("fcntl", fd, SalError::NotImplemented),
        }
    }
}
