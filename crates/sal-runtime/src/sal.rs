//! The socket layer instance and connection lifecycle
//!
//! One `Sal` owns the socket table, the event table and the waiter list,
//! all behind a single critical section, plus the transport it drives.
//! The transport is never called with the critical section held: an
//! operation copies what it needs out of the slot, releases, talks to the
//! transport, then re-enters and writes back only if the slot generation
//! still matches.
//!
//! The remaining application operations live beside their subsystem:
//! `select`, `dispatch`, `io`, `sockopt` and `netdb` each add an
//! `impl Sal` block.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use std::time::Duration;

use sal_core::{
    kdebug, kerror, kinfo, kwarn, ConnSpec, Critical, CriticalGuard, EventSink, Fd, FdKind,
    FdLayout, NetconnEvent, NetconnState, NetconnType, SalError, SalResult, Transport,
};

use crate::config::SalConfig;
use crate::dispatch::wake_waiters;
use crate::netconn::{create_connection, destroy_connection};
use crate::tables::{SalState, SocketSlot};

/// The socket abstraction layer
pub struct Sal {
    state: Critical<SalState>,
    config: SalConfig,
    layout: FdLayout,
    transport: Arc<dyn Transport>,
}

/// Snapshot of a socket taken under the critical section
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnView {
    pub index: usize,
    pub generation: u32,
    pub ty: NetconnType,
    pub state: NetconnState,
    pub started: bool,
    pub nonblocking: bool,
    pub recv_timeout: Duration,
    pub local_port: u16,
}

/// Table occupancy (diagnostics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SalStats {
    pub sockets_in_use: usize,
    pub events_in_use: usize,
    pub waiters: usize,
}

impl Sal {
    /// Build a socket layer on top of `transport`
    ///
    /// Validates the config, runs the transport's low-level init and
    /// installs this instance as the transport's event sink.
    pub fn new(config: SalConfig, transport: Arc<dyn Transport>) -> SalResult<Arc<Sal>> {
        if let Err(e) = config.validate() {
            kerror!("sal: {}", e);
            return Err(SalError::InvalidArgument);
        }
        if let Err(e) = transport.init() {
            kerror!("sal: {} init failed: {}", transport.name(), e);
            return Err(e);
        }

        let layout = config.layout();
        let sal = Arc::new(Sal {
            state: Critical::new(SalState::new(layout)),
            config,
            layout,
            transport: transport.clone(),
        });

        let sink: Weak<Sal> = Arc::downgrade(&sal);
        transport.register_event_sink(sink);

        kinfo!(
            "sal: up on {} (sockets [{}, {}), events [{}, {}))",
            transport.name(),
            layout.socket_base,
            layout.event_base(),
            layout.event_base(),
            layout.end()
        );
        Ok(sal)
    }

    #[inline]
    pub fn config(&self) -> &SalConfig {
        &self.config
    }

    #[inline]
    pub fn layout(&self) -> &FdLayout {
        &self.layout
    }

    #[inline]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[inline]
    pub(crate) fn enter(&self) -> CriticalGuard<'_, SalState> {
        self.state.enter()
    }

    pub fn stats(&self) -> SalStats {
        let st = self.enter();
        SalStats {
            sockets_in_use: st.sockets_in_use(),
            events_in_use: st.events_in_use(),
            waiters: st.waiters.len(),
        }
    }

    /// Number of select calls registered on a socket, `None` if not live
    pub fn select_waiting(&self, fd: Fd) -> Option<u32> {
        let st = self.enter();
        st.lookup_socket(fd).map(|i| st.sockets[i].select_waiting)
    }

    // ---------------------------------------------------------------------
    // Error recording
    // ---------------------------------------------------------------------

    /// Store `err` as the socket's pending errno (0 clears)
    ///
    /// Silently ignores descriptors that are not live sockets. Must not be
    /// called with the critical section held.
    pub(crate) fn set_errno(&self, fd: Fd, err: i32) {
        let mut st = self.enter();
        if let Some(i) = st.lookup_socket(fd) {
            st.sockets[i].err = err;
        }
    }

    /// Record, log and return a socket-scoped failure
    pub(crate) fn fail<T>(&self, op: &'static str, fd: Fd, e: SalError) -> SalResult<T> {
        if !matches!(e, SalError::BadDescriptor) {
            self.set_errno(fd, e.errno_raw());
        }
        match e {
            SalError::Transport(_) => kwarn!("{}({}): {}", op, fd, e),
            SalError::Internal(_) => kerror!("{}({}): {}", op, fd, e),
            _ => kdebug!("{}({}): {}", op, fd, e),
        }
        Err(e)
    }

    /// Remember a failure on the connection itself
    ///
    /// Transport errors keep the stack's own code so `SO_ERROR` can report
    /// it; everything else is stored as its errno.
    pub(crate) fn set_last_err(&self, view: &ConnView, e: SalError) {
        let code = match e {
            SalError::Transport(code) => code,
            other => other.errno_raw(),
        };
        let _ = self.with_socket(view, |slot| {
            if let Some(conn) = slot.conn.as_deref_mut() {
                conn.last_err = code;
            }
        });
    }

    /// Copy a live socket's connection state out of the table
    pub(crate) fn conn_view(&self, fd: Fd) -> SalResult<ConnView> {
        let st = self.enter();
        let index = st.lookup_socket(fd).ok_or(SalError::BadDescriptor)?;
        let slot = &st.sockets[index];
        let conn = slot
            .conn
            .as_deref()
            .ok_or(SalError::Internal("live socket slot without netconn"))?;
        Ok(ConnView {
            index,
            generation: slot.generation,
            ty: conn.ty,
            state: conn.state,
            started: conn.started,
            nonblocking: conn.nonblocking,
            recv_timeout: conn.recv_timeout,
            local_port: conn.pcb.ip().map_or(0, |p| p.local_port),
        })
    }

    /// Run `f` on the slot a view was taken from, if it is still that socket
    pub(crate) fn with_socket<R>(
        &self,
        view: &ConnView,
        f: impl FnOnce(&mut SocketSlot) -> R,
    ) -> SalResult<R> {
        let mut st = self.enter();
        let slot = st
            .socket_at(view.index, view.generation)
            .ok_or(SalError::BadDescriptor)?;
        Ok(f(slot))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Create a socket
    ///
    /// Only `AF_INET` stream and datagram sockets are supported. TCP sockets
    /// start non-writable until their connect completes.
    pub fn socket(&self, domain: i32, ty: i32, protocol: i32) -> SalResult<Fd> {
        if domain != libc::AF_INET {
            kdebug!("socket: unsupported domain {}", domain);
            return Err(SalError::InvalidArgument);
        }
        let nty = match NetconnType::from_sock_type(ty) {
            Some(t @ (NetconnType::Tcp | NetconnType::Udp)) => t,
            _ => {
                kdebug!("socket: unsupported type {} (protocol {})", ty, protocol);
                return Err(SalError::InvalidArgument);
            }
        };

        let conn = match create_connection(nty) {
            Ok(c) => c,
            Err(e) => {
                kwarn!("socket: cannot create {} netconn: {}", nty, e);
                return Err(SalError::NoBuffers);
            }
        };

        let claimed = self.enter().allocate_socket(conn, false);
        match claimed {
            Ok(fd) => {
                kdebug!("socket: {} -> fd {}", nty, fd);
                Ok(fd)
            }
            Err(conn) => {
                destroy_connection(Some(conn));
                kwarn!("socket: table full ({} slots)", self.layout.num_sockets);
                Err(SalError::TooManyOpenFiles)
            }
        }
    }

    /// Create an event object with an initial counter
    ///
    /// `flags` are accepted for source compatibility and ignored.
    pub fn eventfd(&self, initval: u32, flags: i32) -> SalResult<Fd> {
        if flags != 0 {
            kdebug!("eventfd: ignoring flags {:#x}", flags);
        }
        let fd = self.enter().allocate_event(u64::from(initval));
        match fd {
            Some(fd) => {
                kdebug!("eventfd: initval {} -> fd {}", initval, fd);
                Ok(fd)
            }
            None => {
                kwarn!("eventfd: table full ({} slots)", self.layout.num_events);
                Err(SalError::TooManyOpenFiles)
            }
        }
    }

    /// Assign a local address
    ///
    /// UDP only records the address; it takes effect on the next connect or
    /// sendto. TCP starts a server on the transport.
    pub fn bind(&self, fd: Fd, addr: &SocketAddr) -> SalResult<()> {
        let local = ipv4_only(addr).or_else(|e| self.fail("bind", fd, e))?;
        let view = self.conn_view(fd).or_else(|e| self.fail("bind", fd, e))?;

        match view.ty {
            NetconnType::Udp => {}
            NetconnType::Tcp => {
                if view.state != NetconnState::None {
                    return self.fail("bind", fd, SalError::InvalidArgument);
                }
                if let Err(e) = self.transport.start(&ConnSpec::tcp_server(fd, local.port())) {
                    self.set_last_err(&view, e);
                    return self.fail("bind", fd, e);
                }
            }
            NetconnType::Raw => return self.fail("bind", fd, SalError::Unsupported),
        }

        let started = view.ty == NetconnType::Tcp;
        self.with_socket(&view, |slot| {
            if let Some(conn) = slot.conn.as_deref_mut() {
                if let Some(pcb) = conn.pcb.ip_mut() {
                    pcb.set_local(local);
                }
                conn.started |= started;
            }
            slot.err = 0;
        })
        .or_else(|e| self.fail("bind", fd, e))?;

        kdebug!("bind: fd {} -> {}", fd, local);
        Ok(())
    }

    /// Mark a TCP socket as accepting connections
    pub fn listen(&self, fd: Fd, backlog: i32) -> SalResult<()> {
        let view = self.conn_view(fd).or_else(|e| self.fail("listen", fd, e))?;
        if view.ty != NetconnType::Tcp {
            return self.fail("listen", fd, SalError::InvalidArgument);
        }
        self.set_errno(fd, 0);
        kdebug!("listen: fd {} backlog {}", fd, backlog);
        Ok(())
    }

    /// Connect to a remote IPv4 endpoint
    ///
    /// UDP may re-connect to a different peer; TCP may connect once.
    pub fn connect(&self, fd: Fd, addr: &SocketAddr) -> SalResult<()> {
        let remote = ipv4_only(addr).or_else(|e| self.fail("connect", fd, e))?;
        let view = self.conn_view(fd).or_else(|e| self.fail("connect", fd, e))?;

        let spec = match view.ty {
            NetconnType::Udp => {
                let local = (view.local_port != 0).then_some(view.local_port);
                ConnSpec::udp_unicast(fd, remote, local)
            }
            NetconnType::Tcp => {
                if view.state != NetconnState::None {
                    return self.fail("connect", fd, SalError::AlreadyConnected);
                }
                ConnSpec::tcp_client(fd, remote)
            }
            NetconnType::Raw => return self.fail("connect", fd, SalError::InvalidArgument),
        };

        if let Err(e) = self.transport.start(&spec) {
            self.set_last_err(&view, e);
            return self.fail("connect", fd, e);
        }

        self.with_socket(&view, |slot| {
            if let Some(conn) = slot.conn.as_deref_mut() {
                if let Some(pcb) = conn.pcb.ip_mut() {
                    pcb.set_remote(remote);
                }
                conn.state = NetconnState::Connect;
                conn.started = true;
            }
            slot.err = 0;
        })
        .or_else(|e| self.fail("connect", fd, e))?;

        kdebug!("connect: fd {} -> {} ({:?})", fd, remote, spec.kind);
        Ok(())
    }

    /// Accepted for compatibility; has no effect
    pub fn shutdown(&self, fd: Fd, how: i32) -> SalResult<()> {
        self.conn_view(fd).or_else(|e| self.fail("shutdown", fd, e))?;
        kdebug!("shutdown: fd {} how {} ignored", fd, how);
        Ok(())
    }

    /// Release a socket or event descriptor
    ///
    /// Select calls watching the descriptor are woken and will report
    /// `BadDescriptor`. A socket whose transport session fails to close is
    /// still released; the transport error is returned afterwards.
    pub fn close(&self, fd: Fd) -> SalResult<()> {
        if let FdKind::Event(_) = self.layout.classify(fd) {
            return self.close_event(fd);
        }

        let view = self.conn_view(fd).or_else(|e| self.fail("close", fd, e))?;
        self.close_socket(fd, view)
    }

    /// Release the socket described by `view`, if it is still current
    ///
    /// The slot is freed before the transport session is closed, and stays
    /// reserved until that close returns so the fd cannot be reissued to a
    /// socket whose session the close would tear down.
    pub(crate) fn close_socket(&self, fd: Fd, view: ConnView) -> SalResult<()> {
        let conn = {
            let mut st = self.enter();
            if st.socket_at(view.index, view.generation).is_none() {
                drop(st);
                kdebug!("close: fd {} closed concurrently", fd);
                return Err(SalError::BadDescriptor);
            }
            let watched = st.sockets[view.index].select_waiting > 0;
            let conn = st.free_socket(view.index);
            st.sockets[view.index].closing = view.started;
            if watched {
                wake_waiters(&mut st, |_, w| w.watches(fd));
            }
            conn
        };

        let closed = if view.started {
            let r = self.transport.close(fd);
            self.enter().sockets[view.index].closing = false;
            r
        } else {
            Ok(())
        };
        destroy_connection(conn);

        match closed {
            Ok(()) => {
                kdebug!("close: fd {}", fd);
                Ok(())
            }
            Err(e) => {
                kwarn!("close: fd {} released, transport close failed: {}", fd, e);
                Err(e)
            }
        }
    }

    fn close_event(&self, fd: Fd) -> SalResult<()> {
        let mut st = self.enter();
        let Some(index) = st.lookup_event(fd) else {
            drop(st);
            kdebug!("close({}): {}", fd, SalError::BadDescriptor);
            return Err(SalError::BadDescriptor);
        };
        if let Some(sem) = st.free_event(index) {
            sem.signal();
        }
        drop(st);
        kdebug!("close: event fd {}", fd);
        Ok(())
    }
}

impl EventSink for Sal {
    fn deal_event(&self, fd: Fd, evt: NetconnEvent) {
        self.dispatch_event(fd, evt);
    }
}

/// Narrow an address to IPv4
pub(crate) fn ipv4_only(addr: &SocketAddr) -> SalResult<SocketAddrV4> {
    match addr {
        SocketAddr::V4(a) => Ok(*a),
        SocketAddr::V6(_) => Err(SalError::Unsupported),
    }
}
