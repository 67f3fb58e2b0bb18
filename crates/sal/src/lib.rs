//! # sal - Socket Abstraction Layer
//!
//! BSD-style sockets, `select` and event descriptors on top of a network
//! stack that only knows about connections and readiness callbacks.
//!
//! ## Features
//!
//! - **Descriptors**: sockets and event counters share one small integer space
//! - **Select**: blocking readiness wait across sockets and events
//! - **Event descriptors**: 64-bit counters that wake selectors on write
//! - **Blocking I/O**: receive with timeouts, leftover handling for streams
//! - **Pluggable stack**: anything implementing [`Transport`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use sal::FdSet;
//!
//! sal::init().unwrap();
//!
//! let efd = sal::eventfd(0, 0);
//! sal::write(efd, &1u64.to_ne_bytes());
//!
//! let mut rd = FdSet::new();
//! rd.set(efd.into());
//! let n = sal::select(efd + 1, Some(&mut rd), None, None, Some(Duration::from_millis(100)));
//! assert_eq!(n, 1);
//! ```
//!
//! Every free function returns `-1` on failure and leaves the error code in
//! a thread-local readable through [`errno()`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │      socket(), connect(), select(), recv(), eventfd()       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Sal                                 │
//! │   socket/event tables, waiter list, one critical section    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                       ▲
//!          │ start/send/recv/close                 │ deal_event
//!          ▼                                       │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Transport (network stack)                 │
//! │            lwIP-like stack, or the loopback transport       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::cell::Cell;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

// Re-export core types
pub use sal_core::{
    AddrInfoError,
    ConnKind,
    ConnSpec,
    Datagram,
    EventSink,
    Fd,
    FdLayout,
    FdSet,
    NetconnEvent,
    NetconnState,
    NetconnType,
    SalError,
    SalResult,
    Transport,
    FD_SETSIZE,
};

// Re-export kprint macros for debug logging
pub use sal_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use sal_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled, set_time_enabled};

// Re-export env utilities
pub use sal_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use sal_runtime::{
    freeaddrinfo,
    AddrInfo,
    AddrInfoHints,
    ConfigError,
    HostEnt,
    LoopbackTransport,
    Sal,
    SalConfig,
    SalStats,
    SentRecord,
    SockOptValue,
};

static INSTANCE: OnceLock<Arc<Sal>> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    static ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// Initialize the process-wide instance from the environment over a loopback transport
pub fn init() -> SalResult<()> {
    sal_core::kprint::init();
    init_with(SalConfig::from_env(), Arc::new(LoopbackTransport::new()))
}

/// Initialize the process-wide instance with an explicit config and network stack
///
/// Fails with `Internal` if an instance already exists.
pub fn init_with(config: SalConfig, transport: Arc<dyn Transport>) -> SalResult<()> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if INSTANCE.get().is_some() {
        kwarn!("sal: already initialized");
        return Err(SalError::Internal("already initialized"));
    }
    let sal = Sal::new(config, transport)?;
    INSTANCE
        .set(sal)
        .map_err(|_| SalError::Internal("already initialized"))
}

/// The process-wide instance, if initialized
#[inline]
pub fn instance() -> Option<&'static Arc<Sal>> {
    INSTANCE.get()
}

/// Error code left by the last failing call on this thread
#[inline]
pub fn errno() -> i32 {
    ERRNO.with(Cell::get)
}

/// Overwrite this thread's error code
#[inline]
pub fn set_errno(code: i32) {
    ERRNO.with(|e| e.set(code));
}

fn with_sal<T>(f: impl FnOnce(&Sal) -> SalResult<T>) -> SalResult<T> {
    let r = match INSTANCE.get() {
        Some(sal) => f(sal),
        None => {
            kdebug!("sal: call before init");
            Err(SalError::Internal("not initialized"))
        }
    };
    if let Err(e) = &r {
        set_errno(e.errno_raw());
    }
    r
}

fn ret_fd(r: SalResult<Fd>) -> i32 {
    r.map(Fd::as_raw).unwrap_or(-1)
}

fn ret_unit(r: SalResult<()>) -> i32 {
    r.map(|_| 0).unwrap_or(-1)
}

fn ret_len(r: SalResult<usize>) -> isize {
    r.map(|n| n as isize).unwrap_or(-1)
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create a socket; returns the descriptor or -1
pub fn socket(domain: i32, ty: i32, protocol: i32) -> i32 {
    ret_fd(with_sal(|s| s.socket(domain, ty, protocol)))
}

/// Create an event descriptor holding `initval`
pub fn eventfd(initval: u32, flags: i32) -> i32 {
    ret_fd(with_sal(|s| s.eventfd(initval, flags)))
}

pub fn bind(fd: i32, addr: &SocketAddr) -> i32 {
    ret_unit(with_sal(|s| s.bind(Fd::new(fd), addr)))
}

pub fn listen(fd: i32, backlog: i32) -> i32 {
    ret_unit(with_sal(|s| s.listen(Fd::new(fd), backlog)))
}

pub fn connect(fd: i32, addr: &SocketAddr) -> i32 {
    ret_unit(with_sal(|s| s.connect(Fd::new(fd), addr)))
}

pub fn shutdown(fd: i32, how: i32) -> i32 {
    ret_unit(with_sal(|s| s.shutdown(Fd::new(fd), how)))
}

/// Close a socket or event descriptor; blocked selectors watching it wake
pub fn close(fd: i32) -> i32 {
    ret_unit(with_sal(|s| s.close(Fd::new(fd))))
}

// ============================================================================
// I/O
// ============================================================================

/// Receive into `buf`, storing the sender in `from` when the stack reports one
pub fn recvfrom(fd: i32, buf: &mut [u8], flags: i32, from: Option<&mut SocketAddrV4>) -> isize {
    ret_len(with_sal(|s| {
        let (n, src) = s.recvfrom(Fd::new(fd), buf, flags)?;
        if let (Some(out), Some(src)) = (from, src) {
            *out = src;
        }
        Ok(n)
    }))
}

pub fn recv(fd: i32, buf: &mut [u8], flags: i32) -> isize {
    ret_len(with_sal(|s| s.recv(Fd::new(fd), buf, flags)))
}

/// Read from a socket or an event descriptor
pub fn read(fd: i32, buf: &mut [u8]) -> isize {
    ret_len(with_sal(|s| s.read(Fd::new(fd), buf)))
}

pub fn sendto(fd: i32, data: &[u8], flags: i32, to: Option<&SocketAddr>) -> isize {
    ret_len(with_sal(|s| s.sendto(Fd::new(fd), data, flags, to)))
}

pub fn send(fd: i32, data: &[u8], flags: i32) -> isize {
    ret_len(with_sal(|s| s.send(Fd::new(fd), data, flags)))
}

/// Write to a socket or an event descriptor
pub fn write(fd: i32, data: &[u8]) -> isize {
    ret_len(with_sal(|s| s.write(Fd::new(fd), data)))
}

// ============================================================================
// Select
// ============================================================================

/// Wait until a descriptor in the given sets is ready
///
/// `None` timeout blocks indefinitely; a zero timeout polls. On return the
/// sets hold only the ready descriptors. Returns the ready count, 0 on
/// timeout, -1 on error (sets untouched).
pub fn select(
    nfds: i32,
    readset: Option<&mut FdSet>,
    writeset: Option<&mut FdSet>,
    exceptset: Option<&mut FdSet>,
    timeout: Option<Duration>,
) -> i32 {
    with_sal(|s| s.select(nfds, readset, writeset, exceptset, timeout))
        .map(|n| n as i32)
        .unwrap_or(-1)
}

/// Readiness callback for the network stack, keyed by the raw event code
///
/// Unknown codes panic.
pub fn deal_event(fd: i32, code: u32) {
    if let Some(sal) = INSTANCE.get() {
        sal.dispatch_raw(Fd::new(fd), code);
    }
}

// ============================================================================
// Options and descriptor flags
// ============================================================================

pub fn getsockopt(fd: i32, level: i32, optname: i32, optval: &mut SockOptValue) -> i32 {
    ret_unit(with_sal(|s| {
        *optval = s.getsockopt(Fd::new(fd), level, optname)?;
        Ok(())
    }))
}

pub fn setsockopt(fd: i32, level: i32, optname: i32, optval: SockOptValue) -> i32 {
    ret_unit(with_sal(|s| s.setsockopt(Fd::new(fd), level, optname, optval)))
}

/// `F_GETFL`/`F_SETFL` with `O_NONBLOCK` only
pub fn fcntl(fd: i32, cmd: i32, val: i32) -> i32 {
    with_sal(|s| s.fcntl(Fd::new(fd), cmd, val)).unwrap_or(-1)
}

// ============================================================================
// Name resolution
// ============================================================================

/// Resolve `node`/`service`; returns 0 or an `EAI_*` code
pub fn getaddrinfo(
    node: Option<&str>,
    service: Option<&str>,
    hints: Option<&AddrInfoHints>,
    res: &mut Option<AddrInfo>,
) -> i32 {
    let Some(sal) = INSTANCE.get() else {
        return AddrInfoError::Fail.code();
    };
    match sal.getaddrinfo(node, service, hints) {
        Ok(ai) => {
            *res = Some(ai);
            0
        }
        Err(e) => e.code(),
    }
}

pub fn gethostbyname(name: &str) -> Option<HostEnt> {
    with_sal(|s| s.gethostbyname(name)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    static LOOPBACK: OnceLock<Arc<LoopbackTransport>> = OnceLock::new();

    /// Tests share one instance; each test closes what it opens
    fn ensure_init() -> &'static Arc<LoopbackTransport> {
        LOOPBACK.get_or_init(|| {
            let lo = Arc::new(LoopbackTransport::new());
            let config = SalConfig::new()
                .num_sockets(32)
                .num_events(32)
                .recv_poll(Duration::from_millis(2));
            init_with(config, lo.clone()).unwrap();
            lo
        })
    }

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_double_init_rejected() {
        ensure_init();
        let again = init_with(SalConfig::new(), Arc::new(LoopbackTransport::new()));
        assert_eq!(again, Err(SalError::Internal("already initialized")));
        assert!(instance().is_some());
    }

    #[test]
    fn test_bad_descriptor_sets_errno() {
        ensure_init();
        set_errno(0);
        assert_eq!(close(900), -1);
        assert_eq!(errno(), libc::EBADF);

        assert_eq!(socket(libc::AF_INET6, libc::SOCK_STREAM, 0), -1);
        assert_eq!(errno(), libc::EINVAL);
    }

    #[test]
    fn test_errno_is_per_thread() {
        ensure_init();
        set_errno(0);
        thread::spawn(|| {
            assert_eq!(close(901), -1);
            assert_eq!(errno(), libc::EBADF);
        })
        .join()
        .unwrap();
        assert_eq!(errno(), 0);
    }

    #[test]
    fn test_eventfd_select_read() {
        ensure_init();
        let efd = eventfd(0, 0);
        assert!(efd >= 0);

        let mut rd = FdSet::new();
        rd.set(Fd::new(efd));
        assert_eq!(select(efd + 1, Some(&mut rd), None, None, Some(Duration::ZERO)), 0);

        assert_eq!(write(efd, &3u64.to_ne_bytes()), 8);
        let mut rd = FdSet::new();
        rd.set(Fd::new(efd));
        assert_eq!(select(efd + 1, Some(&mut rd), None, None, Some(Duration::ZERO)), 1);
        assert!(rd.is_set(Fd::new(efd)));

        let mut buf = [0u8; 8];
        assert_eq!(read(efd, &mut buf), 8);
        assert_eq!(u64::from_ne_bytes(buf), 3);
        assert_eq!(read(efd, &mut buf), -1);
        assert_eq!(errno(), libc::EWOULDBLOCK);

        assert_eq!(close(efd), 0);
    }

    #[test]
    fn test_udp_send_and_receive() {
        let lo = ensure_init();
        let rx = socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        let tx = socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        assert!(rx >= 0 && tx >= 0);

        assert_eq!(bind(rx, &localhost(47001)), 0);
        assert_eq!(connect(rx, &localhost(47002)), 0);
        assert_eq!(bind(tx, &localhost(47002)), 0);
        assert_eq!(sendto(tx, b"ping", 0, Some(&localhost(47001))), 4);
        assert!(lo.take_sent().iter().any(|r| r.fd == Fd::new(tx) && r.data == b"ping"));

        let mut buf = [0u8; 16];
        let mut from = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        assert_eq!(recvfrom(rx, &mut buf, 0, Some(&mut from)), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(from.port(), 47002);

        assert_eq!(close(tx), 0);
        assert_eq!(close(rx), 0);
    }

    #[test]
    fn test_options_and_flags() {
        ensure_init();
        let s = socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        assert!(s >= 0);

        assert_eq!(fcntl(s, libc::F_SETFL, libc::O_NONBLOCK), 0);
        assert_eq!(fcntl(s, libc::F_GETFL, 0), libc::O_NONBLOCK);

        let mut buf = [0u8; 4];
        assert_eq!(recv(s, &mut buf, 0), -1);
        assert_eq!(errno(), libc::EWOULDBLOCK);

        let mut v = SockOptValue::Int(-1);
        assert_eq!(getsockopt(s, libc::SOL_SOCKET, libc::SO_ERROR, &mut v), 0);
        assert_eq!(v, SockOptValue::Int(libc::EWOULDBLOCK));

        assert_eq!(setsockopt(s, libc::SOL_SOCKET, libc::SO_KEEPALIVE, SockOptValue::Int(1)), -1);
        assert_eq!(errno(), libc::ENOPROTOOPT);

        assert_eq!(close(s), 0);
    }

    #[test]
    fn test_name_resolution() {
        let lo = ensure_init();
        lo.add_host("facade.test", Ipv4Addr::new(10, 9, 8, 7));

        let mut res = None;
        assert_eq!(getaddrinfo(Some("facade.test"), Some("80"), None, &mut res), 0);
        let ai = res.take().unwrap();
        assert_eq!(ai.addr, SocketAddrV4::new(Ipv4Addr::new(10, 9, 8, 7), 80));
        freeaddrinfo(ai);

        assert_eq!(getaddrinfo(None, None, None, &mut res), libc::EAI_NONAME);
        assert!(res.is_none());

        let h = gethostbyname("facade.test").unwrap();
        assert_eq!(h.addr_list, vec![Ipv4Addr::new(10, 9, 8, 7)]);
        assert!(gethostbyname("").is_none());
        assert_eq!(errno(), libc::EINVAL);
    }
}
