//! In-memory network stack
//!
//! `LoopbackTransport` stands in for a modem or driver underneath the
//! socket layer. It keeps per-descriptor inboxes, logs every outbound
//! payload, routes UDP traffic between local sessions that own a port on
//! 127.0.0.1, and raises the same readiness events a real stack would.
//!
//! Events are always delivered after the transport's own lock is released.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use crossbeam_queue::SegQueue;
use sal_core::{
    kdebug, ktrace, ConnKind, ConnSpec, Datagram, EventSink, Fd, NetconnEvent, SalError,
    SalResult, Transport,
};

/// One payload handed to `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub fd: Fd,
    pub data: Vec<u8>,
    pub remote: Option<SocketAddrV4>,
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    sessions: HashMap<Fd, ConnSpec>,
    inboxes: HashMap<Fd, VecDeque<Datagram>>,
    /// Local port -> owning session
    ports: HashMap<u16, Fd>,
    hosts: HashMap<String, Ipv4Addr>,
    fail_start: Option<SalError>,
    fail_close: Option<SalError>,
    fail_send: Option<SalError>,
}

impl Inner {
    fn release_ports(&mut self, fd: Fd) {
        self.ports.retain(|_, owner| *owner != fd);
    }
}

/// A network stack that never leaves the process
#[derive(Default)]
pub struct LoopbackTransport {
    inner: Mutex<Inner>,
    sent: SegQueue<SentRecord>,
    sink: Mutex<Option<Weak<dyn EventSink>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, fd: Fd, evt: NetconnEvent) {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        match sink {
            Some(sink) => sink.deal_event(fd, evt),
            None => ktrace!("loopback: no sink for {:?} on fd {}", evt, fd),
        }
    }

    /// Queue inbound data for `fd` as if it arrived from the network
    pub fn inject(&self, fd: Fd, data: &[u8], from: Option<SocketAddrV4>) {
        self.lock()
            .inboxes
            .entry(fd)
            .or_default()
            .push_back(Datagram::new(data.to_vec(), from));
        self.emit(fd, NetconnEvent::RcvPlus);
    }

    /// Report a connection fault on `fd`
    pub fn raise_error(&self, fd: Fd) {
        self.emit(fd, NetconnEvent::Error);
    }

    /// Report a writability change on `fd`
    pub fn set_writable(&self, fd: Fd, writable: bool) {
        let evt = if writable { NetconnEvent::SendPlus } else { NetconnEvent::SendMinus };
        self.emit(fd, evt);
    }

    /// Register a name for `domain_to_ip`
    pub fn add_host(&self, name: &str, ip: Ipv4Addr) {
        self.lock().hosts.insert(name.to_ascii_lowercase(), ip);
    }

    /// Make the next `start` fail with `err`
    pub fn fail_next_start(&self, err: SalError) {
        self.lock().fail_start = Some(err);
    }

    /// Make the next `close` fail with `err` (the session is still dropped)
    pub fn fail_next_close(&self, err: SalError) {
        self.lock().fail_close = Some(err);
    }

    /// Make the next `send` fail with `err`
    pub fn fail_next_send(&self, err: SalError) {
        self.lock().fail_send = Some(err);
    }

    /// Drain the outbound log
    pub fn take_sent(&self) -> Vec<SentRecord> {
        std::iter::from_fn(|| self.sent.pop()).collect()
    }

    /// True while `fd` has a session
    pub fn is_started(&self, fd: Fd) -> bool {
        self.lock().sessions.contains_key(&fd)
    }

    /// Chunks queued for `fd`
    pub fn pending(&self, fd: Fd) -> usize {
        self.lock().inboxes.get(&fd).map_or(0, VecDeque::len)
    }
}

impl Transport for LoopbackTransport {
    fn init(&self) -> SalResult<()> {
        let mut inner = self.lock();
        if !inner.initialized {
            inner.initialized = true;
            kdebug!("loopback: initialized");
        }
        Ok(())
    }

    fn register_event_sink(&self, sink: Weak<dyn EventSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn start(&self, spec: &ConnSpec) -> SalResult<()> {
        {
            let mut inner = self.lock();
            if let Some(e) = inner.fail_start.take() {
                return Err(e);
            }
            inner.release_ports(spec.fd);
            if let Some(port) = spec.local_port.filter(|p| *p != 0) {
                if let Some(owner) = inner.ports.get(&port).filter(|o| **o != spec.fd) {
                    kdebug!("loopback: port {} already owned by fd {}", port, owner);
                    return Err(SalError::Transport(libc::EADDRINUSE));
                }
                inner.ports.insert(port, spec.fd);
            }
            inner.sessions.insert(spec.fd, spec.clone());
        }
        kdebug!("loopback: start {:?} on fd {}", spec.kind, spec.fd);

        if spec.kind == ConnKind::TcpClient {
            self.emit(spec.fd, NetconnEvent::SendPlus);
        }
        Ok(())
    }

    fn close(&self, fd: Fd) -> SalResult<()> {
        let mut inner = self.lock();
        let existed = inner.sessions.remove(&fd).is_some();
        inner.inboxes.remove(&fd);
        inner.release_ports(fd);

        if let Some(e) = inner.fail_close.take() {
            return Err(e);
        }
        if !existed {
            return Err(SalError::Transport(libc::ENOTCONN));
        }
        Ok(())
    }

    fn send(&self, fd: Fd, data: &[u8], remote: Option<SocketAddrV4>) -> SalResult<()> {
        let delivered = {
            let mut inner = self.lock();
            if let Some(e) = inner.fail_send.take() {
                return Err(e);
            }
            let Some(spec) = inner.sessions.get(&fd) else {
                return Err(SalError::Transport(libc::ENOTCONN));
            };

            let is_udp = matches!(spec.kind, ConnKind::UdpUnicast | ConnKind::UdpBroadcast);
            let from = spec.local_port.map(|p| SocketAddrV4::new(Ipv4Addr::LOCALHOST, p));
            let target = remote
                .or(spec.remote)
                .filter(|dst| is_udp && dst.ip().is_loopback())
                .and_then(|dst| inner.ports.get(&dst.port()).copied());

            if let Some(target) = target {
                inner
                    .inboxes
                    .entry(target)
                    .or_default()
                    .push_back(Datagram::new(data.to_vec(), from));
            }
            target
        };

        self.sent.push(SentRecord { fd, data: data.to_vec(), remote });
        if let Some(target) = delivered {
            ktrace!("loopback: fd {} -> fd {} ({} bytes)", fd, target, data.len());
            self.emit(target, NetconnEvent::RcvPlus);
        }
        Ok(())
    }

    fn recv(&self, fd: Fd, _max: usize) -> SalResult<Option<Datagram>> {
        let popped = self.lock().inboxes.get_mut(&fd).and_then(VecDeque::pop_front);
        if popped.is_some() {
            self.emit(fd, NetconnEvent::RcvMinus);
        }
        Ok(popped)
    }

    fn domain_to_ip(&self, name: &str) -> SalResult<Ipv4Addr> {
        if let Some(ip) = self.lock().hosts.get(&name.to_ascii_lowercase()) {
            return Ok(*ip);
        }
        if name.eq_ignore_ascii_case("localhost") {
            return Ok(Ipv4Addr::LOCALHOST);
        }
        name.parse::<Ipv4Addr>()
            .map_err(|_| SalError::Transport(libc::ENOENT))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records every event it receives
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Fd, NetconnEvent)>>,
    }

    impl EventSink for Recorder {
        fn deal_event(&self, fd: Fd, evt: NetconnEvent) {
            self.seen.lock().unwrap().push((fd, evt));
        }
    }

    fn wired() -> (LoopbackTransport, Arc<Recorder>) {
        let lo = LoopbackTransport::new();
        let rec = Arc::new(Recorder::default());
        let sink: Arc<dyn EventSink> = rec.clone();
        lo.register_event_sink(Arc::downgrade(&sink));
        lo.init().unwrap();
        (lo, rec)
    }

    fn local(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_tcp_client_becomes_writable() {
        let (lo, rec) = wired();
        let fd = Fd::new(3);
        lo.start(&ConnSpec::tcp_client(fd, local(80))).unwrap();
        assert_eq!(*rec.seen.lock().unwrap(), vec![(fd, NetconnEvent::SendPlus)]);
        assert!(lo.is_started(fd));
    }

    #[test]
    fn test_inject_and_recv_events() {
        let (lo, rec) = wired();
        let fd = Fd::new(4);
        lo.inject(fd, b"abc", None);
        assert_eq!(lo.pending(fd), 1);

        let dg = lo.recv(fd, 1).unwrap().unwrap();
        assert_eq!(dg.data, b"abc");
        assert!(lo.recv(fd, 16).unwrap().is_none());
        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec![(fd, NetconnEvent::RcvPlus), (fd, NetconnEvent::RcvMinus)]
        );
    }

    #[test]
    fn test_udp_routing() {
        let (lo, rec) = wired();
        let a = Fd::new(3);
        let b = Fd::new(4);
        lo.start(&ConnSpec::udp_unicast(a, local(2001), Some(2000))).unwrap();
        lo.start(&ConnSpec::udp_unicast(b, local(2000), Some(2001))).unwrap();

        lo.send(b, b"hi", None).unwrap();
        let dg = lo.recv(a, 64).unwrap().unwrap();
        assert_eq!(dg.data, b"hi");
        assert_eq!(dg.from, Some(local(2001)));
        assert!(rec.seen.lock().unwrap().contains(&(a, NetconnEvent::RcvPlus)));
        assert_eq!(lo.take_sent().len(), 1);
        assert!(lo.take_sent().is_empty());
    }

    #[test]
    fn test_port_conflict() {
        let (lo, _) = wired();
        lo.start(&ConnSpec::tcp_server(Fd::new(3), 8080)).unwrap();
        assert_eq!(
            lo.start(&ConnSpec::tcp_server(Fd::new(4), 8080)),
            Err(SalError::Transport(libc::EADDRINUSE))
        );
        lo.close(Fd::new(3)).unwrap();
        lo.start(&ConnSpec::tcp_server(Fd::new(4), 8080)).unwrap();
    }

    #[test]
    fn test_close_unknown_session() {
        let (lo, _) = wired();
        assert_eq!(lo.close(Fd::new(9)), Err(SalError::Transport(libc::ENOTCONN)));
        assert_eq!(lo.send(Fd::new(9), b"x", None), Err(SalError::Transport(libc::ENOTCONN)));
    }

    #[test]
    fn test_domain_to_ip() {
        let (lo, _) = wired();
        lo.add_host("Printer.LAN", Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(lo.domain_to_ip("printer.lan"), Ok(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(lo.domain_to_ip("localhost"), Ok(Ipv4Addr::LOCALHOST));
        assert_eq!(lo.domain_to_ip("8.8.4.4"), Ok(Ipv4Addr::new(8, 8, 4, 4)));
        assert_eq!(lo.domain_to_ip("nope"), Err(SalError::Transport(libc::ENOENT)));
    }

    #[test]
    fn test_events_without_sink_are_dropped() {
        let lo = LoopbackTransport::new();
        lo.inject(Fd::new(3), b"x", None);
        lo.raise_error(Fd::new(3));
        assert_eq!(lo.pending(Fd::new(3)), 1);
    }
}
