//! SAL End-to-End Smoke Test
//!
//! Drives the public socket API against the loopback transport:
//!   Part A — Lifecycle: socket, eventfd, bind, connect, close
//!   Part B — Select: immediate readiness, timeouts, argument checks
//!   Part C — Cross-thread wakeups: dispatch, event write, close
//!   Part D — Blocking I/O: UDP exchange, receive timeout, non-blocking
//!   Part E — Name resolution
//!
//! Run: ./target/release/sal-smoke
//! (SAL_LOG_LEVEL=debug for per-call logging)

use sal::{Fd, FdSet, LoopbackTransport, NetconnEvent, SalConfig, SockOptValue};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn read_set(fd: i32) -> FdSet {
    let mut s = FdSet::new();
    s.set(Fd::new(fd));
    s
}

/// Poll until a selector has registered interest in `fd` (or give up)
fn wait_for_selector(fd: i32) -> bool {
    let Some(inst) = sal::instance() else { return false };
    for _ in 0..500 {
        if inst.select_waiting(Fd::new(fd)).unwrap_or(0) > 0 {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Run a blocking select on `fd`'s read-set in another thread
fn spawn_selector(fd: i32) -> mpsc::Receiver<(i32, i32, Duration)> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut rd = read_set(fd);
        let t0 = Instant::now();
        let n = sal::select(fd + 1, Some(&mut rd), None, None, None);
        let _ = tx.send((n, sal::errno(), t0.elapsed()));
    });
    rx
}

// ════════════════════════════════════════════════════════════
// Part A: Lifecycle
// ════════════════════════════════════════════════════════════

fn test_lifecycle(t: &mut TestRunner) {
    t.section("Part A: Lifecycle");

    let tcp = sal::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
    t.check("socket(AF_INET, SOCK_STREAM)", tcp >= 0, &format!("errno {}", sal::errno()));

    let udp = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    t.check("socket(AF_INET, SOCK_DGRAM)", udp >= 0, &format!("errno {}", sal::errno()));

    let raw = sal::socket(libc::AF_INET, libc::SOCK_RAW, 0);
    t.check("socket(SOCK_RAW) -> EINVAL", raw == -1 && sal::errno() == libc::EINVAL,
        &format!("ret {} errno {}", raw, sal::errno()));

    let efd = sal::eventfd(0, 0);
    t.check("eventfd(0)", efd > udp, &format!("ret {}", efd));

    let r = sal::bind(tcp, &localhost(48080));
    t.check("bind(tcp, 127.0.0.1:48080)", r == 0, &format!("errno {}", sal::errno()));

    let r = sal::listen(tcp, 4);
    t.check("listen(tcp)", r == 0, &format!("errno {}", sal::errno()));

    let r = sal::listen(udp, 4);
    t.check("listen(udp) -> EINVAL", r == -1 && sal::errno() == libc::EINVAL,
        &format!("errno {}", sal::errno()));

    let v6 = SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, 80));
    let r = sal::connect(udp, &v6);
    t.check("connect(udp, [::1]:80) -> EOPNOTSUPP", r == -1 && sal::errno() == libc::EOPNOTSUPP,
        &format!("errno {}", sal::errno()));

    for (name, fd) in [("close(tcp)", tcp), ("close(udp)", udp), ("close(eventfd)", efd)] {
        let r = sal::close(fd);
        t.check(name, r == 0, &format!("errno {}", sal::errno()));
    }

    let r = sal::close(tcp);
    t.check("close(tcp) again -> EBADF", r == -1 && sal::errno() == libc::EBADF,
        &format!("ret {} errno {}", r, sal::errno()));

    let r = sal::close(999);
    t.check("close(999) -> EBADF", r == -1 && sal::errno() == libc::EBADF,
        &format!("ret {} errno {}", r, sal::errno()));
}

// ════════════════════════════════════════════════════════════
// Part B: Select
// ════════════════════════════════════════════════════════════

fn test_select(t: &mut TestRunner) {
    t.section("Part B: Select");

    // B1: unconnected TCP socket is not writable
    let tcp = sal::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
    let mut wr = read_set(tcp);
    let t0 = Instant::now();
    let n = sal::select(tcp + 1, None, Some(&mut wr), None, Some(Duration::ZERO));
    t.check("select(write, unconnected tcp, 0) -> 0",
        n == 0 && wr.count() == 0 && t0.elapsed() < Duration::from_millis(50),
        &format!("ret {} count {} in {:?}", n, wr.count(), t0.elapsed()));

    // B2: connected TCP socket becomes writable
    let r = sal::connect(tcp, &localhost(48081));
    let mut wr = read_set(tcp);
    let n = sal::select(tcp + 1, None, Some(&mut wr), None, Some(Duration::ZERO));
    t.check("connect(tcp) then select(write) -> 1", r == 0 && n == 1,
        &format!("connect {} select {}", r, n));
    sal::close(tcp);

    // B3: event write then select(read)
    let efd = sal::eventfd(0, 0);
    let w = sal::write(efd, &1u64.to_ne_bytes());
    let mut rd = read_set(efd);
    let t0 = Instant::now();
    let n = sal::select(efd + 1, Some(&mut rd), None, None, None);
    t.check("eventfd write(1) then select(read) -> 1",
        w == 8 && n == 1 && rd.is_set(Fd::new(efd)) && t0.elapsed() < Duration::from_millis(50),
        &format!("write {} select {} in {:?}", w, n, t0.elapsed()));

    // B4: timeout honoured
    let mut buf = [0u8; 8];
    sal::read(efd, &mut buf);
    let mut rd = read_set(efd);
    let t0 = Instant::now();
    let n = sal::select(efd + 1, Some(&mut rd), None, None, Some(Duration::from_millis(30)));
    let el = t0.elapsed();
    t.check("select(read, drained eventfd, 30ms) -> 0",
        n == 0 && el >= Duration::from_millis(30),
        &format!("ret {} after {:?}", n, el));

    // B5: unknown descriptor
    let mut rd = read_set(900);
    let n = sal::select(901, Some(&mut rd), None, None, Some(Duration::from_millis(10)));
    t.check("select(read, fd 900, 10ms) -> EBADF, set untouched",
        n == -1 && sal::errno() == libc::EBADF && rd.is_set(Fd::new(900)),
        &format!("ret {} errno {}", n, sal::errno()));

    // B6: descriptors below the socket base are not ours
    let mut rd = FdSet::new();
    rd.set(Fd::new(0));
    rd.set(Fd::new(1));
    let n = sal::select(2, Some(&mut rd), None, None, Some(Duration::from_millis(5)));
    t.check("select(read, stdin/stdout) -> 0", n == 0 && rd.count() == 0,
        &format!("ret {} count {}", n, rd.count()));

    sal::close(efd);
}

// ════════════════════════════════════════════════════════════
// Part C: Cross-thread wakeups
// ════════════════════════════════════════════════════════════

fn test_wakeups(t: &mut TestRunner, lo: &LoopbackTransport) {
    t.section("Part C: Cross-thread wakeups");
    let deadline = Duration::from_secs(2);

    // C1: receive dispatch wakes a blocked selector
    let s = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    let rx = spawn_selector(s);
    let registered = wait_for_selector(s);
    lo.inject(Fd::new(s), b"wake", None);
    match rx.recv_timeout(deadline) {
        Ok((n, _, el)) => t.check("dispatch RCVPLUS wakes select", registered && n == 1,
            &format!("registered {} ret {} after {:?}", registered, n, el)),
        Err(_) => t.fail("dispatch RCVPLUS wakes select", "selector hung"),
    }
    let balanced = sal::instance().and_then(|i| i.select_waiting(Fd::new(s))) == Some(0);
    t.check("select_waiting back to 0", balanced, "counter not restored");
    sal::close(s);

    // C2: raw event code entry point
    let s = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    let rx = spawn_selector(s);
    wait_for_selector(s);
    sal::deal_event(s, NetconnEvent::RcvPlus as u32);
    let woke = matches!(rx.recv_timeout(deadline), Ok((1, _, _)));
    t.check("deal_event(RcvPlus code) wakes select", woke, "no wakeup");
    sal::close(s);

    // C3: eventfd write from another thread
    let efd = sal::eventfd(0, 0);
    let rx = spawn_selector(efd);
    wait_for_selector(efd);
    thread::sleep(Duration::from_millis(5));
    sal::write(efd, &7u64.to_ne_bytes());
    let woke = matches!(rx.recv_timeout(deadline), Ok((1, _, _)));
    t.check("eventfd write wakes select", woke, "no wakeup");
    sal::close(efd);

    // C4: close while blocked
    let s = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    let rx = spawn_selector(s);
    wait_for_selector(s);
    sal::close(s);
    match rx.recv_timeout(deadline) {
        Ok((n, errno, _)) => t.check("close(S) while select blocked -> EBADF",
            n == -1 && errno == libc::EBADF, &format!("ret {} errno {}", n, errno)),
        Err(_) => t.fail("close(S) while select blocked -> EBADF", "selector hung"),
    }

    // C5: close of a watched event
    let efd = sal::eventfd(0, 0);
    let rx = spawn_selector(efd);
    thread::sleep(Duration::from_millis(20));
    sal::close(efd);
    match rx.recv_timeout(deadline) {
        Ok((n, errno, _)) => t.check("close(eventfd) while select blocked -> EBADF",
            n == -1 && errno == libc::EBADF, &format!("ret {} errno {}", n, errno)),
        Err(_) => t.fail("close(eventfd) while select blocked -> EBADF", "selector hung"),
    }

    let waiters = sal::instance().map_or(usize::MAX, |i| i.stats().waiters);
    t.check("no waiters left registered", waiters == 0, &format!("{} waiters", waiters));
}

// ════════════════════════════════════════════════════════════
// Part D: Blocking I/O
// ════════════════════════════════════════════════════════════

fn test_io(t: &mut TestRunner, lo: &LoopbackTransport) {
    t.section("Part D: Blocking I/O");

    let a = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    let b = sal::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
    sal::bind(a, &localhost(49001));
    sal::connect(a, &localhost(49002));
    sal::bind(b, &localhost(49002));

    let n = sal::sendto(b, b"hello", 0, Some(&localhost(49001)));
    t.check("sendto(b -> a, 5 bytes)", n == 5, &format!("ret {} errno {}", n, sal::errno()));

    let mut buf = [0u8; 64];
    let mut from = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    let n = sal::recvfrom(a, &mut buf, 0, Some(&mut from));
    t.check("recvfrom(a) -> \"hello\" from :49002",
        n == 5 && &buf[..5] == b"hello" && from.port() == 49002,
        &format!("ret {} from {}", n, from));

    let sent = lo.take_sent();
    t.check("transport saw one send", sent.len() == 1, &format!("{} sends", sent.len()));

    let big = vec![0u8; 4096];
    let n = sal::send(b, &big, 0);
    t.check("send(> max payload) -> EINVAL", n == -1 && sal::errno() == libc::EINVAL,
        &format!("ret {} errno {}", n, sal::errno()));

    // receive timeout
    let r = sal::setsockopt(a, libc::SOL_SOCKET, libc::SO_RCVTIMEO, SockOptValue::Int(60));
    let t0 = Instant::now();
    let n = sal::recv(a, &mut buf, 0);
    let el = t0.elapsed();
    t.check("recv with SO_RCVTIMEO=60ms -> ETIMEDOUT",
        r == 0 && n == -1 && sal::errno() == libc::ETIMEDOUT && el >= Duration::from_millis(60),
        &format!("ret {} errno {} after {:?}", n, sal::errno(), el));

    // non-blocking
    let n = sal::recv(a, &mut buf, libc::MSG_DONTWAIT);
    t.check("recv(MSG_DONTWAIT) -> EWOULDBLOCK", n == -1 && sal::errno() == libc::EWOULDBLOCK,
        &format!("ret {} errno {}", n, sal::errno()));

    let mut v = SockOptValue::Int(0);
    let r = sal::getsockopt(a, libc::SOL_SOCKET, libc::SO_ERROR, &mut v);
    t.check("SO_ERROR reports EWOULDBLOCK", r == 0 && v == SockOptValue::Int(libc::EWOULDBLOCK),
        &format!("{:?}", v));

    sal::fcntl(a, libc::F_SETFL, libc::O_NONBLOCK);
    let n = sal::recv(a, &mut buf, 0);
    t.check("fcntl(O_NONBLOCK) then recv -> EWOULDBLOCK",
        n == -1 && sal::errno() == libc::EWOULDBLOCK,
        &format!("ret {} errno {}", n, sal::errno()));

    // event counter semantics
    let efd = sal::eventfd(5, 0);
    sal::write(efd, &2u64.to_ne_bytes());
    let mut word = [0u8; 8];
    let n = sal::read(efd, &mut word);
    t.check("eventfd(5) + write(2) -> read 7", n == 8 && u64::from_ne_bytes(word) == 7,
        &format!("ret {} value {}", n, u64::from_ne_bytes(word)));
    let n = sal::write(efd, &u64::MAX.to_ne_bytes());
    t.check("eventfd write(u64::MAX) -> EINVAL", n == -1 && sal::errno() == libc::EINVAL,
        &format!("ret {} errno {}", n, sal::errno()));

    sal::close(efd);
    sal::close(a);
    sal::close(b);
}

// ════════════════════════════════════════════════════════════
// Part E: Name resolution
// ════════════════════════════════════════════════════════════

fn test_netdb(t: &mut TestRunner, lo: &LoopbackTransport) {
    t.section("Part E: Name resolution");
    lo.add_host("smoke.local", Ipv4Addr::new(10, 0, 0, 42));

    let mut res = None;
    let r = sal::getaddrinfo(Some("smoke.local"), Some("5683"), None, &mut res);
    let ok = r == 0
        && res.as_ref().map(|ai| ai.addr) == Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 42), 5683));
    t.check("getaddrinfo(smoke.local, 5683)", ok, &format!("ret {} res {:?}", r, res));
    if let Some(ai) = res.take() {
        sal::freeaddrinfo(ai);
    }

    let r = sal::getaddrinfo(Some("smoke.local"), Some("http"), None, &mut res);
    t.check("getaddrinfo(service=http) -> EAI_SERVICE", r == libc::EAI_SERVICE, &format!("ret {}", r));

    let h = sal::gethostbyname("localhost");
    t.check("gethostbyname(localhost)",
        h.as_ref().map(|h| h.addr_list.clone()) == Some(vec![Ipv4Addr::LOCALHOST]),
        &format!("{:?}", h));

    let h = sal::gethostbyname("nowhere.invalid");
    t.check("gethostbyname(nowhere.invalid) -> none", h.is_none(), &format!("{:?}", h));
}

// ════════════════════════════════════════════════════════════

fn main() {
    println!("=== SAL End-to-End Smoke Test ===");
    sal::init_logging();

    let config = SalConfig::from_env();
    config.print();

    let lo = Arc::new(LoopbackTransport::new());
    if let Err(e) = sal::init_with(config, lo.clone()) {
        println!("\nFATAL: init failed: {}", e);
        std::process::exit(1);
    }

    let mut t = TestRunner::new();

    test_lifecycle(&mut t);
    test_select(&mut t);
    test_wakeups(&mut t, &lo);
    test_io(&mut t, &lo);
    test_netdb(&mut t, &lo);

    if let Some(inst) = sal::instance() {
        let st = inst.stats();
        println!("\n  sockets in use: {}  events in use: {}  waiters: {}",
            st.sockets_in_use, st.events_in_use, st.waiters);
    }

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
