//! Blocking I/O wrappers
//!
//! Socket receive polls the transport: the stack queues data and reports it
//! through `RcvPlus`, and `recv` sleeps one poll quantum between empty
//! checks. Event descriptors are plain counters read and written under the
//! critical section.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Instant;

use sal_core::constants::EVENT_WORD_SIZE;
use sal_core::{kdebug, ktrace, Fd, FdKind, NetconnState, NetconnType, SalError, SalResult};

use crate::sal::{ipv4_only, Sal};
use crate::tables::{EventSlot, SocketSlot};
use crate::timer;

impl Sal {
    /// Receive into `buf`, reporting the sender when the transport knows it
    ///
    /// Blocks until data arrives unless `MSG_DONTWAIT` is passed or the
    /// socket is non-blocking. A configured receive timeout bounds the wait.
    pub fn recvfrom(
        &self,
        fd: Fd,
        buf: &mut [u8],
        flags: i32,
    ) -> SalResult<(usize, Option<SocketAddrV4>)> {
        if buf.is_empty() {
            return self.fail("recvfrom", fd, SalError::InvalidArgument);
        }
        let view = self.conn_view(fd).or_else(|e| self.fail("recvfrom", fd, e))?;
        let nonblocking = flags & libc::MSG_DONTWAIT != 0 || view.nonblocking;

        // leftover from an earlier oversized chunk goes first
        let early = self.with_socket(&view, |slot| {
            if slot.leftover_len() > 0 {
                let got = take_leftover(slot, buf);
                slot.err = 0;
                return Some(Ok(got));
            }
            if nonblocking && slot.rcvevent <= 0 {
                return Some(Err(SalError::WouldBlock));
            }
            None
        });
        match early {
            Ok(Some(Ok(got))) => return Ok(got),
            Ok(Some(Err(e))) | Err(e) => return self.fail("recvfrom", fd, e),
            Ok(None) => {}
        }

        let begin = Instant::now();
        loop {
            match self.transport().recv(fd, buf.len()) {
                Err(e) => {
                    self.set_last_err(&view, e);
                    return self.fail("recvfrom", fd, e);
                }
                Ok(Some(dgram)) if !dgram.is_empty() => {
                    let total = dgram.data.len();
                    let n = total.min(buf.len());
                    buf[..n].copy_from_slice(&dgram.data[..n]);
                    let from = dgram.from;

                    let stored = self.with_socket(&view, |slot| {
                        if view.ty == NetconnType::Tcp && total > n {
                            slot.lastdata = Some(dgram.data);
                            slot.lastoffset = n;
                            slot.lastfrom = from;
                        }
                        slot.err = 0;
                    });
                    if let Err(e) = stored {
                        return self.fail("recvfrom", fd, e);
                    }
                    if total > n {
                        ktrace!("recvfrom: fd {} kept {} of {} bytes", fd, total - n, total);
                    }
                    return Ok((n, from));
                }
                Ok(_) => {}
            }

            timer::sleep(self.config().recv_poll);

            if !view.recv_timeout.is_zero() && begin.elapsed() >= view.recv_timeout {
                return self.fail("recvfrom", fd, SalError::Timeout);
            }
            if self.with_socket(&view, |_| ()).is_err() {
                return self.fail("recvfrom", fd, SalError::BadDescriptor);
            }
        }
    }

    pub fn recv(&self, fd: Fd, buf: &mut [u8], flags: i32) -> SalResult<usize> {
        self.recvfrom(fd, buf, flags).map(|(n, _)| n)
    }

    /// Read from a socket, or drain an event counter
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> SalResult<usize> {
        match self.layout().classify(fd) {
            FdKind::Event(_) => self.event_read(fd, buf),
            _ => self.recv(fd, buf, 0),
        }
    }

    /// Send a payload, connecting first if `to` names a peer and the
    /// socket is unconnected
    pub fn sendto(
        &self,
        fd: Fd,
        data: &[u8],
        flags: i32,
        to: Option<&SocketAddr>,
    ) -> SalResult<usize> {
        if data.is_empty() || data.len() > self.config().max_payload {
            return self.fail("sendto", fd, SalError::InvalidArgument);
        }
        let mut view = self.conn_view(fd).or_else(|e| self.fail("sendto", fd, e))?;

        let remote = match to {
            Some(addr) => {
                let remote = ipv4_only(addr).or_else(|e| self.fail("sendto", fd, e))?;
                if view.state == NetconnState::None {
                    self.connect(fd, addr)?;
                    view = self.conn_view(fd).or_else(|e| self.fail("sendto", fd, e))?;
                }
                Some(remote)
            }
            None if view.state == NetconnState::None => {
                return self.fail("sendto", fd, SalError::InvalidArgument);
            }
            None => None,
        };

        let remote = if view.ty == NetconnType::Udp { remote } else { None };
        if let Err(e) = self.transport().send(fd, data, remote) {
            self.set_last_err(&view, e);
            return self.fail("sendto", fd, e);
        }

        let _ = self.with_socket(&view, |slot| slot.err = 0);
        ktrace!("sendto: fd {} sent {} bytes (flags {:#x})", fd, data.len(), flags);
        Ok(data.len())
    }

    pub fn send(&self, fd: Fd, data: &[u8], flags: i32) -> SalResult<usize> {
        self.sendto(fd, data, flags, None)
    }

    /// Write to a socket, or add to an event counter
    pub fn write(&self, fd: Fd, data: &[u8]) -> SalResult<usize> {
        match self.layout().classify(fd) {
            FdKind::Event(_) => self.event_write(fd, data),
            _ => self.send(fd, data, 0),
        }
    }

    /// Add an 8-byte native-endian value to an event counter
    ///
    /// Wakes the select call watching the event once the counter is
    /// non-zero. An add that would overflow the counter is refused with
    /// `WouldBlock`.
    fn event_write(&self, fd: Fd, data: &[u8]) -> SalResult<usize> {
        let Ok(word) = <[u8; EVENT_WORD_SIZE]>::try_from(data) else {
            kdebug!("write({}): event writes take {} bytes, got {}", fd, EVENT_WORD_SIZE, data.len());
            return Err(SalError::InvalidArgument);
        };
        let value = u64::from_ne_bytes(word);
        if value == u64::MAX {
            kdebug!("write({}): counter value out of range", fd);
            return Err(SalError::InvalidArgument);
        }

        let mut st = self.enter();
        let Some(index) = st.lookup_event(fd) else {
            drop(st);
            kdebug!("write({}): {}", fd, SalError::BadDescriptor);
            return Err(SalError::BadDescriptor);
        };
        let ev = &mut st.events[index];
        let Some(sum) = ev.counts.checked_add(value).filter(|s| *s <= EventSlot::MAX_COUNT) else {
            drop(st);
            kdebug!("write({}): counter would overflow", fd);
            return Err(SalError::WouldBlock);
        };
        ev.counts = sum;
        if ev.counts > 0 {
            if let Some(sem) = ev.psem.as_ref() {
                sem.signal();
            }
        }
        drop(st);
        ktrace!("write: event fd {} += {}", fd, value);
        Ok(EVENT_WORD_SIZE)
    }

    /// Return and reset an event counter
    fn event_read(&self, fd: Fd, buf: &mut [u8]) -> SalResult<usize> {
        if buf.len() < EVENT_WORD_SIZE {
            kdebug!("read({}): event reads need {} bytes", fd, EVENT_WORD_SIZE);
            return Err(SalError::InvalidArgument);
        }

        let mut st = self.enter();
        let Some(index) = st.lookup_event(fd) else {
            drop(st);
            kdebug!("read({}): {}", fd, SalError::BadDescriptor);
            return Err(SalError::BadDescriptor);
        };
        let ev = &mut st.events[index];
        if ev.counts == 0 {
            return Err(SalError::WouldBlock);
        }
        let value = std::mem::take(&mut ev.counts);
        drop(st);

        buf[..EVENT_WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
        Ok(EVENT_WORD_SIZE)
    }
}

/// Copy leftover bytes into `buf`, releasing the buffer once consumed
fn take_leftover(slot: &mut SocketSlot, buf: &mut [u8]) -> (usize, Option<SocketAddrV4>) {
    let from = slot.lastfrom;
    let Some(data) = slot.lastdata.as_ref() else {
        return (0, from);
    };
    let rest = &data[slot.lastoffset..];
    let n = rest.len().min(buf.len());
    buf[..n].copy_from_slice(&rest[..n]);
    slot.lastoffset += n;

    if slot.lastoffset >= data.len() {
        slot.lastdata = None;
        slot.lastoffset = 0;
        slot.lastfrom = None;
    }
    (n, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{localhost, setup};
    use sal_core::FdSet;
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Duration;

    fn peer(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_recv_empty_buffer_rejected() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        assert_eq!(sal.recv(s, &mut [], 0), Err(SalError::InvalidArgument));
        assert_eq!(sal.recv(Fd::new(99), &mut [0; 4], 0), Err(SalError::BadDescriptor));
    }

    #[test]
    fn test_recv_dontwait_would_block() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(sal.recv(s, &mut buf, libc::MSG_DONTWAIT), Err(SalError::WouldBlock));
        assert_eq!(sal.enter().sockets[0].err, libc::EWOULDBLOCK);
    }

    #[test]
    fn test_recv_injected_datagram() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        lo.inject(s, b"hello", Some(peer(9000)));

        let mut buf = [0u8; 16];
        let (n, from) = sal.recvfrom(s, &mut buf, libc::MSG_DONTWAIT).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, Some(peer(9000)));
        assert_eq!(sal.enter().sockets[0].rcvevent, 0);
    }

    #[test]
    fn test_udp_truncates() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        lo.inject(s, b"0123456789", None);

        let mut buf = [0u8; 4];
        assert_eq!(sal.recv(s, &mut buf, 0), Ok(4));
        assert_eq!(&buf, b"0123");
        assert_eq!(sal.recv(s, &mut buf, libc::MSG_DONTWAIT), Err(SalError::WouldBlock));
    }

    #[test]
    fn test_tcp_leftover_served_first() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        sal.connect(s, &localhost(80)).unwrap();
        lo.inject(s, b"abcdefgh", None);

        let mut buf = [0u8; 3];
        assert_eq!(sal.recv(s, &mut buf, 0), Ok(3));
        assert_eq!(&buf, b"abc");

        // leftover is readable for select and bypasses the would-block check
        let mut r: FdSet = [s].into_iter().collect();
        assert_eq!(sal.select(s.as_raw() + 1, Some(&mut r), None, None, Some(Duration::ZERO)), Ok(1));
        assert_eq!(sal.recv(s, &mut buf, libc::MSG_DONTWAIT), Ok(3));
        assert_eq!(&buf, b"def");

        let mut big = [0u8; 16];
        assert_eq!(sal.recv(s, &mut big, 0), Ok(2));
        assert_eq!(&big[..2], b"gh");
        assert_eq!(sal.enter().sockets[0].leftover_len(), 0);
    }

    #[test]
    fn test_recv_timeout() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        sal.set_recv_timeout(s, Duration::from_millis(30)).unwrap();

        let start = std::time::Instant::now();
        let mut buf = [0u8; 8];
        assert_eq!(sal.recv(s, &mut buf, 0), Err(SalError::Timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_blocking_recv_wakes_on_data() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();

        let sal2 = sal.clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let n = sal2.recv(s, &mut buf, 0).unwrap();
            buf[..n].to_vec()
        });
        thread::sleep(Duration::from_millis(10));
        lo.inject(s, b"late", None);
        assert_eq!(reader.join().unwrap(), b"late");
    }

    #[test]
    fn test_close_releases_blocked_recv() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();

        let sal2 = sal.clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            sal2.recv(s, &mut buf, 0)
        });
        thread::sleep(Duration::from_millis(10));
        sal.close(s).unwrap();
        assert_eq!(reader.join().unwrap(), Err(SalError::BadDescriptor));
    }

    #[test]
    fn test_send_size_bounds() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        sal.connect(s, &localhost(9)).unwrap();
        let max = sal.config().max_payload;

        assert_eq!(sal.send(s, &[], 0), Err(SalError::InvalidArgument));
        assert_eq!(sal.send(s, &vec![0u8; max + 1], 0), Err(SalError::InvalidArgument));
        assert_eq!(sal.send(s, &vec![0u8; max], 0), Ok(max));
    }

    #[test]
    fn test_send_unconnected_without_address() {
        let (sal, _) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        assert_eq!(sal.send(s, b"x", 0), Err(SalError::InvalidArgument));
        assert_eq!(sal.enter().sockets[0].err, libc::EINVAL);
    }

    #[test]
    fn test_sendto_connects_implicitly() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        assert_eq!(sal.sendto(s, b"hi", 0, Some(&localhost(5353))), Ok(2));
        assert!(lo.is_started(s));
        assert_eq!(sal.conn_view(s).unwrap().state, NetconnState::Connect);

        let sent = lo.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].fd, s);
        assert_eq!(sent[0].data, b"hi");
        assert_eq!(sent[0].remote, Some(peer(5353)));
    }

    #[test]
    fn test_udp_between_local_sockets() {
        let (sal, _) = setup();
        let a = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        let b = sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
        sal.bind(a, &localhost(7000)).unwrap();
        sal.connect(a, &localhost(7001)).unwrap();
        sal.bind(b, &localhost(7001)).unwrap();

        sal.sendto(b, b"over", 0, Some(&localhost(7000))).unwrap();

        let mut buf = [0u8; 8];
        let (n, from) = sal.recvfrom(a, &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"over");
        assert_eq!(from, Some(peer(7001)));
    }

    #[test]
    fn test_event_read_write() {
        let (sal, _) = setup();
        let e = sal.eventfd(5, 0).unwrap();
        let mut buf = [0u8; 8];

        assert_eq!(sal.read(e, &mut buf), Ok(8));
        assert_eq!(u64::from_ne_bytes(buf), 5);
        assert_eq!(sal.read(e, &mut buf), Err(SalError::WouldBlock));

        sal.write(e, &2u64.to_ne_bytes()).unwrap();
        sal.write(e, &3u64.to_ne_bytes()).unwrap();
        assert_eq!(sal.read(e, &mut buf), Ok(8));
        assert_eq!(u64::from_ne_bytes(buf), 5);
    }

    #[test]
    fn test_event_write_length_checked() {
        let (sal, _) = setup();
        let e = sal.eventfd(0, 0).unwrap();
        assert_eq!(sal.write(e, &[1, 2, 3, 4]), Err(SalError::InvalidArgument));
        assert_eq!(sal.write(e, &[0u8; 9]), Err(SalError::InvalidArgument));
        assert_eq!(sal.read(e, &mut [0u8; 4]), Err(SalError::InvalidArgument));
        assert_eq!(sal.write(Fd::new(8), &1u64.to_ne_bytes()), Err(SalError::BadDescriptor));
    }

    #[test]
    fn test_event_counter_saturation() {
        let (sal, _) = setup();
        let e = sal.eventfd(0, 0).unwrap();
        let near = EventSlot::MAX_COUNT - 1;
        sal.write(e, &near.to_ne_bytes()).unwrap();
        assert_eq!(sal.write(e, &1u64.to_ne_bytes()), Ok(8));
        assert_eq!(sal.write(e, &1u64.to_ne_bytes()), Err(SalError::WouldBlock));
        assert_eq!(sal.write(e, &u64::MAX.to_ne_bytes()), Err(SalError::InvalidArgument));
    }

    #[test]
    fn test_write_on_socket_sends() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        sal.connect(s, &localhost(80)).unwrap();
        assert_eq!(sal.write(s, b"GET /"), Ok(5));

        let sent = lo.take_sent();
        assert_eq!(sent[0].data, b"GET /");
        assert_eq!(sent[0].remote, None);
    }

    #[test]
    fn test_send_failure_recorded() {
        let (sal, lo) = setup();
        let s = sal.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        sal.connect(s, &localhost(80)).unwrap();
        lo.fail_next_send(SalError::Transport(libc::ECONNRESET));
        assert_eq!(sal.send(s, b"x", 0), Err(SalError::Transport(libc::ECONNRESET)));

        let st = sal.enter();
        assert_eq!(st.sockets[0].conn.as_ref().unwrap().last_err, libc::ECONNRESET);
    }
}
