use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sal_core::{FdSet, NetconnEvent};
use sal_runtime::{LoopbackTransport, Sal, SalConfig};

fn instance() -> Arc<Sal> {
    let config = SalConfig::new().num_sockets(16).num_events(16);
    Sal::new(config, Arc::new(LoopbackTransport::new())).expect("sal init")
}

fn bench_select_poll(c: &mut Criterion) {
    let sal = instance();
    let fds: Vec<_> = (0..8)
        .map(|_| sal.socket(libc::AF_INET, libc::SOCK_DGRAM, 0).expect("socket"))
        .collect();
    let nfds = fds.iter().map(|fd| fd.as_raw()).max().unwrap_or(0) + 1;
    let all: FdSet = fds.iter().copied().collect();

    c.bench_function("select_poll_8_udp", |b| {
        b.iter(|| {
            let mut r = all;
            let mut w = all;
            let n = sal
                .select(nfds, Some(&mut r), Some(&mut w), None, Some(Duration::ZERO))
                .expect("select");
            black_box(n)
        })
    });
}

fn bench_dispatch_idle(c: &mut Criterion) {
    let sal = instance();
    let fd = sal.socket(libc::AF_INET, libc::SOCK_STREAM, 0).expect("socket");

    c.bench_function("dispatch_no_waiters", |b| {
        b.iter(|| {
            sal.dispatch_event(black_box(fd), NetconnEvent::RcvPlus);
            sal.dispatch_event(black_box(fd), NetconnEvent::RcvMinus);
        })
    });
}

criterion_group!(benches, bench_select_poll, bench_dispatch_idle);
criterion_main!(benches);
