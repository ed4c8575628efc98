use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use shmring::pingpong::fill_payload;
use shmring::{spin_until, Channel, RingChannel, SequencedRing};

const CAPACITY: usize = 4096;

/// Echoes payload `i` from `rx` to `tx` until `stop` is set.
fn echo<C: Channel>(mut rx: C, mut tx: C, stop: Arc<AtomicBool>) {
    let mut msg = vec![0u8; rx.slot_size()];
    let mut i = 0u64;
    loop {
        fill_payload(i, &mut msg);
        loop {
            if rx.try_consume(&msg).unwrap() {
                break;
            }
            if stop.load(Ordering::Relaxed) {
                return;
            }
            std::hint::spin_loop();
        }
        spin_until(None, || tx.try_publish(&msg)).unwrap();
        i += 1;
    }
}

fn bench_transport<C, F>(c: &mut Criterion, group_name: &str, open: F)
where
    C: Channel + Send + 'static,
    F: Fn(&str, usize, usize) -> shmring::Result<C>,
{
    let n = 1000;
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(n));

    for message_size in [64usize, 1024, 4096] {
        let r2i = format!("/shmring_bench_{}_r2i_{}", group_name, std::process::id());
        let i2r = format!("/shmring_bench_{}_i2r_{}", group_name, std::process::id());
        let mut tx = open(&r2i, message_size, CAPACITY).unwrap();
        let mut rx = open(&i2r, message_size, CAPACITY).unwrap();
        let peer_rx = open(&r2i, message_size, CAPACITY).unwrap();
        let peer_tx = open(&i2r, message_size, CAPACITY).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let peer_stop = stop.clone();
        let peer = thread::spawn(move || echo(peer_rx, peer_tx, peer_stop));

        let mut msg = vec![0u8; message_size];
        let mut i = 0u64;
        group.bench_with_input(
            BenchmarkId::from_parameter(message_size),
            &message_size,
            |b, _| {
                b.iter(|| {
                    for _ in 0..n {
                        fill_payload(i, &mut msg);
                        spin_until(None, || tx.try_publish(&msg)).unwrap();
                        spin_until(None, || rx.try_consume(&msg)).unwrap();
                        i += 1;
                    }
                })
            },
        );

        stop.store(true, Ordering::Relaxed);
        peer.join().unwrap();
        tx.close();
        rx.close();
    }
    group.finish();
}

fn bench(c: &mut Criterion) {
    bench_transport(c, "ring_ping_pong", RingChannel::open);
    bench_transport(c, "sequenced_ping_pong", SequencedRing::open);
}

criterion_group!(benches, bench);
criterion_main!(benches);
