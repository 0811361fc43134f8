use std::sync::Arc;
use std::time::Duration;

use aqm_core::{
    cells::{Packet, StdPacket},
    qdisc::{
        pi::{PiQueueDisc, PiQueueDiscConfig},
        queue::{DropTailQueue, QueueSizeUnit},
        DropReason, QueueDiscBuilder, SharedQueueDisc,
    },
    scheduler::{EventScheduler, Scheduler},
};
use tracing::info;

type Shared = SharedQueueDisc<StdPacket, PiQueueDisc, DropTailQueue<StdPacket>>;

fn install(config: PiQueueDiscConfig, scheduler: &EventScheduler) -> Arc<Shared> {
    let disc = QueueDiscBuilder::new()
        .build(PiQueueDisc::new(config))
        .unwrap();
    Arc::new(SharedQueueDisc::install(disc, scheduler))
}

#[test_log::test]
fn burst_against_limit() {
    let scheduler = EventScheduler::new();
    let disc = install(
        PiQueueDiscConfig::new(QueueSizeUnit::Packets, 200),
        &scheduler,
    );

    let mut outcomes = Vec::new();
    for _ in 0..250 {
        outcomes.push(disc.enqueue(StdPacket::with_l3_length(1000)));
    }
    assert!(outcomes[..200].iter().all(|r| r.is_ok()));
    assert!(outcomes[200..]
        .iter()
        .all(|r| *r == Err(DropReason::Forced)));

    let stats = disc.stats();
    assert_eq!(stats.enqueued_packets, 200);
    assert_eq!(stats.forced_drops, 50);
    assert_eq!(stats.unforced_drops, 0);
    assert_eq!(disc.occupancy(), 200);
    assert_eq!(disc.get_front_size(), Some(1000));
}

// Open loop: arrivals at 2000 packets/s into a 1000 packets/s link.
#[test_log::test]
fn overload_then_idle() {
    let scheduler = EventScheduler::new();
    let disc = install(
        PiQueueDiscConfig {
            a: 0.0002,
            b: 0.00019,
            ..PiQueueDiscConfig::new(QueueSizeUnit::Packets, 200)
        },
        &scheduler,
    );

    let source = {
        let disc = disc.clone();
        scheduler.schedule_repeating(
            Duration::from_micros(500),
            Box::new(move || {
                let _ = disc.enqueue(StdPacket::with_l3_length(1000));
            }),
        )
    };
    let _link = {
        let disc = disc.clone();
        scheduler.schedule_repeating(
            Duration::from_millis(1),
            Box::new(move || {
                disc.dequeue();
            }),
        )
    };

    let mut last_drops = 0;
    for _ in 0..20 {
        scheduler.run_for(Duration::from_secs(1));
        let drops = disc.with(|d| d.policy().drop_count());
        assert!(drops >= last_drops);
        last_drops = drops;
    }
    let (p, stats) = disc.with(|d| (d.policy().drop_probability(), d.policy().stats()));
    info!(p, ?stats, "After overload");
    assert!(p > 0.0 && p <= 1.0);
    assert!(stats.unforced_drop > 0);

    source.cancel();
    scheduler.run_for(Duration::from_secs(30));
    assert_eq!(disc.occupancy(), 0);
    assert_eq!(disc.with(|d| d.policy().drop_probability()), 0.0);
    // counters only move forward
    assert!(disc.with(|d| d.policy().drop_count()) >= last_drops);
}

#[test_log::test]
fn byte_mode_counts_bytes() {
    let scheduler = EventScheduler::new();
    let disc = install(
        PiQueueDiscConfig {
            mean_packet_size: 1000,
            ..PiQueueDiscConfig::new(QueueSizeUnit::Bytes, 10_000)
        },
        &scheduler,
    );
    for _ in 0..10 {
        disc.enqueue(StdPacket::with_l3_length(1000)).unwrap();
    }
    assert_eq!(
        disc.enqueue(StdPacket::with_l3_length(1)),
        Err(DropReason::Forced)
    );
    assert_eq!(disc.occupancy(), 10_000);

    // 10 mean-sized packets sit in the queue, far below the reference
    scheduler.run_for(Duration::from_secs(1));
    assert_eq!(disc.with(|d| d.policy().drop_probability()), 0.0);

    assert_eq!(disc.dequeue().map(|p| p.l3_length()), Some(1000));
    assert_eq!(disc.with(|d| d.policy_mut().throughput()), 1000);
}
