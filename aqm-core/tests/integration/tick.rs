use std::time::Duration;

use aqm_core::{
    cells::StdPacket,
    qdisc::{
        pi::{PiQueueDisc, PiQueueDiscConfig},
        queue::{DropTailQueue, QueueSizeUnit},
        QueueDisc, QueueDiscBuilder, SharedQueueDisc,
    },
    scheduler::{EventScheduler, TokioScheduler},
};

fn disc(w: f64) -> QueueDisc<StdPacket, PiQueueDisc, DropTailQueue<StdPacket>> {
    QueueDiscBuilder::new()
        .build(PiQueueDisc::new(PiQueueDiscConfig {
            w,
            ..PiQueueDiscConfig::new(QueueSizeUnit::Packets, 200)
        }))
        .unwrap()
}

fn fill(shared: &SharedQueueDisc<StdPacket, PiQueueDisc, DropTailQueue<StdPacket>>) {
    for _ in 0..150 {
        shared.enqueue(StdPacket::with_l3_length(100)).unwrap();
    }
}

#[test_log::test]
fn ticks_at_sampling_frequency() {
    let scheduler = EventScheduler::new();
    let shared = SharedQueueDisc::install(disc(100.0), &scheduler);
    fill(&shared);
    assert!(shared.is_ticking());
    assert_eq!(scheduler.pending(), 1);

    // 100 Hz for one second
    assert_eq!(scheduler.run_for(Duration::from_secs(1)), 100);
    assert_eq!(shared.with(|d| d.policy().previous_queue_length()), 150);
    assert!(shared.with(|d| d.policy().drop_probability()) > 0.0);
}

#[test_log::test]
fn teardown_stops_ticks() {
    let scheduler = EventScheduler::new();
    let shared = SharedQueueDisc::install(disc(170.0), &scheduler);
    scheduler.run_for(Duration::from_millis(100));
    shared.teardown();
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(scheduler.run_for(Duration::from_secs(1)), 1);
    assert_eq!(scheduler.run_for(Duration::from_secs(1)), 0);
}

#[test_log::test]
fn dropping_the_handle_stops_ticks() {
    let scheduler = EventScheduler::new();
    let shared = SharedQueueDisc::install(disc(170.0), &scheduler);
    fill(&shared);
    drop(shared);
    assert_eq!(scheduler.pending(), 0);
}

#[test_log::test]
fn initialize_keeps_ticking() {
    let scheduler = EventScheduler::new();
    let shared = SharedQueueDisc::install(disc(100.0), &scheduler);
    fill(&shared);
    scheduler.run_for(Duration::from_secs(1));
    shared.initialize();
    assert_eq!(shared.with(|d| d.policy().drop_probability()), 0.0);
    assert!(shared.is_ticking());

    scheduler.run_for(Duration::from_millis(10));
    assert!(shared.with(|d| d.policy().drop_probability()) > 0.0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn ticks_on_tokio_runtime() -> anyhow::Result<()> {
    let scheduler = TokioScheduler::current()?;
    let shared = SharedQueueDisc::install(disc(100.0), &scheduler);
    fill(&shared);
    tokio::time::sleep(Duration::from_millis(105)).await;
    let p = shared.with(|d| d.policy().drop_probability());
    assert!(p > 0.0);

    let mut shared = shared;
    shared.cancel_tick();
    assert!(!shared.is_ticking());
    let frozen = shared.with(|d| {
        (
            d.policy().drop_probability(),
            d.policy().previous_queue_length(),
        )
    });
    while shared.dequeue().is_some() {}
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        shared.with(|d| (
            d.policy().drop_probability(),
            d.policy().previous_queue_length(),
        )),
        frozen
    );

    shared.teardown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
