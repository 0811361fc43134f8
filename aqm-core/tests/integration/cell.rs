use std::time::Duration;

use aqm_core::{
    cells::{
        pi::{PiCell, PiCellConfig},
        Cell, ControlInterface, Egress, Ingress, Packet, StdPacket,
    },
    config::PiCellBuildConfig,
    qdisc::{pi::PiQueueDiscConfig, queue::QueueSizeUnit},
};
use bandwidth::Bandwidth;
use tokio::time::Instant;
use tracing::info;

fn build(bandwidth: Bandwidth, queue_limit: u64) -> anyhow::Result<PiCell<StdPacket>> {
    let config = PiCellBuildConfig {
        bandwidth: Some(bandwidth),
        queue_disc: PiQueueDiscConfig::new(QueueSizeUnit::Packets, queue_limit),
        stream: Some(1),
    };
    Ok(config.into_cell()?)
}

#[test_log::test(tokio::test(start_paused = true))]
async fn sustained_overload_drops_early() -> anyhow::Result<()> {
    // 1000-byte packets on a 8 Mbps link leave every millisecond.
    let mut cell = build(Bandwidth::from_mbps(8), 200)?;
    let sender = cell.sender();

    let source = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_micros(500));
        loop {
            interval.tick().await;
            if sender.enqueue(StdPacket::with_l3_length(1000)).is_err() {
                break;
            }
        }
    });

    let start = Instant::now();
    let mut received = 0usize;
    let egress = cell.receiver();
    while start.elapsed() < Duration::from_secs(10) {
        if egress.dequeue().await.is_some() {
            received += 1;
        }
    }
    source.abort();

    let stats = egress.queue_disc().stats();
    let p = egress
        .queue_disc()
        .with(|disc| disc.policy().drop_probability());
    info!(received, ?stats, p, "Overload finished");
    // The link is the bottleneck, never the sender.
    assert!(received >= 9_900 && received <= 10_001, "received = {received}");
    assert!(stats.unforced_drops > 0);
    assert!(p > 0.0);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn lowering_bandwidth_slows_egress() -> anyhow::Result<()> {
    let mut cell = build(Bandwidth::from_mbps(80), 200)?;
    let sender = cell.sender();
    for _ in 0..4 {
        sender.enqueue(StdPacket::with_l3_length(1000))?;
    }
    cell.control_interface()
        .set_config(PiCellConfig::new(Bandwidth::from_mbps(8)))?;

    let egress = cell.receiver();
    let start = Instant::now();
    let mut timestamps = Vec::new();
    for _ in 0..4 {
        let packet = egress.dequeue().await.unwrap();
        assert_eq!(packet.l3_length(), 1000);
        timestamps.push(start.elapsed());
    }
    assert!(timestamps[3] >= Duration::from_millis(3));
    Ok(())
}
