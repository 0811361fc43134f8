//! Bulk senders sharing a PI managed bottleneck, in virtual time.
//!
//! Senders run a TCP-like window: slow start, then one packet per round
//! trip of additive increase, halving at most once per round trip when a
//! loss is noticed one base RTT after the drop.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aqm_core::cells::pi::transfer_time;
use aqm_core::cells::{Packet, StdPacket};
use aqm_core::qdisc::pi::{PiQueueDisc, PiStats};
use aqm_core::qdisc::queue::DropTailQueue;
use aqm_core::qdisc::{QueueDiscStats, SharedQueueDisc};
use aqm_core::scheduler::{EventScheduler, Scheduler};
use bandwidth::Bandwidth;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::SimConfig;

type Bottleneck = SharedQueueDisc<StdPacket, PiQueueDisc, DropTailQueue<StdPacket>>;

#[derive(Debug, Clone, Copy)]
enum Event {
    /// A packet of the flow reaches the bottleneck.
    Arrive(u32),
    LinkIdle,
    /// A packet of the flow reaches the sink.
    Deliver(u32),
    Ack(u32),
    Loss(u32),
}

#[derive(Debug)]
struct Source {
    cwnd: f64,
    ssthresh: f64,
    in_flight: u32,
    access_free_at: Duration,
    recover_until: Duration,
    sent: u64,
    lost: u64,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            cwnd: 1.0,
            ssthresh: f64::INFINITY,
            in_flight: 0,
            access_free_at: Duration::ZERO,
            recover_until: Duration::ZERO,
            sent: 0,
            lost: 0,
        }
    }
}

impl Source {
    fn can_send(&self) -> bool {
        f64::from(self.in_flight) < self.cwnd.floor()
    }

    fn on_ack(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.cwnd < self.ssthresh {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    fn on_loss(&mut self, now: Duration, rtt: Duration) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.lost += 1;
        if now >= self.recover_until {
            self.ssthresh = (self.cwnd / 2.0).max(2.0);
            self.cwnd = self.ssthresh;
            self.recover_until = now + rtt;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: Duration,
    pub queue_size: u64,
    /// Mean of every sample so far
    pub average: f64,
}

struct World {
    config: SimConfig,
    bandwidth: Bandwidth,
    bottleneck: Bottleneck,
    link_busy: bool,
    sources: Vec<Source>,
    samples: Vec<Sample>,
    sample_sum: u64,
    delivered_bytes: u64,
}

#[derive(Clone)]
pub struct Dumbbell {
    scheduler: EventScheduler,
    world: Arc<Mutex<World>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceReport {
    pub sent: u64,
    pub lost: u64,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub duration: Duration,
    pub pi: PiStats,
    pub queue_disc: QueueDiscStats,
    pub delivered_bytes: u64,
    pub sources: Vec<SourceReport>,
    pub samples: Vec<Sample>,
}

impl Report {
    pub fn goodput(&self) -> Bandwidth {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return Bandwidth::from_bps(0);
        }
        Bandwidth::from_bps((self.delivered_bytes as f64 * 8.0 / secs) as u64)
    }

    /// Write one `time queue_size average` line per sample.
    pub fn write_plot(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for sample in &self.samples {
            writeln!(
                writer,
                "{} {} {}",
                sample.time.as_secs_f64(),
                sample.queue_size,
                sample.average
            )?;
        }
        writer.flush()
    }
}

impl Dumbbell {
    pub fn new(config: SimConfig) -> anyhow::Result<Self> {
        let bandwidth = config
            .bottleneck
            .bandwidth
            .ok_or_else(|| anyhow::anyhow!("The bottleneck needs a bandwidth"))?;
        let scheduler = EventScheduler::new();
        let bottleneck =
            SharedQueueDisc::install(config.bottleneck.build_queue_disc()?, &scheduler);
        let sources = (0..config.sources).map(|_| Source::default()).collect();
        Ok(Self {
            scheduler,
            world: Arc::new(Mutex::new(World {
                config,
                bandwidth,
                bottleneck,
                link_busy: false,
                sources,
                samples: Vec::new(),
                sample_sum: 0,
                delivered_bytes: 0,
            })),
        })
    }

    pub fn run(self) -> Report {
        let (duration, interval, sources) = {
            let world = self.world.lock();
            (
                world.config.duration,
                world.config.sample_interval,
                world.config.sources,
            )
        };

        self.sample();
        let sim = self.clone();
        let sampler = self
            .scheduler
            .schedule_repeating(interval, Box::new(move || sim.sample()));
        for flow in 0..sources {
            let mut world = self.world.lock();
            self.try_send(&mut world, flow as u32);
        }

        self.scheduler.run_until(duration);
        sampler.cancel();
        let pending = self.scheduler.clear();
        debug!(pending, "Simulation finished");

        let mut world = self.world.lock();
        let (pi, queue_disc) = world
            .bottleneck
            .with(|disc| (disc.policy().stats(), disc.stats()));
        Report {
            duration,
            pi,
            queue_disc,
            delivered_bytes: world.delivered_bytes,
            sources: world
                .sources
                .iter()
                .map(|source| SourceReport {
                    sent: source.sent,
                    lost: source.lost,
                })
                .collect(),
            samples: std::mem::take(&mut world.samples),
        }
    }

    fn book(&self, delay: Duration, event: Event) {
        let sim = self.clone();
        self.scheduler
            .schedule_once(delay, move || sim.handle(event));
    }

    fn sample(&self) {
        let now = self.scheduler.now();
        let mut world = self.world.lock();
        let queue_size = world.bottleneck.occupancy();
        world.sample_sum += queue_size;
        let average = world.sample_sum as f64 / (world.samples.len() + 1) as f64;
        world.samples.push(Sample {
            time: now,
            queue_size,
            average,
        });
    }

    fn handle(&self, event: Event) {
        let now = self.scheduler.now();
        let mut world = self.world.lock();
        match event {
            Event::Arrive(flow) => {
                let mut packet = StdPacket::with_l3_length(world.config.packet_size());
                packet.set_flow_id(flow);
                match world.bottleneck.enqueue(packet) {
                    Ok(()) => {
                        if !world.link_busy {
                            self.transmit(&mut world);
                        }
                    }
                    Err(reason) => {
                        trace!(flow, "{} at the bottleneck", reason.as_str());
                        self.book(world.config.base_rtt(), Event::Loss(flow));
                    }
                }
            }
            Event::LinkIdle => {
                world.link_busy = false;
                self.transmit(&mut world);
            }
            Event::Deliver(flow) => {
                let size = world.config.packet_size() as u64;
                world.delivered_bytes += size;
                let ack_delay = world.config.bottleneck_delay + world.config.access_delay * 2;
                self.book(ack_delay, Event::Ack(flow));
            }
            Event::Ack(flow) => {
                world.sources[flow as usize].on_ack();
                self.try_send(&mut world, flow);
            }
            Event::Loss(flow) => {
                let rtt = world.config.base_rtt();
                world.sources[flow as usize].on_loss(now, rtt);
                self.try_send(&mut world, flow);
            }
        }
    }

    fn transmit(&self, world: &mut World) {
        let Some(packet) = world.bottleneck.dequeue() else {
            return;
        };
        world.link_busy = true;
        let busy = transfer_time(packet.l3_length(), world.bandwidth);
        // The sink side access link is as fast as the bottleneck, so it never queues.
        let to_sink = world.config.bottleneck_delay
            + transfer_time(packet.l3_length(), world.config.access_bandwidth)
            + world.config.access_delay;
        self.book(busy, Event::LinkIdle);
        self.book(busy + to_sink, Event::Deliver(packet.get_flow_id()));
    }

    fn try_send(&self, world: &mut World, flow: u32) {
        let now = self.scheduler.now();
        // Senders stop one second before the end, like the bulk applications they mimic.
        if now + Duration::from_secs(1) >= world.config.duration {
            return;
        }
        let serialization = transfer_time(world.config.packet_size(), world.config.access_bandwidth);
        let access_delay = world.config.access_delay;
        let mut arrivals = Vec::new();
        let source = &mut world.sources[flow as usize];
        while source.can_send() {
            source.in_flight += 1;
            source.sent += 1;
            source.access_free_at = source.access_free_at.max(now) + serialization;
            arrivals.push(source.access_free_at + access_delay - now);
        }
        for delay in arrivals {
            self.book(delay, Event::Arrive(flow));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_config(secs: u64) -> SimConfig {
        let mut config = SimConfig {
            duration: Duration::from_secs(secs),
            ..Default::default()
        };
        config.bottleneck.stream = Some(7);
        config
    }

    #[test_log::test]
    fn bottleneck_is_kept_busy() -> anyhow::Result<()> {
        let report = Dumbbell::new(short_config(20))?.run();
        let goodput = report.goodput().as_bps() as f64;
        // Senders stop a second early and the first round trips are slow start.
        assert!(goodput > 7e6, "goodput = {goodput}");
        assert!(goodput <= 10e6);
        assert!(report.sources.iter().all(|source| source.sent > 0));
        assert!(report.samples.iter().all(|sample| sample.queue_size <= 200));
        assert_eq!(
            report.queue_disc.forced_drops + report.queue_disc.unforced_drops,
            report.pi.forced_drop + report.pi.unforced_drop
        );
        Ok(())
    }

    #[test_log::test]
    fn samples_every_interval() -> anyhow::Result<()> {
        let report = Dumbbell::new(short_config(5))?.run();
        assert_eq!(report.samples.len(), 51);
        assert_eq!(report.samples[0].time, Duration::ZERO);
        assert_eq!(report.samples[0].queue_size, 0);
        assert_eq!(report.samples[50].time, Duration::from_secs(5));

        let sum: u64 = report.samples.iter().map(|s| s.queue_size).sum();
        let last = report.samples[50].average;
        assert!((last - sum as f64 / 51.0).abs() < 1e-9);
        Ok(())
    }

    #[test_log::test]
    fn same_stream_same_outcome() -> anyhow::Result<()> {
        let first = Dumbbell::new(short_config(10))?.run();
        let second = Dumbbell::new(short_config(10))?.run();
        assert_eq!(first.pi, second.pi);
        assert_eq!(first.samples, second.samples);
        Ok(())
    }

    #[test_log::test]
    fn plot_file_lines() -> anyhow::Result<()> {
        let report = Dumbbell::new(short_config(2))?.run();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pi-queue.plotme");
        report.write_plot(&path)?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), report.samples.len());
        assert_eq!(lines[0], "0 0 0");
        assert!(lines
            .iter()
            .all(|line| line.split_whitespace().count() == 3));
        Ok(())
    }

    #[test]
    fn bandwidth_is_required() {
        let mut config = short_config(1);
        config.bottleneck.bandwidth = None;
        assert!(Dumbbell::new(config).is_err());
    }

    #[test]
    fn window_halves_once_per_round_trip() {
        let rtt = Duration::from_millis(120);
        let mut source = Source {
            cwnd: 40.0,
            in_flight: 40,
            ..Default::default()
        };
        source.on_loss(Duration::from_secs(1), rtt);
        source.on_loss(Duration::from_millis(1050), rtt);
        assert_eq!(source.cwnd, 20.0);
        assert_eq!(source.lost, 2);
        assert_eq!(source.in_flight, 38);

        source.on_loss(Duration::from_millis(1200), rtt);
        assert_eq!(source.cwnd, 10.0);

        source.on_ack();
        assert!((source.cwnd - 10.1).abs() < 1e-12);
    }
}
