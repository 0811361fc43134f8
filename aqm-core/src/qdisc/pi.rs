// PI queue disc. Reference:
// C. V. Hollot, V. Misra, D. Towsley, W. Gong, "On Designing Improved
// Controllers for AQM Routers Supporting TCP Flows", INFOCOM 2001.

use std::time::Duration;

use bytesize::ByteSize;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::controller::PiController;
use super::queue::{PacketQueue, QueueSize, QueueSizeUnit};
use super::{Admission, AqmPolicy, DropReason, QueueDiscBuilder};
use crate::cells::Packet;
use crate::error::ConfigError;
use crate::utils::UniformRandom;

const NAME: &str = "PiQueueDisc";

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Deserialize, Serialize),
    serde(default)
)]
#[derive(Debug, Clone, PartialEq)]
pub struct PiQueueDiscConfig {
    pub mode: QueueSizeUnit,
    /// Average packet size in bytes
    pub mean_packet_size: u32,
    /// Desired queue length, in `mode` units
    pub queue_ref: f64,
    pub a: f64,
    pub b: f64,
    /// Sampling frequency in Hz
    pub w: f64,
    /// Queue limit in bytes or packets
    pub queue_limit: u64,
    /// Capacity of the internal queue built when none is attached.
    /// Defaults to `queue_limit` in `mode` units.
    pub max_size: Option<QueueSize>,
}

impl Default for PiQueueDiscConfig {
    fn default() -> Self {
        Self {
            mode: QueueSizeUnit::Packets,
            mean_packet_size: 500,
            queue_ref: 50.0,
            a: 0.00001822,
            b: 0.00001816,
            w: 170.0,
            queue_limit: 50,
            max_size: None,
        }
    }
}

impl PiQueueDiscConfig {
    pub fn new(mode: QueueSizeUnit, queue_limit: u64) -> Self {
        Self {
            mode,
            queue_limit,
            ..Default::default()
        }
    }

    pub fn default_queue_size(&self) -> QueueSize {
        self.max_size
            .unwrap_or(QueueSize::new(self.mode, self.queue_limit))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidParameter {
                name,
                reason: reason.into(),
            }
        }
        if self.mean_packet_size == 0 {
            return Err(invalid("mean_packet_size", "must be positive"));
        }
        if !self.w.is_finite() || self.w <= 0.0 {
            return Err(invalid("w", format!("{} is not a positive frequency", self.w)));
        }
        if Duration::try_from_secs_f64(1.0 / self.w).is_err() {
            return Err(invalid(
                "w",
                format!("{} gives a sampling period out of range", self.w),
            ));
        }
        if !self.queue_ref.is_finite() || self.queue_ref < 0.0 {
            return Err(invalid(
                "queue_ref",
                format!("{} is not a queue length", self.queue_ref),
            ));
        }
        if !self.a.is_finite() || !self.b.is_finite() {
            return Err(invalid("a, b", "gains must be finite"));
        }
        if self.a <= self.b {
            warn!(
                a = self.a,
                b = self.b,
                "PI gain a should exceed b for a stable control loop"
            );
        }
        Ok(())
    }
}

#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PiStats {
    /// Early probability drops: proactive
    pub unforced_drop: u64,
    /// Drops due to queue limit: reactive
    pub forced_drop: u64,
    /// Bytes dequeued since the throughput was last read
    pub bytes_dequeued: u64,
}

impl std::fmt::Display for PiStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unforced drops: {}, forced drops: {}, dequeued: {}",
            self.unforced_drop,
            self.forced_drop,
            ByteSize::b(self.bytes_dequeued)
        )
    }
}

/// Proportional Integral controller AQM.
#[derive(Debug, Clone)]
pub struct PiQueueDisc {
    config: PiQueueDiscConfig,
    controller: PiController,
    stats: PiStats,
    uv: UniformRandom,
}

impl PiQueueDisc {
    pub fn new(config: PiQueueDiscConfig) -> Self {
        debug!(?config, "New PiQueueDisc");
        Self {
            controller: PiController::new(&config),
            config,
            stats: PiStats::default(),
            uv: UniformRandom::new(),
        }
    }

    pub fn config(&self) -> &PiQueueDiscConfig {
        &self.config
    }

    pub fn mode(&self) -> QueueSizeUnit {
        self.config.mode
    }

    pub fn drop_probability(&self) -> f64 {
        self.controller.drop_probability()
    }

    pub fn previous_queue_length(&self) -> u64 {
        self.controller.previous_queue_length()
    }

    pub fn drop_count(&self) -> u64 {
        self.stats.forced_drop + self.stats.unforced_drop
    }

    /// Bytes dequeued since the last call.
    pub fn throughput(&mut self) -> u64 {
        std::mem::take(&mut self.stats.bytes_dequeued)
    }

    pub fn stats(&self) -> PiStats {
        self.stats
    }

    /// Pin the internal uniform source to `stream`. Returns the number of
    /// streams used by this queue disc.
    pub fn assign_streams(&mut self, stream: i64) -> i64 {
        self.uv.set_stream(stream);
        1
    }

    /// Probability that a packet of `size` bytes is dropped early right now.
    pub fn effective_drop_probability(&self, size: usize) -> f64 {
        let mut p = self.controller.drop_probability();
        if self.config.mode == QueueSizeUnit::Bytes {
            p = p * size as f64 / self.config.mean_packet_size as f64;
        }
        p.min(1.0)
    }

    fn over_limit(&self, queued: u64, size: usize) -> bool {
        match self.config.mode {
            QueueSizeUnit::Packets => queued >= self.config.queue_limit,
            QueueSizeUnit::Bytes => queued + size as u64 > self.config.queue_limit,
        }
    }

    fn drop_early(&mut self, size: usize) -> bool {
        let p = self.effective_drop_probability(size);
        if p <= 0.0 {
            return false;
        }
        self.uv.sample() <= p
    }
}

impl<P> AqmPolicy<P> for PiQueueDisc
where
    P: Packet,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn check_config<Q: PacketQueue<P>>(
        &self,
        builder: &mut QueueDiscBuilder<P, Q>,
    ) -> Result<(), ConfigError> {
        self.config.validate()?;

        if builder.n_classes() > 0 {
            return Err(ConfigError::HasClasses(NAME));
        }
        if builder.n_packet_filters() > 0 {
            return Err(ConfigError::HasPacketFilters(NAME));
        }

        if builder.n_internal_queues() == 0 {
            let max_size = self.config.default_queue_size();
            let queue = Q::with_max_size(max_size)
                .ok_or_else(|| ConfigError::NoDefaultQueue(format!("{NAME} of {max_size}")))?;
            debug!(%max_size, "Add default internal queue");
            builder.add_internal_queue(queue);
        }

        let found = builder.n_internal_queues();
        let Some(queue) = builder.get_internal_queue(0).filter(|_| found == 1) else {
            return Err(ConfigError::WrongQueueCount {
                name: NAME,
                expected: 1,
                found,
            });
        };

        let capacity = queue.max_size();
        if capacity.unit != self.config.mode {
            return Err(ConfigError::ModeMismatch {
                queue: capacity.unit,
                disc: self.config.mode,
            });
        }
        if capacity.value < self.config.queue_limit {
            return Err(ConfigError::UndersizedQueue {
                capacity: capacity.value,
                limit: self.config.queue_limit,
            });
        }
        Ok(())
    }

    fn initialize(&mut self) {
        self.controller.reset();
        self.stats = PiStats::default();
    }

    fn admit<Q: PacketQueue<P>>(&mut self, queue: &mut Q, packet: P) -> Admission<P> {
        let queued = queue.occupancy(self.config.mode);
        let size = packet.l3_length();

        if self.over_limit(queued, size) {
            self.stats.forced_drop += 1;
            return Admission::Dropped(DropReason::Forced, packet);
        }
        if self.drop_early(size) {
            self.stats.unforced_drop += 1;
            return Admission::Dropped(DropReason::Unforced, packet);
        }

        // The internal queue may still refuse; that is not one of our drops.
        match queue.enqueue(packet) {
            Ok(()) => {
                trace!(queue_len = queue.length(), "Enqueue packet(l3_len: {})", size);
                Admission::Accepted
            }
            Err(packet) => Admission::Dropped(DropReason::StoreRejected, packet),
        }
    }

    fn remove<Q: PacketQueue<P>>(&mut self, queue: &mut Q) -> Option<P> {
        let packet = queue.dequeue()?;
        self.stats.bytes_dequeued += packet.l3_length() as u64;
        trace!(
            queue_len = queue.length(),
            "Dequeue packet(l3_len: {})",
            packet.l3_length()
        );
        Some(packet)
    }

    fn occupancy<Q: PacketQueue<P>>(&self, queue: &Q) -> u64 {
        queue.occupancy(self.config.mode)
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.controller.period())
    }

    fn tick<Q: PacketQueue<P>>(&mut self, queue: &Q) {
        let queue_length = queue.occupancy(self.config.mode);
        self.controller.recompute(queue_length);
    }
}
