use std::time::Duration;

use aqm_core::config::PiCellBuildConfig;
use aqm_core::qdisc::pi::PiQueueDiscConfig;
use aqm_core::qdisc::queue::QueueSizeUnit;
use bandwidth::Bandwidth;
use serde::{Deserialize, Serialize};

/// Dumbbell topology: `sources` bulk senders, each behind its own access
/// link, share the bottleneck towards a single sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub sources: usize,
    /// Bandwidth and PI queue disc of the bottleneck
    pub bottleneck: PiCellBuildConfig,
    #[serde(with = "humantime_serde")]
    pub bottleneck_delay: Duration,
    #[serde(with = "human_bandwidth::serde")]
    pub access_bandwidth: Bandwidth,
    #[serde(with = "humantime_serde")]
    pub access_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// How often the bottleneck occupancy is sampled
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sources: 5,
            bottleneck: PiCellBuildConfig {
                bandwidth: Some(Bandwidth::from_mbps(10)),
                queue_disc: PiQueueDiscConfig {
                    mean_packet_size: 1000,
                    queue_ref: 50.0,
                    ..PiQueueDiscConfig::new(QueueSizeUnit::Packets, 200)
                },
                stream: None,
            },
            bottleneck_delay: Duration::from_millis(50),
            access_bandwidth: Bandwidth::from_mbps(10),
            access_delay: Duration::from_millis(5),
            duration: Duration::from_secs(101),
            sample_interval: Duration::from_millis(100),
        }
    }
}

impl SimConfig {
    /// Round trip time of an empty network.
    pub fn base_rtt(&self) -> Duration {
        (self.bottleneck_delay + self.access_delay * 2) * 2
    }

    pub fn packet_size(&self) -> usize {
        self.bottleneck.queue_disc.mean_packet_size as usize
    }
}
