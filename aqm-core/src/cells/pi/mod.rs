//! A bottleneck link whose buffer is managed by a PI queue disc.
//!
//! Packets entering the cell are offered to the queue disc as soon as the
//! egress sees them, and leave it at the configured bandwidth. The PI
//! controller is ticked on the tokio runtime the cell was built in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bandwidth::Bandwidth;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::{Cell, ControlInterface, Egress, Ingress, Packet};
use crate::error::{ConfigError, Error};
use crate::qdisc::pi::PiQueueDisc;
use crate::qdisc::queue::{DropTailQueue, PacketQueue};
use crate::qdisc::{QueueDisc, SharedQueueDisc};
use crate::scheduler::{Scheduler, TokioScheduler};

pub const MAX_BANDWIDTH: Bandwidth = Bandwidth::from_bps(u64::MAX);

// About ten years, long enough to mean "never" for a stalled link.
pub const LARGE_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

// Length should be the network layer length, not the link layer length
pub fn transfer_time(length: usize, bandwidth: Bandwidth) -> Duration {
    let bits = length as u64 * 8;
    let capacity = bandwidth.as_bps() as u64;
    if capacity == 0 {
        LARGE_DURATION
    } else {
        Duration::from_secs_f64(bits as f64 / capacity as f64)
    }
}

pub struct PiCellIngress<P>
where
    P: Packet,
{
    ingress: mpsc::UnboundedSender<P>,
}

impl<P> Clone for PiCellIngress<P>
where
    P: Packet,
{
    fn clone(&self) -> Self {
        Self {
            ingress: self.ingress.clone(),
        }
    }
}

impl<P> Ingress<P> for PiCellIngress<P>
where
    P: Packet,
{
    fn enqueue(&self, mut packet: P) -> Result<(), Error> {
        packet.set_timestamp(Instant::now());
        self.ingress
            .send(packet)
            .map_err(|_| Error::ChannelError("Data channel is closed.".to_string()))?;
        Ok(())
    }
}

pub struct PiCellEgress<P, Q = DropTailQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    egress: mpsc::UnboundedReceiver<P>,
    bandwidth: Bandwidth,
    queue_disc: SharedQueueDisc<P, PiQueueDisc, Q>,
    next_available: Instant,
    config_rx: mpsc::UnboundedReceiver<PiCellConfig>,
}

impl<P, Q> PiCellEgress<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    pub fn queue_disc(&self) -> &SharedQueueDisc<P, PiQueueDisc, Q> {
        &self.queue_disc
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    fn set_config(&mut self, config: PiCellConfig) {
        if let Some(bandwidth) = config.bandwidth {
            let now = Instant::now();
            // Stretch what is left of the current transmission to the new rate.
            self.next_available = if bandwidth.as_bps() == 0 {
                now + LARGE_DURATION
            } else if self.next_available > now {
                now + (self.next_available - now)
                    .mul_f64(self.bandwidth.as_bps() as f64 / bandwidth.as_bps() as f64)
            } else {
                self.next_available
            };
            debug!(
                before = ?self.bandwidth,
                after = ?bandwidth,
                "Set inner bandwidth:"
            );
            self.bandwidth = bandwidth;
        }
    }

    fn admit(&mut self, packet: P) {
        // Drops are counted and traced by the queue disc.
        let _ = self.queue_disc.enqueue(packet);
    }

    /// Move everything that has already arrived into the queue disc. Returns
    /// `false` once every sender is gone.
    fn drain_arrivals(&mut self) -> bool {
        loop {
            match self.egress.try_recv() {
                Ok(packet) => self.admit(packet),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn transmit(&mut self) -> Option<P> {
        let packet = self.queue_disc.dequeue()?;
        let start = self.next_available.max(packet.get_timestamp());
        self.next_available = start + transfer_time(packet.l3_length(), self.bandwidth);
        trace!(
            l3_len = packet.l3_length(),
            next_available = ?self.next_available,
            "Transmit packet"
        );
        Some(packet)
    }
}

#[async_trait]
impl<P, Q> Egress<P> for PiCellEgress<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    async fn dequeue(&mut self) -> Option<P> {
        loop {
            let connected = self.drain_arrivals();

            if self.queue_disc.is_empty() {
                if !connected {
                    return None;
                }
                tokio::select! {
                    biased;
                    Some(config) = self.config_rx.recv() => {
                        self.set_config(config);
                    }
                    // `new_packet` can be None only if `self.egress` is closed.
                    new_packet = self.egress.recv() => {
                        self.admit(new_packet?);
                    }
                }
                continue;
            }

            if Instant::now() >= self.next_available {
                return self.transmit();
            }

            tokio::select! {
                biased;
                Some(config) = self.config_rx.recv() => {
                    self.set_config(config);
                }
                _ = tokio::time::sleep_until(self.next_available) => {}
                Some(new_packet) = self.egress.recv(), if connected => {
                    self.admit(new_packet);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.queue_disc.initialize();
    }
}

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Deserialize, Serialize)
)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PiCellConfig {
    #[cfg_attr(feature = "serde", serde(with = "human_bandwidth::serde", default))]
    pub bandwidth: Option<Bandwidth>,
}

impl PiCellConfig {
    pub fn new<T: Into<Option<Bandwidth>>>(bandwidth: T) -> Self {
        Self {
            bandwidth: bandwidth.into(),
        }
    }
}

pub struct PiCellControlInterface {
    config_tx: mpsc::UnboundedSender<PiCellConfig>,
}

impl ControlInterface for PiCellControlInterface {
    type Config = PiCellConfig;

    fn set_config(&self, config: Self::Config) -> Result<(), Error> {
        let Some(bandwidth) = config.bandwidth else {
            return Err(ConfigError::InvalidParameter {
                name: "bandwidth",
                reason: "nothing to set".to_string(),
            }
            .into());
        };
        if bandwidth > MAX_BANDWIDTH {
            return Err(ConfigError::InvalidParameter {
                name: "bandwidth",
                reason: "should be less than 2^64 bps".to_string(),
            }
            .into());
        }
        info!("Setting bandwidth to: {:?}", bandwidth);
        self.config_tx
            .send(config)
            .map_err(|_| Error::ChannelError("Control channel is closed.".to_string()))?;
        Ok(())
    }
}

pub struct PiCell<P, Q = DropTailQueue<P>>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    ingress: Arc<PiCellIngress<P>>,
    egress: PiCellEgress<P, Q>,
    control_interface: Arc<PiCellControlInterface>,
}

impl<P, Q> Cell<P> for PiCell<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    type IngressType = PiCellIngress<P>;
    type EgressType = PiCellEgress<P, Q>;
    type ControlInterfaceType = PiCellControlInterface;

    fn sender(&self) -> Arc<Self::IngressType> {
        self.ingress.clone()
    }

    fn receiver(&mut self) -> &mut Self::EgressType {
        &mut self.egress
    }

    fn into_receiver(self) -> Self::EgressType {
        self.egress
    }

    fn control_interface(&self) -> Arc<Self::ControlInterfaceType> {
        self.control_interface.clone()
    }
}

impl<P, Q> PiCell<P, Q>
where
    P: Packet,
    Q: PacketQueue<P> + 'static,
{
    /// Must be called within a tokio runtime, which will drive the PI tick.
    pub fn new<B: Into<Option<Bandwidth>>>(
        bandwidth: B,
        queue_disc: QueueDisc<P, PiQueueDisc, Q>,
    ) -> Result<PiCell<P, Q>, Error> {
        let scheduler = TokioScheduler::current()?;
        Ok(Self::with_scheduler(bandwidth, queue_disc, &scheduler))
    }

    pub fn with_scheduler<B: Into<Option<Bandwidth>>, S: Scheduler>(
        bandwidth: B,
        queue_disc: QueueDisc<P, PiQueueDisc, Q>,
        scheduler: &S,
    ) -> PiCell<P, Q> {
        debug!("New PiCell");
        let (rx, tx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        PiCell {
            ingress: Arc::new(PiCellIngress { ingress: rx }),
            egress: PiCellEgress {
                egress: tx,
                bandwidth: bandwidth.into().unwrap_or(MAX_BANDWIDTH),
                queue_disc: SharedQueueDisc::install(queue_disc, scheduler),
                next_available: Instant::now(),
                config_rx,
            },
            control_interface: Arc::new(PiCellControlInterface { config_tx }),
        }
    }
}
