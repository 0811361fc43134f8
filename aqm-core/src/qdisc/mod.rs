//! Queue disciplines.
//!
//! A [`QueueDisc`] owns the internal FIFO and routes enqueue, dequeue and
//! peek to an [`AqmPolicy`], which decides what gets in. The policy never
//! stores packets itself, it only sees the FIFO through the host.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, error, trace};

use crate::cells::Packet;
use crate::error::ConfigError;
use crate::scheduler::{Scheduler, TaskHandle};

pub mod controller;
pub mod pi;
pub mod queue;

use queue::PacketQueue;

#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The hard capacity limit of the policy was hit.
    Forced,
    /// The policy dropped the packet early while there was still room.
    Unforced,
    /// The policy accepted the packet but the internal queue refused it.
    StoreRejected,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Forced => "Forced drop",
            DropReason::Unforced => "Unforced drop",
            DropReason::StoreRejected => "Internal queue drop",
        }
    }
}

/// Outcome of offering a packet to a policy.
#[derive(Debug)]
pub enum Admission<P> {
    Accepted,
    Dropped(DropReason, P),
}

/// Classifier that can be attached to a queue disc.
pub trait PacketFilter<P>: Send
where
    P: Packet,
{
    fn classify(&self, packet: &P) -> Option<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDiscClass {
    pub handle: u32,
}

pub trait AqmPolicy<P>: Send
where
    P: Packet,
{
    fn name(&self) -> &'static str;

    /// Validate what has been attached to the queue disc. The policy may add
    /// a default internal queue when none was provided.
    fn check_config<Q: PacketQueue<P>>(
        &self,
        builder: &mut QueueDiscBuilder<P, Q>,
    ) -> Result<(), ConfigError>;

    /// Reset all dynamic state. May be called again at any time.
    fn initialize(&mut self);

    fn admit<Q: PacketQueue<P>>(&mut self, queue: &mut Q, packet: P) -> Admission<P>;

    fn remove<Q: PacketQueue<P>>(&mut self, queue: &mut Q) -> Option<P>;

    fn inspect<'q, Q: PacketQueue<P>>(&self, queue: &'q Q) -> Option<&'q P> {
        queue.peek()
    }

    fn occupancy<Q: PacketQueue<P>>(&self, queue: &Q) -> u64;

    /// How often [`AqmPolicy::tick`] should run, if at all.
    fn tick_period(&self) -> Option<Duration> {
        None
    }

    fn tick<Q: PacketQueue<P>>(&mut self, _queue: &Q) {}
}

/// Per-disc counters kept by the host regardless of the policy.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueDiscStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub dequeued_packets: u64,
    pub dequeued_bytes: u64,
    pub dropped_packets: u64,
    pub dropped_bytes: u64,
    pub forced_drops: u64,
    pub unforced_drops: u64,
    pub store_rejections: u64,
}

impl QueueDiscStats {
    fn record_drop(&mut self, reason: DropReason, bytes: usize) {
        self.dropped_packets += 1;
        self.dropped_bytes += bytes as u64;
        match reason {
            DropReason::Forced => self.forced_drops += 1,
            DropReason::Unforced => self.unforced_drops += 1,
            DropReason::StoreRejected => self.store_rejections += 1,
        }
    }
}

/// Collects the internal queues, filters and classes of a queue disc before
/// the policy validates them in [`QueueDiscBuilder::build`].
pub struct QueueDiscBuilder<P, Q>
where
    P: Packet,
{
    queues: Vec<Q>,
    filters: Vec<Box<dyn PacketFilter<P>>>,
    classes: Vec<QueueDiscClass>,
}

impl<P, Q> Default for QueueDiscBuilder<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, Q> QueueDiscBuilder<P, Q>
where
    P: Packet,
    Q: PacketQueue<P>,
{
    pub fn new() -> Self {
        Self {
            queues: Vec::new(),
            filters: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn internal_queue(mut self, queue: Q) -> Self {
        self.add_internal_queue(queue);
        self
    }

    pub fn packet_filter(mut self, filter: Box<dyn PacketFilter<P>>) -> Self {
        self.add_packet_filter(filter);
        self
    }

    pub fn class(mut self, class: QueueDiscClass) -> Self {
        self.add_class(class);
        self
    }

    pub fn add_internal_queue(&mut self, queue: Q) {
        self.queues.push(queue);
    }

    pub fn add_packet_filter(&mut self, filter: Box<dyn PacketFilter<P>>) {
        self.filters.push(filter);
    }

    pub fn add_class(&mut self, class: QueueDiscClass) {
        self.classes.push(class);
    }

    pub fn n_internal_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn get_internal_queue(&self, index: usize) -> Option<&Q> {
        self.queues.get(index)
    }

    pub fn n_packet_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Let the policy validate the attached parts, then initialize it.
    pub fn build<A>(mut self, mut policy: A) -> Result<QueueDisc<P, A, Q>, ConfigError>
    where
        A: AqmPolicy<P>,
    {
        if let Err(e) = policy.check_config(&mut self) {
            error!("{} rejected its configuration: {}", policy.name(), e);
            return Err(e);
        }
        let found = self.queues.len();
        let queue = match self.queues.pop() {
            Some(queue) if found == 1 => queue,
            _ => {
                return Err(ConfigError::WrongQueueCount {
                    name: policy.name(),
                    expected: 1,
                    found,
                })
            }
        };
        debug!(name = policy.name(), max_size = %queue.max_size(), "New QueueDisc");
        policy.initialize();
        Ok(QueueDisc {
            policy,
            queue,
            stats: QueueDiscStats::default(),
            _packet: PhantomData,
        })
    }
}

/// A validated queue disc with a single internal queue.
pub struct QueueDisc<P, A, Q> {
    policy: A,
    queue: Q,
    stats: QueueDiscStats,
    _packet: PhantomData<fn() -> P>,
}

impl<P, A, Q> QueueDisc<P, A, Q>
where
    P: Packet,
    A: AqmPolicy<P>,
    Q: PacketQueue<P>,
{
    /// Zero the policy state and the host counters. Packets already queued
    /// stay where they are.
    pub fn initialize(&mut self) {
        debug!(name = self.policy.name(), "Initialize QueueDisc");
        self.policy.initialize();
        self.stats = QueueDiscStats::default();
    }

    pub fn enqueue(&mut self, packet: P) -> Result<(), DropReason> {
        let bytes = packet.l3_length();
        match self.policy.admit(&mut self.queue, packet) {
            Admission::Accepted => {
                self.stats.enqueued_packets += 1;
                self.stats.enqueued_bytes += bytes as u64;
                Ok(())
            }
            Admission::Dropped(reason, packet) => {
                self.stats.record_drop(reason, bytes);
                trace!(
                    queue_len = self.queue.length(),
                    queue_bytes = self.queue.bytes(),
                    desc = %packet.desc(),
                    "{} of packet(l3_len: {})",
                    reason.as_str(),
                    bytes
                );
                Err(reason)
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<P> {
        let packet = self.policy.remove(&mut self.queue)?;
        self.stats.dequeued_packets += 1;
        self.stats.dequeued_bytes += packet.l3_length() as u64;
        Some(packet)
    }

    pub fn peek(&self) -> Option<&P> {
        self.policy.inspect(&self.queue)
    }

    pub fn occupancy(&self) -> u64 {
        self.policy.occupancy(&self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn tick(&mut self) {
        self.policy.tick(&self.queue);
    }

    pub fn policy(&self) -> &A {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut A {
        &mut self.policy
    }

    pub fn internal_queue(&self) -> &Q {
        &self.queue
    }

    pub fn stats(&self) -> QueueDiscStats {
        self.stats
    }
}

/// A queue disc shared between the data path and its periodic tick.
///
/// The tick only holds a weak reference, and it is cancelled when this
/// handle is torn down or dropped.
pub struct SharedQueueDisc<P, A, Q> {
    disc: Arc<Mutex<QueueDisc<P, A, Q>>>,
    tick: Option<TaskHandle>,
}

impl<P, A, Q> SharedQueueDisc<P, A, Q>
where
    P: Packet,
    A: AqmPolicy<P> + 'static,
    Q: PacketQueue<P> + 'static,
{
    pub fn install<S: Scheduler>(disc: QueueDisc<P, A, Q>, scheduler: &S) -> Self {
        let period = disc.policy().tick_period();
        let disc = Arc::new(Mutex::new(disc));
        let tick = period.map(|period| {
            debug!(?period, "Schedule periodic tick");
            let weak = Arc::downgrade(&disc);
            scheduler.schedule_repeating(
                period,
                Box::new(move || {
                    if let Some(disc) = weak.upgrade() {
                        disc.lock().tick();
                    }
                }),
            )
        });
        Self { disc, tick }
    }

    pub fn enqueue(&self, packet: P) -> Result<(), DropReason> {
        self.disc.lock().enqueue(packet)
    }

    pub fn dequeue(&self) -> Option<P> {
        self.disc.lock().dequeue()
    }

    pub fn get_front_size(&self) -> Option<usize> {
        self.disc.lock().peek().map(|packet| packet.l3_length())
    }

    pub fn occupancy(&self) -> u64 {
        self.disc.lock().occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.disc.lock().is_empty()
    }

    pub fn stats(&self) -> QueueDiscStats {
        self.disc.lock().stats()
    }

    pub fn initialize(&self) {
        self.disc.lock().initialize();
    }

    /// Run `f` with exclusive access to the disc.
    pub fn with<R>(&self, f: impl FnOnce(&mut QueueDisc<P, A, Q>) -> R) -> R {
        f(&mut self.disc.lock())
    }

    pub fn is_ticking(&self) -> bool {
        self.tick.as_ref().is_some_and(|tick| !tick.is_cancelled())
    }

    /// Cancel the periodic tick and release the disc.
    pub fn teardown(mut self) {
        self.cancel_tick();
    }

    /// Stop the periodic tick but keep the disc usable.
    pub fn cancel_tick(&mut self) {
        if let Some(tick) = self.tick.take() {
            debug!("Cancel periodic tick");
            tick.cancel();
        }
    }
}

impl<P, A, Q> Drop for SharedQueueDisc<P, A, Q> {
    fn drop(&mut self) {
        if let Some(tick) = self.tick.take() {
            tick.cancel();
        }
    }
}

impl<P, A, Q> Debug for SharedQueueDisc<P, A, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedQueueDisc")
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}
