use crate::cells::Packet;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use tracing::{debug, trace};

/// Unit in which occupancy and limits of a queue are measured.
#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum QueueSizeUnit {
    #[default]
    Packets,
    Bytes,
}

#[cfg_attr(
    feature = "serde",
    derive(serde_with::SerializeDisplay, serde_with::DeserializeFromStr)
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueSize {
    pub unit: QueueSizeUnit,
    pub value: u64,
}

impl QueueSize {
    pub fn new(unit: QueueSizeUnit, value: u64) -> Self {
        Self { unit, value }
    }

    pub fn packets(value: u64) -> Self {
        Self::new(QueueSizeUnit::Packets, value)
    }

    pub fn bytes(value: u64) -> Self {
        Self::new(QueueSizeUnit::Bytes, value)
    }
}

impl Display for QueueSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.unit {
            QueueSizeUnit::Packets => write!(f, "{}p", self.value),
            QueueSizeUnit::Bytes => write!(f, "{}B", self.value),
        }
    }
}

// Accepts the "25p" / "1500B" notation used on the command line and in config files.
impl FromStr for QueueSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, unit) = if let Some(digits) = s.strip_suffix('p') {
            (digits, QueueSizeUnit::Packets)
        } else if let Some(digits) = s.strip_suffix('B') {
            (digits, QueueSizeUnit::Bytes)
        } else {
            return Err(format!("queue size \"{s}\" needs a 'p' or 'B' suffix"));
        };
        digits
            .trim()
            .parse::<u64>()
            .map(|value| QueueSize::new(unit, value))
            .map_err(|e| format!("invalid queue size \"{s}\", {e}"))
    }
}

/// Storage a queue disc keeps its packets in. Implementations must be FIFO.
pub trait PacketQueue<P>: Send
where
    P: Packet,
{
    /// Build a queue holding at most `max_size`, or `None` if such a queue
    /// makes no sense (e.g. zero capacity).
    fn with_max_size(max_size: QueueSize) -> Option<Self>
    where
        Self: Sized;

    /// On rejection the packet is handed back to the caller.
    fn enqueue(&mut self, packet: P) -> Result<(), P>;

    // If the queue is empty, return `None`
    fn dequeue(&mut self) -> Option<P>;

    fn peek(&self) -> Option<&P>;

    fn is_empty(&self) -> bool;

    // If the queue is empty, return `None`
    fn get_front_size(&self) -> Option<usize> {
        self.peek().map(|packet| packet.l3_length())
    }

    fn length(&self) -> usize;

    fn bytes(&self) -> usize;

    fn max_size(&self) -> QueueSize;

    fn occupancy(&self, unit: QueueSizeUnit) -> u64 {
        match unit {
            QueueSizeUnit::Packets => self.length() as u64,
            QueueSizeUnit::Bytes => self.bytes() as u64,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone)]
pub struct DropTailQueueConfig {
    pub max_size: QueueSize,
}

impl Default for DropTailQueueConfig {
    fn default() -> Self {
        Self {
            max_size: QueueSize::packets(100),
        }
    }
}

impl DropTailQueueConfig {
    pub fn new(max_size: QueueSize) -> Self {
        Self { max_size }
    }
}

impl<P> From<DropTailQueueConfig> for DropTailQueue<P> {
    fn from(config: DropTailQueueConfig) -> Self {
        DropTailQueue::new(config)
    }
}

#[derive(Debug)]
pub struct DropTailQueue<P> {
    queue: VecDeque<P>,
    max_size: QueueSize,
    now_bytes: usize,
}

impl<P> DropTailQueue<P> {
    pub fn new(config: DropTailQueueConfig) -> Self {
        debug!(?config, "New DropTailQueue");
        Self {
            queue: VecDeque::new(),
            max_size: config.max_size,
            now_bytes: 0,
        }
    }
}

impl<P> Default for DropTailQueue<P> {
    fn default() -> Self {
        Self::new(DropTailQueueConfig::default())
    }
}

impl<P> PacketQueue<P> for DropTailQueue<P>
where
    P: Packet,
{
    fn with_max_size(max_size: QueueSize) -> Option<Self> {
        (max_size.value > 0).then(|| Self::new(DropTailQueueConfig::new(max_size)))
    }

    fn enqueue(&mut self, packet: P) -> Result<(), P> {
        let fits = match self.max_size.unit {
            QueueSizeUnit::Packets => (self.queue.len() as u64) < self.max_size.value,
            QueueSizeUnit::Bytes => {
                (self.now_bytes + packet.l3_length()) as u64 <= self.max_size.value
            }
        };
        if fits {
            self.now_bytes += packet.l3_length();
            self.queue.push_back(packet);
            Ok(())
        } else {
            trace!(
                queue_len = self.queue.len(),
                now_bytes = self.now_bytes,
                max_size = %self.max_size,
                "Reject packet(l3_len: {}) when enqueue",
                packet.l3_length()
            );
            Err(packet)
        }
    }

    fn dequeue(&mut self) -> Option<P> {
        let packet = self.queue.pop_front()?;
        self.now_bytes -= packet.l3_length();
        Some(packet)
    }

    fn peek(&self) -> Option<&P> {
        self.queue.front()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn length(&self) -> usize {
        self.queue.len()
    }

    fn bytes(&self) -> usize {
        self.now_bytes
    }

    fn max_size(&self) -> QueueSize {
        self.max_size
    }
}
