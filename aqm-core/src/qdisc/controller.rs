use std::time::Duration;

use tracing::trace;

use super::pi::PiQueueDiscConfig;
use super::queue::QueueSizeUnit;

/// Discretized PI controller driving the early drop probability.
///
/// Every sampling period the probability moves by
/// `a * (q - q_ref) - b * (q_old - q_ref)`, where queue lengths are measured
/// in packets, or in mean-sized packets when the queue counts bytes.
#[derive(Debug, Clone)]
pub struct PiController {
    mode: QueueSizeUnit,
    a: f64,
    b: f64,
    queue_ref: f64,
    mean_packet_size: f64,
    sampling_frequency: f64,
    drop_probability: f64,
    previous_queue_length: u64,
}

impl PiController {
    pub fn new(config: &PiQueueDiscConfig) -> Self {
        Self {
            mode: config.mode,
            a: config.a,
            b: config.b,
            queue_ref: config.queue_ref,
            mean_packet_size: config.mean_packet_size as f64,
            sampling_frequency: config.w,
            drop_probability: 0.0,
            previous_queue_length: 0,
        }
    }

    pub fn reset(&mut self) {
        self.drop_probability = 0.0;
        self.previous_queue_length = 0;
    }

    /// Time between two calls of [`PiController::recompute`].
    /// Saturates at [`Duration::MAX`] for frequencies that validation rejects.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.sampling_frequency).unwrap_or(Duration::MAX)
    }

    pub fn drop_probability(&self) -> f64 {
        self.drop_probability
    }

    pub fn previous_queue_length(&self) -> u64 {
        self.previous_queue_length
    }

    fn normalize(&self, length: u64) -> f64 {
        match self.mode {
            QueueSizeUnit::Packets => length as f64,
            QueueSizeUnit::Bytes => length as f64 / self.mean_packet_size,
        }
    }

    /// Feed the queue length sampled this period and return the new drop
    /// probability.
    pub fn recompute(&mut self, queue_length: u64) -> f64 {
        let p = self.a * (self.normalize(queue_length) - self.queue_ref)
            - self.b * (self.normalize(self.previous_queue_length) - self.queue_ref)
            + self.drop_probability;
        // Huge finite gains can overflow both terms to inf, and inf - inf is NaN.
        let p = if p.is_nan() {
            self.drop_probability
        } else {
            p.clamp(0.0, 1.0)
        };
        trace!(
            queue_length,
            previous_queue_length = self.previous_queue_length,
            before = self.drop_probability,
            after = p,
            "Recompute drop probability"
        );
        self.drop_probability = p;
        self.previous_queue_length = queue_length;
        p
    }

    #[cfg(test)]
    pub(crate) fn set_state(&mut self, drop_probability: f64, previous_queue_length: u64) {
        self.drop_probability = drop_probability.clamp(0.0, 1.0);
        self.previous_queue_length = previous_queue_length;
    }
}
