//! Active queue management with a Proportional Integral controller.
//!
//! [`qdisc::pi::PiQueueDisc`] decides which packets enter the internal queue
//! of a [`qdisc::QueueDisc`], and [`cells::pi::PiCell`] puts such a queue
//! disc in front of a rate-limited link.

pub mod cells;
pub mod config;
pub mod error;
pub mod qdisc;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
