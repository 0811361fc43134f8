mod cell;
#[cfg(feature = "serde")]
mod config;
mod queue_disc;
mod tick;
