use async_trait::async_trait;
use etherparse::{Ethernet2Header, Ipv4Header};
#[cfg(feature = "serde")]
use serde::Deserialize;
use std::{fmt::Debug, sync::Arc};
use tokio::time::Instant;

use crate::error::Error;

pub mod pi;

/// Length of the Ethernet II header carried in front of every raw buffer.
pub const ETHER_HEADER_LEN: usize = 14;

pub trait Packet: Debug + 'static + Send {
    fn from_raw_buffer(buf: &[u8]) -> Self;

    // Raw buffer length
    fn length(&self) -> usize;
    // Network layer length, the size used by queue limits and byte counters
    fn l3_length(&self) -> usize;
    fn as_slice(&self) -> &[u8];
    fn ether_hdr(&self) -> Option<Ethernet2Header>;
    fn ip_hdr(&self) -> Option<Ipv4Header>;

    // Timestamp
    fn get_timestamp(&self) -> Instant;
    fn set_timestamp(&mut self, timestamp: Instant);

    // Packet description
    fn desc(&self) -> String {
        String::new()
    }

    fn set_flow_id(&mut self, _flow_id: u32) {}
    fn get_flow_id(&self) -> u32 {
        0
    }
}

#[derive(Clone, Debug)]
pub struct StdPacket {
    buf: Vec<u8>,
    timestamp: Instant,
    flow_id: u32,
}

impl StdPacket {
    /// A zero-filled packet whose network layer is `l3_length` bytes long.
    pub fn with_l3_length(l3_length: usize) -> Self {
        Self::from_raw_buffer(&vec![0; l3_length + ETHER_HEADER_LEN])
    }
}

impl Packet for StdPacket {
    fn from_raw_buffer(buf: &[u8]) -> Self {
        Self {
            buf: buf.to_vec(),
            timestamp: Instant::now(),
            flow_id: 0,
        }
    }

    fn length(&self) -> usize {
        self.buf.len()
    }

    fn l3_length(&self) -> usize {
        self.buf.len().saturating_sub(ETHER_HEADER_LEN)
    }

    fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn ip_hdr(&self) -> Option<Ipv4Header> {
        let (_, rest) = Ethernet2Header::from_slice(self.buf.as_slice()).ok()?;
        Ipv4Header::from_slice(rest).ok().map(|(hdr, _)| hdr)
    }

    fn ether_hdr(&self) -> Option<Ethernet2Header> {
        Ethernet2Header::from_slice(self.buf.as_slice())
            .ok()
            .map(|(hdr, _)| hdr)
    }

    fn get_timestamp(&self) -> Instant {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: Instant) {
        self.timestamp = timestamp;
    }

    fn desc(&self) -> String {
        let Some(ether_hdr) = self.ether_hdr() else {
            return "[Unknown]".to_string();
        };
        match ether_hdr.ether_type {
            etherparse::EtherType::IPV4 => match self.ip_hdr() {
                Some(ip_hdr) => format!(
                    "[Ether] [IPv4] src: {} dst: {} id: {} proto: {:?}",
                    std::net::Ipv4Addr::from(ip_hdr.source),
                    std::net::Ipv4Addr::from(ip_hdr.destination),
                    ip_hdr.identification,
                    ip_hdr.protocol,
                ),
                None => "[Ether] [IPv4] malformed".to_string(),
            },
            etherparse::EtherType::ARP => "[Ether] [ARP]".to_string(),
            etherparse::EtherType::IPV6 => "[Ether] [IPv6]".to_string(),
            _ => format!("[Ether] len: {}", self.buf.len()),
        }
    }

    fn set_flow_id(&mut self, flow_id: u32) {
        self.flow_id = flow_id;
    }

    fn get_flow_id(&self) -> u32 {
        self.flow_id
    }
}

pub trait Ingress<P>: Send + Sync
where
    P: Packet,
{
    fn enqueue(&self, packet: P) -> Result<(), Error>;
}

#[async_trait]
pub trait Egress<P>: Send
where
    P: Packet,
{
    async fn dequeue(&mut self) -> Option<P>;

    fn reset(&mut self) {}
}

pub trait ControlInterface: Send + Sync + 'static {
    #[cfg(feature = "serde")]
    type Config: for<'a> Deserialize<'a> + Send;
    #[cfg(not(feature = "serde"))]
    type Config: Send;
    fn set_config(&self, config: Self::Config) -> Result<(), Error>;
}

#[cfg(feature = "serde")]
pub trait JsonControlInterface: Send + Sync {
    fn config_cell(&self, payload: serde_json::Value) -> Result<(), Error>;
}

#[cfg(feature = "serde")]
impl<T> JsonControlInterface for T
where
    T: ControlInterface,
{
    fn config_cell(&self, payload: serde_json::Value) -> Result<(), Error> {
        match serde_json::from_value(payload) {
            Ok(payload) => self.set_config(payload),
            Err(e) => Err(Error::Custom(format!("Invalid cell config, {}", e))),
        }
    }
}

pub trait Cell<P>
where
    P: Packet,
{
    type IngressType: Ingress<P> + 'static;
    type EgressType: Egress<P> + 'static;
    type ControlInterfaceType: ControlInterface;

    fn sender(&self) -> Arc<Self::IngressType>;
    fn receiver(&mut self) -> &mut Self::EgressType;
    fn into_receiver(self) -> Self::EgressType;
    fn control_interface(&self) -> Arc<Self::ControlInterfaceType>;
}
