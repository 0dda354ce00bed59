use std::collections::HashMap;

use crate::error::{ClientError, Result};

/// Monotonic 16-bit identifier source. Zero is never produced and the
/// counter wraps from 65535 back to 1.
#[derive(Debug, Default, Clone)]
pub struct PacketIdAllocator {
    last: u16,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u16 {
        self.last = match self.last {
            u16::MAX => 1,
            n => n + 1,
        };
        self.last
    }
}

/// The acknowledgement an outstanding identifier is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitedAck {
    PubAck,
    PubRec,
    PubComp,
    SubAck,
    UnsubAck,
}

/// Identifiers currently waiting for an acknowledgement.
#[derive(Debug, Default)]
pub struct PacketIds {
    allocator: PacketIdAllocator,
    in_use: HashMap<u16, AwaitedAck>,
}

impl PacketIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next identifier not already outstanding.
    pub fn acquire(&mut self, awaited: AwaitedAck) -> Result<u16> {
        for _ in 0..u16::MAX {
            let id = self.allocator.next();

            if !self.in_use.contains_key(&id) {
                self.in_use.insert(id, awaited);
                return Ok(id);
            }
        }

        Err(ClientError::PacketIdExhausted)
    }

    /// Frees `id` if it was waiting for `ack`.
    pub fn complete(&mut self, id: u16, ack: AwaitedAck) -> Result<()> {
        match self.in_use.get(&id) {
            Some(awaited) if *awaited == ack => {
                self.in_use.remove(&id);
                Ok(())
            }
            _ => Err(ClientError::UnknownPacketId(id)),
        }
    }

    /// Moves a QoS 2 publish from waiting for PUBREC to waiting for PUBCOMP.
    pub fn advance(&mut self, id: u16) -> Result<()> {
        match self.in_use.get_mut(&id) {
            Some(awaited) if *awaited == AwaitedAck::PubRec => {
                *awaited = AwaitedAck::PubComp;
                Ok(())
            }
            _ => Err(ClientError::UnknownPacketId(id)),
        }
    }

    pub fn release(&mut self, id: u16) {
        self.in_use.remove(&id);
    }

    pub fn is_outstanding(&self, id: u16) -> bool {
        self.in_use.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_use.clear();
    }
}
