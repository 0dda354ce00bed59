use hermes_packets::publish::PublishPacket;

use crate::error::{ClientError, Result};
use crate::message::{MessageFragment, MessageHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    next_offset: usize,
    total: usize,
}

/// Follows a PUBLISH payload arriving over several reads and passes each
/// piece straight to the handler. Nothing is buffered; only the position
/// of the single open message is kept.
#[derive(Debug, Default)]
pub struct MessageReassembler {
    open: Option<Progress>,
}

impl MessageReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Drops the open message, if any.
    pub fn reset(&mut self) {
        self.open = None;
    }

    /// Delivers `chunk`, found at `offset` of a `total` byte payload.
    ///
    /// Returns `true` once the final fragment has been delivered.
    pub fn deliver<H>(
        &mut self,
        publish: &PublishPacket,
        offset: usize,
        chunk: &[u8],
        total: usize,
        handler: &mut H,
    ) -> Result<bool>
    where
        H: MessageHandler + ?Sized,
    {
        let first = offset == 0;
        let end = offset + chunk.len();

        match self.open {
            Some(_) if first => {
                self.open = None;
                return Err(ClientError::Reassembly(
                    "new message while another is open".into(),
                ));
            }
            Some(p) if p.next_offset != offset || p.total != total => {
                self.open = None;
                return Err(ClientError::Reassembly(format!(
                    "expected offset {} of {}, got {} of {}",
                    p.next_offset, p.total, offset, total
                )));
            }
            None if !first => {
                return Err(ClientError::Reassembly(format!(
                    "continuation at offset {} without a message",
                    offset
                )));
            }
            _ => {}
        }

        if end > total {
            self.open = None;
            return Err(ClientError::Reassembly(format!(
                "fragment ends at {} past {}",
                end, total
            )));
        }

        let last = end == total;
        let fragment = MessageFragment {
            topic: &publish.topic,
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            packet_id: publish.packet_id,
            properties: &publish.properties,
            payload: chunk,
            offset,
            total,
            first,
            last,
        };

        if let Err(e) = handler.on_message(&fragment) {
            self.open = None;
            return Err(ClientError::Callback(e.to_string()));
        }

        self.open = (!last).then_some(Progress {
            next_offset: end,
            total,
        });

        Ok(last)
    }
}
