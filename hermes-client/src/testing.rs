//! Scripted transport and recording handler shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use hermes_core::{packet_type::PacketType, properties::PropertyList, protocol::ProtocolVersion};

use crate::clock::ManualClock;
use crate::error::ClientError;
use crate::message::{HandlerError, MessageFragment, MessageHandler};
use crate::network::{NetError, Network};
use crate::options::ClientOptions;
use crate::session::Session;

/// Replays queued inbound chunks and records everything sent.
///
/// Once the script runs dry, `receive` moves the clock forward by the
/// requested timeout and reports `NetError::Timeout`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedNetwork {
    inbound: VecDeque<Vec<u8>>,
    pub sent: Vec<u8>,
    pub connected: bool,
    /// Every other call fails with `WouldBlock`.
    pub would_block: bool,
    blocked: bool,
    clock: Option<ManualClock>,
}

impl ScriptedNetwork {
    pub fn with_clock(clock: ManualClock) -> Self {
        ScriptedNetwork {
            clock: Some(clock),
            ..Default::default()
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.inbound.push_back(chunk.to_vec());
    }

    fn stall(&mut self) -> bool {
        if !self.would_block {
            return false;
        }

        self.blocked = !self.blocked;
        self.blocked
    }
}

impl Network for ScriptedNetwork {
    fn connect(&mut self, _host: &str, _port: u16, _timeout: Duration) -> Result<(), NetError> {
        if self.stall() {
            return Err(NetError::WouldBlock);
        }

        self.connected = true;
        Ok(())
    }

    fn send(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize, NetError> {
        if self.stall() {
            return Err(NetError::WouldBlock);
        }

        self.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, NetError> {
        if self.stall() {
            return Err(NetError::WouldBlock);
        }

        let mut chunk = match self.inbound.pop_front() {
            Some(chunk) => chunk,
            None => {
                if let Some(clock) = &self.clock {
                    clock.advance(timeout);
                }
                return Err(NetError::Timeout);
            }
        };

        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);

        if n < chunk.len() {
            self.inbound.push_front(chunk.split_off(n));
        }

        Ok(n)
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        self.connected = false;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fragment {
    pub topic: String,
    pub payload: Vec<u8>,
    pub offset: usize,
    pub total: usize,
    pub first: bool,
    pub last: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub fragments: Vec<Fragment>,
    pub properties: Vec<PacketType>,
    pub disconnects: Vec<String>,
    /// Rejects the next fragment instead of recording it.
    pub fail_next: bool,
    /// Raised after the last fragment of a message.
    pub stop: Option<Arc<AtomicBool>>,
}

impl Recorder {
    /// Payload bytes of every recorded fragment, in order.
    pub fn payload(&self) -> Vec<u8> {
        self.fragments
            .iter()
            .flat_map(|f| f.payload.iter().copied())
            .collect()
    }
}

impl MessageHandler for Recorder {
    fn on_message(&mut self, fragment: &MessageFragment<'_>) -> Result<(), HandlerError> {
        if self.fail_next {
            self.fail_next = false;
            return Err("rejected".into());
        }

        self.fragments.push(Fragment {
            topic: fragment.topic.to_string(),
            payload: fragment.payload.to_vec(),
            offset: fragment.offset,
            total: fragment.total,
            first: fragment.first,
            last: fragment.last,
        });

        if let (true, Some(stop)) = (fragment.last, &self.stop) {
            stop.store(true, Ordering::SeqCst);
        }

        Ok(())
    }

    fn on_properties(
        &mut self,
        packet_type: PacketType,
        _properties: &PropertyList,
    ) -> Result<(), HandlerError> {
        self.properties.push(packet_type);
        Ok(())
    }

    fn on_disconnect(&mut self, error: &ClientError) {
        self.disconnects.push(error.to_string());
    }
}

pub(crate) fn options(version: ProtocolVersion) -> ClientOptions {
    ClientOptions::new("broker.test", 1883)
        .client_id("test1")
        .keep_alive(60)
        .protocol_version(version)
        .cmd_timeout(Duration::from_secs(5))
}

pub(crate) fn session(
    options: &ClientOptions,
    clock: &ManualClock,
) -> Session<ScriptedNetwork, ManualClock> {
    Session::new(
        ScriptedNetwork::with_clock(clock.clone()),
        clock.clone(),
        options,
    )
}

/// Unwraps an operation that is expected to have completed.
pub(crate) fn ready<T>(poll: Poll<crate::error::Result<T>>) -> crate::error::Result<T> {
    match poll {
        Poll::Ready(result) => result,
        Poll::Pending => panic!("operation did not complete"),
    }
}
