use hermes_core::{packet_type::PacketType, properties::PropertyList, qos::QoS};

use crate::error::ClientError;

/// Error type callbacks hand back to the engine.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// One chunk of an inbound PUBLISH payload.
///
/// A message arrives as one or more fragments. `first` is set on the
/// fragment at offset 0 and `last` on the one ending at `total`; a message
/// that fits one read, or has an empty payload, sets both.
#[derive(Debug, Clone, Copy)]
pub struct MessageFragment<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
    /// PUBLISH properties, empty for MQTT 3.1.1.
    pub properties: &'a PropertyList,
    pub payload: &'a [u8],
    /// Position of `payload` within the whole message.
    pub offset: usize,
    pub total: usize,
    pub first: bool,
    pub last: bool,
}

/// Application hooks invoked while the session processes inbound packets.
pub trait MessageHandler {
    fn on_message(&mut self, fragment: &MessageFragment<'_>) -> Result<(), HandlerError>;

    /// Called once for every inbound packet carrying a property block.
    fn on_properties(
        &mut self,
        _packet_type: PacketType,
        _properties: &PropertyList,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called when the session is torn down by a network error.
    fn on_disconnect(&mut self, _error: &ClientError) {}
}

impl<F> MessageHandler for F
where
    F: FnMut(&MessageFragment<'_>) -> Result<(), HandlerError>,
{
    fn on_message(&mut self, fragment: &MessageFragment<'_>) -> Result<(), HandlerError> {
        self(fragment)
    }
}
