//! One MQTT connection with every operation exposed as a resumable call.
//!
//! Each operation returns `Poll::Pending` when the transport would block
//! and picks up exactly where it stopped on the next call with the same
//! operation. Encoded output waits in the outbox until the transport took
//! all of it; input is parsed incrementally so PUBLISH payloads of any size
//! stream through a fixed receive buffer.

use std::cmp;
use std::collections::{HashSet, VecDeque};
use std::mem;
use std::task::{ready, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use hermes_core::{
    codec::{check_field_length, Decoder, Encoder},
    error::Error as PacketError,
    packet_type::PacketType,
    properties::{PropertyList, PropertyType},
    protocol::ProtocolVersion,
    qos::QoS,
    reason::ReasonCode,
    topic,
};
use hermes_packets::{
    ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket},
    connack::ConnAckPacket,
    connect::{ConnectPacket, LastWill},
    disconnect::DisconnectPacket,
    ping::PingReqPacket,
    publish::PublishPacket,
    suback::{self, SubAckPacket},
    subscribe::{SubscribePacket, Subscription},
    unsuback::UnsubAckPacket,
    unsubscribe::UnsubscribePacket,
    ControlPacket, FixedHeader,
};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ClientError, Result};
use crate::keepalive::KeepAlive;
use crate::message::MessageHandler;
use crate::network::{NetError, Network};
use crate::options::{ClientOptions, Mode};
use crate::packet_id::{AwaitedAck, PacketIds};
use crate::reassembly::MessageReassembler;
use crate::request::{
    ConnectRequest, ConnectResult, DisconnectRequest, PublishRequest, SubscribeRequest,
    SubscribeResult, UnsubscribeRequest,
};

/// Repeats a resumable step until it completes when running in blocking mode.
macro_rules! drive {
    ($session:expr, $step:expr) => {
        loop {
            let poll = $step;
            if poll.is_ready() || $session.mode == Mode::NonBlocking {
                break poll;
            }
        }
    };
}

/// Limits negotiated through CONNECT and CONNACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest packet the server accepts from us.
    pub max_packet_size: u32,
    pub max_qos: QoS,
    pub retain_available: bool,
    pub topic_alias_max: u16,
    pub subscription_ids_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Connect,
    Subscribe,
    Unsubscribe,
    Publish,
    Ping,
    WaitMessage,
    Disconnect,
}

#[derive(Debug, Clone, Copy)]
struct Operation {
    kind: OpKind,
    packet_id: Option<u16>,
    started: Duration,
}

#[derive(Debug)]
enum ReadState {
    Header,
    Body(FixedHeader),
    PublishHeader(FixedHeader),
    Payload {
        publish: PublishPacket,
        offset: usize,
        total: usize,
    },
    Skip(usize),
}

#[derive(Debug)]
struct Reader {
    buf: BytesMut,
    scratch: Vec<u8>,
    state: ReadState,
}

#[derive(Debug, Default)]
struct Outbox {
    frames: VecDeque<Bytes>,
    /// Bytes of the front frame already handed to the transport.
    written: usize,
}

enum Inbound {
    Packet(ControlPacket),
    /// A PUBLISH whose payload has been fully delivered; payload left empty.
    Published(PublishPacket),
}

enum Event {
    ConnAck(ConnAckPacket),
    SubAck(SubAckPacket),
    UnsubAck(UnsubAckPacket),
    PingResp,
    /// The publish flow for this identifier is finished.
    Acked(u16),
    Other,
}

fn packet_properties(packet: &ControlPacket) -> Option<&PropertyList> {
    match packet {
        ControlPacket::Connect(p) => Some(&p.properties),
        ControlPacket::ConnAck(p) => Some(&p.properties),
        ControlPacket::Publish(p) => Some(&p.properties),
        ControlPacket::PubAck(p) => Some(&p.properties),
        ControlPacket::PubRec(p) => Some(&p.properties),
        ControlPacket::PubRel(p) => Some(&p.properties),
        ControlPacket::PubComp(p) => Some(&p.properties),
        ControlPacket::Subscribe(p) => Some(&p.properties),
        ControlPacket::SubAck(p) => Some(&p.properties),
        ControlPacket::Unsubscribe(p) => Some(&p.properties),
        ControlPacket::UnsubAck(p) => Some(&p.properties),
        ControlPacket::Disconnect(p) => Some(&p.properties),
        ControlPacket::PingReq(_) | ControlPacket::PingResp(_) => None,
    }
}

fn notify_properties<H: MessageHandler + ?Sized>(
    handler: &mut H,
    packet_type: PacketType,
    properties: &PropertyList,
) -> Result<()> {
    if properties.is_empty() {
        return Ok(());
    }

    handler
        .on_properties(packet_type, properties)
        .map_err(|e| ClientError::PropertyCallback(e.to_string()))
}

pub struct Session<N, C = SystemClock> {
    net: N,
    clock: C,
    mode: Mode,
    version: ProtocolVersion,
    cmd_timeout: Duration,
    tx_capacity: usize,
    rx_capacity: usize,
    requested: Limits,
    limits: Limits,
    client_id: String,
    keep_alive: KeepAlive,
    packet_ids: PacketIds,
    inbound_qos2: HashSet<u16>,
    /// Identifiers released when their operation timed out. A late
    /// acknowledgement for one of them is dropped.
    abandoned: HashSet<u16>,
    reassembler: MessageReassembler,
    outbox: Outbox,
    reader: Reader,
    op: Option<Operation>,
    wake_pending: bool,
}

impl<N: Network, C: Clock> Session<N, C> {
    pub fn new(net: N, clock: C, options: &ClientOptions) -> Self {
        let requested = Limits {
            max_packet_size: options.max_packet_size,
            max_qos: options.max_qos,
            retain_available: true,
            topic_alias_max: options.topic_alias_max,
            subscription_ids_available: true,
        };
        let keep_alive = KeepAlive::new(options.keep_alive, clock.now());

        Session {
            net,
            clock,
            mode: options.mode,
            version: options.protocol_version,
            cmd_timeout: options.cmd_timeout,
            tx_capacity: options.tx_buffer_size,
            rx_capacity: options.rx_buffer_size,
            limits: requested.clone(),
            requested,
            client_id: options.client_id.clone(),
            keep_alive,
            packet_ids: PacketIds::new(),
            inbound_qos2: HashSet::new(),
            abandoned: HashSet::new(),
            reassembler: MessageReassembler::new(),
            outbox: Outbox::default(),
            reader: Reader {
                buf: BytesMut::with_capacity(options.rx_buffer_size),
                scratch: vec![0; options.rx_buffer_size],
                state: ReadState::Header,
            },
            op: None,
            wake_pending: false,
        }
    }

    pub fn network(&self) -> &N {
        &self.net
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.net
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Client identifier in use, possibly assigned by the server.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive.interval()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// True when no operation is in progress.
    pub fn is_idle(&self) -> bool {
        self.op.is_none()
    }

    /// The connection has been quiet for a whole keep-alive interval.
    pub fn ping_due(&self) -> bool {
        self.keep_alive.is_due(self.clock.now())
    }

    /// Drops all per-connection state: queued output, partial input, the
    /// operation in progress and every outstanding packet identifier.
    pub fn reset(&mut self) {
        self.outbox = Outbox::default();
        self.reader.buf.clear();
        self.reader.state = ReadState::Header;
        self.op = None;
        self.packet_ids.clear();
        self.inbound_qos2.clear();
        self.abandoned.clear();
        self.reassembler.reset();
        self.wake_pending = false;
        self.limits = self.requested.clone();
        self.keep_alive.touch(self.clock.now());
    }

    /// Opens the transport.
    pub fn open(&mut self, host: &str, port: u16) -> Poll<Result<()>> {
        drive!(self, self.poll_open(host, port))
    }

    fn poll_open(&mut self, host: &str, port: u16) -> Poll<Result<()>> {
        match self.net.connect(host, port, self.cmd_timeout) {
            Ok(()) => {
                info!("Connected to {}:{}", host, port);
                self.reset();
                Poll::Ready(Ok(()))
            }
            Err(NetError::WouldBlock) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    /// Closes the transport and forgets the connection state.
    pub fn close(&mut self) -> Result<()> {
        let result = self.net.disconnect().map_err(ClientError::from);
        self.reset();
        result
    }

    /// Sends CONNECT and waits for CONNACK.
    pub fn connect<H>(
        &mut self,
        request: &ConnectRequest,
        handler: &mut H,
    ) -> Poll<Result<ConnectResult>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(self, self.poll_connect(request, handler))
    }

    /// Sends SUBSCRIBE and waits for the matching SUBACK.
    pub fn subscribe<H>(
        &mut self,
        request: &SubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<SubscribeResult>>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(self, self.poll_subscribe(request, handler))
    }

    /// Sends UNSUBSCRIBE and waits for UNSUBACK. MQTT 3.1.1 reports success
    /// for every filter since its UNSUBACK carries no reason codes.
    pub fn unsubscribe<H>(
        &mut self,
        request: &UnsubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<ReasonCode>>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(self, self.poll_unsubscribe(request, handler))
    }

    /// Sends PUBLISH and, for QoS 1 and 2, completes the acknowledgement
    /// flow. Returns the packet identifier used, if any.
    pub fn publish<H>(
        &mut self,
        request: &PublishRequest,
        handler: &mut H,
    ) -> Poll<Result<Option<u16>>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(self, self.poll_publish(request, handler))
    }

    /// Sends PINGREQ and waits for PINGRESP.
    pub fn ping<H>(&mut self, handler: &mut H) -> Poll<Result<()>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(
            self,
            self.poll_ping(handler).map_err(|e| match e {
                ClientError::Timeout => ClientError::PingTimeout,
                e => e,
            })
        )
    }

    /// Processes inbound packets until one has been fully handled.
    ///
    /// Fails with `ClientError::Timeout` when nothing arrives within the
    /// command timeout or a keep-alive ping falls due, and with
    /// `ClientError::Wake` when the transport reports a wake request.
    pub fn wait_message<H>(&mut self, handler: &mut H) -> Poll<Result<()>>
    where
        H: MessageHandler + ?Sized,
    {
        drive!(self, self.poll_wait(handler))
    }

    /// Sends DISCONNECT. The transport stays open until `close`.
    pub fn disconnect(&mut self, request: &DisconnectRequest) -> Poll<Result<()>> {
        drive!(self, self.poll_disconnect(request))
    }

    fn begin(&mut self, kind: OpKind) -> Result<bool> {
        match self.op {
            None => {
                self.op = Some(Operation {
                    kind,
                    packet_id: None,
                    started: self.clock.now(),
                });
                Ok(true)
            }
            Some(op) if op.kind == kind => Ok(false),
            Some(op) => {
                debug!("{:?} requested while {:?} is in progress", kind, op.kind);
                Err(ClientError::BadState)
            }
        }
    }

    /// Ends the operation once its step is ready or its time ran out.
    fn settle<T>(&mut self, poll: Poll<Result<T>>) -> Poll<Result<T>> {
        let result = match poll {
            Poll::Ready(result) => result,
            Poll::Pending if self.op_expired() => Err(ClientError::Timeout),
            Poll::Pending => return Poll::Pending,
        };

        if let Some(op) = self.op.take() {
            if let (Err(e), Some(id)) = (&result, op.packet_id) {
                debug!("{:?} failed: {}, releasing packet id {}", op.kind, e, id);
                self.packet_ids.release(id);

                if matches!(e, ClientError::Timeout) {
                    self.abandoned.insert(id);
                }
            }
        }

        Poll::Ready(result)
    }

    fn op_expired(&self) -> bool {
        let op = match self.op {
            Some(op) => op,
            None => return false,
        };
        let now = self.clock.now();

        now.saturating_sub(op.started) >= self.cmd_timeout
            || (op.kind == OpKind::WaitMessage && self.keep_alive.is_due(now))
    }

    fn op_packet_id(&self) -> u16 {
        self.op.and_then(|op| op.packet_id).unwrap_or_default()
    }

    fn acquire(&mut self, awaited: AwaitedAck) -> Result<u16> {
        let id = self.packet_ids.acquire(awaited)?;
        self.abandoned.remove(&id);

        if let Some(op) = self.op.as_mut() {
            op.packet_id = Some(id);
        }

        Ok(id)
    }

    fn receive_timeout(&self) -> Duration {
        let now = self.clock.now();
        let elapsed = self
            .op
            .map_or(Duration::ZERO, |op| now.saturating_sub(op.started));
        let timeout = self.cmd_timeout.saturating_sub(elapsed);

        match (self.op, self.keep_alive.remaining(now)) {
            (Some(op), Some(left)) if op.kind == OpKind::WaitMessage => cmp::min(timeout, left),
            _ => timeout,
        }
    }

    fn enqueue(&mut self, packet: &ControlPacket) -> Result<()> {
        let size = packet.encoded_size();

        if size > self.tx_capacity || size > self.limits.max_packet_size as usize {
            warn!(
                "{} of {} bytes exceeds the transmit limits",
                packet.packet_type(),
                size
            );
            return Err(ClientError::OutOfBuffer);
        }

        let mut buffer = BytesMut::with_capacity(size);
        packet.encode(&mut buffer);
        trace!("Queued {} ({} bytes)", packet.packet_type(), size);
        self.outbox.frames.push_back(buffer.freeze());

        Ok(())
    }

    /// Queues the PUBLISH header; the payload follows as its own frame
    /// without being copied.
    fn enqueue_publish(&mut self, publish: &PublishPacket) -> Result<()> {
        let header_size = publish.header_size();

        if header_size > self.tx_capacity
            || publish.encoded_size() > self.limits.max_packet_size as usize
        {
            warn!(
                "PUBLISH to {} of {} bytes exceeds the transmit limits",
                publish.topic,
                publish.encoded_size()
            );
            return Err(ClientError::OutOfBuffer);
        }

        let mut header = BytesMut::with_capacity(header_size);
        publish.encode_header(&mut header);
        self.outbox.frames.push_back(header.freeze());

        if !publish.payload.is_empty() {
            self.outbox.frames.push_back(publish.payload.clone());
        }

        Ok(())
    }

    fn poll_flush(&mut self) -> Poll<Result<()>> {
        while let Some(frame) = self.outbox.frames.front() {
            let pending = &frame[self.outbox.written..];

            match self.net.send(pending, self.cmd_timeout) {
                Ok(0) => return Poll::Ready(Err(ClientError::Closed)),
                Ok(n) => {
                    self.keep_alive.touch(self.clock.now());
                    self.outbox.written += n;

                    if self.outbox.written >= frame.len() {
                        self.outbox.frames.pop_front();
                        self.outbox.written = 0;
                    }
                }
                Err(NetError::WouldBlock) | Err(NetError::Timeout) => return Poll::Pending,
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }

        Poll::Ready(Ok(()))
    }

    fn poll_receive(&mut self) -> Poll<Result<()>> {
        let room = self.rx_capacity.saturating_sub(self.reader.buf.len());
        if room == 0 {
            return Poll::Ready(Err(ClientError::OutOfBuffer));
        }

        let timeout = self.receive_timeout();
        match self.net.receive(&mut self.reader.scratch[..room], timeout) {
            Ok(0) => Poll::Ready(Err(ClientError::Closed)),
            Ok(n) => {
                trace!("Received {} bytes", n);
                self.reader
                    .buf
                    .extend_from_slice(&self.reader.scratch[..n]);
                self.keep_alive.touch(self.clock.now());
                Poll::Ready(Ok(()))
            }
            Err(NetError::WouldBlock) | Err(NetError::Timeout) => Poll::Pending,
            Err(NetError::Wake) => match self.op {
                Some(op) if op.kind == OpKind::WaitMessage => Poll::Ready(Err(ClientError::Wake)),
                _ => {
                    self.wake_pending = true;
                    Poll::Pending
                }
            },
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    /// Parses as far as the buffered bytes allow. Payload fragments go to
    /// the handler as they appear; a packet is returned once complete.
    fn advance_reader<H>(&mut self, handler: &mut H) -> Result<Option<Inbound>>
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            match mem::replace(&mut self.reader.state, ReadState::Header) {
                ReadState::Header => {
                    let mut peek = &self.reader.buf[..];
                    let header = match FixedHeader::decode(&mut peek) {
                        Ok(header) => header,
                        Err(PacketError::PacketIncomplete) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    };
                    let consumed = self.reader.buf.len() - peek.len();
                    self.reader.buf.advance(consumed);

                    let remaining = header.remaining_length as usize;
                    if header.packet_type == PacketType::Publish {
                        self.reader.state = ReadState::PublishHeader(header);
                    } else if remaining > self.rx_capacity {
                        warn!("{} of {} bytes does not fit", header.packet_type, remaining);
                        self.reader.state = ReadState::Skip(remaining);
                        return Err(ClientError::OutOfBuffer);
                    } else {
                        self.reader.state = ReadState::Body(header);
                    }
                }
                ReadState::Body(header) => {
                    let len = header.remaining_length as usize;
                    if self.reader.buf.len() < len {
                        self.reader.state = ReadState::Body(header);
                        return Ok(None);
                    }

                    let body = self.reader.buf.split_to(len).freeze();
                    let packet = ControlPacket::decode_body(&header, body, self.version)?;
                    if let Some(properties) = packet_properties(&packet) {
                        notify_properties(handler, header.packet_type, properties)?;
                    }

                    return Ok(Some(Inbound::Packet(packet)));
                }
                ReadState::PublishHeader(header) => {
                    let remaining = header.remaining_length as usize;
                    let available = self.reader.buf.len();

                    let len = match PublishPacket::variable_header_len(
                        &header,
                        &self.reader.buf,
                        self.version,
                    )? {
                        Some(len) if len > self.rx_capacity => {
                            self.reader.state = ReadState::Skip(remaining);
                            return Err(ClientError::OutOfBuffer);
                        }
                        Some(len) if len <= available => len,
                        None if available >= self.rx_capacity => {
                            warn!("PUBLISH header does not fit the receive buffer");
                            self.reader.state = ReadState::Skip(remaining);
                            return Err(ClientError::OutOfBuffer);
                        }
                        _ => {
                            self.reader.state = ReadState::PublishHeader(header);
                            return Ok(None);
                        }
                    };

                    let mut variable_header = self.reader.buf.split_to(len).freeze();
                    let publish = PublishPacket::decode_variable_header(
                        &header,
                        &mut variable_header,
                        self.version,
                    )?;
                    let total = remaining - len;

                    if let Err(e) =
                        notify_properties(handler, PacketType::Publish, &publish.properties)
                    {
                        self.reader.state = ReadState::Skip(total);
                        return Err(e);
                    }

                    let duplicate = publish.qos == QoS::ExactlyOnce
                        && publish
                            .packet_id
                            .map_or(false, |id| self.inbound_qos2.contains(&id));
                    if duplicate {
                        debug!("Dropping redelivered QoS 2 message {:?}", publish.packet_id);
                        self.reader.state = ReadState::Skip(total);
                        return Ok(Some(Inbound::Published(publish)));
                    }

                    trace!("PUBLISH to {} carrying {} bytes", publish.topic, total);
                    self.reader.state = ReadState::Payload {
                        publish,
                        offset: 0,
                        total,
                    };
                }
                ReadState::Payload {
                    publish,
                    offset,
                    total,
                } => {
                    let n = cmp::min(self.reader.buf.len(), total - offset);
                    if n == 0 && total != 0 {
                        self.reader.state = ReadState::Payload {
                            publish,
                            offset,
                            total,
                        };
                        return Ok(None);
                    }

                    let chunk = self.reader.buf.split_to(n);
                    let delivered =
                        self.reassembler
                            .deliver(&publish, offset, &chunk, total, handler);

                    match delivered {
                        Ok(true) => return Ok(Some(Inbound::Published(publish))),
                        Ok(false) => {
                            self.reader.state = ReadState::Payload {
                                publish,
                                offset: offset + n,
                                total,
                            };
                        }
                        Err(e) => {
                            self.reader.state = ReadState::Skip(total - offset - n);
                            return Err(e);
                        }
                    }
                }
                ReadState::Skip(left) => {
                    let n = cmp::min(self.reader.buf.len(), left);
                    self.reader.buf.advance(n);

                    if n < left {
                        self.reader.state = ReadState::Skip(left - n);
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn poll_inbound<H>(&mut self, handler: &mut H) -> Poll<Result<Inbound>>
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            if let Some(inbound) = self.advance_reader(handler)? {
                return Poll::Ready(Ok(inbound));
            }

            ready!(self.poll_receive())?;
        }
    }

    /// Answers an inbound PUBLISH according to its QoS.
    fn acknowledge(&mut self, publish: &PublishPacket) -> Result<()> {
        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(id)) => {
                self.enqueue(&ControlPacket::PubAck(PubAckPacket::new(self.version, id)))
            }
            (QoS::ExactlyOnce, Some(id)) => {
                self.inbound_qos2.insert(id);
                self.enqueue(&ControlPacket::PubRec(PubRecPacket::new(self.version, id)))
            }
            _ => Ok(()),
        }
    }

    fn process(&mut self, inbound: Inbound) -> Result<Event> {
        let packet = match inbound {
            Inbound::Published(publish) => {
                self.acknowledge(&publish)?;
                return Ok(Event::Other);
            }
            Inbound::Packet(packet) => packet,
        };

        debug!("Received {}", packet.packet_type());

        let acked = match &packet {
            ControlPacket::SubAck(ack) => Some(ack.packet_id),
            ControlPacket::UnsubAck(ack) => Some(ack.packet_id),
            ControlPacket::PubAck(ack) => Some(ack.packet_id),
            ControlPacket::PubRec(ack) => Some(ack.packet_id),
            ControlPacket::PubComp(ack) => Some(ack.packet_id),
            _ => None,
        };
        if let Some(id) = acked.filter(|id| self.abandoned.remove(id)) {
            debug!("Dropping late {} for packet id {}", packet.packet_type(), id);
            return Ok(Event::Other);
        }

        match packet {
            ControlPacket::ConnAck(ack) => Ok(Event::ConnAck(ack)),
            ControlPacket::SubAck(ack) => {
                self.packet_ids.complete(ack.packet_id, AwaitedAck::SubAck)?;
                Ok(Event::SubAck(ack))
            }
            ControlPacket::UnsubAck(ack) => {
                self.packet_ids
                    .complete(ack.packet_id, AwaitedAck::UnsubAck)?;
                Ok(Event::UnsubAck(ack))
            }
            ControlPacket::PubAck(ack) => {
                self.packet_ids.complete(ack.packet_id, AwaitedAck::PubAck)?;
                if ack.reason_code.is_error() {
                    warn!("PUBLISH {} rejected: {}", ack.packet_id, ack.reason_code);
                }
                Ok(Event::Acked(ack.packet_id))
            }
            ControlPacket::PubRec(rec) => {
                if rec.reason_code.is_error() {
                    self.packet_ids.complete(rec.packet_id, AwaitedAck::PubRec)?;
                    warn!("PUBLISH {} rejected: {}", rec.packet_id, rec.reason_code);
                    return Ok(Event::Acked(rec.packet_id));
                }

                self.packet_ids.advance(rec.packet_id)?;
                self.enqueue(&ControlPacket::PubRel(PubRelPacket::new(
                    self.version,
                    rec.packet_id,
                )))?;
                Ok(Event::Other)
            }
            ControlPacket::PubComp(comp) => {
                self.packet_ids
                    .complete(comp.packet_id, AwaitedAck::PubComp)?;
                Ok(Event::Acked(comp.packet_id))
            }
            ControlPacket::PubRel(rel) => {
                let mut comp = PubCompPacket::new(self.version, rel.packet_id);
                if !self.inbound_qos2.remove(&rel.packet_id) {
                    comp.reason_code = ReasonCode::PacketIdentifierNotFound;
                }
                self.enqueue(&ControlPacket::PubComp(comp))?;
                Ok(Event::Other)
            }
            ControlPacket::PingResp(_) => Ok(Event::PingResp),
            ControlPacket::Disconnect(disconnect) => {
                warn!("Server disconnected: {}", disconnect.reason_code);
                Err(ClientError::ServerDisconnect(disconnect.reason_code))
            }
            other => Err(ClientError::UnexpectedPacket(other.packet_type())),
        }
    }

    /// Flushes pending output, then handles one inbound packet.
    fn poll_event<H>(&mut self, handler: &mut H) -> Poll<Result<Event>>
    where
        H: MessageHandler + ?Sized,
    {
        ready!(self.poll_flush())?;
        let inbound = ready!(self.poll_inbound(handler))?;
        let event = self.process(inbound)?;

        // Acknowledgements just queued leave now if the transport allows.
        if let Poll::Ready(Err(e)) = self.poll_flush() {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(event))
    }

    fn poll_connect<H>(&mut self, request: &ConnectRequest, handler: &mut H) -> Poll<Result<ConnectResult>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::Connect) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.connect_step(fresh, request, handler);
        self.settle(poll)
    }

    fn connect_step<H>(
        &mut self,
        fresh: bool,
        request: &ConnectRequest,
        handler: &mut H,
    ) -> Poll<Result<ConnectResult>>
    where
        H: MessageHandler + ?Sized,
    {
        if fresh {
            let packet = self.connect_packet(request)?;
            self.enqueue(&ControlPacket::Connect(packet))?;
            self.client_id = request.client_id.clone();
            self.keep_alive.set_interval(request.keep_alive);
            info!(
                "Sending CONNECT ({}) as {:?}, keep alive {}s",
                self.version, request.client_id, request.keep_alive
            );
        }

        loop {
            if let Event::ConnAck(ack) = ready!(self.poll_event(handler))? {
                return Poll::Ready(self.apply_connack(ack));
            }
        }
    }

    fn connect_packet(&self, request: &ConnectRequest) -> Result<ConnectPacket> {
        check_field_length(request.client_id.len())?;
        if let Some(username) = &request.username {
            check_field_length(username.len())?;
        }
        if let Some(password) = &request.password {
            check_field_length(password.len())?;
        }
        if let Some(will) = &request.will {
            topic::validate_topic_name(&will.topic)
                .map_err(|_| ClientError::BadArgument(format!("will topic {:?}", will.topic)))?;
            check_field_length(will.payload.len())?;
        }

        let mut packet =
            ConnectPacket::new(self.version, request.client_id.clone(), request.keep_alive);
        packet.clean_start = request.clean_session;
        packet.user_name = request.username.clone();
        packet.password = request.password.clone();
        packet.properties = request.properties.clone();
        packet.will = request.will.as_ref().map(|will| LastWill {
            qos: will.qos,
            retain: will.retain,
            topic: will.topic.clone(),
            payload: will.payload.clone(),
            properties: will.properties.clone(),
        });

        Ok(packet)
    }

    /// Applies CONNACK properties, each clamped in the direction MQTT 5.0
    /// prescribes for it.
    fn apply_connack(&mut self, ack: ConnAckPacket) -> Result<ConnectResult> {
        if ack.reason_code != ReasonCode::Success {
            warn!("Connection refused: {}", ack.reason_code);
            return Err(ClientError::ConnectionRefused(ack.reason_code));
        }

        let mut limits = self.requested.clone();

        for property in ack.properties.iter() {
            let kind = property.kind();
            let value = property.value();

            match kind {
                PropertyType::AssignedClientIdentifier => {
                    if let Some(id) = value.as_str() {
                        self.client_id = id.to_string();
                    }
                }
                PropertyType::ServerKeepAlive => {
                    if let Some(seconds) = value.as_u32() {
                        debug!("Server keep alive {}s", seconds);
                        self.keep_alive.set_interval(seconds as u16);
                    }
                }
                PropertyType::MaximumPacketSize => match value.as_u32() {
                    Some(n) if n > 0 => limits.max_packet_size = cmp::min(limits.max_packet_size, n),
                    _ => return Err(ClientError::ServerProperty(kind)),
                },
                PropertyType::MaximumQoS => {
                    let server = match value.as_u32() {
                        Some(0) => QoS::AtMostOnce,
                        Some(1) => QoS::AtLeastOnce,
                        _ => return Err(ClientError::ServerProperty(kind)),
                    };
                    limits.max_qos = cmp::min(limits.max_qos, server);
                }
                PropertyType::RetainAvailable => match value.as_u32() {
                    Some(0) => limits.retain_available = false,
                    Some(1) => {}
                    _ => return Err(ClientError::ServerProperty(kind)),
                },
                PropertyType::TopicAliasMaximum => {
                    if let Some(n) = value.as_u32() {
                        limits.topic_alias_max = cmp::min(limits.topic_alias_max, n as u16);
                    }
                }
                PropertyType::SubscriptionIdentifierAvailable => {
                    limits.subscription_ids_available = value.as_u32() != Some(0);
                }
                _ => trace!("CONNACK property {:?} = {:?}", kind, value),
            }
        }

        self.limits = limits;
        info!(
            "Connected as {:?}, session present: {}",
            self.client_id, ack.session_present
        );

        Ok(ConnectResult {
            session_present: ack.session_present,
            reason_code: ack.reason_code,
            properties: ack.properties,
        })
    }

    fn poll_subscribe<H>(
        &mut self,
        request: &SubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<SubscribeResult>>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::Subscribe) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.subscribe_step(fresh, request, handler);
        self.settle(poll)
    }

    fn subscribe_step<H>(
        &mut self,
        fresh: bool,
        request: &SubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<SubscribeResult>>>
    where
        H: MessageHandler + ?Sized,
    {
        if fresh {
            if request.topics.is_empty() {
                return Poll::Ready(Err(ClientError::BadArgument("no topics".into())));
            }

            let mut subscriptions = Vec::with_capacity(request.topics.len());
            for t in &request.topics {
                topic::validate_topic_filter(&t.filter).map_err(|_| {
                    ClientError::BadArgument(format!("topic filter {:?}", t.filter))
                })?;

                let qos = cmp::min(t.qos, self.limits.max_qos);
                if qos != t.qos {
                    debug!("Subscribing to {} at {:?} instead of {:?}", t.filter, qos, t.qos);
                }
                subscriptions.push(Subscription::new(t.filter.clone(), qos));
            }

            let mut properties = PropertyList::new();
            for property in request.properties.iter() {
                if property.kind() == PropertyType::SubscriptionIdentifier
                    && !self.limits.subscription_ids_available
                {
                    debug!("Server lacks subscription identifiers, dropping one");
                    continue;
                }
                properties.push(property.kind(), property.value().clone())?;
            }

            let id = self.acquire(AwaitedAck::SubAck)?;
            let mut packet = SubscribePacket::new(self.version, id, subscriptions);
            packet.properties = properties;
            self.enqueue(&ControlPacket::Subscribe(packet))?;
        }

        let id = self.op_packet_id();
        loop {
            match ready!(self.poll_event(handler))? {
                Event::SubAck(ack) if ack.packet_id == id => {
                    return Poll::Ready(Self::subscribe_results(request, ack));
                }
                _ => {}
            }
        }
    }

    fn subscribe_results(
        request: &SubscribeRequest,
        ack: SubAckPacket,
    ) -> Result<Vec<SubscribeResult>> {
        if ack.reason_codes.len() != request.topics.len() {
            warn!(
                "SUBACK has {} codes for {} topics",
                ack.reason_codes.len(),
                request.topics.len()
            );
            return Err(ReasonCode::ProtocolError.into());
        }

        let results = request
            .topics
            .iter()
            .zip(ack.reason_codes)
            .map(|(t, reason_code)| {
                let qos = suback::granted_qos(reason_code);
                match qos {
                    Some(qos) => info!("Subscribed to {} with {:?}", t.filter, qos),
                    None => warn!("Subscription to {} refused: {}", t.filter, reason_code),
                }
                SubscribeResult {
                    filter: t.filter.clone(),
                    reason_code,
                    qos,
                }
            })
            .collect();

        Ok(results)
    }

    fn poll_unsubscribe<H>(
        &mut self,
        request: &UnsubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<ReasonCode>>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::Unsubscribe) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.unsubscribe_step(fresh, request, handler);
        self.settle(poll)
    }

    fn unsubscribe_step<H>(
        &mut self,
        fresh: bool,
        request: &UnsubscribeRequest,
        handler: &mut H,
    ) -> Poll<Result<Vec<ReasonCode>>>
    where
        H: MessageHandler + ?Sized,
    {
        if fresh {
            if request.filters.is_empty() {
                return Poll::Ready(Err(ClientError::BadArgument("no topics".into())));
            }

            for filter in &request.filters {
                topic::validate_topic_filter(filter).map_err(|_| {
                    ClientError::BadArgument(format!("topic filter {:?}", filter))
                })?;
            }

            let id = self.acquire(AwaitedAck::UnsubAck)?;
            let mut packet = UnsubscribePacket::new(self.version, id, request.filters.clone());
            packet.properties = request.properties.clone();
            self.enqueue(&ControlPacket::Unsubscribe(packet))?;
        }

        let id = self.op_packet_id();
        loop {
            match ready!(self.poll_event(handler))? {
                Event::UnsubAck(ack) if ack.packet_id == id => {
                    if !self.version.supports_properties() {
                        return Poll::Ready(Ok(vec![ReasonCode::Success; request.filters.len()]));
                    }
                    if ack.reason_codes.len() != request.filters.len() {
                        return Poll::Ready(Err(ReasonCode::ProtocolError.into()));
                    }
                    return Poll::Ready(Ok(ack.reason_codes));
                }
                _ => {}
            }
        }
    }

    fn validate_publish(&self, request: &PublishRequest) -> Result<()> {
        if request.qos > self.limits.max_qos {
            return Err(ClientError::BadArgument(format!(
                "{:?} above the maximum {:?}",
                request.qos, self.limits.max_qos
            )));
        }

        if request.retain && !self.limits.retain_available {
            return Err(ClientError::BadArgument("retain is not available".into()));
        }

        let aliased = request.topic.is_empty()
            && self.version.supports_properties()
            && request.properties.contains(PropertyType::TopicAlias);
        if !aliased {
            topic::validate_topic_name(&request.topic)
                .map_err(|_| ClientError::BadArgument(format!("topic {:?}", request.topic)))?;
        }

        Ok(())
    }

    fn poll_publish<H>(&mut self, request: &PublishRequest, handler: &mut H) -> Poll<Result<Option<u16>>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::Publish) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.publish_step(fresh, request, handler);
        self.settle(poll)
    }

    fn publish_step<H>(
        &mut self,
        fresh: bool,
        request: &PublishRequest,
        handler: &mut H,
    ) -> Poll<Result<Option<u16>>>
    where
        H: MessageHandler + ?Sized,
    {
        if fresh {
            self.validate_publish(request)?;

            let packet_id = match request.qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => Some(self.acquire(AwaitedAck::PubAck)?),
                QoS::ExactlyOnce => Some(self.acquire(AwaitedAck::PubRec)?),
            };

            let mut packet = PublishPacket::new(
                self.version,
                request.topic.clone(),
                request.qos,
                packet_id,
                request.payload.clone(),
            );
            packet.retain = request.retain;
            packet.properties = request.properties.clone();
            self.enqueue_publish(&packet)?;
            debug!(
                "Publishing {} bytes to {} at {:?}",
                request.payload.len(),
                request.topic,
                request.qos
            );
        }

        if request.qos == QoS::AtMostOnce {
            ready!(self.poll_flush())?;
            return Poll::Ready(Ok(None));
        }

        let id = self.op_packet_id();
        loop {
            match ready!(self.poll_event(handler))? {
                Event::Acked(acked) if acked == id => return Poll::Ready(Ok(Some(id))),
                _ => {}
            }
        }
    }

    fn poll_ping<H>(&mut self, handler: &mut H) -> Poll<Result<()>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::Ping) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.ping_step(fresh, handler);
        self.settle(poll)
    }

    fn ping_step<H>(&mut self, fresh: bool, handler: &mut H) -> Poll<Result<()>>
    where
        H: MessageHandler + ?Sized,
    {
        if fresh {
            debug!(
                "Idle for {:?}, sending PINGREQ",
                self.keep_alive.idle(self.clock.now())
            );
            self.enqueue(&ControlPacket::PingReq(PingReqPacket))?;
        }

        loop {
            if let Event::PingResp = ready!(self.poll_event(handler))? {
                return Poll::Ready(Ok(()));
            }
        }
    }

    fn poll_wait<H>(&mut self, handler: &mut H) -> Poll<Result<()>>
    where
        H: MessageHandler + ?Sized,
    {
        let fresh = match self.begin(OpKind::WaitMessage) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };

        let poll = if fresh && mem::take(&mut self.wake_pending) {
            Poll::Ready(Err(ClientError::Wake))
        } else {
            self.poll_event(handler).map_ok(|_| ())
        };

        self.settle(poll)
    }

    fn poll_disconnect(&mut self, request: &DisconnectRequest) -> Poll<Result<()>> {
        let fresh = match self.begin(OpKind::Disconnect) {
            Ok(fresh) => fresh,
            Err(e) => return Poll::Ready(Err(e)),
        };
        let poll = self.disconnect_step(fresh, request);
        self.settle(poll)
    }

    fn disconnect_step(&mut self, fresh: bool, request: &DisconnectRequest) -> Poll<Result<()>> {
        if fresh {
            let mut packet = DisconnectPacket::new(self.version);
            packet.reason_code = request.reason_code;
            packet.properties = request.properties.clone();
            self.enqueue(&ControlPacket::Disconnect(packet))?;
        }

        ready!(self.poll_flush())?;
        info!("Sent DISCONNECT");

        Poll::Ready(Ok(()))
    }
}
