//! Connection lifecycle for a long running subscriber.
//!
//! The machine walks through validation, transport setup, CONNECT and the
//! initial SUBSCRIBE, then alternates between waiting for messages,
//! sending queued publishes and keep-alive pings until it is asked to stop.
//! Any failure after the transport is up goes through `NetDisconnect` so
//! the socket is always released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Poll};

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ClientError, Result};
use crate::message::MessageHandler;
use crate::network::Network;
use crate::options::{ClientOptions, Mode};
use crate::request::{
    ConnectRequest, DisconnectRequest, PublishRequest, SubscribeRequest, UnsubscribeRequest,
};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Begin,
    NetInit,
    Init,
    TcpConnect,
    MqttConnect,
    Subscribe,
    WaitMessage,
    Publish,
    Ping,
    Unsubscribe,
    Disconnect,
    NetDisconnect,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct Machine<N, H, C = SystemClock> {
    options: ClientOptions,
    session: Session<N, C>,
    handler: H,
    state: State,
    connect: ConnectRequest,
    subscribe: SubscribeRequest,
    unsubscribe: UnsubscribeRequest,
    disconnect: DisconnectRequest,
    outgoing: VecDeque<PublishRequest>,
    stop: Arc<AtomicBool>,
    error: Option<ClientError>,
}

impl<N: Network, H: MessageHandler, C: Clock> Machine<N, H, C> {
    pub fn new(options: ClientOptions, network: N, clock: C, handler: H) -> Self {
        let session = Session::new(network, clock, &options);
        let unsubscribe = UnsubscribeRequest::from(options.topics());

        Machine {
            connect: ConnectRequest::default(),
            subscribe: SubscribeRequest::default(),
            unsubscribe,
            disconnect: DisconnectRequest::end_session(),
            options,
            session,
            handler,
            state: State::Begin,
            outgoing: VecDeque::new(),
            stop: Arc::new(AtomicBool::new(false)),
            error: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn session(&self) -> &Session<N, C> {
        &self.session
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Flag that, once raised, makes the machine unsubscribe (when
    /// configured to) and disconnect at its next idle point.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Queues a message to be published from the wait loop.
    pub fn publish(&mut self, request: PublishRequest) {
        self.outgoing.push_back(request);
    }

    /// Advances the machine.
    ///
    /// In blocking mode this returns once `Done` is reached. In
    /// non-blocking mode it returns `Poll::Pending` whenever the transport
    /// would block. `ClientError::Wake` is not terminal: the caller handles
    /// the wake request and calls `run` again.
    pub fn run(&mut self) -> Poll<Result<()>> {
        loop {
            match self.step() {
                Poll::Ready(Ok(())) if self.state == State::Done => {
                    return Poll::Ready(self.error.take().map_or(Ok(()), Err));
                }
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(ClientError::Wake)) => return Poll::Ready(Err(ClientError::Wake)),
                Poll::Ready(Err(e)) => self.fail(e),
                Poll::Pending if self.options.mode == Mode::NonBlocking => return Poll::Pending,
                Poll::Pending => {}
            }
        }
    }

    fn transition(&mut self, next: State) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, e: ClientError) {
        error!("{} failed: {} ({})", self.state, e, e.code());

        let next = match self.state {
            State::Begin | State::NetInit | State::Init | State::TcpConnect => State::Done,
            State::NetDisconnect | State::Done => State::Done,
            // The broker answered, so no connection was lost.
            _ if matches!(e, ClientError::ConnectionRefused(_)) => State::NetDisconnect,
            _ => {
                if e.is_network() {
                    self.handler.on_disconnect(&e);
                }
                State::NetDisconnect
            }
        };

        if self.error.is_none() {
            self.error = Some(e);
        }
        self.transition(next);
    }

    fn step(&mut self) -> Poll<Result<()>> {
        match self.state {
            State::Begin => self.transition(State::NetInit),
            State::NetInit => {
                self.options.validate()?;
                self.connect = ConnectRequest::try_from(&self.options)?;
                self.subscribe = SubscribeRequest::try_from(&self.options)?;
                self.transition(State::Init);
            }
            State::Init => {
                self.session.reset();
                self.transition(State::TcpConnect);
            }
            State::TcpConnect => {
                ready!(self.session.open(self.options.host(), self.options.port()))?;
                self.transition(State::MqttConnect);
            }
            State::MqttConnect => {
                let result = ready!(self.session.connect(&self.connect, &mut self.handler))?;
                if result.session_present {
                    info!("Resuming the previous session");
                }

                if self.subscribe.topics.is_empty() {
                    self.transition(State::WaitMessage);
                } else {
                    self.transition(State::Subscribe);
                }
            }
            State::Subscribe => {
                ready!(self.session.subscribe(&self.subscribe, &mut self.handler))?;
                self.transition(State::WaitMessage);
            }
            State::WaitMessage => return self.wait(),
            State::Publish => return self.publish_next(),
            State::Ping => {
                ready!(self.session.ping(&mut self.handler))?;
                self.transition(State::WaitMessage);
            }
            State::Unsubscribe => {
                ready!(self.session.unsubscribe(&self.unsubscribe, &mut self.handler))?;
                self.transition(State::Disconnect);
            }
            State::Disconnect => {
                ready!(self.session.disconnect(&self.disconnect))?;
                self.transition(State::NetDisconnect);
            }
            State::NetDisconnect => {
                if let Err(e) = self.session.close() {
                    debug!("Closing the transport: {}", e);
                }
                self.transition(State::Done);
            }
            State::Done => {}
        }

        Poll::Ready(Ok(()))
    }

    fn wait(&mut self) -> Poll<Result<()>> {
        // Only switch operations between messages.
        if self.session.is_idle() {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stopping");
                let unsubscribe =
                    self.options.unsubscribe_on_exit && !self.unsubscribe.filters.is_empty();
                self.transition(if unsubscribe {
                    State::Unsubscribe
                } else {
                    State::Disconnect
                });
                return Poll::Ready(Ok(()));
            }

            if !self.outgoing.is_empty() {
                self.transition(State::Publish);
                return Poll::Ready(Ok(()));
            }

            if self.session.ping_due() {
                self.transition(State::Ping);
                return Poll::Ready(Ok(()));
            }
        }

        match ready!(self.session.wait_message(&mut self.handler)) {
            Ok(()) => {}
            Err(ClientError::Timeout) => {
                if self.session.ping_due() {
                    self.transition(State::Ping);
                }
            }
            Err(e) => return Poll::Ready(Err(e)),
        }

        Poll::Ready(Ok(()))
    }

    fn publish_next(&mut self) -> Poll<Result<()>> {
        let result = match self.outgoing.front() {
            Some(request) => ready!(self.session.publish(request, &mut self.handler)),
            None => Ok(None),
        };

        self.outgoing.pop_front();
        self.transition(State::WaitMessage);

        match result {
            Ok(_) => Poll::Ready(Ok(())),
            Err(e @ ClientError::BadArgument(_)) | Err(e @ ClientError::OutOfBuffer) => {
                warn!("Dropping message: {}", e);
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hermes_core::{protocol::ProtocolVersion, qos::QoS, reason::ReasonCode};

    use super::*;
    use crate::clock::ManualClock;
    use crate::return_code::ReturnCode;
    use crate::testing::{self, Recorder, ScriptedNetwork};

    fn subscriber_script(network: &mut ScriptedNetwork) {
        network.push(&[0x20, 0x02, 0x00, 0x00]);
        network.push(&[0x90, 0x03, 0x00, 0x01, 0x01]);
        network.push(&[
            0x32, 0x0c, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x05, b'h', b'e', b'l',
        ]);
        network.push(b"lo");
        network.push(&[0xb0, 0x02, 0x00, 0x02]);
    }

    fn subscriber_bytes() -> Vec<u8> {
        let mut expected = vec![
            0x10, 0x11, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x05,
            b't', b'e', b's', b't', b'1',
        ];
        expected.extend_from_slice(&[0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x01]);
        expected.extend_from_slice(&[0x40, 0x02, 0x00, 0x05]);
        expected.extend_from_slice(&[0xa2, 0x07, 0x00, 0x02, 0x00, 0x03, b'a', b'/', b'b']);
        expected.extend_from_slice(&[0xe0, 0x00]);
        expected
    }

    fn subscriber(mode: Mode) -> Machine<ScriptedNetwork, Recorder, ManualClock> {
        let clock = ManualClock::new();
        let options = testing::options(ProtocolVersion::V3_1_1)
            .subscribe("a/b", QoS::AtLeastOnce)
            .unsubscribe_on_exit(true)
            .mode(mode);

        let mut network = ScriptedNetwork::with_clock(clock.clone());
        network.would_block = mode == Mode::NonBlocking;
        subscriber_script(&mut network);

        let mut machine = Machine::new(options, network, clock, Recorder::default());
        let stop = machine.stop_handle();
        machine.handler_mut().stop = Some(stop);
        machine
    }

    #[test]
    fn test_subscriber_lifecycle() -> Result<()> {
        let mut machine = subscriber(Mode::Blocking);

        match machine.run() {
            Poll::Ready(result) => result?,
            Poll::Pending => panic!("blocking run returned pending"),
        }

        assert!(machine.is_done());
        assert_eq!(machine.session().network().sent, subscriber_bytes());
        assert!(!machine.session().network().connected);
        assert_eq!(machine.handler().payload(), b"hello".to_vec());
        assert_eq!(machine.handler().fragments.len(), 2);

        Ok(())
    }

    #[test]
    fn test_non_blocking_matches_blocking() -> Result<()> {
        let mut machine = subscriber(Mode::NonBlocking);

        let mut pending = 0;
        let result = loop {
            match machine.run() {
                Poll::Ready(result) => break result,
                Poll::Pending => pending += 1,
            }
            assert!(pending < 1000, "machine made no progress");
        };

        result?;
        assert!(pending > 0);
        assert_eq!(machine.session().network().sent, subscriber_bytes());
        assert_eq!(machine.handler().payload(), b"hello".to_vec());

        Ok(())
    }

    #[test]
    fn test_queued_publish_then_missing_ping_response() {
        let clock = ManualClock::new();
        let options = testing::options(ProtocolVersion::V3_1_1);
        let mut network = ScriptedNetwork::with_clock(clock.clone());
        network.push(&[0x20, 0x02, 0x00, 0x00]);
        network.push(&[0x40, 0x02, 0x00, 0x01]);

        let mut machine = Machine::new(options, network, clock.clone(), Recorder::default());
        machine.publish(PublishRequest::new("t", "x", QoS::AtLeastOnce));
        machine.publish(PublishRequest::new("bad/#", "x", QoS::AtMostOnce));

        let result = match machine.run() {
            Poll::Ready(result) => result,
            Poll::Pending => panic!("blocking run returned pending"),
        };

        match result {
            Err(e) => assert_eq!(e.code(), ReturnCode::Network),
            Ok(()) => panic!("unanswered ping was ignored"),
        }
        assert_eq!(clock.now(), Duration::from_secs(65));
        assert_eq!(machine.handler().disconnects.len(), 1);

        let sent = &machine.session().network().sent;
        assert!(sent.ends_with(&[0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x01, b'x', 0xc0, 0x00]));
        assert!(!machine.session().network().connected);
    }

    #[test]
    fn test_invalid_options_stop_before_connecting() {
        let clock = ManualClock::new();
        let options = testing::options(ProtocolVersion::V5).subscribe("a/#/b", QoS::AtMostOnce);
        let network = ScriptedNetwork::with_clock(clock.clone());

        let mut machine = Machine::new(options, network, clock, Recorder::default());

        assert!(matches!(
            machine.run(),
            Poll::Ready(Err(ClientError::BadArgument(_)))
        ));
        assert!(machine.is_done());
        assert!(machine.session().network().sent.is_empty());
        assert!(!machine.session().network().connected);

        // The recorded error is reported once.
        assert!(matches!(machine.run(), Poll::Ready(Ok(()))));
    }

    #[test]
    fn test_refused_connection_is_closed() {
        let clock = ManualClock::new();
        let options = testing::options(ProtocolVersion::V5);
        let mut network = ScriptedNetwork::with_clock(clock.clone());
        network.push(&[0x20, 0x03, 0x00, 0x87, 0x00]);

        let mut machine = Machine::new(options, network, clock, Recorder::default());

        assert!(matches!(
            machine.run(),
            Poll::Ready(Err(ClientError::ConnectionRefused(ReasonCode::NotAuthorized)))
        ));
        assert_eq!(machine.state(), State::Done);
        assert!(!machine.session().network().connected);
        assert!(machine.handler().disconnects.is_empty());
    }

    #[test]
    fn test_subscription_identifier_follows_server_support() -> Result<()> {
        let clock = ManualClock::new();
        let options = testing::options(ProtocolVersion::V5)
            .subscribe("a/b", QoS::AtMostOnce)
            .subscription_id(3);
        let mut network = ScriptedNetwork::with_clock(clock.clone());
        network.push(&[0x20, 0x03, 0x00, 0x00, 0x00]);
        network.push(&[0x90, 0x04, 0x00, 0x01, 0x00, 0x00]);

        let mut machine = Machine::new(options, network, clock, Recorder::default());
        machine.stop_handle().store(true, Ordering::SeqCst);

        match machine.run() {
            Poll::Ready(result) => result?,
            Poll::Pending => panic!("blocking run returned pending"),
        }

        let subscribe = [
            0x82, 0x0b, 0x00, 0x01, 0x02, 0x0b, 0x03, 0x00, 0x03, b'a', b'/', b'b', 0x00,
        ];
        let sent = &machine.session().network().sent;
        assert!(sent.windows(subscribe.len()).any(|w| w == subscribe));

        Ok(())
    }
}
