//! Resumable MQTT 3.1.1 / 5.0 client engine.
//!
//! [`Session`] exposes every protocol operation as a call returning
//! `Poll`, so the same code runs over blocking sockets or over a
//! non-blocking transport driven by an outer event loop. [`Machine`]
//! strings those operations into the lifecycle of a subscriber.
//!
//! ```no_run
//! use hermes_client::{ClientOptions, Machine, MessageFragment, HandlerError, SystemClock, TcpNetwork};
//! use hermes_core::qos::QoS;
//!
//! let options = ClientOptions::new("localhost", 1883).subscribe("sensors/#", QoS::AtLeastOnce);
//! let network = TcpNetwork::from_options(&options).unwrap();
//! let handler = |m: &MessageFragment<'_>| -> Result<(), HandlerError> {
//!     println!("{} {:?}", m.topic, m.payload);
//!     Ok(())
//! };
//!
//! let mut machine = Machine::new(options, network, SystemClock::new(), handler);
//! let _ = machine.run();
//! ```

pub mod clock;
pub mod error;
pub mod keepalive;
pub mod machine;
pub mod message;
pub mod network;
pub mod options;
pub mod packet_id;
pub mod reassembly;
pub mod request;
pub mod return_code;
pub mod session;
pub mod tls;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ClientError, Result};
pub use machine::{Machine, State};
pub use message::{HandlerError, MessageFragment, MessageHandler};
pub use network::{NetError, Network, TcpNetwork};
pub use options::{ClientOptions, Mode, TlsOptions, Will};
pub use request::{
    ConnectRequest, ConnectResult, DisconnectRequest, PublishRequest, SubscribeRequest,
    SubscribeResult, Topic, UnsubscribeRequest,
};
pub use return_code::ReturnCode;
pub use session::{Limits, Session};
