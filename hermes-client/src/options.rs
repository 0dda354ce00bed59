use std::time::Duration;

use bytes::Bytes;
use hermes_core::{
    codec::{check_field_length, VariableByteInteger},
    properties::PropertyList,
    protocol::ProtocolVersion,
    qos::QoS,
    topic,
};

use crate::error::{ClientError, Result};
use crate::request::Topic;

/// Smallest transmit or receive buffer the engine accepts.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Largest frame MQTT can describe: a four byte remaining length plus header.
pub const MAX_PACKET_SIZE: u32 = 268_435_460;

/// Session expiry interval asking the server to keep the session forever.
pub const SESSION_NEVER_EXPIRES: u32 = u32::MAX;

/// How network calls behave when no progress can be made.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Calls wait up to the command timeout and only return once an
    /// operation completes or fails.
    #[default]
    Blocking,
    /// Calls return `Poll::Pending` as soon as the transport would block.
    NonBlocking,
}

/// Will message configuration.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: PropertyList,
}

impl Will {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: PropertyList::new(),
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Will properties, such as the will delay interval. MQTT 5.0 only.
    pub fn properties(mut self, properties: PropertyList) -> Self {
        self.properties = properties;
        self
    }
}

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to custom CA certificate file (PEM format).
    /// If not set, the bundled web PKI roots are used.
    pub ca_path: Option<String>,
    /// Skip server certificate verification (insecure, for testing only).
    pub danger_skip_verify: bool,
}

/// Everything needed to run a session against one broker.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) client_id: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<Bytes>,
    pub(crate) keep_alive: u16,
    pub(crate) clean_session: bool,
    pub(crate) will: Option<Will>,
    pub(crate) protocol_version: ProtocolVersion,
    pub(crate) cmd_timeout: Duration,
    pub(crate) tx_buffer_size: usize,
    pub(crate) rx_buffer_size: usize,
    pub(crate) max_packet_size: u32,
    pub(crate) topic_alias_max: u16,
    pub(crate) max_qos: QoS,
    pub(crate) session_expiry: Option<u32>,
    pub(crate) request_response_info: bool,
    pub(crate) request_problem_info: Option<bool>,
    pub(crate) subscription_id: Option<u32>,
    pub(crate) tls: TlsOptions,
    pub(crate) mode: Mode,
    pub(crate) unsubscribe_on_exit: bool,
    pub(crate) topics: Vec<Topic>,
}

impl ClientOptions {
    /// Create new options for the given broker host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            will: None,
            protocol_version: ProtocolVersion::V5,
            cmd_timeout: Duration::from_secs(30),
            tx_buffer_size: 1024,
            rx_buffer_size: 1024,
            max_packet_size: MAX_PACKET_SIZE,
            topic_alias_max: 0,
            max_qos: QoS::ExactlyOnce,
            session_expiry: None,
            request_response_info: false,
            request_problem_info: None,
            subscription_id: None,
            tls: TlsOptions::default(),
            mode: Mode::Blocking,
            unsubscribe_on_exit: false,
            topics: Vec::new(),
        }
    }

    /// Set the client ID. If empty, a v5 broker assigns one.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<Bytes>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the keep-alive interval in seconds, 0 disables pinging.
    pub fn keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// How long any single MQTT operation may take.
    pub fn cmd_timeout(mut self, timeout: Duration) -> Self {
        self.cmd_timeout = timeout;
        self
    }

    pub fn tx_buffer_size(mut self, size: usize) -> Self {
        self.tx_buffer_size = size;
        self
    }

    pub fn rx_buffer_size(mut self, size: usize) -> Self {
        self.rx_buffer_size = size;
        self
    }

    /// Largest packet this client sends or accepts.
    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn topic_alias_max(mut self, max: u16) -> Self {
        self.topic_alias_max = max;
        self
    }

    /// Ceiling on the QoS used for subscriptions and publishes.
    pub fn max_qos(mut self, qos: QoS) -> Self {
        self.max_qos = qos;
        self
    }

    /// Session expiry interval in seconds sent with an MQTT 5.0 CONNECT.
    ///
    /// Without one, a session that is not clean asks for
    /// [`SESSION_NEVER_EXPIRES`] so the server keeps it across connections.
    pub fn session_expiry(mut self, seconds: u32) -> Self {
        self.session_expiry = Some(seconds);
        self
    }

    /// Ask the server for response information in CONNACK.
    pub fn request_response_info(mut self, enabled: bool) -> Self {
        self.request_response_info = enabled;
        self
    }

    /// Whether the server may send reason strings and user properties on
    /// failures. Left to the server default unless set.
    pub fn request_problem_info(mut self, enabled: bool) -> Self {
        self.request_problem_info = Some(enabled);
        self
    }

    /// Subscription identifier attached to the initial SUBSCRIBE. Dropped
    /// when the server does not support identifiers.
    pub fn subscription_id(mut self, id: u32) -> Self {
        self.subscription_id = Some(id);
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Send UNSUBSCRIBE for every topic before disconnecting on a stop request.
    pub fn unsubscribe_on_exit(mut self, enabled: bool) -> Self {
        self.unsubscribe_on_exit = enabled;
        self
    }

    /// Add a topic filter subscribed right after connecting.
    pub fn subscribe(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.topics.push(Topic::new(filter, qos));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Rejects option combinations no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ClientError::BadArgument("host is empty".into()));
        }

        if self.tx_buffer_size < MIN_BUFFER_SIZE || self.rx_buffer_size < MIN_BUFFER_SIZE {
            return Err(ClientError::BadArgument(format!(
                "buffers must hold at least {} bytes",
                MIN_BUFFER_SIZE
            )));
        }

        if self.max_packet_size == 0 {
            return Err(ClientError::BadArgument("maximum packet size is zero".into()));
        }

        if self.client_id.len() > topic::MAX_TOPIC_LENGTH {
            return Err(ClientError::BadArgument("client id too long".into()));
        }

        if self.client_id.is_empty()
            && !self.clean_session
            && !self.protocol_version.supports_properties()
        {
            return Err(ClientError::BadArgument(
                "MQTT 3.1.1 needs a client id to resume a session".into(),
            ));
        }

        if let Some(username) = &self.username {
            check_field_length(username.len())?;
        }

        if let Some(password) = &self.password {
            check_field_length(password.len())?;
        }

        if let Some(will) = &self.will {
            topic::validate_topic_name(&will.topic)
                .map_err(|_| ClientError::BadArgument(format!("will topic {:?}", will.topic)))?;
            check_field_length(will.payload.len())?;
        }

        if let Some(id) = self.subscription_id {
            if id == 0 || id > VariableByteInteger::MAX {
                return Err(ClientError::BadArgument(format!("subscription identifier {}", id)));
            }
        }

        for t in &self.topics {
            topic::validate_topic_filter(&t.filter)
                .map_err(|_| ClientError::BadArgument(format!("topic filter {:?}", t.filter)))?;
        }

        Ok(())
    }
}
