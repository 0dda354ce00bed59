//! Caller supplied descriptions of each operation and what comes back.

use bytes::Bytes;
use hermes_core::{
    properties::{PropertyList, PropertyType},
    qos::QoS,
    reason::ReasonCode,
};

use crate::error::{ClientError, Result};
use crate::options::{ClientOptions, Will, MAX_PACKET_SIZE, SESSION_NEVER_EXPIRES};

#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub properties: PropertyList,
}

impl TryFrom<&ClientOptions> for ConnectRequest {
    type Error = ClientError;

    /// Builds the CONNECT the options describe, including the MQTT 5.0
    /// properties they imply.
    fn try_from(options: &ClientOptions) -> Result<Self> {
        let mut properties = PropertyList::new();

        if options.protocol_version.supports_properties() {
            let expiry = match options.session_expiry {
                Some(seconds) => Some(seconds),
                None if !options.clean_session => Some(SESSION_NEVER_EXPIRES),
                None => None,
            };
            if let Some(seconds) = expiry {
                properties.push(PropertyType::SessionExpiryInterval, seconds)?;
            }

            if options.request_response_info {
                properties.push(PropertyType::RequestResponseInformation, 1u8)?;
            }

            if let Some(enabled) = options.request_problem_info {
                properties.push(PropertyType::RequestProblemInformation, u8::from(enabled))?;
            }

            if options.max_packet_size != MAX_PACKET_SIZE {
                properties.push(PropertyType::MaximumPacketSize, options.max_packet_size)?;
            }

            if options.topic_alias_max > 0 {
                properties.push(PropertyType::TopicAliasMaximum, options.topic_alias_max)?;
            }
        }

        Ok(ConnectRequest {
            client_id: options.client_id.clone(),
            keep_alive: options.keep_alive,
            clean_session: options.clean_session,
            will: options.will.clone(),
            username: options.username.clone(),
            password: options.password.clone(),
            properties,
        })
    }
}

/// What the broker answered to CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub properties: PropertyList,
}

/// A topic filter with its requested QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub filter: String,
    pub qos: QoS,
}

impl Topic {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Topic {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub topics: Vec<Topic>,
    pub properties: PropertyList,
}

impl SubscribeRequest {
    pub fn new(topics: Vec<Topic>) -> Self {
        SubscribeRequest {
            topics,
            properties: PropertyList::new(),
        }
    }
}

impl TryFrom<&ClientOptions> for SubscribeRequest {
    type Error = ClientError;

    /// The subscription made right after connecting.
    fn try_from(options: &ClientOptions) -> Result<Self> {
        let mut request = Self::new(options.topics.clone());

        if let (Some(id), true) = (
            options.subscription_id,
            options.protocol_version.supports_properties(),
        ) {
            request
                .properties
                .push(PropertyType::SubscriptionIdentifier, id)?;
        }

        Ok(request)
    }
}

/// Outcome for one filter, matched by index against the SUBACK payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub filter: String,
    pub reason_code: ReasonCode,
    /// Granted QoS, `None` when the broker refused the filter.
    pub qos: Option<QoS>,
}

#[derive(Debug, Clone, Default)]
pub struct UnsubscribeRequest {
    pub filters: Vec<String>,
    pub properties: PropertyList,
}

impl UnsubscribeRequest {
    pub fn new(filters: Vec<String>) -> Self {
        UnsubscribeRequest {
            filters,
            properties: PropertyList::new(),
        }
    }
}

impl From<&[Topic]> for UnsubscribeRequest {
    fn from(topics: &[Topic]) -> Self {
        Self::new(topics.iter().map(|t| t.filter.clone()).collect())
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: PropertyList,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        PublishRequest {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            properties: PropertyList::new(),
        }
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DisconnectRequest {
    pub reason_code: ReasonCode,
    pub properties: PropertyList,
}

impl Default for DisconnectRequest {
    fn default() -> Self {
        DisconnectRequest {
            reason_code: ReasonCode::NormalDisconnection,
            properties: PropertyList::new(),
        }
    }
}

impl DisconnectRequest {
    /// Normal disconnection that also ends the server side session.
    pub fn end_session() -> Self {
        let mut request = Self::default();
        request
            .properties
            .append(PropertyType::SessionExpiryInterval);
        request
    }
}

#[cfg(test)]
mod tests {
    use hermes_core::{properties::PropertyValue, protocol::ProtocolVersion};

    use super::*;

    fn options(version: ProtocolVersion) -> ClientOptions {
        ClientOptions::new("localhost", 1883)
            .client_id("sensor")
            .protocol_version(version)
    }

    #[test]
    fn test_clean_connect_has_no_properties() -> Result<()> {
        let request = ConnectRequest::try_from(&options(ProtocolVersion::V5))?;

        assert!(request.clean_session);
        assert!(request.properties.is_empty());

        Ok(())
    }

    #[test]
    fn test_resumed_session_never_expires() -> Result<()> {
        let request = ConnectRequest::try_from(&options(ProtocolVersion::V5).clean_session(false))?;
        assert_eq!(
            request.properties.get(PropertyType::SessionExpiryInterval),
            Some(&PropertyValue::FourByteInteger(SESSION_NEVER_EXPIRES))
        );

        let request = ConnectRequest::try_from(
            &options(ProtocolVersion::V5)
                .clean_session(false)
                .session_expiry(300),
        )?;
        assert_eq!(
            request.properties.get(PropertyType::SessionExpiryInterval),
            Some(&PropertyValue::FourByteInteger(300))
        );

        Ok(())
    }

    #[test]
    fn test_connect_properties_from_options() -> Result<()> {
        let options = options(ProtocolVersion::V5)
            .request_response_info(true)
            .request_problem_info(false)
            .max_packet_size(1024)
            .topic_alias_max(8);
        let request = ConnectRequest::try_from(&options)?;
        let properties = &request.properties;

        assert_eq!(properties.len(), 4);
        assert_eq!(
            properties.get(PropertyType::RequestResponseInformation),
            Some(&PropertyValue::Byte(1))
        );
        assert_eq!(
            properties.get(PropertyType::RequestProblemInformation),
            Some(&PropertyValue::Byte(0))
        );
        assert_eq!(
            properties.get(PropertyType::MaximumPacketSize),
            Some(&PropertyValue::FourByteInteger(1024))
        );
        assert_eq!(
            properties.get(PropertyType::TopicAliasMaximum),
            Some(&PropertyValue::TwoByteInteger(8))
        );

        Ok(())
    }

    #[test]
    fn test_mqtt311_connect_carries_no_properties() -> Result<()> {
        let options = options(ProtocolVersion::V3_1_1)
            .clean_session(false)
            .request_response_info(true)
            .max_packet_size(1024);

        assert!(ConnectRequest::try_from(&options)?.properties.is_empty());

        Ok(())
    }

    #[test]
    fn test_initial_subscription_identifier() -> Result<()> {
        let options = options(ProtocolVersion::V5)
            .subscribe("a/b", QoS::AtLeastOnce)
            .subscription_id(7);
        let request = SubscribeRequest::try_from(&options)?;

        assert_eq!(request.topics, vec![Topic::new("a/b", QoS::AtLeastOnce)]);
        assert_eq!(
            request.properties.get(PropertyType::SubscriptionIdentifier),
            Some(&PropertyValue::VariableByteInteger(7))
        );

        let v3 = options.protocol_version(ProtocolVersion::V3_1_1);
        assert!(SubscribeRequest::try_from(&v3)?.properties.is_empty());

        Ok(())
    }
}
