//! Topic name and topic filter checks applied before anything is encoded.

use crate::reason::ReasonCode;

/// Topic names and filters are length prefixed with a u16 on the wire.
pub const MAX_TOPIC_LENGTH: usize = u16::MAX as usize;

fn check_common(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= MAX_TOPIC_LENGTH && !topic.contains('\0')
}

/// Validates a topic name used in PUBLISH or a will message.
///
/// ```
/// use hermes_core::topic::validate_topic_name;
///
/// assert!(validate_topic_name("sensors/temperature/room1").is_ok());
/// assert!(validate_topic_name("sensors/+/room1").is_err());
/// ```
pub fn validate_topic_name(topic: &str) -> Result<(), ReasonCode> {
    if !check_common(topic) || topic.contains(['+', '#']) {
        return Err(ReasonCode::TopicNameInvalid);
    }

    Ok(())
}

/// Validates a topic filter used in SUBSCRIBE or UNSUBSCRIBE.
///
/// Wildcards must occupy a whole level and `#` may only be the last one.
pub fn validate_topic_filter(filter: &str) -> Result<(), ReasonCode> {
    if !check_common(filter) {
        return Err(ReasonCode::TopicFilterInvalid);
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let bad_single = level.contains('+') && level != "+";
        let bad_multi = level.contains('#') && (level != "#" || levels.peek().is_some());

        if bad_single || bad_multi {
            return Err(ReasonCode::TopicFilterInvalid);
        }
    }

    Ok(())
}
