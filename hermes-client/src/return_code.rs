use std::fmt;
use std::task::Poll;

use crate::error::ClientError;

/// Numeric status reported by every engine entry point.
///
/// Negative values are failures; `Continue` and `StdinWake` are not errors
/// but tell the caller to come back later.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Success = 0,
    BadArgument = -1,
    OutOfBuffer = -2,
    MalformedData = -3,
    BadPacketType = -4,
    BadPacketId = -5,
    TlsConnect = -6,
    Timeout = -7,
    Network = -8,
    OutOfMemory = -9,
    BadState = -10,
    Property = -11,
    ServerProperty = -12,
    Callback = -13,
    Continue = -101,
    StdinWake = -102,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        !matches!(
            self,
            ReturnCode::Success | ReturnCode::Continue | ReturnCode::StdinWake
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReturnCode::Success => "Success",
            ReturnCode::BadArgument => "Error (Bad argument)",
            ReturnCode::OutOfBuffer => "Error (Out of buffer)",
            ReturnCode::MalformedData => "Error (Malformed data)",
            ReturnCode::BadPacketType => "Error (Packet type mismatch)",
            ReturnCode::BadPacketId => "Error (Packet identifier mismatch)",
            ReturnCode::TlsConnect => "Error (TLS connect)",
            ReturnCode::Timeout => "Error (Timeout)",
            ReturnCode::Network => "Error (Network)",
            ReturnCode::OutOfMemory => "Error (Memory)",
            ReturnCode::BadState => "Error (State)",
            ReturnCode::Property => "Error (Property)",
            ReturnCode::ServerProperty => "Error (Server property)",
            ReturnCode::Callback => "Error (Callback)",
            ReturnCode::Continue => "Continue",
            ReturnCode::StdinWake => "Stdin wake",
        }
    }

    /// Status of one step of a resumable call.
    pub fn of<T>(poll: &Poll<Result<T, ClientError>>) -> ReturnCode {
        match poll {
            Poll::Pending => ReturnCode::Continue,
            Poll::Ready(Ok(_)) => ReturnCode::Success,
            Poll::Ready(Err(e)) => e.code(),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ReturnCode::Success.code(), 0);
        assert_eq!(ReturnCode::BadState.code(), -10);
        assert_eq!(ReturnCode::Callback.code(), -13);
        assert_eq!(ReturnCode::Continue.code(), -101);
        assert_eq!(ReturnCode::StdinWake.code(), -102);

        assert!(ReturnCode::Timeout.is_error());
        assert!(!ReturnCode::Continue.is_error());
        assert_eq!(ReturnCode::Network.to_string(), "Error (Network) (-8)");
    }

    #[test]
    fn test_code_of_poll() {
        let pending: Poll<Result<(), ClientError>> = Poll::Pending;
        assert_eq!(ReturnCode::of(&pending), ReturnCode::Continue);
        assert_eq!(ReturnCode::of(&Poll::Ready(Ok::<_, ClientError>(1))), ReturnCode::Success);
        assert_eq!(
            ReturnCode::of(&Poll::Ready(Err::<(), _>(ClientError::OutOfBuffer))),
            ReturnCode::OutOfBuffer
        );
    }
}
