//! Status codes carried by RESPONSE frames.

use std::fmt;

/// A RESPONSE status code.
///
/// Codes the client does not know are preserved in [`Status::Unknown`] so
/// that they can still be reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 0x00: request succeeded.
    Success,
    /// 0x0A: unspecified failure.
    GenericError,
    /// 0x0B: the payload is a challenge to be signed.
    Challenge,
    /// 0x14: identity rejected or already provisioned.
    IdentificationError,
    /// 0x28: the remote method raised.
    MethodException,
    /// 0x2A: no component exposes the method.
    MethodNotFound,
    /// 0x2B: the method exists but cannot be served.
    MethodUnavailable,
    /// 0x2C: the caller is the only component exposing the method.
    MethodLoopback,
    /// 0x2D: the direct target is unknown.
    TargetNotFound,
    /// 0x2E: the direct target is offline.
    TargetDown,
    /// 0x46: client-local timeout, never sent on the wire.
    Timeout,
    /// Any other code.
    Unknown(u8),
}

impl Status {
    /// Decodes a status byte.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Status::Success,
            0x0A => Status::GenericError,
            0x0B => Status::Challenge,
            0x14 => Status::IdentificationError,
            0x28 => Status::MethodException,
            0x2A => Status::MethodNotFound,
            0x2B => Status::MethodUnavailable,
            0x2C => Status::MethodLoopback,
            0x2D => Status::TargetNotFound,
            0x2E => Status::TargetDown,
            0x46 => Status::Timeout,
            other => Status::Unknown(other),
        }
    }

    /// Returns the status byte.
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0x00,
            Status::GenericError => 0x0A,
            Status::Challenge => 0x0B,
            Status::IdentificationError => 0x14,
            Status::MethodException => 0x28,
            Status::MethodNotFound => 0x2A,
            Status::MethodUnavailable => 0x2B,
            Status::MethodLoopback => 0x2C,
            Status::TargetNotFound => 0x2D,
            Status::TargetDown => 0x2E,
            Status::Timeout => 0x46,
            Status::Unknown(code) => code,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::GenericError => "generic error",
            Status::Challenge => "challenge",
            Status::IdentificationError => "identification error",
            Status::MethodException => "method exception",
            Status::MethodNotFound => "method not found",
            Status::MethodUnavailable => "method unavailable",
            Status::MethodLoopback => "method loopback",
            Status::TargetNotFound => "target not found",
            Status::TargetDown => "target down",
            Status::Timeout => "timeout",
            Status::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        Status::from_code(code)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}
