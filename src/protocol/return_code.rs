//! MQTT v3.1.1 return codes
//!
//! CONNACK return codes (section 3.2.2.3) and SUBACK return codes
//! (section 3.9.3).

use std::fmt;

use super::QoS;

/// CONNACK return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectReturnCode {
    /// Connection accepted
    #[default]
    Accepted = 0x00,
    /// The server does not support the requested protocol level
    UnacceptableProtocolVersion = 0x01,
    /// The client identifier is well-formed but not allowed
    IdentifierRejected = 0x02,
    /// The MQTT service is unavailable
    ServerUnavailable = 0x03,
    /// The data in the user name or password is malformed
    BadUsernameOrPassword = 0x04,
    /// The client is not authorized to connect
    NotAuthorized = 0x05,
}

impl ConnectReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ConnectReturnCode::Accepted),
            0x01 => Some(ConnectReturnCode::UnacceptableProtocolVersion),
            0x02 => Some(ConnectReturnCode::IdentifierRejected),
            0x03 => Some(ConnectReturnCode::ServerUnavailable),
            0x04 => Some(ConnectReturnCode::BadUsernameOrPassword),
            0x05 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }

    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "connection accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUsernameOrPassword => "bad username or password",
            Self::NotAuthorized => "not authorized",
        };
        f.write_str(s)
    }
}

/// SUBACK return code: the granted QoS or a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SubAckReturnCode {
    /// Success, maximum QoS 0
    GrantedQoS0 = 0x00,
    /// Success, maximum QoS 1
    GrantedQoS1 = 0x01,
    /// Success, maximum QoS 2
    GrantedQoS2 = 0x02,
    /// Failure
    Failure = 0x80,
}

impl SubAckReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(SubAckReturnCode::GrantedQoS0),
            0x01 => Some(SubAckReturnCode::GrantedQoS1),
            0x02 => Some(SubAckReturnCode::GrantedQoS2),
            0x80 => Some(SubAckReturnCode::Failure),
            _ => None,
        }
    }

    /// The granted QoS, or `None` for a failure
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            SubAckReturnCode::GrantedQoS0 => Some(QoS::AtMostOnce),
            SubAckReturnCode::GrantedQoS1 => Some(QoS::AtLeastOnce),
            SubAckReturnCode::GrantedQoS2 => Some(QoS::ExactlyOnce),
            SubAckReturnCode::Failure => None,
        }
    }
}

impl From<QoS> for SubAckReturnCode {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => SubAckReturnCode::GrantedQoS0,
            QoS::AtLeastOnce => SubAckReturnCode::GrantedQoS1,
            QoS::ExactlyOnce => SubAckReturnCode::GrantedQoS2,
        }
    }
}
