//! Switch datapath identifier: a 64-bit id rendered as colon-separated hex,
//! e.g. `00:00:00:00:00:00:00:01`. Used as the primary key for stored intent
//! and as the routing key for outbound messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowManagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dpid(u64);

impl Dpid {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for Dpid {
    type Err = FlowManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: Vec<&str> = s.split(':').collect();
        if bytes.len() != 8 {
            return Err(FlowManagerError::BadRequest(format!(
                "'{s}' is not a valid dpid: expected 8 colon-separated hex octets"
            )));
        }

        let mut value: u64 = 0;
        for octet in bytes {
            let byte = u8::from_str_radix(octet, 16).map_err(|_| {
                FlowManagerError::BadRequest(format!("'{s}' is not a valid dpid"))
            })?;
            value = (value << 8) | u64::from(byte);
        }

        Ok(Self(value))
    }
}

impl TryFrom<String> for Dpid {
    type Error = FlowManagerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dpid> for String {
    fn from(value: Dpid) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for shift in (0..8).rev() {
            let byte = (self.0 >> (shift * 8)) & 0xFF;
            write!(f, "{byte:02x}")?;
            if shift != 0 {
                write!(f, ":")?;
            }
        }
        Ok(())
    }
}
