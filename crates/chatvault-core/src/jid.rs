//! Chat and contact addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Server for phone-number addressed users.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server for linked (privacy-preserving) identities.
pub const LID_SERVER: &str = "lid";
/// Server for group chats.
pub const GROUP_SERVER: &str = "g.us";

/// A tagged address: `user[:device]@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// Phone-number identity for `user`.
    pub fn pn(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Linked identity for `user`.
    pub fn lid(user: impl Into<String>) -> Self {
        Self::new(user, LID_SERVER)
    }

    pub fn is_lid(&self) -> bool {
        self.server == LID_SERVER
    }

    pub fn is_pn(&self) -> bool {
        self.server == DEFAULT_USER_SERVER
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }

    /// Same address without the device part.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            device: 0,
            server: self.server.clone(),
        }
    }

    /// Same user and device, moved to another server.
    pub fn with_user_on(&self, user: &str, server: &str) -> Self {
        Self {
            user: user.to_string(),
            device: self.device,
            server: server.to_string(),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return write!(f, "{}", self.server);
        }
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidJid("empty address".to_string()));
        }

        let Some((local, server)) = s.split_once('@') else {
            // Bare numbers are phone-number users.
            return Ok(Jid::pn(s));
        };

        if server.is_empty() || server.contains('@') {
            return Err(Error::InvalidJid(s.to_string()));
        }

        let (user, device) = match local.split_once(':') {
            Some((user, device)) => {
                let device = device
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidJid(s.to_string()))?;
                (user, device)
            }
            None => (local, 0),
        };

        Ok(Jid {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
