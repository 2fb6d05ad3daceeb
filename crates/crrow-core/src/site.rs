//! Site identity.
//!
//! Every replica is identified by a random 128-bit id, minted once and then
//! persisted for the lifetime of the database.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const SITE_ID_LEN: usize = 16;

/// 16-byte identifier of a replica.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId([u8; SITE_ID_LEN]);

impl SiteId {
    /// Mint a new random (version 4, RFC 4122 variant) site id.
    pub fn generate() -> Self {
        SiteId(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; SITE_ID_LEN]) -> Self {
        SiteId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SITE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidSiteId { len: bytes.len() })?;
        Ok(SiteId(array))
    }

    pub fn as_bytes(&self) -> &[u8; SITE_ID_LEN] {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).hyphenated())
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self)
    }
}
