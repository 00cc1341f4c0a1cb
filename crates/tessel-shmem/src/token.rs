//! The unique identifier every participant must present to join.

use std::fmt;

use crate::error::{Result, ShmemError};

/// Opaque payload bytes in a join token.
pub const UNIQUEID_PADDING: usize = 128;

/// Flattened length of a token: version followed by the payload.
pub const TOKEN_LEN: usize = UNIQUEID_PADDING + 1;

/// Identifier produced once per job and handed unmodified to every worker.
#[derive(Clone, PartialEq, Eq)]
pub struct UniqueJoinToken {
    version: i32,
    internal: [u8; UNIQUEID_PADDING],
}

impl UniqueJoinToken {
    pub fn new(version: i32, internal: [u8; UNIQUEID_PADDING]) -> Self {
        Self { version, internal }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn internal(&self) -> &[u8; UNIQUEID_PADDING] {
        &self.internal
    }

    /// Integer form used for out-of-band transport: version, then each
    /// payload byte as a signed char.
    pub fn to_values(&self) -> Vec<i64> {
        std::iter::once(self.version as i64)
            .chain(self.internal.iter().map(|&b| b as i8 as i64))
            .collect()
    }

    /// Inverse of [`to_values`](Self::to_values). Payload values are
    /// truncated to their low byte.
    pub fn from_values(values: &[i64]) -> Result<Self> {
        if values.len() != TOKEN_LEN {
            return Err(ShmemError::TokenLength { expected: TOKEN_LEN, actual: values.len() });
        }
        let mut internal = [0u8; UNIQUEID_PADDING];
        for (dst, &v) in internal.iter_mut().zip(&values[1..]) {
            *dst = v as u8;
        }
        Ok(Self { version: values[0] as i32, internal })
    }
}

impl fmt::Debug for UniqueJoinToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.internal[..8].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "UniqueJoinToken {{ version: {}, internal: {}.. }}", self.version, head)
    }
}
