//! Discriminant search for valid keys.
//!
//! A candidate record only becomes a usable key when its compressed-point form
//! lies on P-224. [`KeySearch`] walks the 16-bit discriminant in bytes 6..8 from
//! zero upwards until the validator accepts the record, bounded by a
//! [`SearchPolicy`].

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::curve::{P224Validator, PointValidator};
use crate::types::{KeyRecord, ValidatedKey};
use crate::{Result, TagalongError};

/// Number of distinct discriminant values.
pub const DISCRIMINANT_SPACE: u32 = 1 << 16;

/// What to do once every discriminant has been tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop after at most 65536 attempts.
    #[default]
    Fail,
    /// Keep cycling the discriminant space until `max_attempts`.
    Wrap,
}

/// Bound on the discriminant search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPolicy {
    pub max_attempts: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self { max_attempts: DISCRIMINANT_SPACE, on_exhausted: ExhaustionPolicy::Fail }
    }
}

impl SearchPolicy {
    /// Attempts actually made before giving up.
    pub fn attempt_limit(&self) -> u32 {
        match self.on_exhausted {
            ExhaustionPolicy::Fail => self.max_attempts.min(DISCRIMINANT_SPACE),
            ExhaustionPolicy::Wrap => self.max_attempts,
        }
    }
}

/// Finds the smallest discriminant that makes a record validate.
#[derive(Debug, Clone, Default)]
pub struct KeySearch<V = P224Validator> {
    validator: V,
    policy: SearchPolicy,
}

impl KeySearch<P224Validator> {
    /// Search against the P-224 curve.
    pub fn p224(policy: SearchPolicy) -> Self {
        Self { validator: P224Validator, policy }
    }
}

impl<V: PointValidator> KeySearch<V> {
    pub fn new(validator: V, policy: SearchPolicy) -> Self {
        Self { validator, policy }
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Run the search on `record`.
    ///
    /// The discriminant always starts at zero regardless of what the record
    /// carries, so the result is deterministic for a given record.
    ///
    /// # Errors
    ///
    /// Returns [`TagalongError::SearchExhausted`] when the policy's bound is
    /// reached. Segment and chunk indices are left for the caller to attach.
    pub fn find(&self, mut record: KeyRecord) -> Result<ValidatedKey> {
        let limit = self.policy.attempt_limit();

        for attempt in 0..limit {
            let discriminant = (attempt % DISCRIMINANT_SPACE) as u16;
            record.set_discriminant(discriminant);

            if self.validator.is_valid_point(&record.compressed_point()) {
                debug!(
                    "Valid key for message {} after {} attempts (discriminant={:#06x})",
                    record.message_id(),
                    attempt + 1,
                    discriminant
                );
                return Ok(ValidatedKey::new(record, attempt + 1));
            }

            trace!("Rejected discriminant {:#06x}", discriminant);
        }

        Err(TagalongError::search_exhausted(record.message_id(), limit))
    }
}
