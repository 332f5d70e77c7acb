//! Concurrency tokens for optimistic concurrency control.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;

/// Identifies one specific version of a stored document.
///
/// A token is the pair (`epoch`, `sequence`), known on the wire as
/// `_primary_term` and `_seq_no`. A conditional write carrying a token is
/// rejected with a conflict when the stored document has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConcurrencyToken {
    /// Version epoch (primary term).
    pub epoch: u64,
    /// Version sequence number.
    pub sequence: u64,
}

impl ConcurrencyToken {
    /// Creates a token from its two counters.
    pub fn new(epoch: u64, sequence: u64) -> Self {
        Self { epoch, sequence }
    }

    /// Builds a token from optional wire fields.
    ///
    /// Both counters present yields a token, both absent yields `None`,
    /// anything else is an [`ProtocolError::IncompleteToken`].
    pub fn from_parts(sequence: Option<u64>, epoch: Option<u64>) -> ProtocolResult<Option<Self>> {
        match (sequence, epoch) {
            (Some(sequence), Some(epoch)) => Ok(Some(Self { epoch, sequence })),
            (None, None) => Ok(None),
            _ => Err(ProtocolError::IncompleteToken),
        }
    }

    /// Splits an optional token into optional wire fields (`if_seq_no`, `if_primary_term`).
    pub fn into_parts(token: Option<Self>) -> (Option<u64>, Option<u64>) {
        match token {
            Some(t) => (Some(t.sequence), Some(t.epoch)),
            None => (None, None),
        }
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq={} epoch={}", self.sequence, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_or_neither() {
        assert_eq!(
            ConcurrencyToken::from_parts(Some(5), Some(1)).unwrap(),
            Some(ConcurrencyToken::new(1, 5))
        );
        assert_eq!(ConcurrencyToken::from_parts(None, None).unwrap(), None);
        assert!(matches!(
            ConcurrencyToken::from_parts(Some(5), None),
            Err(ProtocolError::IncompleteToken)
        ));
        assert!(matches!(
            ConcurrencyToken::from_parts(None, Some(1)),
            Err(ProtocolError::IncompleteToken)
        ));
    }

    #[test]
    fn ordering_follows_epoch_then_sequence() {
        let old_epoch = ConcurrencyToken::new(1, 900);
        let new_epoch = ConcurrencyToken::new(2, 3);
        assert!(old_epoch < new_epoch);
        assert!(ConcurrencyToken::new(1, 5) < ConcurrencyToken::new(1, 6));
    }

    #[test]
    fn display() {
        assert_eq!(ConcurrencyToken::new(1, 6).to_string(), "seq=6 epoch=1");
    }
}
