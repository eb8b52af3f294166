//! Append-only, hash-chained audit trail.
//!
//! Entries are sequenced from 1 and each one commits to the hash of its
//! predecessor. Nothing in this module can mutate or remove an entry once
//! appended; [`AuditTrail::verify_chain`] detects out-of-band tampering.

use chrono::Utc;
use openledger_types::{
    AccountId, AuditDraft, AuditEntry, CorrelationId, Currency, LedgerError, Result,
};

/// In-memory audit trail.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence, chain and append a draft. Returns the sealed entry.
    pub fn append(&mut self, draft: AuditDraft) -> AuditEntry {
        let seq = self.entries.len() as u64 + 1;
        let prev_hash = self
            .entries
            .last()
            .map_or(AuditEntry::GENESIS_HASH, |e| e.entry_hash.as_str());
        let entry = AuditEntry::seal(draft, seq, prev_hash, Utc::now());
        self.entries.push(entry.clone());
        entry
    }

    #[must_use]
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that touched `(account, currency)`, either as the primary
    /// account or through one of their balance legs.
    #[must_use]
    pub fn for_balance(&self, account: AccountId, currency: &Currency) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|e| {
                (e.account == Some(account) && &e.currency == currency)
                    || e.leg(account, currency).is_some()
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn by_correlation(&self, correlation_id: CorrelationId) -> Vec<AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Recompute every hash and check each entry links to its predecessor.
    ///
    /// # Errors
    /// Returns [`LedgerError::AuditChainBroken`] at the first bad entry.
    pub fn verify_chain(&self) -> Result<()> {
        verify_entries(&self.entries)
    }

    #[cfg(test)]
    fn entries_mut(&mut self) -> &mut Vec<AuditEntry> {
        &mut self.entries
    }
}

/// Chain verification over any slice of entries starting at seq 1.
///
/// # Errors
/// Returns [`LedgerError::AuditChainBroken`] at the first bad entry.
pub fn verify_entries(entries: &[AuditEntry]) -> Result<()> {
    let mut prev = AuditEntry::GENESIS_HASH;
    for (idx, entry) in entries.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        if entry.seq != expected_seq
            || entry.prev_hash != prev
            || entry.entry_hash != entry.compute_hash()
        {
            return Err(LedgerError::AuditChainBroken { seq: expected_seq });
        }
        prev = entry.entry_hash.as_str();
    }
    Ok(())
}
