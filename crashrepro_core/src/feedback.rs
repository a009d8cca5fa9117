use crate::error::{MAX_REPORTED_SIGNATURES, ReproError};
use crate::observer::{AttemptObserver, AttemptRecord};
use crate::signature::CrashSignature;
use std::collections::{HashSet, VecDeque};
use tracing::info;

/// Keeps the signatures seen across attempts for the final diagnostics.
///
/// The most recent [`MAX_REPORTED_SIGNATURES`] signatures are retained in
/// attempt order, duplicates included. Distinct signatures are counted by
/// digest over the whole run.
#[derive(Debug, Default)]
pub struct SignatureLog {
    recent: VecDeque<CrashSignature>,
    known_digests: HashSet<[u8; 16]>,
    attempts: u32,
}

impl SignatureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one signature. Returns true if it had not been seen before.
    pub fn record(&mut self, signature: CrashSignature) -> bool {
        self.attempts += 1;
        let is_new = self.known_digests.insert(signature.digest());
        if self.recent.len() == MAX_REPORTED_SIGNATURES {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);
        is_new
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn distinct(&self) -> usize {
        self.known_digests.len()
    }

    pub fn recent(&self) -> impl Iterator<Item = &CrashSignature> {
        self.recent.iter()
    }

    /// Converts the log into the exhaustion error after `count` attempts.
    pub fn into_unreproducible(self, count: u32) -> ReproError {
        ReproError::unreproducible(count, self.recent)
    }
}

impl AttemptObserver for SignatureLog {
    fn name(&self) -> &'static str {
        "SignatureLog"
    }

    fn pre_attempt(&mut self, _attempt: u32) -> Result<(), ReproError> {
        Ok(())
    }

    fn post_attempt(&mut self, record: &AttemptRecord<'_>) -> Result<(), ReproError> {
        if self.record(record.signature.clone()) {
            info!(
                attempt = record.attempt,
                crash_type = record.signature.crash_type(),
                distinct = self.distinct(),
                "New crash signature observed"
            );
        }
        Ok(())
    }
}
