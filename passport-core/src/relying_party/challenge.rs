//! In-memory storage for pending authentication challenges
//!
//! Each (account, device) pair has at most one outstanding challenge. Taking a
//! challenge removes it, so every challenge is single-use; challenges older than
//! the configured TTL are treated as absent.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::{PassportError, Result};
use crate::types::{Challenge, DeviceId, UserId};

/// Default challenge lifetime (5 minutes)
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Challenge length in bytes
pub const CHALLENGE_LEN: usize = 32;

struct PendingChallenge {
    challenge: Vec<u8>,
    expires_at: Instant,
}

/// In-memory storage for pending challenges
pub struct ChallengeStore {
    pending: DashMap<(UserId, DeviceId), PendingChallenge>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh challenge for the pair, replacing any outstanding one.
    ///
    /// Expired challenges for other pairs are swept first.
    pub fn issue(&self, user_id: UserId, device_id: DeviceId) -> Result<Challenge> {
        self.cleanup_expired();

        let mut bytes = vec![0u8; CHALLENGE_LEN];
        getrandom::fill(&mut bytes)
            .map_err(|e| PassportError::SignatureError(format!("Entropy unavailable: {e}")))?;

        self.pending.insert(
            (user_id, device_id),
            PendingChallenge {
                challenge: bytes.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(Challenge::new(bytes))
    }

    /// Retrieve and remove the outstanding challenge for the pair.
    pub fn take(&self, user_id: &UserId, device_id: &DeviceId) -> Option<Challenge> {
        let (_, entry) = self.pending.remove(&(*user_id, *device_id))?;
        if entry.expires_at > Instant::now() {
            Some(Challenge::new(entry.challenge))
        } else {
            None // Expired
        }
    }

    /// Drop the outstanding challenge for one pair.
    pub fn discard(&self, user_id: &UserId, device_id: &DeviceId) {
        self.pending.remove(&(*user_id, *device_id));
    }

    /// Drop every outstanding challenge for an account.
    pub fn discard_user(&self, user_id: &UserId) {
        self.pending.retain(|(owner, _), _| owner != user_id);
    }

    /// Remove expired challenges
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.pending.retain(|_, entry| entry.expires_at > now);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("pending", &self.pending.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
