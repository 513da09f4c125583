use super::{Credential, CredentialId, CredentialPool};
use crate::middleware::RequestId;
use std::sync::Arc;

/// How a leased credential fared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Upstream accepted the credential (including 4xx request errors)
    Success,
    /// Upstream or network failure; counts toward the failure threshold
    Failure,
    /// Upstream rejected the token (401/403); expires it immediately
    Unauthorized,
    /// The request went away before an outcome was known
    Cancelled,
}

impl ReleaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseOutcome::Success => "success",
            ReleaseOutcome::Failure => "failure",
            ReleaseOutcome::Unauthorized => "unauthorized",
            ReleaseOutcome::Cancelled => "cancelled",
        }
    }
}

/// Exclusive hold on one pool credential
///
/// Consuming methods report an outcome. A lease dropped without one (client
/// disconnect, task abort, panic) is released as [`ReleaseOutcome::Cancelled`],
/// so every lease is released exactly once.
pub struct Lease {
    pool: Arc<CredentialPool>,
    credential: Credential,
    generation: u64,
    request_id: RequestId,
    released: bool,
}

impl Lease {
    pub(super) fn new(
        pool: Arc<CredentialPool>,
        credential: Credential,
        generation: u64,
        request_id: RequestId,
    ) -> Self {
        Self {
            pool,
            credential,
            generation,
            request_id,
            released: false,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn id(&self) -> CredentialId {
        self.credential.id()
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn succeed(self) {
        self.release(ReleaseOutcome::Success);
    }

    pub fn fail(self) {
        self.release(ReleaseOutcome::Failure);
    }

    /// Report the token as rejected by upstream
    pub fn invalidate(self) {
        self.release(ReleaseOutcome::Unauthorized);
    }

    pub fn release(mut self, outcome: ReleaseOutcome) {
        self.released = true;
        self.pool.release(
            self.credential.id(),
            self.generation,
            outcome,
            self.request_id,
        );
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(
                self.credential.id(),
                self.generation,
                ReleaseOutcome::Cancelled,
                self.request_id,
            );
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("credential", &self.credential)
            .field("generation", &self.generation)
            .field("request_id", &self.request_id)
            .finish()
    }
}
