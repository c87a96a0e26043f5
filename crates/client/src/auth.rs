//! Identity handshake run by `connect()` for identified components.
//!
//! ```text
//! IDENTITY(cid) ──► SUCCESS   ─► Trusted
//!               └─► CHALLENGE ─► ATTESTATION(cid, signature) ──► SUCCESS ─► Attested
//! any other status or timeout ─► Failed
//! ```

use std::fmt;

use protocol::{sign_with_secret, Frame, KeyPair, MsgId, RembusError, Result, Status};

use crate::component::Shared;
use crate::pending::{Settled, Settler};

/// Authentication outcome of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No handshake completed (anonymous or not yet connected).
    Unauthenticated,
    /// The broker accepted the identity without a challenge.
    Trusted,
    /// A challenge was received and the attestation is in flight.
    Challenged,
    /// The broker accepted the attestation.
    Attested,
    /// The broker rejected the identity or the attestation.
    Failed,
}

impl AuthState {
    /// Returns true for the accepted terminal states.
    pub fn is_authenticated(self) -> bool {
        matches!(self, AuthState::Trusted | AuthState::Attested)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Trusted => "trusted",
            AuthState::Challenged => "challenged",
            AuthState::Attested => "attested",
            AuthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl Shared {
    /// Runs the handshake on the link just opened by `connect()`.
    pub(crate) async fn authenticate(&self, cid: &str) -> Result<()> {
        let result = self.identify(cid).await;
        if result.is_err() {
            self.set_auth_state(AuthState::Failed);
        }
        result
    }

    async fn identify(&self, cid: &str) -> Result<()> {
        let frame = Frame::Identity {
            id: MsgId::new(),
            cid: cid.to_string(),
        };
        match self.exchange(frame, Settler::Identity).await? {
            Settled::Trusted => {
                self.set_auth_state(AuthState::Trusted);
                tracing::info!(cid, "identity trusted");
                Ok(())
            }
            Settled::Challenge(challenge) => {
                self.set_auth_state(AuthState::Challenged);
                tracing::debug!(cid, len = challenge.len(), "challenge received");
                self.attestation(cid, &challenge).await
            }
            Settled::Payload(_) => Err(RembusError::protocol(
                Status::GenericError,
                "unexpected identity response",
            )),
        }
    }

    async fn attestation(&self, cid: &str, challenge: &[u8]) -> Result<()> {
        let signature = self.sign_challenge(cid, challenge)?;
        let frame = Frame::Attestation {
            id: MsgId::new(),
            cid: cid.to_string(),
            signature,
        };
        self.exchange(frame, Settler::Default).await?;
        self.set_auth_state(AuthState::Attested);
        tracing::info!(cid, "attestation accepted");
        Ok(())
    }

    /// Signs a challenge: the shared secret wins, else the registered key.
    fn sign_challenge(&self, cid: &str, challenge: &[u8]) -> Result<Vec<u8>> {
        if let Some(secret) = &self.secret {
            return sign_with_secret(challenge, secret);
        }
        match self.keystore.load(cid)? {
            Some(pem) => KeyPair::from_private_pem(&pem)?.sign(challenge, cid),
            None => Err(RembusError::protocol(
                Status::IdentificationError,
                format!("no secret or private key available for {}", cid),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_states() {
        assert!(AuthState::Trusted.is_authenticated());
        assert!(AuthState::Attested.is_authenticated());
        assert!(!AuthState::Unauthenticated.is_authenticated());
        assert!(!AuthState::Challenged.is_authenticated());
        assert!(!AuthState::Failed.is_authenticated());
    }

    #[test]
    fn test_display() {
        assert_eq!(AuthState::Trusted.to_string(), "trusted");
        assert_eq!(AuthState::Failed.to_string(), "failed");
    }
}
