//! Server key verification against the trust store.

use vex_shared::identity::{decode_public_key, verify_hex_signature};
use vex_shared::protocol::ChallengeReply;

/// Verdict on a server's answer to our challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Valid signature from the pinned key.
    Trusted,
    /// Valid signature from a server with no pin yet; pin this key.
    FirstUse([u8; 32]),
    /// Valid signature, but from a key other than the pinned one.
    Mismatch { pinned: [u8; 32], presented: [u8; 32] },
    /// Signature did not verify, or the key or signature was unreadable.
    BadSignature,
}

/// Check `reply` as the server's signature over `nonce`.
///
/// With a pin, the pinned key must have signed. A different presented key is
/// only reported as a mismatch when it signed correctly itself; anything
/// that fails to verify is a bad signature.
pub fn evaluate(pinned: Option<[u8; 32]>, nonce: &str, reply: &ChallengeReply) -> TrustDecision {
    let Ok(presented) = decode_public_key(&reply.pubkey) else {
        return TrustDecision::BadSignature;
    };
    let signed_by =
        |key: &[u8; 32]| verify_hex_signature(key, nonce.as_bytes(), &reply.response).is_ok();

    match pinned {
        None if signed_by(&presented) => TrustDecision::FirstUse(presented),
        Some(pinned) if pinned == presented && signed_by(&pinned) => TrustDecision::Trusted,
        Some(pinned) if pinned != presented && signed_by(&presented) => {
            TrustDecision::Mismatch { pinned, presented }
        }
        _ => TrustDecision::BadSignature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vex_shared::Identity;

    fn answer(server: &Identity, nonce: &str) -> ChallengeReply {
        ChallengeReply {
            pubkey: server.public_key_hex(),
            response: server.sign_hex(nonce.as_bytes()),
        }
    }

    #[test]
    fn test_first_use_pins_presented_key() {
        let server = Identity::generate();
        assert_eq!(
            evaluate(None, "N1", &answer(&server, "N1")),
            TrustDecision::FirstUse(server.public_key_bytes())
        );
    }

    #[test]
    fn test_pinned_key_verifies() {
        let server = Identity::generate();
        let pin = Some(server.public_key_bytes());
        assert_eq!(
            evaluate(pin, "N1", &answer(&server, "N1")),
            TrustDecision::Trusted
        );
    }

    #[test]
    fn test_wrong_nonce_is_bad_signature() {
        let server = Identity::generate();
        assert_eq!(
            evaluate(None, "N1", &answer(&server, "other")),
            TrustDecision::BadSignature
        );
        assert_eq!(
            evaluate(Some(server.public_key_bytes()), "N1", &answer(&server, "other")),
            TrustDecision::BadSignature
        );
    }

    #[test]
    fn test_new_key_is_mismatch() {
        let old = Identity::generate();
        let new = Identity::generate();
        assert_eq!(
            evaluate(Some(old.public_key_bytes()), "N1", &answer(&new, "N1")),
            TrustDecision::Mismatch {
                pinned: old.public_key_bytes(),
                presented: new.public_key_bytes(),
            }
        );
    }

    #[test]
    fn test_garbage_reply_is_bad_signature() {
        let reply = ChallengeReply {
            pubkey: "zz".into(),
            response: "00".into(),
        };
        assert_eq!(evaluate(None, "N1", &reply), TrustDecision::BadSignature);
    }
}
