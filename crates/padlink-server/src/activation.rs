//! Session activation.
//!
//! Every session must send `ActivateSession` before any other command.
//! With no session key configured the activation always succeeds. With a
//! key, the certificate's HMAC is checked; if a verifier executable is
//! also configured, the runtime spawns it with the certificate content and
//! the session stays inactive until the verdict comes back.

use std::path::PathBuf;

use padlink_proto::{Frame, common};

use crate::{
    driver::SessionAction,
    session_key::SessionKey,
};

/// Broker-wide activation configuration.
#[derive(Debug, Clone, Default)]
pub struct ActivationConfig {
    /// HMAC key for certificate verification; `None` disables checking.
    pub session_key: Option<SessionKey>,
    /// External verifier executable, run with the certificate content as
    /// its first argument. Only consulted when a session key is set.
    pub verifier: Option<PathBuf>,
}

/// Per-session activation state.
#[derive(Debug, Default)]
pub struct SessionGate {
    /// Whether `ActivateSession` has been validated.
    pub activated: bool,
    /// Request id of an `ActivateSession` awaiting the external verifier.
    pub pending_verifier: Option<u32>,
}

impl ActivationConfig {
    /// Handle an `ActivateSession` frame for one session.
    pub fn handle_activate(
        &self,
        gate: &mut SessionGate,
        session_id: u64,
        frame: &Frame,
    ) -> Vec<SessionAction> {
        let Ok(cert) = std::str::from_utf8(&frame.body) else {
            tracing::warn!(session_id, "certificate is not valid UTF-8");
            return vec![SessionAction::Send {
                session_id,
                frame: Frame::empty(common::ERROR, frame.id),
            }];
        };

        let Some(key) = &self.session_key else {
            gate.activated = true;
            tracing::debug!(session_id, "session activated (no key configured)");
            return vec![SessionAction::Send {
                session_id,
                frame: Frame::empty(common::SUCCESS, frame.id),
            }];
        };

        match key.verify(cert) {
            Ok(content) => {
                if self.verifier.is_some() {
                    gate.pending_verifier = Some(frame.id);
                    vec![SessionAction::SpawnVerifier {
                        session_id,
                        request_id: frame.id,
                        content: content.to_owned(),
                    }]
                } else {
                    gate.activated = true;
                    tracing::debug!(session_id, "session activated");
                    vec![SessionAction::Send {
                        session_id,
                        frame: Frame::empty(common::SUCCESS, frame.id),
                    }]
                }
            },
            Err(e) => {
                tracing::warn!(session_id, "failed to verify user certificate: {e}");
                vec![SessionAction::Send {
                    session_id,
                    frame: Frame::empty(common::ERROR, frame.id),
                }]
            },
        }
    }

    /// Handle the verifier's verdict for one session.
    pub fn handle_verdict(
        gate: &mut SessionGate,
        session_id: u64,
        request_id: u32,
        ok: bool,
    ) -> Vec<SessionAction> {
        if gate.pending_verifier != Some(request_id) {
            tracing::warn!(session_id, request_id, "verdict for unknown activation request");
            return Vec::new();
        }
        gate.pending_verifier = None;
        let kind = if ok {
            gate.activated = true;
            tracing::debug!(session_id, "session activated by external verifier");
            common::SUCCESS
        } else {
            tracing::warn!(session_id, "external verifier rejected certificate");
            common::ERROR
        };
        vec![SessionAction::Send { session_id, frame: Frame::empty(kind, request_id) }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activate_frame(cert: &str) -> Frame {
        Frame::new(common::ACTIVATE_SESSION, 1, cert.as_bytes().to_vec())
    }

    #[test]
    fn no_key_always_activates() {
        let config = ActivationConfig::default();
        let mut gate = SessionGate::default();
        let actions = config.handle_activate(&mut gate, 1, &activate_frame("anything"));
        assert!(gate.activated);
        assert_eq!(
            actions,
            vec![SessionAction::Send { session_id: 1, frame: Frame::empty(common::SUCCESS, 1) }]
        );
    }

    #[test]
    fn key_rejects_bad_certificate() {
        let key = SessionKey::new(b"secret".to_vec());
        let config = ActivationConfig { session_key: Some(key), verifier: None };
        let mut gate = SessionGate::default();
        let actions = config.handle_activate(&mut gate, 1, &activate_frame("bogus\ncontent"));
        assert!(!gate.activated);
        assert_eq!(
            actions,
            vec![SessionAction::Send { session_id: 1, frame: Frame::empty(common::ERROR, 1) }]
        );
    }

    #[test]
    fn key_accepts_valid_certificate() {
        let key = SessionKey::new(b"secret".to_vec());
        let cert = key.generate_certificate("user");
        let config = ActivationConfig { session_key: Some(key), verifier: None };
        let mut gate = SessionGate::default();
        config.handle_activate(&mut gate, 1, &activate_frame(&cert));
        assert!(gate.activated);
    }

    #[test]
    fn verifier_defers_activation_until_verdict() {
        let key = SessionKey::new(b"secret".to_vec());
        let cert = key.generate_certificate("user");
        let config =
            ActivationConfig { session_key: Some(key), verifier: Some(PathBuf::from("/bin/true")) };
        let mut gate = SessionGate::default();

        let actions = config.handle_activate(&mut gate, 1, &activate_frame(&cert));
        assert!(!gate.activated);
        assert_eq!(
            actions,
            vec![SessionAction::SpawnVerifier {
                session_id: 1,
                request_id: 1,
                content: "user".to_owned()
            }]
        );

        let actions = ActivationConfig::handle_verdict(&mut gate, 1, 1, true);
        assert!(gate.activated);
        assert_eq!(
            actions,
            vec![SessionAction::Send { session_id: 1, frame: Frame::empty(common::SUCCESS, 1) }]
        );
    }

    #[test]
    fn failed_verdict_leaves_session_inactive() {
        let mut gate = SessionGate { activated: false, pending_verifier: Some(7) };
        let actions = ActivationConfig::handle_verdict(&mut gate, 1, 7, false);
        assert!(!gate.activated);
        assert_eq!(
            actions,
            vec![SessionAction::Send { session_id: 1, frame: Frame::empty(common::ERROR, 7) }]
        );
    }
}
