use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated identity.
///
/// A `Session` is never mutated after it has been published: every change
/// builds a new value (`with_tokens`, `with_display_name`) that replaces the
/// old one wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub mobile: Option<String>,
    pub display_name: Option<String>,
}

impl Session {
    pub fn new(user_id: String, access_token: String, refresh_token: String) -> Self {
        Self {
            user_id,
            access_token,
            refresh_token,
            mobile: None,
            display_name: None,
        }
    }

    pub fn with_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.mobile = Some(mobile.into());
        self
    }

    /// Copy of this session carrying a new token pair.
    pub fn with_tokens(&self, tokens: &TokenPair) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            ..self.clone()
        }
    }

    /// Copy of this session carrying a new display name.
    pub fn with_display_name(&self, name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..self.clone()
        }
    }

    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("mobile", &self.mobile)
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenPair(<redacted>)")
    }
}

/// The durable copy kept by a credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(flatten)]
    pub session: Session,
    pub saved_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            saved_at: Utc::now(),
        }
    }

    /// Replace the session and stamp the write time.
    pub fn touch(&mut self, session: Session) {
        self.session = session;
        self.saved_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    LoggedOut,
    LoggedIn,
}

impl SessionState {
    pub fn of(session: Option<&Session>) -> Self {
        if session.is_some() {
            SessionState::LoggedIn
        } else {
            SessionState::LoggedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session::new("u1".into(), "A1".into(), "R1".into())
            .with_mobile("13800000000")
            .with_display_name("Ann")
    }

    #[test]
    fn test_with_tokens_preserves_identity_fields() {
        let session = sample();
        let updated = session.with_tokens(&TokenPair::new("A2", "R2"));

        assert_eq!(updated.access_token, "A2");
        assert_eq!(updated.refresh_token, "R2");
        assert_eq!(updated.user_id, "u1");
        assert_eq!(updated.mobile.as_deref(), Some("13800000000"));
        assert_eq!(updated.display_name.as_deref(), Some("Ann"));
        // The original value is untouched
        assert_eq!(session.access_token, "A1");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("A1"));
        assert!(!rendered.contains("R1"));
        assert!(rendered.contains("u1"));
        assert_eq!(format!("{:?}", TokenPair::new("A", "R")), "TokenPair(<redacted>)");
    }

    #[test]
    fn test_stored_session_json_is_flat() {
        let stored = StoredSession::new(sample());
        let json = serde_json::to_value(&stored).expect("serializes");
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["refresh_token"], "R1");
        assert!(json.get("saved_at").is_some());

        let back: StoredSession = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back.session, sample());
    }

    #[test]
    fn test_session_state_of() {
        assert_eq!(SessionState::of(None), SessionState::LoggedOut);
        assert_eq!(SessionState::of(Some(&sample())), SessionState::LoggedIn);
    }
}
