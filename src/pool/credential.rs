//! Upstream credentials and their configured form

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator used by the `email----password----token` credential format
pub const FIELD_SEPARATOR: &str = "----";

/// Stable identifier for a credential within one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CredentialId(u32);

impl CredentialId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cred-{}", self.0)
    }
}

/// Lifecycle status of a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Fresh,
    InUse,
    Expired,
    Revoked,
}

/// Sign-in secrets used to obtain a new token
#[derive(Clone, PartialEq, Eq)]
pub struct Secrets {
    email: String,
    password: String,
}

impl Secrets {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// A credential as written in configuration
///
/// Accepted forms:
/// - `token`
/// - `email----password----token`
/// - `email----password` (token obtained by signing in at startup)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialSpec {
    secrets: Option<Secrets>,
    token: Option<String>,
}

impl CredentialSpec {
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            secrets: None,
            token: Some(token.into()),
        }
    }

    pub fn secrets(&self) -> Option<&Secrets> {
        self.secrets.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Configured form with the password and token masked
    pub fn redacted(&self) -> String {
        let token = self.token.as_deref().map(mask_token);
        match (&self.secrets, token) {
            (Some(s), Some(t)) => format!("{}{sep}***{sep}{}", s.email, t, sep = FIELD_SEPARATOR),
            (Some(s), None) => format!("{}{}***", s.email, FIELD_SEPARATOR),
            (None, Some(t)) => t,
            (None, None) => String::new(),
        }
    }
}

impl fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl FromStr for CredentialSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("credential cannot be empty".to_string());
        }

        let parts: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();
        let non_empty = |value: &str, field: &str| {
            if value.trim().is_empty() {
                Err(format!("credential {} cannot be empty", field))
            } else {
                Ok(value.trim().to_string())
            }
        };

        match parts.as_slice() {
            [token] => Ok(Self::from_token(non_empty(token, "token")?)),
            [email, password] => Ok(Self {
                secrets: Some(Secrets::new(
                    non_empty(email, "email")?,
                    non_empty(password, "password")?,
                )),
                token: None,
            }),
            [email, password, token] => Ok(Self {
                secrets: Some(Secrets::new(
                    non_empty(email, "email")?,
                    non_empty(password, "password")?,
                )),
                token: Some(non_empty(token, "token")?),
            }),
            _ => Err(format!(
                "credential has {} '{}'-separated fields; expected 'token', \
                'email{sep}password' or 'email{sep}password{sep}token'",
                parts.len(),
                FIELD_SEPARATOR,
                sep = FIELD_SEPARATOR
            )),
        }
    }
}

impl TryFrom<String> for CredentialSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CredentialSpec> for String {
    fn from(spec: CredentialSpec) -> Self {
        match (spec.secrets, spec.token) {
            (Some(s), Some(t)) => [s.email.as_str(), s.password.as_str(), t.as_str()]
                .join(FIELD_SEPARATOR),
            (Some(s), None) => [s.email.as_str(), s.password.as_str()].join(FIELD_SEPARATOR),
            (None, Some(t)) => t,
            (None, None) => String::new(),
        }
    }
}

/// Immutable view of a credential handed out with a lease
#[derive(Clone)]
pub struct Credential {
    id: CredentialId,
    token: String,
    secrets: Option<Secrets>,
}

impl Credential {
    pub fn new(id: CredentialId, token: impl Into<String>, secrets: Option<Secrets>) -> Self {
        Self {
            id,
            token: token.into(),
            secrets,
        }
    }

    pub fn id(&self) -> CredentialId {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn secrets(&self) -> Option<&Secrets> {
        self.secrets.as_ref()
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = token;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &mask_token(&self.token))
            .field("has_secrets", &self.secrets.is_some())
            .finish()
    }
}

/// Keep the first few characters of a token for operator correlation
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.chars().count() < token.chars().count() {
        format!("{}***", prefix)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_token() {
        let spec: CredentialSpec = "eyJhbGciOi".parse().unwrap();
        assert_eq!(spec.token(), Some("eyJhbGciOi"));
        assert!(spec.secrets().is_none());
    }

    #[test]
    fn test_parse_email_password_token() {
        let spec: CredentialSpec = "a@b.com----hunter2----tok123".parse().unwrap();
        assert_eq!(spec.token(), Some("tok123"));
        let secrets = spec.secrets().unwrap();
        assert_eq!(secrets.email(), "a@b.com");
        assert_eq!(secrets.password(), "hunter2");
    }

    #[test]
    fn test_parse_email_password_without_token() {
        let spec: CredentialSpec = "a@b.com----hunter2".parse().unwrap();
        assert!(spec.token().is_none());
        assert!(spec.secrets().is_some());
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!("".parse::<CredentialSpec>().is_err());
        assert!("a----b----c----d".parse::<CredentialSpec>().is_err());
        assert!("a@b.com--------tok".parse::<CredentialSpec>().is_err());
    }

    #[test]
    fn test_string_form_round_trips_configured_text() {
        let raw = "a@b.com----hunter2----tok123";
        let spec: CredentialSpec = raw.parse().unwrap();
        assert_eq!(String::from(spec), raw);
    }

    #[test]
    fn test_redacted_hides_password_and_token() {
        let spec: CredentialSpec = "a@b.com----hunter2----tok1234567".parse().unwrap();
        let redacted = spec.redacted();
        assert!(!redacted.contains("hunter2"));
        assert!(!redacted.contains("tok1234567"));
        assert!(redacted.starts_with("a@b.com"));
    }

    #[test]
    fn test_mask_token_short_tokens_fully_hidden() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("abcdefghij"), "abcdef***");
    }

    #[test]
    fn test_credential_id_display() {
        assert_eq!(CredentialId::new(3).to_string(), "cred-3");
    }
}
