//! Where the session token comes from.

/// Supplies the opaque token appended to the socket URL.
///
/// Returning `None` makes `connect()` fail with
/// [`SessionError::MissingCredential`](crate::error::SessionError::MissingCredential).
pub trait CredentialSource: Send + Sync + 'static {
    fn token(&self) -> Option<String>;
}

/// A fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl From<Option<String>> for StaticToken {
    fn from(token: Option<String>) -> Self {
        Self(token)
    }
}

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.is_empty())
    }
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn token(&self) -> Option<String> {
        self()
    }
}
