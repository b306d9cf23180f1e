//! Login credentials.

use std::fmt;

/// Immutable identifier/secret pair used to log in to the portal.
///
/// Neither `Debug` nor `Display` reveal the secret, and the identifier is
/// always masked.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Identifier safe for logs.
    pub fn masked_identifier(&self) -> String {
        mask(&self.identifier)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.masked_identifier())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked_identifier())
    }
}

/// Keep the first two characters of the local part, hide the rest of it.
pub(crate) fn mask(identifier: &str) -> String {
    let (local, domain) = match identifier.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (identifier, None),
    };
    let visible: String = local.chars().take(2).collect();
    match domain {
        Some(domain) => format!("{visible}***@{domain}"),
        None => format!("{visible}***"),
    }
}
