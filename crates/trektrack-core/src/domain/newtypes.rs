//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow through the sync
//! engine. Each newtype ensures validity at construction time so that the
//! storage key layout (`metadata/{entity}`, `progress/{operation}`) can never
//! be broken by a malformed identifier.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// Maximum accepted length for any textual identifier
const MAX_ID_LEN: usize = 128;

fn validate_id_chars(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

// ============================================================================
// EntityId
// ============================================================================

/// Identifier of a synchronized entity (an episode record)
///
/// Format: ASCII alphanumerics plus `-`, `_`, `.` and `:`, e.g. `tng-s03e15`.
/// Slashes are rejected because entity ids are embedded in storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create a new EntityId
    ///
    /// # Errors
    /// Returns error if the id is empty, too long or contains invalid characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidEntityId(
                "Entity ID cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_ID_LEN {
            return Err(DomainError::InvalidEntityId(format!(
                "Entity ID exceeds {MAX_ID_LEN} characters"
            )));
        }
        if !validate_id_chars(&id) {
            return Err(DomainError::InvalidEntityId(format!(
                "Entity ID contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

// ============================================================================
// OperationId
// ============================================================================

/// Identifier of a top-level sync operation
///
/// Callers may supply their own identifier (e.g. a UI request id); when
/// they do not, [`OperationId::generate`] produces a random UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Create an OperationId from a caller-provided string
    ///
    /// # Errors
    /// Returns error if the id is empty, too long or contains invalid characters
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ID_LEN || !validate_id_chars(&id) {
            return Err(DomainError::InvalidId(format!(
                "Invalid operation ID: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random OperationId
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for OperationId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

// ============================================================================
// SourceId
// ============================================================================

/// Name of a metadata source (e.g. `tmdb`, `trakt`, `memory-alpha`, `manual`)
///
/// Source names are case-insensitive and normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// The pseudo-source used for values entered by hand or applied through review
    pub const MANUAL: &'static str = "manual";

    /// Create a new SourceId
    ///
    /// # Errors
    /// Returns error if the name is empty or contains characters other than
    /// ASCII alphanumerics, `-` and `_`
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into().trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(DomainError::InvalidSource(
                "Source name cannot be empty".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidSource(format!(
                "Source name contains invalid characters: {name}"
            )));
        }
        Ok(Self(name))
    }

    /// The `manual` pseudo-source
    #[must_use]
    pub fn manual() -> Self {
        Self(Self::MANUAL.to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.0
    }
}
