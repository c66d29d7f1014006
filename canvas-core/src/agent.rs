//! Agent records and display-name sanitization.

use serde::{Deserialize, Serialize};

use crate::{AgentId, Color, Credential, EpochMillis};

/// Maximum length of a sanitized display name, in characters.
pub const MAX_NAME_CHARS: usize = 50;

/// A registered agent, including its secret.
///
/// This type never leaves the process in serialized form: it deliberately
/// does not implement `Serialize`. Anything client-facing goes through
/// [`AgentProfile`].
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub credential: Credential,
    pub color: Color,
    pub created_at: EpochMillis,
    /// `None` until the agent's first admitted placement.
    pub last_write_at: Option<EpochMillis>,
}

impl Agent {
    /// Public view with the credential stripped.
    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id,
            name: self.name.clone(),
            color: self.color,
            created_at: self.created_at,
            last_write_at: self.last_write_at,
        }
    }

    /// Earliest instant at which this agent may place again.
    ///
    /// `None` means the agent has never placed and is eligible immediately.
    pub fn next_eligible_at(&self, cooldown_ms: EpochMillis) -> Option<EpochMillis> {
        self.last_write_at
            .map(|last| last.saturating_add(cooldown_ms))
    }
}

/// Agent data safe to export in bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentProfile {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: AgentId,
    pub name: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, example = "#0000FF"))]
    pub color: Color,
    pub created_at: EpochMillis,
    pub last_write_at: Option<EpochMillis>,
}

/// Rejected display name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidName {
    #[error("name must contain at least one letter or digit")]
    NoAlphanumeric,
}

/// Sanitize a requested display name.
///
/// Control characters and markup-significant characters (`<>&"'` and
/// backtick) are dropped, runs of whitespace collapse to one space, and the
/// result is trimmed and truncated to [`MAX_NAME_CHARS`] characters. The
/// sanitized name must still contain an alphanumeric character.
pub fn sanitize_name(raw: &str) -> Result<String, InvalidName> {
    let mut out = String::with_capacity(raw.len().min(MAX_NAME_CHARS * 4));
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_control() || matches!(ch, '<' | '>' | '&' | '"' | '\'' | '`') {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }

    let truncated: String = out.chars().take(MAX_NAME_CHARS).collect();
    let trimmed = truncated.trim_end().to_string();

    if !trimmed.chars().any(char::is_alphanumeric) {
        return Err(InvalidName::NoAlphanumeric);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_collapses_whitespace() -> Result<(), InvalidName> {
        assert_eq!(sanitize_name("  pixel \t\n bot  ")?, "pixel bot");
        Ok(())
    }

    #[test]
    fn test_sanitize_strips_markup() -> Result<(), InvalidName> {
        assert_eq!(sanitize_name("<script>alert('x')</script>")?, "scriptalert(x)/script");
        assert_eq!(sanitize_name("a\u{0007}b")?, "ab");
        Ok(())
    }

    #[test]
    fn test_sanitize_requires_alphanumeric() {
        assert_eq!(sanitize_name(""), Err(InvalidName::NoAlphanumeric));
        assert_eq!(sanitize_name("   "), Err(InvalidName::NoAlphanumeric));
        assert_eq!(sanitize_name("<<>>--!!"), Err(InvalidName::NoAlphanumeric));
    }

    #[test]
    fn test_sanitize_truncates() -> Result<(), InvalidName> {
        let long = "x".repeat(200);
        assert_eq!(sanitize_name(&long)?.chars().count(), MAX_NAME_CHARS);
        Ok(())
    }

    #[test]
    fn test_profile_strips_credential() {
        let agent = Agent {
            id: crate::new_agent_id(),
            name: "bot".to_string(),
            credential: Credential::generate(),
            color: crate::PALETTE[4],
            created_at: 1,
            last_write_at: None,
        };
        let json = serde_json::to_string(&agent.profile()).unwrap_or_default();
        assert!(!json.contains(agent.credential.expose()));
        assert!(!json.contains("credential"));
    }

    #[test]
    fn test_next_eligible_for_fresh_agent_is_immediate() {
        let mut agent = Agent {
            id: crate::new_agent_id(),
            name: "bot".to_string(),
            credential: Credential::generate(),
            color: crate::PALETTE[0],
            created_at: 0,
            last_write_at: None,
        };
        assert_eq!(agent.next_eligible_at(10_000), None);
        agent.last_write_at = Some(0);
        assert_eq!(agent.next_eligible_at(10_000), Some(10_000));
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_bounded_and_clean(raw in ".{0,200}") {
            if let Ok(name) = sanitize_name(&raw) {
                prop_assert!(name.chars().count() <= MAX_NAME_CHARS);
                prop_assert!(name.chars().any(char::is_alphanumeric));
                prop_assert!(!name.contains('<') && !name.contains('>'));
                prop_assert!(!name.chars().any(char::is_control));
                prop_assert_eq!(name.trim(), name.as_str());
                prop_assert!(!name.contains("  "));
            }
        }
    }
}
