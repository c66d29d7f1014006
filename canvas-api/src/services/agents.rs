//! Agent Registration Service
//!
//! Creates agents with a sanitized name, a fresh UUIDv7 id and a 256-bit
//! credential, and answers "who am I" for a presented credential.

use canvas_core::{
    cooldown_elapsed, new_agent_id, remaining_wait, sanitize_name, Agent, AgentProfile, Clock,
    Color, Credential, DirectoryError, EpochMillis,
};
use canvas_storage::AgentDirectory;
use std::sync::Arc;
use tracing::{info, warn};

use super::authenticate;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::types::{AgentStatusResponse, RegisterAgentRequest, RegisteredAgent};

/// Attempts before giving up on a credential collision.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Registration and profile lookups.
pub struct AgentRegistry {
    directory: Arc<dyn AgentDirectory>,
    clock: Arc<dyn Clock>,
    cooldown_ms: EpochMillis,
}

impl AgentRegistry {
    pub fn new(directory: Arc<dyn AgentDirectory>, clock: Arc<dyn Clock>, cooldown_ms: EpochMillis) -> Self {
        Self {
            directory,
            clock,
            cooldown_ms,
        }
    }

    pub fn directory(&self) -> &Arc<dyn AgentDirectory> {
        &self.directory
    }

    /// Register a new agent and return its credential, once.
    pub async fn register(&self, req: RegisterAgentRequest) -> ApiResult<RegisteredAgent> {
        let name = sanitize_name(&req.name).map_err(|e| ApiError::invalid_input(e.to_string()))?;
        let color = match req.color.as_deref() {
            Some(raw) => Color::parse(raw).map_err(|_| {
                ApiError::from(canvas_core::PlacementRejection::invalid_color())
            })?,
            None => Color::random(),
        };

        for attempt in 1..=MAX_CREDENTIAL_ATTEMPTS {
            let agent = Agent {
                id: new_agent_id(),
                name: name.clone(),
                credential: Credential::generate(),
                color,
                created_at: self.clock.now_millis(),
                last_write_at: None,
            };

            match self.directory.create(&agent).await {
                Ok(()) => {
                    info!(agent = %agent.id, name = %agent.name, "agent registered");
                    return Ok(RegisteredAgent {
                        id: agent.id,
                        name: agent.name,
                        color: agent.color,
                        created_at: agent.created_at,
                        credential: agent.credential.expose().to_string(),
                    });
                }
                Err(DirectoryError::DuplicateCredential) | Err(DirectoryError::DuplicateId { .. }) => {
                    warn!(attempt, "identity collision during registration, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ApiError::from_code(ErrorCode::DuplicateCredential))
    }

    /// All agents, without credentials.
    pub async fn list(&self) -> ApiResult<Vec<AgentProfile>> {
        Ok(self.directory.list().await?)
    }

    /// The caller's profile and cooldown state.
    pub async fn status(&self, presented: &str) -> ApiResult<AgentStatusResponse> {
        let agent = authenticate(self.directory.as_ref(), presented).await?;
        let now = self.clock.now_millis();
        let can_place_now = cooldown_elapsed(agent.last_write_at, now, self.cooldown_ms);
        let wait_ms = agent
            .last_write_at
            .map(|last| remaining_wait(last, now, self.cooldown_ms))
            .unwrap_or(0);

        Ok(AgentStatusResponse {
            next_eligible_at: agent.next_eligible_at(self.cooldown_ms),
            agent: agent.profile(),
            can_place_now,
            wait_ms,
        })
    }
}
