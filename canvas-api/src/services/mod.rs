//! Service Layer
//!
//! Business logic that sits between the HTTP routes and storage:
//! agent registration and the placement admission controller.

pub mod agents;
pub mod placement;

pub use agents::AgentRegistry;
pub use placement::PlacementController;

use canvas_core::{Agent, Credential, DirectoryError, PlacementRejection};
use canvas_storage::AgentDirectory;

/// Resolve a presented credential to its agent.
///
/// The shape check runs before any lookup. After the lookup the stored
/// credential is compared in constant time against the presented one.
pub async fn authenticate(
    directory: &dyn AgentDirectory,
    presented: &str,
) -> Result<Agent, PlacementRejection> {
    let credential =
        Credential::parse(presented).map_err(|_| PlacementRejection::InvalidCredential)?;

    let agent = match directory.find_by_credential(&credential).await {
        Ok(agent) => agent,
        Err(DirectoryError::NotFound) => return Err(PlacementRejection::InvalidCredential),
        Err(e) => {
            tracing::error!(error = %e, "credential lookup failed");
            return Err(PlacementRejection::InternalError);
        }
    };

    if !agent.credential.verify(&credential) {
        return Err(PlacementRejection::InvalidCredential);
    }
    Ok(agent)
}
