use std::collections::HashSet;

use super::{AuthError, Capability};
use crate::common::entity_ids::UserId;

/// An authenticated user acting on the engine
///
/// Usage:
/// ```
/// # use edit_engine::common::{Actor, Capability, UserId};
/// # fn run(actor: &Actor) -> Result<(), edit_engine::common::AuthError> {
/// actor.can(Capability::Edit).check()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Actor {
    user_id: UserId,
    capabilities: HashSet<Capability>,
}

impl Actor {
    pub fn new(user_id: UserId, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            user_id,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Convenience constructor for a regular contributor (edit + vote).
    pub fn contributor(user_id: UserId) -> Self {
        Self::new(user_id, [Capability::Edit, Capability::Vote])
    }

    pub fn moderator(user_id: UserId) -> Self {
        Self::new(user_id, [Capability::Moderate])
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities
            .iter()
            .any(|granted| capability.is_implied_by(*granted))
    }

    /// Specify what capability the actor needs
    pub fn can(&self, capability: Capability) -> CapabilityCheck<'_> {
        CapabilityCheck {
            actor: self,
            capability,
        }
    }
}

/// Builder after specifying capability
pub struct CapabilityCheck<'a> {
    actor: &'a Actor,
    capability: Capability,
}

impl CapabilityCheck<'_> {
    pub fn check(self) -> Result<(), AuthError> {
        if self.actor.has(self.capability) {
            return Ok(());
        }

        Err(AuthError::MissingCapability {
            user_id: self.actor.user_id,
            capability: self.capability.as_str(),
        })
    }
}
