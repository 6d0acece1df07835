use crate::config::PermissionsConfig;
use crate::model::ParticipantId;

#[derive(Debug, Clone, Default)]
pub struct Permissions {
    owner_id: String,
    owner_role: String,
}

impl Permissions {
    pub fn new(owner_id: impl Into<String>, owner_role: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            owner_role: owner_role.into(),
        }
    }

    pub fn from_config(cfg: &PermissionsConfig) -> Self {
        Self::new(cfg.owner_id.clone(), cfg.owner_role.clone())
    }

    /// Empty owner id or role never match.
    pub fn is_owner(&self, member: &ParticipantId, roles: &[String]) -> bool {
        if !self.owner_id.is_empty() && member.as_str() == self.owner_id {
            return true;
        }
        !self.owner_role.is_empty() && roles.iter().any(|r| *r == self.owner_role)
    }
}
