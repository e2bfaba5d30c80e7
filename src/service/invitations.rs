use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::dto::{
    CreateInvitationRequest, CreateInvitationResponse, ResolveInvitationRequest,
    ResolveInvitationResponse,
};
use super::validation::validate_email;
use super::{Services, commit, enrolled_user_id, new_user};
use crate::projects::root_of;
use crate::rpc::CallContext;
use crate::status::{OptionExt, Status, StoreResultExt};
use crate::types::{Invitation, Role, RoleBinding};

const CODE_BYTES: usize = 24;

/// Invitation codes are handed out once and stored only as a hash.
pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Services {
    pub fn create_invitation(
        &self,
        ctx: &CallContext,
        req: CreateInvitationRequest,
    ) -> Result<CreateInvitationResponse, Status> {
        let entity = ctx.require_entity_context()?;
        let sponsor_id = enrolled_user_id(ctx.require_permissions()?)?;

        validate_email(&req.email)?;
        let role = Role::parse(&req.role)
            .ok_or_else(|| Status::invalid_argument(format!("invalid role: {}", req.role)))?;

        let code = generate_code();
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.invitation_ttl)
            .ok_or_else(|| Status::invalid_argument("invitation lifetime is out of range"))?;
        let invitation = Invitation {
            code_hash: hash_code(&code),
            email: req.email,
            project_id: entity.project.id.clone(),
            role,
            sponsor_id: sponsor_id.to_string(),
            created_at: now,
            expires_at,
        };
        self.store
            .querier()
            .create_invitation(&invitation)
            .status("failed to create invitation")?;

        tracing::info!(
            "Invited {} to project {} as {}",
            invitation.email,
            invitation.project_id,
            invitation.role
        );
        Ok(CreateInvitationResponse {
            code,
            email: invitation.email,
            project_id: invitation.project_id,
            role: invitation.role,
            expires_at: invitation.expires_at,
        })
    }

    /// Accepts or declines an invitation. The invitation is consumed either
    /// way; accepting replaces any role the caller already held on the
    /// project.
    pub fn resolve_invitation(
        &self,
        ctx: &CallContext,
        req: ResolveInvitationRequest,
    ) -> Result<ResolveInvitationResponse, Status> {
        let claims = ctx.require_claims()?;

        let tx = self.begin()?;
        let q = tx.querier();

        let invitation = q
            .get_invitation_by_code_hash(&hash_code(&req.code))
            .status("failed to look up invitation")?
            .or_not_found("invitation not found")?;
        if invitation.expires_at < Utc::now() {
            q.delete_invitation(&invitation.code_hash)
                .status("failed to delete invitation")?;
            commit(ctx, tx)?;
            tracing::info!(
                "Removed expired invitation to project {}",
                invitation.project_id
            );
            return Err(Status::failed_precondition("invitation expired"));
        }

        let response = ResolveInvitationResponse {
            project_id: invitation.project_id.clone(),
            role: invitation.role,
            is_accepted: req.accept,
        };

        if req.accept {
            let user = match q
                .get_user_by_subject(&claims.subject)
                .status("failed to look up user")?
            {
                Some(user) => user,
                None => {
                    let user = new_user(claims);
                    q.create_user(&user).status("failed to create user")?;
                    user
                }
            };

            let existing = q
                .get_user_roles(&user.id)
                .status("failed to get user roles")?
                .into_iter()
                .find(|b| b.project_id.as_deref() == Some(invitation.project_id.as_str()));

            if existing.as_ref().is_some_and(|b| b.role == invitation.role) {
                q.delete_invitation(&invitation.code_hash)
                    .status("failed to delete invitation")?;
                commit(ctx, tx)?;
                return Err(Status::already_exists(format!(
                    "user already has the {} role on this project",
                    invitation.role
                )));
            }
            if existing.is_some() {
                q.delete_role_binding(&user.id, &invitation.project_id)
                    .status("failed to revoke previous role")?;
            }

            let organization_id = root_of(q, &invitation.project_id)
                .status("failed to load project")?
                .or_not_found("project not found")?
                .id;
            q.upsert_role_binding(&RoleBinding {
                user_id: user.id,
                project_id: Some(invitation.project_id.clone()),
                role: invitation.role,
                organization_id,
            })
            .status("failed to grant project role")?;
        }

        q.delete_invitation(&invitation.code_hash)
            .status("failed to delete invitation")?;
        commit(ctx, tx)?;

        tracing::info!(
            "Invitation to project {} {}",
            response.project_id,
            if response.is_accepted { "accepted" } else { "declined" }
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_hashed() {
        let a = generate_code();
        let b = generate_code();
        assert_ne!(a, b);
        assert_eq!(a.len(), CODE_BYTES * 2);
        assert_eq!(hash_code(&a).len(), 64);
        assert_ne!(hash_code(&a), a);
    }
}
