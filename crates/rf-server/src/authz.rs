//! Authorization predicate for tenant-scoped actions.

use rf_core::{Error, Result, Role, TenantId, UserId, VideoId};
use rf_db::models::Video;
use rusqlite::Connection;

/// The authenticated caller, injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
}

/// Something a principal wants to do to a tenant's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UploadVideo,
    ListVideos,
    ViewVideo,
    StreamVideo,
    SubscribeVideo,
}

/// Allow or deny `action` on a resource owned by `resource_tenant`.
///
/// Denials never mention the target so a caller learns nothing about
/// another tenant's resources.
pub fn authorize(principal: &Principal, action: Action, resource_tenant: TenantId) -> Result<()> {
    if principal.tenant_id != resource_tenant {
        tracing::debug!(
            user_id = %principal.user_id,
            ?action,
            "Denied cross-tenant access"
        );
        return Err(Error::Forbidden("Access denied".into()));
    }

    if action == Action::UploadVideo && !principal.role.can_upload() {
        return Err(Error::Forbidden("editor or admin role required".into()));
    }

    Ok(())
}

/// Load a video and check `action` against its tenant.
///
/// Another tenant's video is reported exactly like a missing one, so ids
/// cannot be probed across tenants.
pub fn load_authorized_video(
    conn: &Connection,
    principal: &Principal,
    action: Action,
    id: VideoId,
) -> Result<Video> {
    let video = rf_db::queries::videos::get_video(conn, id)?
        .filter(|v| v.tenant_id == principal.tenant_id)
        .ok_or_else(|| {
            tracing::debug!(user_id = %principal.user_id, ?action, "Video not visible to caller");
            Error::not_found("video", id)
        })?;
    authorize(principal, action, video.tenant_id)?;
    Ok(video)
}
