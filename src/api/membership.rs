/// Membership query endpoints for gating call sites
use crate::{context::AppContext, error::SyncResult, GroupId, UserId};
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/v1/users/:user_id/groups/:group_id/membership",
            get(get_membership),
        )
        .route("/v1/users/:user_id/groups", get(get_local_groups))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub member: bool,
}

/// Is the user a member of the group right now?
async fn get_membership(
    State(ctx): State<AppContext>,
    Path((user_id, group_id)): Path<(UserId, GroupId)>,
) -> SyncResult<Json<MembershipResponse>> {
    let member = ctx.reconciler.is_member(user_id, group_id, Utc::now()).await?;

    Ok(Json(MembershipResponse {
        user_id,
        group_id,
        member,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocalGroupsResponse {
    pub user_id: UserId,
    pub groups: BTreeSet<GroupId>,
}

/// Local groups the user belongs to through IAM
async fn get_local_groups(
    State(ctx): State<AppContext>,
    Path(user_id): Path<UserId>,
) -> SyncResult<Json<LocalGroupsResponse>> {
    let groups = ctx.reconciler.local_groups(user_id, Utc::now()).await?;
    Ok(Json(LocalGroupsResponse { user_id, groups }))
}
