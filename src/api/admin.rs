/// Admin API: group mappings and identity links
use crate::{
    context::AppContext,
    error::{SyncError, SyncResult},
    mapping::GroupMapping,
    GroupId, UserId,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/v1/admin/group-mappings",
            get(list_group_mappings).post(create_group_mapping),
        )
        .route(
            "/v1/admin/group-mappings/:group_id",
            delete(delete_group_mapping),
        )
        .route("/v1/admin/identity-links/:user_id", put(link_identity))
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// Check the admin bearer token
fn require_admin(ctx: &AppContext, headers: &HeaderMap) -> SyncResult<()> {
    let Some(expected) = ctx.config.admin.token.as_deref() else {
        return Err(SyncError::Authentication(
            "Admin API is disabled".to_string(),
        ));
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if tokens_match(token, expected) => Ok(()),
        Some(_) => Err(SyncError::Authentication("Invalid admin token".to_string())),
        None => Err(SyncError::Authentication(
            "Missing bearer token".to_string(),
        )),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupMappingsResponse {
    pub mappings: Vec<GroupMapping>,
}

async fn list_group_mappings(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> SyncResult<Json<GroupMappingsResponse>> {
    require_admin(&ctx, &headers)?;
    let mappings = ctx.mappings.list_group_mappings().await?;
    Ok(Json(GroupMappingsResponse { mappings }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateGroupMappingRequest {
    pub group_id: GroupId,
    pub iam_group_name: String,
}

async fn create_group_mapping(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<CreateGroupMappingRequest>,
) -> SyncResult<(StatusCode, Json<GroupMapping>)> {
    require_admin(&ctx, &headers)?;
    let mapping = ctx
        .mappings
        .create_group_mapping(req.group_id, &req.iam_group_name)
        .await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

async fn delete_group_mapping(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(group_id): Path<GroupId>,
) -> SyncResult<StatusCode> {
    require_admin(&ctx, &headers)?;
    ctx.mappings.delete_group_mapping(group_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkIdentityRequest {
    pub iam_uid: String,
}

async fn link_identity(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(user_id): Path<UserId>,
    Json(req): Json<LinkIdentityRequest>,
) -> SyncResult<StatusCode> {
    require_admin(&ctx, &headers)?;
    ctx.mappings.link_identity(user_id, &req.iam_uid).await?;
    Ok(StatusCode::NO_CONTENT)
}
