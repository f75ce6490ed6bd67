use api_types::{
    admin::{TargetUser, UserList, UserSearch},
    user::UserResponse,
};
use axum::{Json, extract::State};
use engine::Query;

use crate::{ServerError, server::ServerState, view};

pub async fn block(
    State(state): State<ServerState>,
    Json(payload): Json<TargetUser>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.service.block(payload.id).await?;
    Ok(Json(UserResponse { user: view(&user) }))
}

pub async fn unblock(
    State(state): State<ServerState>,
    Json(payload): Json<TargetUser>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.service.unblock(payload.id).await?;
    Ok(Json(UserResponse { user: view(&user) }))
}

/// Run a query over every user.
pub async fn search(
    State(state): State<ServerState>,
    Json(payload): Json<UserSearch>,
) -> Result<Json<UserList>, ServerError> {
    let query: Query = serde_json::from_value(payload.query)
        .map_err(|err| ServerError::Generic(format!("invalid query: {err}")))?;
    let users = state.service.search(&query, payload.limit).await?;
    Ok(Json(UserList {
        users: users.iter().map(view).collect(),
    }))
}
