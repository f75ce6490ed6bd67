//! Handlers acting on the authenticated user, plus sign up and lookup.

use api_types::user::{
    BuyStocks, ChangeName, ChangePassword, FarmResponse, SignUp, UserResponse,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use engine::User;

use crate::{ServerError, server::ServerState, view};

pub async fn sign_up(
    State(state): State<ServerState>,
    Json(payload): Json<SignUp>,
) -> Result<(StatusCode, Json<UserResponse>), ServerError> {
    let user = state
        .service
        .sign_up(&payload.name, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse { user: view(&user) })))
}

pub async fn get(
    State(state): State<ServerState>,
    Path(id): Path<u64>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.service.get(id).await?;
    Ok(Json(UserResponse { user: view(&user) }))
}

pub async fn farm(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
) -> Result<Json<FarmResponse>, ServerError> {
    let farmed = state.service.farm(user.id).await?;
    Ok(Json(FarmResponse {
        user: view(&farmed.user),
        amount: farmed.amount,
    }))
}

pub async fn buy(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Json(payload): Json<BuyStocks>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.service.buy_stocks(user.id, payload.num).await?;
    Ok(Json(UserResponse { user: view(&user) }))
}

pub async fn change_name(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Json(payload): Json<ChangeName>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state.service.update_name(user.id, &payload.name).await?;
    Ok(Json(UserResponse { user: view(&user) }))
}

pub async fn change_password(
    Extension(user): Extension<User>,
    State(state): State<ServerState>,
    Json(payload): Json<ChangePassword>,
) -> Result<Json<UserResponse>, ServerError> {
    let user = state
        .service
        .update_password(user.id, &payload.password)
        .await?;
    Ok(Json(UserResponse { user: view(&user) }))
}
