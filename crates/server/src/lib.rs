use api_types::{error::ErrorResponse, user::UserView};
use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::{EngineError, StoreError, User};

pub use server::{ServerState, router, run_with_listener, spawn_with_listener};

mod admin;
mod server;
mod user;

#[derive(Debug)]
pub enum ServerError {
    Engine(EngineError),
    Unauthorized,
    Forbidden(String),
    Generic(String),
}

/// Public view of a record, without the password hash.
pub(crate) fn view(user: &User) -> UserView {
    UserView {
        id: user.id,
        name: user.name.clone(),
        solid_balance: user.solid_balance,
        stock_balance: user.stock_balance,
        is_blocked: user.is_blocked,
        last_farming: user.last_farming,
        created_at: user.created_at,
    }
}

fn status_for_store_error(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidId(_) | StoreError::PreconditionFailed(_) => StatusCode::CONFLICT,
        StoreError::Query(_) => StatusCode::BAD_REQUEST,
        StoreError::Corrupted(_)
        | StoreError::Io(_)
        | StoreError::Json(_)
        | StoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::WrongKey => StatusCode::UNAUTHORIZED,
        EngineError::TooEarlyFarming { .. }
        | EngineError::AlreadyBlocked(_)
        | EngineError::NotBlocked(_) => StatusCode::CONFLICT,
        EngineError::InvalidName(_)
        | EngineError::InvalidPassword(_)
        | EngineError::InvalidAmount(_)
        | EngineError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidSchedule(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::ConversionInterrupted { source, .. } => status_for_engine_error(source),
        EngineError::Store(err) => status_for_store_error(err),
    }
}

fn response_for_engine_error(err: EngineError) -> (StatusCode, ErrorResponse) {
    let status = status_for_engine_error(&err);
    if err.is_server_error() || status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
        let body = ErrorResponse {
            error: "internal server error".to_string(),
            user: None,
        };
        return (status, body);
    }

    tracing::warn!(error = %err, "request rejected");
    let body = ErrorResponse {
        error: err.to_string(),
        user: err.user().map(view),
    };
    (status, body)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ServerError::Engine(err) => response_for_engine_error(err),
            ServerError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "unauthorized".to_string(),
                    user: None,
                },
            ),
            ServerError::Forbidden(error) => {
                (StatusCode::FORBIDDEN, ErrorResponse { error, user: None })
            }
            ServerError::Generic(error) => {
                (StatusCode::BAD_REQUEST, ErrorResponse { error, user: None })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: EngineError) -> StatusCode {
        ServerError::from(err).into_response().status()
    }

    #[test]
    fn missing_user_maps_to_404() {
        assert_eq!(
            status(EngineError::Store(StoreError::NotFound(3))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn wrong_key_maps_to_401() {
        assert_eq!(status(EngineError::WrongKey), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn toggles_and_cooldown_map_to_409() {
        let user = Box::new(User {
            id: 0,
            name: "alice".to_string(),
            password: "hash".to_string(),
            solid_balance: 0,
            stock_balance: 0,
            is_blocked: true,
            last_farming: engine::NEVER_FARMED,
            created_at: engine::NEVER_FARMED,
        });
        assert_eq!(
            status(EngineError::AlreadyBlocked(user.clone())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(EngineError::TooEarlyFarming {
                user,
                ready_at: engine::NEVER_FARMED,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn validation_maps_to_422() {
        assert_eq!(
            status(EngineError::InvalidName("x".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn malformed_query_maps_to_400() {
        assert_eq!(
            status(engine::QueryError::DanglingCombinator.into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn storage_failure_maps_to_500() {
        let err = EngineError::Store(StoreError::Io(std::io::Error::other("disk")));
        assert_eq!(status(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn interrupted_sweep_maps_like_its_cause() {
        let err = EngineError::ConversionInterrupted {
            converted: Vec::new(),
            source: Box::new(EngineError::Store(StoreError::NotFound(2))),
        };
        assert_eq!(status(err), StatusCode::NOT_FOUND);
        let err = EngineError::ConversionInterrupted {
            converted: Vec::new(),
            source: Box::new(EngineError::Store(StoreError::Io(std::io::Error::other("disk")))),
        };
        assert_eq!(status(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn generic_maps_to_400() {
        let res = ServerError::Generic("bad".to_string()).into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
