use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, Error as AxumError, Header, authorization::Basic},
};
use engine::UserService;

use crate::{ServerError, admin, user};

static KEY_HEADER: HeaderName = HeaderName::from_static("key");
static USER_ID_HEADER: HeaderName = HeaderName::from_static("user-id");

#[derive(Clone)]
pub struct ServerState {
    pub service: UserService,
}

fn header_str<'i, I>(values: &mut I) -> Result<&'i str, AxumError>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let value = values.next().ok_or_else(AxumError::invalid)?;
    value.to_str().map_err(|_| AxumError::invalid())
}

/// Shared administration key, sent in the "key" header.
#[derive(Debug)]
struct KeyHeader(String);

impl Header for KeyHeader {
    fn name() -> &'static HeaderName {
        &KEY_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(KeyHeader(header_str(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        match HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode key header"),
        }
    }
}

/// User to act as when authenticating with the key.
#[derive(Debug)]
struct UserIdHeader(u64);

impl Header for UserIdHeader {
    fn name() -> &'static HeaderName {
        &USER_ID_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        let Ok(value) = header_str(values)?.parse() else {
            return Err(AxumError::invalid());
        };
        Ok(UserIdHeader(value))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        values.extend(std::iter::once(HeaderValue::from(self.0)));
    }
}

/// Resolve the acting user, either from Basic `id:password` credentials or
/// from the shared key plus a "user-id" header. Blocked users are refused.
async fn auth(
    basic: Option<TypedHeader<Authorization<Basic>>>,
    key: Option<TypedHeader<KeyHeader>>,
    user_id: Option<TypedHeader<UserIdHeader>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let user = match (key, user_id, basic) {
        (Some(TypedHeader(key)), Some(TypedHeader(user_id)), _) => {
            state.service.sign_in_with_key(&key.0, user_id.0).await?
        }
        (_, _, Some(TypedHeader(basic))) => {
            let Ok(id) = basic.username().parse::<u64>() else {
                return Err(ServerError::Unauthorized);
            };
            if basic.password().is_empty() {
                return Err(ServerError::Unauthorized);
            }
            state
                .service
                .sign_in(id, basic.password())
                .await?
                .ok_or(ServerError::Unauthorized)?
        }
        _ => return Err(ServerError::Unauthorized),
    };

    if user.is_blocked {
        return Err(ServerError::Forbidden(format!("user {} is blocked", user.id)));
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Only requests carrying the shared key pass.
async fn admin_only(
    key: Option<TypedHeader<KeyHeader>>,
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    match key {
        Some(TypedHeader(key)) if state.service.check_key(&key.0) => Ok(next.run(request).await),
        _ => Err(ServerError::Unauthorized),
    }
}

pub fn router(state: ServerState) -> Router {
    let public = Router::new()
        .route("/signup", post(user::sign_up))
        .route("/user/{id}", get(user::get));

    let authenticated = Router::new()
        .route("/farm", patch(user::farm))
        .route("/buy", patch(user::buy))
        .route("/change/name", patch(user::change_name))
        .route("/change/password", patch(user::change_password))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    let admin = Router::new()
        .route("/block", patch(admin::block))
        .route("/unblock", patch(admin::unblock))
        .route("/users/search", post(admin::search))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_only));

    public
        .merge(authenticated)
        .merge(admin)
        .with_state(state)
}

pub async fn run_with_listener(
    service: UserService,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(ServerState { service })).await
}

pub fn spawn_with_listener(
    service: UserService,
    listener: tokio::net::TcpListener,
) -> Result<SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(service, listener).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
