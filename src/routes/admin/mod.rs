pub mod images;
pub mod orders;
pub mod products;

use axum::{
    Json,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
};

const ADMIN_COOKIE: &str = "admin";
const SESSION_HOURS: i64 = 12;

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    let guarded = OpenApiRouter::new()
        .merge(products::routes_with_openapi())
        .merge(images::routes_with_openapi())
        .merge(orders::routes_with_openapi())
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            admin_authorization,
        ));

    utoipa_axum::router::OpenApiRouter::new().nest(
        "/admin",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(login))
            .routes(utoipa_axum::routes!(logout))
            .merge(guarded),
    )
}

/// Gate for the back office: a signed session cookie or a bearer token.
pub async fn admin_authorization(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let jar = SignedCookieJar::from_headers(request.headers(), state.cookie_key.clone());
    let session_ok = jar
        .get(ADMIN_COOKIE)
        .map(|cookie| cookie.value() == "1")
        .unwrap_or(false);

    let bearer_ok = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == state.config.admin_token)
        .unwrap_or(false);

    if !(session_ok || bearer_ok) {
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReq {
    pub token: String,
}

/// Open an admin session when the shared token matches.
#[utoipa::path(
    post,
    path = "/login",
    tags = ["Admin"],
    request_body = LoginReq,
    responses(
        (status = 200, description = "Logged in successfully", body = StdResponse<String, String>),
        (status = 401, description = "Wrong token")
    )
)]
async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<LoginReq>,
) -> Result<impl IntoResponse, AppError> {
    if body.token != state.config.admin_token {
        return Err(AppError::Unauthorized);
    }

    let jar = jar.add(
        Cookie::build((ADMIN_COOKIE, "1"))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::hours(SESSION_HOURS))
            .build(),
    );

    Ok((
        jar,
        StdResponse::<String, _> {
            data: None,
            message: Some("Logged in successfully"),
        },
    ))
}

/// Drop the admin session cookie.
#[utoipa::path(
    post,
    path = "/logout",
    tags = ["Admin"],
    responses(
        (status = 200, description = "Logged out successfully", body = StdResponse<String, String>)
    )
)]
async fn logout(jar: SignedCookieJar) -> Result<impl IntoResponse, AppError> {
    let jar = jar.remove(Cookie::build((ADMIN_COOKIE, "")).path("/").build());

    Ok((
        jar,
        StdResponse::<String, _> {
            data: None,
            message: Some("Logged out successfully"),
        },
    ))
}
