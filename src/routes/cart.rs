use anyhow::Context;
use axum::{Json, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::SignedCookieJar;
use diesel_async::AsyncPgConnection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cart::{self, CartItem, CartLine},
    invalidation::StaleView,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/cart",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_cart, clear_cart))
            .routes(utoipa_axum::routes!(
                add_cart_item,
                update_cart_item,
                remove_cart_item
            )),
    )
}

#[derive(Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub total: i64,
}

/// Price the given lines against the live catalog and rewrite the cookie
/// when the self-heal pruned anything.
async fn priced_view(
    conn: &mut AsyncPgConnection,
    jar: SignedCookieJar,
    lines: Vec<CartLine>,
) -> Result<(SignedCookieJar, CartView), AppError> {
    if lines.is_empty() {
        return Ok((
            jar,
            CartView {
                items: Vec::new(),
                total: 0,
            },
        ));
    }

    let catalog = cart::load_catalog(conn, &lines).await?;
    let priced = cart::price_lines(&lines, &catalog);

    let jar = match &priced.healed_lines {
        Some(healed) => cart::write_lines(jar, healed),
        None => jar,
    };

    Ok((
        jar,
        CartView {
            total: priced.total(),
            items: priced.items,
        },
    ))
}

/// Fetch the cart with current prices.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Cart"],
    responses(
        (status = 200, description = "Get cart successfully", body = StdResponse<CartView, String>)
    )
)]
async fn get_cart(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let lines = cart::read_lines(&jar);
    let (jar, view) = priced_view(conn, jar, lines).await?;

    Ok((
        jar,
        StdResponse {
            data: Some(view),
            message: Some("Get cart successfully"),
        },
    ))
}

#[derive(Deserialize, ToSchema)]
pub struct CartLineReq {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[serde(default = "default_qty")]
    pub qty: i32,
}

fn default_qty() -> i32 {
    1
}

#[derive(Deserialize, ToSchema)]
pub struct CartLineKeyReq {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}

/// Add a line to the cart, merging with an existing (product, variant)
/// line. Stock is not checked here; it is enforced at status-transition
/// time.
#[utoipa::path(
    post,
    path = "/items",
    tags = ["Cart"],
    request_body = CartLineReq,
    responses(
        (status = 200, description = "Added cart line successfully", body = StdResponse<CartView, String>)
    )
)]
async fn add_cart_item(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<CartLineReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut lines = cart::read_lines(&jar);
    cart::add_line(&mut lines, body.product_id, body.variant_id, body.qty);
    let jar = cart::write_lines(jar, &lines);

    let (jar, view) = priced_view(conn, jar, lines).await?;
    state.invalidations.mark(StaleView::Cart);

    Ok((
        jar,
        StdResponse {
            data: Some(view),
            message: Some("Added cart line successfully"),
        },
    ))
}

/// Set the quantity of an existing cart line. A line that is not present
/// is not created.
#[utoipa::path(
    patch,
    path = "/items",
    tags = ["Cart"],
    request_body = CartLineReq,
    responses(
        (status = 200, description = "Updated cart line successfully", body = StdResponse<CartView, String>)
    )
)]
async fn update_cart_item(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<CartLineReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut lines = cart::read_lines(&jar);
    let jar = if cart::update_qty(&mut lines, body.product_id, body.variant_id, body.qty) {
        cart::write_lines(jar, &lines)
    } else {
        jar
    };

    let (jar, view) = priced_view(conn, jar, lines).await?;
    state.invalidations.mark(StaleView::Cart);

    Ok((
        jar,
        StdResponse {
            data: Some(view),
            message: Some("Updated cart line successfully"),
        },
    ))
}

/// Remove one cart line.
#[utoipa::path(
    delete,
    path = "/items",
    tags = ["Cart"],
    request_body = CartLineKeyReq,
    responses(
        (status = 200, description = "Removed cart line successfully", body = StdResponse<CartView, String>)
    )
)]
async fn remove_cart_item(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<CartLineKeyReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut lines = cart::read_lines(&jar);
    cart::remove_line(&mut lines, body.product_id, body.variant_id);
    let jar = cart::write_lines(jar, &lines);

    let (jar, view) = priced_view(conn, jar, lines).await?;
    state.invalidations.mark(StaleView::Cart);

    Ok((
        jar,
        StdResponse {
            data: Some(view),
            message: Some("Removed cart line successfully"),
        },
    ))
}

/// Empty the cart.
#[utoipa::path(
    delete,
    path = "/",
    tags = ["Cart"],
    responses(
        (status = 200, description = "Cleared cart successfully", body = StdResponse<CartView, String>)
    )
)]
async fn clear_cart(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<impl IntoResponse, AppError> {
    let jar = cart::write_lines(jar, &[]);
    state.invalidations.mark(StaleView::Cart);

    Ok((
        jar,
        StdResponse {
            data: Some(CartView {
                items: Vec::new(),
                total: 0,
            }),
            message: Some("Cleared cart successfully"),
        },
    ))
}
