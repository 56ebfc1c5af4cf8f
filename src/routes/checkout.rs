use anyhow::Context;
use axum::{Json, extract::State, response::IntoResponse};
use axum_extra::extract::cookie::SignedCookieJar;
use diesel::SelectableHelper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    cart,
    invalidation::StaleView,
    models::{CreateOrderEntity, CreateOrderItemEntity, OrderEntity, OrderItemEntity, OrderStatus},
    schema::{order_items, orders},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/checkout",
        OpenApiRouter::new().routes(utoipa_axum::routes!(create_order)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct CheckoutReq {
    pub customer_id: Option<String>,
    pub receiver_name: String,
    pub phone: String,
    pub address1: String,
    pub address2: Option<String>,
    pub postal_code: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
}

/// Turn the cart into a PENDING order with snapshot prices, then clear the
/// cart cookie. Stock is not touched; the status reconciler commits
/// inventory when the sale is confirmed.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Checkout"],
    request_body = CheckoutReq,
    responses(
        (status = 200, description = "Created order successfully", body = StdResponse<CheckoutRes, String>),
        (status = 400, description = "Empty cart or missing shipping fields")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<CheckoutReq>,
) -> Result<impl IntoResponse, AppError> {
    for (field, value) in [
        ("receiver_name", &body.receiver_name),
        ("phone", &body.phone),
        ("address1", &body.address1),
        ("postal_code", &body.postal_code),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(format!("{field} is required")));
        }
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let lines = cart::read_lines(&jar);
    if lines.is_empty() {
        return Err(AppError::BadRequest("cart is empty".into()));
    }

    let catalog = cart::load_catalog(conn, &lines).await?;
    let priced = cart::price_lines(&lines, &catalog);
    if priced.items.is_empty() {
        return Err(AppError::BadRequest("cart is empty".into()));
    }

    let total_amount = priced.total();
    let customer_id = body
        .customer_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("guest-{}", Uuid::new_v4()));

    let (order, created_items) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        customer_id,
                        status: OrderStatus::Pending.as_str().into(),
                        total_amount,
                        ship_name: body.receiver_name,
                        ship_phone: body.phone,
                        ship_address1: body.address1,
                        ship_address2: body.address2,
                        ship_postal_code: body.postal_code,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to create order")?;

                let mut new_items = Vec::with_capacity(priced.items.len());
                for item in &priced.items {
                    let unit_price = i32::try_from(item.unit_price)
                        .map_err(|_| AppError::BadRequest("unit price out of range".into()))?;
                    new_items.push(CreateOrderItemEntity {
                        order_id: order.id,
                        product_id: item.product.id,
                        variant_id: item.variant.as_ref().map(|variant| variant.id),
                        unit_price,
                        qty: item.line.qty,
                        subtotal: Some(item.subtotal),
                    });
                }

                let created_items: Vec<OrderItemEntity> =
                    diesel::insert_into(order_items::table)
                        .values(new_items)
                        .returning(OrderItemEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to create order items")?;

                Ok::<(OrderEntity, Vec<OrderItemEntity>), AppError>((order, created_items))
            })
        })
        .await?;

    let jar = cart::write_lines(jar, &[]);
    state.invalidations.mark(StaleView::AdminOrders);
    state.invalidations.mark(StaleView::Cart);

    Ok((
        jar,
        StdResponse {
            data: Some(CheckoutRes {
                order,
                order_items: created_items,
            }),
            message: Some("Created order successfully"),
        },
    ))
}
