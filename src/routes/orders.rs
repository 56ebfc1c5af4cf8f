use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, QueryResult};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{OrderEntity, OrderItemEntity, PaymentEntity},
    schema::{order_items, orders, payments},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(get_order_status)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct GetOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub payment: Option<PaymentEntity>,
}

/// Fetch one order with its line items and payment.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<GetOrderRes, String>),
        (status = 404, description = "Order does not exist")
    )
)]
async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: QueryResult<OrderEntity> = orders::table.find(id).get_result(conn).await;
    let order = match order {
        Ok(order) => order,
        Err(DieselError::NotFound) => return Err(AppError::NotFound),
        Err(err) => return Err(AppError::Other(err.into())),
    };

    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let payment: Option<PaymentEntity> = payments::table
        .filter(payments::order_id.eq(order.id))
        .first(conn)
        .await
        .optional()
        .context("Failed to get payment")?;

    Ok(StdResponse {
        data: Some(GetOrderRes {
            order,
            order_items: items,
            payment,
        }),
        message: Some("Get order successfully"),
    })
}

#[derive(Serialize, ToSchema)]
pub struct OrderStatusRes {
    pub id: Uuid,
    pub status: String,
    pub customer_id: String,
    pub created_at: DateTime<Utc>,
}

/// Slim status view for result-page polling.
#[utoipa::path(
    get,
    path = "/{id}/status",
    tags = ["Orders"],
    params(
        ("id" = Uuid, Path, description = "Order ID to poll")
    ),
    responses(
        (status = 200, description = "Get order status successfully", body = StdResponse<OrderStatusRes, String>),
        (status = 404, description = "Order does not exist")
    )
)]
async fn get_order_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: QueryResult<OrderEntity> = orders::table.find(id).get_result(conn).await;
    match order {
        Ok(order) => Ok(StdResponse {
            data: Some(OrderStatusRes {
                id: order.id,
                status: order.status,
                customer_id: order.customer_id,
                created_at: order.created_at,
            }),
            message: Some("Get order status successfully"),
        }),
        Err(DieselError::NotFound) => Err(AppError::NotFound),
        Err(err) => Err(AppError::Other(err.into())),
    }
}
