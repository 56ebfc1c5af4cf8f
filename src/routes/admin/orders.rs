use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    inventory::{self, StockAdjustment},
    models::{OrderEntity, OrderItemEntity, OrderStatus, PaymentEntity},
    schema::{order_items, orders, payments, variants},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_admin_orders))
            .routes(utoipa_axum::routes!(get_admin_order))
            .routes(utoipa_axum::routes!(set_order_status)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct AdminOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub payment: Option<PaymentEntity>,
}

/// Fetch every order, newest first, with items and payment.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Admin / Orders"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List all orders", body = StdResponse<Vec<AdminOrderRes>, String>)
    )
)]
async fn get_admin_orders(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order_rows: Vec<OrderEntity> = orders::table
        .order_by(orders::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get orders")?;

    let order_ids: Vec<Uuid> = order_rows.iter().map(|order| order.id).collect();

    let item_rows: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let payment_rows: Vec<PaymentEntity> = payments::table
        .filter(payments::order_id.eq_any(&order_ids))
        .get_results(conn)
        .await
        .context("Failed to get payments")?;

    let mut item_groups: HashMap<Uuid, Vec<OrderItemEntity>> = HashMap::new();
    for item in item_rows {
        item_groups.entry(item.order_id).or_default().push(item);
    }
    let mut payment_map: HashMap<Uuid, PaymentEntity> = payment_rows
        .into_iter()
        .map(|payment| (payment.order_id, payment))
        .collect();

    let res: Vec<AdminOrderRes> = order_rows
        .into_iter()
        .map(|order| AdminOrderRes {
            order_items: item_groups.remove(&order.id).unwrap_or_default(),
            payment: payment_map.remove(&order.id),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(res),
        message: Some("Get orders successfully"),
    })
}

/// Fetch one order with items and payment.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Admin / Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<AdminOrderRes, String>),
        (status = 404, description = "Order does not exist")
    )
)]
async fn get_admin_order(
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
        data: Some(AdminOrderRes {
            order,
            order_items: items,
            payment,
        }),
        message: Some("Get order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct SetOrderStatusReq {
    pub status: String,
}

#[derive(Serialize, ToSchema)]
pub struct SetOrderStatusRes {
    pub order: OrderEntity,
    pub stock_adjustments: Vec<StockAdjustment>,
}

/// Move an order to a new status, reconciling variant stock with the
/// transition's direction inside one transaction.
///
/// The stock for every referenced variant is read in one batch inside the
/// transaction before any write, so multiple lines on the same variant
/// cannot race each other; an insufficient variant rolls the whole
/// operation back.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Admin / Orders"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Order ID to transition")
    ),
    request_body = SetOrderStatusReq,
    responses(
        (status = 200, description = "Updated order status successfully", body = StdResponse<SetOrderStatusRes, String>),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Order does not exist"),
        (status = 409, description = "A variant would drop below zero stock")
    )
)]
async fn set_order_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SetOrderStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let new_status = OrderStatus::parse(&body.status).ok_or_else(|| {
        AppError::BadRequest(format!("{} is not a valid order status", body.status))
    })?;

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

    let old_status = OrderStatus::parse(&order.status).ok_or_else(|| {
        AppError::Other(anyhow::anyhow!(
            "order {} carries unknown status {}",
            order.id,
            order.status
        ))
    })?;

    if old_status == new_status {
        // No-op transition still refreshes downstream views.
        state.invalidations.mark_order_views(order.id);
        return Ok(StdResponse {
            data: Some(SetOrderStatusRes {
                order,
                stock_adjustments: Vec::new(),
            }),
            message: Some("Order status unchanged"),
        });
    }

    let direction = inventory::stock_delta_direction(old_status, new_status);

    let (updated_order, adjustments) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let mut adjustments = Vec::new();

                if direction != 0 {
                    let items: Vec<OrderItemEntity> = order_items::table
                        .filter(order_items::order_id.eq(id))
                        .get_results(conn)
                        .await
                        .context("Failed to get order items")?;

                    let lines: Vec<(Uuid, i32)> = items
                        .iter()
                        .filter_map(|item| item.variant_id.map(|variant_id| (variant_id, item.qty)))
                        .collect();

                    if !lines.is_empty() {
                        let variant_ids: Vec<Uuid> =
                            lines.iter().map(|(variant_id, _)| *variant_id).collect();

                        let stock_rows: Vec<(Uuid, i32)> = variants::table
                            .filter(variants::id.eq_any(&variant_ids))
                            .select((variants::id, variants::stock))
                            .get_results(conn)
                            .await
                            .context("Failed to get variant stock")?;
                        let current: HashMap<Uuid, i32> = stock_rows.into_iter().collect();

                        adjustments =
                            inventory::plan_stock_adjustments(&lines, &current, direction)?;

                        for adjustment in &adjustments {
                            diesel::update(variants::table.find(adjustment.variant_id))
                                .set(variants::stock.eq(adjustment.next_stock))
                                .execute(conn)
                                .await
                                .context("Failed to update variant stock")?;
                        }
                    }
                }

                let updated_order: OrderEntity = diesel::update(orders::table.find(id))
                    .set(orders::status.eq(new_status.as_str()))
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update order status")?;

                Ok::<(OrderEntity, Vec<StockAdjustment>), AppError>((updated_order, adjustments))
            })
        })
        .await?;

    state.invalidations.mark_order_views(updated_order.id);

    Ok(StdResponse {
        data: Some(SetOrderStatusRes {
            order: updated_order,
            stock_adjustments: adjustments,
        }),
        message: Some("Updated order status successfully"),
    })
}
