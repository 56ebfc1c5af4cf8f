use anyhow::Context;
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{CreatePaymentEntity, OrderEntity, OrderItemEntity, PaymentEntity, PaymentStatus},
    schema::{order_items, orders, payments},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(initiate_payment))
            .routes(utoipa_axum::routes!(mock_approve))
            .routes(utoipa_axum::routes!(mock_fail)),
    )
}

/// Sum the snapshot prices of an order's items. The stored subtotal is
/// ignored on purpose: the invariant is defined over unit_price x qty.
pub(crate) fn items_total(items: &[OrderItemEntity]) -> i64 {
    items
        .iter()
        .map(|item| i64::from(item.unit_price) * i64::from(item.qty))
        .sum()
}

#[derive(Deserialize, ToSchema)]
pub struct InitiatePaymentReq {
    pub order_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct InitiatePaymentRes {
    pub payment: PaymentEntity,
    pub approve_url: String,
    pub fail_url: String,
}

/// Start (or resume) the mock payment flow for an order.
///
/// Re-verifies the order-total invariant before any Payment row exists;
/// re-initiation returns the existing row.
#[utoipa::path(
    post,
    path = "/initiate",
    tags = ["Payments"],
    request_body = InitiatePaymentReq,
    responses(
        (status = 200, description = "Payment initiated successfully", body = StdResponse<InitiatePaymentRes, String>),
        (status = 400, description = "Order total disagrees with its line items"),
        (status = 404, description = "Order does not exist")
    )
)]
async fn initiate_payment(
    State(state): State<AppState>,
    Json(body): Json<InitiatePaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: QueryResult<OrderEntity> = orders::table.find(body.order_id).get_result(conn).await;
    let order = match order {
        Ok(order) => order,
        Err(DieselError::NotFound) => return Err(AppError::NotFound),
        Err(err) => return Err(AppError::Other(err.into())),
    };

    if order.total_amount <= 0 {
        return Err(AppError::BadRequest("order total must be positive".into()));
    }

    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq(order.id))
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let items_sum = items_total(&items);
    if items_sum != order.total_amount {
        return Err(AppError::AmountMismatch {
            items_total: items_sum,
            total_amount: order.total_amount,
        });
    }

    let existing: Option<PaymentEntity> = payments::table
        .filter(payments::order_id.eq(order.id))
        .first(conn)
        .await
        .optional()
        .context("Failed to get payment")?;

    let payment = match existing {
        Some(payment) => payment,
        None => diesel::insert_into(payments::table)
            .values(CreatePaymentEntity {
                order_id: order.id,
                amount: order.total_amount,
                currency: "KRW".into(),
                provider: "mock".into(),
                status: PaymentStatus::Init.as_str().into(),
            })
            .returning(PaymentEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to create payment")?,
    };

    let base = &state.config.app_url;
    let approve_url = format!("{base}/payments/mock/approve?payment_id={}", payment.id);
    let fail_url = format!("{base}/payments/mock/fail?payment_id={}", payment.id);

    Ok(StdResponse {
        data: Some(InitiatePaymentRes {
            payment,
            approve_url,
            fail_url,
        }),
        message: Some("Payment initiated successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
pub struct MockPayQuery {
    pub payment_id: Uuid,
}

/// Post a signed webhook event to this service's own endpoint, the way the
/// real provider would.
async fn forward_webhook(
    state: &AppState,
    payload: serde_json::Value,
) -> Result<serde_json::Value, AppError> {
    let url = format!("{}/webhooks/payments", state.config.app_url);
    let response = state
        .http_client
        .post(url)
        .header("x-mock-signature", &state.config.webhook_secret)
        .json(&payload)
        .send()
        .await
        .map_err(|_| AppError::ServiceUnreachable("PaymentWebhook".into()))?;

    Ok(response
        .json()
        .await
        .context("Failed to parse webhook response")?)
}

/// Simulate the provider approving the payment.
#[utoipa::path(
    get,
    path = "/mock/approve",
    tags = ["Payments"],
    params(MockPayQuery),
    responses(
        (status = 200, description = "Forwarded mock approval", body = StdResponse<serde_json::Value, String>)
    )
)]
async fn mock_approve(
    State(state): State<AppState>,
    Query(query): Query<MockPayQuery>,
) -> Result<impl IntoResponse, AppError> {
    let forwarded = forward_webhook(
        &state,
        serde_json::json!({
            "event": "payment.paid",
            "provider": "mock",
            "data": {
                "payment_id": query.payment_id,
                "provider_payment_id": format!("mock_{}", query.payment_id),
            },
        }),
    )
    .await?;

    Ok(StdResponse {
        data: Some(forwarded),
        message: Some("Forwarded mock approval"),
    })
}

/// Simulate the provider failing the payment.
#[utoipa::path(
    get,
    path = "/mock/fail",
    tags = ["Payments"],
    params(MockPayQuery),
    responses(
        (status = 200, description = "Forwarded mock failure", body = StdResponse<serde_json::Value, String>)
    )
)]
async fn mock_fail(
    State(state): State<AppState>,
    Query(query): Query<MockPayQuery>,
) -> Result<impl IntoResponse, AppError> {
    let forwarded = forward_webhook(
        &state,
        serde_json::json!({
            "event": "payment.failed",
            "provider": "mock",
            "data": {
                "payment_id": query.payment_id,
                "failure_code": "MOCK_ERR",
                "failure_message": "User canceled",
            },
        }),
    )
    .await?;

    Ok(StdResponse {
        data: Some(forwarded),
        message: Some("Forwarded mock failure"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(unit_price: i32, qty: i32, subtotal: Option<i64>) -> OrderItemEntity {
        OrderItemEntity {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: None,
            unit_price,
            qty,
            subtotal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn items_total_sums_unit_price_times_qty() {
        let items = vec![item(200_000, 2, None), item(10_000, 3, None)];
        assert_eq!(items_total(&items), 430_000);
    }

    #[test]
    fn items_total_ignores_stored_subtotals() {
        // A tampered subtotal must not mask a mismatch with the order total.
        let items = vec![item(3_000, 3, Some(10_000))];
        assert_eq!(items_total(&items), 9_000);
    }

    #[test]
    fn items_total_of_empty_order_is_zero() {
        assert_eq!(items_total(&[]), 0);
    }
}
