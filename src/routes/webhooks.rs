use anyhow::Context;
use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{OrderStatus, PaymentEntity, PaymentStatus},
    schema::{orders, payments},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/webhooks",
        OpenApiRouter::new().routes(utoipa_axum::routes!(payment_webhook)),
    )
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PaymentWebhookReq {
    pub event: Option<String>,
    pub provider: Option<String>,
    pub data: Option<PaymentWebhookData>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PaymentWebhookData {
    pub payment_id: Option<Uuid>,
    pub provider_payment_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PaymentWebhookRes {
    pub payment: Option<PaymentEntity>,
    pub order_updated: bool,
    pub skipped: bool,
}

/// Map a provider event kind onto the payment/order statuses it implies.
/// Unrecognized kinds are accepted but ignored.
pub(crate) fn map_webhook_event(event: &str) -> Option<(PaymentStatus, Option<OrderStatus>)> {
    match event {
        "payment.paid" => Some((PaymentStatus::Paid, Some(OrderStatus::Paid))),
        "payment.failed" => Some((PaymentStatus::Failed, Some(OrderStatus::Canceled))),
        "payment.canceled" => Some((PaymentStatus::Canceled, Some(OrderStatus::Canceled))),
        _ => None,
    }
}

fn verify_mock_signature(headers: &HeaderMap, secret: &str) -> Result<(), AppError> {
    let signature = headers
        .get("x-mock-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if signature.is_empty() || signature != secret {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Ingest a mock provider event and reflect it on the payment and its
/// order in one transaction.
#[utoipa::path(
    post,
    path = "/payments",
    tags = ["Webhooks"],
    request_body = PaymentWebhookReq,
    responses(
        (status = 200, description = "Processed webhook", body = StdResponse<PaymentWebhookRes, String>),
        (status = 401, description = "Missing or wrong signature"),
        (status = 404, description = "Payment does not exist")
    )
)]
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PaymentWebhookReq>,
) -> Result<impl IntoResponse, AppError> {
    verify_mock_signature(&headers, &state.config.webhook_secret)?;

    if body.provider.as_deref() != Some("mock") {
        return Err(AppError::BadRequest("unsupported payment provider".into()));
    }
    let data = body
        .data
        .ok_or_else(|| AppError::BadRequest("missing webhook data".into()))?;
    let payment_id = data
        .payment_id
        .ok_or_else(|| AppError::BadRequest("payment_id required".into()))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment: QueryResult<PaymentEntity> =
        payments::table.find(payment_id).get_result(conn).await;
    let payment = match payment {
        Ok(payment) => payment,
        Err(DieselError::NotFound) => return Err(AppError::NotFound),
        Err(err) => return Err(AppError::Other(err.into())),
    };

    let Some((payment_status, order_status)) = body.event.as_deref().and_then(map_webhook_event)
    else {
        return Ok(StdResponse {
            data: Some(PaymentWebhookRes {
                payment: None,
                order_updated: false,
                skipped: true,
            }),
            message: Some("Ignored unrecognized event"),
        });
    };

    let provider_ref = data.provider_payment_id.or(payment.provider_ref.clone());
    let order_id = payment.order_id;

    let (updated_payment, order_updated) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let updated_payment: PaymentEntity =
                    diesel::update(payments::table.find(payment_id))
                        .set((
                            payments::status.eq(payment_status.as_str()),
                            payments::provider_ref.eq(provider_ref),
                            payments::failure_code.eq(data.failure_code),
                            payments::failure_message.eq(data.failure_message),
                        ))
                        .returning(PaymentEntity::as_returning())
                        .get_result(conn)
                        .await
                        .context("Failed to update payment status")?;

                let order_updated = match order_status {
                    Some(status) => {
                        diesel::update(orders::table.find(order_id))
                            .set(orders::status.eq(status.as_str()))
                            .execute(conn)
                            .await
                            .context("Failed to update order status")?;
                        true
                    }
                    None => false,
                };

                Ok::<(PaymentEntity, bool), AppError>((updated_payment, order_updated))
            })
        })
        .await?;

    if order_updated {
        state.invalidations.mark_order_views(order_id);
    }

    Ok(StdResponse {
        data: Some(PaymentWebhookRes {
            payment: Some(updated_payment),
            order_updated,
            skipped: false,
        }),
        message: Some("Processed webhook successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_event_marks_payment_and_order_paid() {
        assert_eq!(
            map_webhook_event("payment.paid"),
            Some((PaymentStatus::Paid, Some(OrderStatus::Paid)))
        );
    }

    #[test]
    fn failed_event_cancels_the_order() {
        assert_eq!(
            map_webhook_event("payment.failed"),
            Some((PaymentStatus::Failed, Some(OrderStatus::Canceled)))
        );
    }

    #[test]
    fn canceled_event_cancels_payment_and_order() {
        assert_eq!(
            map_webhook_event("payment.canceled"),
            Some((PaymentStatus::Canceled, Some(OrderStatus::Canceled)))
        );
    }

    #[test]
    fn unrecognized_events_map_to_nothing() {
        assert_eq!(map_webhook_event("payment.refunded"), None);
        assert_eq!(map_webhook_event(""), None);
    }

    #[test]
    fn signature_must_be_present_and_match() {
        let mut headers = HeaderMap::new();
        assert!(verify_mock_signature(&headers, "secret").is_err());

        headers.insert("x-mock-signature", "wrong".parse().unwrap());
        assert!(verify_mock_signature(&headers, "secret").is_err());

        headers.insert("x-mock-signature", "secret".parse().unwrap());
        assert!(verify_mock_signature(&headers, "secret").is_ok());
    }

    #[test]
    fn empty_configured_secret_rejects_everything() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mock-signature", "".parse().unwrap());
        assert!(verify_mock_signature(&headers, "").is_err());
    }
}
