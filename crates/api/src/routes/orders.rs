//! Order endpoints: read, cancel and pay.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{Aggregate, CancelReason, Order, OrderStatus, Payment};
use serde::{Deserialize, Serialize};

use super::{ActingUser, AppState, parse_aggregate_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct PayRequest {
    pub payment_token: String,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: AggregateId,
    pub title: String,
    pub price_cents: i64,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: AggregateId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id(),
            user_id: order.user_id(),
            status: order.status(),
            items: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id,
                    title: line.title_snapshot.clone(),
                    price_cents: line.price_snapshot.cents(),
                    quantity: line.quantity,
                })
                .collect(),
            total_cents: order.total().cents(),
            created_at: order.created_at(),
            expires_at: order.expires_at(),
            cancel_reason: order.cancel_reason(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: AggregateId,
    pub order_id: AggregateId,
    pub charge_id: String,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            charge_id: payment.charge_id,
            amount_cents: payment.amount.cents(),
            created_at: payment.created_at,
        }
    }
}

/// GET /orders/{id}
///
/// 404 until the order service has consumed the checkout's request.
pub async fn get(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.storefront.orders().order(order_id, user_id).await?;
    Ok(Json(OrderResponse::from(order)))
}

/// POST /orders/{id}/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.storefront.orders().cancel_order(order_id, user_id).await?;

    tracing::info!(%order_id, status = %order.status(), "order cancel requested");
    Ok(Json(OrderResponse::from(order)))
}

/// POST /orders/{id}/payments
pub async fn pay(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Path(id): Path<String>,
    Json(req): Json<PayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    if req.payment_token.trim().is_empty() {
        return Err(ApiError::BadRequest("payment_token must not be empty".to_string()));
    }

    let payment = state
        .storefront
        .payments()
        .charge_payment(order_id, user_id, &req.payment_token)
        .await?;

    Ok((StatusCode::CREATED, Json(PaymentResponse::from(payment))))
}
