//! Cart endpoints. Every call acts on the caller's own cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common::{AggregateId, UserId};
use domain::Cart;
use serde::{Deserialize, Serialize};

use super::{ActingUser, AppState, parse_aggregate_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct SetItemRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: AggregateId,
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub user_id: UserId,
    pub items: Vec<CartItemResponse>,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            user_id: cart.user_id(),
            items: cart
                .items()
                .into_iter()
                .map(|item| CartItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: AggregateId,
    pub total_cents: i64,
    pub item_count: usize,
}

/// GET /cart
pub async fn get(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart = state.storefront.carts().cart(user_id).await?;
    Ok(Json(CartResponse::from(cart)))
}

/// PUT /cart/items/{product_id}
///
/// Overwrites the line's quantity; zero removes it.
pub async fn set_item(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Path(product_id): Path<String>,
    Json(req): Json<SetItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_aggregate_id(&product_id)?;
    let cart = state
        .storefront
        .carts()
        .set_item(user_id, product_id, req.quantity)
        .await?;
    Ok(Json(CartResponse::from(cart)))
}

/// DELETE /cart/items/{product_id}
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let product_id = parse_aggregate_id(&product_id)?;
    let cart = state.storefront.carts().remove_item(user_id, product_id).await?;
    Ok(Json(CartResponse::from(cart)))
}

/// POST /cart/checkout
///
/// Answers 202: the order itself is created once the order service has
/// consumed the request.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    ActingUser(user_id): ActingUser,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.storefront.carts().checkout(user_id).await?;

    metrics::counter!("api_checkouts_accepted_total").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckoutResponse {
            order_id: handle.order_id,
            total_cents: handle.total.cents(),
            item_count: handle.item_count,
        }),
    ))
}
