//! Product catalog endpoints, backed by the inventory ledger.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common::AggregateId;
use domain::{Money, Product};
use inventory::LedgerError;
use saga::SagaError;
use serde::{Deserialize, Serialize};
use version_store::{Version, Versioned};

use super::{AppState, parse_aggregate_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub title: String,
    pub price_cents: i64,
    pub quantity: u32,
}

/// Replaces every editable field. `version` is the one the caller read.
#[derive(Deserialize)]
pub struct UpdateProductRequest {
    pub title: String,
    pub price_cents: i64,
    pub quantity: u32,
    pub version: i64,
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: AggregateId,
    pub title: String,
    pub price_cents: i64,
    pub quantity: u32,
    pub version: i64,
}

impl From<Versioned<Product>> for ProductResponse {
    fn from(product: Versioned<Product>) -> Self {
        Self {
            id: product.id,
            title: product.data.title().to_string(),
            price_cents: product.data.price().cents(),
            quantity: product.data.quantity(),
            version: product.version.as_i64(),
        }
    }
}

/// POST /products
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .storefront
        .products()
        .create_product(req.title, Money::from_cents(req.price_cents), req.quantity)
        .await
        .map_err(ledger_error)?;

    Ok((StatusCode::CREATED, Json(ProductResponse::from(product))))
}

/// PUT /products/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_aggregate_id(&id)?;
    let product = state
        .storefront
        .products()
        .update_product(
            product_id,
            Version::new(req.version),
            req.title,
            Money::from_cents(req.price_cents),
            req.quantity,
        )
        .await
        .map_err(ledger_error)?;

    Ok(Json(ProductResponse::from(product)))
}

/// GET /products/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_aggregate_id(&id)?;
    let product = state
        .storefront
        .products()
        .product(product_id)
        .await
        .map_err(ledger_error)?
        .ok_or_else(|| ApiError::NotFound(format!("product not found: {product_id}")))?;

    Ok(Json(ProductResponse::from(product)))
}

/// Unknown products are 404 here, unlike inside a cart where they are bad input.
fn ledger_error(err: LedgerError) -> ApiError {
    match err {
        LedgerError::ProductNotFound(id) => ApiError::NotFound(format!("product not found: {id}")),
        other => SagaError::from(other).into(),
    }
}
