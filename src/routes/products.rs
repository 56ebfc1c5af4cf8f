use std::collections::HashMap;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, QueryResult};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{ProductEntity, ProductImageEntity, VariantEntity},
    schema::{product_images, products, variants},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/products",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_products))
            .routes(utoipa_axum::routes!(get_product_by_slug)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct ProductRes {
    pub product: ProductEntity,
    pub images: Vec<ProductImageEntity>,
    pub variants: Vec<VariantEntity>,
}

/// Attach images (by sort) and variants (by name) to a page of products in
/// two batched queries.
pub(crate) async fn attach_relations(
    conn: &mut AsyncPgConnection,
    product_rows: Vec<ProductEntity>,
) -> Result<Vec<ProductRes>, AppError> {
    let product_ids: Vec<Uuid> = product_rows.iter().map(|product| product.id).collect();

    let image_rows: Vec<ProductImageEntity> = product_images::table
        .filter(product_images::product_id.eq_any(&product_ids))
        .order_by(product_images::sort.asc())
        .get_results(conn)
        .await
        .context("Failed to get product images")?;

    let variant_rows: Vec<VariantEntity> = variants::table
        .filter(variants::product_id.eq_any(&product_ids))
        .order_by(variants::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get variants")?;

    let mut images: HashMap<Uuid, Vec<ProductImageEntity>> = HashMap::new();
    for image in image_rows {
        images.entry(image.product_id).or_default().push(image);
    }

    let mut variant_groups: HashMap<Uuid, Vec<VariantEntity>> = HashMap::new();
    for variant in variant_rows {
        variant_groups
            .entry(variant.product_id)
            .or_default()
            .push(variant);
    }

    Ok(product_rows
        .into_iter()
        .map(|product| ProductRes {
            images: images.remove(&product.id).unwrap_or_default(),
            variants: variant_groups.remove(&product.id).unwrap_or_default(),
            product,
        })
        .collect())
}

/// Fetch the published storefront catalog, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Products"],
    responses(
        (status = 200, description = "List published products", body = StdResponse<Vec<ProductRes>, String>)
    )
)]
async fn get_products(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product_rows: Vec<ProductEntity> = products::table
        .filter(products::published.eq(true))
        .order_by(products::created_at.desc())
        .get_results(conn)
        .await
        .context("Failed to get products")?;

    let res = attach_relations(conn, product_rows).await?;

    Ok(StdResponse {
        data: Some(res),
        message: Some("Get products successfully"),
    })
}

/// Fetch one published product by slug.
#[utoipa::path(
    get,
    path = "/{slug}",
    tags = ["Products"],
    params(
        ("slug" = String, Path, description = "Product slug")
    ),
    responses(
        (status = 200, description = "Get product successfully", body = StdResponse<ProductRes, String>),
        (status = 404, description = "No published product carries this slug")
    )
)]
async fn get_product_by_slug(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product: QueryResult<ProductEntity> = products::table
        .filter(products::slug.eq(&slug))
        .filter(products::published.eq(true))
        .get_result(conn)
        .await;

    let product = match product {
        Ok(product) => product,
        Err(DieselError::NotFound) => return Err(AppError::NotFound),
        Err(err) => return Err(AppError::Other(err.into())),
    };

    let res = attach_relations(conn, vec![product])
        .await?
        .pop()
        .context("Product vanished while loading relations")?;

    Ok(StdResponse {
        data: Some(res),
        message: Some("Get product successfully"),
    })
}
