use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, QueryResult, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{CreateProductImageEntity, ProductImageEntity},
    schema::{product_images, products},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/products/{id}/images",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(add_product_image))
            .routes(utoipa_axum::routes!(delete_product_image)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct ImageInput {
    /// Public URL in the external object store.
    pub url: String,
    pub alt: Option<String>,
}

/// Append an image to a product. The sort index continues from the
/// current image count.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Admin / Images"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Product ID to attach the image to")
    ),
    request_body = ImageInput,
    responses(
        (status = 200, description = "Added product image successfully", body = StdResponse<ProductImageEntity, String>),
        (status = 404, description = "Product does not exist")
    )
)]
async fn add_product_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ImageInput>,
) -> Result<impl IntoResponse, AppError> {
    if body.url.trim().is_empty() {
        return Err(AppError::BadRequest("url is required".into()));
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product_count: i64 = products::table
        .find(id)
        .count()
        .get_result(conn)
        .await
        .context("Failed to check product")?;
    if product_count == 0 {
        return Err(AppError::NotFound);
    }

    let sort: i64 = product_images::table
        .filter(product_images::product_id.eq(id))
        .count()
        .get_result(conn)
        .await
        .context("Failed to count product images")?;

    let image: ProductImageEntity = diesel::insert_into(product_images::table)
        .values(CreateProductImageEntity {
            product_id: id,
            url: body.url.trim().to_string(),
            alt: body.alt.filter(|alt| !alt.trim().is_empty()),
            sort: sort as i32,
        })
        .returning(ProductImageEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create product image")?;

    state.invalidations.mark_catalog_views();

    Ok(StdResponse {
        data: Some(image),
        message: Some("Added product image successfully"),
    })
}

/// Remove one image. Remaining sort values keep their gaps; ordering only
/// needs to be monotonic.
#[utoipa::path(
    delete,
    path = "/{image_id}",
    tags = ["Admin / Images"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Product ID owning the image"),
        ("image_id" = Uuid, Path, description = "Image ID to delete")
    ),
    responses(
        (status = 200, description = "Deleted product image successfully", body = StdResponse<ProductImageEntity, String>),
        (status = 404, description = "Image does not exist on this product")
    )
)]
async fn delete_product_image(
    Path((id, image_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: QueryResult<ProductImageEntity> = diesel::delete(
        product_images::table
            .find(image_id)
            .filter(product_images::product_id.eq(id)),
    )
    .returning(ProductImageEntity::as_returning())
    .get_result(conn)
    .await;

    match deleted {
        Ok(image) => {
            state.invalidations.mark_catalog_views();
            Ok(StdResponse {
                data: Some(image),
                message: Some("Deleted product image successfully"),
            })
        }
        Err(DieselError::NotFound) => Err(AppError::NotFound),
        Err(err) => Err(AppError::Other(err.into())),
    }
}
