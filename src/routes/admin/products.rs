use anyhow::Context;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, QueryDsl, QueryResult, SelectableHelper,
    result::DatabaseErrorKind,
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    aliases::DieselError,
    app_error::{AppError, StdResponse},
    app_state::AppState,
    models::{
        CreateProductEntity, CreateProductImageEntity, CreateVariantEntity, ProductEntity,
    },
    routes::products::{ProductRes, attach_relations},
    schema::{product_images, products, variants},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/products",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_admin_products, create_product))
            .routes(utoipa_axum::routes!(update_product, delete_product)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct VariantInput {
    pub name: String,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub extra: i32,
}

#[derive(Deserialize, ToSchema)]
pub struct ProductInput {
    pub name: String,
    pub slug: String,
    pub price: i32,
    pub description: Option<String>,
    #[serde(default = "default_published")]
    pub published: bool,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub variants: Vec<VariantInput>,
}

fn default_published() -> bool {
    true
}

fn validate_input(input: &ProductInput) -> Result<(), AppError> {
    if input.name.trim().is_empty() || input.slug.trim().is_empty() {
        return Err(AppError::BadRequest("name and slug are required".into()));
    }
    if !input
        .slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::BadRequest(
            "slug must be lowercase letters, digits and dashes".into(),
        ));
    }
    if input.price < 0 {
        return Err(AppError::BadRequest(
            "price must be a non-negative integer".into(),
        ));
    }
    for variant in &input.variants {
        if variant.name.trim().is_empty() {
            return Err(AppError::BadRequest("variant name is required".into()));
        }
        if variant.stock < 0 || variant.extra < 0 {
            return Err(AppError::BadRequest(
                "variant stock and extra must be non-negative".into(),
            ));
        }
    }
    Ok(())
}

fn image_rows(product_id: Uuid, urls: &[String]) -> Vec<CreateProductImageEntity> {
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .enumerate()
        .map(|(sort, url)| CreateProductImageEntity {
            product_id,
            url: url.to_string(),
            alt: None,
            sort: sort as i32,
        })
        .collect()
}

/// The admin form always submits a full variant list; an empty one still
/// yields a purchasable product via a zero-stock "Default" variant.
fn variant_rows(product_id: Uuid, inputs: &[VariantInput]) -> Vec<CreateVariantEntity> {
    let mut rows: Vec<CreateVariantEntity> = inputs
        .iter()
        .filter(|input| !input.name.trim().is_empty())
        .map(|input| CreateVariantEntity {
            product_id,
            name: input.name.trim().to_string(),
            stock: input.stock,
            extra: input.extra,
        })
        .collect();
    if rows.is_empty() {
        rows.push(CreateVariantEntity {
            product_id,
            name: "Default".into(),
            stock: 0,
            extra: 0,
        });
    }
    rows
}

/// Fetch every product, published or not, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Admin / Products"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List all products", body = StdResponse<Vec<ProductRes>, String>)
    )
)]
async fn get_admin_products(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product_rows: Vec<ProductEntity> = products::table
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

/// Create a product with its images and variants.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Admin / Products"],
    security(("bearerAuth" = [])),
    request_body = ProductInput,
    responses(
        (status = 200, description = "Created product successfully", body = StdResponse<ProductRes, String>),
        (status = 400, description = "Invalid name, slug, price or variants")
    )
)]
async fn create_product(
    State(state): State<AppState>,
    Json(body): Json<ProductInput>,
) -> Result<impl IntoResponse, AppError> {
    validate_input(&body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let product: ProductEntity = diesel::insert_into(products::table)
                    .values(CreateProductEntity {
                        slug: body.slug.trim().to_string(),
                        name: body.name.trim().to_string(),
                        description: body.description.clone().filter(|d| !d.trim().is_empty()),
                        price: body.price,
                        published: body.published,
                    })
                    .returning(ProductEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            AppError::BadRequest("slug is already in use".into())
                        }
                        other => AppError::Other(other.into()),
                    })?;

                diesel::insert_into(product_images::table)
                    .values(image_rows(product.id, &body.images))
                    .execute(conn)
                    .await
                    .context("Failed to create product images")?;

                diesel::insert_into(variants::table)
                    .values(variant_rows(product.id, &body.variants))
                    .execute(conn)
                    .await
                    .context("Failed to create variants")?;

                Ok::<ProductEntity, AppError>(product)
            })
        })
        .await?;

    let res = attach_relations(conn, vec![product])
        .await?
        .pop()
        .context("Product vanished while loading relations")?;

    state.invalidations.mark_catalog_views();

    Ok(StdResponse {
        data: Some(res),
        message: Some("Created product successfully"),
    })
}

/// Update a product, replacing its images and variants wholesale; the
/// admin form always submits the complete lists.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Admin / Products"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Product ID to update")
    ),
    request_body = ProductInput,
    responses(
        (status = 200, description = "Updated product successfully", body = StdResponse<ProductRes, String>),
        (status = 404, description = "Product does not exist")
    )
)]
async fn update_product(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ProductInput>,
) -> Result<impl IntoResponse, AppError> {
    validate_input(&body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let product: ProductEntity = diesel::update(products::table.find(id))
                    .set((
                        products::slug.eq(body.slug.trim()),
                        products::name.eq(body.name.trim()),
                        products::description
                            .eq(body.description.clone().filter(|d| !d.trim().is_empty())),
                        products::price.eq(body.price),
                        products::published.eq(body.published),
                    ))
                    .returning(ProductEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(|err| match err {
                        DieselError::NotFound => AppError::NotFound,
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            AppError::BadRequest("slug is already in use".into())
                        }
                        other => AppError::Other(other.into()),
                    })?;

                diesel::delete(product_images::table.filter(product_images::product_id.eq(id)))
                    .execute(conn)
                    .await
                    .context("Failed to clear product images")?;
                diesel::delete(variants::table.filter(variants::product_id.eq(id)))
                    .execute(conn)
                    .await
                    .context("Failed to clear variants")?;

                diesel::insert_into(product_images::table)
                    .values(image_rows(id, &body.images))
                    .execute(conn)
                    .await
                    .context("Failed to create product images")?;

                diesel::insert_into(variants::table)
                    .values(variant_rows(id, &body.variants))
                    .execute(conn)
                    .await
                    .context("Failed to create variants")?;

                Ok::<ProductEntity, AppError>(product)
            })
        })
        .await?;

    let res = attach_relations(conn, vec![product])
        .await?
        .pop()
        .context("Product vanished while loading relations")?;

    state.invalidations.mark_catalog_views();

    Ok(StdResponse {
        data: Some(res),
        message: Some("Updated product successfully"),
    })
}

/// Delete a product; images and variants go with it via the FK cascade.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Admin / Products"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Product ID to delete")
    ),
    responses(
        (status = 200, description = "Deleted product successfully", body = StdResponse<ProductEntity, String>),
        (status = 404, description = "Product does not exist")
    )
)]
async fn delete_product(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: QueryResult<ProductEntity> = diesel::delete(products::table.find(id))
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await;

    match deleted {
        Ok(product) => {
            state.invalidations.mark_catalog_views();
            Ok(StdResponse {
                data: Some(product),
                message: Some("Deleted product successfully"),
            })
        }
        Err(DieselError::NotFound) => Err(AppError::NotFound),
        Err(err) => Err(AppError::Other(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, slug: &str, price: i32) -> ProductInput {
        ProductInput {
            name: name.into(),
            slug: slug.into(),
            price,
            description: None,
            published: true,
            images: Vec::new(),
            variants: Vec::new(),
        }
    }

    #[test]
    fn accepts_a_plain_product() {
        assert!(validate_input(&input("Wool Coat", "wool-coat", 200_000)).is_ok());
    }

    #[test]
    fn rejects_blank_name_or_slug() {
        assert!(validate_input(&input(" ", "wool-coat", 1)).is_err());
        assert!(validate_input(&input("Wool Coat", "", 1)).is_err());
    }

    #[test]
    fn rejects_non_url_safe_slugs() {
        assert!(validate_input(&input("Coat", "Wool Coat", 1)).is_err());
        assert!(validate_input(&input("Coat", "wool_coat", 1)).is_err());
        assert!(validate_input(&input("Coat", "wool/coat", 1)).is_err());
    }

    #[test]
    fn rejects_negative_price_stock_and_extra() {
        assert!(validate_input(&input("Coat", "coat", -1)).is_err());

        let mut with_variant = input("Coat", "coat", 1);
        with_variant.variants.push(VariantInput {
            name: "M".into(),
            stock: -1,
            extra: 0,
        });
        assert!(validate_input(&with_variant).is_err());

        with_variant.variants[0].stock = 0;
        with_variant.variants[0].extra = -1;
        assert!(validate_input(&with_variant).is_err());
    }

    #[test]
    fn image_rows_skip_blanks_and_number_contiguously() {
        let product_id = Uuid::new_v4();
        let rows = image_rows(
            product_id,
            &["a.jpg".into(), "  ".into(), "b.jpg".into()],
        );

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sort, 0);
        assert_eq!(rows[1].sort, 1);
        assert_eq!(rows[1].url, "b.jpg");
    }

    #[test]
    fn empty_variant_list_falls_back_to_default() {
        let rows = variant_rows(Uuid::new_v4(), &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Default");
        assert_eq!(rows[0].stock, 0);
    }
}
