use anyhow::{Context, Result};
use diesel::SelectableHelper;
use diesel_async::RunQueryDsl;
use shopfront::{
    bootstrap, config, db,
    models::{
        CreateProductEntity, CreateProductImageEntity, CreateVariantEntity, ProductEntity,
    },
    schema::{order_items, orders, payments, product_images, products, variants},
};

/// Reset the catalog and order tables and insert one demo product.
#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;
    let pool = db::connect(&config.database_url).await?;
    let conn = &mut pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    // Reverse-dependency order so foreign keys do not get in the way.
    diesel::delete(order_items::table).execute(conn).await?;
    diesel::delete(payments::table).execute(conn).await?;
    diesel::delete(orders::table).execute(conn).await?;
    diesel::delete(variants::table).execute(conn).await?;
    diesel::delete(product_images::table).execute(conn).await?;
    diesel::delete(products::table).execute(conn).await?;

    let product: ProductEntity = diesel::insert_into(products::table)
        .values(CreateProductEntity {
            slug: "wool-coat".into(),
            name: "Wool Coat".into(),
            description: Some("Classic wool coat for winter".into()),
            price: 200_000,
            published: true,
        })
        .returning(ProductEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to seed product")?;

    diesel::insert_into(product_images::table)
        .values(vec![
            CreateProductImageEntity {
                product_id: product.id,
                url: "https://picsum.photos/seed/coat1/800/1000".into(),
                alt: None,
                sort: 0,
            },
            CreateProductImageEntity {
                product_id: product.id,
                url: "https://picsum.photos/seed/coat2/800/1000".into(),
                alt: None,
                sort: 1,
            },
        ])
        .execute(conn)
        .await
        .context("Failed to seed product images")?;

    diesel::insert_into(variants::table)
        .values(vec![
            CreateVariantEntity {
                product_id: product.id,
                name: "M".into(),
                stock: 10,
                extra: 0,
            },
            CreateVariantEntity {
                product_id: product.id,
                name: "L".into(),
                stock: 5,
                extra: 10_000,
            },
        ])
        .execute(conn)
        .await
        .context("Failed to seed variants")?;

    tracing::info!("Seeded product: {}", product.name);
    Ok(())
}
