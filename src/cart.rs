use std::collections::HashMap;

use anyhow::{Context, Result};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    models::{ProductEntity, VariantEntity},
    schema::{products, variants},
};

pub const CART_COOKIE: &str = "cart";
const CART_SCHEMA_VERSION: u8 = 1;
const MAX_LINES: usize = 200;
const MAX_AGE_DAYS: i64 = 30;

/// One (product, variant, quantity) entry as persisted in the cart cookie.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub qty: i32,
}

/// Versioned envelope written to the cookie. Tokens carrying an unknown
/// version decode to an empty cart instead of being reinterpreted.
#[derive(Serialize, Deserialize, Debug)]
struct CartToken {
    v: u8,
    lines: Vec<CartLine>,
}

/// Decode the cart cookie. Fail-open: a missing, unsigned, or malformed
/// token is an empty cart. Quantities are coerced to >= 1 and the line
/// list is capped at [`MAX_LINES`].
pub fn read_lines(jar: &SignedCookieJar) -> Vec<CartLine> {
    let Some(cookie) = jar.get(CART_COOKIE) else {
        return Vec::new();
    };
    let token: CartToken = match serde_json::from_str(cookie.value()) {
        Ok(token) => token,
        Err(_) => return Vec::new(),
    };
    if token.v != CART_SCHEMA_VERSION {
        return Vec::new();
    }

    token
        .lines
        .into_iter()
        .take(MAX_LINES)
        .map(|line| CartLine {
            qty: line.qty.max(1),
            ..line
        })
        .collect()
}

/// Persist the line list. Lines left at qty 0 by the self-healing prune
/// are filtered out here.
pub fn write_lines(jar: SignedCookieJar, lines: &[CartLine]) -> SignedCookieJar {
    let token = CartToken {
        v: CART_SCHEMA_VERSION,
        lines: lines.iter().filter(|line| line.qty > 0).cloned().collect(),
    };
    let value = serde_json::to_string(&token).unwrap_or_else(|_| String::from("{}"));

    let cookie = Cookie::build((CART_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(MAX_AGE_DAYS))
        .build();
    jar.add(cookie)
}

/// Merge a new line into the list: an existing (product, variant) line has
/// its quantity incremented, otherwise the line goes to the front.
pub fn add_line(lines: &mut Vec<CartLine>, product_id: Uuid, variant_id: Option<Uuid>, qty: i32) {
    let qty = qty.max(1);
    match lines
        .iter_mut()
        .find(|line| line.product_id == product_id && line.variant_id == variant_id)
    {
        Some(line) => line.qty += qty,
        None => lines.insert(
            0,
            CartLine {
                product_id,
                variant_id,
                qty,
            },
        ),
    }
}

/// Set the quantity of an existing line. An absent line is left uncreated;
/// the return value tells the caller whether anything matched.
pub fn update_qty(
    lines: &mut [CartLine],
    product_id: Uuid,
    variant_id: Option<Uuid>,
    qty: i32,
) -> bool {
    let qty = qty.max(1);
    match lines
        .iter_mut()
        .find(|line| line.product_id == product_id && line.variant_id == variant_id)
    {
        Some(line) => {
            line.qty = qty;
            true
        }
        None => false,
    }
}

/// Drop the matching line, leaving every other line untouched.
pub fn remove_line(lines: &mut Vec<CartLine>, product_id: Uuid, variant_id: Option<Uuid>) {
    lines.retain(|line| !(line.product_id == product_id && line.variant_id == variant_id));
}

/// Catalog slice needed to price a cart, keyed by product id.
pub struct CatalogEntry {
    pub product: ProductEntity,
    pub variants: Vec<VariantEntity>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CartItemProduct {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub price: i32,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CartItemVariant {
    pub id: Uuid,
    pub name: String,
    pub stock: i32,
    pub extra: i32,
}

/// One priced cart line as returned to the client.
#[derive(Serialize, Debug, ToSchema)]
pub struct CartItem {
    pub product: CartItemProduct,
    pub variant: Option<CartItemVariant>,
    pub line: CartLine,
    pub unit_price: i64,
    pub subtotal: i64,
}

/// Priced cart plus the self-healed line list to persist when lines
/// referenced products that no longer exist.
pub struct PricedCart {
    pub items: Vec<CartItem>,
    pub healed_lines: Option<Vec<CartLine>>,
}

impl PricedCart {
    pub fn total(&self) -> i64 {
        self.items.iter().map(|item| item.subtotal).sum()
    }
}

/// Price every line against the current catalog, preserving order
/// (most-recently-added-first). A line whose product is gone collapses to
/// a qty-0 sentinel and is dropped from both the result and the persisted
/// lines; a dangling variant id prices as the bare product.
pub fn price_lines(lines: &[CartLine], catalog: &HashMap<Uuid, CatalogEntry>) -> PricedCart {
    let mut pruned = false;
    let mut items = Vec::with_capacity(lines.len());

    for line in lines {
        let Some(entry) = catalog.get(&line.product_id) else {
            pruned = true;
            continue;
        };

        let variant = line
            .variant_id
            .and_then(|id| entry.variants.iter().find(|variant| variant.id == id));
        let extra = variant.map(|variant| variant.extra).unwrap_or(0);
        let unit_price = (i64::from(entry.product.price) + i64::from(extra)).max(0);
        let subtotal = unit_price * i64::from(line.qty.max(1));

        items.push(CartItem {
            product: CartItemProduct {
                id: entry.product.id,
                slug: entry.product.slug.clone(),
                name: entry.product.name.clone(),
                price: entry.product.price,
            },
            variant: variant.map(|variant| CartItemVariant {
                id: variant.id,
                name: variant.name.clone(),
                stock: variant.stock,
                extra: variant.extra,
            }),
            line: line.clone(),
            unit_price,
            subtotal,
        });
    }

    let healed_lines = pruned.then(|| items.iter().map(|item| item.line.clone()).collect());
    PricedCart {
        items,
        healed_lines,
    }
}

/// Fetch the catalog slice referenced by the given lines in two batched
/// queries.
pub async fn load_catalog(
    conn: &mut AsyncPgConnection,
    lines: &[CartLine],
) -> Result<HashMap<Uuid, CatalogEntry>> {
    let mut product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    let product_rows: Vec<ProductEntity> = products::table
        .filter(products::id.eq_any(&product_ids))
        .get_results(conn)
        .await
        .context("Failed to get cart products")?;

    let variant_rows: Vec<VariantEntity> = variants::table
        .filter(variants::product_id.eq_any(&product_ids))
        .order_by(variants::name.asc())
        .get_results(conn)
        .await
        .context("Failed to get cart variants")?;

    let mut catalog: HashMap<Uuid, CatalogEntry> = product_rows
        .into_iter()
        .map(|product| {
            (
                product.id,
                CatalogEntry {
                    product,
                    variants: Vec::new(),
                },
            )
        })
        .collect();
    for variant in variant_rows {
        if let Some(entry) = catalog.get_mut(&variant.product_id) {
            entry.variants.push(variant);
        }
    }

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Key;
    use chrono::Utc;

    fn test_jar() -> SignedCookieJar {
        SignedCookieJar::new(Key::from(&[7u8; 64]))
    }

    fn line(product_id: Uuid, variant_id: Option<Uuid>, qty: i32) -> CartLine {
        CartLine {
            product_id,
            variant_id,
            qty,
        }
    }

    fn product(id: Uuid, price: i32) -> ProductEntity {
        ProductEntity {
            id,
            slug: "wool-coat".into(),
            name: "Wool Coat".into(),
            description: None,
            price,
            published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn variant(id: Uuid, product_id: Uuid, extra: i32) -> VariantEntity {
        VariantEntity {
            id,
            product_id,
            name: "L".into(),
            stock: 5,
            extra,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn missing_cookie_reads_as_empty_cart() {
        assert!(read_lines(&test_jar()).is_empty());
    }

    #[test]
    fn malformed_cookie_reads_as_empty_cart() {
        let jar = test_jar().add(Cookie::new(CART_COOKIE, "not json"));
        assert!(read_lines(&jar).is_empty());

        let jar = test_jar().add(Cookie::new(CART_COOKIE, r#"{"lines":[]}"#));
        assert!(read_lines(&jar).is_empty());
    }

    #[test]
    fn unknown_schema_version_reads_as_empty_cart() {
        let token = format!(
            r#"{{"v":2,"lines":[{{"product_id":"{}","variant_id":null,"qty":1}}]}}"#,
            Uuid::new_v4()
        );
        let jar = test_jar().add(Cookie::new(CART_COOKIE, token));
        assert!(read_lines(&jar).is_empty());
    }

    #[test]
    fn decode_coerces_quantities_and_caps_line_count() {
        // Raw token: write_lines would never emit non-positive quantities.
        let raw_lines: Vec<String> = (0..MAX_LINES + 5)
            .map(|_| {
                format!(
                    r#"{{"product_id":"{}","variant_id":null,"qty":-3}}"#,
                    Uuid::new_v4()
                )
            })
            .collect();
        let token = format!(r#"{{"v":1,"lines":[{}]}}"#, raw_lines.join(","));
        let jar = test_jar().add(Cookie::new(CART_COOKIE, token));

        let decoded = read_lines(&jar);
        assert_eq!(decoded.len(), MAX_LINES);
        assert!(decoded.iter().all(|line| line.qty == 1));
    }

    #[test]
    fn write_filters_sentinel_lines() {
        let keep = line(Uuid::new_v4(), None, 2);
        let sentinel = line(Uuid::new_v4(), None, 0);
        let jar = write_lines(test_jar(), &[keep.clone(), sentinel]);

        assert_eq!(read_lines(&jar), vec![keep]);
    }

    #[test]
    fn round_trip_preserves_lines_and_order() {
        let first = line(Uuid::new_v4(), Some(Uuid::new_v4()), 2);
        let second = line(Uuid::new_v4(), None, 1);
        let jar = write_lines(test_jar(), &[first.clone(), second.clone()]);

        assert_eq!(read_lines(&jar), vec![first, second]);
    }

    #[test]
    fn add_line_merges_matching_product_and_variant() {
        let product_id = Uuid::new_v4();
        let variant_id = Some(Uuid::new_v4());
        let mut lines = Vec::new();

        add_line(&mut lines, product_id, variant_id, 2);
        add_line(&mut lines, product_id, variant_id, 3);

        assert_eq!(lines, vec![line(product_id, variant_id, 5)]);
    }

    #[test]
    fn add_line_distinguishes_variants_of_one_product() {
        let product_id = Uuid::new_v4();
        let mut lines = Vec::new();

        add_line(&mut lines, product_id, None, 1);
        add_line(&mut lines, product_id, Some(Uuid::new_v4()), 1);

        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn add_line_inserts_new_lines_at_the_front() {
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let mut lines = Vec::new();

        add_line(&mut lines, older, None, 1);
        add_line(&mut lines, newer, None, 1);

        assert_eq!(lines[0].product_id, newer);
        assert_eq!(lines[1].product_id, older);
    }

    #[test]
    fn no_sequence_of_mutations_duplicates_a_line_key() {
        let product_a = Uuid::new_v4();
        let product_b = Uuid::new_v4();
        let variant = Some(Uuid::new_v4());
        let mut lines = Vec::new();

        add_line(&mut lines, product_a, None, 1);
        add_line(&mut lines, product_a, variant, 2);
        add_line(&mut lines, product_b, None, 1);
        add_line(&mut lines, product_a, variant, 1);
        update_qty(&mut lines, product_a, None, 4);
        remove_line(&mut lines, product_b, None);
        add_line(&mut lines, product_b, None, 2);

        let mut keys: Vec<(Uuid, Option<Uuid>)> = lines
            .iter()
            .map(|line| (line.product_id, line.variant_id))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), lines.len());
    }

    #[test]
    fn update_qty_on_missing_line_is_a_no_op() {
        let existing = line(Uuid::new_v4(), None, 2);
        let mut lines = vec![existing.clone()];

        assert!(!update_qty(&mut lines, Uuid::new_v4(), None, 7));
        assert_eq!(lines, vec![existing]);
    }

    #[test]
    fn update_qty_coerces_to_at_least_one() {
        let product_id = Uuid::new_v4();
        let mut lines = vec![line(product_id, None, 3)];

        assert!(update_qty(&mut lines, product_id, None, 0));
        assert_eq!(lines[0].qty, 1);
    }

    #[test]
    fn remove_line_leaves_other_lines_untouched() {
        let target = line(Uuid::new_v4(), Some(Uuid::new_v4()), 1);
        let other = line(Uuid::new_v4(), None, 2);
        let mut lines = vec![target.clone(), other.clone()];

        remove_line(&mut lines, target.product_id, target.variant_id);
        assert_eq!(lines, vec![other]);
    }

    #[test]
    fn pricing_adds_variant_surcharge() {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        let mut catalog = HashMap::new();
        catalog.insert(
            product_id,
            CatalogEntry {
                product: product(product_id, 200_000),
                variants: vec![variant(variant_id, product_id, 10_000)],
            },
        );

        let priced = price_lines(&[line(product_id, Some(variant_id), 2)], &catalog);

        assert_eq!(priced.items.len(), 1);
        assert_eq!(priced.items[0].unit_price, 210_000);
        assert_eq!(priced.items[0].subtotal, 420_000);
        assert_eq!(priced.total(), 420_000);
        assert!(priced.healed_lines.is_none());
    }

    #[test]
    fn dangling_variant_prices_as_the_bare_product() {
        let product_id = Uuid::new_v4();
        let mut catalog = HashMap::new();
        catalog.insert(
            product_id,
            CatalogEntry {
                product: product(product_id, 1_000),
                variants: Vec::new(),
            },
        );

        let priced = price_lines(&[line(product_id, Some(Uuid::new_v4()), 3)], &catalog);

        assert_eq!(priced.items[0].unit_price, 1_000);
        assert_eq!(priced.items[0].subtotal, 3_000);
        assert!(priced.items[0].variant.is_none());
        // The line itself survives: only deleted products are pruned.
        assert!(priced.healed_lines.is_none());
    }

    #[test]
    fn deleted_products_are_pruned_and_healed() {
        let kept_id = Uuid::new_v4();
        let gone_id = Uuid::new_v4();
        let mut catalog = HashMap::new();
        catalog.insert(
            kept_id,
            CatalogEntry {
                product: product(kept_id, 500),
                variants: Vec::new(),
            },
        );

        let kept = line(kept_id, None, 1);
        let priced = price_lines(&[line(gone_id, None, 2), kept.clone()], &catalog);

        assert_eq!(priced.items.len(), 1);
        assert_eq!(priced.items[0].line, kept);
        assert_eq!(priced.healed_lines, Some(vec![kept]));
    }

    #[test]
    fn pricing_is_idempotent_on_a_healthy_cart() {
        let product_id = Uuid::new_v4();
        let mut catalog = HashMap::new();
        catalog.insert(
            product_id,
            CatalogEntry {
                product: product(product_id, 42),
                variants: Vec::new(),
            },
        );
        let lines = vec![line(product_id, None, 2)];

        let first = price_lines(&lines, &catalog);
        let second = price_lines(&lines, &catalog);

        assert!(first.healed_lines.is_none());
        assert!(second.healed_lines.is_none());
        assert_eq!(first.items.len(), second.items.len());
        assert_eq!(first.total(), second.total());
    }

    #[test]
    fn negative_unit_price_clamps_to_zero() {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        let mut catalog = HashMap::new();
        catalog.insert(
            product_id,
            CatalogEntry {
                product: product(product_id, 100),
                variants: vec![variant(variant_id, product_id, -500)],
            },
        );

        let priced = price_lines(&[line(product_id, Some(variant_id), 1)], &catalog);
        assert_eq!(priced.items[0].unit_price, 0);
        assert_eq!(priced.items[0].subtotal, 0);
    }
}
