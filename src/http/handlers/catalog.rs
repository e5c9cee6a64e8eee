//! Products, categories and catalogues.

use axum::{extract::State, http::StatusCode, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use validator::Validate;
use super::{message, PaginatedResponse};
use crate::domain::aggregates::{slugify, Catalogue, CatalogueWithProducts, Category, Product};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::store::postgres::PRODUCT_COLUMNS;
use crate::http::extract::{AppJson, AppPath, AppQuery};
use crate::validation::{self, sanitize, Pagination};

const PRODUCT_SORT_COLUMNS: &[&str] = &["id", "name", "price", "created_at", "updated_at", "stock", "is_featured"];
const CATEGORY_COLUMNS: &str = "id, name, slug, description, image, is_active, created_at, updated_at";
const CATALOGUE_COLUMNS: &str = "id, name, description, image, status, sort_order, created_at, updated_at";
const LIVE_PRODUCTS: &str = "deleted_at IS NULL AND is_active";

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<i64>,
    pub featured: Option<bool>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, p: &ProductListParams) {
    if let Some(category) = p.category { qb.push(" AND category_id = ").push_bind(category); }
    if p.featured == Some(true) { qb.push(" AND is_featured"); }
}

pub async fn list_products(State(s): State<AppState>, AppQuery(p): AppQuery<ProductListParams>) -> Result<Json<PaginatedResponse<Product>>> {
    let sort = validation::sort_column(p.sort.as_deref())?;
    if !PRODUCT_SORT_COLUMNS.contains(&sort) {
        return Err(AppError::Validation(format!("invalid sort column: {sort}")));
    }
    let direction = validation::order_direction(p.order.as_deref())?;
    let page = Pagination::new(p.page, p.limit);

    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE {LIVE_PRODUCTS}"));
    push_product_filters(&mut qb, &p);
    qb.push(format!(" ORDER BY {sort} {direction} LIMIT ")).push_bind(page.limit).push(" OFFSET ").push_bind(page.offset());
    let products = qb.build_query_as::<Product>().fetch_all(&s.db).await?;

    let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM products WHERE {LIVE_PRODUCTS}"));
    push_product_filters(&mut count, &p);
    let total: i64 = count.build_query_scalar().fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse::new(products, total, page)))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn search_products(State(s): State<AppState>, AppQuery(p): AppQuery<SearchParams>) -> Result<Json<PaginatedResponse<Product>>> {
    let term = p.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::Validation("Search query required".into()))?;
    let pattern = format!("%{}%", sanitize(term, 100));
    let page = Pagination::new(p.page, p.limit);
    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE {LIVE_PRODUCTS} AND (name ILIKE $1 OR description ILIKE $1) ORDER BY id DESC LIMIT $2 OFFSET $3"
    ))
        .bind(&pattern).bind(page.limit).bind(page.offset()).fetch_all(&s.db).await?;
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {LIVE_PRODUCTS} AND (name ILIKE $1 OR description ILIKE $1)"))
        .bind(&pattern).fetch_one(&s.db).await?;
    Ok(Json(PaginatedResponse::new(products, total, page)))
}

pub async fn get_product(State(s): State<AppState>, AppPath(id): AppPath<i64>) -> Result<Json<Product>> {
    find_product(&s.db, id).await?.map(Json).ok_or_else(|| AppError::not_found("Product"))
}

async fn find_product(db: &PgPool, id: i64) -> Result<Option<Product>> {
    Ok(sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL"))
        .bind(id).fetch_optional(db).await?)
}

/// Distinct colors and sizes plus the price range; 0..2000 when the catalog is empty.
pub async fn filter_options(State(s): State<AppState>) -> Result<Json<Value>> {
    let colors: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT v FROM products, unnest(colors) AS v WHERE {LIVE_PRODUCTS} ORDER BY v"
    )).fetch_all(&s.db).await?;
    let sizes: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT DISTINCT v FROM products, unnest(sizes) AS v WHERE {LIVE_PRODUCTS} ORDER BY v"
    )).fetch_all(&s.db).await?;
    let (min, max): (Option<Decimal>, Option<Decimal>) = sqlx::query_as(&format!(
        "SELECT MIN(price), MAX(price) FROM products WHERE {LIVE_PRODUCTS}"
    )).fetch_one(&s.db).await?;
    Ok(Json(json!({
        "colors": colors,
        "sizes": sizes,
        "min_price": min.unwrap_or(Decimal::ZERO),
        "max_price": max.unwrap_or(Decimal::from(2000)),
    })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 2, max = 255))]
    pub name: String,
    #[validate(custom = "crate::validation::price")]
    pub price: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::image_url")]
    pub image: String,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 100000))]
    pub stock: i32,
    #[serde(default)]
    pub is_featured: bool,
    pub is_active: Option<bool>,
}

async fn ensure_category(db: &PgPool, id: i64) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM categories WHERE id = $1 AND deleted_at IS NULL)")
        .bind(id).fetch_one(db).await?;
    if exists { Ok(()) } else { Err(AppError::Validation("Category not found".into())) }
}

pub async fn create_product(State(s): State<AppState>, AppJson(r): AppJson<CreateProductRequest>) -> Result<(StatusCode, Json<Product>)> {
    r.validate()?;
    if let Some(category_id) = r.category_id { ensure_category(&s.db, category_id).await?; }
    let p = sqlx::query_as::<_, Product>(&format!(
        "INSERT INTO products (name, price, description, image, category_id, colors, sizes, stock, is_featured, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {PRODUCT_COLUMNS}"
    ))
        .bind(sanitize(&r.name, 255)).bind(r.price).bind(sanitize(&r.description, 2000)).bind(&r.image).bind(r.category_id)
        .bind(&r.colors).bind(&r.sizes).bind(r.stock).bind(r.is_featured).bind(r.is_active.unwrap_or(true))
        .fetch_one(&s.db).await?;
    info!(product_id = p.id, "product created");
    Ok((StatusCode::CREATED, Json(p)))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(length(min = 2, max = 255))]
    pub name: Option<String>,
    #[validate(custom = "crate::validation::price")]
    pub price: Option<Decimal>,
    pub description: Option<String>,
    #[validate(custom = "crate::validation::image_url")]
    pub image: Option<String>,
    pub category_id: Option<i64>,
    pub colors: Option<Vec<String>>,
    pub sizes: Option<Vec<String>>,
    #[validate(range(min = 0, max = 100000))]
    pub stock: Option<i32>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
}

pub async fn update_product(State(s): State<AppState>, AppPath(id): AppPath<i64>, AppJson(r): AppJson<UpdateProductRequest>) -> Result<Json<Product>> {
    r.validate()?;
    if let Some(category_id) = r.category_id { ensure_category(&s.db, category_id).await?; }
    sqlx::query_as::<_, Product>(&format!(
        "UPDATE products SET name = COALESCE($2, name), price = COALESCE($3, price), description = COALESCE($4, description), \
         image = COALESCE($5, image), category_id = COALESCE($6, category_id), colors = COALESCE($7, colors), \
         sizes = COALESCE($8, sizes), stock = COALESCE($9, stock), is_featured = COALESCE($10, is_featured), \
         is_active = COALESCE($11, is_active), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL RETURNING {PRODUCT_COLUMNS}"
    ))
        .bind(id).bind(r.name.as_deref().map(|n| sanitize(n, 255))).bind(r.price)
        .bind(r.description.as_deref().map(|d| sanitize(d, 2000))).bind(&r.image).bind(r.category_id)
        .bind(&r.colors).bind(&r.sizes).bind(r.stock).bind(r.is_featured).bind(r.is_active)
        .fetch_optional(&s.db).await?.map(Json).ok_or_else(|| AppError::not_found("Product"))
}

pub async fn delete_product(State(s): State<AppState>, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let done = sqlx::query("UPDATE products SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
        .bind(id).execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Product")); }
    info!(product_id = id, "product deleted");
    Ok(Json(message("Product deleted")))
}

pub async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>> {
    let cats = sqlx::query_as::<_, Category>(&format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE deleted_at IS NULL ORDER BY name"))
        .fetch_all(&s.db).await?;
    Ok(Json(cats))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(custom = "crate::validation::slug")]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::image_url")]
    pub image: String,
    pub is_active: Option<bool>,
}

pub async fn create_category(State(s): State<AppState>, AppJson(r): AppJson<CategoryRequest>) -> Result<(StatusCode, Json<Category>)> {
    r.validate()?;
    let slug = r.slug.clone().unwrap_or_else(|| slugify(&r.name));
    let c = sqlx::query_as::<_, Category>(&format!(
        "INSERT INTO categories (name, slug, description, image, is_active) VALUES ($1, $2, $3, $4, $5) RETURNING {CATEGORY_COLUMNS}"
    ))
        .bind(sanitize(&r.name, 100)).bind(&slug).bind(sanitize(&r.description, 1000)).bind(&r.image).bind(r.is_active.unwrap_or(true))
        .fetch_one(&s.db).await
        .map_err(|e| if super::is_unique_violation(&e) { AppError::Conflict("Category already exists".into()) } else { e.into() })?;
    Ok((StatusCode::CREATED, Json(c)))
}

pub async fn update_category(State(s): State<AppState>, AppPath(id): AppPath<i64>, AppJson(r): AppJson<CategoryRequest>) -> Result<Json<Category>> {
    r.validate()?;
    let slug = r.slug.clone().unwrap_or_else(|| slugify(&r.name));
    sqlx::query_as::<_, Category>(&format!(
        "UPDATE categories SET name = $2, slug = $3, description = $4, image = $5, is_active = COALESCE($6, is_active), updated_at = NOW() \
         WHERE id = $1 AND deleted_at IS NULL RETURNING {CATEGORY_COLUMNS}"
    ))
        .bind(id).bind(sanitize(&r.name, 100)).bind(&slug).bind(sanitize(&r.description, 1000)).bind(&r.image).bind(r.is_active)
        .fetch_optional(&s.db).await
        .map_err(|e| if super::is_unique_violation(&e) { AppError::Conflict("Category already exists".into()) } else { e.into() })?
        .map(Json).ok_or_else(|| AppError::not_found("Category"))
}

/// Products keep existing but lose their category.
pub async fn delete_category(State(s): State<AppState>, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let mut tx = s.db.begin().await?;
    let done = sqlx::query("UPDATE categories SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
        .bind(id).execute(&mut *tx).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Category")); }
    sqlx::query("UPDATE products SET category_id = NULL, updated_at = NOW() WHERE category_id = $1")
        .bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(Json(message("Category deleted")))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogueListParams {
    pub status: Option<bool>,
    pub search: Option<String>,
}

pub async fn list_catalogues(State(s): State<AppState>, AppQuery(p): AppQuery<CatalogueListParams>) -> Result<Json<Vec<CatalogueWithProducts>>> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {CATALOGUE_COLUMNS} FROM catalogues WHERE deleted_at IS NULL"));
    if let Some(status) = p.status { qb.push(" AND status = ").push_bind(status); }
    if let Some(search) = p.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        qb.push(" AND name ILIKE ").push_bind(format!("%{}%", sanitize(search, 100)));
    }
    qb.push(" ORDER BY sort_order ASC, created_at DESC");
    let catalogues = qb.build_query_as::<Catalogue>().fetch_all(&s.db).await?;
    let mut out = Vec::with_capacity(catalogues.len());
    for catalogue in catalogues {
        let products = catalogue_products(&s.db, catalogue.id).await?;
        out.push(CatalogueWithProducts { catalogue, products });
    }
    Ok(Json(out))
}

async fn catalogue_products(db: &PgPool, catalogue_id: i64) -> Result<Vec<Product>> {
    let columns = PRODUCT_COLUMNS.split(", ").map(|c| format!("p.{}", c.trim())).collect::<Vec<_>>().join(", ");
    Ok(sqlx::query_as::<_, Product>(&format!(
        "SELECT {columns} FROM products p JOIN catalogue_products cp ON cp.product_id = p.id \
         WHERE cp.catalogue_id = $1 AND p.deleted_at IS NULL ORDER BY p.id"
    )).bind(catalogue_id).fetch_all(db).await?)
}

async fn load_catalogue(db: &PgPool, id: i64) -> Result<CatalogueWithProducts> {
    let catalogue = sqlx::query_as::<_, Catalogue>(&format!("SELECT {CATALOGUE_COLUMNS} FROM catalogues WHERE id = $1 AND deleted_at IS NULL"))
        .bind(id).fetch_optional(db).await?.ok_or_else(|| AppError::not_found("Catalogue"))?;
    let products = catalogue_products(db, id).await?;
    Ok(CatalogueWithProducts { catalogue, products })
}

pub async fn get_catalogue(State(s): State<AppState>, AppPath(id): AppPath<i64>) -> Result<Json<CatalogueWithProducts>> {
    load_catalogue(&s.db, id).await.map(Json)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CatalogueRequest {
    #[validate(length(min = 2, max = 255))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[validate(custom = "crate::validation::image_url")]
    pub image: String,
    pub status: Option<bool>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub product_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCatalogueRequest {
    #[validate(length(min = 2, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom = "crate::validation::image_url")]
    pub image: Option<String>,
    pub status: Option<bool>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogueProductsRequest {
    pub product_ids: Vec<i64>,
}

/// Links existing, non-deleted products; unknown ids are skipped.
async fn link_products(db: &PgPool, catalogue_id: i64, product_ids: &[i64]) -> Result<u64> {
    if product_ids.is_empty() { return Ok(0); }
    let done = sqlx::query(
        "INSERT INTO catalogue_products (catalogue_id, product_id) \
         SELECT $1, id FROM products WHERE id = ANY($2) AND deleted_at IS NULL ON CONFLICT DO NOTHING"
    ).bind(catalogue_id).bind(product_ids).execute(db).await?;
    Ok(done.rows_affected())
}

pub async fn create_catalogue(State(s): State<AppState>, AppJson(r): AppJson<CatalogueRequest>) -> Result<(StatusCode, Json<CatalogueWithProducts>)> {
    r.validate()?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO catalogues (name, description, image, status, sort_order) VALUES ($1, $2, $3, $4, $5) RETURNING id"
    )
        .bind(sanitize(&r.name, 255)).bind(sanitize(&r.description, 2000)).bind(&r.image).bind(r.status.unwrap_or(true)).bind(r.sort_order)
        .fetch_one(&s.db).await?;
    link_products(&s.db, id, &r.product_ids).await?;
    Ok((StatusCode::CREATED, Json(load_catalogue(&s.db, id).await?)))
}

pub async fn update_catalogue(State(s): State<AppState>, AppPath(id): AppPath<i64>, AppJson(r): AppJson<UpdateCatalogueRequest>) -> Result<Json<CatalogueWithProducts>> {
    r.validate()?;
    let done = sqlx::query(
        "UPDATE catalogues SET name = COALESCE($2, name), description = COALESCE($3, description), image = COALESCE($4, image), \
         status = COALESCE($5, status), sort_order = COALESCE($6, sort_order), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL"
    )
        .bind(id).bind(r.name.as_deref().map(|n| sanitize(n, 255))).bind(r.description.as_deref().map(|d| sanitize(d, 2000)))
        .bind(&r.image).bind(r.status).bind(r.sort_order)
        .execute(&s.db).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Catalogue")); }
    load_catalogue(&s.db, id).await.map(Json)
}

pub async fn delete_catalogue(State(s): State<AppState>, AppPath(id): AppPath<i64>) -> Result<Json<Value>> {
    let mut tx = s.db.begin().await?;
    let done = sqlx::query("UPDATE catalogues SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
        .bind(id).execute(&mut *tx).await?;
    if done.rows_affected() == 0 { return Err(AppError::not_found("Catalogue")); }
    sqlx::query("DELETE FROM catalogue_products WHERE catalogue_id = $1").bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(Json(message("Catalogue deleted")))
}

pub async fn add_catalogue_products(State(s): State<AppState>, AppPath(id): AppPath<i64>, AppJson(r): AppJson<CatalogueProductsRequest>) -> Result<Json<CatalogueWithProducts>> {
    load_catalogue(&s.db, id).await?;
    let added = link_products(&s.db, id, &r.product_ids).await?;
    info!(catalogue_id = id, added, "catalogue products added");
    load_catalogue(&s.db, id).await.map(Json)
}

pub async fn remove_catalogue_products(State(s): State<AppState>, AppPath(id): AppPath<i64>, AppJson(r): AppJson<CatalogueProductsRequest>) -> Result<Json<CatalogueWithProducts>> {
    load_catalogue(&s.db, id).await?;
    sqlx::query("DELETE FROM catalogue_products WHERE catalogue_id = $1 AND product_id = ANY($2)")
        .bind(id).bind(&r.product_ids).execute(&s.db).await?;
    load_catalogue(&s.db, id).await.map(Json)
}
