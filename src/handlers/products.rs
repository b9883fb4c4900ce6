use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    handlers::common::success_response,
    AppState, PaginatedResponse,
};

const ALLOWED_SORTS: [&str; 3] = ["created_at", "price", "name"];

pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    15
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub price: i64,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            code: model.code,
            description: model.description,
            price: model.price,
            image_url: model.image_url,
            category: model.category,
            created_at: model.created_at,
        }
    }
}

/// Browse the catalog with keyword search, category and price-range filters.
async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
        if min > max {
            return Err(ServiceError::BadRequest(
                "min_price must not exceed max_price".to_string(),
            ));
        }
    }

    let mut condition = Condition::all().add(product::Column::IsActive.eq(true));

    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        condition = condition.add(product::Column::Name.contains(search));
    }
    if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
        condition = condition.add(product::Column::Category.eq(category));
    }
    if let Some(min) = query.min_price {
        condition = condition.add(product::Column::Price.gte(min));
    }
    if let Some(max) = query.max_price {
        condition = condition.add(product::Column::Price.lte(max));
    }

    // Only whitelisted sort fields are honored.
    let sort = query
        .sort
        .as_deref()
        .filter(|s| ALLOWED_SORTS.contains(s))
        .unwrap_or("created_at");
    let ascending = matches!(query.direction.as_deref(), Some("asc"));

    let mut select = ProductEntity::find().filter(condition);
    let sort_column = match sort {
        "price" => product::Column::Price,
        "name" => product::Column::Name,
        _ => product::Column::CreatedAt,
    };
    select = if ascending {
        select.order_by_asc(sort_column)
    } else {
        select.order_by_desc(sort_column)
    };

    let limit = query.limit.clamp(1, 100);
    let paginator = select.paginate(&*state.db, limit);
    let total = paginator.num_items().await?;
    let items: Vec<ProductResponse> = paginator
        .fetch_page(query.page.saturating_sub(1))
        .await?
        .into_iter()
        .map(ProductResponse::from)
        .collect();

    let total_pages = total.div_ceil(limit);
    Ok(success_response(PaginatedResponse {
        items,
        total,
        page: query.page,
        limit,
        total_pages,
    }))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = ProductEntity::find_by_id(id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

    Ok(success_response(ProductResponse::from(product)))
}
