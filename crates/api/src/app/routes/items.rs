use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::json;

use keel_auth::User;
use keel_core::{DocumentId, Entity};

use crate::app::catalog::{ITEMS_READ, ITEMS_WRITE, Item};
use crate::app::dto::{CreateItemRequest, ItemEnvelope, ItemPage, ListItemsQuery, UpdateItemRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::Caller;
use crate::middleware::{AuthState, require_activated, require_permission};

/// Optional optimistic-concurrency precondition on `PATCH /items/:id`.
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

/// Reads need `items:read`; writes need `items:write` and an activated account.
pub fn router(auth: &AuthState<User>) -> Router {
    let read = from_fn_with_state(auth.require(ITEMS_READ), require_permission::<User>);
    let write = from_fn_with_state(auth.require(ITEMS_WRITE), require_permission::<User>);
    let activated = from_fn(require_activated::<User>);

    Router::new()
        .route(
            "/items",
            get(list_items).route_layer(read.clone()).merge(
                post(create_item)
                    .route_layer(activated.clone())
                    .route_layer(write.clone()),
            ),
        )
        .route(
            "/items/:id",
            get(get_item).route_layer(read).merge(
                patch(update_item)
                    .delete(delete_item)
                    .route_layer(activated)
                    .route_layer(write),
            ),
        )
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<ListItemsQuery>, QueryRejection>,
) -> Result<Json<ItemPage>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let page = query.page_request()?;

    let (items, metadata) = services.items.list(&query.filter(), &page).await?;
    Ok(Json(ItemPage { items, metadata }))
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<ItemEnvelope>, ApiError> {
    let id = parse_id(&id)?;
    let item = services.items.get_by_key(&id).await?;
    Ok(Json(ItemEnvelope { item }))
}

pub async fn create_item(
    Extension(services): Extension<Arc<AppServices>>,
    caller: Caller<User>,
    body: Result<Json<CreateItemRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let item = Item::new(body.name, body.description, body.price);
    item.validate()?;

    let id = services.items.create(item.clone()).await?;

    let created_by = *caller.key();
    let name = item.name.clone();
    services.tracker.spawn("item-audit", async move {
        tracing::info!(item_id = %id, created_by, name = %name, "item created");
    });

    let location = HeaderValue::from_str(&format!("/items/{id}"))
        .map_err(|e| ApiError::server(format!("invalid location header: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location);

    Ok((StatusCode::CREATED, headers, Json(ItemEnvelope { item })))
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<UpdateItemRequest>, JsonRejection>,
) -> Result<Json<ItemEnvelope>, ApiError> {
    let id = parse_id(&id)?;
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let mut item = services.items.get_by_key(&id).await?;
    if let Some(expected) = expected_version(&headers)? {
        if expected != item.version() {
            return Err(ApiError::EditConflict);
        }
    }

    body.apply(&mut item);
    item.validate()?;

    let item = services.items.update(&item).await?;
    Ok(Json(ItemEnvelope { item }))
}

pub async fn delete_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    services.items.delete(&id).await?;
    Ok(Json(json!({ "message": "item successfully deleted" })))
}

/// Malformed ids cannot name a stored item.
fn parse_id(raw: &str) -> Result<DocumentId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

fn expected_version(headers: &HeaderMap) -> Result<Option<u64>, ApiError> {
    let Some(value) = headers.get(EXPECTED_VERSION_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest(format!("{EXPECTED_VERSION_HEADER} must be an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_ids_are_not_found() {
        assert!(matches!(parse_id("not-a-uuid"), Err(ApiError::NotFound)));
        let id = DocumentId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn expected_version_header_is_optional_but_strict() {
        let mut headers = HeaderMap::new();
        assert_eq!(expected_version(&headers).unwrap(), None);

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("3"));
        assert_eq!(expected_version(&headers).unwrap(), Some(3));

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("three"));
        assert!(matches!(expected_version(&headers), Err(ApiError::BadRequest(_))));
    }
}
