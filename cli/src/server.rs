use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use food_diary_core::db::is_storage_error;
use food_diary_core::error::ImportError;
use food_diary_core::models::{
    Category, ImportSummary, NewNote, NewProduct, Note, Page, PagesFilter, PagesSearchResult,
    Product, ProductsSearchRequest, ProductsSearchResult, UpdateNote, parse_date,
};
use food_diary_core::service::DiaryService;

const BODY_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<DiaryService>>,
    api_key: Option<String>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, DiaryService> {
        self.svc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct CategoryRequest {
    name: String,
}

#[derive(Deserialize)]
struct DropdownQuery {
    filter: Option<String>,
}

#[derive(Deserialize)]
struct CreatePageRequest {
    date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    start_date: String,
    end_date: String,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Import failures and rejected input become 400, missing entities 404,
/// and anything SQLite raised 500.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<ImportError>().is_some() {
            return Self::BadRequest(err.to_string());
        }
        let message = err.to_string();
        if message.ends_with("not found") {
            Self::NotFound(message)
        } else if is_storage_error(&err) {
            Self::Internal(err)
        } else {
            Self::BadRequest(message)
        }
    }
}

fn parse_date_param(value: &str) -> Result<NaiveDate, ApiError> {
    parse_date(value).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Category handlers ---

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.service().list_categories()?))
}

async fn create_category(
    State(state): State<AppState>,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = state.service().create_category(&req.name)?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn rename_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    Ok(Json(state.service().rename_category(id, &req.name)?))
}

async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service().delete_category(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Category {id} not found")))
    }
}

async fn categories_dropdown(
    State(state): State<AppState>,
    Query(query): Query<DropdownQuery>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(
        state.service().categories_dropdown(query.filter.as_deref())?,
    ))
}

// --- Product handlers ---

async fn search_products(
    State(state): State<AppState>,
    Query(request): Query<ProductsSearchRequest>,
) -> Result<Json<ProductsSearchResult>, ApiError> {
    Ok(Json(state.service().search_products(&request)?))
}

async fn create_product(
    State(state): State<AppState>,
    Json(req): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let svc = state.service();
    svc.get_category(req.category_id).map_err(|_| {
        ApiError::BadRequest(format!("Category with id {} not found", req.category_id))
    })?;
    let product = svc.create_product(&req)?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    let product = state
        .service()
        .get_product(id)
        .map_err(|_| ApiError::NotFound(format!("Product {id} not found")))?;
    Ok(Json(product))
}

async fn edit_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewProduct>,
) -> Result<Json<Product>, ApiError> {
    let svc = state.service();
    svc.get_product(id)
        .map_err(|_| ApiError::NotFound(format!("Product {id} not found")))?;
    svc.get_category(req.category_id).map_err(|_| {
        ApiError::BadRequest(format!("Category with id {} not found", req.category_id))
    })?;
    Ok(Json(svc.edit_product(id, &req)?))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service().delete_product(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Product {id} not found")))
    }
}

async fn delete_products(
    State(state): State<AppState>,
    Json(ids): Json<Vec<i64>>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state.service().delete_products(&ids)?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn products_dropdown(
    State(state): State<AppState>,
    Query(query): Query<DropdownQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(
        state.service().products_dropdown(query.filter.as_deref())?,
    ))
}

// --- Page handlers ---

async fn search_pages(
    State(state): State<AppState>,
    Query(filter): Query<PagesFilter>,
) -> Result<Json<PagesSearchResult>, ApiError> {
    Ok(Json(state.service().search_pages(&filter)?))
}

async fn create_page(
    State(state): State<AppState>,
    Json(req): Json<CreatePageRequest>,
) -> Result<(StatusCode, Json<Page>), ApiError> {
    let date = parse_date_param(&req.date)?;
    let page = state.service().create_page(date)?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn get_page(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Page>, ApiError> {
    let page = state
        .service()
        .get_page(id)
        .map_err(|_| ApiError::NotFound(format!("Page {id} not found")))?;
    Ok(Json(page))
}

async fn get_page_by_date(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<Json<Page>, ApiError> {
    let date = parse_date_param(&date_str)?;
    let page = state
        .service()
        .get_page_by_date(date)?
        .ok_or_else(|| ApiError::NotFound(format!("No page for {date}")))?;
    Ok(Json(page))
}

async fn delete_pages(
    State(state): State<AppState>,
    Json(ids): Json<Vec<i64>>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state.service().delete_pages(&ids)?;
    Ok(Json(DeletedResponse { deleted }))
}

// --- Note handlers ---

async fn create_note(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
    Json(req): Json<NewNote>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    if req.quantity <= 0.0 {
        return Err(ApiError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let svc = state.service();
    svc.get_page(page_id)
        .map_err(|_| ApiError::NotFound(format!("Page {page_id} not found")))?;
    svc.get_product(req.product_id).map_err(|_| {
        ApiError::BadRequest(format!("Product with id {} not found", req.product_id))
    })?;

    let note = svc.add_note(page_id, &req)?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn edit_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateNote>,
) -> Result<Json<Note>, ApiError> {
    if req.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }

    let svc = state.service();
    svc.get_note(id)
        .map_err(|_| ApiError::NotFound(format!("Note {id} not found")))?;
    if let Some(product_id) = req.product_id {
        svc.get_product(product_id).map_err(|_| {
            ApiError::BadRequest(format!("Product with id {product_id} not found"))
        })?;
    }
    Ok(Json(svc.edit_note(id, &req)?))
}

async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.service().delete_note(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Note {id} not found")))
    }
}

// --- Export / Import handlers ---

async fn export_json(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let start = parse_date_param(&query.start_date)?;
    let end = parse_date_param(&query.end_date)?;
    let bytes = state.service().export_json(start, end)?;

    let disposition = format!("attachment; filename=\"food-diary-{start}-{end}.json\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn import_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ImportSummary>, ApiError> {
    Ok(Json(state.service().import_json(&body)?))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/categories/dropdown", get(categories_dropdown))
        .route(
            "/api/categories/{id}",
            put(rename_category).delete(delete_category),
        )
        .route("/api/products", get(search_products).post(create_product))
        .route("/api/products/dropdown", get(products_dropdown))
        .route("/api/products/batch", delete(delete_products))
        .route(
            "/api/products/{id}",
            get(get_product).put(edit_product).delete(delete_product),
        )
        .route("/api/pages", get(search_pages).post(create_page))
        .route("/api/pages/batch", delete(delete_pages))
        .route("/api/pages/date/{date}", get(get_page_by_date))
        .route("/api/pages/{id}", get(get_page))
        .route("/api/pages/{id}/notes", post(create_note))
        .route("/api/notes/{id}", put(edit_note).delete(delete_note))
        .route("/api/export/json", get(export_json))
        .route("/api/import/json", post(import_json))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

/// First and last four characters of the key. Short keys are fully masked.
fn key_hint(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    svc: DiaryService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            key_hint(key)
        );
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    tracing::info!(%bind, port, auth = api_key.is_some(), "server started");
    axum::serve(listener, app).await?;

    Ok(())
}
