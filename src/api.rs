//! HTTP admin API for the dashboard.
//!
//! Thin handlers over the store, the outbound gateway and the scheduler.
//! Errors are `{"error": "..."}` with the status mapped from [`WaslaError`].

use crate::gateway::{OutboundGateway, Scheduler};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use wasla_channels::whatsapp::ConnectionManager;
use wasla_core::{
    config::ApiConfig,
    error::WaslaError,
    message::{jid_user, to_jid, GroupInfo, OutboundPayload},
};
use wasla_memory::{
    store::{DEFAULT_RESPONSE_KEY, MENU_DOCUMENT_KEY},
    CartItem, Store,
};

type ApiError = (StatusCode, Json<Value>);
type ApiResult = Result<Json<Value>, ApiError>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    store: Store,
    outbound: OutboundGateway,
    scheduler: Scheduler,
    connection: Arc<ConnectionManager>,
    api_key: Option<String>,
}

impl ApiState {
    pub fn new(
        config: &ApiConfig,
        store: Store,
        outbound: OutboundGateway,
        scheduler: Scheduler,
        connection: Arc<ConnectionManager>,
    ) -> Self {
        let api_key = if config.api_key.is_empty() {
            None
        } else {
            Some(config.api_key.clone())
        };
        Self {
            store,
            outbound,
            scheduler,
            connection,
            api_key,
        }
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({"error": msg.into()})))
}

/// Map a domain error onto an HTTP status.
fn map_error(e: WaslaError) -> ApiError {
    let status = match e {
        WaslaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        WaslaError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        WaslaError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("API request failed: {e}");
    }
    api_error(status, e.to_string())
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Bearer token check; a no-op when no key is configured.
fn authorize(headers: &HeaderMap, state: &ApiState) -> Result<(), ApiError> {
    let Some(ref key) = state.api_key else {
        return Ok(());
    };
    let value = headers
        .get("authorization")
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing Authorization header"))?
        .to_str()
        .map_err(|_| api_error(StatusCode::UNAUTHORIZED, "invalid Authorization header"))?;

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => Ok(()),
        _ => Err(api_error(StatusCode::UNAUTHORIZED, "invalid token")),
    }
}

/// Storage liveness gate: 503 before any side effect when the database is gone.
async fn ensure_store(state: &ApiState) -> Result<(), ApiError> {
    state.store.ping().await.map_err(|e| {
        warn!("API storage check failed: {e}");
        api_error(StatusCode::SERVICE_UNAVAILABLE, "Database not connected")
    })
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid request: {e}")))
}

/// A required non-blank string field.
fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(api_error(StatusCode::BAD_REQUEST, format!("missing {name}"))),
    }
}

// --- link ---

/// `GET /qr`
async fn qr(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    if let Some(code) = state.connection.pending_qr() {
        return Ok(Json(json!({"qr": code})));
    }
    if state.connection.is_connected() {
        return Ok(Json(json!({"qr": null, "message": "Already connected"})));
    }
    Err(api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "QR code not generated yet",
    ))
}

/// `GET /status`
async fn status(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    Ok(Json(json!({
        "connected": state.connection.is_connected(),
        "state": state.connection.state().as_str(),
        "loggedOut": state.connection.is_logged_out(),
    })))
}

/// `POST /pair`: fresh pairing after a logout.
async fn pair(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    match state.connection.repair().await {
        Ok(true) => Ok(Json(json!({
            "status": "pairing",
            "message": "Credentials cleared, waiting for QR code",
        }))),
        Ok(false) => Err(api_error(StatusCode::CONFLICT, "link is active")),
        Err(e) => Err(map_error(e)),
    }
}

// --- sending ---

#[derive(Debug, Deserialize)]
struct SendRequest {
    to: Option<String>,
    message: Option<String>,
}

/// `POST /send`: `to` is a phone number.
async fn send(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let to = required(req.to, "to")?;
    let message = required(req.message, "message")?;
    ensure_store(&state).await?;

    let jid = to_jid(&to);
    let id = state
        .outbound
        .send_rate_limited(&jid, &OutboundPayload::text(message))
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Message sent", "to": jid, "messageId": id})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    chat_id: Option<String>,
    message: Option<String>,
}

/// `POST /send-message`: `chatId` is a JID (or bare number).
async fn send_message(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let chat_id = to_jid(&required(req.chat_id, "chatId")?);
    let message = required(req.message, "message")?;
    ensure_store(&state).await?;

    let id = state
        .outbound
        .send_rate_limited(&chat_id, &OutboundPayload::text(message))
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Message sent", "chatId": chat_id, "messageId": id})))
}

#[derive(Debug, Deserialize)]
struct BulkRequest {
    #[serde(default)]
    numbers: Vec<String>,
    message: Option<String>,
}

/// `POST /send-bulk`: one result per number; a failure does not stop the rest.
async fn send_bulk(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<BulkRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let message = required(req.message, "message")?;
    if req.numbers.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing numbers"));
    }
    ensure_store(&state).await?;

    let payload = OutboundPayload::text(message);
    let mut results = Vec::with_capacity(req.numbers.len());
    let mut sent = 0usize;
    for number in &req.numbers {
        let jid = to_jid(number);
        let result = match state.outbound.send_rate_limited(&jid, &payload).await {
            Ok(id) => {
                sent += 1;
                json!({"number": number, "status": "sent", "messageId": id})
            }
            Err(WaslaError::RateLimited { .. }) => {
                json!({"number": number, "status": "rate_limited"})
            }
            Err(e) => json!({"number": number, "status": "failed", "error": e.to_string()}),
        };
        results.push(result);
    }
    info!("bulk send: {sent}/{} delivered", req.numbers.len());
    Ok(Json(json!({"sent": sent, "results": results})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendFileRequest {
    chat_id: Option<String>,
    file_path: Option<String>,
    caption: Option<String>,
}

/// `POST /send-file`
async fn send_file(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<SendFileRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let chat_id = to_jid(&required(req.chat_id, "chatId")?);
    let file_path = required(req.file_path, "filePath")?;
    let path = std::path::Path::new(&file_path);
    if !path.is_file() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("file not found: {file_path}"),
        ));
    }

    let payload = OutboundPayload::Document {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        path: file_path.clone(),
        caption: req.caption,
    };
    let id = state
        .outbound
        .send(&chat_id, &payload)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "File sent", "chatId": chat_id, "messageId": id})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    chat_id: Option<String>,
    message: Option<String>,
    scheduled_time: Option<String>,
}

/// `POST /schedule-message`: `scheduledTime` is RFC 3339.
async fn schedule_message(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let chat_id = to_jid(&required(req.chat_id, "chatId")?);
    let message = required(req.message, "message")?;
    let raw_time = required(req.scheduled_time, "scheduledTime")?;
    let at = DateTime::parse_from_rfc3339(raw_time.trim())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid scheduledTime: {e}")))?
        .with_timezone(&Utc);

    let job = state
        .scheduler
        .schedule(&chat_id, &message, at)
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Message scheduled", "scheduled": job})))
}

/// `GET /scheduled-messages`
async fn scheduled_messages(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    Ok(Json(json!(state.scheduler.pending())))
}

/// `DELETE /schedule-message/{id}`
async fn cancel_scheduled(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult {
    authorize(&headers, &state)?;
    if state.scheduler.cancel(&id) {
        Ok(Json(json!({"message": "Scheduled message cancelled"})))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "scheduled message not found"))
    }
}

// --- auto-replies & default response ---

#[derive(Debug, Deserialize)]
struct AutoReplyRequest {
    keyword: Option<String>,
    response: Option<String>,
}

/// `POST /set-auto-reply`, `POST /add-response`
async fn set_auto_reply(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<AutoReplyRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let keyword = required(req.keyword, "keyword")?;
    let response = required(req.response, "response")?;
    ensure_store(&state).await?;

    let id = state
        .store
        .upsert_auto_reply(&keyword, &response)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Response saved", "id": id})))
}

/// `GET /responses`
async fn responses(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let replies = state.store.list_auto_replies().await.map_err(map_error)?;
    Ok(Json(json!(replies)))
}

/// `DELETE /delete-response/{id}`
async fn delete_response(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    if state.store.delete_auto_reply(id).await.map_err(map_error)? {
        Ok(Json(json!({"message": "Response deleted"})))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "response not found"))
    }
}

/// `GET /default-response`
async fn get_default_response(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let response = state
        .store
        .get_setting(DEFAULT_RESPONSE_KEY)
        .await
        .map_err(map_error)?
        .unwrap_or_default();
    Ok(Json(json!({"response": response})))
}

#[derive(Debug, Deserialize)]
struct DefaultResponseRequest {
    response: Option<String>,
}

/// `POST /default-response`
async fn set_default_response(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<DefaultResponseRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let response = required(req.response, "response")?;
    ensure_store(&state).await?;
    state
        .store
        .set_setting(DEFAULT_RESPONSE_KEY, &response)
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Default response updated"})))
}

// --- menu & orders ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MenuFileRequest {
    file_path: Option<String>,
}

/// `POST /menu-file`: document sent for the menu trigger.
async fn menu_file(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<MenuFileRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let file_path = required(req.file_path, "filePath")?;
    ensure_store(&state).await?;
    state
        .store
        .set_setting(MENU_DOCUMENT_KEY, file_path.trim())
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Menu file updated"})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemRequest {
    name: Option<String>,
    price: Option<f64>,
    image_path: Option<String>,
}

/// `POST /add-item`
async fn add_item(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<AddItemRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let name = required(req.name, "name")?;
    let price = match req.price {
        Some(p) if p.is_finite() && p >= 0.0 => p,
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "missing or invalid price")),
    };
    ensure_store(&state).await?;

    let item = state
        .store
        .add_menu_item(name.trim(), price, req.image_path.as_deref())
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "Item added", "item": item})))
}

/// `GET /menu`
async fn menu(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let items = state.store.list_menu_items().await.map_err(map_error)?;
    Ok(Json(json!(items)))
}

/// `GET /orders`
async fn orders(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let orders = state.store.list_orders().await.map_err(map_error)?;
    Ok(Json(json!(orders)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmOrderRequest {
    chat_id: Option<String>,
    #[serde(default)]
    cart: Vec<CartItem>,
}

/// Confirmation text for a dashboard-placed order.
fn order_summary(order_id: i64, cart: &[CartItem]) -> String {
    let mut text = format!("تم تأكيد طلبك رقم {order_id}:");
    for item in cart {
        text.push_str(&format!("\n- {} × {}", item.name, item.quantity));
    }
    text
}

/// `POST /confirm-order`
async fn confirm_order(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<ConfirmOrderRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let chat_id = to_jid(&required(req.chat_id, "chatId")?);
    if req.cart.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "cart is empty"));
    }
    ensure_store(&state).await?;

    let order_id = state
        .store
        .create_order(&chat_id, &req.cart)
        .await
        .map_err(map_error)?;
    info!("order {order_id} confirmed for {chat_id}");

    let confirmation = OutboundPayload::text(order_summary(order_id, &req.cart));
    let delivered = match state.outbound.send(&chat_id, &confirmation).await {
        Ok(_) => true,
        Err(e) => {
            warn!("order {order_id} confirmation to {chat_id} failed: {e}");
            false
        }
    };
    Ok(Json(json!({
        "message": "Order confirmed",
        "orderId": order_id,
        "notified": delivered,
    })))
}

// --- chats & groups ---

/// `GET /chats`
async fn chats(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let chats = state.store.list_chats().await.map_err(map_error)?;
    Ok(Json(json!(chats)))
}

/// `GET /messages/{chat_id}`
async fn chat_messages(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> ApiResult {
    authorize(&headers, &state)?;
    ensure_store(&state).await?;
    let messages = state
        .store
        .messages_for_chat(&to_jid(&chat_id))
        .await
        .map_err(map_error)?;
    Ok(Json(json!(messages)))
}

async fn fetch_groups(state: &ApiState) -> Result<Vec<GroupInfo>, ApiError> {
    let link = state
        .connection
        .link()
        .ok_or_else(|| map_error(WaslaError::NotConnected))?;
    link.fetch_groups().await.map_err(map_error)
}

/// `GET /groups`
async fn groups(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    let groups: Vec<Value> = fetch_groups(&state)
        .await?
        .into_iter()
        .map(|g| {
            let participants: Vec<&str> = g.participants.iter().map(|p| jid_user(p)).collect();
            json!({
                "id": g.id,
                "name": g.name,
                "memberCount": participants.len(),
                "participants": participants,
            })
        })
        .collect();
    Ok(Json(json!(groups)))
}

/// `GET /group-numbers`: every participant number once, sorted.
async fn group_numbers(headers: HeaderMap, State(state): State<ApiState>) -> ApiResult {
    authorize(&headers, &state)?;
    let numbers: BTreeSet<String> = fetch_groups(&state)
        .await?
        .iter()
        .flat_map(|g| g.participants.iter().map(|p| jid_user(p).to_string()))
        .collect();
    Ok(Json(json!({"count": numbers.len(), "numbers": numbers})))
}

// --- phone verification ---

#[derive(Debug, Deserialize)]
struct PhoneAuthRequest {
    phone: Option<String>,
}

/// `POST /phone-auth`: send a 6-digit code over WhatsApp.
async fn phone_auth(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<PhoneAuthRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let phone = required(req.phone, "phone")?;
    if !state.connection.is_connected() {
        return Err(map_error(WaslaError::NotConnected));
    }
    ensure_store(&state).await?;

    let code = rand::thread_rng().gen_range(100_000..1_000_000).to_string();
    state
        .store
        .store_otp(phone.trim(), &code)
        .await
        .map_err(map_error)?;
    state
        .outbound
        .send(
            &to_jid(&phone),
            &OutboundPayload::text(format!("رمز التحقق الخاص بك: {code}")),
        )
        .await
        .map_err(map_error)?;
    Ok(Json(json!({"message": "OTP sent via WhatsApp"})))
}

#[derive(Debug, Deserialize)]
struct VerifyOtpRequest {
    phone: Option<String>,
    otp: Option<String>,
}

/// `POST /verify-otp`
async fn verify_otp(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> ApiResult {
    authorize(&headers, &state)?;
    let req = parse_body(body)?;
    let phone = required(req.phone, "phone")?;
    let otp = required(req.otp, "otp")?;
    ensure_store(&state).await?;

    if state
        .store
        .consume_otp(phone.trim(), otp.trim())
        .await
        .map_err(map_error)?
    {
        Ok(Json(json!({"message": "Verified"})))
    } else {
        Err(api_error(StatusCode::BAD_REQUEST, "Invalid OTP"))
    }
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/qr", get(qr))
        .route("/status", get(status))
        .route("/pair", post(pair))
        .route("/send", post(send))
        .route("/send-message", post(send_message))
        .route("/send-bulk", post(send_bulk))
        .route("/send-file", post(send_file))
        .route("/schedule-message", post(schedule_message))
        .route("/schedule-message/{id}", delete(cancel_scheduled))
        .route("/scheduled-messages", get(scheduled_messages))
        .route("/set-auto-reply", post(set_auto_reply))
        .route("/add-response", post(set_auto_reply))
        .route("/responses", get(responses))
        .route("/delete-response/{id}", delete(delete_response))
        .route(
            "/default-response",
            get(get_default_response).post(set_default_response),
        )
        .route("/menu-file", post(menu_file))
        .route("/add-item", post(add_item))
        .route("/menu", get(menu))
        .route("/orders", get(orders))
        .route("/confirm-order", post(confirm_order))
        .route("/chats", get(chats))
        .route("/messages/{chat_id}", get(chat_messages))
        .route("/groups", get(groups))
        .route("/group-numbers", get(group_numbers))
        .route("/phone-auth", post(phone_auth))
        .route("/verify-otp", post(verify_otp))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server.
pub async fn serve(config: ApiConfig, state: ApiState) {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}
