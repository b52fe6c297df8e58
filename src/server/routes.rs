use crate::errors::{AppError, AppResult, ErrorKind};
use crate::models::contact::Contact;
use crate::models::division::DivisionId;
use crate::models::guest::{ContactInfo, GuestId};
use crate::models::guest_status::GuestStatus;
use crate::models::visit::{GuestVisit, Visit};
use crate::server::AppState;
use crate::server::auth::Staff;
use crate::utils::time::day_bounds;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Validation | ErrorKind::InvalidToken => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownGuest => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyCheckedIn | ErrorKind::NotCheckedIn => StatusCode::CONFLICT,
            ErrorKind::ProtectedResource => StatusCode::FORBIDDEN,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Persistence | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"rguestlog\""),
            );
        }
        response
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub division: usize,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub guid: GuestId,
    pub token: String,
    pub division: DivisionId,
    pub status: GuestStatus,
}

pub async fn register_guest(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let contact = ContactInfo {
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone,
        email: req.email,
        address: req.address,
    };
    let record = state.engine.ledger().register_guest(req.division, contact)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            guid: record.id,
            token: record.token.0,
            division: record.division,
            status: record.status,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub guid: GuestId,
    pub status: GuestStatus,
}

pub async fn guest_status(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let guid = GuestId::parse(&guid)?;
    let status = state.engine.ledger().guest_status(&guid)?;
    Ok(Json(StatusResponse { guid, status }))
}

pub async fn guest_visits(
    State(state): State<AppState>,
    Staff(auth): Staff,
    Path(guid): Path<String>,
) -> AppResult<Json<Vec<Visit>>> {
    let guid = GuestId::parse(&guid)?;
    Ok(Json(state.engine.ledger().fetch_visits(&auth, &guid)?))
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: NaiveDate,
}

pub async fn guests_on_day(
    State(state): State<AppState>,
    Staff(auth): Staff,
    Query(q): Query<DayQuery>,
) -> AppResult<Json<Vec<GuestVisit>>> {
    Ok(Json(state.engine.ledger().fetch_guests(&auth, q.date)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

pub async fn guest_contacts(
    State(state): State<AppState>,
    Staff(auth): Staff,
    Path(guid): Path<String>,
    Query(q): Query<RangeQuery>,
) -> AppResult<Json<Vec<Contact>>> {
    let guid = GuestId::parse(&guid)?;
    let timezone = state.engine.settings().timezone;

    let range = match (q.from, q.to) {
        (None, None) => None,
        (from, to) => {
            let start = match from {
                Some(d) => day_bounds(d, timezone)?.0,
                None => DateTime::<Utc>::MIN_UTC,
            };
            let end = match to {
                Some(d) => day_bounds(d, timezone)?.1,
                None => DateTime::<Utc>::MAX_UTC,
            };
            Some((start, end))
        }
    };

    let query = state.engine.tracer().fetch_contacts(&auth, &guid, range)?;
    Ok(Json(query.collect_all()?))
}

#[derive(Debug, Serialize)]
pub struct DivisionCount {
    pub division: DivisionId,
    pub name: String,
    pub count: usize,
}

pub async fn divisions(State(state): State<AppState>) -> AppResult<Json<Vec<DivisionCount>>> {
    let engine = &state.engine;
    let counts = engine
        .occupancy()?
        .into_iter()
        .map(|(division, count)| DivisionCount {
            division,
            name: engine.divisions().name(division).unwrap_or_default().to_string(),
            count,
        })
        .collect();
    Ok(Json(counts))
}
