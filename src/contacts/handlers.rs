use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{BirthdaysQuery, CreateContactRequest, ListContactsQuery, UpdateContactRequest},
    repo_types::Contact,
    services,
};
use crate::{
    auth::extractors::AuthUser,
    error::ApiResult,
    extract::{Json, Path, Query},
    state::AppState,
};

pub fn contact_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route("/contacts/birthdays", get(upcoming_birthdays))
        .route(
            "/contacts/:id",
            get(get_contact).patch(update_contact).delete(delete_contact),
        )
}

#[instrument(skip(state))]
pub async fn list_contacts(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListContactsQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    let contacts = services::list_contacts(&state, user.id, q).await?;
    Ok(Json(contacts))
}

#[instrument(skip(state))]
pub async fn upcoming_birthdays(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<BirthdaysQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    let page = services::page(q.limit, q.offset)?;
    let contacts = services::upcoming_birthdays_from_today(&state, user.id, q.days, page).await?;
    Ok(Json(contacts))
}

#[instrument(skip(state))]
pub async fn get_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(services::get_contact(&state, user.id, id).await?))
}

#[instrument(skip(state, body))]
pub async fn create_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateContactRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<Contact>)> {
    let contact = services::create_contact(&state, user.id, body).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/contacts/{}", contact.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(contact)))
}

#[instrument(skip(state, body))]
pub async fn update_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateContactRequest>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(services::update_contact(&state, user.id, id, body).await?))
}

#[instrument(skip(state))]
pub async fn delete_contact(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    services::delete_contact(&state, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
