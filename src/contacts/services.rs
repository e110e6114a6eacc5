use time::Date;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    birthdays::{self, MAX_WINDOW_DAYS},
    dto::{CreateContactRequest, ListContactsQuery, UpdateContactRequest},
    repo_types::{Contact, ContactFilter, ContactPatch, NewContact, Page},
};
use crate::{
    db::RepoError,
    error::{ApiError, ApiResult},
    state::AppState,
    validation::{bounded_text, is_valid_phone, normalize_email},
};

pub const MAX_PAGE_LIMIT: i64 = 1000;
const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;
const NOTE_MAX: usize = 2000;

pub fn page(limit: i64, offset: i64) -> ApiResult<Page> {
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    if offset < 0 {
        return Err(ApiError::validation("offset must not be negative"));
    }
    Ok(Page { limit, offset })
}

fn phone(raw: &str) -> ApiResult<String> {
    let value = raw.trim();
    if is_valid_phone(value) {
        Ok(value.to_string())
    } else {
        Err(ApiError::validation("Invalid phone number"))
    }
}

fn note(raw: Option<String>) -> ApiResult<Option<String>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => bounded_text("note", text, 1, NOTE_MAX).map(Some),
    }
}

fn birthday(date: Date, today: Date) -> ApiResult<Date> {
    if date > today {
        return Err(ApiError::validation("birthday cannot be in the future"));
    }
    Ok(date)
}

fn today() -> Date {
    time::OffsetDateTime::now_utc().date()
}

fn duplicate(err: RepoError) -> ApiError {
    match err {
        RepoError::Conflict => ApiError::DuplicateEmail("A contact with this email already exists"),
        other => other.into(),
    }
}

pub fn validate_new(req: CreateContactRequest, today: Date) -> ApiResult<NewContact> {
    Ok(NewContact {
        first_name: bounded_text("first_name", &req.first_name, NAME_MIN, NAME_MAX)?,
        last_name: bounded_text("last_name", &req.last_name, NAME_MIN, NAME_MAX)?,
        email: normalize_email(&req.email)?,
        phone: phone(&req.phone)?,
        birthday: birthday(req.birthday, today)?,
        note: note(req.note)?,
    })
}

pub fn validate_patch(req: UpdateContactRequest, today: Date) -> ApiResult<ContactPatch> {
    Ok(ContactPatch {
        first_name: req
            .first_name
            .map(|v| bounded_text("first_name", &v, NAME_MIN, NAME_MAX))
            .transpose()?,
        last_name: req
            .last_name
            .map(|v| bounded_text("last_name", &v, NAME_MIN, NAME_MAX))
            .transpose()?,
        email: req.email.map(|v| normalize_email(&v)).transpose()?,
        phone: req.phone.map(|v| phone(&v)).transpose()?,
        birthday: req.birthday.map(|d| birthday(d, today)).transpose()?,
        note: req.note.map(note).transpose()?,
    })
}

pub async fn create_contact(
    st: &AppState,
    owner_id: Uuid,
    req: CreateContactRequest,
) -> ApiResult<Contact> {
    let new = validate_new(req, today())?;
    let contact = st.contacts.create(owner_id, &new).await.map_err(duplicate)?;
    info!(%owner_id, contact_id = %contact.id, "contact created");
    Ok(contact)
}

pub async fn get_contact(st: &AppState, owner_id: Uuid, id: Uuid) -> ApiResult<Contact> {
    st.contacts
        .get(owner_id, id)
        .await?
        .ok_or(ApiError::NotFound("Contact"))
}

pub async fn list_contacts(
    st: &AppState,
    owner_id: Uuid,
    q: ListContactsQuery,
) -> ApiResult<Vec<Contact>> {
    let page = page(q.limit, q.offset)?;
    if let (Some(from), Some(to)) = (q.birthday_from, q.birthday_to) {
        if from > to {
            return Err(ApiError::validation("birthday_from must not be after birthday_to"));
        }
    }
    let filter = ContactFilter {
        first_name: q.first_name.filter(|s| !s.trim().is_empty()).map(|s| s.trim().to_string()),
        last_name: q.last_name.filter(|s| !s.trim().is_empty()).map(|s| s.trim().to_string()),
        email: q.email.filter(|s| !s.trim().is_empty()).map(|s| s.trim().to_lowercase()),
        birthday_from: q.birthday_from,
        birthday_to: q.birthday_to,
    };
    Ok(st.contacts.list(owner_id, &filter, page).await?)
}

pub async fn update_contact(
    st: &AppState,
    owner_id: Uuid,
    id: Uuid,
    req: UpdateContactRequest,
) -> ApiResult<Contact> {
    let patch = validate_patch(req, today())?;
    let contact = st
        .contacts
        .update(owner_id, id, &patch)
        .await
        .map_err(duplicate)?
        .ok_or(ApiError::NotFound("Contact"))?;
    info!(%owner_id, contact_id = %id, "contact updated");
    Ok(contact)
}

pub async fn delete_contact(st: &AppState, owner_id: Uuid, id: Uuid) -> ApiResult<()> {
    if st.contacts.delete(owner_id, id).await? {
        info!(%owner_id, contact_id = %id, "contact deleted");
        Ok(())
    } else {
        warn!(%owner_id, contact_id = %id, "delete of unknown contact");
        Err(ApiError::NotFound("Contact"))
    }
}

/// Contacts with a birthday in `[today, today + window_days]`, soonest first.
pub async fn upcoming_birthdays(
    st: &AppState,
    owner_id: Uuid,
    today: Date,
    window_days: i64,
    page: Page,
) -> ApiResult<Vec<Contact>> {
    if !(0..=MAX_WINDOW_DAYS).contains(&window_days) {
        return Err(ApiError::validation(format!(
            "days must be between 0 and {MAX_WINDOW_DAYS}"
        )));
    }
    let codes = birthdays::month_day_codes(today, window_days);
    let mut rows: Vec<(i64, Contact)> = st
        .contacts
        .with_birthday_codes(owner_id, &codes)
        .await?
        .into_iter()
        .filter_map(|c| {
            birthdays::days_until(c.birthday, today)
                .filter(|d| *d <= window_days)
                .map(|d| (d, c))
        })
        .collect();
    rows.sort_by(|(da, a), (db, b)| {
        da.cmp(db)
            .then_with(|| a.last_name.cmp(&b.last_name))
            .then_with(|| a.first_name.cmp(&b.first_name))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(rows
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .map(|(_, c)| c)
        .collect())
}

pub async fn upcoming_birthdays_from_today(
    st: &AppState,
    owner_id: Uuid,
    window_days: i64,
    page: Page,
) -> ApiResult<Vec<Contact>> {
    upcoming_birthdays(st, owner_id, today(), window_days, page).await
}
