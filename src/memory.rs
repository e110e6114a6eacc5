//! In-memory repositories and fakes backing `AppState::fake`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{repo::UserRepository, repo_types::User, roles::Role},
    contacts::{
        repo::ContactRepository,
        repo_types::{Contact, ContactFilter, ContactPatch, NewContact, Page},
    },
    db::{RepoError, RepoResult},
    mail::Mailer,
    storage::ImageStore,
};

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn create(&self, email: &str, password_hash: &str) -> RepoResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == email) {
            return Err(RepoError::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role: Role::User,
            is_verified: false,
            avatar_url: None,
            token_version: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn mark_verified(&self, id: Uuid) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(u) if !u.is_verified => {
                u.is_verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_password(
        &self,
        id: Uuid,
        expected_version: i32,
        password_hash: &str,
    ) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(u) if u.token_version == expected_version => {
                u.password_hash = password_hash.to_string();
                u.token_version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_avatar(&self, id: Uuid, url: &str) -> RepoResult<Option<User>> {
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&id).map(|u| {
            u.avatar_url = Some(url.to_string());
            u.clone()
        }))
    }

    async fn set_role(&self, id: Uuid, role: Role) -> RepoResult<Option<User>> {
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(&id).map(|u| {
            u.role = role;
            u.clone()
        }))
    }

    async fn list(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
        let mut all: Vec<User> = self.users.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryContacts {
    contacts: Mutex<HashMap<Uuid, Contact>>,
}

fn email_taken(all: &HashMap<Uuid, Contact>, owner_id: Uuid, email: &str, except: Option<Uuid>) -> bool {
    let email = email.to_lowercase();
    all.values().any(|c| {
        c.owner_id == owner_id && Some(c.id) != except && c.email.to_lowercase() == email
    })
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn birthday_code(c: &Contact) -> i32 {
    u8::from(c.birthday.month()) as i32 * 100 + c.birthday.day() as i32
}

#[async_trait]
impl ContactRepository for InMemoryContacts {
    async fn create(&self, owner_id: Uuid, c: &NewContact) -> RepoResult<Contact> {
        let mut all = self.contacts.lock().unwrap();
        if email_taken(&all, owner_id, &c.email, None) {
            return Err(RepoError::Conflict);
        }
        let now = OffsetDateTime::now_utc();
        let contact = Contact {
            id: Uuid::new_v4(),
            owner_id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
            birthday: c.birthday,
            note: c.note.clone(),
            created_at: now,
            updated_at: now,
        };
        all.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn get(&self, owner_id: Uuid, id: Uuid) -> RepoResult<Option<Contact>> {
        let all = self.contacts.lock().unwrap();
        Ok(all.get(&id).filter(|c| c.owner_id == owner_id).cloned())
    }

    async fn list(&self, owner_id: Uuid, f: &ContactFilter, page: Page) -> RepoResult<Vec<Contact>> {
        let all = self.contacts.lock().unwrap();
        let mut rows: Vec<Contact> = all
            .values()
            .filter(|c| c.owner_id == owner_id)
            .filter(|c| f.first_name.as_deref().map_or(true, |n| contains_ci(&c.first_name, n)))
            .filter(|c| f.last_name.as_deref().map_or(true, |n| contains_ci(&c.last_name, n)))
            .filter(|c| {
                f.email
                    .as_deref()
                    .map_or(true, |e| c.email.to_lowercase() == e.to_lowercase())
            })
            .filter(|c| f.birthday_from.map_or(true, |d| c.birthday >= d))
            .filter(|c| f.birthday_to.map_or(true, |d| c.birthday <= d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
        });
        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn update(&self, owner_id: Uuid, id: Uuid, p: &ContactPatch) -> RepoResult<Option<Contact>> {
        let mut all = self.contacts.lock().unwrap();
        if !all.get(&id).is_some_and(|c| c.owner_id == owner_id) {
            return Ok(None);
        }
        if let Some(email) = &p.email {
            if email_taken(&all, owner_id, email, Some(id)) {
                return Err(RepoError::Conflict);
            }
        }
        let Some(c) = all.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = &p.first_name {
            c.first_name = v.clone();
        }
        if let Some(v) = &p.last_name {
            c.last_name = v.clone();
        }
        if let Some(v) = &p.email {
            c.email = v.clone();
        }
        if let Some(v) = &p.phone {
            c.phone = v.clone();
        }
        if let Some(v) = p.birthday {
            c.birthday = v;
        }
        if let Some(v) = &p.note {
            c.note = v.clone();
        }
        c.updated_at = OffsetDateTime::now_utc();
        Ok(Some(c.clone()))
    }

    async fn delete(&self, owner_id: Uuid, id: Uuid) -> RepoResult<bool> {
        let mut all = self.contacts.lock().unwrap();
        if all.get(&id).is_some_and(|c| c.owner_id == owner_id) {
            all.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn with_birthday_codes(&self, owner_id: Uuid, codes: &[i32]) -> RepoResult<Vec<Contact>> {
        let all = self.contacts.lock().unwrap();
        Ok(all
            .values()
            .filter(|c| c.owner_id == owner_id && codes.contains(&birthday_code(c)))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps every message instead of delivering it. Clones share the outbox.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
}

impl RecordingMailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Waits until at least `n` messages were sent. Delivery runs on
    /// spawned tasks.
    pub async fn wait_for(&self, n: usize) {
        let delivered = async {
            while self.count() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), delivered)
            .await
            .expect("mail was not delivered");
    }

    /// Gives any spawned send a chance to land before asserting nothing did.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pub fn last_to(&self, to: &str) -> Option<SentMail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.to == to)
            .cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Stands in for a slow SMTP relay.
pub struct SlowMailer(pub Duration);

#[async_trait]
impl Mailer for SlowMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

pub struct FakeImageStore;

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn upload(&self, key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{key}"))
    }
}

/// Pulls the token out of the last link in a mail body.
pub fn token_from_body(body: &str) -> Option<String> {
    body.split_whitespace()
        .filter_map(|w| w.rsplit_once('/').map(|(_, t)| t))
        .filter(|t| t.split('.').count() == 3)
        .last()
        .map(str::to_string)
}
