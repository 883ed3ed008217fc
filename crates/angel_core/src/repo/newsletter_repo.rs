//! Newsletter subscriber repository.
//!
//! # Invariants
//! - Emails are stored normalized and are unique case-insensitively.

use crate::model::newsletter::{normalize_email, Subscriber, SubscriberId, SubscriberPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, bool_to_int, ensure_connection_ready, int_to_bool, parse_timestamp,
    timestamp_to_db,
};
use crate::repo::{RepoError, RepoResult};
use crate::store::{FileStore, Outcome};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub trait NewsletterRepository {
    /// Lists subscribers in id order.
    fn list_subscribers(&self, active_only: bool) -> RepoResult<Vec<Subscriber>>;
    fn get_subscriber(&self, id: SubscriberId) -> RepoResult<Option<Subscriber>>;
    fn find_subscriber_by_email(&self, email: &str) -> RepoResult<Option<Subscriber>>;
    /// Fails with [`RepoError::Conflict`] when the email is already stored.
    fn create_subscriber(&self, subscriber: &Subscriber) -> RepoResult<SubscriberId>;
    fn update_subscriber(&self, id: SubscriberId, patch: &SubscriberPatch) -> RepoResult<bool>;
    fn delete_subscriber(&self, id: SubscriberId) -> RepoResult<bool>;
}

impl Record for Subscriber {
    type Id = SubscriberId;
    const DOCUMENT: &'static str = "newsletter";

    fn record_id(&self) -> SubscriberId {
        self.id
    }

    fn assign_id(&mut self, id: SubscriberId) {
        self.id = id;
    }
}

fn prepare_new(subscriber: &Subscriber) -> RepoResult<Subscriber> {
    let mut record = subscriber.clone();
    record.email = normalize_email(&record.email);
    record.validate()?;
    record.subscribed_at.get_or_insert_with(Utc::now);
    Ok(record)
}

fn duplicate_email(email: &str) -> RepoError {
    RepoError::Conflict(format!("subscriber `{email}` already exists"))
}

pub struct JsonNewsletterRepository {
    table: JsonTable<Subscriber>,
}

impl JsonNewsletterRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl NewsletterRepository for JsonNewsletterRepository {
    fn list_subscribers(&self, active_only: bool) -> RepoResult<Vec<Subscriber>> {
        let mut subscribers: Vec<Subscriber> = self
            .table
            .all()?
            .into_iter()
            .filter(|subscriber| !active_only || subscriber.active)
            .collect();
        subscribers.sort_by_key(|subscriber| subscriber.id);
        Ok(subscribers)
    }

    fn get_subscriber(&self, id: SubscriberId) -> RepoResult<Option<Subscriber>> {
        self.table.find(&id)
    }

    fn find_subscriber_by_email(&self, email: &str) -> RepoResult<Option<Subscriber>> {
        let email = normalize_email(email);
        Ok(self
            .table
            .all()?
            .into_iter()
            .find(|subscriber| normalize_email(&subscriber.email) == email))
    }

    fn create_subscriber(&self, subscriber: &Subscriber) -> RepoResult<SubscriberId> {
        let mut record = prepare_new(subscriber)?;
        let store = self.table.store();
        self.table.mutate(|rows| {
            if rows
                .iter()
                .any(|existing| normalize_email(&existing.email) == record.email)
            {
                return Err(duplicate_email(&record.email));
            }
            let id = store.next_sequence(Subscriber::DOCUMENT, rows.max_id())?;
            record.assign_id(id);
            rows.push(record);
            Ok(Outcome::Changed(id))
        })
    }

    fn update_subscriber(&self, id: SubscriberId, patch: &SubscriberPatch) -> RepoResult<bool> {
        self.table.modify(&id, |subscriber| {
            patch.apply(subscriber);
            subscriber.validate()?;
            Ok(())
        })
    }

    fn delete_subscriber(&self, id: SubscriberId) -> RepoResult<bool> {
        self.table.remove(&id)
    }
}

const SUBSCRIBER_SELECT_SQL: &str = "SELECT id, email, name, active, subscribed_at FROM newsletter";

pub struct SqliteNewsletterRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNewsletterRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["newsletter"])?;
        Ok(Self { conn })
    }
}

impl NewsletterRepository for SqliteNewsletterRepository<'_> {
    fn list_subscribers(&self, active_only: bool) -> RepoResult<Vec<Subscriber>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SUBSCRIBER_SELECT_SQL} WHERE (?1 = 0 OR active = 1) ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(active_only)])?;
        let mut subscribers = Vec::new();
        while let Some(row) = rows.next()? {
            subscribers.push(parse_subscriber_row(row)?);
        }
        Ok(subscribers)
    }

    fn get_subscriber(&self, id: SubscriberId) -> RepoResult<Option<Subscriber>> {
        load_subscriber(self.conn, id)
    }

    fn find_subscriber_by_email(&self, email: &str) -> RepoResult<Option<Subscriber>> {
        self.conn
            .query_row(
                &format!("{SUBSCRIBER_SELECT_SQL} WHERE email = ?1 COLLATE NOCASE;"),
                [normalize_email(email)],
                |row| Ok(parse_subscriber_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn create_subscriber(&self, subscriber: &Subscriber) -> RepoResult<SubscriberId> {
        let record = prepare_new(subscriber)?;
        let tx = begin_immediate(self.conn)?;
        let exists: i64 = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM newsletter WHERE email = ?1 COLLATE NOCASE);",
            [record.email.as_str()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            return Err(duplicate_email(&record.email));
        }
        tx.execute(
            "INSERT INTO newsletter (email, name, active, subscribed_at)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                record.email.as_str(),
                record.name.as_deref(),
                bool_to_int(record.active),
                timestamp_to_db(record.subscribed_at),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn update_subscriber(&self, id: SubscriberId, patch: &SubscriberPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut subscriber) = load_subscriber(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut subscriber);
        subscriber.validate()?;
        tx.execute(
            "UPDATE newsletter SET name = ?1, active = ?2, subscribed_at = ?3 WHERE id = ?4;",
            params![
                subscriber.name.as_deref(),
                bool_to_int(subscriber.active),
                timestamp_to_db(subscriber.subscribed_at),
                id,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_subscriber(&self, id: SubscriberId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM newsletter WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn load_subscriber(conn: &Connection, id: SubscriberId) -> RepoResult<Option<Subscriber>> {
    conn.query_row(
        &format!("{SUBSCRIBER_SELECT_SQL} WHERE id = ?1;"),
        [id],
        |row| Ok(parse_subscriber_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_subscriber_row(row: &Row<'_>) -> RepoResult<Subscriber> {
    Ok(Subscriber {
        id: row.get("id")?,
        email: row.get("email")?,
        name: row.get("name")?,
        active: int_to_bool(row.get("active")?, "newsletter.active")?,
        subscribed_at: parse_timestamp(row.get("subscribed_at")?, "newsletter.subscribed_at")?,
        extra: ExtraFields::new(),
    })
}
