//! Promotional banner repository.

use crate::model::ad::{Ad, AdId, AdPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, bool_to_int, ensure_connection_ready, int_to_bool, parse_timestamp,
    timestamp_to_db,
};
use crate::repo::RepoResult;
use crate::store::FileStore;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdQuery {
    pub active_only: bool,
    pub position: Option<String>,
}

impl AdQuery {
    /// Active banners for one placement slot.
    pub fn placement(position: impl Into<String>) -> Self {
        Self {
            active_only: true,
            position: Some(position.into()),
        }
    }

    fn matches(&self, ad: &Ad) -> bool {
        (!self.active_only || ad.active)
            && self
                .position
                .as_deref()
                .is_none_or(|position| ad.position == position)
    }
}

/// Banner persistence. Lists are ordered by `sort_order` then id.
pub trait AdRepository {
    fn list_ads(&self, query: &AdQuery) -> RepoResult<Vec<Ad>>;
    fn get_ad(&self, id: AdId) -> RepoResult<Option<Ad>>;
    fn create_ad(&self, ad: &Ad) -> RepoResult<AdId>;
    fn update_ad(&self, id: AdId, patch: &AdPatch) -> RepoResult<bool>;
    fn delete_ad(&self, id: AdId) -> RepoResult<bool>;
}

impl Record for Ad {
    type Id = AdId;
    const DOCUMENT: &'static str = "ads";

    fn record_id(&self) -> AdId {
        self.id
    }

    fn assign_id(&mut self, id: AdId) {
        self.id = id;
    }
}

pub struct JsonAdRepository {
    table: JsonTable<Ad>,
}

impl JsonAdRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl AdRepository for JsonAdRepository {
    fn list_ads(&self, query: &AdQuery) -> RepoResult<Vec<Ad>> {
        let mut ads: Vec<Ad> = self
            .table
            .all()?
            .into_iter()
            .filter(|ad| query.matches(ad))
            .collect();
        ads.sort_by_key(|ad| (ad.sort_order, ad.id));
        Ok(ads)
    }

    fn get_ad(&self, id: AdId) -> RepoResult<Option<Ad>> {
        self.table.find(&id)
    }

    fn create_ad(&self, ad: &Ad) -> RepoResult<AdId> {
        ad.validate()?;
        let mut record = ad.clone();
        record.created_at.get_or_insert_with(Utc::now);
        self.table.insert_with_next_id(record)
    }

    fn update_ad(&self, id: AdId, patch: &AdPatch) -> RepoResult<bool> {
        self.table.modify(&id, |ad| {
            patch.apply(ad);
            ad.validate()?;
            Ok(())
        })
    }

    fn delete_ad(&self, id: AdId) -> RepoResult<bool> {
        self.table.remove(&id)
    }
}

const AD_SELECT_SQL: &str = "SELECT
    id,
    title,
    image_url,
    link_url,
    position,
    active,
    sort_order,
    created_at
FROM ads";

pub struct SqliteAdRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAdRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["ads"])?;
        Ok(Self { conn })
    }
}

impl AdRepository for SqliteAdRepository<'_> {
    fn list_ads(&self, query: &AdQuery) -> RepoResult<Vec<Ad>> {
        let mut sql = format!("{AD_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        if query.active_only {
            sql.push_str(" AND active = 1");
        }
        if let Some(position) = &query.position {
            sql.push_str(" AND position = ?");
            bind_values.push(Value::Text(position.clone()));
        }
        sql.push_str(" ORDER BY sort_order ASC, id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut ads = Vec::new();
        while let Some(row) = rows.next()? {
            ads.push(parse_ad_row(row)?);
        }
        Ok(ads)
    }

    fn get_ad(&self, id: AdId) -> RepoResult<Option<Ad>> {
        load_ad(self.conn, id)
    }

    fn create_ad(&self, ad: &Ad) -> RepoResult<AdId> {
        ad.validate()?;
        self.conn.execute(
            "INSERT INTO ads (
                title,
                image_url,
                link_url,
                position,
                active,
                sort_order,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                ad.title.as_str(),
                ad.image_url.as_str(),
                ad.link_url.as_str(),
                ad.position.as_str(),
                bool_to_int(ad.active),
                ad.sort_order,
                timestamp_to_db(Some(ad.created_at.unwrap_or_else(Utc::now))),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_ad(&self, id: AdId, patch: &AdPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut ad) = load_ad(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut ad);
        ad.validate()?;
        tx.execute(
            "UPDATE ads
             SET
                title = ?1,
                image_url = ?2,
                link_url = ?3,
                position = ?4,
                active = ?5,
                sort_order = ?6
             WHERE id = ?7;",
            params![
                ad.title.as_str(),
                ad.image_url.as_str(),
                ad.link_url.as_str(),
                ad.position.as_str(),
                bool_to_int(ad.active),
                ad.sort_order,
                id,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_ad(&self, id: AdId) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM ads WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn load_ad(conn: &Connection, id: AdId) -> RepoResult<Option<Ad>> {
    conn.query_row(&format!("{AD_SELECT_SQL} WHERE id = ?1;"), [id], |row| {
        Ok(parse_ad_row(row))
    })
    .optional()?
    .transpose()
}

fn parse_ad_row(row: &Row<'_>) -> RepoResult<Ad> {
    Ok(Ad {
        id: row.get("id")?,
        title: row.get("title")?,
        image_url: row.get("image_url")?,
        link_url: row.get("link_url")?,
        position: row.get("position")?,
        active: int_to_bool(row.get("active")?, "ads.active")?,
        sort_order: row.get("sort_order")?,
        created_at: parse_timestamp(row.get("created_at")?, "ads.created_at")?,
        extra: ExtraFields::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::{AdQuery, AdRepository, JsonAdRepository, SqliteAdRepository};
    use crate::db::open_db_in_memory;
    use crate::model::ad::{Ad, AdPatch};
    use crate::store::FileStore;

    fn exercise(repo: &dyn AdRepository) {
        let mut late = Ad::new("Summer sale", "home_hero");
        late.sort_order = 5;
        let late_id = repo.create_ad(&late).unwrap();
        let early_id = repo.create_ad(&Ad::new("New in", "home_hero")).unwrap();
        let sidebar_id = repo.create_ad(&Ad::new("Gift cards", "sidebar")).unwrap();

        let hero: Vec<_> = repo
            .list_ads(&AdQuery::placement("home_hero"))
            .unwrap()
            .into_iter()
            .map(|ad| ad.id)
            .collect();
        assert_eq!(hero, vec![early_id, late_id]);

        let patch = AdPatch {
            active: Some(false),
            ..AdPatch::default()
        };
        assert!(repo.update_ad(sidebar_id, &patch).unwrap());
        assert!(repo.list_ads(&AdQuery::placement("sidebar")).unwrap().is_empty());
        assert_eq!(repo.list_ads(&AdQuery::default()).unwrap().len(), 3);

        assert!(repo.delete_ad(late_id).unwrap());
        assert!(repo.get_ad(late_id).unwrap().is_none());
    }

    #[test]
    fn json_repository_filters_by_placement() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&JsonAdRepository::new(FileStore::open(dir.path()).unwrap()));
    }

    #[test]
    fn sqlite_repository_filters_by_placement() {
        let conn = open_db_in_memory().unwrap();
        exercise(&SqliteAdRepository::try_new(&conn).unwrap());
    }
}
