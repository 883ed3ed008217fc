//! Category repository contract and implementations.
//!
//! # Invariants
//! - Listing order is `sort_order` then id on both backends.
//! - The repository stores parent links as given; tree-level cycle checks
//!   belong to the catalog service.

use crate::model::category::{Category, CategoryId, CategoryPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, bool_to_int, ensure_connection_ready, int_to_bool, parse_timestamp,
    timestamp_to_db,
};
use crate::repo::RepoResult;
use crate::store::FileStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub trait CategoryRepository {
    fn list_categories(&self, active_only: bool) -> RepoResult<Vec<Category>>;
    fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>>;
    fn create_category(&self, category: &Category) -> RepoResult<CategoryId>;
    fn update_category(&self, id: CategoryId, patch: &CategoryPatch) -> RepoResult<bool>;
    fn delete_category(&self, id: CategoryId) -> RepoResult<bool>;
}

impl Record for Category {
    type Id = CategoryId;
    const DOCUMENT: &'static str = "categories";

    fn record_id(&self) -> CategoryId {
        self.id
    }

    fn assign_id(&mut self, id: CategoryId) {
        self.id = id;
    }
}

fn prepare_new(category: &Category) -> Category {
    let mut record = category.clone();
    // Stored ids are assigned later; a draft cannot point at itself yet.
    record.id = 0;
    if record.created_at.is_none() {
        record.created_at = Some(Utc::now());
    }
    record
}

pub struct JsonCategoryRepository {
    table: JsonTable<Category>,
}

impl JsonCategoryRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl CategoryRepository for JsonCategoryRepository {
    fn list_categories(&self, active_only: bool) -> RepoResult<Vec<Category>> {
        let mut categories: Vec<Category> = self
            .table
            .all()?
            .into_iter()
            .filter(|category| !active_only || category.active)
            .collect();
        categories.sort_by_key(|category| (category.sort_order, category.id));
        Ok(categories)
    }

    fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>> {
        self.table.find(&id)
    }

    fn create_category(&self, category: &Category) -> RepoResult<CategoryId> {
        category.validate()?;
        self.table.insert_with_next_id(prepare_new(category))
    }

    fn update_category(&self, id: CategoryId, patch: &CategoryPatch) -> RepoResult<bool> {
        self.table.modify(&id, |category| {
            patch.apply(category);
            category.validate()?;
            Ok(())
        })
    }

    fn delete_category(&self, id: CategoryId) -> RepoResult<bool> {
        self.table.remove(&id)
    }
}

const CATEGORY_SELECT_SQL: &str = "SELECT
    id,
    slug,
    name,
    description,
    parent_id,
    active,
    featured,
    sort_order,
    created_at,
    updated_at
FROM categories";

pub struct SqliteCategoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCategoryRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["categories"])?;
        Ok(Self { conn })
    }
}

impl CategoryRepository for SqliteCategoryRepository<'_> {
    fn list_categories(&self, active_only: bool) -> RepoResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CATEGORY_SELECT_SQL}
             WHERE (?1 = 0 OR active = 1)
             ORDER BY sort_order ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(active_only)])?;
        let mut categories = Vec::new();
        while let Some(row) = rows.next()? {
            categories.push(parse_category_row(row)?);
        }
        Ok(categories)
    }

    fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>> {
        load_category(self.conn, id)
    }

    fn create_category(&self, category: &Category) -> RepoResult<CategoryId> {
        category.validate()?;
        let record = prepare_new(category);
        self.conn.execute(
            "INSERT INTO categories (
                slug,
                name,
                description,
                parent_id,
                active,
                featured,
                sort_order,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                record.slug.as_str(),
                record.name.as_str(),
                record.description.as_str(),
                record.parent_id,
                bool_to_int(record.active),
                bool_to_int(record.featured),
                record.sort_order,
                timestamp_to_db(record.created_at),
                timestamp_to_db(record.updated_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_category(&self, id: CategoryId, patch: &CategoryPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut category) = load_category(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut category);
        category.validate()?;

        tx.execute(
            "UPDATE categories
             SET
                slug = ?1,
                name = ?2,
                description = ?3,
                parent_id = ?4,
                active = ?5,
                featured = ?6,
                sort_order = ?7,
                updated_at = ?8
             WHERE id = ?9;",
            params![
                category.slug.as_str(),
                category.name.as_str(),
                category.description.as_str(),
                category.parent_id,
                bool_to_int(category.active),
                bool_to_int(category.featured),
                category.sort_order,
                timestamp_to_db(category.updated_at),
                id,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_category(&self, id: CategoryId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn load_category(conn: &Connection, id: CategoryId) -> RepoResult<Option<Category>> {
    conn.query_row(
        &format!("{CATEGORY_SELECT_SQL} WHERE id = ?1;"),
        [id],
        |row| Ok(parse_category_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_category_row(row: &Row<'_>) -> RepoResult<Category> {
    Ok(Category {
        id: row.get("id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        description: row.get("description")?,
        parent_id: row.get("parent_id")?,
        active: int_to_bool(row.get("active")?, "categories.active")?,
        featured: int_to_bool(row.get("featured")?, "categories.featured")?,
        sort_order: row.get("sort_order")?,
        created_at: parse_timestamp(row.get("created_at")?, "categories.created_at")?,
        updated_at: parse_timestamp(row.get("updated_at")?, "categories.updated_at")?,
        extra: ExtraFields::new(),
    })
}
