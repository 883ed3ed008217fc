//! Rating repository contract and implementations.

use crate::model::product::ProductId;
use crate::model::rating::{Rating, RatingId, RatingPatch};
use crate::model::ExtraFields;
use crate::repo::json_table::{JsonTable, Record};
use crate::repo::sql_support::{
    begin_immediate, ensure_connection_ready, parse_timestamp, timestamp_to_db,
};
use crate::repo::{RepoError, RepoResult};
use crate::store::FileStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Ratings persistence. Lists are newest first (highest id first).
pub trait RatingRepository {
    /// Lists ratings, optionally for one product only.
    fn list_ratings(&self, product_id: Option<ProductId>) -> RepoResult<Vec<Rating>>;
    fn get_rating(&self, id: RatingId) -> RepoResult<Option<Rating>>;
    fn create_rating(&self, rating: &Rating) -> RepoResult<RatingId>;
    fn update_rating(&self, id: RatingId, patch: &RatingPatch) -> RepoResult<bool>;
    fn delete_rating(&self, id: RatingId) -> RepoResult<bool>;
}

impl Record for Rating {
    type Id = RatingId;
    const DOCUMENT: &'static str = "ratings";

    fn record_id(&self) -> RatingId {
        self.id
    }

    fn assign_id(&mut self, id: RatingId) {
        self.id = id;
    }
}

pub struct JsonRatingRepository {
    table: JsonTable<Rating>,
}

impl JsonRatingRepository {
    pub fn new(store: FileStore) -> Self {
        Self {
            table: JsonTable::new(store),
        }
    }
}

impl RatingRepository for JsonRatingRepository {
    fn list_ratings(&self, product_id: Option<ProductId>) -> RepoResult<Vec<Rating>> {
        let mut ratings: Vec<Rating> = self
            .table
            .all()?
            .into_iter()
            .filter(|rating| product_id.is_none_or(|id| rating.product_id == id))
            .collect();
        ratings.sort_by_key(|rating| std::cmp::Reverse(rating.id));
        Ok(ratings)
    }

    fn get_rating(&self, id: RatingId) -> RepoResult<Option<Rating>> {
        self.table.find(&id)
    }

    fn create_rating(&self, rating: &Rating) -> RepoResult<RatingId> {
        rating.validate()?;
        let mut record = rating.clone();
        record.created_at.get_or_insert_with(Utc::now);
        self.table.insert_with_next_id(record)
    }

    fn update_rating(&self, id: RatingId, patch: &RatingPatch) -> RepoResult<bool> {
        self.table.modify(&id, |rating| {
            patch.apply(rating);
            rating.validate()?;
            Ok(())
        })
    }

    fn delete_rating(&self, id: RatingId) -> RepoResult<bool> {
        self.table.remove(&id)
    }
}

const RATING_SELECT_SQL: &str = "SELECT
    id,
    product_id,
    rating,
    review,
    reviewer_name,
    reviewer_email,
    created_at
FROM ratings";

pub struct SqliteRatingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRatingRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["ratings"])?;
        Ok(Self { conn })
    }
}

impl RatingRepository for SqliteRatingRepository<'_> {
    fn list_ratings(&self, product_id: Option<ProductId>) -> RepoResult<Vec<Rating>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RATING_SELECT_SQL}
             WHERE (?1 IS NULL OR product_id = ?1)
             ORDER BY id DESC;"
        ))?;
        let mut rows = stmt.query([product_id])?;
        let mut ratings = Vec::new();
        while let Some(row) = rows.next()? {
            ratings.push(parse_rating_row(row)?);
        }
        Ok(ratings)
    }

    fn get_rating(&self, id: RatingId) -> RepoResult<Option<Rating>> {
        load_rating(self.conn, id)
    }

    fn create_rating(&self, rating: &Rating) -> RepoResult<RatingId> {
        rating.validate()?;
        self.conn.execute(
            "INSERT INTO ratings (
                product_id,
                rating,
                review,
                reviewer_name,
                reviewer_email,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                rating.product_id,
                i64::from(rating.rating),
                rating.review.as_str(),
                rating.reviewer_name.as_str(),
                rating.reviewer_email.as_deref(),
                timestamp_to_db(Some(rating.created_at.unwrap_or_else(Utc::now))),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_rating(&self, id: RatingId, patch: &RatingPatch) -> RepoResult<bool> {
        let tx = begin_immediate(self.conn)?;
        let Some(mut rating) = load_rating(&tx, id)? else {
            return Ok(false);
        };
        patch.apply(&mut rating);
        rating.validate()?;
        tx.execute(
            "UPDATE ratings
             SET rating = ?1, review = ?2, reviewer_name = ?3
             WHERE id = ?4;",
            params![
                i64::from(rating.rating),
                rating.review.as_str(),
                rating.reviewer_name.as_str(),
                id,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_rating(&self, id: RatingId) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM ratings WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn load_rating(conn: &Connection, id: RatingId) -> RepoResult<Option<Rating>> {
    conn.query_row(
        &format!("{RATING_SELECT_SQL} WHERE id = ?1;"),
        [id],
        |row| Ok(parse_rating_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_rating_row(row: &Row<'_>) -> RepoResult<Rating> {
    let score: i64 = row.get("rating")?;
    let rating = u8::try_from(score).map_err(|_| {
        RepoError::InvalidData(format!("invalid rating `{score}` in ratings.rating"))
    })?;

    Ok(Rating {
        id: row.get("id")?,
        product_id: row.get("product_id")?,
        rating,
        review: row.get("review")?,
        reviewer_name: row.get("reviewer_name")?,
        reviewer_email: row.get("reviewer_email")?,
        created_at: parse_timestamp(row.get("created_at")?, "ratings.created_at")?,
        extra: ExtraFields::new(),
    })
}
