//! Document store backed by Sled.
//!
//! Each collection lives in its own tree, keyed by the 16 raw bytes of the
//! record's UUID, with the record serialized as canonical JSON. A second
//! tree per collection (`<name>.unique`) maps the collection's unique key
//! (an email address) to the owning id. Writes that touch both trees run in
//! a single Sled transaction so a duplicate key can never slip in between
//! the check and the insert.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Transactional, Tree};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Collections opened at start-up.
pub const COLLECTIONS: [&str; 4] = ["users", "customers", "jobs", "pipelines"];

/// A document type that can live in a [`Storage`] collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Tree name.
    const COLLECTION: &'static str;
    /// Human readable name used in error messages ("Customer not found").
    const KIND: &'static str;
    /// Field names accepted by the `sort` list parameter.
    const SORT_FIELDS: &'static [&'static str];
    const DEFAULT_SORT: &'static str = "createdAt";
    /// `None` means unlimited.
    const DEFAULT_LIMIT: Option<usize> = None;

    fn id(&self) -> Uuid;

    /// Value that must be unique across the collection, if any.
    fn unique_key(&self) -> Option<String> {
        None
    }

    fn sort_key(&self, field: &str) -> Option<SortKey>;

    /// Filter hook for list queries; fields that do not apply are ignored.
    fn matches(&self, query: &ListQuery) -> bool {
        let _ = query;
        true
    }

    /// Stamp the modification time.
    fn touch(&mut self, at: DateTime<Utc>);
}

/// Comparable projection of a record field.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum SortKey {
    Text(String),
    Number(f64),
    Time(DateTime<Utc>),
}

impl SortKey {
    pub fn text(value: &str) -> Self {
        SortKey::Text(value.to_lowercase())
    }
}

/// Query-string parameters shared by every list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Field to sort by, prefix with `-` for descending order.
    pub sort: Option<String>,
    /// Maximum number of records, `0` for no limit.
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    /// Case-insensitive text search.
    pub q: Option<String>,
    pub status: Option<String>,
    pub pipeline: Option<Uuid>,
    pub customer: Option<Uuid>,
    pub step: Option<String>,
}

impl ListQuery {
    /// True when there is no `q` parameter or one of `fields` contains it.
    pub fn text_matches<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> bool {
        let needle = match self.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => q.to_lowercase(),
            _ => return true,
        };
        fields
            .into_iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[derive(Clone)]
struct Collection {
    docs: Tree,
    unique: Tree,
}

/// Handle to the embedded database. Cheap to clone; all clones share the
/// same Sled instance.
#[derive(Clone)]
pub struct Storage {
    db: Db,
    collections: HashMap<&'static str, Collection>,
}

impl Storage {
    /// Open or create the Sled database at `path` and its collection trees.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// In-memory database removed on drop. Used by tests and demos.
    pub fn temporary() -> AppResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: Db) -> AppResult<Self> {
        let mut collections = HashMap::new();
        for name in COLLECTIONS {
            let docs = db.open_tree(name)?;
            let unique = db.open_tree(format!("{}.unique", name))?;
            collections.insert(name, Collection { docs, unique });
        }
        Ok(Self { db, collections })
    }

    /// Flush outstanding writes to disk.
    pub fn flush(&self) -> AppResult<usize> {
        Ok(self.db.flush()?)
    }

    /// Flush and release this handle.
    pub fn close(self) -> AppResult<()> {
        let flushed = self.flush()?;
        tracing::info!(bytes = flushed, "storage flushed and closed");
        Ok(())
    }

    fn collection<T: Record>(&self) -> AppResult<&Collection> {
        self.collections
            .get(T::COLLECTION)
            .ok_or_else(|| AppError::Internal(format!("unknown collection {}", T::COLLECTION)))
    }

    /// Insert a new record, enforcing its unique key.
    pub fn insert<T: Record>(&self, record: &T) -> AppResult<()> {
        let col = self.collection::<T>()?;
        let key = record.id();
        let bytes = serde_json::to_vec(record)?;
        let unique = record.unique_key();

        (&col.docs, &col.unique).transaction(
            |(docs, index)| -> ConflictableTransactionResult<(), AppError> {
                if docs.get(key.as_bytes())?.is_some() {
                    return Err(abort(AppError::already_exists(T::KIND)));
                }
                if let Some(unique) = &unique {
                    if index.get(unique.as_bytes())?.is_some() {
                        return Err(abort(duplicate_key::<T>()));
                    }
                    index.insert(unique.as_bytes(), &key.as_bytes()[..])?;
                }
                docs.insert(&key.as_bytes()[..], bytes.as_slice())?;
                Ok(())
            },
        )?;

        tracing::debug!(collection = T::COLLECTION, id = %key, "record inserted");
        Ok(())
    }

    /// Fetch a record by id, `None` when absent.
    pub fn get<T: Record>(&self, id: Uuid) -> AppResult<Option<T>> {
        let col = self.collection::<T>()?;
        match col.docs.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetch a record by id, failing with `NotFound` when absent.
    pub fn fetch<T: Record>(&self, id: Uuid) -> AppResult<T> {
        self.get(id)?.ok_or_else(|| AppError::not_found(T::KIND))
    }

    /// Look a record up through its unique key.
    pub fn find_unique<T: Record>(&self, key: &str) -> AppResult<Option<T>> {
        let col = self.collection::<T>()?;
        let Some(raw_id) = col.unique.get(key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&raw_id)
            .map_err(|e| AppError::Internal(format!("corrupt unique index entry: {}", e)))?;
        self.get(id)
    }

    /// Every decodable record of the collection, in key order. Documents
    /// that no longer match the canonical schema are skipped.
    pub fn all<T: Record>(&self) -> AppResult<Vec<T>> {
        let col = self.collection::<T>()?;
        let mut records = Vec::with_capacity(col.docs.len());
        for item in col.docs.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<T>(&value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(
                        collection = T::COLLECTION,
                        key = ?Uuid::from_slice(&key).ok(),
                        error = %err,
                        "skipping undecodable document"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Filtered, sorted and paginated view of a collection.
    pub fn list<T: Record>(&self, query: &ListQuery) -> AppResult<Vec<T>> {
        let sort = query.sort.as_deref().unwrap_or(T::DEFAULT_SORT);
        let (field, descending) = parse_sort::<T>(sort)?;

        let mut records: Vec<T> = self
            .all::<T>()?
            .into_iter()
            .filter(|record| record.matches(query))
            .collect();

        records.sort_by(|a, b| {
            compare_sort_keys(a.sort_key(field), b.sort_key(field), descending)
        });

        let skip = query.skip.unwrap_or(0);
        let limit = match query.limit {
            Some(0) => usize::MAX,
            Some(limit) => limit,
            None => T::DEFAULT_LIMIT.unwrap_or(usize::MAX),
        };
        Ok(records.into_iter().skip(skip).take(limit).collect())
    }

    /// Number of decodable records, consistent with `all` and `list`.
    pub fn count<T: Record>(&self) -> AppResult<usize> {
        Ok(self.all::<T>()?.len())
    }

    /// Atomically read, modify and write back one record. `apply` may run
    /// more than once if the transaction is retried, so it must not have
    /// side effects outside the record.
    pub fn update<T, F>(&self, id: Uuid, apply: F) -> AppResult<T>
    where
        T: Record,
        F: Fn(&mut T) -> AppResult<()>,
    {
        let col = self.collection::<T>()?;
        let key = id.as_bytes();

        let updated = (&col.docs, &col.unique).transaction(
            |(docs, index)| -> ConflictableTransactionResult<T, AppError> {
                let raw = docs
                    .get(&key[..])?
                    .ok_or_else(|| abort(AppError::not_found(T::KIND)))?;
                let mut record: T =
                    serde_json::from_slice(&raw).map_err(|e| abort(e.into()))?;
                let old_unique = record.unique_key();

                apply(&mut record).map_err(abort)?;
                record.touch(Utc::now());

                let new_unique = record.unique_key();
                if old_unique != new_unique {
                    if let Some(unique) = &new_unique {
                        if index.get(unique.as_bytes())?.is_some() {
                            return Err(abort(duplicate_key::<T>()));
                        }
                        index.insert(unique.as_bytes(), &key[..])?;
                    }
                    if let Some(unique) = &old_unique {
                        index.remove(unique.as_bytes())?;
                    }
                }

                let bytes = serde_json::to_vec(&record).map_err(|e| abort(e.into()))?;
                docs.insert(&key[..], bytes)?;
                Ok(record)
            },
        )?;

        tracing::debug!(collection = T::COLLECTION, %id, "record updated");
        Ok(updated)
    }

    /// Remove a record and its unique index entry, returning what was removed.
    pub fn delete<T: Record>(&self, id: Uuid) -> AppResult<T> {
        let col = self.collection::<T>()?;
        let key = id.as_bytes();

        let removed = (&col.docs, &col.unique).transaction(
            |(docs, index)| -> ConflictableTransactionResult<T, AppError> {
                let raw = docs
                    .remove(&key[..])?
                    .ok_or_else(|| abort(AppError::not_found(T::KIND)))?;
                let record: T = serde_json::from_slice(&raw).map_err(|e| abort(e.into()))?;
                if let Some(unique) = record.unique_key() {
                    index.remove(unique.as_bytes())?;
                }
                Ok(record)
            },
        )?;

        tracing::debug!(collection = T::COLLECTION, %id, "record deleted");
        Ok(removed)
    }
}

fn abort(err: AppError) -> ConflictableTransactionError<AppError> {
    ConflictableTransactionError::Abort(err)
}

fn duplicate_key<T: Record>() -> AppError {
    AppError::Conflict(format!("{} with this email already exists", T::KIND))
}

fn parse_sort<T: Record>(raw: &str) -> AppResult<(&str, bool)> {
    let (field, descending) = match raw.strip_prefix('-') {
        Some(field) => (field, true),
        None => (raw.strip_prefix('+').unwrap_or(raw), false),
    };
    if T::SORT_FIELDS.contains(&field) {
        Ok((field, descending))
    } else {
        Err(AppError::BadRequest(format!(
            "Unknown sort field '{}', expected one of: {}",
            field,
            T::SORT_FIELDS.join(", ")
        )))
    }
}

/// Records without the key always sort last.
fn compare_sort_keys(
    a: Option<SortKey>,
    b: Option<SortKey>,
    descending: bool,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => {
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
