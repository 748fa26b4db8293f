//! Lazily iterated query results
//!
//! A [`QueryResult`] is returned by every extraction. No cursor is opened
//! until the first pull; until then `limit`, `skip` and `sort` may be
//! recorded and are applied when the cursors open. Records are pulled in
//! batches of the configured size, one collection after another.
//!
//! ```rust,no_run
//! use querier::{Config, Connection, Direction, ExtractOptions, Filter};
//!
//! # async fn example() -> querier::Result<()> {
//! let config = Config::load()?;
//! let con = Connection::open("twitter_2020", &config).await?;
//!
//! let mut filter = Filter::new();
//! filter.equals("lang", "es")?;
//!
//! let mut result = con.extract(&filter, ExtractOptions::new()).await?;
//! result.sort("favorite_count", Direction::Descending)?.limit(10)?;
//!
//! while let Some(record) = result.try_next().await? {
//!     println!("{record}");
//! }
//! con.close().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;

use bson::{Bson, Document, doc};
use futures::stream::{self, Stream, TryStreamExt};
use mongodb::options::{AggregateOptions, FindOptions};
use mongodb::{Collection, Cursor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregation::EngineOptions;
use crate::error::{ConnectionError, Result, ResultError, is_unauthorized};
use crate::filter::validate_field_path;

/// Sort order for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

/// Query waiting to be opened as a cursor.
pub(crate) enum Source {
    Find {
        collection: Collection<Document>,
        filter: Document,
        projection: Option<Document>,
    },
    Aggregate {
        collection: Collection<Document>,
        pipeline: Vec<Document>,
        options: EngineOptions,
    },
}

impl Source {
    fn collection_name(&self) -> &str {
        match self {
            Source::Find { collection, .. } | Source::Aggregate { collection, .. } => {
                collection.name()
            }
        }
    }
}

/// Single-pass, forward-only sequence of records.
///
/// The result is invalidated when the connection that produced it closes:
/// the next pull fails with [`ConnectionError::Closed`]. Records already
/// yielded stay valid. Nothing is retried; to restart, issue the query again.
pub struct QueryResult {
    pending: VecDeque<Source>,
    current: Option<(String, Cursor<Document>)>,
    limit: Option<u64>,
    skip: u64,
    sort: Document,
    batch_size: u32,
    comment: String,
    started: bool,
    client_skip: bool,
    returned: u64,
    skipped: u64,
    token: CancellationToken,
}

impl QueryResult {
    pub(crate) fn new(
        sources: Vec<Source>,
        batch_size: u32,
        comment: String,
        token: CancellationToken,
    ) -> Self {
        Self {
            pending: sources.into(),
            current: None,
            limit: None,
            skip: 0,
            sort: Document::new(),
            batch_size,
            comment,
            started: false,
            client_skip: false,
            returned: 0,
            skipped: 0,
            token,
        }
    }

    /// Yield at most `n` records in total; `0` removes the limit.
    pub fn limit(&mut self, n: u64) -> Result<&mut Self> {
        self.ensure_not_started("limit")?;
        self.limit = (n > 0).then_some(n);
        Ok(self)
    }

    /// Drop the first `n` matching records.
    pub fn skip(&mut self, n: u64) -> Result<&mut Self> {
        self.ensure_not_started("skip")?;
        self.skip = n;
        Ok(self)
    }

    /// Order by `field`. Repeated calls build a compound sort in call order.
    ///
    /// When the result spans several collections, each collection is sorted
    /// on its own and the collections are concatenated.
    pub fn sort(&mut self, field: &str, direction: Direction) -> Result<&mut Self> {
        self.ensure_not_started("sort")?;
        validate_field_path(field).map_err(ResultError::InvalidSortField)?;
        self.sort.insert(field, direction.as_i32());
        Ok(self)
    }

    /// Whether the first pull has happened.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of records yielded so far.
    pub fn returned(&self) -> u64 {
        self.returned
    }

    /// Pull the next record, or `None` once every cursor is exhausted.
    pub async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.token.is_cancelled() {
            self.release();
            return Err(ConnectionError::Closed.into());
        }

        if !self.started {
            self.started = true;
            self.client_skip = self.pending.len() > 1;
            debug!(
                "Start result loop ({} cursors, limit {:?}, skip {})",
                self.pending.len(),
                self.limit,
                self.skip
            );
        }

        loop {
            if self.limit_reached() {
                debug!("Result finished after {} records (limit reached)", self.returned);
                self.release();
                return Ok(None);
            }

            if self.current.is_none() {
                let Some(source) = self.pending.pop_front() else {
                    return Ok(None);
                };
                let name = source.collection_name().to_string();
                match self.open(source).await {
                    Ok(cursor) => self.current = Some((name, cursor)),
                    Err(e) if is_unauthorized(&e) => {
                        warn!("Skipping collection '{name}': not authorized");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let Some((name, cursor)) = self.current.as_mut() else {
                continue;
            };

            match cursor.try_next().await {
                Ok(Some(record)) => {
                    if self.admit() {
                        return Ok(Some(record));
                    }
                }
                Ok(None) => {
                    debug!("End of cursor from '{name}'");
                    self.current = None;
                }
                Err(e) if is_unauthorized(&e) => {
                    warn!("Skipping collection '{name}': not authorized");
                    self.current = None;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drain the remaining records into a vector.
    pub async fn collect_all(&mut self) -> Result<Vec<Document>> {
        let mut records = Vec::new();
        while let Some(record) = self.try_next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Turn the result into a `Stream` of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> {
        stream::try_unfold(self, |mut result| async move {
            Ok(result.try_next().await?.map(|record| (record, result)))
        })
    }

    async fn open(&self, source: Source) -> mongodb::error::Result<Cursor<Document>> {
        match source {
            Source::Find {
                collection,
                filter,
                projection,
            } => {
                debug!("    -> Extract in '{}'", collection.name());
                collection
                    .find(filter)
                    .with_options(self.find_options(projection))
                    .await
            }
            Source::Aggregate {
                collection,
                pipeline,
                options,
            } => {
                debug!("    -> Aggregate in '{}'", collection.name());
                collection
                    .aggregate(self.aggregate_stages(pipeline))
                    .with_options(self.aggregate_options(options))
                    .await
            }
        }
    }

    fn find_options(&self, projection: Option<Document>) -> FindOptions {
        let mut options = FindOptions::default();
        options.batch_size = Some(self.batch_size);
        options.projection = projection;
        options.comment = Some(Bson::String(self.comment.clone()));

        if !self.sort.is_empty() {
            options.sort = Some(self.sort.clone());
        }
        if !self.client_skip && self.skip > 0 {
            options.skip = Some(self.skip.min(i64::MAX as u64));
        }
        if let Some(limit) = self.limit {
            // Records still owed, plus any still to be skipped client-side.
            let mut remaining = limit.saturating_sub(self.returned);
            if self.client_skip {
                remaining = remaining.saturating_add(self.skip.saturating_sub(self.skipped));
            }
            options.limit = Some(server_count(remaining));
        }
        options
    }

    fn aggregate_stages(&self, mut pipeline: Vec<Document>) -> Vec<Document> {
        if !self.sort.is_empty() {
            pipeline.push(doc! { "$sort": self.sort.clone() });
        }
        if self.skip > 0 {
            pipeline.push(doc! { "$skip": server_count(self.skip) });
        }
        if let Some(limit) = self.limit {
            pipeline.push(doc! { "$limit": server_count(limit) });
        }
        pipeline
    }

    fn aggregate_options(&self, engine: EngineOptions) -> AggregateOptions {
        let mut options = AggregateOptions::default();
        options.batch_size = Some(self.batch_size);
        options.comment = Some(Bson::String(self.comment.clone()));
        if engine.allow_disk_use {
            options.allow_disk_use = Some(true);
        }
        options
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.returned >= limit)
    }

    /// Count a pulled record, returning `false` if a client-side skip eats it.
    fn admit(&mut self) -> bool {
        if self.client_skip && self.skipped < self.skip {
            self.skipped += 1;
            return false;
        }
        self.returned += 1;
        true
    }

    fn ensure_not_started(&self, modifier: &'static str) -> Result<()> {
        if self.started {
            return Err(ResultError::ModifiersFrozen(modifier).into());
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.current.is_some() || !self.pending.is_empty() {
            debug!("Closing result ({} records returned)", self.returned);
        }
        self.current = None;
        self.pending.clear();
    }
}

/// Server counts are signed; anything larger than `i64::MAX` is unbounded anyway.
fn server_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("pending", &self.pending.len())
            .field("current", &self.current.as_ref().map(|(name, _)| name))
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .field("sort", &self.sort)
            .field("started", &self.started)
            .field("returned", &self.returned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuerierError;
    use tokio_test::{assert_err, assert_ok};

    fn empty_result() -> QueryResult {
        QueryResult::new(Vec::new(), 100, "querier-test".to_string(), CancellationToken::new())
    }

    #[test]
    fn test_modifiers_chain_before_iteration() {
        let mut result = empty_result();
        assert_ok!(
            result
                .limit(5)
                .and_then(|r| r.skip(2))
                .and_then(|r| r.sort("a", Direction::Descending))
        );
        assert_eq!(result.limit, Some(5));
        assert_eq!(result.skip, 2);
        assert_eq!(result.sort, doc! { "a": -1 });
    }

    #[test]
    fn test_limit_zero_means_unlimited() {
        let mut result = empty_result();
        result.limit(3).unwrap().limit(0).unwrap();
        assert_eq!(result.limit, None);
    }

    #[test]
    fn test_invalid_sort_field() {
        let err = empty_result().sort("", Direction::Ascending).err().unwrap();
        assert!(matches!(err, QuerierError::Result(ResultError::InvalidSortField(_))));
    }

    #[tokio::test]
    async fn test_modifiers_frozen_after_iteration_start() {
        let mut result = empty_result();
        assert!(result.try_next().await.unwrap().is_none());
        assert!(result.is_started());

        let err = result.limit(1).err().unwrap();
        assert!(matches!(err, QuerierError::Result(ResultError::ModifiersFrozen("limit"))));
        assert_err!(result.skip(1));
        assert_err!(result.sort("a", Direction::Ascending));
    }

    #[tokio::test]
    async fn test_pull_after_cancel_fails() {
        let token = CancellationToken::new();
        let mut result = QueryResult::new(Vec::new(), 100, "querier-test".to_string(), token.clone());
        token.cancel();

        let err = result.try_next().await.unwrap_err();
        assert!(matches!(err, QuerierError::Connection(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let records: Vec<Document> = empty_result().into_stream().try_collect().await.unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_find_options_single_collection() {
        let mut result = empty_result();
        result
            .limit(10)
            .unwrap()
            .skip(5)
            .unwrap()
            .sort("favorite_count", Direction::Descending)
            .unwrap();

        let options = result.find_options(Some(doc! { "text": 1 }));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.skip, Some(5));
        assert_eq!(options.batch_size, Some(100));
        assert_eq!(options.sort, Some(doc! { "favorite_count": -1 }));
        assert_eq!(options.projection, Some(doc! { "text": 1 }));
    }

    #[test]
    fn test_find_options_client_side_skip() {
        let mut result = empty_result();
        result.limit(10).unwrap().skip(5).unwrap();
        result.client_skip = true;
        result.skipped = 2;
        result.returned = 0;

        let options = result.find_options(None);
        assert_eq!(options.skip, None);
        assert_eq!(options.limit, Some(13));
    }

    #[test]
    fn test_aggregate_stages_append_modifiers() {
        let mut result = empty_result();
        result
            .sort("n", Direction::Descending)
            .unwrap()
            .skip(1)
            .unwrap()
            .limit(3)
            .unwrap();

        let stages = result.aggregate_stages(vec![doc! { "$group": { "_id": "$lang" } }]);
        assert_eq!(
            stages,
            vec![
                doc! { "$group": { "_id": "$lang" } },
                doc! { "$sort": { "n": -1 } },
                doc! { "$skip": 1_i64 },
                doc! { "$limit": 3_i64 },
            ]
        );

        let options = result.aggregate_options(EngineOptions { allow_disk_use: true });
        assert_eq!(options.allow_disk_use, Some(true));
    }

    #[test]
    fn test_oversized_modifiers_are_clamped() {
        let mut result = empty_result();
        result.limit(u64::MAX).unwrap().skip(u64::MAX).unwrap();

        assert_eq!(result.find_options(None).limit, Some(i64::MAX));
        assert_eq!(result.find_options(None).skip, Some(i64::MAX as u64));
        assert_eq!(
            result.aggregate_stages(Vec::new()),
            vec![doc! { "$skip": i64::MAX }, doc! { "$limit": i64::MAX }]
        );
    }

    #[test]
    fn test_client_skip_near_max_limit_does_not_overflow() {
        let mut result = empty_result();
        result.limit(u64::MAX - 1).unwrap().skip(5).unwrap();
        result.client_skip = true;

        assert_eq!(result.find_options(None).limit, Some(i64::MAX));
    }

    #[test]
    fn test_skip_and_limit_span_collections() {
        let mut result = empty_result();
        result.skip(3).unwrap().limit(7).unwrap();
        result.client_skip = true;

        // Three collections holding 5, 4 and 6 records, numbered globally.
        let mut yielded = Vec::new();
        let mut server_limits = Vec::new();
        let mut offset = 0;
        for size in [5_u64, 4, 6] {
            if result.limit_reached() {
                break;
            }
            let server_limit = result.find_options(None).limit.unwrap() as u64;
            server_limits.push(server_limit);

            for i in 0..size.min(server_limit) {
                if result.limit_reached() {
                    break;
                }
                if result.admit() {
                    yielded.push(offset + i);
                }
            }
            offset += size;
        }

        assert_eq!(yielded, (3..10).collect::<Vec<_>>());
        assert_eq!(result.returned(), 7);
        assert_eq!(server_limits, vec![10, 5, 1]);
        assert!(result.limit_reached());
    }

    #[test]
    fn test_single_collection_skip_stays_on_server() {
        let mut result = empty_result();
        result.skip(3).unwrap();

        assert!(result.admit());
        assert_eq!(result.skipped, 0);
        assert_eq!(result.returned(), 1);
        assert!(!result.limit_reached());
    }
}
