use bson::Document;
use tracing::debug;

use super::Connection;
use crate::aggregation::{AggregationBuilder, NamedAgg};
use crate::error::Result;
use crate::filter::Filter;
use crate::result::{QueryResult, Source};

/// Grouped aggregation bound to a connection, submitted by [`GroupBy::agg`].
///
/// ```rust,no_run
/// use querier::{AggFunction, Config, Connection, Filter};
///
/// # async fn example() -> querier::Result<()> {
/// let config = Config::load()?;
/// let con = Connection::open("twitter_2020", &config).await?;
///
/// let mut spanish = Filter::new();
/// spanish.equals("lang", "es")?;
///
/// let mut result = con
///     .groupby("user.id")?
///     .pre_filter(spanish)
///     .agg([
///         ("tweets", ("id", AggFunction::Count)),
///         ("favs", ("favorite_count", AggFunction::Sum)),
///     ])
///     .await?;
///
/// while let Some(group) = result.try_next().await? {
///     println!("{group}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct GroupBy<'a> {
    connection: &'a Connection,
    builder: AggregationBuilder,
    collections: Option<Vec<String>>,
}

impl<'a> GroupBy<'a> {
    pub(crate) fn new(
        connection: &'a Connection,
        field: &str,
        collections: Option<Vec<String>>,
    ) -> Result<Self> {
        Ok(Self {
            connection,
            builder: AggregationBuilder::groupby(field)?,
            collections,
        })
    }

    pub fn pre_filter(mut self, filter: Filter) -> Self {
        self.builder.pre_filter(filter);
        self
    }

    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.builder.allow_disk_use(allow);
        self
    }

    /// Restrict the grouping to these collections.
    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn builder(&self) -> &AggregationBuilder {
        &self.builder
    }

    /// Add the named outputs and submit the aggregation.
    ///
    /// With several collections the groups span all of them.
    pub async fn agg<I, N, A>(mut self, outputs: I) -> Result<QueryResult>
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: Into<NamedAgg>,
    {
        self.builder.agg(outputs)?;
        self.connection.ensure_open()?;

        let collections = self.connection.resolve_collections(self.collections).await?;
        let Some(first) = collections.first() else {
            return Ok(self.connection.new_result(Vec::new()));
        };

        let pipeline = self.builder.pipeline_over(&collections);
        debug!("######### Begin aggregation #########");
        debug!(
            "groupby '{}' over {} collections",
            self.builder.group_key(),
            collections.len()
        );
        for stage in &pipeline.stages {
            debug!("{stage}");
        }

        let source = Source::Aggregate {
            collection: self.connection.db().collection::<Document>(first),
            pipeline: pipeline.stages,
            options: pipeline.options,
        };
        Ok(self.connection.new_result(vec![source]))
    }
}
