use bson::{Bson, Document};

use super::{Connection, ExtractOptions, GroupBy};
use crate::error::Result;
use crate::filter::Filter;
use crate::result::QueryResult;

/// Connection operations with one collection pre-bound.
pub struct CollectionView<'a> {
    connection: &'a Connection,
    name: String,
}

impl<'a> CollectionView<'a> {
    pub(crate) fn new(connection: &'a Connection, name: &str) -> Self {
        Self {
            connection,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extract from this collection; only `fields` of `options` is honored.
    pub async fn extract(&self, filter: &Filter, options: ExtractOptions) -> Result<QueryResult> {
        self.connection
            .extract(filter, options.collection(self.name.clone()))
            .await
    }

    pub async fn extract_one(
        &self,
        filter: &Filter,
        options: ExtractOptions,
    ) -> Result<Option<Document>> {
        self.connection
            .extract_one(filter, options.collection(self.name.clone()))
            .await
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        self.connection.count(filter, Some(self.bound())).await
    }

    pub async fn distinct(&self, field: &str, filter: &Filter) -> Result<Vec<Bson>> {
        self.connection
            .distinct(field, filter, Some(self.bound()))
            .await
    }

    pub fn groupby(&self, field: &str) -> Result<GroupBy<'a>> {
        GroupBy::new(self.connection, field, Some(self.bound()))
    }

    fn bound(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}
