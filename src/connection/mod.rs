//! Connection management
//!
//! This module provides:
//! - Connection establishment against a [`ResolvedTarget`] with a bounded wait
//! - Collection discovery
//! - Dispatch of extract, count, distinct and grouped aggregations
//! - Collection-scoped views and scoped acquisition with guaranteed release
//!
//! A [`Connection`] is meant for one logical thread of control. Open one
//! connection per unit of concurrency when extracting in parallel.

mod groupby;
mod view;

pub use groupby::GroupBy;
pub use view::CollectionView;

use std::collections::HashSet;
use std::sync::Arc;

use bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, Credential, FindOneOptions, ServerAddress};
use mongodb::{Client, Database};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, ConnectionConfig};
use crate::credentials::{CredentialStore, ResolvedTarget};
use crate::error::{
    AuthenticationError, ConnectionError, FilterError, QuerierError, Result, is_unauthorized,
};
use crate::filter::{Filter, validate_field_path};
use crate::result::{QueryResult, Source};

/// Connection state information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, or closed
    Closed,

    /// Connect in progress
    Opening,

    /// Connected and ready
    Open,
}

/// Field selection and collection restriction for extractions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Fields to include; empty means every field.
    pub fields: Vec<String>,

    /// Collections to read; `None` means every available collection.
    pub collections: Option<Vec<String>>,
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn collection(self, name: impl Into<String>) -> Self {
        self.collections([name.into()])
    }

    /// Inclusion projection for the selected fields.
    pub fn projection(&self) -> Result<Option<Document>> {
        if self.fields.is_empty() {
            return Ok(None);
        }

        let mut projection = Document::new();
        for field in &self.fields {
            validate_field_path(field).map_err(FilterError::InvalidFieldPath)?;
            projection.insert(field.clone(), 1);
        }
        Ok(Some(projection))
    }
}

/// Live handle to one database.
pub struct Connection {
    client: Client,
    db: Database,
    target: ResolvedTarget,
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    token: CancellationToken,
    client_id: String,
}

impl Connection {
    /// Resolve `name` through the configured credentials file and connect.
    pub async fn open(name: &str, config: &Config) -> Result<Self> {
        let store = CredentialStore::from_file(&config.connection.credentials_path)?;
        let target = store.resolve(name)?;
        Self::connect(target, &config.connection).await
    }

    /// Connect to `target`, waiting at most `config.timeout` seconds.
    ///
    /// Rejected credentials surface as [`QuerierError::Authentication`];
    /// unreachable servers and timeouts as [`QuerierError::Connection`].
    pub async fn connect(target: ResolvedTarget, config: &ConnectionConfig) -> Result<Self> {
        let state = Arc::new(RwLock::new(ConnectionState::Opening));
        let options = Self::client_options(&target, config)?;
        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::InvalidTarget(e.to_string()))?;

        info!("Started connection to...");
        info!("    * Database name: {}", target.database);
        info!("    * Host: {}", target.hosts.join(","));
        info!("    * Port: {}", target.port);
        info!("    * PID: {}", std::process::id());

        let db = client.database(&target.database);
        let ping = async { db.run_command(doc! { "ping": 1 }).await };

        let outcome = match tokio::time::timeout(config.connect_timeout(), ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Self::connect_error(e, &target)),
            Err(_) => Err(ConnectionError::Timeout {
                database: target.database.clone(),
                secs: config.timeout,
            }
            .into()),
        };

        if let Err(e) = outcome {
            warn!("Error accessing the database '{}': {}", target.database, e);
            *state.write().await = ConnectionState::Closed;
            client.shutdown().immediate(true).await;
            return Err(e);
        }

        *state.write().await = ConnectionState::Open;
        Ok(Self {
            client,
            db,
            target,
            config: config.clone(),
            state,
            token: CancellationToken::new(),
            client_id: client_id(),
        })
    }

    /// Open a connection, run `f`, and close the connection on every exit path.
    ///
    /// ```rust,no_run
    /// use querier::{Config, Connection, Filter};
    ///
    /// # async fn example() -> querier::Result<()> {
    /// let config = Config::load()?;
    /// let total = Connection::scoped("twitter_2014", &config, async |con| {
    ///     let mut filter = Filter::new();
    ///     filter.greater_than("favorite_count", 500)?;
    ///     con.count(&filter, None).await
    /// })
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<T, F>(name: &str, config: &Config, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&Connection) -> Result<T>,
    {
        let connection = Self::open(name, config).await?;
        let outcome = f(&connection).await;
        connection.close().await;
        outcome
    }

    /// Like [`Connection::scoped`], for an already resolved target.
    pub async fn scoped_target<T, F>(
        target: ResolvedTarget,
        config: &ConnectionConfig,
        f: F,
    ) -> Result<T>
    where
        F: AsyncFnOnce(&Connection) -> Result<T>,
    {
        let connection = Self::connect(target, config).await?;
        let outcome = f(&connection).await;
        connection.close().await;
        outcome
    }

    /// Close the connection and invalidate every result it produced.
    ///
    /// Calling this more than once has no further effect.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if *state == ConnectionState::Closed {
            return;
        }
        *state = ConnectionState::Closed;
        self.token.cancel();

        debug!("Closing connection to '{}'", self.target.database);
        self.client.clone().shutdown().immediate(true).await;
    }

    /// Get current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Name of the connected database.
    pub fn database(&self) -> &str {
        &self.target.database
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    /// Names of the collections visible in the database, `system.*` excluded.
    ///
    /// Always queries the server; nothing is cached.
    pub async fn list_available_collections(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut names = self.db.list_collection_names().await?;
        names.retain(|name| !name.starts_with("system."));
        names.sort();
        Ok(names)
    }

    /// Records matching `filter`, lazily pulled.
    pub async fn extract(&self, filter: &Filter, options: ExtractOptions) -> Result<QueryResult> {
        self.ensure_open()?;
        let projection = options.projection()?;
        let query = filter.serialize();
        let collections = self.resolve_collections(options.collections).await?;

        debug!("######### Begin extraction #########");
        debug!(
            "dbname '{}' | process pid {}",
            self.target.database,
            std::process::id()
        );
        debug!("{query}");

        let sources = collections
            .iter()
            .map(|name| Source::Find {
                collection: self.db.collection(name),
                filter: query.clone(),
                projection: projection.clone(),
            })
            .collect();

        Ok(self.new_result(sources))
    }

    /// First record matching `filter`, or `None` when nothing matches.
    pub async fn extract_one(
        &self,
        filter: &Filter,
        options: ExtractOptions,
    ) -> Result<Option<Document>> {
        self.ensure_open()?;
        let projection = options.projection()?;
        let query = filter.serialize();
        let collections = self.resolve_collections(options.collections).await?;

        debug!("######### Begin extract one #########");
        debug!("{query}");

        for name in &collections {
            let mut find_options = FindOneOptions::default();
            find_options.projection = projection.clone();
            find_options.comment = Some(Bson::String(self.operation_comment()));

            let found = self
                .db
                .collection::<Document>(name)
                .find_one(query.clone())
                .with_options(find_options)
                .await;

            match found {
                Ok(Some(record)) => {
                    info!("  => found in collection '{name}'");
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(e) if is_unauthorized(&e) => {
                    warn!("Skipping collection '{name}': not authorized");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Number of records matching `filter`, counted server-side.
    ///
    /// An empty filter uses the collection metadata count.
    pub async fn count(&self, filter: &Filter, collections: Option<Vec<String>>) -> Result<u64> {
        self.ensure_open()?;
        let query = filter.serialize();
        let collections = self.resolve_collections(collections).await?;

        let mut total = 0;
        for name in &collections {
            let collection = self.db.collection::<Document>(name);
            let counted = if query.is_empty() {
                collection.estimated_document_count().await
            } else {
                collection.count_documents(query.clone()).await
            };

            match counted {
                Ok(n) => total += n,
                Err(e) if is_unauthorized(&e) => {
                    warn!("Skipping collection '{name}': not authorized");
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Counted {total} records in {} collections", collections.len());
        Ok(total)
    }

    /// Every distinct value `field` takes among records matching `filter`.
    pub async fn distinct(
        &self,
        field: &str,
        filter: &Filter,
        collections: Option<Vec<String>>,
    ) -> Result<Vec<Bson>> {
        self.ensure_open()?;
        validate_field_path(field).map_err(FilterError::InvalidFieldPath)?;
        let query = filter.serialize();
        let collections = self.resolve_collections(collections).await?;

        debug!("######### Begin distinct('{field}') #########");

        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for name in &collections {
            let found = self
                .db
                .collection::<Document>(name)
                .distinct(field, query.clone())
                .await;

            match found {
                Ok(found) => {
                    debug!("Executed distinct in '{name}'");
                    for value in found {
                        if seen.insert(value.clone().into_relaxed_extjson().to_string()) {
                            values.push(value);
                        }
                    }
                }
                Err(e) if is_unauthorized(&e) => {
                    warn!("Skipping collection '{name}': not authorized");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(values)
    }

    /// Start a grouped aggregation on `field`.
    pub fn groupby(&self, field: &str) -> Result<GroupBy<'_>> {
        GroupBy::new(self, field, None)
    }

    /// View with `name` pre-bound as the only collection.
    pub fn collection(&self, name: &str) -> CollectionView<'_> {
        CollectionView::new(self, name)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }

    pub(crate) async fn resolve_collections(
        &self,
        collections: Option<Vec<String>>,
    ) -> Result<Vec<String>> {
        match collections {
            Some(names) => Ok(names),
            None => self.list_available_collections().await,
        }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn new_result(&self, sources: Vec<Source>) -> QueryResult {
        QueryResult::new(
            sources,
            self.config.batch_size,
            self.operation_comment(),
            self.token.clone(),
        )
    }

    /// Server-side comment identifying one operation of this process.
    fn operation_comment(&self) -> String {
        format!("querier-{}-{}", self.client_id, Uuid::new_v4())
    }

    fn client_options(target: &ResolvedTarget, config: &ConnectionConfig) -> Result<ClientOptions> {
        if target.hosts.is_empty() {
            return Err(ConnectionError::InvalidTarget(format!(
                "no hosts for database '{}'",
                target.database
            ))
            .into());
        }

        let mut credential = Credential::default();
        credential.username = Some(target.user.clone());
        credential.password = Some(target.password().to_string());
        credential.source = Some(target.database.clone());

        let mut options = ClientOptions::default();
        options.hosts = target
            .hosts
            .iter()
            .map(|host| ServerAddress::Tcp {
                host: host.clone(),
                port: Some(target.port),
            })
            .collect();
        options.credential = Some(credential);
        options.app_name = Some(config.app_name.clone());
        options.connect_timeout = Some(config.connect_timeout());
        options.server_selection_timeout = Some(config.connect_timeout());
        Ok(options)
    }

    fn connect_error(error: mongodb::error::Error, target: &ResolvedTarget) -> QuerierError {
        match QuerierError::from(error) {
            QuerierError::Authentication(AuthenticationError::Denied(message)) => {
                AuthenticationError::Rejected {
                    database: target.database.clone(),
                    message,
                }
                .into()
            }
            other => other,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Results must not outlive their connection, even without close().
        if !self.token.is_cancelled() {
            debug!("Connection to '{}' dropped without close", self.target.database);
            self.token.cancel();
        }
    }
}

fn client_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{host}-{}", std::process::id())
}
