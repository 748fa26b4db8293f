//! Credentials resolution
//!
//! Maps a logical database name to a concrete connection target. The
//! credentials file (TOML) holds two kinds of sections:
//!
//! - credential sources, describing how to reach a cluster (`host`, `port`)
//! - database entries, naming a source through `type` and carrying the
//!   read-only user (`ruser`, `rpwd`) and optional `suffixes`
//!
//! ```toml
//! [store]
//! host = "h1,h2"
//! port = 1000
//!
//! [logs]
//! type = "store"
//! suffixes = "_2020,_2021"
//! ruser = "reader"
//! rpwd = "secret"
//! ```
//!
//! With this file `logs`, `logs_2020` and `logs_2021` resolve; `logs_2022`
//! does not. Resolution never touches the network.
//!
//! The default location is `~/.credentials.toml`. Older INI-style `.cfg`
//! files must be converted first: string values such as `host = 10.0.0.1`
//! need quotes to be valid TOML.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::debug;

use crate::error::{CredentialsError, Result};

/// Where and how to reach one physical cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSource {
    pub name: String,
    pub hosts: Vec<String>,
    pub port: u16,
}

/// A logical database bound to one credential source.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    pub name: String,
    pub source_type: String,
    pub suffixes: Vec<String>,
    user: Option<String>,
    password: Option<String>,
}

/// Everything needed to open a connection to one database.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub hosts: Vec<String>,
    pub port: u16,
    pub database: String,
    pub user: String,
    password: String,
}

/// Parsed credentials file.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    sources: BTreeMap<String, CredentialSource>,
    databases: BTreeMap<String, DatabaseEntry>,
}

impl ResolvedTarget {
    pub fn new(
        hosts: Vec<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hosts,
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// Passwords never reach logs through Debug or Display.
impl fmt::Debug for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTarget")
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user,
            self.hosts.join(","),
            self.port,
            self.database
        )
    }
}

impl fmt::Debug for DatabaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseEntry")
            .field("name", &self.name)
            .field("source_type", &self.source_type)
            .field("suffixes", &self.suffixes)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Read and parse a credentials file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CredentialsError::FileNotFound(path.to_path_buf()),
            _ => CredentialsError::Read {
                path: PathBuf::from(path),
                source: e,
            },
        })?;

        debug!("Loaded credentials file '{}'", path.display());
        Self::parse(&text)
    }

    /// Parse the TOML text of a credentials file.
    pub fn parse(text: &str) -> Result<Self> {
        let table: Table =
            toml::from_str(text).map_err(|e| CredentialsError::Parse(e.to_string()))?;

        let mut store = CredentialStore::default();
        for (section, value) in table {
            let Value::Table(fields) = value else {
                return Err(CredentialsError::Parse(format!(
                    "'{section}' must be a section, found a bare value"
                ))
                .into());
            };

            if fields.contains_key("type") {
                let entry = parse_database(&section, &fields)?;
                store.databases.insert(section, entry);
            } else if fields.contains_key("host") {
                let source = parse_source(&section, &fields)?;
                store.sources.insert(section, source);
            } else {
                return Err(CredentialsError::Parse(format!(
                    "section '{section}' is neither a database (no 'type') nor a source (no 'host')"
                ))
                .into());
            }
        }

        Ok(store)
    }

    /// Resolve a logical database name (optionally `base + suffix`).
    pub fn resolve(&self, name: &str) -> Result<ResolvedTarget> {
        let entry = self.find_entry(name)?;

        let source = self.sources.get(&entry.source_type).ok_or_else(|| {
            CredentialsError::UnknownSourceType {
                database: entry.name.clone(),
                source_type: entry.source_type.clone(),
            }
        })?;

        let user = entry.user.clone().ok_or_else(|| missing(&entry.name, "ruser"))?;
        let password = entry
            .password
            .clone()
            .ok_or_else(|| missing(&entry.name, "rpwd"))?;

        debug!(
            "Resolved database '{}' through entry '{}' (source '{}')",
            name, entry.name, source.name
        );

        Ok(ResolvedTarget {
            hosts: source.hosts.clone(),
            port: source.port,
            database: name.to_string(),
            user,
            password,
        })
    }

    /// All logical names that resolve: base names plus every suffix expansion.
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .values()
            .flat_map(|entry| {
                std::iter::once(entry.name.clone()).chain(
                    entry
                        .suffixes
                        .iter()
                        .map(move |suffix| format!("{}{}", entry.name, suffix)),
                )
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn source(&self, name: &str) -> Option<&CredentialSource> {
        self.sources.get(name)
    }

    pub fn entry(&self, name: &str) -> Option<&DatabaseEntry> {
        self.databases.get(name)
    }

    /// Exact name first, then the longest base whose declared suffix completes `name`.
    fn find_entry(&self, name: &str) -> Result<&DatabaseEntry> {
        if let Some(entry) = self.databases.get(name) {
            return Ok(entry);
        }

        let mut candidates: Vec<(&DatabaseEntry, &str)> = self
            .databases
            .values()
            .filter_map(|entry| {
                name.strip_prefix(entry.name.as_str())
                    .map(|remainder| (entry, remainder))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.name.len().cmp(&a.0.name.len()));

        for &(entry, remainder) in &candidates {
            if entry.suffixes.iter().any(|s| s == remainder) {
                return Ok(entry);
            }
        }

        match candidates.first() {
            Some((entry, remainder)) => Err(CredentialsError::UndeclaredSuffix {
                database: entry.name.clone(),
                suffix: remainder.to_string(),
            }
            .into()),
            None => Err(CredentialsError::DatabaseNotFound(name.to_string()).into()),
        }
    }
}

fn missing(section: &str, field: &str) -> CredentialsError {
    CredentialsError::MissingField {
        section: section.to_string(),
        field: field.to_string(),
    }
}

fn invalid(section: &str, field: &str, value: &Value) -> CredentialsError {
    CredentialsError::InvalidValue {
        section: section.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_source(section: &str, fields: &Table) -> Result<CredentialSource> {
    let host = fields.get("host").ok_or_else(|| missing(section, "host"))?;
    let hosts = string_list(section, "host", host)?;
    if hosts.is_empty() {
        return Err(invalid(section, "host", host).into());
    }

    let port_value = fields.get("port").ok_or_else(|| missing(section, "port"))?;
    let port = match port_value {
        Value::Integer(n) => u16::try_from(*n).ok(),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(section, "port", port_value))?;

    Ok(CredentialSource {
        name: section.to_string(),
        hosts,
        port,
    })
}

fn parse_database(section: &str, fields: &Table) -> Result<DatabaseEntry> {
    let source_type = match fields.get("type") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(other) => return Err(invalid(section, "type", other).into()),
        None => return Err(missing(section, "type").into()),
    };

    let suffixes = match fields.get("suffixes") {
        Some(value) => string_list(section, "suffixes", value)?,
        None => Vec::new(),
    };

    Ok(DatabaseEntry {
        name: section.to_string(),
        source_type,
        suffixes,
        user: optional_string(section, "ruser", fields)?,
        password: optional_string(section, "rpwd", fields)?,
    })
}

fn optional_string(section: &str, field: &str, fields: &Table) -> Result<Option<String>> {
    match fields.get(field) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(invalid(section, field, other).into()),
        None => Ok(None),
    }
}

/// Accepts either `"a,b"` or `["a", "b"]`; blanks are dropped.
fn string_list(section: &str, field: &str, value: &Value) -> Result<Vec<String>> {
    let items: Vec<String> = match value {
        Value::String(s) => s.split(',').map(|part| part.trim().to_string()).collect(),
        Value::Array(values) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(invalid(section, field, other)),
            })
            .collect::<std::result::Result<_, _>>()?,
        other => return Err(invalid(section, field, other).into()),
    };

    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}
