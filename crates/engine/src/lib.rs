//! The Quarry query engine: parses a SQL statement to find referenced
//! tables, reconciles them against the schema registry, drives a
//! cache-aware concurrent fetch of the backing resources, materializes
//! tables into an in-memory SQLite database, and executes the query.

mod builtins;
mod cache;
mod clock;
mod exec;
mod query;
mod registry;
mod resource;
mod tables;

pub use cache::{CacheFlag, DataCache};
pub use clock::{Clock, FakeClock, WallClock};
pub use exec::{Engine, QueryResult, FETCH_WORKERS};
pub use query::{Query, TableRef};
pub use registry::{BuiltinSchema, Registry, Schema};
pub use resource::{
    KubeFetcher, KubernetesResource, Namespace, NoKubernetes, Resource, ResourceKind, ResourceRef,
};
pub use tables::{BuiltinTable, Column, RowContext, TableBuilder};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] models::Error),
    #[error("query must contain exactly one statement")]
    MultipleStatements,
    #[error("invalid schema name in table: {0}")]
    BadTableRef(String),
    #[error("schema name '{0}' is reserved")]
    ReservedSchema(String),
    #[error("no configurations found for schema '{0}'")]
    NoSchemaConfig(String),
    #[error("Resource '{name}' is already defined in schema '{schema}'")]
    DuplicateResource { schema: String, name: String },
    #[error("Table '{name}' is already defined in schema '{schema}'")]
    DuplicateTable { schema: String, name: String },
    #[error("Column '{name}' is already defined in table '{table}'")]
    DuplicateColumn { table: String, name: String },
    #[error("Table '{table}' needs unknown resource '{resource}'")]
    UnknownResource { table: String, resource: String },
    #[error("cannot extend undefined table '{table}' in schema '{schema}'")]
    ExtendUnknownTable { schema: String, table: String },
    #[error("resource '{0}' cannot be cacheable")]
    NotCacheable(String),
    #[error("cacheable resource '{0}' requires a cache_key with a $VAR reference")]
    MissingCacheKey(String),
    #[error("resource '{0}' must have exactly one of data, file, exec, or folder")]
    AmbiguousKind(String),
    #[error("cannot infer the kind of resource '{0}'")]
    UnknownKind(String),
    #[error("failed to fetch resource {schema}.{name}: {err:#}")]
    Fetch {
        schema: String,
        name: String,
        #[source]
        err: anyhow::Error,
    },
    #[error("missing parent or too many ^ while evaluating '{0}'")]
    ParentHop(String),
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
