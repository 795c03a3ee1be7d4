use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;

use crate::{
    resource, CacheFlag, Clock, DataCache, Error, KubeFetcher, Namespace, Query, Registry,
    ResourceRef, Result, Schema, TableBuilder,
};
use models::Settings;

/// Size of the worker pool for the fetch phase. All other phases are
/// single-threaded.
pub const FETCH_WORKERS: usize = 8;

#[derive(Debug)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// Orchestrates one query at a time: parse, resolve against the registry,
/// advise the cache, fetch concurrently, build tables, execute SQL.
pub struct Engine {
    registry: Arc<Registry>,
    settings: Settings,
    home: PathBuf,
    init_path: Vec<PathBuf>,
    cache: DataCache,
    clock: Arc<dyn Clock>,
    fetcher: Arc<dyn KubeFetcher>,
    namespace: Namespace,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        settings: Settings,
        home: PathBuf,
        cache_dir: PathBuf,
        clock: Arc<dyn Clock>,
        fetcher: Arc<dyn KubeFetcher>,
        namespace: Namespace,
    ) -> Result<Engine> {
        let init_path: Vec<PathBuf> = settings
            .init_path
            .iter()
            .map(|dir| PathBuf::from(resource::expand_path(dir)))
            .collect();
        if init_path.iter().any(|dir| *dir == home) {
            return Err(models::Error::HomeInInitPath {
                home: home.display().to_string(),
            }
            .into());
        }
        let cache = DataCache::new(cache_dir, settings.cache_timeout, clock.clone());
        Ok(Engine {
            registry,
            settings,
            home,
            init_path,
            cache,
            clock,
            fetcher,
            namespace,
        })
    }

    pub async fn query(&self, query: &Query, flag: CacheFlag) -> Result<QueryResult> {
        let refs = query.table_refs()?;

        // Resolve references, materializing schemas on first use. A ref
        // with no builder may be a CTE name; SQLite flags true unknowns.
        let mut schemas: BTreeMap<String, Arc<Schema>> = BTreeMap::new();
        for table_ref in &refs {
            if !schemas.contains_key(&table_ref.schema) {
                let schema =
                    self.registry
                        .schema(&table_ref.schema, &self.home, &self.init_path)?;
                schemas.insert(table_ref.schema.clone(), schema);
            }
        }
        let mut builders: BTreeMap<(String, String), &TableBuilder> = BTreeMap::new();
        for table_ref in &refs {
            if let Some(builder) = schemas[&table_ref.schema].table_builder(&table_ref.name) {
                builders.insert((table_ref.schema.clone(), table_ref.name.clone()), builder);
            }
        }

        // The union of resources backing the chosen builders.
        let mut required = BTreeSet::new();
        for ((schema_name, _), builder) in &builders {
            let resource = schemas[schema_name].resource(builder.resource()).ok_or_else(|| {
                Error::UnknownResource {
                    table: builder.name().to_string(),
                    resource: builder.resource().to_string(),
                }
            })?;
            required.insert(ResourceRef::new(schema_name.clone(), resource.clone()));
        }

        let (refresh, max_stale) = self
            .cache
            .advise_refresh(&required, flag, &self.namespace)?;
        if let Some(age) = max_stale {
            if !self.settings.reckless {
                eprintln!("(Data may be up to {age} seconds old.)");
                self.clock.sleep(Duration::from_millis(500));
            }
        }

        // Fetch phase: a bounded fan-out of blocking workers. The first
        // failure aborts the query; workers not yet started never run.
        let documents: BTreeMap<(String, String), Value> =
            futures::stream::iter(required.iter().map(|resource| {
                let resource = resource.clone();
                let refresh = refresh.contains(&resource);
                let cache = self.cache.clone();
                let fetcher = self.fetcher.clone();
                let namespace = self.namespace.clone();
                let qualified = (
                    resource.schema.clone(),
                    resource.resource.name().to_string(),
                );
                async move {
                    match tokio::task::spawn_blocking(move || {
                        fetch_one(resource, refresh, cache, fetcher, namespace)
                    })
                    .await
                    {
                        Ok(result) => result,
                        Err(join) => Err(Error::Fetch {
                            schema: qualified.0,
                            name: qualified.1,
                            err: anyhow::anyhow!(join),
                        }),
                    }
                }
            }))
            .buffer_unordered(FETCH_WORKERS)
            .try_collect()
            .await?;

        // Build phase: one logical database per schema, tables in
        // lexicographic (schema, table) order.
        let db = Connection::open_in_memory()?;
        register_functions(&db, self.clock.clone())?;
        let mut attached = BTreeSet::new();
        for (schema_name, _) in builders.keys() {
            if attached.insert(schema_name.clone()) {
                db.execute(&format!("ATTACH DATABASE ':memory:' AS {schema_name}"), [])?;
            }
        }
        for ((schema_name, table_name), builder) in &builders {
            let key = (schema_name.clone(), builder.resource().to_string());
            let document = documents.get(&key).ok_or_else(|| Error::UnknownResource {
                table: table_name.clone(),
                resource: builder.resource().to_string(),
            })?;
            builder.build(&db, document)?;
        }

        // Execute the original SQL.
        let mut statement = db.prepare(&query.sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let width = columns.len();
        let rows = statement
            .query_map([], |row| {
                (0..width)
                    .map(|index| row.get::<_, SqlValue>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(QueryResult { columns, rows })
    }
}

/// One fetch worker: refresh from the source (updating the cache for
/// cacheable resources) or load the cached snapshot.
fn fetch_one(
    resource: ResourceRef,
    refresh: bool,
    cache: DataCache,
    fetcher: Arc<dyn KubeFetcher>,
    namespace: Namespace,
) -> Result<((String, String), Value)> {
    let attempt = || -> anyhow::Result<Value> {
        if refresh {
            let document = resource.resource.get_objects(&*fetcher, &namespace)?;
            if resource.resource.cacheable() {
                cache.dump(&resource, &namespace, &document)?;
            }
            Ok(document)
        } else {
            cache.load(&resource, &namespace)
        }
    };
    match attempt() {
        Ok(document) => Ok((
            (resource.schema.clone(), resource.resource.name().to_string()),
            document,
        )),
        Err(err) => Err(Error::Fetch {
            schema: resource.schema.clone(),
            name: resource.resource.name().to_string(),
            err,
        }),
    }
}

/// Scalar functions available to every query.
fn register_functions(db: &Connection, clock: Arc<dyn Clock>) -> rusqlite::Result<()> {
    db.create_scalar_function("now", 0, FunctionFlags::SQLITE_UTF8, move |_| Ok(clock.now()))?;
    db.create_scalar_function(
        "to_size",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Integer(n) => Some(values::to_size(n)),
                ValueRef::Real(f) => Some(values::to_size(f.round() as i64)),
                _ => None,
            })
        },
    )?;
    db.create_scalar_function(
        "to_age",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Integer(n) => Some(values::to_age(n.max(0) as u64)),
                ValueRef::Real(f) => Some(values::to_age(f.max(0.0).round() as u64)),
                _ => None,
            })
        },
    )?;
    db.create_scalar_function(
        "to_utc",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Integer(n) => values::to_utc(n),
                ValueRef::Real(f) => values::to_utc(f.round() as i64),
                _ => None,
            })
        },
    )?;
    Ok(())
}
