use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::tables::{BuiltinBuilder, BuiltinTable, Column, ConfigBuilder, TableBuilder};
use crate::{builtins, Error, Resource, ResourceKind, Result};
use models::{ColumnDef, PathExpr, SchemaFile};

/// A built-in schema's fixed parts, registered at process startup.
pub struct BuiltinSchema {
    pub default_kind: Option<ResourceKind>,
    pub resources: Vec<Resource>,
    pub tables: Vec<&'static BuiltinTable>,
}

/// A fully materialized schema: built-in parts merged with every
/// `<schema>.yaml` found on the configuration search path. Immutable once
/// loaded.
#[derive(Debug)]
pub struct Schema {
    pub name: String,
    resources: BTreeMap<String, Arc<Resource>>,
    tables: BTreeMap<String, TableBuilder>,
}

impl Schema {
    pub fn table_builder(&self, name: &str) -> Option<&TableBuilder> {
        self.tables.get(name)
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }
}

/// Process-wide catalog of schemas. Built-ins are registered eagerly;
/// user schemas materialize the first time a query references them.
pub struct Registry {
    builtins: BTreeMap<String, BuiltinSchema>,
    schemas: Mutex<BTreeMap<String, Arc<Schema>>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL: Arc<Registry> = Arc::new(Registry::with_builtins());
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    /// An empty registry, for tests that control their own built-ins.
    pub fn new() -> Registry {
        Registry {
            builtins: BTreeMap::new(),
            schemas: Mutex::new(BTreeMap::new()),
        }
    }

    /// A registry with the standard built-in schemas registered.
    pub fn with_builtins() -> Registry {
        let mut registry = Registry::new();
        builtins::register(&mut registry);
        registry
    }

    /// The process-wide registry used by the CLI.
    pub fn global() -> Arc<Registry> {
        GLOBAL.clone()
    }

    pub fn add_builtin(&mut self, name: impl Into<String>, schema: BuiltinSchema) {
        self.builtins.insert(name.into(), schema);
    }

    /// Fetch a schema, materializing it on first reference by merging
    /// `<schema>.yaml` from each init_path directory and then the home
    /// directory.
    pub fn schema(&self, name: &str, home: &Path, init_path: &[PathBuf]) -> Result<Arc<Schema>> {
        let mut schemas = self.schemas.lock().unwrap();
        if let Some(schema) = schemas.get(name) {
            return Ok(schema.clone());
        }
        let schema = self.load_schema(name, home, init_path)?;
        schemas.insert(name.to_string(), schema.clone());
        Ok(schema)
    }

    fn load_schema(&self, name: &str, home: &Path, init_path: &[PathBuf]) -> Result<Arc<Schema>> {
        let builtin = self.builtins.get(name);
        let default_kind = builtin.and_then(|b| b.default_kind);
        let builtin_tables: BTreeMap<&str, &'static BuiltinTable> = builtin
            .iter()
            .flat_map(|b| b.tables.iter())
            .map(|t| (t.name, *t))
            .collect();
        let mut found = builtin.is_some();

        let mut resources: BTreeMap<String, Arc<Resource>> = builtin
            .iter()
            .flat_map(|b| b.resources.iter())
            .map(|r| (r.name().to_string(), Arc::new(r.clone())))
            .collect();
        let mut creates = BTreeMap::new();
        let mut extends: BTreeMap<String, Vec<ColumnDef>> = BTreeMap::new();

        for dir in init_path.iter().map(PathBuf::as_path).chain([home]) {
            let path = dir.join(format!("{name}.yaml"));
            if !path.exists() {
                continue;
            }
            found = true;
            tracing::debug!(
                target: "registry",
                schema = name,
                path = %path.display(),
                "merging schema configuration"
            );
            let file: SchemaFile = models::load_file(&path)?;
            file.validate()?;

            // First definition of a resource, table, or column wins;
            // a second anywhere on the search path is an error.
            for entry in &file.resources {
                let resource = Resource::from_entry(entry, default_kind)?;
                if resources
                    .insert(entry.name.clone(), Arc::new(resource))
                    .is_some()
                {
                    return Err(Error::DuplicateResource {
                        schema: name.to_string(),
                        name: entry.name.clone(),
                    });
                }
            }
            for create in file.create {
                if builtin_tables.contains_key(create.table.as_str())
                    || creates.contains_key(&create.table)
                {
                    return Err(Error::DuplicateTable {
                        schema: name.to_string(),
                        name: create.table,
                    });
                }
                creates.insert(create.table.clone(), create);
            }
            for extend in file.extend {
                extends.entry(extend.table).or_default().extend(extend.columns);
            }
        }
        if !found {
            return Err(Error::NoSchemaConfig(name.to_string()));
        }

        let mut tables = BTreeMap::new();
        for table in builtin_tables.values().copied() {
            let base_names = table.columns.iter().map(|(name, _)| *name);
            let extras = compile_columns(
                table.name,
                base_names,
                extends.remove(table.name).unwrap_or_default(),
            )?;
            tables.insert(
                table.name.to_string(),
                TableBuilder::Builtin(BuiltinBuilder {
                    schema: name.to_string(),
                    table,
                    extras,
                }),
            );
        }
        for (table_name, create) in creates {
            if !resources.contains_key(&create.resource) {
                return Err(Error::UnknownResource {
                    table: table_name,
                    resource: create.resource,
                });
            }
            let mut defs = create.columns;
            defs.extend(extends.remove(&table_name).unwrap_or_default());
            let columns = compile_columns(&table_name, std::iter::empty(), defs)?;
            let row_source = create
                .row_source
                .unwrap_or_else(|| vec!["items".to_string()])
                .iter()
                .map(|source| PathExpr::parse(source))
                .collect::<std::result::Result<Vec<_>, models::Error>>()?;
            tables.insert(
                table_name.clone(),
                TableBuilder::Config(ConfigBuilder {
                    schema: name.to_string(),
                    name: table_name,
                    resource: create.resource,
                    row_source,
                    columns,
                }),
            );
        }
        if let Some(orphan) = extends.keys().next() {
            return Err(Error::ExtendUnknownTable {
                schema: name.to_string(),
                table: orphan.clone(),
            });
        }

        Ok(Arc::new(Schema {
            name: name.to_string(),
            resources,
            tables,
        }))
    }
}

fn compile_columns<'a>(
    table: &str,
    existing: impl Iterator<Item = &'a str>,
    defs: Vec<ColumnDef>,
) -> Result<Vec<Column>> {
    let mut seen: BTreeSet<String> = existing.map(str::to_string).collect();
    let mut columns = Vec::new();
    for def in defs {
        if !seen.insert(def.name.clone()) {
            return Err(Error::DuplicateColumn {
                table: table.to_string(),
                name: def.name,
            });
        }
        columns.push(Column::compile(&def)?);
    }
    Ok(columns)
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixture {
        home: tempfile::TempDir,
        extra: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                home: tempfile::tempdir().unwrap(),
                extra: tempfile::tempdir().unwrap(),
            }
        }

        fn write_home(&self, name: &str, content: &str) {
            std::fs::write(self.home.path().join(name), content).unwrap();
        }

        fn write_extra(&self, name: &str, content: &str) {
            std::fs::write(self.extra.path().join(name), content).unwrap();
        }

        fn load(&self, schema: &str) -> Result<Arc<Schema>> {
            Registry::with_builtins().schema(
                schema,
                self.home.path(),
                &[self.extra.path().to_path_buf()],
            )
        }
    }

    const HR_YAML: &str = r#"
        resources:
          - name: people
            data:
              people:
                - {name: Jim, age: 42}
                - {name: Jill, age: 43}
        create:
          - table: people
            resource: people
            row_source: [people]
            columns:
              - name: name
                path: name
              - name: age
                type: integer
                path: age
    "#;

    #[test]
    fn loads_and_caches() {
        let fixture = Fixture::new();
        fixture.write_home("hr.yaml", HR_YAML);

        let registry = Registry::with_builtins();
        let schema = registry
            .schema("hr", fixture.home.path(), &[])
            .unwrap();
        assert!(schema.table_builder("people").is_some());
        assert!(schema.table_builder("ghosts").is_none());
        assert!(schema.resource("people").is_some());

        let again = registry.schema("hr", fixture.home.path(), &[]).unwrap();
        assert!(Arc::ptr_eq(&schema, &again));
    }

    #[test]
    fn unknown_schema_needs_a_config() {
        let fixture = Fixture::new();
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"no configurations found for schema 'hr'");
    }

    #[test]
    fn builtin_schema_needs_no_config() {
        let fixture = Fixture::new();
        let schema = fixture.load("kubernetes").unwrap();
        assert!(schema.table_builder("pods").is_some());
    }

    #[test]
    fn duplicate_resource_across_files() {
        let fixture = Fixture::new();
        fixture.write_extra("hr.yaml", HR_YAML);
        fixture.write_home(
            "hr.yaml",
            "resources: [{name: people, data: {}}]",
        );
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"Resource 'people' is already defined in schema 'hr'");
    }

    #[test]
    fn duplicate_table_across_files() {
        let fixture = Fixture::new();
        fixture.write_extra("hr.yaml", HR_YAML);
        fixture.write_home(
            "hr.yaml",
            r#"
            create:
              - table: people
                resource: people
                columns: [{name: name, path: name}]
            "#,
        );
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"Table 'people' is already defined in schema 'hr'");
    }

    #[test]
    fn duplicate_column_across_files() {
        let fixture = Fixture::new();
        fixture.write_extra("hr.yaml", HR_YAML);
        fixture.write_home(
            "hr.yaml",
            r#"
            extend:
              - table: people
                columns: [{name: name, path: name}]
            "#,
        );
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"Column 'name' is already defined in table 'people'");
    }

    #[test]
    fn create_colliding_with_builtin() {
        let fixture = Fixture::new();
        fixture.write_home(
            "kubernetes.yaml",
            r#"
            resources:
              - name: things
                data: {}
            create:
              - table: pods
                resource: things
                columns: [{name: name, path: name}]
            "#,
        );
        insta::assert_display_snapshot!(
            fixture.load("kubernetes").unwrap_err(),
            @"Table 'pods' is already defined in schema 'kubernetes'");
    }

    #[test]
    fn create_needs_known_resource() {
        let fixture = Fixture::new();
        fixture.write_home(
            "hr.yaml",
            r#"
            create:
              - table: people
                resource: ghosts
                columns: [{name: name, path: name}]
            "#,
        );
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"Table 'people' needs unknown resource 'ghosts'");
    }

    #[test]
    fn extend_needs_existing_table() {
        let fixture = Fixture::new();
        fixture.write_home(
            "hr.yaml",
            r#"
            extend:
              - table: ghosts
                columns: [{name: name, path: name}]
            "#,
        );
        insta::assert_display_snapshot!(
            fixture.load("hr").unwrap_err(),
            @"cannot extend undefined table 'ghosts' in schema 'hr'");
    }

    #[test]
    fn extends_merge_across_files() {
        let fixture = Fixture::new();
        fixture.write_extra("hr.yaml", HR_YAML);
        fixture.write_home(
            "hr.yaml",
            r#"
            extend:
              - table: people
                columns: [{name: sex, path: sex}]
            "#,
        );
        let schema = fixture.load("hr").unwrap();
        let builder = schema.table_builder("people").unwrap();
        assert_eq!(builder.column_names(), vec!["name", "age", "sex"]);
    }

    #[test]
    fn init_path_precedes_home() {
        // The extra directory is searched first, so its definitions win
        // the "first wins" rule; a home redefinition is the duplicate.
        let fixture = Fixture::new();
        fixture.write_extra("hr.yaml", HR_YAML);
        fixture.write_home("hr.yaml", HR_YAML);
        let err = fixture.load("hr").unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { .. }));
    }
}
