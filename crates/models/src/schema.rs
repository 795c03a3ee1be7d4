use serde::Deserialize;

use crate::{check_name, Error, PathExpr};

/// One `<schema>.yaml` configuration file: resources backing tables, tables
/// created wholly from configuration, and extensions of existing tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    #[serde(default)]
    pub create: Vec<CreateTable>,
    #[serde(default)]
    pub extend: Vec<ExtendTable>,
}

/// One entry from the `resources:` list. Exactly one of the kind fields
/// (`data`, `file`, `exec`, `folder`) may be present; a `namespaced` marker
/// implies a Kubernetes resource; otherwise the schema's default kind
/// applies. Kind inference itself happens in the engine, which also owns
/// the per-kind cacheability rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceEntry {
    pub name: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub exec: Option<Command>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub glob: Option<String>,
    #[serde(default)]
    pub r#match: Option<String>,
    #[serde(default)]
    pub namespaced: Option<bool>,
    #[serde(default)]
    pub cacheable: Option<bool>,
    #[serde(default)]
    pub cache_key: Option<String>,
}

/// A subprocess invocation: either a shell command line or an argv list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

/// The `create:` section binds a new table to a resource, a row source,
/// and its column definitions.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTable {
    pub table: String,
    pub resource: String,
    #[serde(default)]
    pub row_source: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

/// The `extend:` section attaches columns to an existing table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendTable {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

/// One entry from a `columns:` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default)]
    pub r#type: ColumnType,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub label: Option<OneOrMany>,
    /// Free-form documentation; ignored by the engine.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A single value or a list of them, as YAML allows either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(one) => vec![one.clone()],
            OneOrMany::Many(many) => many.clone(),
        }
    }
}

/// Declared column types and their SQLite affinities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Date,
    Age,
    Size,
    Cpu,
}

impl Default for ColumnType {
    fn default() -> Self {
        ColumnType::Text
    }
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer | ColumnType::Date | ColumnType::Age | ColumnType::Size => {
                "integer"
            }
            ColumnType::Real | ColumnType::Cpu => "real",
        }
    }
}

/// What a column extracts: a path expression, or label keys tried in order.
#[derive(Debug, Clone)]
pub enum ColumnTarget {
    Path(PathExpr),
    Label(Vec<String>),
}

impl ColumnDef {
    /// Resolve the exactly-one-of path/label invariant, compiling the path.
    pub fn target(&self) -> Result<ColumnTarget, Error> {
        match (&self.path, &self.label) {
            (Some(_), Some(_)) => Err(Error::PathAndLabel(self.name.clone())),
            (Some(path), None) => Ok(ColumnTarget::Path(PathExpr::parse(path)?)),
            (None, Some(label)) => Ok(ColumnTarget::Label(label.to_vec())),
            (None, None) => Err(Error::PathOrLabel(self.name.clone())),
        }
    }
}

impl SchemaFile {
    /// Validate everything checkable without the engine: name legality,
    /// column path/label exclusivity, and that every path expression and
    /// folder regex compiles.
    pub fn validate(&self) -> Result<(), Error> {
        for resource in &self.resources {
            check_name(&resource.name)?;
            if let Some(pattern) = &resource.r#match {
                regex::Regex::new(pattern).map_err(|err| Error::InvalidRegex {
                    pattern: pattern.clone(),
                    err,
                })?;
            }
        }
        for create in &self.create {
            check_name(&create.table)?;
            for source in create.row_source.iter().flatten() {
                PathExpr::parse(source)?;
            }
            check_columns(&create.columns)?;
        }
        for extend in &self.extend {
            check_name(&extend.table)?;
            check_columns(&extend.columns)?;
        }
        Ok(())
    }
}

fn check_columns(columns: &[ColumnDef]) -> Result<(), Error> {
    for column in columns {
        check_name(&column.name)?;
        column.target()?;
    }
    Ok(())
}
