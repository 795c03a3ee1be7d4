//! Validated models for Quarry's configuration files: `init.yaml` (settings
//! and shortcuts) and one `<schema>.yaml` per schema (resources, table
//! creates, and table extensions).

mod init;
mod load;
mod path;
mod schema;

pub use init::{InitFile, Settings, Shortcut};
pub use load::load_file;
pub use path::{PathExpr, Segment};
pub use schema::{
    ColumnDef, ColumnTarget, ColumnType, Command, CreateTable, ExtendTable, OneOrMany,
    ResourceEntry, SchemaFile,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read {path}: {err}")]
    Read {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to parse {path}: {err}")]
    Parse {
        path: String,
        #[source]
        err: serde_yaml::Error,
    },
    #[error("{0} is world writeable, refusing to run")]
    WorldWriteable(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("invalid path expression '{0}'")]
    InvalidPath(String),
    #[error("column '{0}': cannot specify both path and label")]
    PathAndLabel(String),
    #[error("column '{0}': must specify either path or label")]
    PathOrLabel(String),
    #[error("invalid regex '{pattern}': {err}")]
    InvalidRegex {
        pattern: String,
        #[source]
        err: regex::Error,
    },
    #[error("{home} should not be listed in init_path")]
    HomeInInitPath { home: String },
}

lazy_static::lazy_static! {
    /// Legal schema, resource, table, and column names.
    pub(crate) static ref NAME_RE: regex::Regex =
        regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
}

pub(crate) fn check_name(name: &str) -> Result<(), Error> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}
