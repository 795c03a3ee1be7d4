use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::{Error, Result};
use models::{ColumnDef, ColumnTarget, ColumnType, PathExpr};

/// Parent links recorded while a table's rows are enumerated, keyed by
/// value identity. Built per table and discarded after its inserts.
#[derive(Default)]
pub struct RowContext<'a> {
    parents: HashMap<usize, &'a Value>,
}

impl<'a> RowContext<'a> {
    pub fn new() -> RowContext<'a> {
        RowContext::default()
    }

    fn key(value: &Value) -> usize {
        value as *const Value as usize
    }

    pub fn record(&mut self, child: &'a Value, parent: &'a Value) {
        self.parents.insert(Self::key(child), parent);
    }

    pub fn parent_of(&self, value: &'a Value) -> Option<&'a Value> {
        self.parents.get(&Self::key(value)).copied()
    }

    /// Follow parent links as far as they go.
    pub fn rootmost(&self, mut value: &'a Value) -> &'a Value {
        while let Some(parent) = self.parent_of(value) {
            value = parent;
        }
        value
    }
}

/// Expand a row-source chain: evaluate each path against the current items,
/// flattening list results and recording every child's producer.
pub fn itemize<'a>(
    row_source: &[PathExpr],
    document: &'a Value,
    context: &mut RowContext<'a>,
) -> Vec<&'a Value> {
    let mut items = vec![document];
    for path in row_source {
        let mut next = Vec::new();
        for item in items {
            for child in path.spread(item) {
                match child {
                    Value::Array(elements) => {
                        for element in elements.iter().filter(|e| !e.is_null()) {
                            context.record(element, item);
                            next.push(element);
                        }
                    }
                    _ => {
                        context.record(child, item);
                        next.push(child);
                    }
                }
            }
        }
        items = next;
    }
    items
}

/// A compiled column: declared type plus its extraction target.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ctype: ColumnType,
    target: ColumnTarget,
}

impl Column {
    pub fn compile(def: &ColumnDef) -> Result<Column> {
        Ok(Column {
            name: def.name.clone(),
            ctype: def.r#type,
            target: def.target()?,
        })
    }

    /// Extract this column's value from a row object. Missing values and
    /// failed coercions yield NULL; a parent-hop overrun is fatal.
    pub fn extract(&self, item: &Value, context: &RowContext) -> Result<SqlValue> {
        match &self.target {
            ColumnTarget::Path(path) => {
                let mut object = item;
                for _ in 0..path.parents() {
                    object = context
                        .parent_of(object)
                        .ok_or_else(|| Error::ParentHop(path.raw().to_string()))?;
                }
                Ok(coerce(self.ctype, path.query(object)))
            }
            ColumnTarget::Label(keys) => {
                let root = context.rootmost(item);
                let labels = root.pointer("/metadata/labels");
                let found = keys
                    .iter()
                    .find_map(|key| labels.and_then(|l| l.get(key)).filter(|v| !v.is_null()));
                Ok(coerce(self.ctype, found))
            }
        }
    }
}

/// Coerce a raw document value to its declared column type.
pub(crate) fn coerce(ctype: ColumnType, value: Option<&Value>) -> SqlValue {
    let Some(value) = value else {
        return SqlValue::Null;
    };
    if value.is_null() {
        return SqlValue::Null;
    }
    match ctype {
        ColumnType::Text => match value {
            Value::String(text) => SqlValue::Text(text.clone()),
            // Everything else renders as its compact JSON form.
            other => SqlValue::Text(other.to_string()),
        },
        ColumnType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
        ColumnType::Real => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
        ColumnType::Date => match value {
            Value::String(s) => values::parse_utc(s)
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            Value::Number(n) => n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
        ColumnType::Age => match value {
            Value::String(s) => values::parse_age(s)
                .map(|age| SqlValue::Integer(age.seconds() as i64))
                .unwrap_or(SqlValue::Null),
            Value::Number(n) => n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
        ColumnType::Size => match value {
            Value::String(s) => values::parse_size(s)
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
        ColumnType::Cpu => match value {
            Value::String(s) => values::parse_cpu(s)
                .map(SqlValue::Real)
                .unwrap_or(SqlValue::Null),
            Value::Number(n) => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        },
    }
}

/// A table whose row enumeration and base columns are code-defined,
/// registered with the registry at startup.
#[derive(Debug)]
pub struct BuiltinTable {
    pub name: &'static str,
    pub resource: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
    pub make_rows: for<'a> fn(&'a Value) -> Vec<(&'a Value, Vec<SqlValue>)>,
}

/// Materializes one table into the SQL database: DDL from declared columns,
/// then one parameterized insert per enumerated row.
#[derive(Debug, Clone)]
pub enum TableBuilder {
    Builtin(BuiltinBuilder),
    Config(ConfigBuilder),
}

#[derive(Debug, Clone)]
pub struct BuiltinBuilder {
    pub schema: String,
    pub table: &'static BuiltinTable,
    pub extras: Vec<Column>,
}

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    pub schema: String,
    pub name: String,
    pub resource: String,
    pub row_source: Vec<PathExpr>,
    pub columns: Vec<Column>,
}

impl TableBuilder {
    pub fn name(&self) -> &str {
        match self {
            TableBuilder::Builtin(b) => b.table.name,
            TableBuilder::Config(c) => &c.name,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            TableBuilder::Builtin(b) => b.table.resource,
            TableBuilder::Config(c) => &c.resource,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        match self {
            TableBuilder::Builtin(b) => b
                .table
                .columns
                .iter()
                .map(|(name, _)| *name)
                .chain(b.extras.iter().map(|c| c.name.as_str()))
                .collect(),
            TableBuilder::Config(c) => c.columns.iter().map(|c| c.name.as_str()).collect(),
        }
    }

    pub fn build(&self, db: &rusqlite::Connection, document: &Value) -> Result<()> {
        match self {
            TableBuilder::Builtin(b) => b.build(db, document),
            TableBuilder::Config(c) => c.build(db, document),
        }
    }
}

impl BuiltinBuilder {
    fn build(&self, db: &rusqlite::Connection, document: &Value) -> Result<()> {
        let context = RowContext::new();
        let decls: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|(name, ctype)| format!("{name} {}", ctype.sql_type()))
            .chain(
                self.extras
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.ctype.sql_type())),
            )
            .collect();
        create_table(db, &self.schema, self.table.name, &decls)?;

        let rows = (self.table.make_rows)(document);
        if rows.is_empty() {
            return Ok(());
        }
        let mut statement = db.prepare(&insert_sql(
            &self.schema,
            self.table.name,
            self.table.columns.len() + self.extras.len(),
        ))?;
        for (item, mut row) in rows {
            for extra in &self.extras {
                row.push(extra.extract(item, &context)?);
            }
            statement.execute(rusqlite::params_from_iter(row))?;
        }
        Ok(())
    }
}

impl ConfigBuilder {
    fn build(&self, db: &rusqlite::Connection, document: &Value) -> Result<()> {
        let mut context = RowContext::new();
        let items = itemize(&self.row_source, document, &mut context);

        let decls: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.ctype.sql_type()))
            .collect();
        create_table(db, &self.schema, &self.name, &decls)?;

        if items.is_empty() {
            return Ok(());
        }
        let mut statement =
            db.prepare(&insert_sql(&self.schema, &self.name, self.columns.len()))?;
        for item in items {
            let row: Vec<SqlValue> = self
                .columns
                .iter()
                .map(|c| c.extract(item, &context))
                .collect::<Result<_>>()?;
            statement.execute(rusqlite::params_from_iter(row))?;
        }
        Ok(())
    }
}

fn create_table(
    db: &rusqlite::Connection,
    schema: &str,
    name: &str,
    decls: &[String],
) -> Result<()> {
    let ddl = format!("CREATE TABLE {schema}.{name} ({})", decls.join(", "));
    tracing::debug!(target: "schema", %ddl, "creating table");
    db.execute(&ddl, [])?;
    Ok(())
}

fn insert_sql(schema: &str, name: &str, column_count: usize) -> String {
    let params = vec!["?"; column_count].join(", ");
    format!("INSERT INTO {schema}.{name} VALUES ({params})")
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn path_column(name: &str, ctype: ColumnType, path: &str) -> Column {
        Column {
            name: name.to_string(),
            ctype,
            target: ColumnTarget::Path(PathExpr::parse(path).unwrap()),
        }
    }

    #[test]
    fn row_source_traversal_records_parents() {
        let document = json!({"items": [{"a": [1, 2]}, {"a": [3]}]});
        let sources = vec![
            PathExpr::parse("items").unwrap(),
            PathExpr::parse("a").unwrap(),
        ];
        let mut context = RowContext::new();
        let items = itemize(&sources, &document, &mut context);
        assert_eq!(items, vec![&json!(1), &json!(2), &json!(3)]);

        // Each row's parent is the enclosing items element, whose own
        // parent is the document.
        let column = path_column("origin", ColumnType::Text, "^a");
        assert_eq!(
            column.extract(items[0], &context).unwrap(),
            SqlValue::Text("[1,2]".to_string())
        );
        assert_eq!(
            column.extract(items[2], &context).unwrap(),
            SqlValue::Text("[3]".to_string())
        );
        assert_eq!(context.rootmost(items[0]), &document);
    }

    #[test]
    fn scalar_row_source_results_pass_through() {
        let document = json!({"items": [{"a": {"b": 1}}]});
        let sources = vec![
            PathExpr::parse("items").unwrap(),
            PathExpr::parse("a").unwrap(),
        ];
        let mut context = RowContext::new();
        let items = itemize(&sources, &document, &mut context);
        assert_eq!(items, vec![&json!({"b": 1})]);
    }

    #[test]
    fn parent_hop_overrun_is_fatal() {
        let document = json!({"items": [{"x": 1}]});
        let sources = vec![PathExpr::parse("items").unwrap()];
        let mut context = RowContext::new();
        let items = itemize(&sources, &document, &mut context);

        let column = path_column("bad", ColumnType::Text, "^^^invalid");
        insta::assert_display_snapshot!(
            column.extract(items[0], &context).unwrap_err(),
            @"missing parent or too many ^ while evaluating '^^^invalid'");
    }

    #[test]
    fn label_columns_search_keys_in_order() {
        let item = json!({
            "metadata": {
                "labels": {"team": "infra", "owner": "jo"}
            }
        });
        let context = RowContext::new();

        let column = Column {
            name: "who".to_string(),
            ctype: ColumnType::Text,
            target: ColumnTarget::Label(vec!["missing".to_string(), "owner".to_string()]),
        };
        assert_eq!(
            column.extract(&item, &context).unwrap(),
            SqlValue::Text("jo".to_string())
        );

        let column = Column {
            name: "who".to_string(),
            ctype: ColumnType::Text,
            target: ColumnTarget::Label(vec!["nope".to_string()]),
        };
        assert_eq!(column.extract(&item, &context).unwrap(), SqlValue::Null);
    }

    #[test]
    fn coercions() {
        use ColumnType::*;

        let cases = [
            (Text, json!("abc"), SqlValue::Text("abc".to_string())),
            (Text, json!(7), SqlValue::Text("7".to_string())),
            (Text, json!(true), SqlValue::Text("true".to_string())),
            (Integer, json!(42), SqlValue::Integer(42)),
            (Integer, json!("42"), SqlValue::Integer(42)),
            (Integer, json!(2.9), SqlValue::Integer(2)),
            (Integer, json!("wat"), SqlValue::Null),
            (Real, json!(2.5), SqlValue::Real(2.5)),
            (Real, json!("2.5"), SqlValue::Real(2.5)),
            (Date, json!("1970-01-02"), SqlValue::Integer(86_400)),
            (Date, json!("nope"), SqlValue::Null),
            (Age, json!("5m30s"), SqlValue::Integer(330)),
            (Size, json!("10Ki"), SqlValue::Integer(10_240)),
            (Size, json!(512), SqlValue::Integer(512)),
            (Cpu, json!("300m"), SqlValue::Real(0.3)),
            (Cpu, json!(2), SqlValue::Real(2.0)),
        ];
        for (ctype, value, expected) in cases {
            assert_eq!(coerce(ctype, Some(&value)), expected, "{ctype:?} {value}");
        }
        assert_eq!(coerce(Text, None), SqlValue::Null);
        assert_eq!(coerce(Integer, Some(&Value::Null)), SqlValue::Null);
    }

    fn hr_builder() -> ConfigBuilder {
        ConfigBuilder {
            schema: "hr".to_string(),
            name: "people".to_string(),
            resource: "people".to_string(),
            row_source: vec![PathExpr::parse("people").unwrap()],
            columns: vec![
                path_column("name", ColumnType::Text, "name"),
                path_column("age", ColumnType::Integer, "age"),
            ],
        }
    }

    fn build_and_dump(builder: &ConfigBuilder, document: &Value) -> (String, Vec<(String, i64)>) {
        let db = rusqlite::Connection::open_in_memory().unwrap();
        db.execute("ATTACH DATABASE ':memory:' AS hr", []).unwrap();
        builder.build(&db, document).unwrap();

        let ddl: String = db
            .query_row(
                "SELECT sql FROM hr.sqlite_master WHERE name = 'people'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let mut statement = db.prepare("SELECT name, age FROM hr.people").unwrap();
        let rows = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()
            .unwrap();
        (ddl, rows)
    }

    #[test]
    fn builder_is_deterministic() {
        let document = json!({"people": [
            {"name": "Jim", "age": 42},
            {"name": "Jill", "age": 43},
        ]});
        let builder = hr_builder();
        let (ddl_one, rows_one) = build_and_dump(&builder, &document);
        let (ddl_two, rows_two) = build_and_dump(&builder, &document);
        assert_eq!(ddl_one, ddl_two);
        assert_eq!(rows_one, rows_two);
        assert!(ddl_one.ends_with("(name text, age integer)"), "{ddl_one}");
        assert_eq!(
            rows_one,
            vec![("Jim".to_string(), 42), ("Jill".to_string(), 43)]
        );
    }

    #[test]
    fn empty_documents_make_empty_tables() {
        let (_, rows) = build_and_dump(&hr_builder(), &json!({}));
        assert!(rows.is_empty());
    }
}
