use comfy_table::{presets, Cell, Table};
use rusqlite::types::Value as SqlValue;

use engine::QueryResult;

/// Plain tabular output: no borders, floats with one decimal place, and
/// float values equal to an integer shown as that integer.
pub fn print_table(result: &QueryResult) {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(
        result
            .columns
            .iter()
            .map(|name| Cell::new(name))
            .collect::<Vec<_>>(),
    );
    for row in &result.rows {
        table.add_row(
            row.iter()
                .map(|value| Cell::new(display(value)))
                .collect::<Vec<_>>(),
        );
    }
    println!("{table}");
}

fn display(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Real(f) if *f == f.trunc() => format!("{}", *f as i64),
        SqlValue::Real(f) => format!("{f:.1}"),
        SqlValue::Text(text) => text.clone(),
        SqlValue::Blob(blob) => format!("<{} bytes>", blob.len()),
    }
}
