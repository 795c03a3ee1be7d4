use serde_json::Value;

use crate::Error;

/// A parsed path expression: an optional run of `^` parent hops followed by
/// dot-separated segments evaluated against a JSON-shaped document.
///
/// ```
/// use models::PathExpr;
///
/// let path = PathExpr::parse("^^spec.containers.0.name").unwrap();
/// assert_eq!(path.parents(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    parents: u32,
    segments: Vec<Segment>,
    raw: String,
}

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A map key. Also used for integer-looking keys with leading zeros.
    Key(String),
    /// An array index.
    Index(usize),
    /// `*`: every element of an array.
    Spread,
}

impl Segment {
    fn parse(part: &str) -> Segment {
        if part == "*" {
            return Segment::Spread;
        }
        // Leading zeros and signs denote a property name, never an index.
        if part.starts_with('+') || (part.starts_with('0') && part.len() > 1) {
            return Segment::Key(part.to_string());
        }
        match part.parse::<usize>() {
            Ok(index) => Segment::Index(index),
            Err(_) => Segment::Key(part.to_string()),
        }
    }
}

impl PathExpr {
    pub fn parse(text: &str) -> Result<PathExpr, Error> {
        let rest = text.trim_start_matches('^');
        let parents = (text.len() - rest.len()) as u32;
        if rest.is_empty() {
            return Err(Error::InvalidPath(text.to_string()));
        }
        let mut segments = Vec::new();
        for part in rest.split('.') {
            if part.is_empty() {
                return Err(Error::InvalidPath(text.to_string()));
            }
            segments.push(Segment::parse(part));
        }
        Ok(PathExpr {
            parents,
            segments,
            raw: text.to_string(),
        })
    }

    /// The number of leading `^` parent hops.
    pub fn parents(&self) -> u32 {
        self.parents
    }

    /// The expression as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluate against `root`, returning the single addressed value.
    /// None if the path reaches nothing, or only nulls.
    pub fn query<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.spread(root).into_iter().next()
    }

    /// Evaluate against `root`, returning every addressed value. `*`
    /// segments fan out over array elements; nulls are dropped.
    pub fn spread<'v>(&self, root: &'v Value) -> Vec<&'v Value> {
        let mut nodes = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in nodes {
                match (segment, node) {
                    (Segment::Spread, Value::Array(items)) => next.extend(items.iter()),
                    (Segment::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                    (Segment::Index(index), Value::Array(items)) => next.extend(items.get(*index)),
                    _ => (),
                }
            }
            nodes = next;
        }
        nodes.retain(|node| !node.is_null());
        nodes
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsing() {
        let path = PathExpr::parse("metadata.labels").unwrap();
        assert_eq!(path.parents(), 0);
        assert_eq!(
            path.spread(&json!({"metadata": {"labels": {"a": 1}}})),
            vec![&json!({"a": 1})]
        );

        let path = PathExpr::parse("^^match.region").unwrap();
        assert_eq!(path.parents(), 2);
        assert_eq!(path.raw(), "^^match.region");
    }

    #[test]
    fn parse_errors() {
        for bad in ["", "^", "a..b", ".a", "a."] {
            assert!(
                matches!(PathExpr::parse(bad), Err(Error::InvalidPath(_))),
                "expected failure for {bad:?}"
            );
        }
    }

    #[test]
    fn indices_and_spread() {
        let doc = json!({
            "items": [
                {"a": [1, 2]},
                {"a": [3]},
                {"b": null},
            ]
        });
        let path = PathExpr::parse("items.0.a").unwrap();
        assert_eq!(path.query(&doc), Some(&json!([1, 2])));

        let path = PathExpr::parse("items.*.a").unwrap();
        assert_eq!(path.spread(&doc), vec![&json!([1, 2]), &json!([3])]);

        // Nulls are dropped, missing keys yield nothing.
        let path = PathExpr::parse("items.*.b").unwrap();
        assert!(path.spread(&doc).is_empty());
    }

    #[test]
    fn zero_prefixed_keys_are_names() {
        let doc = json!({"01": "x", "fields": ["y"]});
        assert_eq!(
            PathExpr::parse("01").unwrap().query(&doc),
            Some(&json!("x"))
        );
        assert_eq!(
            PathExpr::parse("fields.0").unwrap().query(&doc),
            Some(&json!("y"))
        );
    }
}
