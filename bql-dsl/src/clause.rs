//! Compiled query clauses
//!
//! [`QueryClause`] is the closed set of clauses the compiler produces. It is
//! turned into engine wire JSON only through its `Serialize` impl.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Scalar term value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Number(f64),
    Bool(bool),
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

/// Range bound operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
        }
    }

    /// Range operator for a BQL comparison, if it is one
    pub fn from_operator(operator: bql_schema::Operator) -> Option<Self> {
        use bql_schema::Operator;
        match operator {
            Operator::Gt => Some(RangeOp::Gt),
            Operator::Gte => Some(RangeOp::Gte),
            Operator::Lt => Some(RangeOp::Lt),
            Operator::Lte => Some(RangeOp::Lte),
            _ => None,
        }
    }
}

/// Search-engine query clause
#[derive(Debug, Clone, PartialEq)]
pub enum QueryClause {
    Term { field: String, value: Scalar },
    Terms { field: String, values: Vec<Scalar> },
    Bool {
        must: Vec<QueryClause>,
        must_not: Vec<QueryClause>,
        should: Vec<QueryClause>,
    },
    Range { field: String, op: RangeOp, value: Scalar },
    Regexp { field: String, pattern: String },
    QueryString { fields: Vec<String>, query: String },
    Exists { field: String },
    MatchNone,
    MatchAll,
}

impl QueryClause {
    /// `bool` with only `must`
    pub fn must(clauses: Vec<QueryClause>) -> Self {
        QueryClause::Bool {
            must: clauses,
            must_not: Vec::new(),
            should: Vec::new(),
        }
    }

    /// `bool` with only `should`
    pub fn should(clauses: Vec<QueryClause>) -> Self {
        QueryClause::Bool {
            must: Vec::new(),
            must_not: Vec::new(),
            should: clauses,
        }
    }

    /// `bool` with only `must_not`
    pub fn must_not(clauses: Vec<QueryClause>) -> Self {
        QueryClause::Bool {
            must: Vec::new(),
            must_not: clauses,
            should: Vec::new(),
        }
    }

    /// Negation of a single clause
    pub fn not(clause: QueryClause) -> Self {
        QueryClause::must_not(vec![clause])
    }

    pub fn term(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        QueryClause::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn regexp(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        QueryClause::Regexp {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Engine wire JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One-entry JSON object `{key: value}`
struct Entry<'a, V: ?Sized>(&'a str, &'a V);

impl<V: Serialize + ?Sized> Serialize for Entry<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0, self.1)?;
        map.end()
    }
}

/// `{}`
struct Empty;

impl Serialize for Empty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

struct BoolBody<'a> {
    must: &'a [QueryClause],
    must_not: &'a [QueryClause],
    should: &'a [QueryClause],
}

impl Serialize for BoolBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.must.is_empty() {
            map.serialize_entry("must", self.must)?;
        }
        if !self.must_not.is_empty() {
            map.serialize_entry("must_not", self.must_not)?;
        }
        if !self.should.is_empty() {
            map.serialize_entry("should", self.should)?;
            map.serialize_entry("minimum_should_match", &1)?;
        }
        map.end()
    }
}

struct QueryStringBody<'a> {
    query: &'a str,
    fields: &'a [String],
}

impl Serialize for QueryStringBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("query", self.query)?;
        map.serialize_entry("fields", self.fields)?;
        map.end()
    }
}

impl Serialize for QueryClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryClause::Term { field, value } => {
                Entry("term", &Entry(field, value)).serialize(serializer)
            }
            QueryClause::Terms { field, values } => {
                Entry("terms", &Entry(field, values)).serialize(serializer)
            }
            QueryClause::Bool {
                must,
                must_not,
                should,
            } => Entry(
                "bool",
                &BoolBody {
                    must,
                    must_not,
                    should,
                },
            )
            .serialize(serializer),
            QueryClause::Range { field, op, value } => {
                Entry("range", &Entry(field, &Entry(op.as_str(), value))).serialize(serializer)
            }
            QueryClause::Regexp { field, pattern } => {
                Entry("regexp", &Entry(field, &Entry("value", pattern))).serialize(serializer)
            }
            QueryClause::QueryString { fields, query } => {
                Entry("query_string", &QueryStringBody { query, fields }).serialize(serializer)
            }
            QueryClause::Exists { field } => {
                Entry("exists", &Entry("field", field)).serialize(serializer)
            }
            QueryClause::MatchNone => Entry("match_none", &Empty).serialize(serializer),
            QueryClause::MatchAll => Entry("match_all", &Empty).serialize(serializer),
        }
    }
}
