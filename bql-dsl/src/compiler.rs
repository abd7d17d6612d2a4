//! BQL to query DSL compiler
//!
//! Compiles a validated, fully resolved [`Node`] tree into a [`QueryClause`].
//! Exact-match operators on string fields are reconciled against the
//! casings actually stored in the keyword sub-field; those lookups are
//! memoized per compile call so each keyword field is fetched at most once.

use crate::clause::{QueryClause, RangeOp, Scalar};
use crate::lookup::{DistinctValuesLookup, LookupError};
use bql_lang::{dialect, validate, BqlError, Condition, Node, Rule, Ruleset, Value};
use bql_schema::{FieldSpec, Operator, QueryLanguageSpec, ValueType};
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

/// Compiler configuration
#[derive(Debug, Clone)]
pub struct DslCompilerConfig {
    /// Suffix naming the exact-match sub-field of a text field
    pub keyword_suffix: String,

    /// Lower-case `contains` text before building query strings
    pub lowercase_query_string: bool,
}

impl Default for DslCompilerConfig {
    fn default() -> Self {
        Self {
            keyword_suffix: ".keyword".to_string(),
            lowercase_query_string: true,
        }
    }
}

/// Compile errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Query is invalid: {0}")]
    Validation(#[from] BqlError),

    #[error("Unresolved named query reference: {name}")]
    UnresolvedReference { name: String },

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    LookupFailure(#[from] LookupError),
}

/// Result type for compilation
pub type Result<T> = std::result::Result<T, CompileError>;

/// Query DSL compiler bound to a spec and a distinct-values source
pub struct DslCompiler {
    spec: Arc<QueryLanguageSpec>,
    lookup: Arc<dyn DistinctValuesLookup>,
    config: DslCompilerConfig,
}

impl DslCompiler {
    /// Create a compiler with the default configuration
    pub fn new(spec: Arc<QueryLanguageSpec>, lookup: Arc<dyn DistinctValuesLookup>) -> Self {
        Self::with_config(spec, lookup, DslCompilerConfig::default())
    }

    pub fn with_config(
        spec: Arc<QueryLanguageSpec>,
        lookup: Arc<dyn DistinctValuesLookup>,
        config: DslCompilerConfig,
    ) -> Self {
        Self {
            spec,
            lookup,
            config,
        }
    }

    /// Compile `node`, fanning the document field out over `document_fields`
    pub async fn compile(&self, node: &Node, document_fields: &[String]) -> Result<QueryClause> {
        Compilation::new(&self.spec, self.lookup.as_ref(), &self.config, document_fields)
            .run(node)
            .await
    }

    /// Compile `node` using the document fields configured for `entity`
    pub async fn compile_for_entity(&self, node: &Node, entity: &str) -> Result<QueryClause> {
        let entity = self
            .spec
            .entity(entity)
            .ok_or_else(|| CompileError::UnknownEntity(entity.to_string()))?;
        self.compile(node, &entity.document_fields).await
    }
}

/// Compile with the default configuration
pub async fn compile(
    node: &Node,
    spec: &QueryLanguageSpec,
    document_fields: &[String],
    lookup: &dyn DistinctValuesLookup,
) -> Result<QueryClause> {
    let config = DslCompilerConfig::default();
    Compilation::new(spec, lookup, &config, document_fields)
        .run(node)
        .await
}

/// State of one compile call
struct Compilation<'a> {
    spec: &'a QueryLanguageSpec,
    lookup: &'a dyn DistinctValuesLookup,
    config: &'a DslCompilerConfig,
    document_fields: &'a [String],
    /// Single-flight distinct values per keyword field
    memo: DashMap<String, Arc<OnceCell<Arc<Vec<String>>>>>,
}

impl<'a> Compilation<'a> {
    fn new(
        spec: &'a QueryLanguageSpec,
        lookup: &'a dyn DistinctValuesLookup,
        config: &'a DslCompilerConfig,
        document_fields: &'a [String],
    ) -> Self {
        Self {
            spec,
            lookup,
            config,
            document_fields,
            memo: DashMap::new(),
        }
    }

    async fn run(&self, node: &Node) -> Result<QueryClause> {
        if let Some(name) = node.references().into_iter().next() {
            return Err(CompileError::UnresolvedReference { name });
        }
        validate(node, self.spec, &[]).map_err(BqlError::from)?;

        let clause = self.node(node).await?;
        debug!(
            rules = node.rule_count(),
            lookups = self.memo.len(),
            "Compiled query"
        );
        Ok(clause)
    }

    fn node<'b>(&'b self, node: &'b Node) -> BoxFuture<'b, Result<QueryClause>> {
        async move {
            match node {
                Node::Rule(rule) => self.rule(rule).await,
                Node::Ruleset(set) => self.ruleset(set).await,
                Node::Reference(r) => Err(CompileError::UnresolvedReference {
                    name: r.name.clone(),
                }),
            }
        }
        .boxed()
    }

    async fn ruleset(&self, set: &Ruleset) -> Result<QueryClause> {
        let clause = if set.children.is_empty() {
            match set.condition {
                Condition::And => QueryClause::MatchAll,
                Condition::Or => QueryClause::MatchNone,
            }
        } else {
            let children = try_join_all(set.children.iter().map(|child| self.node(child))).await?;
            match set.condition {
                Condition::And => QueryClause::must(children),
                Condition::Or => QueryClause::should(children),
            }
        };

        Ok(if set.not {
            QueryClause::not(clause)
        } else {
            clause
        })
    }

    async fn rule(&self, rule: &Rule) -> Result<QueryClause> {
        let field = self
            .spec
            .field(&rule.field)
            .ok_or_else(|| BqlError::unknown_field(&rule.field))?;

        if let Some(op) = RangeOp::from_operator(rule.operator) {
            let value = rule
                .value
                .as_ref()
                .and_then(scalar)
                .ok_or_else(|| BqlError::syntax(0, "value"))?;
            return Ok(QueryClause::Range {
                field: field.name.clone(),
                op,
                value,
            });
        }

        let mut negated = rule.operator.is_negative();

        let clause = match (rule.operator.positive(), &rule.value) {
            (Operator::Exists, value) => {
                if value.as_ref().and_then(Value::as_bool) == Some(false) {
                    negated = !negated;
                }
                self.fan_out(field, |target| self.exists(field, target))
            }
            (
                Operator::Contains | Operator::Like,
                Some(Value::Regex {
                    pattern,
                    case_insensitive,
                }),
            ) => {
                let translated = dialect::translate(pattern, *case_insensitive)?;
                self.fan_out(field, |target| {
                    QueryClause::regexp(self.keyword(target), translated.clone())
                })
            }
            (Operator::Contains, Some(Value::String(text))) => self.query_string(field, text),
            (Operator::Like, Some(Value::String(text))) => {
                let translated = dialect::translate(&like_pattern(text), true)?;
                self.fan_out(field, |target| {
                    QueryClause::regexp(self.keyword(target), translated.clone())
                })
            }
            (Operator::Eq, Some(value)) => self.exact(field, std::slice::from_ref(value)).await?,
            (Operator::In, Some(Value::List(values))) => self.exact(field, values).await?,
            (operator, value) => {
                return Err(BqlError::malformed(format!(
                    "{} {} {}",
                    rule.field,
                    operator,
                    value.as_ref().map(|v| v.kind()).unwrap_or("nothing")
                ))
                .into());
            }
        };

        Ok(if negated {
            QueryClause::not(clause)
        } else {
            clause
        })
    }

    /// Underlying fields a rule on `field` applies to
    fn targets<'b>(&'b self, field: &'b FieldSpec) -> Vec<&'b str> {
        if self.spec.is_document_field(&field.name) && !self.document_fields.is_empty() {
            self.document_fields.iter().map(String::as_str).collect()
        } else {
            vec![field.name.as_str()]
        }
    }

    /// One clause per target, combined with `should` when there are several
    fn fan_out(&self, field: &FieldSpec, build: impl Fn(&str) -> QueryClause) -> QueryClause {
        let mut clauses: Vec<QueryClause> = self.targets(field).into_iter().map(build).collect();
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            QueryClause::should(clauses)
        }
    }

    fn keyword(&self, field: &str) -> String {
        format!("{}{}", field, self.config.keyword_suffix)
    }

    /// Present and, for strings, not blank
    fn exists(&self, field: &FieldSpec, target: &str) -> QueryClause {
        let present = QueryClause::Exists {
            field: target.to_string(),
        };
        if field.value_type == ValueType::String {
            QueryClause::must(vec![
                present,
                QueryClause::not(QueryClause::term(self.keyword(target), "")),
            ])
        } else {
            present
        }
    }

    /// Analyzed-text search for `contains`
    fn query_string(&self, field: &FieldSpec, text: &str) -> QueryClause {
        let text = if self.config.lowercase_query_string {
            text.to_lowercase()
        } else {
            text.to_string()
        };

        let is_word = !text.is_empty() && text.chars().all(|c| c.is_alphanumeric() || c == '_');
        let query = if is_word {
            format!("*{}*", text)
        } else {
            format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
        };

        QueryClause::QueryString {
            fields: self.targets(field).into_iter().map(str::to_string).collect(),
            query,
        }
    }

    /// `=` and `in`
    async fn exact(&self, field: &FieldSpec, values: &[Value]) -> Result<QueryClause> {
        if field.value_type != ValueType::String {
            let scalars: Vec<Scalar> = values.iter().filter_map(scalar).collect();
            return Ok(match <[Scalar; 1]>::try_from(scalars) {
                Ok([single]) => QueryClause::Term {
                    field: field.name.clone(),
                    value: single,
                },
                Err(scalars) => QueryClause::Terms {
                    field: field.name.clone(),
                    values: scalars,
                },
            });
        }

        let wanted: Vec<String> = values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_lowercase)
            .collect();

        let targets = self.targets(field);
        let clauses = try_join_all(
            targets
                .iter()
                .map(|target| self.reconcile(target, &wanted)),
        )
        .await?;

        Ok(match <[QueryClause; 1]>::try_from(clauses) {
            Ok([single]) => single,
            Err(clauses) => QueryClause::should(clauses),
        })
    }

    /// Map case-insensitive input to the casings stored in `target`'s keyword field
    async fn reconcile(&self, target: &str, wanted: &[String]) -> Result<QueryClause> {
        let keyword = self.keyword(target);
        let stored = self.distinct_values(&keyword).await?;

        let mut matched: Vec<Scalar> = stored
            .iter()
            .filter(|value| wanted.contains(&value.to_lowercase()))
            .map(|value| Scalar::String(value.clone()))
            .collect();

        trace!(field = %keyword, wanted = wanted.len(), matched = matched.len(), "Reconciled keyword values");

        Ok(match matched.len() {
            0 => QueryClause::MatchNone,
            1 => QueryClause::Term {
                field: keyword,
                value: matched.remove(0),
            },
            _ => QueryClause::Terms {
                field: keyword,
                values: matched,
            },
        })
    }

    /// Distinct values of a keyword field, fetched once per compile call
    async fn distinct_values(&self, keyword: &str) -> Result<Arc<Vec<String>>> {
        let cell = self.memo.entry(keyword.to_string()).or_default().clone();

        let values = cell
            .get_or_try_init(|| async {
                debug!(field = %keyword, "Fetching distinct values");
                self.lookup.distinct_values(keyword).await.map(Arc::new)
            })
            .await?;

        Ok(values.clone())
    }
}

fn scalar(value: &Value) -> Option<Scalar> {
    match value {
        Value::String(s) => Some(Scalar::String(s.clone())),
        Value::Number(n) => Some(Scalar::Number(*n)),
        Value::Bool(b) => Some(Scalar::Bool(*b)),
        Value::List(_) | Value::Regex { .. } => None,
    }
}

/// `like` wildcards (`*`/`%` any run, `?`/`_` one character) as an anchored regex
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 8);
    pattern.push('^');
    for c in text.chars() {
        match c {
            '*' | '%' => pattern.push_str(".*"),
            '?' | '_' => pattern.push('.'),
            '.' | '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '/' => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    pattern
}
