//! Named-query resolver
//!
//! `resolve` substitutes every name reference with the parsed text of the
//! named query it points to; `collapse` is the inverse, saving a subtree as
//! a named query and leaving a reference in its place.

use crate::{NamedQuery, NamedQueryStore, QueryScope, ResolveError, Result};
use bql_lang::{is_reference_name, parse, serialize, NamedRef, Node, RenderMode};
use bql_schema::QueryLanguageSpec;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum nesting of named queries inside named queries
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// Expands and collapses named-query references
pub struct Resolver {
    store: Arc<dyn NamedQueryStore>,
    spec: Arc<QueryLanguageSpec>,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver over `store` with the default configuration
    pub fn new(store: Arc<dyn NamedQueryStore>, spec: Arc<QueryLanguageSpec>) -> Self {
        Self::with_config(store, spec, ResolverConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn NamedQueryStore>,
        spec: Arc<QueryLanguageSpec>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            spec,
            config,
        }
    }

    /// Replace every reference in `node` with its named query's expansion.
    ///
    /// `ancestors` are names already being expanded by the caller. The
    /// expansion root carries `named` and all expanded nodes are marked as
    /// children. A negated reference negates the expansion.
    pub async fn resolve(
        &self,
        node: Node,
        scope: &QueryScope,
        ancestors: &[String],
    ) -> Result<Node> {
        self.resolve_boxed(node, scope, ancestors.to_vec()).await
    }

    /// Parse BQL text and resolve its references
    pub async fn expand_text(&self, text: &str, scope: &QueryScope) -> Result<Node> {
        let node = parse(text, &self.spec)?;
        self.resolve(node, scope, &[]).await
    }

    /// Save the subtree at `path` as the named query `name` and replace it
    /// with a reference.
    ///
    /// Saving again under a name the caller's scope already holds replaces
    /// that record. The reference keeps the subtree's `is_child` flag.
    ///
    /// Returns the new root and the saved record.
    pub async fn collapse(
        &self,
        root: Node,
        path: &[usize],
        name: &str,
        scope: &QueryScope,
    ) -> Result<(Node, NamedQuery)> {
        if !is_reference_name(name) || self.spec.has_field(name) {
            return Err(ResolveError::InvalidName {
                name: name.to_string(),
            });
        }

        let mut subtree = root
            .at_path(path)
            .cloned()
            .ok_or_else(|| ResolveError::InvalidPath {
                path: path.to_vec(),
            })?;
        let was_child = subtree.is_child();

        if subtree.references().iter().any(|r| r == name) {
            return Err(ResolveError::CyclicNamedQuery {
                name: name.to_string(),
            });
        }

        // The saved text is the subtree itself, with inner named queries kept
        // as references
        subtree.set_named(None);
        let text = serialize(&subtree, RenderMode::Collapsed);

        let mut query = NamedQuery::new(name, text, scope.entity.clone());
        query.owner = scope.owner.clone();
        let saved = self.store.save(query).await?;

        let mut root = root;
        let mut reference = NamedRef::new(name);
        reference.is_child = was_child;
        root.replace_at_path(path, Node::Reference(reference))
            .ok_or_else(|| ResolveError::InvalidPath {
                path: path.to_vec(),
            })?;

        debug!(name = %name, path = ?path, "Collapsed subtree into named query");
        Ok((root, saved))
    }

    fn resolve_boxed<'a>(
        &'a self,
        node: Node,
        scope: &'a QueryScope,
        ancestors: Vec<String>,
    ) -> BoxFuture<'a, Result<Node>> {
        async move {
            let names = node.references();
            if names.is_empty() {
                return Ok(node);
            }

            if let Some(name) = names.iter().find(|n| ancestors.contains(n)) {
                return Err(ResolveError::CyclicNamedQuery { name: name.clone() });
            }

            if ancestors.len() >= self.config.max_depth {
                return Err(ResolveError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            trace!(names = ?names, depth = ancestors.len(), "Resolving named queries");

            // Distinct names at this level are independent
            let expansions = try_join_all(
                names
                    .iter()
                    .map(|name| self.expand_name(name, scope, &ancestors)),
            )
            .await?;

            let expansions: HashMap<String, Node> = names.into_iter().zip(expansions).collect();
            Ok(substitute(node, &expansions))
        }
        .boxed()
    }

    async fn expand_name(
        &self,
        name: &str,
        scope: &QueryScope,
        ancestors: &[String],
    ) -> Result<Node> {
        let query = self
            .store
            .find(name, scope)
            .await?
            .ok_or_else(|| ResolveError::UnknownNamedQuery {
                name: name.to_string(),
            })?;

        debug!(name = %name, id = %query.id, "Expanding named query");

        let parsed = parse(&query.text, &self.spec).map_err(|source| {
            ResolveError::InvalidQueryText {
                name: name.to_string(),
                source,
            }
        })?;

        let mut chain = ancestors.to_vec();
        chain.push(name.to_string());
        self.resolve_boxed(parsed, scope, chain).await
    }
}

/// Replace references with their (already resolved) expansions
fn substitute(node: Node, expansions: &HashMap<String, Node>) -> Node {
    match node {
        Node::Reference(reference) => match expansions.get(&reference.name) {
            Some(expansion) => {
                let mut expanded = expansion.clone();
                if reference.negated {
                    expanded = expanded.negate();
                }
                expanded.mark_children();
                expanded.set_named(Some(
                    NamedRef::new(reference.name).with_negated(reference.negated),
                ));
                expanded
            }
            None => Node::Reference(reference),
        },
        Node::Ruleset(mut set) => {
            set.children = set
                .children
                .into_iter()
                .map(|child| substitute(child, expansions))
                .collect();
            Node::Ruleset(set)
        }
        rule @ Node::Rule(_) => rule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use bql_lang::{Condition, Value};
    use bql_schema::{FieldSpec, Operator, ValueType};

    fn spec() -> Arc<QueryLanguageSpec> {
        Arc::new(
            QueryLanguageSpec::new()
                .with_field(FieldSpec::new("fname", ValueType::String))
                .with_field(FieldSpec::new("lname", ValueType::String))
                .with_field(FieldSpec::new("age", ValueType::Number)),
        )
    }

    fn resolver(queries: Vec<NamedQuery>) -> Resolver {
        Resolver::new(Arc::new(InMemoryStore::with_queries(queries)), spec())
    }

    #[tokio::test]
    async fn test_single_rule_expansion_keeps_provenance() {
        let resolver = resolver(vec![NamedQuery::new("JOHNS", "fname = \"john\"", "people")]);
        let scope = QueryScope::new("people");

        let node = resolver.expand_text("JOHNS", &scope).await.unwrap();
        match &node {
            Node::Rule(rule) => {
                assert_eq!(rule.operator, Operator::Eq);
                assert!(rule.is_child);
                assert_eq!(rule.named, Some(NamedRef::new("JOHNS")));
            }
            other => panic!("Expected rule, got {:?}", other),
        }
        assert_eq!(serialize(&node, RenderMode::Collapsed), "JOHNS");
    }

    #[tokio::test]
    async fn test_negated_composite_expansion() {
        let resolver = resolver(vec![NamedQuery::new(
            "YOUNG_JOHNS",
            "fname = john & age < 30",
            "people",
        )]);
        let scope = QueryScope::new("people");

        let node = resolver.expand_text("!YOUNG_JOHNS", &scope).await.unwrap();
        match &node {
            Node::Ruleset(set) => {
                assert!(set.not);
                assert_eq!(set.condition, Condition::And);
                assert!(set.children.iter().all(Node::is_child));
            }
            other => panic!("Expected ruleset, got {:?}", other),
        }
        assert_eq!(serialize(&node, RenderMode::Collapsed), "!YOUNG_JOHNS");
        assert_eq!(
            serialize(&node, RenderMode::Expanded),
            "!(fname = \"john\" & age < 30)"
        );
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let resolver = resolver(vec![]);
        let err = resolver
            .expand_text("MISSING", &QueryScope::new("people"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownNamedQuery { name } if name == "MISSING"));
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let resolver = Resolver::with_config(
            Arc::new(InMemoryStore::with_queries(vec![
                NamedQuery::new("A", "B", "people"),
                NamedQuery::new("B", "C", "people"),
                NamedQuery::new("C", "fname = x", "people"),
            ])),
            spec(),
            ResolverConfig { max_depth: 2 },
        );
        let err = resolver
            .expand_text("A", &QueryScope::new("people"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::DepthExceeded { max_depth: 2 }));
    }

    #[tokio::test]
    async fn test_collapse_replaces_subtree() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = Resolver::new(store.clone(), spec());
        let scope = QueryScope::new("people").with_owner("alice");

        let root = parse("age > 3 & (fname = a | fname = b)", &spec()).unwrap();
        let (collapsed, saved) = resolver
            .collapse(root.clone(), &[1], "AB", &scope)
            .await
            .unwrap();

        assert_eq!(saved.text, "fname = \"a\" | fname = \"b\"");
        assert_eq!(saved.owner.as_deref(), Some("alice"));
        assert_eq!(serialize(&collapsed, RenderMode::Collapsed), "age > 3 & AB");

        // Expanding again restores the same clauses, now marked as named
        let expanded = resolver.resolve(collapsed, &scope, &[]).await.unwrap();
        let restored = expanded.at_path(&[1]).unwrap();
        assert_eq!(restored.named(), Some(&NamedRef::new("AB")));
        assert_eq!(
            serialize(&expanded, RenderMode::Expanded),
            serialize(&root, RenderMode::Expanded)
        );
    }

    #[tokio::test]
    async fn test_collapse_same_name_twice_keeps_latest() {
        let store = Arc::new(InMemoryStore::new());
        let resolver = Resolver::new(store.clone(), spec());
        let scope = QueryScope::new("people");

        let first = parse("age > 3 & (fname = a | fname = b)", &spec()).unwrap();
        let (_, saved_first) = resolver.collapse(first, &[1], "AB", &scope).await.unwrap();

        let second = parse("age > 3 & (fname = c | fname = d)", &spec()).unwrap();
        let (_, saved_second) = resolver.collapse(second, &[1], "AB", &scope).await.unwrap();

        assert_eq!(saved_first.id, saved_second.id);
        assert_eq!(store.len().await, 1);

        let expanded = resolver.expand_text("AB", &scope).await.unwrap();
        assert_eq!(
            serialize(&expanded, RenderMode::Expanded),
            "fname = \"c\" | fname = \"d\""
        );
    }

    #[tokio::test]
    async fn test_collapse_inside_expansion_keeps_child_flag() {
        let resolver = resolver(vec![NamedQuery::new(
            "PAIR",
            "fname = a & (lname = b | lname = c)",
            "people",
        )]);
        let scope = QueryScope::new("people");

        let expanded = resolver.expand_text("PAIR", &scope).await.unwrap();
        assert!(expanded.at_path(&[1]).unwrap().is_child());

        let (collapsed, _) = resolver
            .collapse(expanded, &[1], "BC", &scope)
            .await
            .unwrap();
        let reference = collapsed.at_path(&[1]).unwrap();
        assert!(reference.is_child());
        assert_eq!(reference.named().map(|r| r.name.as_str()), Some("BC"));
        assert_eq!(serialize(&collapsed, RenderMode::Collapsed), "PAIR");
        assert_eq!(
            serialize(&collapsed, RenderMode::Expanded),
            "fname = \"a\" & BC"
        );
    }

    #[tokio::test]
    async fn test_collapse_rejects_bad_input() {
        let resolver = resolver(vec![]);
        let scope = QueryScope::new("people");
        let root = Node::ruleset(
            Condition::And,
            vec![
                Node::rule("fname", Operator::Eq, Some(Value::String("a".into()))),
                Node::reference("SELF"),
            ],
        );

        let err = resolver
            .collapse(root.clone(), &[0], "lower", &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidName { .. }));

        let err = resolver
            .collapse(root.clone(), &[5], "NAME", &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidPath { .. }));

        let err = resolver
            .collapse(root, &[], "SELF", &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::CyclicNamedQuery { .. }));
    }
}
