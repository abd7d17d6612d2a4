//! Named-query resolution scenarios

use bql_lang::{parse, serialize, Condition, NamedRef, Node, RenderMode, Value};
use bql_named::{
    InMemoryStore, NamedQuery, NamedQueryStore, QueryScope, ResolveError, Resolver, StoreError,
};
use bql_schema::{FieldSpec, Operator, QueryLanguageSpec, ValueType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn people_spec() -> Arc<QueryLanguageSpec> {
    Arc::new(
        QueryLanguageSpec::new()
            .with_field(FieldSpec::new("fname", ValueType::String))
            .with_field(FieldSpec::new("lname", ValueType::String))
            .with_field(FieldSpec::new("age", ValueType::Number)),
    )
}

fn scope() -> QueryScope {
    QueryScope::new("people")
}

/// Store that counts lookups, tracks overlap and can be switched off
struct CountingStore {
    inner: InMemoryStore,
    finds: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: bool,
}

impl CountingStore {
    fn new(queries: Vec<NamedQuery>) -> Self {
        Self {
            inner: InMemoryStore::with_queries(queries),
            finds: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }
}

#[async_trait::async_trait]
impl NamedQueryStore for CountingStore {
    async fn find(&self, name: &str, scope: &QueryScope) -> Result<Option<NamedQuery>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.inner.find(name, scope).await
    }

    async fn save(&self, query: NamedQuery) -> Result<NamedQuery, StoreError> {
        self.inner.save(query).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

#[tokio::test]
async fn test_negation_distributes_onto_single_rule() -> anyhow::Result<()> {
    let resolver = Resolver::new(
        Arc::new(InMemoryStore::with_queries(vec![
            NamedQuery::new("JOHNS", "fname = \"john\"", "people"),
            NamedQuery::new("JOHNSONS", "lname = \"johnson\"", "people"),
        ])),
        people_spec(),
    );

    let resolved = resolver.expand_text("!(JOHNS) & JOHNSONS", &scope()).await?;

    let Node::Ruleset(set) = &resolved else {
        panic!("Expected ruleset, got {:?}", resolved);
    };
    assert_eq!(set.condition, Condition::And);
    assert!(!set.not);

    let Node::Rule(first) = &set.children[0] else {
        panic!("Expected rule, got {:?}", set.children[0]);
    };
    assert_eq!(first.field, "fname");
    assert_eq!(first.operator, Operator::NotEq);
    assert_eq!(first.value, Some(Value::String("john".into())));
    assert_eq!(
        first.named,
        Some(NamedRef::new("JOHNS").with_negated(true))
    );

    let Node::Rule(second) = &set.children[1] else {
        panic!("Expected rule, got {:?}", set.children[1]);
    };
    assert_eq!(second.operator, Operator::Eq);
    assert_eq!(second.value, Some(Value::String("johnson".into())));

    assert_eq!(serialize(&resolved, RenderMode::Collapsed), "!JOHNS & JOHNSONS");
    assert_eq!(
        serialize(&resolved, RenderMode::Expanded),
        "fname != \"john\" & lname = \"johnson\""
    );
    Ok(())
}

#[tokio::test]
async fn test_direct_self_reference_is_cyclic() {
    let resolver = Resolver::new(
        Arc::new(InMemoryStore::with_queries(vec![NamedQuery::new(
            "LOOP",
            "fname = a | LOOP",
            "people",
        )])),
        people_spec(),
    );

    let err = resolver.expand_text("LOOP", &scope()).await.unwrap_err();
    assert!(matches!(err, ResolveError::CyclicNamedQuery { name } if name == "LOOP"));
}

#[tokio::test]
async fn test_transitive_reference_is_cyclic() {
    let resolver = Resolver::new(
        Arc::new(InMemoryStore::with_queries(vec![
            NamedQuery::new("PING", "fname = a & PONG", "people"),
            NamedQuery::new("PONG", "!PING", "people"),
        ])),
        people_spec(),
    );

    let err = resolver.expand_text("age > 1 | PING", &scope()).await.unwrap_err();
    assert!(matches!(err, ResolveError::CyclicNamedQuery { name } if name == "PING"));
}

#[tokio::test]
async fn test_caller_ancestors_count_as_cycles() {
    let resolver = Resolver::new(
        Arc::new(InMemoryStore::with_queries(vec![NamedQuery::new(
            "INNER",
            "OUTER",
            "people",
        )])),
        people_spec(),
    );

    let node = parse("INNER", &people_spec()).unwrap();
    let err = resolver
        .resolve(node, &scope(), &["OUTER".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::CyclicNamedQuery { name } if name == "OUTER"));
}

#[tokio::test]
async fn test_distinct_names_fetched_concurrently_once() {
    let store = Arc::new(CountingStore::new(vec![
        NamedQuery::new("A", "fname = a", "people"),
        NamedQuery::new("B", "fname = b", "people"),
        NamedQuery::new("C", "fname = c", "people"),
    ]));
    let resolver = Resolver::new(store.clone(), people_spec());

    let resolved = resolver
        .expand_text("A & (B | !A) & C & !(B & C)", &scope())
        .await
        .unwrap();

    assert!(!resolved.has_references());
    assert_eq!(store.finds.load(Ordering::SeqCst), 3);
    assert!(store.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_store_failure_is_lookup_failure() {
    let resolver = Resolver::new(Arc::new(CountingStore::failing()), people_spec());

    let err = resolver.expand_text("ANY", &scope()).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::LookupFailure(StoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_broken_named_text() {
    let resolver = Resolver::new(
        Arc::new(InMemoryStore::with_queries(vec![NamedQuery::new(
            "BROKEN",
            "fname = (",
            "people",
        )])),
        people_spec(),
    );

    let err = resolver.expand_text("BROKEN", &scope()).await.unwrap_err();
    assert!(matches!(err, ResolveError::InvalidQueryText { name, .. } if name == "BROKEN"));
}
