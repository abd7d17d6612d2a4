//! BQL Abstract Syntax Tree (AST) definitions
//!
//! A query is a tree of [`Node`]s: leaves are [`Rule`]s, composites are
//! [`Ruleset`]s, and unresolved named-query references are kept as
//! [`Node::Reference`] placeholders until the resolver substitutes them.

use bql_schema::Operator;
use serde::{Deserialize, Serialize};

/// Literal value on the right-hand side of a rule.
///
/// The variant is fixed by the lexical shape of the token at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<Value>),
    Regex {
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
    },
}

impl Value {
    /// Short description of the variant for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Regex { .. } => "regex",
        }
    }

    /// Get as string if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as bool if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Boolean combinator of a ruleset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    And,
    Or,
}

impl Condition {
    /// Infix token used in BQL text
    pub fn token(&self) -> char {
        match self {
            Condition::And => '&',
            Condition::Or => '|',
        }
    }
}

/// Reference to a saved named query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRef {
    pub name: String,
    #[serde(default)]
    pub negated: bool,
    /// Set on a reference standing inside a named query expansion
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_child: bool,
}

impl NamedRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            negated: false,
            is_child: false,
        }
    }

    pub fn with_negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }
}

/// Leaf node: `field operator value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Set when this rule is the whole expansion of a named query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named: Option<NamedRef>,
    /// Set when this rule came from inside a named query expansion
    #[serde(default)]
    pub is_child: bool,
}

impl Rule {
    /// Create an inline rule
    pub fn new(field: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            named: None,
            is_child: false,
        }
    }
}

/// Composite node: children joined by a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ruleset {
    pub condition: Condition,
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub children: Vec<Node>,
    /// Set when this subtree is a named query expansion or definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named: Option<NamedRef>,
    /// Set when this subtree came from inside a named query expansion
    #[serde(default)]
    pub is_child: bool,
}

impl Ruleset {
    /// Create an inline, non-negated ruleset
    pub fn new(condition: Condition, children: Vec<Node>) -> Self {
        Self {
            condition,
            not: false,
            children,
            named: None,
            is_child: false,
        }
    }

    /// Whether the parser may splice this ruleset into a parent of `condition`
    fn is_spliceable_into(&self, condition: Condition) -> bool {
        self.condition == condition && !self.not && self.named.is_none()
    }
}

/// AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Rule(Rule),
    Ruleset(Ruleset),
    Reference(NamedRef),
}

impl Node {
    /// Empty `and` ruleset (matches everything)
    pub fn empty() -> Self {
        Node::Ruleset(Ruleset::new(Condition::And, Vec::new()))
    }

    /// Leaf constructor
    pub fn rule(field: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        Node::Rule(Rule::new(field, operator, value))
    }

    /// Composite constructor
    pub fn ruleset(condition: Condition, children: Vec<Node>) -> Self {
        Node::Ruleset(Ruleset::new(condition, children))
    }

    /// Reference constructor
    pub fn reference(name: impl Into<String>) -> Self {
        Node::Reference(NamedRef::new(name))
    }

    /// Logical negation in canonical form.
    ///
    /// Rules flip onto the complementary operator; range rules have none and
    /// are wrapped in a `not` ruleset, and negating that wrapper again yields
    /// the rule. Other rulesets toggle `not` and references toggle `negated`.
    pub fn negate(self) -> Node {
        match self {
            Node::Rule(mut rule) => match rule.operator.negated() {
                Some(flipped) => {
                    rule.operator = flipped;
                    Node::Rule(rule)
                }
                None => {
                    let mut wrapper = Ruleset::new(Condition::And, vec![Node::Rule(rule)]);
                    wrapper.not = true;
                    Node::Ruleset(wrapper)
                }
            },
            Node::Ruleset(mut set) => {
                // Undo a range wrapper rather than leave a bare one-child group
                if set.not && set.named.is_none() && set.children.len() == 1 {
                    if let Some(only) = set.children.pop() {
                        return only;
                    }
                }
                set.not = !set.not;
                Node::Ruleset(set)
            }
            Node::Reference(mut r) => {
                r.negated = !r.negated;
                Node::Reference(r)
            }
        }
    }

    /// Named-query provenance of this node, if any
    pub fn named(&self) -> Option<&NamedRef> {
        match self {
            Node::Rule(rule) => rule.named.as_ref(),
            Node::Ruleset(set) => set.named.as_ref(),
            Node::Reference(r) => Some(r),
        }
    }

    /// Attach named-query provenance to the root of this node
    pub fn set_named(&mut self, named: Option<NamedRef>) {
        match self {
            Node::Rule(rule) => rule.named = named,
            Node::Ruleset(set) => set.named = named,
            Node::Reference(_) => {}
        }
    }

    /// Whether this node came from inside a named query expansion
    pub fn is_child(&self) -> bool {
        match self {
            Node::Rule(rule) => rule.is_child,
            Node::Ruleset(set) => set.is_child,
            Node::Reference(r) => r.is_child,
        }
    }

    /// Mark this node and all of its descendants as named-query children
    pub fn mark_children(&mut self) {
        match self {
            Node::Rule(rule) => rule.is_child = true,
            Node::Ruleset(set) => {
                set.is_child = true;
                for child in &mut set.children {
                    child.mark_children();
                }
            }
            Node::Reference(r) => r.is_child = true,
        }
    }

    /// Distinct reference names in document order
    pub fn references(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.walk(&mut |node| {
            if let Node::Reference(r) = node {
                if !names.contains(&r.name) {
                    names.push(r.name.clone());
                }
            }
        });
        names
    }

    /// Whether any unresolved reference remains
    pub fn has_references(&self) -> bool {
        match self {
            Node::Reference(_) => true,
            Node::Rule(_) => false,
            Node::Ruleset(set) => set.children.iter().any(Node::has_references),
        }
    }

    /// Visit this node and its descendants in pre-order
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Node)) {
        f(self);
        if let Node::Ruleset(set) = self {
            for child in &set.children {
                child.walk(f);
            }
        }
    }

    /// Node at a child-index path (empty path is the node itself)
    pub fn at_path(&self, path: &[usize]) -> Option<&Node> {
        match path.split_first() {
            None => Some(self),
            Some((index, rest)) => match self {
                Node::Ruleset(set) => set.children.get(*index)?.at_path(rest),
                _ => None,
            },
        }
    }

    /// Mutable node at a child-index path
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        match path.split_first() {
            None => Some(self),
            Some((index, rest)) => match self {
                Node::Ruleset(set) => set.children.get_mut(*index)?.at_path_mut(rest),
                _ => None,
            },
        }
    }

    /// Replace the node at `path`, returning the node that was there
    pub fn replace_at_path(&mut self, path: &[usize], replacement: Node) -> Option<Node> {
        let slot = self.at_path_mut(path)?;
        Some(std::mem::replace(slot, replacement))
    }

    /// Number of rules in the tree
    pub fn rule_count(&self) -> usize {
        match self {
            Node::Rule(_) => 1,
            Node::Reference(_) => 0,
            Node::Ruleset(set) => set.children.iter().map(Node::rule_count).sum(),
        }
    }

    /// Build a chain of `condition`, splicing same-condition operands.
    ///
    /// A single operand is returned as is.
    pub(crate) fn chain(condition: Condition, operands: Vec<Node>) -> Node {
        if operands.len() == 1 {
            if let Some(only) = operands.into_iter().next() {
                return only;
            }
            return Node::empty();
        }

        let mut children = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Node::Ruleset(set) if set.is_spliceable_into(condition) && !set.children.is_empty() => {
                    children.extend(set.children);
                }
                other => children.push(other),
            }
        }

        Node::ruleset(condition, children)
    }
}
