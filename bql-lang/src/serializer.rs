//! AST to BQL text
//!
//! Inverse of the parser: `parse(serialize(ast))` yields an equal tree for
//! every tree the parser produces.

use crate::ast::*;
use std::fmt;

/// How subtrees that came from named queries are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Named subtrees render as their name
    Collapsed,
    /// Named subtrees render as their full expansion
    #[default]
    Expanded,
}

/// Serialize a node to BQL text
pub fn serialize(node: &Node, mode: RenderMode) -> String {
    let mut out = String::new();
    Writer { mode }.node(node, None, &mut out);
    out
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize(self, RenderMode::Expanded))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_value(self, &mut out);
        f.write_str(&out)
    }
}

struct Writer {
    mode: RenderMode,
}

impl Writer {
    /// `parent` is the condition of the enclosing ruleset, `None` at the root
    fn node(&self, node: &Node, parent: Option<Condition>, out: &mut String) {
        if self.mode == RenderMode::Collapsed {
            if let Some(named) = node.named() {
                write_reference(named, out);
                return;
            }
        }

        match node {
            Node::Rule(rule) => self.rule(rule, out),
            Node::Reference(named) => write_reference(named, out),
            Node::Ruleset(set) => self.ruleset(set, parent, out),
        }
    }

    fn rule(&self, rule: &Rule, out: &mut String) {
        out.push_str(&rule.field);
        out.push(' ');
        out.push_str(rule.operator.as_str());
        if let Some(value) = &rule.value {
            out.push(' ');
            write_value(value, out);
        }
    }

    fn ruleset(&self, set: &Ruleset, parent: Option<Condition>, out: &mut String) {
        if set.children.is_empty() {
            match (parent, set.not) {
                (None, false) => {}
                (_, true) => out.push_str("!()"),
                (Some(_), false) => out.push_str("()"),
            }
            return;
        }

        let wrap = set.not || parent.is_some_and(|p| p != set.condition);
        if set.not {
            out.push('!');
        }
        if wrap {
            out.push('(');
        }

        let separator = match set.condition {
            Condition::And => " & ",
            Condition::Or => " | ",
        };
        for (i, child) in set.children.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            self.node(child, Some(set.condition), out);
        }

        if wrap {
            out.push(')');
        }
    }
}

fn write_reference(named: &NamedRef, out: &mut String) {
    if named.negated {
        out.push('!');
    }
    out.push_str(&named.name);
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Regex {
            pattern,
            case_insensitive,
        } => {
            out.push('/');
            out.push_str(pattern);
            out.push('/');
            if *case_insensitive {
                out.push('i');
            }
        }
    }
}

/// Integral numbers render without a fractional part
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
