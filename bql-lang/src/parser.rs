//! BQL Parser using Pest
//!
//! Turns BQL text into the canonical [`Node`] tree. The parser needs the
//! [`QueryLanguageSpec`] to tell fields from named-query references and to
//! expand free-text shorthand against the default field.

use crate::ast::*;
use crate::dialect;
use crate::error::{BqlError, Result};
use bql_schema::{Operator, QueryLanguageSpec};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::trace;

#[derive(Parser)]
#[grammar = "bql.pest"]
struct BqlParser;

/// Parse BQL text into an AST
pub fn parse(input: &str, spec: &QueryLanguageSpec) -> Result<Node> {
    if input.trim().is_empty() {
        return Ok(Node::empty());
    }

    prescan(input)?;

    let mut pairs = BqlParser::parse(Rule::query, input).map_err(from_pest)?;
    let query = pairs
        .next()
        .ok_or_else(|| BqlError::syntax(0, "query"))?;

    let builder = Builder { spec, input };
    let node = builder.build_query(query)?;

    trace!(input = %input, rules = node.rule_count(), "Parsed BQL");
    Ok(node)
}

/// Whether `text` has the shape of a named-query reference
pub fn is_reference_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Lexical checks pest cannot report precisely: unterminated literals and
/// unbalanced parentheses.
fn prescan(input: &str) -> Result<()> {
    let mut open_parens: Vec<usize> = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' | '\'' | '/' => {
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    if next == '\\' {
                        chars.next();
                    } else if next == c {
                        closed = true;
                        break;
                    } else if c == '/' && next == '\n' {
                        break;
                    }
                }
                if !closed {
                    let token = input[pos..].lines().next().unwrap_or_default();
                    return Err(BqlError::malformed(token));
                }
            }
            '(' => open_parens.push(pos),
            ')' => {
                if open_parens.pop().is_none() {
                    return Err(BqlError::UnmatchedParen { position: pos });
                }
            }
            _ => {}
        }
    }

    match open_parens.first() {
        Some(position) => Err(BqlError::UnmatchedParen {
            position: *position,
        }),
        None => Ok(()),
    }
}

/// Convert a pest error into a syntax error with the expected tokens
fn from_pest(err: pest::error::Error<Rule>) -> BqlError {
    let position = match err.location {
        pest::error::InputLocation::Pos(pos) => pos,
        pest::error::InputLocation::Span((start, _)) => start,
    };

    let expected = match &err.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            let mut names: Vec<&str> = positives.iter().map(describe).collect();
            names.dedup();
            names.join(" or ")
        }
        pest::error::ErrorVariant::CustomError { message } => message.clone(),
        _ => "end of input".to_string(),
    };

    BqlError::syntax(position, expected)
}

fn describe(rule: &Rule) -> &'static str {
    match rule {
        Rule::EOI => "end of input",
        Rule::or_expr | Rule::and_expr | Rule::unary | Rule::primary => "expression",
        Rule::not_op => "'!'",
        Rule::group => "'('",
        Rule::comparison => "comparison",
        Rule::identifier | Rule::name => "identifier",
        Rule::operator => "operator",
        Rule::value | Rule::scalar | Rule::bare => "value",
        Rule::regex => "regex literal",
        Rule::string | Rule::free_text => "quoted string",
        Rule::list | Rule::list_item => "list",
        Rule::number => "number",
        Rule::boolean => "boolean",
        _ => "token",
    }
}

/// Converts pest pairs into AST nodes
struct Builder<'a> {
    spec: &'a QueryLanguageSpec,
    input: &'a str,
}

impl<'a> Builder<'a> {
    fn build_query(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::free_text => {
                    let position = inner.as_span().start();
                    let literal = inner
                        .into_inner()
                        .next()
                        .ok_or_else(|| BqlError::syntax(position, "quoted string"))?;
                    return self.shorthand(unquote(literal), position);
                }
                Rule::or_expr => return self.build_or(inner),
                _ => {}
            }
        }
        Ok(Node::empty())
    }

    fn build_or(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let operands = pair
            .into_inner()
            .map(|p| self.build_and(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Node::chain(Condition::Or, operands))
    }

    fn build_and(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let operands = pair
            .into_inner()
            .map(|p| self.build_unary(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Node::chain(Condition::And, operands))
    }

    fn build_unary(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let position = pair.as_span().start();
        let mut negated = false;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::not_op => negated = !negated,
                Rule::primary => {
                    let node = self.build_primary(inner)?;
                    return Ok(if negated { node.negate() } else { node });
                }
                _ => {}
            }
        }

        Err(BqlError::syntax(position, "expression"))
    }

    fn build_primary(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let position = pair.as_span().start();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| BqlError::syntax(position, "expression"))?;

        match inner.as_rule() {
            Rule::group => match inner.into_inner().next() {
                Some(or_expr) => self.build_or(or_expr),
                None => Ok(Node::empty()),
            },
            Rule::comparison => self.build_comparison(inner),
            Rule::name => self.build_name(inner),
            _ => Err(BqlError::syntax(position, "expression")),
        }
    }

    fn build_comparison(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let end = pair.as_span().end();
        let mut inner = pair.into_inner();

        let field = inner
            .next()
            .ok_or_else(|| BqlError::syntax(end, "identifier"))?
            .as_str()
            .to_string();
        let operator_pair = inner
            .next()
            .ok_or_else(|| BqlError::syntax(end, "operator"))?;
        let operator_end = operator_pair.as_span().end();
        let operator_text = operator_pair.as_str();

        if !self.spec.has_field(&field) {
            return Err(BqlError::unknown_field(field));
        }

        let operator = Operator::from_token(operator_text)
            .ok_or_else(|| BqlError::unknown_operator(&field, operator_text))?;

        let value = match inner.next() {
            Some(value_pair) => Some(self.build_value(value_pair)?),
            None => None,
        };

        if operator.requires_value() && value.is_none() {
            return Err(BqlError::syntax(operator_end, "value"));
        }

        Ok(Node::rule(field, operator, value))
    }

    /// A lone identifier: a named-query reference or free-text shorthand
    fn build_name(&self, pair: Pair<'_, Rule>) -> Result<Node> {
        let span = pair.as_span();
        let text = span.as_str();

        if self.spec.has_field(text) {
            return Err(BqlError::syntax(span.end(), "operator"));
        }

        if is_reference_name(text) {
            return Ok(Node::reference(text));
        }

        if text == self.input.trim() {
            return self.shorthand(text.to_string(), span.start());
        }

        Err(BqlError::syntax(span.start(), "comparison, group or named query"))
    }

    /// `defaultField defaultOperator "literal"`
    fn shorthand(&self, literal: String, position: usize) -> Result<Node> {
        let field = self
            .spec
            .default_field()
            .ok_or_else(|| BqlError::syntax(position, "comparison"))?;
        let operator = self
            .spec
            .default_operator_for(field)
            .unwrap_or(Operator::Contains);

        Ok(Node::rule(
            field.name.clone(),
            operator,
            Some(Value::String(literal)),
        ))
    }

    fn build_value(&self, pair: Pair<'_, Rule>) -> Result<Value> {
        let text = pair.as_str();
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| BqlError::malformed(text))?;

        match inner.as_rule() {
            Rule::regex => self.build_regex(inner),
            Rule::list => self.build_list(inner),
            _ => self.build_scalar(inner),
        }
    }

    fn build_regex(&self, pair: Pair<'_, Rule>) -> Result<Value> {
        let text = pair.as_str();
        let mut inner = pair.into_inner();
        let pattern = inner.next().map(|p| p.as_str()).unwrap_or_default();
        let flags = inner.next().map(|p| p.as_str()).unwrap_or_default();

        let case_insensitive = match flags {
            "" => false,
            "i" => true,
            _ => return Err(BqlError::malformed(text)),
        };

        dialect::translate(pattern, case_insensitive)?;

        Ok(Value::Regex {
            pattern: pattern.to_string(),
            case_insensitive,
        })
    }

    fn build_list(&self, pair: Pair<'_, Rule>) -> Result<Value> {
        let mut items = Vec::new();

        for item in pair.into_inner() {
            let item_text = item.as_str().trim().to_string();
            let inner = item
                .into_inner()
                .next()
                .ok_or_else(|| BqlError::malformed(item_text.clone()))?;

            match inner.as_rule() {
                Rule::scalar => {
                    let scalar = inner
                        .into_inner()
                        .next()
                        .ok_or_else(|| BqlError::malformed(item_text.clone()))?;
                    items.push(self.build_scalar(scalar)?);
                }
                _ => return Err(BqlError::malformed(item_text)),
            }
        }

        Ok(Value::List(items))
    }

    fn build_scalar(&self, pair: Pair<'_, Rule>) -> Result<Value> {
        let text = pair.as_str();

        match pair.as_rule() {
            Rule::string => Ok(Value::String(unquote(pair))),
            Rule::number => text
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| BqlError::malformed(text)),
            Rule::boolean => Ok(Value::Bool(text == "true")),
            Rule::bare => Ok(Value::String(text.to_string())),
            _ => Err(BqlError::malformed(text)),
        }
    }
}

/// Content of a quoted string with escapes removed
fn unquote(pair: Pair<'_, Rule>) -> String {
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    unescape(raw)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(escaped @ ('"' | '\'' | '\\')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
