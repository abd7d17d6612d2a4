//! Regex dialect translator
//!
//! Translates a user-facing regex literal (JavaScript flavoured) into the
//! Lucene regex dialect used by `regexp` queries. Lucene patterns always
//! match the whole term, have no `\s`/`\d`/`\w` shorthands and no
//! case-insensitive flag, so the translator:
//!
//! - expands shorthands (`\d` -> `[0-9]`, or `0-9` inside a bracket expression)
//! - expands letters to `[aA]` and letter ranges to `a-zA-Z` when the `i`
//!   flag is set
//! - turns edge anchors into wildcards: no leading `^` gets `.*`, no trailing
//!   `$` gets `.*`, per top-level alternative
//! - escapes characters that are operators in Lucene but literals in the
//!   source dialect
//!
//! Constructs Lucene cannot express are rejected with
//! [`BqlError::RegexTranslation`].

use crate::error::{BqlError, Result};
use tracing::trace;

/// Whitespace characters matched by `\s`
const SPACE_CHARS: &str = " \n\t\r";
/// Characters matched by `\d`
const DIGIT_CHARS: &str = "0-9";
/// Characters matched by `\w`
const WORD_CHARS: &str = "A-Za-z_";
/// Literals in the source dialect that are operators in Lucene
const LUCENE_RESERVED: &[char] = &['"', '#', '@', '&', '<', '>', '~'];

/// Translate `pattern` to the target dialect, including edge anchoring
pub fn translate(pattern: &str, case_insensitive: bool) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();

    let alternatives = split_alternatives(&chars);
    let mut translated = Vec::with_capacity(alternatives.len());
    for alternative in alternatives {
        translated.push(translate_alternative(pattern, alternative, case_insensitive)?);
    }

    check_syntax(pattern)?;

    let result = translated.join("|");
    trace!(pattern = %pattern, case_insensitive, translated = %result, "Translated regex");
    Ok(result)
}

/// Check that a pattern is translatable without keeping the result
pub fn check(pattern: &str) -> Result<()> {
    translate(pattern, false).map(|_| ())
}

/// Split at `|` outside groups and bracket expressions
fn split_alternatives(chars: &[char]) -> Vec<&[char]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_brackets = false;
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => in_brackets = false,
            '(' if !in_brackets => depth += 1,
            ')' if !in_brackets => depth = depth.saturating_sub(1),
            '|' if !in_brackets && depth == 0 => {
                parts.push(&chars[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&chars[start.min(chars.len())..]);
    parts
}

/// Whether the final character is an unescaped `$`
fn ends_with_anchor(chars: &[char]) -> bool {
    if chars.last() != Some(&'$') {
        return false;
    }
    let backslashes = chars[..chars.len() - 1]
        .iter()
        .rev()
        .take_while(|c| **c == '\\')
        .count();
    backslashes % 2 == 0
}

fn translate_alternative(pattern: &str, chars: &[char], case_insensitive: bool) -> Result<String> {
    let anchored_start = chars.first() == Some(&'^');
    let anchored_end = ends_with_anchor(chars);

    let begin = usize::from(anchored_start);
    let end = if anchored_end { chars.len() - 1 } else { chars.len() };
    let body = if begin <= end { &chars[begin..end] } else { &[][..] };

    let mut translator = Translator::new(pattern, body, case_insensitive);
    let translated = translator.run()?;

    if translated.is_empty() && !anchored_start && !anchored_end {
        return Ok(".*".to_string());
    }

    let mut out = String::with_capacity(translated.len() + 4);
    if !anchored_start {
        out.push_str(".*");
    }
    out.push_str(&translated);
    if !anchored_end {
        out.push_str(".*");
    }
    Ok(out)
}

/// Syntax check of the source pattern with `\/` unescaped
fn check_syntax(pattern: &str) -> Result<()> {
    let mut source = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('/') => source.push('/'),
                Some(next) => {
                    source.push('\\');
                    source.push(next);
                }
                None => source.push('\\'),
            }
        } else {
            source.push(c);
        }
    }

    regex::Regex::new(&source)
        .map(|_| ())
        .map_err(|e| BqlError::regex(pattern, first_line(&e.to_string())))
}

fn first_line(message: &str) -> String {
    message
        .lines()
        .rev()
        .find(|line| line.starts_with("error:"))
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| message.trim().to_string())
}

/// Swap the case of an ASCII letter
fn other_case(c: char) -> char {
    if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c.to_ascii_lowercase()
    }
}

/// One-token-lookahead state machine over a single alternative
struct Translator<'a> {
    pattern: &'a str,
    chars: &'a [char],
    pos: usize,
    case_insensitive: bool,
    out: String,
}

impl<'a> Translator<'a> {
    fn new(pattern: &'a str, chars: &'a [char], case_insensitive: bool) -> Self {
        Self {
            pattern,
            chars,
            pos: 0,
            case_insensitive,
            out: String::with_capacity(chars.len() * 2),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> BqlError {
        BqlError::regex(self.pattern, message)
    }

    fn run(&mut self) -> Result<String> {
        while let Some(c) = self.bump() {
            match c {
                '\\' => self.escape()?,
                '[' => self.bracket()?,
                '(' => self.group_open()?,
                '*' | '+' | '?' => {
                    self.out.push(c);
                    self.reject_lazy()?;
                }
                '{' => self.counted_repetition()?,
                '^' | '$' => {
                    return Err(self.error("anchors are only supported at the start or end of a pattern"));
                }
                c if c.is_ascii_alphabetic() => self.letter(c),
                c if LUCENE_RESERVED.contains(&c) => {
                    self.out.push('\\');
                    self.out.push(c);
                }
                c => self.out.push(c),
            }
        }
        Ok(std::mem::take(&mut self.out))
    }

    /// Escape sequence outside a bracket expression
    fn escape(&mut self) -> Result<()> {
        let Some(c) = self.bump() else {
            return Err(self.error("pattern ends with a backslash"));
        };

        match c {
            's' => self.push_class(false, SPACE_CHARS),
            'd' => self.push_class(false, DIGIT_CHARS),
            'w' => self.push_class(false, WORD_CHARS),
            'S' => self.push_class(true, SPACE_CHARS),
            'D' => self.push_class(true, DIGIT_CHARS),
            'W' => self.push_class(true, WORD_CHARS),
            'n' => self.out.push('\n'),
            't' => self.out.push('\t'),
            'r' => self.out.push('\r'),
            '/' => self.out.push('/'),
            'b' | 'B' => return Err(self.error("word boundaries are not supported")),
            '1'..='9' => return Err(self.error("back-references are not supported")),
            c if c.is_ascii_alphanumeric() => {
                return Err(self.error(format!("unsupported escape \\{}", c)));
            }
            c => {
                self.out.push('\\');
                self.out.push(c);
            }
        }
        Ok(())
    }

    fn push_class(&mut self, negated: bool, chars: &str) {
        self.out.push('[');
        if negated {
            self.out.push('^');
        }
        self.out.push_str(chars);
        self.out.push(']');
    }

    fn letter(&mut self, c: char) {
        if self.case_insensitive {
            self.out.push('[');
            self.out.push(c);
            self.out.push(other_case(c));
            self.out.push(']');
        } else {
            self.out.push(c);
        }
    }

    /// Bracket expression; shorthands expand to their characters only
    fn bracket(&mut self) -> Result<()> {
        self.out.push('[');
        if self.peek() == Some('^') {
            self.bump();
            self.out.push('^');
        }

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated bracket expression"));
            };

            match c {
                ']' => {
                    self.out.push(']');
                    return Ok(());
                }
                '\\' => self.bracket_escape()?,
                c if c.is_ascii_alphabetic() => self.bracket_letter(c),
                c => self.out.push(c),
            }
        }
    }

    fn bracket_escape(&mut self) -> Result<()> {
        let Some(c) = self.bump() else {
            return Err(self.error("pattern ends with a backslash"));
        };

        match c {
            's' => self.out.push_str(SPACE_CHARS),
            'd' => self.out.push_str(DIGIT_CHARS),
            'w' => self.out.push_str(WORD_CHARS),
            'S' | 'D' | 'W' => {
                return Err(self.error(format!(
                    "negated shorthand \\{} is not supported inside brackets",
                    c
                )));
            }
            'n' => self.out.push('\n'),
            't' => self.out.push('\t'),
            'r' => self.out.push('\r'),
            '/' => self.out.push('/'),
            c if c.is_ascii_alphanumeric() => {
                return Err(self.error(format!("unsupported escape \\{} inside brackets", c)));
            }
            c => {
                self.out.push('\\');
                self.out.push(c);
            }
        }
        Ok(())
    }

    /// Letter inside brackets, possibly the start of a range
    fn bracket_letter(&mut self, start: char) {
        let range_end = match (self.peek(), self.peek_at(1)) {
            (Some('-'), Some(end)) if end.is_ascii_alphabetic() => Some(end),
            _ => None,
        };

        match range_end {
            Some(end) => {
                self.pos += 2;
                self.out.push(start);
                self.out.push('-');
                self.out.push(end);
                let same_case = start.is_ascii_lowercase() == end.is_ascii_lowercase();
                if self.case_insensitive && same_case {
                    self.out.push(other_case(start));
                    self.out.push('-');
                    self.out.push(other_case(end));
                }
            }
            None => {
                self.out.push(start);
                if self.case_insensitive {
                    self.out.push(other_case(start));
                }
            }
        }
    }

    fn group_open(&mut self) -> Result<()> {
        if self.peek() != Some('?') {
            self.out.push('(');
            return Ok(());
        }

        match self.peek_at(1) {
            Some(':') => {
                self.pos += 2;
                self.out.push('(');
                Ok(())
            }
            Some('<') if !matches!(self.peek_at(2), Some('=') | Some('!')) => {
                // Named group: keep the group, drop the name
                while let Some(c) = self.bump() {
                    if c == '>' {
                        self.out.push('(');
                        return Ok(());
                    }
                }
                Err(self.error("unterminated group name"))
            }
            Some('=') | Some('!') | Some('<') => Err(self.error("look-around is not supported")),
            _ => Err(self.error("inline flags are not supported")),
        }
    }

    fn counted_repetition(&mut self) -> Result<()> {
        self.out.push('{');
        loop {
            match self.bump() {
                Some('}') => {
                    self.out.push('}');
                    return self.reject_lazy();
                }
                Some(c) if c.is_ascii_digit() || c == ',' => self.out.push(c),
                _ => return Err(self.error("malformed counted repetition")),
            }
        }
    }

    fn reject_lazy(&mut self) -> Result<()> {
        if self.peek() == Some('?') {
            return Err(self.error("lazy quantifiers are not supported"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tr(pattern: &str) -> String {
        translate(pattern, false).unwrap()
    }

    fn tri(pattern: &str) -> String {
        translate(pattern, true).unwrap()
    }

    #[test]
    fn test_wildcard_anchoring() {
        assert_eq!(tr("ani"), ".*ani.*");
        assert_eq!(tr("^ani"), "ani.*");
        assert_eq!(tr("ani$"), ".*ani");
        assert_eq!(tr("^ani$"), "ani");
        assert_eq!(tr(""), ".*");
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        assert_eq!(tr("cost\\$"), ".*cost\\$.*");
    }

    #[test]
    fn test_shorthand_outside_brackets() {
        assert_eq!(tr("^\\s$"), "[ \n\t\r]");
        assert_eq!(tr("^\\d+$"), "[0-9]+");
        assert_eq!(tr("^\\w$"), "[A-Za-z_]");
        assert_eq!(tr("^\\D$"), "[^0-9]");
    }

    #[test]
    fn test_shorthand_inside_brackets() {
        assert_eq!(tr("^[\\d\\s]$"), "[0-9 \n\t\r]");
        assert_eq!(tr("^[^\\w.]$"), "[^A-Za-z_.]");
    }

    #[test]
    fn test_case_insensitive_letters() {
        assert_eq!(tri("^ab1$"), "[aA][bB]1");
        assert_eq!(tri("^[xy]$"), "[xXyY]");
    }

    #[test]
    fn test_case_insensitive_ranges() {
        assert_eq!(tri("^[a-z]$"), "[a-zA-Z]");
        assert_eq!(tri("^[A-F0-9]$"), "[A-Fa-f0-9]");
        assert_eq!(tr("^[a-z]$"), "[a-z]");
        // Mixed-case range is left untouched
        assert_eq!(tri("^[A-z]$"), "[A-z]");
    }

    #[test]
    fn test_top_level_alternation_anchors_each_branch() {
        assert_eq!(tr("cat|^dog"), ".*cat.*|dog.*");
        assert_eq!(tr("(cat|dog)"), ".*(cat|dog).*");
    }

    #[test]
    fn test_lucene_reserved_are_escaped() {
        assert_eq!(tr("^a@b#c$"), "a\\@b\\#c");
        assert_eq!(tr("^\\/x$"), "/x");
    }

    #[test]
    fn test_non_capturing_and_named_groups() {
        assert_eq!(tr("^(?:ab)+$"), "(ab)+");
        assert_eq!(tr("^(?<year>\\d{4})$"), "([0-9]{4})");
    }

    #[test]
    fn test_untranslatable_constructs() {
        for pattern in ["a(?=b)", "(a)\\1", "\\bword", "a+?", "a^b", "[\\S]", "\\q", "(?i)a"] {
            let result = translate(pattern, false);
            assert!(
                matches!(result, Err(BqlError::RegexTranslation { .. })),
                "{} should be rejected, got {:?}",
                pattern,
                result
            );
        }
    }

    #[test]
    fn test_invalid_syntax() {
        assert!(matches!(translate("(abc", false), Err(BqlError::RegexTranslation { .. })));
        assert!(matches!(translate("[abc", false), Err(BqlError::RegexTranslation { .. })));
    }
}
