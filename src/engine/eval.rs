//! Parser and evaluator for rendered filter strings.
//!
//! `MemDb` receives the same rendered `WhereReq.cond` entries a relational
//! engine would and evaluates them against stored rows. The grammar is the
//! one the builder emits: backtick-quoted (optionally table-prefixed)
//! identifiers, single-quoted literals with backslash escapes, the
//! comparison set `= <> != < <= > >= IN NOT IN`, parenthesized groups
//! joined by `AND`/`OR`, and numeric constant clauses such as `1 = 0`.
//! Anything else is a backend error, never a silent match-all.

use crate::error::DbError;
use crate::proxy::Row;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cmp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}

/// Parsed predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterExpr {
    True,
    False,
    Clause {
        field: String,
        cmp: Cmp,
        values: Vec<String>,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Cmp(Cmp),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    In,
    Not,
}

fn unsupported(input: &str, what: &str) -> DbError {
    DbError::Backend(format!("unsupported filter fragment ({what}): {input}"))
}

fn tokenize(input: &str) -> Result<Vec<Token>, DbError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '`' => {
                chars.next();
                let mut ident = String::new();
                for q in chars.by_ref() {
                    if q == '`' {
                        break;
                    }
                    ident.push(q);
                }
                // A `prefix`.`field` pair collapses to the field; rows are
                // not table-qualified in memory.
                if chars.peek() == Some(&'.') {
                    chars.next();
                    if chars.next() != Some('`') {
                        return Err(unsupported(input, "qualified identifier"));
                    }
                    let mut field = String::new();
                    for q in chars.by_ref() {
                        if q == '`' {
                            break;
                        }
                        field.push(q);
                    }
                    ident = field;
                }
                tokens.push(Token::Ident(ident));
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('0') => text.push('\0'),
                            Some('n') => text.push('\n'),
                            Some('r') => text.push('\r'),
                            Some('Z') => text.push('\u{1a}'),
                            Some(other) => text.push(other),
                            None => return Err(unsupported(input, "unterminated escape")),
                        },
                        Some('\'') => break,
                        Some(other) => text.push(other),
                        None => return Err(unsupported(input, "unterminated string")),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Cmp(Cmp::Eq));
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::Cmp(Cmp::Lte));
                    }
                    Some('>') => {
                        chars.next();
                        tokens.push(Token::Cmp(Cmp::Ne));
                    }
                    _ => tokens.push(Token::Cmp(Cmp::Lt)),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Cmp(Cmp::Gte));
                } else {
                    tokens.push(Token::Cmp(Cmp::Gt));
                }
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(unsupported(input, "operator"));
                }
                tokens.push(Token::Cmp(Cmp::Ne));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut num = String::from(c);
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "IN" => tokens.push(Token::In),
                    "NOT" => tokens.push(Token::Not),
                    "NULL" => tokens.push(Token::Str(String::new())),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ => return Err(unsupported(input, "character")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), DbError> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            _ => Err(unsupported(self.input, what)),
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, DbError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, DbError> {
        let mut terms = vec![self.parse_primary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            terms.push(self.parse_primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::And(terms)
        })
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, DbError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "closing parenthesis")?;
                Ok(expr)
            }
            _ => self.parse_clause(),
        }
    }

    fn parse_literal(&mut self) -> Result<String, DbError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(Token::Num(n)) => Ok(n),
            _ => Err(unsupported(self.input, "literal")),
        }
    }

    fn parse_clause(&mut self) -> Result<FilterExpr, DbError> {
        match self.next() {
            Some(Token::Ident(field)) => match self.next() {
                Some(Token::Cmp(cmp)) => {
                    let value = self.parse_literal()?;
                    Ok(FilterExpr::Clause {
                        field,
                        cmp,
                        values: vec![value],
                    })
                }
                Some(Token::In) => {
                    let values = self.parse_list()?;
                    Ok(FilterExpr::Clause {
                        field,
                        cmp: Cmp::In,
                        values,
                    })
                }
                Some(Token::Not) => {
                    self.expect(&Token::In, "IN after NOT")?;
                    let values = self.parse_list()?;
                    Ok(FilterExpr::Clause {
                        field,
                        cmp: Cmp::NotIn,
                        values,
                    })
                }
                _ => Err(unsupported(self.input, "comparison")),
            },
            // Constant clause, e.g. the rendered always-false `1 = 0`.
            Some(Token::Num(left)) => match self.next() {
                Some(Token::Cmp(cmp)) => {
                    let right = self.parse_literal()?;
                    let holds = eval_cmp(cmp, &left, &[right]);
                    Ok(if holds {
                        FilterExpr::True
                    } else {
                        FilterExpr::False
                    })
                }
                _ => Err(unsupported(self.input, "constant comparison")),
            },
            _ => Err(unsupported(self.input, "clause")),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<String>, DbError> {
        self.expect(&Token::LParen, "IN list")?;
        let mut values = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => break,
                _ => return Err(unsupported(self.input, "IN list")),
            }
        }
        Ok(values)
    }
}

/// Parse one rendered filter string.
pub(crate) fn parse(input: &str) -> Result<FilterExpr, DbError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(FilterExpr::True);
    }
    let mut parser = Parser {
        input,
        tokens: tokenize(trimmed)?,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(unsupported(input, "trailing tokens"));
    }
    Ok(expr)
}

/// Canonical text of a stored JSON value, aligned with how the builder
/// renders bound literals (booleans as `1`/`0`, null as empty).
pub(crate) fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(true) => "1".to_string(),
        serde_json::Value::Bool(false) => "0".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric comparison when both sides parse as numbers, else lexical.
pub(crate) fn compare_text(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn eval_cmp(cmp: Cmp, left: &str, values: &[String]) -> bool {
    match cmp {
        Cmp::Eq => values
            .first()
            .is_some_and(|v| compare_text(left, v) == Ordering::Equal),
        Cmp::Ne => values
            .first()
            .is_some_and(|v| compare_text(left, v) != Ordering::Equal),
        Cmp::Lt => values
            .first()
            .is_some_and(|v| compare_text(left, v) == Ordering::Less),
        Cmp::Lte => values
            .first()
            .is_some_and(|v| compare_text(left, v) != Ordering::Greater),
        Cmp::Gt => values
            .first()
            .is_some_and(|v| compare_text(left, v) == Ordering::Greater),
        Cmp::Gte => values
            .first()
            .is_some_and(|v| compare_text(left, v) != Ordering::Less),
        Cmp::In => values.iter().any(|v| compare_text(left, v) == Ordering::Equal),
        Cmp::NotIn => values.iter().all(|v| compare_text(left, v) != Ordering::Equal),
    }
}

/// Evaluate a parsed expression against one row.
pub(crate) fn matches(expr: &FilterExpr, row: &Row) -> bool {
    match expr {
        FilterExpr::True => true,
        FilterExpr::False => false,
        FilterExpr::Clause { field, cmp, values } => {
            let left = row.get(field).map(json_text).unwrap_or_default();
            eval_cmp(*cmp, &left, values)
        }
        FilterExpr::And(terms) => terms.iter().all(|t| matches(t, row)),
        FilterExpr::Or(terms) => terms.iter().any(|t| matches(t, row)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.insert((*k).to_string(), v.clone());
        }
        row
    }

    #[test]
    fn test_parse_equality_clause() {
        let expr = parse("`id` = '1'").unwrap();
        assert!(matches(&expr, &row(&[("id", json!(1))])));
        assert!(!matches(&expr, &row(&[("id", json!(2))])));
    }

    #[test]
    fn test_parse_or_joined_clauses() {
        let expr = parse("`id` = '1' OR `name` = 'aaa'").unwrap();
        assert!(matches(&expr, &row(&[("id", json!(9)), ("name", json!("aaa"))])));
        assert!(!matches(&expr, &row(&[("id", json!(9)), ("name", json!("bbb"))])));
    }

    #[test]
    fn test_parse_grouped_precedence() {
        let expr = parse("(`a` = '1' AND `b` = '2') OR (`c` = '3' AND `d` = '4')").unwrap();
        assert!(matches(
            &expr,
            &row(&[("c", json!(3)), ("d", json!(4))])
        ));
        assert!(!matches(
            &expr,
            &row(&[("a", json!(1)), ("d", json!(4))])
        ));
    }

    #[test]
    fn test_parse_always_false_constant() {
        assert_eq!(parse("1 = 0").unwrap(), FilterExpr::False);
        assert_eq!(parse("").unwrap(), FilterExpr::True);
    }

    #[test]
    fn test_parse_in_and_not_in() {
        let expr = parse("`status` IN ('1', '2')").unwrap();
        assert!(matches(&expr, &row(&[("status", json!(2))])));
        assert!(!matches(&expr, &row(&[("status", json!(3))])));

        let expr = parse("`status` NOT IN ('x', 'y')").unwrap();
        assert!(matches(&expr, &row(&[("status", json!("z"))])));
        assert!(!matches(&expr, &row(&[("status", json!("x"))])));
    }

    #[test]
    fn test_numeric_comparison_over_lexical() {
        let expr = parse("`age` >= '9'").unwrap();
        // Lexically "10" < "9"; numerically 10 > 9.
        assert!(matches(&expr, &row(&[("age", json!(10))])));
    }

    #[test]
    fn test_string_escapes_round_trip() {
        let expr = parse("`name` = 'a\\'b'").unwrap();
        assert!(matches(&expr, &row(&[("name", json!("a'b"))])));
    }

    #[test]
    fn test_qualified_identifier_collapses() {
        let expr = parse("`u`.`id` = '7'").unwrap();
        assert!(matches(&expr, &row(&[("id", json!(7))])));
    }

    #[test]
    fn test_bare_raw_fragment_parses() {
        let expr = parse("`deleted_at` = 0").unwrap();
        assert!(matches(&expr, &row(&[("deleted_at", json!(0))])));
    }

    #[test]
    fn test_unsupported_fragment_errors() {
        assert!(parse("`a` LIKE 'x%'").is_err());
        assert!(parse("deleted_at ~ 3").is_err());
    }

    #[test]
    fn test_missing_field_compares_as_empty() {
        let expr = parse("`ghost` = ''").unwrap();
        assert!(matches(&expr, &row(&[("id", json!(1))])));
    }
}
