//! ACL evaluation engine (C6, §4.1).
//!
//! A small boolean expression language over session attributes:
//!
//! ```text
//! expr    := clause ('|' clause)*
//! clause  := term (',' term)* | '(' term (',' term)* ')'
//! term    := key '=' value
//! value   := ('!')? (plain | range)
//! range   := lo? ':' hi?
//! ```
//!
//! `|` is OR between clauses, `,` is AND inside a clause. Parentheses
//! group a single clause; nested parentheses are rejected. Grammar and
//! edge cases are grounded on `dino/validation/request_validator.py`
//! and `test_acl_custom_pattern.py` in the retrieved original source.

pub mod validators;

use crate::model::Session;
use thiserror::Error;
use validators::AttributeValidator;

/// Why a candidate ACL expression failed to validate (§4.1 entry point 1).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("blank acl expression")]
    Blank,
    #[error("missing comma between terms")]
    MissingComma,
    #[error("unbalanced or missing parenthesis")]
    MissingParenthesis,
    #[error("nested parentheses are not allowed")]
    NestedParenthesis,
    #[error("missing '|' between clauses")]
    MissingPipe,
    #[error("missing '=' in term {0:?}")]
    MissingEquals(String),
    #[error("empty value for key {0:?}")]
    EmptyValue(String),
    #[error("unknown acl attribute {0:?}")]
    UnknownAttribute(String),
    #[error("invalid value {value:?} for attribute {attribute:?}")]
    InvalidValue { attribute: String, value: String },
    #[error("invalid characters in token {0:?}")]
    InvalidCharacters(String),
}

/// A single `key=value` (or `key=!value`) term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub key: String,
    pub negated: bool,
    pub value: Value,
}

/// The parsed right-hand side of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Plain(String),
    Range { lo: Option<i64>, hi: Option<i64> },
}

impl Value {
    fn parse(raw: &str) -> Value {
        if let Some(range) = parse_range(raw) {
            range
        } else {
            Value::Plain(raw.to_string())
        }
    }

    pub fn raw(&self) -> String {
        match self {
            Value::Plain(s) => s.clone(),
            Value::Range { lo, hi } => format!(
                "{}:{}",
                lo.map(|v| v.to_string()).unwrap_or_default(),
                hi.map(|v| v.to_string()).unwrap_or_default()
            ),
        }
    }
}

fn parse_range(raw: &str) -> Option<Value> {
    let (lo_str, hi_str) = raw.split_once(':')?;
    let lo = if lo_str.is_empty() {
        None
    } else {
        Some(lo_str.parse::<i64>().ok()?)
    };
    let hi = if hi_str.is_empty() {
        None
    } else {
        Some(hi_str.parse::<i64>().ok()?)
    };
    Some(Value::Range { lo, hi })
}

/// A comma-joined conjunction of terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause(pub Vec<Term>);

/// A full ACL expression: a disjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr(pub Vec<Clause>);

const PLAIN_CHARS: &str = "0123456789abcdefghijklmnopqrstuvwxyz!|,():=-_";

fn token_chars_valid(token: &str) -> bool {
    token
        .chars()
        .all(|c| PLAIN_CHARS.contains(c.to_ascii_lowercase()))
}

/// Parse a term `key=value` (value may carry a leading `!`).
fn parse_term(raw: &str) -> Result<Term, ValidationError> {
    if raw.chars().any(|c| c.is_whitespace()) {
        return Err(ValidationError::InvalidCharacters(raw.to_string()));
    }
    let Some((key, rhs)) = raw.split_once('=') else {
        return Err(ValidationError::MissingEquals(raw.to_string()));
    };
    if key.is_empty() {
        return Err(ValidationError::MissingEquals(raw.to_string()));
    }
    if rhs.is_empty() {
        return Err(ValidationError::EmptyValue(key.to_string()));
    }
    let (negated, rawvalue) = match rhs.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, rhs),
    };
    if rawvalue.is_empty() {
        return Err(ValidationError::EmptyValue(key.to_string()));
    }
    Ok(Term {
        key: key.to_string(),
        negated,
        value: Value::parse(rawvalue),
    })
}

/// Split a clause body on top-level commas and parse each term.
fn parse_clause_body(body: &str) -> Result<Clause, ValidationError> {
    if body.is_empty() {
        return Err(ValidationError::Blank);
    }
    let terms: Result<Vec<Term>, ValidationError> =
        body.split(',').map(parse_term).collect();
    Ok(Clause(terms?))
}

/// Parse a full expression into clauses, enforcing the grammar in §4.1.
///
/// This is the grammar half of `validate_new_acl`'s entry point; value
/// acceptance is delegated per-term to the attribute's own validator.
pub fn parse(expr: &str) -> Result<Expr, ValidationError> {
    if expr.is_empty() {
        return Err(ValidationError::Blank);
    }
    if expr.contains(char::is_whitespace) {
        return Err(ValidationError::InvalidCharacters(expr.to_string()));
    }
    if !token_chars_valid(expr) {
        return Err(ValidationError::InvalidCharacters(expr.to_string()));
    }

    let mut clauses = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' => {
                depth += 1;
                if depth > 1 {
                    return Err(ValidationError::NestedParenthesis);
                }
                if !current.is_empty() {
                    // '(' immediately following another clause with no '|' before it.
                    return Err(ValidationError::MissingPipe);
                }
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ValidationError::MissingParenthesis);
                }
                clauses.push(parse_clause_body(&current)?);
                current.clear();
                // A ')' must be followed by either end-of-string or '|'.
                match chars.peek() {
                    None => {}
                    Some('|') => {}
                    Some(_) => return Err(ValidationError::MissingPipe),
                }
            }
            '|' if depth == 0 => {
                clauses.push(parse_clause_body(&current)?);
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if depth != 0 {
        return Err(ValidationError::MissingParenthesis);
    }
    if !current.is_empty() {
        clauses.push(parse_clause_body(&current)?);
    }

    if clauses.is_empty() {
        return Err(ValidationError::Blank);
    }

    Ok(Expr(clauses))
}

/// Role/membership facts about the actor being checked, computed by the
/// caller (who alone knows the scope a rule is being evaluated against)
/// before `eval` runs. These back the five pseudo-attributes (§4.1) that
/// a session's own string map can never answer honestly: a session is
/// client-supplied, so `is_admin=y` stored as a literal session field
/// would let any client grant itself adminship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalFacts {
    pub is_admin: bool,
    pub is_super_user: bool,
    pub same_room: bool,
    pub same_channel: bool,
}

/// Does `term` hold against `session`/`facts`, given the attribute's type?
///
/// `is_admin`, `is_super_user`, `same_room`, and `same_channel` are
/// never read out of `session` — the only value `validate_new_acl` ever
/// lets an admin store for them is the literal `y`, so the term itself
/// carries no information beyond "this rule requires the fact to hold";
/// the fact comes from `facts`. `disallow` can never be satisfied: no
/// rule referencing it can ever be stored (`FixedValidator::Disallow`
/// rejects every value at write time), so a term keyed `disallow`
/// encountered here is either dead config or tampering, and always
/// fails closed.
fn term_holds(term: &Term, session: &Session, facts: &EvalFacts) -> bool {
    let raw_holds = match term.key.as_str() {
        "is_admin" => facts.is_admin,
        "is_super_user" => facts.is_super_user,
        "same_room" => facts.same_room,
        "same_channel" => facts.same_channel,
        "disallow" => return false,
        _ => {
            let actual = session.get(&term.key);
            match (&term.value, actual) {
                (Value::Plain(expected), Some(actual)) => expected == actual,
                (Value::Range { lo, hi }, Some(actual)) => match actual.parse::<i64>() {
                    Ok(n) => lo.is_none_or(|lo| n >= lo) && hi.is_none_or(|hi| n <= hi),
                    Err(_) => false,
                },
                (_, None) => false,
            }
        }
    };
    if term.negated { !raw_holds } else { raw_holds }
}

/// *ACL DSL soundness* (§8 property 1): the expression holds iff any
/// clause's terms all hold.
pub fn eval(expr: &Expr, session: &Session, facts: &EvalFacts) -> bool {
    expr.0
        .iter()
        .any(|clause| clause.0.iter().all(|term| term_holds(term, session, facts)))
}

/// Entry point 1 (§4.1): validate a candidate expression before storing
/// it, deferring each term's value acceptance to its attribute's own
/// `validate_new_acl`.
pub fn validate_new_acl(
    expr: &str,
    lookup: impl Fn(&str) -> Option<Box<dyn AttributeValidator>>,
) -> Result<Expr, ValidationError> {
    let parsed = parse(expr)?;
    for clause in &parsed.0 {
        for term in &clause.0 {
            let validator = lookup(&term.key)
                .ok_or_else(|| ValidationError::UnknownAttribute(term.key.clone()))?;
            validator
                .validate_new_acl(&term.value.raw())
                .map_err(|_| ValidationError::InvalidValue {
                    attribute: term.key.clone(),
                    value: term.value.raw(),
                })?;
        }
    }
    Ok(parsed)
}
