//! Typed ACL attribute validators (§4.1 entry points 1 & 2).
//!
//! Each session attribute (`gender`, `age`, `membership`, `country`, a
//! room's custom attributes, ...) is backed by one of these validator
//! kinds, configured per-deployment under `[acl.validation.<attribute>]`
//! in `Config`. Grounded on `dino/validation/request_validator.py`'s
//! validator classes and `test_acl_custom_pattern.py`'s `AclPatternValidator`.

use regex::Regex;

/// A validator for one ACL attribute: accepts or rejects both a
/// candidate *stored* expression value and a *session* value being
/// checked against an already-stored rule.
pub trait AttributeValidator: std::fmt::Debug + Send + Sync {
    /// Is `value` an acceptable right-hand side when an admin is
    /// creating or updating a rule for this attribute (§4.1 entry 1)?
    fn validate_new_acl(&self, value: &str) -> Result<(), String>;
}

/// Accepts any value found in a fixed, admin-configured comma-separated
/// set (e.g. `gender`'s `m,f`).
#[derive(Debug, Clone)]
pub struct StrInCsv {
    pub accepted: Vec<String>,
}

impl StrInCsv {
    pub fn new(csv: &str) -> Self {
        Self {
            accepted: csv.split(',').map(|s| s.trim().to_string()).collect(),
        }
    }
}

impl AttributeValidator for StrInCsv {
    fn validate_new_acl(&self, value: &str) -> Result<(), String> {
        // A value may itself be a range (`34:40`) or plain token; CSV
        // validators only ever gate plain tokens.
        if self.accepted.iter().any(|a| a == value) {
            Ok(())
        } else {
            Err(format!("{value:?} not in accepted set {:?}", self.accepted))
        }
    }
}

/// Accepts a bare integer or an open/closed range `lo?:hi?`, bounded by
/// an admin-configured `[min, max]`.
#[derive(Debug, Clone)]
pub struct RangeValidator {
    pub min: i64,
    pub max: i64,
}

impl RangeValidator {
    fn parse_bound(raw: &str, default: i64) -> Result<i64, String> {
        if raw.is_empty() {
            Ok(default)
        } else {
            raw.parse::<i64>()
                .map_err(|_| format!("{raw:?} is not an integer"))
        }
    }
}

impl AttributeValidator for RangeValidator {
    fn validate_new_acl(&self, value: &str) -> Result<(), String> {
        let (lo, hi) = match value.split_once(':') {
            Some((lo, hi)) => (
                Self::parse_bound(lo, self.min)?,
                Self::parse_bound(hi, self.max)?,
            ),
            None => {
                let n = value
                    .parse::<i64>()
                    .map_err(|_| format!("{value:?} is not an integer or range"))?;
                (n, n)
            }
        };
        if lo > hi {
            return Err(format!("range {lo}:{hi} is inverted"));
        }
        if lo < self.min || hi > self.max {
            return Err(format!(
                "range {lo}:{hi} falls outside accepted bounds {}:{}",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Accepts any value matching an admin-configured regular expression,
/// default grounded on `test_acl_custom_pattern.py`'s canonical pattern.
#[derive(Debug, Clone)]
pub struct AcceptedPattern {
    pattern: Regex,
}

/// Default custom-attribute pattern: lowercase alphanumerics and
/// underscore, 1-64 chars (matches `tg_p` and similar membership codes).
pub const DEFAULT_PATTERN: &str = r"^[a-z0-9_]{1,64}$";

impl AcceptedPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn default_pattern() -> Self {
        Self::new(DEFAULT_PATTERN).expect("DEFAULT_PATTERN is a valid regex")
    }
}

impl AttributeValidator for AcceptedPattern {
    fn validate_new_acl(&self, value: &str) -> Result<(), String> {
        if self.pattern.is_match(value) {
            Ok(())
        } else {
            Err(format!("{value:?} does not match accepted pattern"))
        }
    }
}

/// Gates `crossroom`-style attributes where the only legal RHS is the
/// literal `y` — used by `is_admin`/`is_super_user`/`same_room`/
/// `same_channel` style pseudo-attributes, and by `disallow` which
/// accepts nothing at all.
#[derive(Debug, Clone, Copy)]
pub enum FixedValidator {
    /// Only `y` may be stored (`is_admin=y`, `same_room=y`, ...).
    AcceptYOnly,
    /// No value may ever be stored for this attribute.
    Disallow,
}

impl AttributeValidator for FixedValidator {
    fn validate_new_acl(&self, value: &str) -> Result<(), String> {
        match self {
            FixedValidator::AcceptYOnly if value == "y" => Ok(()),
            FixedValidator::AcceptYOnly => {
                Err(format!("{value:?} must be the literal \"y\""))
            }
            FixedValidator::Disallow => {
                Err("this attribute may not be set via an acl rule".to_string())
            }
        }
    }
}
