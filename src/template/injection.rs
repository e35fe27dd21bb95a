//! Signature-based SQL injection screening.
//!
//! Screening runs against the raw value a caller supplied, never against
//! the assembled statement, so literal SQL around a placeholder cannot
//! trigger a rejection.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

// Compile signatures once at startup
static TERMINATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r";").unwrap());

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"--|/\*|\*/").unwrap());

static UNION_SELECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bunion\b\s+(?:all\s+)?\bselect\b").unwrap());

static TAUTOLOGY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)'\s*(?:or|and)\b[^=]*=").unwrap());

static EXEC_PROC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bexec(?:ute)?\s+(?:xp|sp)_").unwrap());

/// A caller-supplied value matched an injection signature.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("SQL injection detected in parameter `{name}`: {signature}")]
pub struct InjectionDetected {
    /// Parameter that carried the value.
    pub name: String,
    /// Which signature matched.
    pub signature: Signature,
}

/// Injection signature classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    StatementTerminator,
    Comment,
    UnionSelect,
    Tautology,
    ProcedureCall,
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::StatementTerminator => "statement terminator",
            Self::Comment => "comment marker",
            Self::UnionSelect => "UNION SELECT sequence",
            Self::Tautology => "quote-broken tautology",
            Self::ProcedureCall => "stored procedure call",
        };
        f.write_str(label)
    }
}

/// Return the first signature matched by `value`, if any.
pub fn detect(value: &str) -> Option<Signature> {
    let checks: [(&Lazy<Regex>, Signature); 5] = [
        (&TERMINATOR_RE, Signature::StatementTerminator),
        (&COMMENT_RE, Signature::Comment),
        (&UNION_SELECT_RE, Signature::UnionSelect),
        (&TAUTOLOGY_RE, Signature::Tautology),
        (&EXEC_PROC_RE, Signature::ProcedureCall),
    ];
    checks
        .into_iter()
        .find(|(re, _)| re.is_match(value))
        .map(|(_, signature)| signature)
}

/// Screen a single named value.
pub fn screen(name: &str, value: &str) -> Result<(), InjectionDetected> {
    match detect(value) {
        Some(signature) => Err(InjectionDetected {
            name: name.to_string(),
            signature,
        }),
        None => Ok(()),
    }
}
