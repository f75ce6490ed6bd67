//! Flat boolean filters over user records.
//!
//! A [`Query`] is an ordered list of [`Term`]s: predicates joined by `AND`/`OR`
//! combinators. There is no grouping and no precedence, the expression is
//! folded strictly left to right, so `a OR b AND c` means `(a OR b) AND c`.
//!
//! A well formed query alternates predicate, combinator, predicate, ... and
//! ends on a predicate. Anything else is rejected as a whole with a
//! [`QueryError`] before a single record is looked at.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::User;

mod predicate;

pub use predicate::{Field, FieldClass, Operand, Operator, Predicate, TypeMismatch, Value};

/// How a predicate is joined to the expression on its left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    Or,
    And,
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Or => f.write_str("OR"),
            Self::And => f.write_str("AND"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Predicate(Predicate),
    Combinator(Separator),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query: empty expression")]
    Empty,
    #[error("invalid query: expression starts with a combinator")]
    LeadingCombinator,
    #[error("invalid query: combinator at position {0} follows another combinator")]
    DuplicateCombinator(usize),
    #[error("invalid query: predicate at position {0} is not joined by a combinator")]
    MissingCombinator(usize),
    #[error("invalid query: expression ends with a combinator")]
    DanglingCombinator,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(Vec<Term>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate without a combinator, used for the first term.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.0.push(Term::Predicate(predicate));
        self
    }

    pub fn and(self, predicate: Predicate) -> Self {
        self.join(Separator::And, predicate)
    }

    pub fn or(self, predicate: Predicate) -> Self {
        self.join(Separator::Or, predicate)
    }

    fn join(mut self, separator: Separator, predicate: Predicate) -> Self {
        self.0.push(Term::Combinator(separator));
        self.0.push(Term::Predicate(predicate));
        self
    }

    pub fn push(&mut self, term: Term) {
        self.0.push(term);
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    /// Fold the expression left to right.
    ///
    /// `leaf` maps every predicate, `join` combines the accumulated left side
    /// with the next leaf. Structural errors are reported before `leaf` sees
    /// the offending term.
    pub fn fold<T>(
        &self,
        mut leaf: impl FnMut(&Predicate) -> T,
        mut join: impl FnMut(Separator, T, T) -> T,
    ) -> Result<T, QueryError> {
        let mut acc: Option<T> = None;
        let mut pending: Option<Separator> = None;

        for (position, term) in self.0.iter().enumerate() {
            match term {
                Term::Predicate(predicate) => {
                    acc = Some(match (acc.take(), pending.take()) {
                        (None, _) => leaf(predicate),
                        (Some(left), Some(separator)) => join(separator, left, leaf(predicate)),
                        (Some(_), None) => return Err(QueryError::MissingCombinator(position)),
                    });
                }
                Term::Combinator(separator) => {
                    if acc.is_none() {
                        return Err(QueryError::LeadingCombinator);
                    }
                    if pending.is_some() {
                        return Err(QueryError::DuplicateCombinator(position));
                    }
                    pending = Some(*separator);
                }
            }
        }

        if pending.is_some() {
            return Err(QueryError::DanglingCombinator);
        }
        acc.ok_or(QueryError::Empty)
    }

    /// Check the structure without evaluating anything.
    pub fn validate(&self) -> Result<(), QueryError> {
        self.fold(|_| (), |_, _, _| ())
    }

    pub fn matches(&self, user: &User) -> Result<bool, QueryError> {
        self.fold(
            |predicate| predicate.matches(user),
            |separator, left, right| match separator {
                Separator::Or => left || right,
                Separator::And => left && right,
            },
        )
    }

    /// Select at most `limit` matching users, keeping their order.
    ///
    /// A negative `limit` selects every match.
    pub fn apply(&self, users: &[User], limit: i64) -> Result<Vec<User>, QueryError> {
        self.validate()?;
        let cap = usize::try_from(limit).unwrap_or(users.len());

        let mut selected = Vec::new();
        for user in users {
            if selected.len() >= cap {
                break;
            }
            if self.matches(user)? {
                selected.push(user.clone());
            }
        }
        Ok(selected)
    }
}

impl From<Vec<Term>> for Query {
    fn from(terms: Vec<Term>) -> Self {
        Self(terms)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for term in &self.0 {
            match term {
                Term::Predicate(predicate) => write!(f, "{predicate}")?,
                Term::Combinator(separator) => write!(f, " {separator} ")?,
            }
        }
        Ok(())
    }
}
