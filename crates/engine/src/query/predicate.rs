//! Single comparisons between a user field and a literal.
//!
//! A [`Predicate`] names a [`Field`], an [`Operator`], an optional negation and
//! an [`Operand`]. The comparison is dispatched on the declared class of the
//! field: numbers compare as integers, strings lexicographically (byte order),
//! flags with `false < true` and timestamps chronologically.
//!
//! Comparisons are partial: an operand whose type does not belong to the
//! field's class makes the predicate evaluate to `false`, whatever the
//! negation says. Negation only ever applies to a comparison that happened:
//!
//! - `Equal` + negate is "not equal"
//! - `Less` + negate is "greater or equal"
//! - `Greater` + negate is "less or equal"
use std::{cmp::Ordering, fmt};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::User;

/// A user attribute a predicate can look at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Name,
    Password,
    SolidBalance,
    StockBalance,
    IsBlocked,
    LastFarming,
    CreatedAt,
}

/// The type class a field is compared as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldClass {
    Number,
    Text,
    Flag,
    Time,
}

impl FieldClass {
    fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Flag => "flag",
            Self::Time => "time",
        }
    }
}

impl Field {
    /// Column name, shared by the JSON records and the SQL table.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Password => "password",
            Self::SolidBalance => "solid_balance",
            Self::StockBalance => "stock_balance",
            Self::IsBlocked => "is_blocked",
            Self::LastFarming => "last_farming",
            Self::CreatedAt => "created_at",
        }
    }

    pub fn class(self) -> FieldClass {
        match self {
            Self::Id | Self::SolidBalance | Self::StockBalance => FieldClass::Number,
            Self::Name | Self::Password => FieldClass::Text,
            Self::IsBlocked => FieldClass::Flag,
            Self::LastFarming | Self::CreatedAt => FieldClass::Time,
        }
    }

    /// Read this field out of a record.
    pub fn read(self, user: &User) -> Value<'_> {
        match self {
            Self::Id => Value::Number(i128::from(user.id)),
            Self::Name => Value::Text(&user.name),
            Self::Password => Value::Text(&user.password),
            Self::SolidBalance => Value::Number(i128::from(user.solid_balance)),
            Self::StockBalance => Value::Number(i128::from(user.stock_balance)),
            Self::IsBlocked => Value::Flag(user.is_blocked),
            Self::LastFarming => Value::Time(user.last_farming),
            Self::CreatedAt => Value::Time(user.created_at),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    Greater,
    Less,
}

impl Operator {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::Greater => ordering == Ordering::Greater,
            Self::Less => ordering == Ordering::Less,
        }
    }

    /// The comparison symbol once the negation is folded in.
    pub fn symbol(self, negate: bool) -> &'static str {
        match (self, negate) {
            (Self::Equal, false) => "==",
            (Self::Equal, true) => "!=",
            (Self::Greater, false) => ">",
            (Self::Greater, true) => "<=",
            (Self::Less, false) => "<",
            (Self::Less, true) => ">=",
        }
    }
}

/// The literal a field is compared against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Number(u64),
    Text(String),
    Flag(bool),
    Time(DateTime<Utc>),
}

impl Operand {
    pub fn class(&self) -> FieldClass {
        match self {
            Self::Number(_) => FieldClass::Number,
            Self::Text(_) => FieldClass::Text,
            Self::Flag(_) => FieldClass::Flag,
            Self::Time(_) => FieldClass::Time,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Flag(b) => write!(f, "{b}"),
            Self::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<u64> for Operand {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<DateTime<Utc>> for Operand {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

/// A field value as read from a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value<'a> {
    Number(i128),
    Text(&'a str),
    Flag(bool),
    Time(DateTime<Utc>),
}

impl Value<'_> {
    fn class(&self) -> FieldClass {
        match self {
            Self::Number(_) => FieldClass::Number,
            Self::Text(_) => FieldClass::Text,
            Self::Flag(_) => FieldClass::Flag,
            Self::Time(_) => FieldClass::Time,
        }
    }
}

/// Raised when a value or operand does not belong to the field's class.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} is compared as {expected}, got {found}")]
pub struct TypeMismatch {
    pub field: Field,
    pub expected: &'static str,
    pub found: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: Field,
    pub operator: Operator,
    #[serde(default)]
    pub negate: bool,
    pub operand: Operand,
}

impl Predicate {
    pub fn new(field: Field, operator: Operator, operand: impl Into<Operand>) -> Self {
        Self {
            field,
            operator,
            negate: false,
            operand: operand.into(),
        }
    }

    /// Invert the predicate.
    pub fn not(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Whether `user` satisfies the predicate.
    pub fn matches(&self, user: &User) -> bool {
        self.evaluate(self.field.read(user))
    }

    /// Evaluate against an already extracted value; type mismatches are `false`.
    pub fn evaluate(&self, value: Value<'_>) -> bool {
        match self.compare(value) {
            Ok(result) => result != self.negate,
            Err(_) => false,
        }
    }

    /// Compare `value` against the operand, before negation.
    pub fn compare(&self, value: Value<'_>) -> Result<bool, TypeMismatch> {
        self.check_operand()?;
        let ordering = match (value, &self.operand) {
            (Value::Number(x), Operand::Number(y)) => x.cmp(&i128::from(*y)),
            (Value::Text(x), Operand::Text(y)) => x.cmp(y.as_str()),
            // true > false, so Greater is "x and not y" and Less its mirror.
            (Value::Flag(x), Operand::Flag(y)) => x.cmp(y),
            (Value::Time(x), Operand::Time(y)) => x.cmp(y),
            (value, _) => {
                return Err(TypeMismatch {
                    field: self.field,
                    expected: self.field.class().as_str(),
                    found: value.class().as_str(),
                });
            }
        };
        Ok(self.operator.accepts(ordering))
    }

    /// Check that the operand belongs to the field's class.
    pub fn check_operand(&self) -> Result<(), TypeMismatch> {
        let expected = self.field.class();
        if self.operand.class() != expected {
            return Err(TypeMismatch {
                field: self.field,
                expected: expected.as_str(),
                found: self.operand.class().as_str(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.field,
            self.operator.symbol(self.negate),
            self.operand
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn blocked_user() -> User {
        User {
            id: 7,
            name: "mallory".to_string(),
            password: "hash".to_string(),
            solid_balance: 120,
            stock_balance: 4,
            is_blocked: true,
            last_farming: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn flag_operator_algebra() {
        let user = blocked_user();
        assert!(Predicate::new(Field::IsBlocked, Operator::Equal, true).matches(&user));
        assert!(Predicate::new(Field::IsBlocked, Operator::Greater, false).matches(&user));
        assert!(!Predicate::new(Field::IsBlocked, Operator::Less, true).matches(&user));
        assert!(!Predicate::new(Field::IsBlocked, Operator::Greater, true).matches(&user));

        let mut free = user.clone();
        free.is_blocked = false;
        assert!(Predicate::new(Field::IsBlocked, Operator::Less, true).matches(&free));
        assert!(!Predicate::new(Field::IsBlocked, Operator::Less, false).matches(&free));
    }

    #[test]
    fn numbers_compare_as_integers() {
        let user = blocked_user();
        assert!(Predicate::new(Field::SolidBalance, Operator::Greater, 100u64).matches(&user));
        assert!(Predicate::new(Field::StockBalance, Operator::Equal, 4u64).matches(&user));
        assert!(Predicate::new(Field::Id, Operator::Less, 8u64).matches(&user));
        assert!(!Predicate::new(Field::Id, Operator::Less, 7u64).matches(&user));
    }

    #[test]
    fn negative_balances_stay_below_every_operand() {
        let mut user = blocked_user();
        user.solid_balance = -5;
        assert!(Predicate::new(Field::SolidBalance, Operator::Less, 0u64).matches(&user));
        assert!(!Predicate::new(Field::SolidBalance, Operator::Equal, 5u64).matches(&user));
    }

    #[test]
    fn strings_compare_lexicographically() {
        let user = blocked_user();
        assert!(Predicate::new(Field::Name, Operator::Greater, "bob").matches(&user));
        assert!(Predicate::new(Field::Name, Operator::Less, "zed").matches(&user));
        assert!(Predicate::new(Field::Name, Operator::Equal, "mallory").matches(&user));
        assert!(!Predicate::new(Field::Name, Operator::Equal, "Mallory").matches(&user));
    }

    #[test]
    fn timestamps_compare_chronologically() {
        let user = blocked_user();
        let may = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert!(Predicate::new(Field::LastFarming, Operator::Greater, may).matches(&user));
        assert!(Predicate::new(Field::CreatedAt, Operator::Less, may).matches(&user));
        assert!(
            Predicate::new(Field::CreatedAt, Operator::Equal, user.created_at).matches(&user)
        );
    }

    #[test]
    fn negation_inverts_every_well_typed_comparison() {
        let user = blocked_user();
        let predicates = [
            Predicate::new(Field::Id, Operator::Equal, 7u64),
            Predicate::new(Field::SolidBalance, Operator::Greater, 500u64),
            Predicate::new(Field::Name, Operator::Less, "alice"),
            Predicate::new(Field::IsBlocked, Operator::Greater, false),
            Predicate::new(Field::CreatedAt, Operator::Less, user.last_farming),
        ];
        for predicate in predicates {
            let plain = predicate.matches(&user);
            assert_eq!(predicate.clone().not().matches(&user), !plain, "{predicate}");
        }
    }

    #[test]
    fn type_mismatch_is_false_even_when_negated() {
        let user = blocked_user();
        let predicate = Predicate::new(Field::SolidBalance, Operator::Equal, "120");
        assert!(!predicate.matches(&user));
        assert!(!predicate.clone().not().matches(&user));
        assert!(predicate.compare(Field::SolidBalance.read(&user)).is_err());

        let predicate = Predicate::new(Field::Name, Operator::Equal, 7u64);
        assert!(!predicate.matches(&user));
        assert!(!predicate.not().matches(&user));
    }

    #[test]
    fn value_of_the_wrong_class_is_a_mismatch() {
        let predicate = Predicate::new(Field::IsBlocked, Operator::Equal, true);
        assert!(!predicate.evaluate(Value::Text("true")));
        assert!(!predicate.clone().not().evaluate(Value::Number(1)));
    }

    #[test]
    fn display_folds_negation_into_the_symbol() {
        let predicate = Predicate::new(Field::StockBalance, Operator::Less, 3u64).not();
        assert_eq!(predicate.to_string(), "stock_balance >= 3");
        let predicate = Predicate::new(Field::Name, Operator::Equal, "bob").not();
        assert_eq!(predicate.to_string(), "name != \"bob\"");
    }
}
