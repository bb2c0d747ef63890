//! Command structs for engine operations.
//!
//! These types group the parameters of the write operations that take more
//! than a couple of inputs, keeping call sites readable. People are named by
//! name or id; the engine resolves them against the target list.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::Money;

/// How an expense is split, with participants still named by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SplitSpec {
    #[default]
    Equal,
    Percentages(Vec<(String, Decimal)>),
    Amounts(Vec<(String, Money)>),
    Weighted(String),
}

/// Record a shared expense.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpenseCmd {
    pub list: String,
    pub name: String,
    pub payer: String,
    pub amount: Money,
    /// People sharing the expense. Empty means every list member, or the
    /// people named by the split.
    pub with: Vec<String>,
    pub split: SplitSpec,
}

impl ExpenseCmd {
    #[must_use]
    pub fn new(
        list: impl Into<String>,
        name: impl Into<String>,
        payer: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            list: list.into(),
            name: name.into(),
            payer: payer.into(),
            amount,
            with: Vec::new(),
            split: SplitSpec::Equal,
        }
    }

    #[must_use]
    pub fn with(mut self, participant: impl Into<String>) -> Self {
        self.with.push(participant.into());
        self
    }

    #[must_use]
    pub fn with_all<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with.extend(participants.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn split(mut self, split: SplitSpec) -> Self {
        self.split = split;
        self
    }

    #[must_use]
    pub fn weighted(self, weight_name: impl Into<String>) -> Self {
        self.split(SplitSpec::Weighted(weight_name.into()))
    }
}

/// Add a person to a list or a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberCmd {
    pub name: String,
    pub user_id: Option<Uuid>,
    pub weights: Vec<(String, Decimal)>,
}

impl MemberCmd {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_id: None,
            weights: Vec::new(),
        }
    }

    #[must_use]
    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn weight(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.weights.push((name.into(), value));
        self
    }
}
