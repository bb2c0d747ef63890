//! Participants and the balance table they form.
//!
//! A [`Participant`] carries a signed net balance: positive means the group
//! owes them money (creditor), negative means they owe the group (debitor).
//! [`Participants`] keeps them in insertion order, which is also the
//! tie-break order used by the allocator and the settlement planner.

use std::collections::BTreeMap;

use api_types::balance::MemberStatus;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Id, IdKind, Money, ResultEngine, settlement::BalanceSnapshot};

/// Name of the sharing weight every participant starts with.
pub const DEFAULT_WEIGHT: &str = "weight";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Id,
    pub name: String,
    /// Linked external user profile, always a v4 UUID.
    pub user_id: Option<Uuid>,
    pub balance: Money,
    pub spent_total: Money,
    settled: bool,
    pub sharing_weights: BTreeMap<String, Decimal>,
}

impl Participant {
    pub fn new(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            user_id: None,
            balance: Money::ZERO,
            spent_total: Money::ZERO,
            settled: true,
            sharing_weights: BTreeMap::from([(DEFAULT_WEIGHT.to_string(), Decimal::ONE)]),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.sharing_weights.insert(name.into(), value);
        self
    }

    pub fn status(&self) -> MemberStatus {
        if self.balance.is_zero() {
            MemberStatus::SettledUp
        } else if self.balance.is_positive() {
            MemberStatus::Creditor
        } else {
            MemberStatus::Debitor
        }
    }

    /// Latched "settled" flag.
    ///
    /// It is set the first time the balance is observed at zero and only an
    /// explicit balance change (an allocation or a closed transaction) clears
    /// it again.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Applies a balance change coming from an allocation or a transaction.
    pub(crate) fn apply_delta(&mut self, delta: Money) {
        if delta.is_zero() {
            return;
        }
        self.balance += delta;
        self.settled = false;
        self.observe_settled();
    }

    pub(crate) fn add_spent(&mut self, amount: Money) {
        self.spent_total += amount;
    }

    fn observe_settled(&mut self) {
        if !self.settled && self.balance.is_zero() {
            self.settled = true;
        }
    }

    pub fn weight(&self, name: &str) -> Option<Decimal> {
        self.sharing_weights.get(name).copied()
    }

    /// Links the participant to an external user profile.
    pub fn connect_user(&mut self, user_id: Uuid) -> ResultEngine<()> {
        if user_id.get_version_num() != 4 {
            return Err(EngineError::Validation(format!(
                "user id {user_id} is not a v4 uuid"
            )));
        }
        if let Some(existing) = self.user_id
            && existing != user_id
        {
            return Err(EngineError::Validation(format!(
                "{} is already connected to user {existing}",
                self.name
            )));
        }
        self.user_id = Some(user_id);
        Ok(())
    }
}

/// Insertion-ordered balance table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Participants {
    by_id: IndexMap<Id, Participant>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.by_id.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.by_id.values()
    }

    pub fn get_by_id(&self, id: &Id) -> ResultEngine<&Participant> {
        self.by_id
            .get(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    pub(crate) fn get_mut(&mut self, id: &Id) -> ResultEngine<&mut Participant> {
        self.by_id
            .get_mut(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    pub fn get_by_name(&self, name: &str) -> ResultEngine<&Participant> {
        self.by_id
            .values()
            .find(|p| p.name == name)
            .ok_or_else(|| EngineError::KeyNotFound(name.to_string()))
    }

    /// Looks a participant up by id first, then by name.
    pub fn resolve(&self, name_or_id: &str) -> ResultEngine<&Participant> {
        if let Ok(id) = name_or_id.parse::<Id>()
            && let Some(participant) = self.by_id.get(&id)
        {
            return Ok(participant);
        }
        self.get_by_name(name_or_id)
    }

    /// Display name for `id`, falling back to the id itself.
    pub fn name_of(&self, id: &Id) -> String {
        self.by_id
            .get(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn debitors(&self) -> impl Iterator<Item = &Participant> {
        self.by_id.values().filter(|p| p.balance.is_negative())
    }

    pub fn creditors(&self) -> impl Iterator<Item = &Participant> {
        self.by_id.values().filter(|p| p.balance.is_positive())
    }

    /// Sum of every balance. Zero for a consistent table.
    pub fn total(&self) -> Money {
        self.by_id.values().map(|p| p.balance).sum()
    }

    /// Adds a participant. Returns `false` (and leaves the table untouched)
    /// when the id is already present.
    pub fn add(&mut self, participant: Participant) -> ResultEngine<bool> {
        participant.id.expect_kind(IdKind::Member)?;
        if self.by_id.contains_key(&participant.id) {
            tracing::warn!(
                "member {} ({}) already in the table",
                participant.name,
                participant.id
            );
            return Ok(false);
        }
        if participant.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "member name must not be empty".to_string(),
            ));
        }
        if self.by_id.values().any(|p| p.name == participant.name) {
            return Err(EngineError::ExistingKey(participant.name));
        }
        self.by_id.insert(participant.id, participant);
        Ok(true)
    }

    /// Checks that `id` may leave the table.
    pub(crate) fn ensure_removable(&self, id: &Id) -> ResultEngine<()> {
        if let Some(participant) = self.by_id.get(id)
            && !participant.balance.is_zero()
        {
            return Err(EngineError::Validation(format!(
                "cannot remove {} ({}): balance is {}",
                participant.name, participant.id, participant.balance
            )));
        }
        Ok(())
    }

    /// Removes a participant with a zero balance. Absent ids are a warned
    /// no-op and return `None`.
    pub fn remove(&mut self, id: &Id) -> ResultEngine<Option<Participant>> {
        if !self.by_id.contains_key(id) {
            tracing::warn!("member {id} not in the table");
            return Ok(None);
        }
        self.ensure_removable(id)?;
        Ok(self.by_id.shift_remove(id))
    }

    /// Re-inserts a participant at its original position.
    pub(crate) fn restore(&mut self, index: usize, participant: Participant) {
        let index = index.min(self.by_id.len());
        self.by_id.shift_insert(index, participant.id, participant);
    }

    pub fn position(&self, id: &Id) -> Option<usize> {
        self.by_id.get_index_of(id)
    }

    /// Immutable point-in-time copy of the balances, in insertion order.
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot::new(self.by_id.values().map(|p| (p.id, p.balance)).collect())
    }
}
