//! Settlement planning.
//!
//! [`plan_settlement`] reads a [`BalanceSnapshot`] and produces the ordered
//! transfers that bring every balance back to zero:
//!
//! 1. debitors and creditors are sorted by descending remaining amount (ties
//!    keep insertion order);
//! 2. each debitor in turn pays the creditor at the head of the creditor
//!    queue `min(remaining debit, remaining credit)`;
//! 3. a creditor whose remaining amount reaches zero is moved from the front
//!    to the back of the queue instead of re-sorting the queue.
//!
//! Step 3 is cheaper than a re-sort after every transfer, but the head is not
//! always the largest remaining creditor. The result is a valid settlement
//! with at most `debitors + creditors - 1` transfers, not a global minimum.

use std::{collections::VecDeque, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{EngineError, Id, IdAllocator, IdKind, Money, ResultEngine, Transaction};

/// Largest total imbalance a table may carry and still be settled.
pub const BALANCE_TOLERANCE: Money = Money::new(2);

/// Side of a participant in one settlement run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Debitor,
    Creditor,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debitor => "debitor",
            Self::Creditor => "creditor",
        }
    }
}

/// Deterministic fingerprint of a settlement run's input.
///
/// Two runs over the same multiset of `(participant, role, balance)` get the
/// same id, which is what lets the ledger drop a replayed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable point-in-time copy of a balance table, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalanceSnapshot {
    entries: Vec<(Id, Money)>,
}

impl BalanceSnapshot {
    pub fn new(entries: Vec<(Id, Money)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(Id, Money)] {
        &self.entries
    }

    pub fn total_debit(&self) -> Money {
        self.entries
            .iter()
            .filter(|(_, balance)| balance.is_negative())
            .map(|(_, balance)| balance.abs())
            .sum()
    }

    pub fn total_credit(&self) -> Money {
        self.entries
            .iter()
            .filter(|(_, balance)| balance.is_positive())
            .map(|(_, balance)| *balance)
            .sum()
    }

    /// Fingerprint of the non-zero entries, independent of their order.
    pub fn event_id(&self) -> EventId {
        self.event_id_after(std::iter::empty())
    }

    /// Fingerprint of the non-zero entries together with the transactions
    /// already pending against them.
    ///
    /// Two runs share an id only when both the table and the pending set are
    /// unchanged. With no pending transaction this equals [`Self::event_id`].
    pub fn event_id_after(&self, pending: impl IntoIterator<Item = Id>) -> EventId {
        let mut rows: Vec<(String, Role, i64)> = self
            .entries
            .iter()
            .filter(|(_, balance)| !balance.is_zero())
            .map(|(id, balance)| {
                let role = if balance.is_negative() {
                    Role::Debitor
                } else {
                    Role::Creditor
                };
                (id.to_string(), role, balance.cents())
            })
            .collect();
        rows.sort();

        let mut hasher = Sha256::new();
        for (id, role, cents) in &rows {
            hasher.update(id.as_bytes());
            hasher.update(b"|");
            hasher.update(role.as_str().as_bytes());
            hasher.update(b"|");
            hasher.update(cents.to_le_bytes());
            hasher.update(b"\n");
        }
        let mut pending: Vec<String> = pending.into_iter().map(|id| id.to_string()).collect();
        pending.sort();
        for id in &pending {
            hasher.update(b"pending|");
            hasher.update(id.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        EventId(Uuid::from_bytes(bytes))
    }
}

/// Fails with [`EngineError::ImbalancedGroup`] when debits and credits differ
/// by more than [`BALANCE_TOLERANCE`].
pub fn check_overall_balance(snapshot: &BalanceSnapshot) -> ResultEngine<()> {
    let debit = snapshot.total_debit();
    let credit = snapshot.total_credit();
    let deviation = credit - debit;
    if !deviation.within(BALANCE_TOLERANCE) {
        return Err(EngineError::ImbalancedGroup {
            debit,
            credit,
            deviation,
        });
    }
    Ok(())
}

/// Output of one planning run. Every transaction carries `event_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementPlan {
    pub event_id: EventId,
    pub transactions: Vec<Transaction>,
}

impl SettlementPlan {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Transfer {
    pub sender: Id,
    pub receiver: Id,
    pub amount: Money,
}

#[derive(Debug)]
struct Remaining {
    id: Id,
    amount: Money,
}

/// Plans the transfers that settle `snapshot`.
///
/// Transaction ids are only drawn from `ids` once the plan is known to be
/// valid.
pub fn plan_settlement(
    snapshot: &BalanceSnapshot,
    ids: &mut IdAllocator,
    now: DateTime<Utc>,
) -> ResultEngine<SettlementPlan> {
    plan_settlement_for_event(snapshot.event_id(), snapshot, ids, now)
}

/// Same as [`plan_settlement`], stamping the transactions with a caller-made
/// `event_id`.
pub fn plan_settlement_for_event(
    event_id: EventId,
    snapshot: &BalanceSnapshot,
    ids: &mut IdAllocator,
    now: DateTime<Utc>,
) -> ResultEngine<SettlementPlan> {
    let transfers = greedy_transfers(snapshot)?;
    tracing::debug!(
        "settlement event {event_id}: {} transfer(s) planned",
        transfers.len()
    );

    let mut transactions = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let tx = Transaction::new(
            ids.next_id(IdKind::Transaction),
            transfer.sender,
            transfer.receiver,
            transfer.amount,
            now,
        )?
        .with_event(event_id);
        transactions.push(tx);
    }
    Ok(SettlementPlan {
        event_id,
        transactions,
    })
}

pub(crate) fn greedy_transfers(snapshot: &BalanceSnapshot) -> ResultEngine<Vec<Transfer>> {
    check_overall_balance(snapshot)?;

    let mut debitors: Vec<Remaining> = Vec::new();
    let mut creditors: Vec<Remaining> = Vec::new();
    for (id, balance) in snapshot.entries() {
        if balance.is_negative() {
            debitors.push(Remaining {
                id: *id,
                amount: balance.abs(),
            });
        } else if balance.is_positive() {
            creditors.push(Remaining {
                id: *id,
                amount: *balance,
            });
        }
    }
    // `sort_by` is stable: equal amounts keep insertion order.
    debitors.sort_by(|a, b| b.amount.cmp(&a.amount));
    creditors.sort_by(|a, b| b.amount.cmp(&a.amount));

    // Credit left unmatched when debits exceed credits by up to the tolerance.
    let mut unmatched_debit = (snapshot.total_debit() - snapshot.total_credit()).max(Money::ZERO);
    let mut creditors: VecDeque<Remaining> = creditors.into();
    let mut transfers = Vec::new();

    for debitor in &mut debitors {
        while debitor.amount >= Money::ONE_CENT {
            let Some(creditor) = creditors.front_mut() else {
                return Err(EngineError::SettlementProtocol(format!(
                    "{} still owes {} but there are no creditors",
                    debitor.id, debitor.amount
                )));
            };
            if creditor.amount < Money::ONE_CENT {
                if debitor.amount <= unmatched_debit {
                    tracing::warn!(
                        "leaving {} of rounding residue on {}: every creditor is settled",
                        debitor.amount,
                        debitor.id
                    );
                    unmatched_debit -= debitor.amount;
                    break;
                }
                return Err(EngineError::SettlementProtocol(format!(
                    "creditor {} is already settled, {} cannot pay them {}",
                    creditor.id, debitor.id, debitor.amount
                )));
            }

            let amount = debitor.amount.min(creditor.amount);
            debitor.amount -= amount;
            creditor.amount -= amount;
            transfers.push(Transfer {
                sender: debitor.id,
                receiver: creditor.id,
                amount,
            });

            if creditor.amount < Money::ONE_CENT
                && let Some(done) = creditors.pop_front()
            {
                creditors.push_back(done);
            }
        }
    }

    Ok(transfers)
}
