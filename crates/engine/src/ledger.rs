//! Pending/closed transaction ledger of one expense list.
//!
//! Transactions enter pending and leave through [`PendingTransactions::close`],
//! the only place a transaction touches the balance table. The ledger also
//! remembers which settlement events still have pending transactions so an
//! identical settlement run is not recorded twice.

use std::collections::BTreeSet;

use api_types::transaction::TransactionRecord;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::{
    EngineError, Id, Money, ResultEngine, Transaction,
    participants::Participants,
    settlement::{BalanceSnapshot, EventId, SettlementPlan},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingTransactions {
    owner_id: Option<Id>,
    pending: IndexMap<Id, Transaction>,
    closed: Vec<Transaction>,
    /// Number of entries of `closed` already written to the history file.
    persisted_closed: usize,
    event_id: Option<EventId>,
    applied_events: BTreeSet<EventId>,
}

impl PendingTransactions {
    pub fn new(owner_id: Id) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    /// Rebuilds a ledger from the pending file and the history file.
    ///
    /// Pending transactions must name members of `table`; closed ones may
    /// name people who have since left.
    pub fn from_records(
        owner_id: Id,
        table: &Participants,
        pending: Vec<TransactionRecord>,
        history: Vec<TransactionRecord>,
    ) -> ResultEngine<Self> {
        let mut ledger = Self::new(owner_id);
        for record in history {
            let tx = Transaction::try_from(record)?;
            if tx.pending {
                return Err(EngineError::Validation(format!(
                    "history of {owner_id} holds transaction {} still marked pending",
                    tx.id
                )));
            }
            ledger.ensure_fresh_id(&tx)?;
            ledger.closed.push(tx);
        }
        ledger.persisted_closed = ledger.closed.len();

        for record in pending {
            let tx = Transaction::try_from(record)?;
            if !tx.pending {
                return Err(EngineError::Validation(format!(
                    "pending transactions of {owner_id} hold closed transaction {}",
                    tx.id
                )));
            }
            for member in [&tx.sender, &tx.receiver] {
                if !table.contains(member) {
                    return Err(EngineError::Validation(format!(
                        "pending transaction {} of {owner_id} names {member}, who is not a member",
                        tx.id
                    )));
                }
            }
            ledger.ensure_fresh_id(&tx)?;
            if let Some(event_id) = tx.event_id {
                ledger.applied_events.insert(event_id);
                ledger.event_id = Some(event_id);
            }
            ledger.pending.insert(tx.id, tx);
        }
        Ok(ledger)
    }

    pub fn owner_id(&self) -> Option<Id> {
        self.owner_id
    }

    /// Event of the last recorded settlement run.
    pub fn event_id(&self) -> Option<EventId> {
        self.event_id
    }

    pub fn is_applied(&self, event_id: &EventId) -> bool {
        self.applied_events.contains(event_id)
    }

    /// Makes `event_id` the current event.
    ///
    /// Returns `false` when the event is already applied, in which case the
    /// caller must drop the run.
    pub fn begin_event(&mut self, event_id: EventId) -> bool {
        if self.applied_events.contains(&event_id) {
            return false;
        }
        self.applied_events.insert(event_id);
        self.event_id = Some(event_id);
        true
    }

    pub fn get(&self, id: &Id) -> Option<&Transaction> {
        self.pending
            .get(id)
            .or_else(|| self.closed.iter().find(|tx| tx.id == *id))
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.values()
    }

    pub fn closed(&self) -> &[Transaction] {
        &self.closed
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.closed.is_empty()
    }

    /// Adds a pending transaction.
    ///
    /// Returns `Ok(false)` for the tolerated no-ops: the same transaction
    /// added twice, or a transaction of an already applied event that is not
    /// the current one.
    pub fn add(&mut self, tx: Transaction) -> ResultEngine<bool> {
        if !tx.pending {
            return Err(EngineError::Validation(format!(
                "transaction {} is already closed",
                tx.id
            )));
        }
        if let Some(existing) = self.pending.get(&tx.id)
            && *existing == tx
        {
            tracing::warn!("transaction {} is already pending", tx.id);
            return Ok(false);
        }
        self.ensure_fresh_id(&tx)?;
        if let Some(event_id) = tx.event_id
            && self.applied_events.contains(&event_id)
            && self.event_id != Some(event_id)
        {
            return Ok(false);
        }
        self.pending.insert(tx.id, tx);
        Ok(true)
    }

    /// Records every transaction of a plan, or none of them.
    ///
    /// Returns the transactions that were not recorded because the plan's
    /// event is already applied; their ids can be given back to the
    /// allocator.
    pub fn record_plan(&mut self, plan: SettlementPlan) -> ResultEngine<Vec<Transaction>> {
        if self.applied_events.contains(&plan.event_id) {
            tracing::info!(
                "settlement event {} already recorded, {} transaction(s) dropped",
                plan.event_id,
                plan.transactions.len()
            );
            return Ok(plan.transactions);
        }
        for tx in &plan.transactions {
            if tx.event_id != Some(plan.event_id) {
                return Err(EngineError::SettlementProtocol(format!(
                    "transaction {} does not belong to event {}",
                    tx.id, plan.event_id
                )));
            }
            self.ensure_fresh_id(tx)?;
        }
        if plan.transactions.is_empty() {
            return Ok(Vec::new());
        }
        self.begin_event(plan.event_id);
        for tx in plan.transactions {
            self.add(tx)?;
        }
        Ok(Vec::new())
    }

    /// Closes a pending transaction and applies it to `table`.
    ///
    /// An id that is not pending is warned about and ignored.
    pub fn close(
        &mut self,
        id: &Id,
        table: &mut Participants,
        at: DateTime<Utc>,
    ) -> ResultEngine<Option<Transaction>> {
        let Some(tx) = self.pending.get(id) else {
            tracing::warn!("transaction {id} is not pending, nothing to close");
            return Ok(None);
        };
        table.get_by_id(&tx.sender)?;
        table.get_by_id(&tx.receiver)?;

        let Some(mut tx) = self.pending.shift_remove(id) else {
            return Ok(None);
        };
        table.get_mut(&tx.sender)?.apply_delta(tx.amount);
        table.get_mut(&tx.receiver)?.apply_delta(-tx.amount);
        tx.close(at);
        tracing::debug!(
            "closed {}: {} paid {} to {}",
            tx.id,
            tx.sender,
            tx.amount,
            tx.receiver
        );

        if let Some(event_id) = tx.event_id
            && !self.pending.values().any(|p| p.event_id == Some(event_id))
        {
            // Fully closed events retire.
            self.applied_events.remove(&event_id);
        }
        self.closed.push(tx.clone());
        Ok(Some(tx))
    }

    /// Every transaction touching `participant`, oldest first.
    ///
    /// With `current_event_only` only the transactions of the last recorded
    /// settlement run are returned.
    pub fn member_transactions(
        &self,
        participant: &Id,
        current_event_only: bool,
    ) -> Vec<&Transaction> {
        let mut found: Vec<&Transaction> = self
            .closed
            .iter()
            .chain(self.pending.values())
            .filter(|tx| tx.involves(participant))
            .filter(|tx| {
                !current_event_only || (tx.event_id.is_some() && tx.event_id == self.event_id)
            })
            .collect();
        // Transaction ids are drawn in increasing order, so id order is
        // creation order across both stores.
        found.sort_by_key(|tx| tx.id);
        found
    }

    /// `true` while a pending transaction names `participant`.
    pub fn references(&self, participant: &Id) -> bool {
        self.pending.values().any(|tx| tx.involves(participant))
    }

    /// Identity of a settlement run over `table`: its live balances plus the
    /// transactions already pending.
    pub fn settlement_event(&self, table: &Participants) -> EventId {
        table.snapshot().event_id_after(self.pending.keys().copied())
    }

    /// Balances as they will be once every pending transaction is closed.
    pub fn effective_snapshot(&self, table: &Participants) -> BalanceSnapshot {
        BalanceSnapshot::new(
            table
                .iter()
                .map(|p| (p.id, p.balance + self.pending_effect(&p.id)))
                .collect(),
        )
    }

    fn pending_effect(&self, participant: &Id) -> Money {
        self.pending
            .values()
            .map(|tx| {
                if tx.sender == *participant {
                    tx.amount
                } else if tx.receiver == *participant {
                    -tx.amount
                } else {
                    Money::ZERO
                }
            })
            .sum()
    }

    pub fn pending_records(&self) -> Vec<TransactionRecord> {
        self.pending.values().map(TransactionRecord::from).collect()
    }

    /// Closed transactions not yet appended to the history file.
    pub fn unpersisted_closed(&self) -> Vec<TransactionRecord> {
        self.closed[self.persisted_closed..]
            .iter()
            .map(TransactionRecord::from)
            .collect()
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted_closed = self.closed.len();
    }

    fn ensure_fresh_id(&self, tx: &Transaction) -> ResultEngine<()> {
        if self.get(&tx.id).is_some() {
            return Err(EngineError::DuplicateId(tx.id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdAllocator, IdKind, participants::Participant, settlement::plan_settlement};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn mm(seq: u32) -> Id {
        Id::new(IdKind::Member, seq)
    }

    fn table(balances: &[i64]) -> Participants {
        let mut table = Participants::new();
        for (seq, cents) in balances.iter().enumerate() {
            let mut p = Participant::new(mm(seq as u32), format!("P{seq}"));
            p.apply_delta(Money::new(*cents));
            table.add(p).unwrap();
        }
        table
    }

    fn tx(seq: u32, sender: u32, receiver: u32, cents: i64) -> Transaction {
        Transaction::new(
            Id::new(IdKind::Transaction, seq),
            mm(sender),
            mm(receiver),
            Money::new(cents),
            at(),
        )
        .unwrap()
    }

    fn ledger() -> PendingTransactions {
        PendingTransactions::new(Id::new(IdKind::List, 0))
    }

    #[test]
    fn identical_add_is_a_no_op_and_different_content_is_fatal() {
        let mut ledger = ledger();
        assert!(ledger.add(tx(0, 0, 1, 500)).unwrap());
        assert!(!ledger.add(tx(0, 0, 1, 500)).unwrap());

        let err = ledger.add(tx(0, 0, 1, 700)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateId("tr0000".to_string()));
        assert!(err.is_internal_fault());
        assert_eq!(ledger.pending().count(), 1);
    }

    #[test]
    fn close_moves_money_and_history() {
        let mut table = table(&[-500, 500]);
        let mut ledger = ledger();
        ledger.add(tx(0, 0, 1, 500)).unwrap();

        let closed = ledger.close(&Id::new(IdKind::Transaction, 0), &mut table, at()).unwrap();
        let closed = closed.unwrap();
        assert!(!closed.pending);
        assert_eq!(closed.time_closed, Some(at()));
        assert!(table.iter().all(|p| p.balance.is_zero() && p.is_settled()));
        assert_eq!(ledger.pending().count(), 0);
        assert_eq!(ledger.closed().len(), 1);
    }

    #[test]
    fn closing_unknown_or_closed_id_is_ignored() {
        let mut table = table(&[-500, 500]);
        let mut ledger = ledger();
        ledger.add(tx(0, 0, 1, 500)).unwrap();
        let id = Id::new(IdKind::Transaction, 0);
        ledger.close(&id, &mut table, at()).unwrap();

        assert_eq!(ledger.close(&id, &mut table, at()).unwrap(), None);
        assert_eq!(
            ledger.close(&Id::new(IdKind::Transaction, 9), &mut table, at()).unwrap(),
            None
        );
        assert!(table.iter().all(|p| p.balance.is_zero()));
    }

    #[test]
    fn replayed_plan_is_dropped() {
        let table = table(&[-1000, 400, 600]);
        let mut ids = IdAllocator::new();
        let mut ledger = ledger();

        let first = plan_settlement(&table.snapshot(), &mut ids, at()).unwrap();
        assert!(ledger.record_plan(first).unwrap().is_empty());
        let second = plan_settlement(&table.snapshot(), &mut ids, at()).unwrap();
        let dropped = ledger.record_plan(second).unwrap();

        assert_eq!(dropped.len(), 2);
        assert_eq!(ledger.pending().count(), 2);
    }

    #[test]
    fn add_of_an_old_event_is_ignored() {
        let mut ledger = ledger();
        let old = EventId::from_uuid(uuid::Uuid::from_u128(1));
        let new = EventId::from_uuid(uuid::Uuid::from_u128(2));
        assert!(ledger.begin_event(old));
        ledger.add(tx(0, 0, 1, 100).with_event(old)).unwrap();
        assert!(ledger.begin_event(new));
        assert!(!ledger.begin_event(old));

        assert!(!ledger.add(tx(1, 0, 1, 100).with_event(old)).unwrap());
        assert!(ledger.add(tx(2, 0, 1, 100).with_event(new)).unwrap());
        assert_eq!(ledger.pending().count(), 2);
    }

    #[test]
    fn fully_closed_event_can_be_planned_again() {
        let mut table = table(&[-1000, 1000]);
        let mut ids = IdAllocator::new();
        let mut ledger = ledger();
        let plan = plan_settlement(&table.snapshot(), &mut ids, at()).unwrap();
        let event_id = plan.event_id;
        ledger.record_plan(plan).unwrap();
        assert!(ledger.is_applied(&event_id));

        ledger.close(&Id::new(IdKind::Transaction, 0), &mut table, at()).unwrap();
        assert!(!ledger.is_applied(&event_id));
    }

    #[test]
    fn member_transactions_filters_by_participant_and_event() {
        let mut ledger = ledger();
        let old = EventId::from_uuid(uuid::Uuid::from_u128(1));
        let new = EventId::from_uuid(uuid::Uuid::from_u128(2));
        ledger.begin_event(old);
        ledger.add(tx(0, 0, 1, 100).with_event(old)).unwrap();
        ledger.add(tx(1, 2, 1, 100).with_event(old)).unwrap();
        ledger.begin_event(new);
        ledger.add(tx(2, 1, 0, 50).with_event(new)).unwrap();

        let seqs = |current_only| -> Vec<u32> {
            ledger
                .member_transactions(&mm(0), current_only)
                .iter()
                .map(|t| t.id.seq())
                .collect()
        };
        assert_eq!(seqs(false), [0, 2]);
        assert_eq!(seqs(true), [2]);
        assert!(ledger.member_transactions(&mm(7), false).is_empty());
    }

    #[test]
    fn effective_snapshot_counts_pending_transfers() {
        let table = table(&[-1500, 1500]);
        let mut ledger = ledger();
        ledger.add(tx(0, 0, 1, 1000)).unwrap();
        let snapshot = ledger.effective_snapshot(&table);
        assert_eq!(
            snapshot.entries(),
            [(mm(0), Money::new(-500)), (mm(1), Money::new(500))]
        );
    }

    #[test]
    fn records_reload_with_applied_events() {
        let mut table = table(&[-1000, 400, 600]);
        let mut ids = IdAllocator::new();
        let mut ledger = ledger();
        let plan = plan_settlement(&table.snapshot(), &mut ids, at()).unwrap();
        let event_id = plan.event_id;
        ledger.record_plan(plan).unwrap();
        ledger.close(&Id::new(IdKind::Transaction, 0), &mut table, at()).unwrap();

        let reloaded = PendingTransactions::from_records(
            Id::new(IdKind::List, 0),
            &table,
            ledger.pending_records(),
            ledger.unpersisted_closed(),
        )
        .unwrap();
        assert!(reloaded.is_applied(&event_id));
        assert_eq!(reloaded.pending().count(), 1);
        assert_eq!(reloaded.closed().len(), 1);
        assert!(reloaded.unpersisted_closed().is_empty());
    }

    #[test]
    fn closed_record_in_pending_file_is_rejected() {
        let mut closed = tx(0, 0, 1, 100);
        closed.close(at());
        let result = PendingTransactions::from_records(
            Id::new(IdKind::List, 0),
            &table(&[0, 0]),
            vec![TransactionRecord::from(&closed)],
            Vec::new(),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn pending_record_naming_a_stranger_is_rejected() {
        let table = table(&[-100, 100]);
        let stranger = tx(0, 0, 7, 100);
        let result = PendingTransactions::from_records(
            Id::new(IdKind::List, 0),
            &table,
            vec![TransactionRecord::from(&stranger)],
            Vec::new(),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));

        // History may still name people who left.
        let mut gone = tx(1, 0, 7, 100);
        gone.close(at());
        let loaded = PendingTransactions::from_records(
            Id::new(IdKind::List, 0),
            &table,
            Vec::new(),
            vec![TransactionRecord::from(&gone)],
        )
        .unwrap();
        assert_eq!(loaded.closed().len(), 1);
    }
}
