//! Transaction primitives.
//!
//! A [`Transaction`] is a proposed transfer from a debitor (`sender`) to a
//! creditor (`receiver`). It starts pending and becomes closed once the
//! ledger applies it to the balance table; closed transactions never change
//! again.

use api_types::transaction::TransactionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, Id, IdKind, Money, ResultEngine, settlement::EventId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub event_id: Option<EventId>,
    pub sender: Id,
    pub receiver: Id,
    pub amount: Money,
    pub time_created: DateTime<Utc>,
    pub time_closed: Option<DateTime<Utc>>,
    pub pending: bool,
}

impl Transaction {
    pub fn new(
        id: Id,
        sender: Id,
        receiver: Id,
        amount: Money,
        time_created: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        id.expect_kind(IdKind::Transaction)?;
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(format!(
                "transaction amount must be > 0, got {amount}"
            )));
        }
        if sender == receiver {
            return Err(EngineError::Validation(format!(
                "transaction {id} sends money from {sender} to itself"
            )));
        }
        Ok(Self {
            id,
            event_id: None,
            sender,
            receiver,
            amount,
            time_created,
            time_closed: None,
            pending: true,
        })
    }

    #[must_use]
    pub fn with_event(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn involves(&self, participant: &Id) -> bool {
        self.sender == *participant || self.receiver == *participant
    }

    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.pending = false;
        self.time_closed = Some(at);
    }
}

impl From<&Transaction> for TransactionRecord {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            event_id: tx.event_id.map(EventId::into_uuid),
            sender_id: tx.sender.to_string(),
            receiver_id: tx.receiver.to_string(),
            amount: tx.amount.cents(),
            time_created: tx.time_created,
            time_closed: tx.time_closed,
            pending: tx.pending,
        }
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = EngineError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let mut tx = Transaction::new(
            record.id.parse()?,
            record.sender_id.parse()?,
            record.receiver_id.parse()?,
            Money::new(record.amount),
            record.time_created,
        )?;
        tx.event_id = record.event_id.map(EventId::from_uuid);
        tx.time_closed = record.time_closed;
        tx.pending = record.pending;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn rejects_non_positive_amounts_and_self_transfers() {
        let id = Id::new(IdKind::Transaction, 0);
        let a = Id::new(IdKind::Member, 0);
        let b = Id::new(IdKind::Member, 1);
        assert!(Transaction::new(id, a, b, Money::ZERO, at()).is_err());
        assert!(Transaction::new(id, a, b, Money::new(-5), at()).is_err());
        assert!(Transaction::new(id, a, a, Money::new(5), at()).is_err());
        assert!(Transaction::new(a, a, b, Money::new(5), at()).is_err());
    }

    #[test]
    fn record_conversion_keeps_every_field() {
        let mut tx = Transaction::new(
            Id::new(IdKind::Transaction, 3),
            Id::new(IdKind::Member, 0),
            Id::new(IdKind::Member, 1),
            Money::new(1250),
            at(),
        )
        .unwrap()
        .with_event(EventId::from_uuid(uuid::Uuid::from_u128(7)));
        tx.close(at());

        let record = TransactionRecord::from(&tx);
        assert_eq!(record.id, "tr0003");
        assert_eq!(record.sender_id, "mm0000");
        assert_eq!(record.amount, 1250);
        assert!(!record.pending);

        let back = Transaction::try_from(record).unwrap();
        assert_eq!(back, tx);
    }
}
