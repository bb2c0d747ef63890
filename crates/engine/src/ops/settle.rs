use api_types::transaction::TransactionRecord;

use crate::{EngineError, Id, IdKind, ResultEngine};

use super::Engine;

impl Engine {
    /// Plan the transfers that settle a list and record them as pending.
    ///
    /// Returns the newly recorded transactions; an unchanged list that was
    /// already settled returns none.
    pub fn settle_up(&mut self, list: &str) -> ResultEngine<Vec<TransactionRecord>> {
        self.apply_and_persist(|state, now, dirty| {
            let list_id = state.resolve_list(list)?;
            let target = state
                .lists
                .get_mut(&list_id)
                .ok_or_else(|| EngineError::KeyNotFound(list_id.to_string()))?;
            let planned = target.settle_up(&mut state.ids, now)?;
            dirty.list(list_id);
            Ok(planned.iter().map(TransactionRecord::from).collect())
        })
    }

    /// Close a pending transaction, applying it to the balances.
    ///
    /// Returns `None` when the id was not pending.
    pub fn close_transaction(
        &mut self,
        list: &str,
        transaction: &str,
    ) -> ResultEngine<Option<TransactionRecord>> {
        let tx_id = parse_transaction_id(transaction)?;
        self.apply_and_persist(|state, now, dirty| {
            let list_id = state.resolve_list(list)?;
            let closed = state.list_mut(&list_id)?.close_transaction(&tx_id, now)?;
            if closed.is_some() {
                dirty.list(list_id);
            }
            Ok(closed.as_ref().map(TransactionRecord::from))
        })
    }

    /// Close every pending transaction a member sends or receives.
    pub fn close_member_transactions(
        &mut self,
        list: &str,
        member: &str,
    ) -> ResultEngine<Vec<TransactionRecord>> {
        self.apply_and_persist(|state, now, dirty| {
            let list_id = state.resolve_list(list)?;
            let target = state.list_mut(&list_id)?;
            let member_id = target.participants().resolve(member)?.id;
            let pending: Vec<Id> = target
                .ledger()
                .pending()
                .filter(|tx| tx.involves(&member_id))
                .map(|tx| tx.id)
                .collect();
            let mut closed = Vec::with_capacity(pending.len());
            for id in pending {
                if let Some(tx) = target.close_transaction(&id, now)? {
                    closed.push(TransactionRecord::from(&tx));
                }
            }
            dirty.list(list_id);
            Ok(closed)
        })
    }

    /// Pending transactions of a list, in creation order.
    pub fn pending_transactions(&self, list: &str) -> ResultEngine<Vec<TransactionRecord>> {
        Ok(self
            .list(list)?
            .ledger()
            .pending_records())
    }
}

fn parse_transaction_id(raw: &str) -> ResultEngine<Id> {
    raw.parse::<Id>()?.expect_kind(IdKind::Transaction)
}
