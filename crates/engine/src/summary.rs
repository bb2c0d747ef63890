//! Balance reports and per-participant statements.

use api_types::balance::{BalanceEntry, BalanceReport};

use crate::{
    Id, ResultEngine, Transaction,
    group::Group,
    list::ExpenseList,
    participants::{Participant, Participants},
};

/// Which report shape the caller wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryKind {
    /// Balance summary of one list, sharing weights included.
    List,
    /// Extended balance summary aggregated over a group's lists.
    Group,
}

impl SummaryKind {
    pub fn entry(self, participant: &Participant) -> BalanceEntry {
        let sharing_weights = match self {
            Self::List => Some(
                participant
                    .sharing_weights
                    .iter()
                    .map(|(name, value)| (name.clone(), value.normalize().to_string()))
                    .collect(),
            ),
            Self::Group => None,
        };
        BalanceEntry {
            name: participant.name.clone(),
            status: participant.status(),
            balance: participant.balance.cents(),
            settled: participant.is_settled(),
            spent_total: participant.spent_total.cents(),
            sharing_weights,
        }
    }

    pub fn report(self, table: &Participants) -> BalanceReport {
        table
            .iter()
            .map(|p| (p.id.to_string(), self.entry(p)))
            .collect()
    }
}

pub fn list_report(list: &ExpenseList) -> BalanceReport {
    SummaryKind::List.report(list.participants())
}

pub fn group_report(group: &Group, lists: &[&ExpenseList]) -> BalanceReport {
    SummaryKind::Group.report(&group.aggregate(lists))
}

/// Human readable line for `tx`, phrased from `viewer`'s side.
///
/// Returns `None` when `viewer` is not part of the transaction.
pub fn describe_transaction(tx: &Transaction, viewer: &Id, names: &Participants) -> Option<String> {
    let sender = names.name_of(&tx.sender);
    let receiver = names.name_of(&tx.receiver);
    let amount = tx.amount;
    let line = match (tx.pending, tx.sender == *viewer, tx.receiver == *viewer) {
        (true, true, _) => format!("{sender} owes {amount} to {receiver}"),
        (true, _, true) => format!("{receiver} will receive {amount} from {sender}"),
        (false, true, _) => format!("{sender} sent {amount} to {receiver}"),
        (false, _, true) => format!("{receiver} received {amount} from {sender}"),
        _ => return None,
    };
    Some(line)
}

/// Every transaction of a list member, oldest first, as statements.
pub fn member_statement(
    list: &ExpenseList,
    name_or_id: &str,
    current_event_only: bool,
) -> ResultEngine<Vec<String>> {
    let viewer = list.participants().resolve(name_or_id)?.id;
    Ok(list
        .ledger()
        .member_transactions(&viewer, current_event_only)
        .into_iter()
        .filter_map(|tx| describe_transaction(tx, &viewer, list.participants()))
        .collect())
}
