use indexmap::IndexMap;

use crate::{
    EngineError, ExpenseCmd, Id, IdKind, MemberCmd, Money, ResultEngine, SplitSpec,
    list::{ExpenseList, ItemEdit, NewExpense},
    participants::Participants,
    split::SplitPolicy,
};

use super::{Engine, normalize_required_name, participant_for};

impl Engine {
    /// Create an expense list, optionally inside a group.
    pub fn new_list(&mut self, name: &str, group: Option<&str>) -> ResultEngine<Id> {
        let name = normalize_required_name(name, "list")?;
        self.apply_and_persist(|state, _, dirty| {
            if state.lists.values().any(|list| list.name == name) {
                return Err(EngineError::ExistingKey(name));
            }
            let group_id = group.map(|key| state.resolve_group(key)).transpose()?;
            let mut list = ExpenseList::new(state.ids.next_id(IdKind::List), name)?;
            if let Some(group_id) = group_id {
                state.group_mut(&group_id)?.add_list(&list)?;
                list.group_id = Some(group_id);
                dirty.group(group_id);
            }
            let id = list.id;
            tracing::info!("created list {} ({id})", list.name);
            state.lists.insert(id, list);
            dirty.list(id);
            Ok(id)
        })
    }

    /// Add a member to a list.
    ///
    /// Lists inside a group only accept people already on the group roster,
    /// and reuse their id.
    pub fn add_list_member(&mut self, list: &str, cmd: MemberCmd) -> ResultEngine<Id> {
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            let group_id = state.list(&list_id)?.group_id;
            let known = match group_id {
                Some(group_id) => {
                    let group = state.group(&group_id)?;
                    let member = group.members().get_by_name(&cmd.name).map_err(|_| {
                        EngineError::Validation(format!(
                            "{} is not a member of group {}, add them there first",
                            cmd.name, group.name
                        ))
                    })?;
                    Some(member.clone())
                }
                None => None,
            };
            let participant = participant_for(&mut state.ids, &cmd, known.as_ref())?;
            let id = participant.id;
            let target = state.list_mut(&list_id)?;
            if !target.add_member(participant)? {
                return Err(EngineError::ExistingKey(cmd.name.clone()));
            }
            dirty.list(list_id);
            Ok(id)
        })
    }

    /// Remove a member from a list. Returns `false` when they were not in it.
    pub fn remove_list_member(&mut self, list: &str, member: &str) -> ResultEngine<bool> {
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            let target = state.list_mut(&list_id)?;
            let Ok(participant) = target.participants().resolve(member) else {
                tracing::warn!("{member} is not a member of {}", target.name);
                return Ok(false);
            };
            let id = participant.id;
            let removed = target.remove_member(&id)?.is_some();
            dirty.list(list_id);
            Ok(removed)
        })
    }

    /// Record a shared expense and split it.
    pub fn add_expense(&mut self, cmd: ExpenseCmd) -> ResultEngine<Id> {
        self.apply_and_persist(|state, now, dirty| {
            let list_id = state.resolve_list(&cmd.list)?;
            let item_id = state.ids.next_id(IdKind::ListItem);
            let target = state.list_mut(&list_id)?;
            let new = resolve_expense(target.participants(), &cmd)?;
            target.add_item(item_id, new, now)?;
            dirty.list(list_id);
            Ok(item_id)
        })
    }

    /// Remove an expense. Returns `false` when it did not exist.
    pub fn remove_item(&mut self, list: &str, item: &str) -> ResultEngine<bool> {
        let item_id = parse_item_id(item)?;
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            let removed = state.list_mut(&list_id)?.remove_item(&item_id)?.is_some();
            if removed {
                dirty.list(list_id);
            }
            Ok(removed)
        })
    }

    pub fn rename_item(&mut self, list: &str, item: &str, name: &str) -> ResultEngine<()> {
        let name = normalize_required_name(name, "item")?;
        self.edit_item(list, item, ItemEdit::Name(name))
    }

    pub fn change_item_amount(
        &mut self,
        list: &str,
        item: &str,
        amount: Money,
    ) -> ResultEngine<()> {
        self.edit_item(list, item, ItemEdit::Amount(amount))
    }

    /// Add a list member to the people sharing an expense.
    pub fn add_item_participant(
        &mut self,
        list: &str,
        item: &str,
        member: &str,
    ) -> ResultEngine<()> {
        let list_id = self.state.resolve_list(list)?;
        let member_id = self.state.list(&list_id)?.participants().resolve(member)?.id;
        self.edit_item(list, item, ItemEdit::AddParticipant(member_id))
    }

    fn edit_item(&mut self, list: &str, item: &str, edit: ItemEdit) -> ResultEngine<()> {
        let item_id = parse_item_id(item)?;
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            state.list_mut(&list_id)?.edit_item(&item_id, edit)?;
            dirty.list(list_id);
            Ok(())
        })
    }

    /// Undo the last item or member change of a list.
    pub fn undo(&mut self, list: &str) -> ResultEngine<Option<String>> {
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            let undone = state.list_mut(&list_id)?.undo()?;
            dirty.list(list_id);
            Ok(undone)
        })
    }

    pub fn redo(&mut self, list: &str) -> ResultEngine<Option<String>> {
        self.apply_and_persist(|state, _, dirty| {
            let list_id = state.resolve_list(list)?;
            let redone = state.list_mut(&list_id)?.redo()?;
            dirty.list(list_id);
            Ok(redone)
        })
    }
}

fn parse_item_id(raw: &str) -> ResultEngine<Id> {
    raw.parse::<Id>()?.expect_kind(IdKind::ListItem)
}

/// Turns the names of an [`ExpenseCmd`] into ids of `table`.
fn resolve_expense(table: &Participants, cmd: &ExpenseCmd) -> ResultEngine<NewExpense> {
    let resolve = |key: &str| table.resolve(key).map(|p| p.id);
    let payer = resolve(&cmd.payer)?;

    let (policy, named): (SplitPolicy, Vec<Id>) = match &cmd.split {
        SplitSpec::Equal => (SplitPolicy::Equal, Vec::new()),
        SplitSpec::Weighted(weight_name) => (
            SplitPolicy::Weighted {
                weight_name: weight_name.clone(),
            },
            Vec::new(),
        ),
        SplitSpec::Percentages(entries) => {
            let mut percentages = IndexMap::with_capacity(entries.len());
            for (key, pct) in entries {
                percentages.insert(resolve(key)?, *pct);
            }
            let named = percentages.keys().copied().collect();
            (SplitPolicy::Percentages { percentages }, named)
        }
        SplitSpec::Amounts(entries) => {
            let mut amounts = IndexMap::with_capacity(entries.len());
            for (key, amount) in entries {
                amounts.insert(resolve(key)?, *amount);
            }
            let named = amounts.keys().copied().collect();
            (SplitPolicy::Amounts { amounts }, named)
        }
    };

    let participants = if !cmd.with.is_empty() {
        cmd.with
            .iter()
            .map(|key| resolve(key))
            .collect::<ResultEngine<Vec<_>>>()?
    } else if !named.is_empty() {
        named
    } else {
        table.ids().collect()
    };

    Ok(NewExpense {
        name: normalize_required_name(&cmd.name, "item")?,
        payer,
        amount: cmd.amount,
        participants,
        policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::Participant;
    use rust_decimal::Decimal;

    fn table() -> Participants {
        let mut table = Participants::new();
        for (seq, name) in ["Ann", "Bob", "Cid"].iter().enumerate() {
            table
                .add(Participant::new(Id::new(IdKind::Member, seq as u32), *name))
                .unwrap();
        }
        table
    }

    #[test]
    fn empty_with_means_everyone() {
        let cmd = ExpenseCmd::new("Trip", "Fuel", "Ann", Money::new(900));
        let new = resolve_expense(&table(), &cmd).unwrap();
        assert_eq!(new.participants.len(), 3);
        assert_eq!(new.payer, Id::new(IdKind::Member, 0));
    }

    #[test]
    fn percentages_name_the_participants() {
        let cmd = ExpenseCmd::new("Trip", "Room", "mm0001", Money::new(900)).split(
            SplitSpec::Percentages(vec![
                ("Ann".to_string(), Decimal::new(5, 1)),
                ("Cid".to_string(), Decimal::new(5, 1)),
            ]),
        );
        let new = resolve_expense(&table(), &cmd).unwrap();
        assert_eq!(
            new.participants,
            [Id::new(IdKind::Member, 0), Id::new(IdKind::Member, 2)]
        );
        assert_eq!(new.policy.method(), "percentages");
    }

    #[test]
    fn unknown_names_fail() {
        let cmd = ExpenseCmd::new("Trip", "Fuel", "Ann", Money::new(900)).with("Zed");
        assert_eq!(
            resolve_expense(&table(), &cmd),
            Err(EngineError::KeyNotFound("Zed".to_string()))
        );
    }

    #[test]
    fn item_ids_must_be_items() {
        assert!(parse_item_id("it0003").is_ok());
        assert!(parse_item_id("mm0003").is_err());
        assert!(parse_item_id("dinner").is_err());
    }
}
