//! Groups: a roster of people and the expense lists they share.
//!
//! Money never lives on the group itself. Each list settles on its own and
//! the group only aggregates their balances for reporting.

use serde::{Deserialize, Serialize};

use crate::{
    EngineError, Id, IdKind, ResultEngine,
    list::ExpenseList,
    participants::{Participant, Participants},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Id,
    pub name: String,
    members: Participants,
    lists: Vec<Id>,
}

impl Group {
    pub fn new(id: Id, name: impl Into<String>) -> ResultEngine<Self> {
        id.expect_kind(IdKind::Group)?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EngineError::Validation(
                "group name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            name,
            members: Participants::new(),
            lists: Vec::new(),
        })
    }

    pub fn members(&self) -> &Participants {
        &self.members
    }

    pub fn list_ids(&self) -> &[Id] {
        &self.lists
    }

    pub fn add_member(&mut self, participant: Participant) -> ResultEngine<bool> {
        self.members.add(participant)
    }

    /// Removes a member that none of `lists` contains.
    pub fn remove_member(
        &mut self,
        id: &Id,
        lists: &[&ExpenseList],
    ) -> ResultEngine<Option<Participant>> {
        if let Some(list) = lists
            .iter()
            .find(|list| self.lists.contains(&list.id) && list.participants().contains(id))
        {
            return Err(EngineError::Validation(format!(
                "cannot remove {} from group {}: still a member of list {} ({})",
                self.members.name_of(id),
                self.name,
                list.name,
                list.id
            )));
        }
        self.members.remove(id)
    }

    /// Adds a list whose members all belong to the group.
    pub fn add_list(&mut self, list: &ExpenseList) -> ResultEngine<bool> {
        if self.lists.contains(&list.id) {
            tracing::warn!("list {} is already part of group {}", list.id, self.id);
            return Ok(false);
        }
        if let Some(stranger) = list
            .participants()
            .iter()
            .find(|p| !self.members.contains(&p.id))
        {
            return Err(EngineError::Validation(format!(
                "{} ({}) of list {} is not a member of group {}",
                stranger.name, stranger.id, list.name, self.name
            )));
        }
        if let Some(owner) = list.group_id
            && owner != self.id
        {
            return Err(EngineError::Validation(format!(
                "list {} already belongs to group {owner}",
                list.id
            )));
        }
        self.lists.push(list.id);
        Ok(true)
    }

    pub fn remove_list(&mut self, id: &Id) -> bool {
        let Some(index) = self.lists.iter().position(|list| list == id) else {
            tracing::warn!("list {id} is not part of group {}", self.id);
            return false;
        };
        self.lists.remove(index);
        true
    }

    /// Roster with balances and spending summed over `lists`.
    ///
    /// Lists that are not part of the group are skipped.
    pub fn aggregate(&self, lists: &[&ExpenseList]) -> Participants {
        let mut totals = Participants::new();
        for member in self.members.iter() {
            let mut blank = Participant::new(member.id, member.name.clone());
            blank.user_id = member.user_id;
            if let Err(err) = totals.add(blank) {
                tracing::warn!("skipping {} in group report: {err}", member.id);
            }
        }
        for list in lists.iter().filter(|list| self.lists.contains(&list.id)) {
            for participant in list.participants().iter() {
                if let Ok(total) = totals.get_mut(&participant.id) {
                    total.apply_delta(participant.balance);
                    total.add_spent(participant.spent_total);
                }
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdAllocator, Money, list::NewExpense, split::SplitPolicy};
    use chrono::Utc;

    struct World {
        ids: IdAllocator,
        group: Group,
        roster: Vec<Participant>,
    }

    fn world(names: &[&str]) -> World {
        let mut ids = IdAllocator::new();
        let mut group = Group::new(ids.next_id(IdKind::Group), "Flat").unwrap();
        let mut roster = Vec::new();
        for name in names {
            let member = Participant::new(ids.next_id(IdKind::Member), *name);
            group.add_member(member.clone()).unwrap();
            roster.push(member);
        }
        World { ids, group, roster }
    }

    impl World {
        fn list(&mut self, name: &str, members: &[usize]) -> ExpenseList {
            let mut list = ExpenseList::new(self.ids.next_id(IdKind::List), name).unwrap();
            for i in members {
                list.add_member(self.roster[*i].clone()).unwrap();
            }
            list
        }
    }

    #[test]
    fn list_members_must_be_group_members() {
        let mut w = world(&["Ann", "Bob"]);
        let mut list = w.list("Bills", &[0, 1]);
        list.add_member(Participant::new(w.ids.next_id(IdKind::Member), "Eve"))
            .unwrap();
        assert!(matches!(
            w.group.add_list(&list),
            Err(EngineError::Validation(_))
        ));

        let ok = w.list("Food", &[0]);
        assert!(w.group.add_list(&ok).unwrap());
        assert!(!w.group.add_list(&ok).unwrap());
    }

    #[test]
    fn member_of_a_list_cannot_leave_the_group() {
        let mut w = world(&["Ann", "Bob", "Cid"]);
        let list = w.list("Bills", &[0, 1]);
        w.group.add_list(&list).unwrap();

        let bob = w.roster[1].id;
        let cid = w.roster[2].id;
        assert!(w.group.remove_member(&bob, &[&list]).is_err());
        assert!(w.group.remove_member(&cid, &[&list]).unwrap().is_some());
    }

    #[test]
    fn aggregate_sums_over_the_group_lists_only() {
        let mut w = world(&["Ann", "Bob"]);
        let mut bills = w.list("Bills", &[0, 1]);
        let mut other = w.list("Other", &[0, 1]);
        w.group.add_list(&bills).unwrap();

        let (ann, bob) = (w.roster[0].id, w.roster[1].id);
        for list in [&mut bills, &mut other] {
            let id = w.ids.next_id(IdKind::ListItem);
            let new = NewExpense {
                name: "Power".to_string(),
                payer: ann,
                amount: Money::new(1000),
                participants: vec![ann, bob],
                policy: SplitPolicy::Equal,
            };
            list.add_item(id, new, Utc::now()).unwrap();
        }

        let totals = w.group.aggregate(&[&bills, &other]);
        assert_eq!(totals.get_by_id(&ann).unwrap().balance, Money::new(500));
        assert_eq!(totals.get_by_id(&ann).unwrap().spent_total, Money::new(1000));
        assert_eq!(totals.get_by_id(&bob).unwrap().balance, Money::new(-500));
        assert!(!totals.get_by_id(&bob).unwrap().is_settled());
    }

    #[test]
    fn remove_list_warns_on_unknown() {
        let mut w = world(&["Ann"]);
        let list = w.list("Bills", &[0]);
        w.group.add_list(&list).unwrap();
        assert!(w.group.remove_list(&list.id));
        assert!(!w.group.remove_list(&list.id));
    }
}
