use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::{
    EngineError, Id, IdAllocator, IdKind, ResultEngine,
    clock::{Clock, SystemClock},
    group::Group,
    list::ExpenseList,
    participants::Participant,
    store::{MemoryStore, Store, StoreExt},
};

mod groups;
mod lists;
mod reports;
mod settle;

/// Everything the engine keeps in memory.
#[derive(Clone, Debug, Default)]
pub(crate) struct State {
    lists: BTreeMap<Id, ExpenseList>,
    groups: BTreeMap<Id, Group>,
    ids: IdAllocator,
}

impl State {
    fn list(&self, id: &Id) -> ResultEngine<&ExpenseList> {
        self.lists
            .get(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    fn list_mut(&mut self, id: &Id) -> ResultEngine<&mut ExpenseList> {
        self.lists
            .get_mut(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    fn group(&self, id: &Id) -> ResultEngine<&Group> {
        self.groups
            .get(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    fn group_mut(&mut self, id: &Id) -> ResultEngine<&mut Group> {
        self.groups
            .get_mut(id)
            .ok_or_else(|| EngineError::KeyNotFound(id.to_string()))
    }

    /// Finds a list by id (`ls0002`) or by name.
    fn resolve_list(&self, key: &str) -> ResultEngine<Id> {
        if let Ok(id) = key.parse::<Id>()
            && self.lists.contains_key(&id)
        {
            return Ok(id);
        }
        self.lists
            .values()
            .find(|list| list.name == key)
            .map(|list| list.id)
            .ok_or_else(|| EngineError::KeyNotFound(key.to_string()))
    }

    /// Finds a group by id (`gr0001`) or by name.
    fn resolve_group(&self, key: &str) -> ResultEngine<Id> {
        if let Ok(id) = key.parse::<Id>()
            && self.groups.contains_key(&id)
        {
            return Ok(id);
        }
        self.groups
            .values()
            .find(|group| group.name == key)
            .map(|group| group.id)
            .ok_or_else(|| EngineError::KeyNotFound(key.to_string()))
    }

    /// The lists of a group, in id order.
    fn lists_of(&self, group: &Group) -> Vec<&ExpenseList> {
        group
            .list_ids()
            .iter()
            .filter_map(|id| self.lists.get(id))
            .collect()
    }
}

/// What a unit of work touched and must write back.
#[derive(Debug, Default)]
pub(crate) struct Dirty {
    lists: BTreeSet<Id>,
    groups: BTreeSet<Id>,
}

impl Dirty {
    fn list(&mut self, id: Id) {
        self.lists.insert(id);
    }

    fn group(&mut self, id: Id) {
        self.groups.insert(id);
    }
}

#[derive(Debug)]
pub struct Engine {
    state: State,
    store: Box<dyn Store>,
    clock: Box<dyn Clock>,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Runs `mutation` as one unit of work.
    ///
    /// On success every list and group it marked dirty is written through the
    /// store, followed by the id allocator. When the mutation fails nothing is
    /// written; when a write fails the store is put back as far as it goes.
    /// Either way the in-memory state, ids included, is what it was before.
    fn apply_and_persist<T>(
        &mut self,
        mutation: impl FnOnce(&mut State, DateTime<Utc>, &mut Dirty) -> ResultEngine<T>,
    ) -> ResultEngine<T> {
        let before = self.state.clone();
        let now = self.clock.now();
        let mut dirty = Dirty::default();
        let value = match mutation(&mut self.state, now, &mut dirty) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!("unit of work aborted: {err}");
                self.state = before;
                return Err(err);
            }
        };
        if let Err(err) = self.persist(&dirty) {
            tracing::error!("commit failed, rolling back: {err}");
            self.state = before;
            if let Err(restore) = self.restore(&dirty) {
                tracing::error!("store not restored after failed commit: {restore}");
            }
            return Err(err);
        }
        Ok(value)
    }

    /// Writes the current state of everything `dirty` names, deleting what
    /// no longer exists.
    fn restore(&mut self, dirty: &Dirty) -> ResultEngine<()> {
        for id in &dirty.lists {
            match self.state.lists.get(id) {
                Some(list) => self.store.restore_list(list)?,
                None => self.store.forget_list(id)?,
            }
        }
        for id in &dirty.groups {
            match self.state.groups.get(id) {
                Some(group) => self.store.save_group(group)?,
                None => self.store.forget_group(id)?,
            }
        }
        self.store.save_ids(&self.state.ids)
    }

    fn persist(&mut self, dirty: &Dirty) -> ResultEngine<()> {
        for id in &dirty.lists {
            let list = self.state.list_mut(id)?;
            self.store.save_list(list)?;
            list.ledger_mut().mark_persisted();
        }
        for id in &dirty.groups {
            self.store.save_group(self.state.group(id)?)?;
        }
        self.store.save_ids(&self.state.ids)?;
        tracing::debug!(
            "committed {} list(s) and {} group(s)",
            dirty.lists.len(),
            dirty.groups.len()
        );
        Ok(())
    }

    pub fn lists(&self) -> impl Iterator<Item = &ExpenseList> {
        self.state.lists.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.state.groups.values()
    }

    /// A list by id or name.
    pub fn list(&self, key: &str) -> ResultEngine<&ExpenseList> {
        self.state.list(&self.state.resolve_list(key)?)
    }

    /// A group by id or name.
    pub fn group(&self, key: &str) -> ResultEngine<&Group> {
        self.state.group(&self.state.resolve_group(key)?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn normalize_required_name(value: &str, label: &str) -> ResultEngine<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!(
            "{label} name must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

/// Builds a participant for `cmd`, reusing `known` when the person already
/// exists elsewhere (a group roster).
fn participant_for(
    ids: &mut IdAllocator,
    cmd: &crate::MemberCmd,
    known: Option<&Participant>,
) -> ResultEngine<Participant> {
    let name = normalize_required_name(&cmd.name, "member")?;
    let mut participant = match known {
        Some(existing) => {
            let mut p = Participant::new(existing.id, existing.name.clone());
            p.user_id = existing.user_id;
            p.sharing_weights = existing.sharing_weights.clone();
            p
        }
        None => Participant::new(ids.next_id(IdKind::Member), name),
    };
    if let Some(user_id) = cmd.user_id {
        participant.connect_user(user_id)?;
    }
    for (weight_name, value) in &cmd.weights {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EngineError::Validation(format!(
                "sharing weight \"{weight_name}\" of {} is negative: {value}",
                participant.name
            )));
        }
        participant
            .sharing_weights
            .insert(weight_name.clone(), *value);
    }
    Ok(participant)
}

pub struct EngineBuilder {
    store: Box<dyn Store>,
    clock: Box<dyn Clock>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            clock: Box::new(SystemClock),
        }
    }
}

impl EngineBuilder {
    /// Pass the storage backend. Defaults to an in-memory store.
    pub fn store(mut self, store: impl Store + 'static) -> EngineBuilder {
        self.store = Box::new(store);
        self
    }

    /// Pass the timestamp source. Defaults to the wall clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> EngineBuilder {
        self.clock = Box::new(clock);
        self
    }

    /// Construct `Engine`, loading every list and group the store holds.
    pub fn build(self) -> ResultEngine<Engine> {
        let mut state = State {
            ids: self.store.load_ids()?.unwrap_or_default(),
            ..State::default()
        };
        for id in self.store.list_ids()? {
            let Some(list) = self.store.load_list(&id)? else {
                continue;
            };
            list.reserve_ids(&mut state.ids);
            state.lists.insert(id, list);
        }
        for id in self.store.group_ids()? {
            let Some(group) = self.store.load_group(&id)? else {
                continue;
            };
            state.ids.reserve(group.id);
            for member in group.members().ids() {
                state.ids.reserve(member);
            }
            state.groups.insert(id, group);
        }
        tracing::info!(
            "engine ready: {} list(s), {} group(s)",
            state.lists.len(),
            state.groups.len()
        );
        Ok(Engine {
            state,
            store: self.store,
            clock: self.clock,
        })
    }
}
