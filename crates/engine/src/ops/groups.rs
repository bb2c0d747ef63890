use crate::{EngineError, Id, IdKind, MemberCmd, ResultEngine, group::Group};

use super::{Engine, normalize_required_name, participant_for};

impl Engine {
    /// Create an empty group.
    pub fn new_group(&mut self, name: &str) -> ResultEngine<Id> {
        let name = normalize_required_name(name, "group")?;
        self.apply_and_persist(|state, _, dirty| {
            if state.groups.values().any(|group| group.name == name) {
                return Err(EngineError::ExistingKey(name));
            }
            let group = Group::new(state.ids.next_id(IdKind::Group), name)?;
            let id = group.id;
            tracing::info!("created group {} ({id})", group.name);
            state.groups.insert(id, group);
            dirty.group(id);
            Ok(id)
        })
    }

    /// Add a person to a group roster.
    pub fn add_group_member(&mut self, group: &str, cmd: MemberCmd) -> ResultEngine<Id> {
        self.apply_and_persist(|state, _, dirty| {
            let group_id = state.resolve_group(group)?;
            let participant = participant_for(&mut state.ids, &cmd, None)?;
            let id = participant.id;
            state.group_mut(&group_id)?.add_member(participant)?;
            dirty.group(group_id);
            Ok(id)
        })
    }

    /// Remove a person from a group roster. They must not belong to any of
    /// the group's lists.
    pub fn remove_group_member(&mut self, group: &str, member: &str) -> ResultEngine<bool> {
        self.apply_and_persist(|state, _, dirty| {
            let group_id = state.resolve_group(group)?;
            let target = state
                .groups
                .get_mut(&group_id)
                .ok_or_else(|| EngineError::KeyNotFound(group_id.to_string()))?;
            let Ok(participant) = target.members().resolve(member) else {
                tracing::warn!("{member} is not a member of group {}", target.name);
                return Ok(false);
            };
            let member_id = participant.id;
            let lists: Vec<_> = state.lists.values().collect();
            let removed = target.remove_member(&member_id, &lists)?.is_some();
            dirty.group(group_id);
            Ok(removed)
        })
    }

    /// Move an existing list into a group.
    pub fn add_list_to_group(&mut self, group: &str, list: &str) -> ResultEngine<bool> {
        self.apply_and_persist(|state, _, dirty| {
            let group_id = state.resolve_group(group)?;
            let list_id = state.resolve_list(list)?;
            let target = state
                .lists
                .get(&list_id)
                .ok_or_else(|| EngineError::KeyNotFound(list_id.to_string()))?;
            let added = state
                .groups
                .get_mut(&group_id)
                .ok_or_else(|| EngineError::KeyNotFound(group_id.to_string()))?
                .add_list(target)?;
            if added {
                state.list_mut(&list_id)?.group_id = Some(group_id);
                dirty.list(list_id);
                dirty.group(group_id);
            }
            Ok(added)
        })
    }

    /// Take a list out of its group. The list keeps its members.
    pub fn remove_list_from_group(&mut self, group: &str, list: &str) -> ResultEngine<bool> {
        self.apply_and_persist(|state, _, dirty| {
            let group_id = state.resolve_group(group)?;
            let list_id = state.resolve_list(list)?;
            let removed = state.group_mut(&group_id)?.remove_list(&list_id);
            if removed {
                state.list_mut(&list_id)?.group_id = None;
                dirty.list(list_id);
                dirty.group(group_id);
            }
            Ok(removed)
        })
    }
}
