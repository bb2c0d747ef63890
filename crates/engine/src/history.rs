//! Undo/redo log of an expense list.
//!
//! Each reversible mutation is stored as a [`Command`] that carries enough
//! data to be replayed in both directions. The list applies commands; the log
//! only orders them.

use serde::{Deserialize, Serialize};

use crate::{list::Expense, participants::Participant};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    AddItem {
        item: Expense,
    },
    RemoveItem {
        index: usize,
        item: Expense,
    },
    EditItem {
        before: Expense,
        after: Expense,
    },
    AddMember {
        participant: Participant,
    },
    RemoveMember {
        index: usize,
        participant: Participant,
    },
}

impl Command {
    pub fn describe(&self) -> String {
        match self {
            Self::AddItem { item } => format!("add item {} ({})", item.name, item.id),
            Self::RemoveItem { item, .. } => format!("remove item {} ({})", item.name, item.id),
            Self::EditItem { after, .. } => format!("edit item {} ({})", after.name, after.id),
            Self::AddMember { participant } => {
                format!("add member {} ({})", participant.name, participant.id)
            }
            Self::RemoveMember { participant, .. } => {
                format!("remove member {} ({})", participant.name, participant.id)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLog {
    done: Vec<Command>,
    undone: Vec<Command>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a freshly applied command. Anything that could be redone is
    /// discarded.
    pub fn record(&mut self, command: Command) {
        self.undone.clear();
        self.done.push(command);
    }

    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    pub(crate) fn take_undo(&mut self) -> Option<Command> {
        self.done.pop()
    }

    pub(crate) fn take_redo(&mut self) -> Option<Command> {
        self.undone.pop()
    }

    /// Puts back a command after a successful undo.
    pub(crate) fn push_undone(&mut self, command: Command) {
        self.undone.push(command);
    }

    /// Puts back a command after a successful redo, or after a failed undo.
    pub(crate) fn push_done(&mut self, command: Command) {
        self.done.push(command);
    }

    pub fn undo_stack(&self) -> &[Command] {
        &self.done
    }
}
