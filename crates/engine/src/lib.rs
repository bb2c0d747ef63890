//! Shared-expense engine.
//!
//! Expenses recorded on an [`ExpenseList`] are split across its members and
//! folded into a balance table. Settling a list turns the balances into
//! pending transfers; closing a transfer moves its money back on the table.
//! [`Engine`] wraps lists and groups with storage so every successful
//! operation is persisted.

pub use clock::{Clock, FixedClock, SystemClock};
pub use commands::{ExpenseCmd, MemberCmd, SplitSpec};
pub use error::EngineError;
pub use group::Group;
pub use history::{Command, CommandLog};
pub use ids::{Id, IdAllocator, IdKind};
pub use ledger::PendingTransactions;
pub use list::{Expense, ExpenseList, ItemEdit, NewExpense};
pub use money::Money;
pub use ops::{Engine, EngineBuilder};
pub use participants::{Participant, Participants};
pub use settlement::{
    BalanceSnapshot, EventId, SettlementPlan, plan_settlement, plan_settlement_for_event,
};
pub use split::{SplitPolicy, allocate};
pub use store::{JsonStore, MemoryStore, Store, StoreExt};
pub use summary::SummaryKind;
pub use transactions::Transaction;

mod clock;
mod commands;
mod error;
mod group;
mod history;
mod ids;
mod ledger;
mod list;
mod money;
mod ops;
mod participants;
pub mod settlement;
pub mod split;
mod store;
pub mod summary;
mod transactions;

pub type ResultEngine<T> = Result<T, EngineError>;
