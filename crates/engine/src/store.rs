//! Storage boundary.
//!
//! Every artifact is one JSON document addressed by a relative key such as
//! `lists/ls0001/pending.json`. Backends only move text around; the typed
//! helpers of [`StoreExt`] own the layout and the encoding.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use api_types::{balance::BalanceReport, transaction::TransactionRecord};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Id, IdAllocator, ResultEngine, clock::numerical_timestamp, group::Group, list::ExpenseList,
    ledger::PendingTransactions,
};

const IDS_KEY: &str = "ids.json";
const LISTS_DIR: &str = "lists";
const GROUPS_DIR: &str = "groups";

fn list_key(id: &Id, file: &str) -> String {
    format!("{LISTS_DIR}/{id}/{file}")
}

fn group_key(id: &Id) -> String {
    format!("{GROUPS_DIR}/{id}/info.json")
}

pub trait Store: Send + std::fmt::Debug {
    fn read(&self, key: &str) -> ResultEngine<Option<String>>;

    fn write(&mut self, key: &str, contents: &str) -> ResultEngine<()>;

    /// Names of the direct children of `prefix`, sorted.
    fn children(&self, prefix: &str) -> ResultEngine<Vec<String>>;

    /// Deletes `key` and every document below it. Missing keys are fine.
    fn remove(&mut self, key: &str) -> ResultEngine<()>;
}

fn read_json<S, T>(store: &S, key: &str) -> ResultEngine<Option<T>>
where
    S: Store + ?Sized,
    T: DeserializeOwned,
{
    match store.read(key)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn write_json<S, T>(store: &mut S, key: &str, value: &T) -> ResultEngine<()>
where
    S: Store + ?Sized,
    T: Serialize,
{
    let text = serde_json::to_string_pretty(value)?;
    store.write(key, &text)
}

/// Typed access on top of any [`Store`].
pub trait StoreExt {
    fn load_ids(&self) -> ResultEngine<Option<IdAllocator>>;
    fn save_ids(&mut self, ids: &IdAllocator) -> ResultEngine<()>;

    fn list_ids(&self) -> ResultEngine<Vec<Id>>;
    /// Loads a list together with its ledger.
    fn load_list(&self, id: &Id) -> ResultEngine<Option<ExpenseList>>;
    /// Saves the list, its pending transactions, and appends newly closed
    /// transactions to its history.
    fn save_list(&mut self, list: &ExpenseList) -> ResultEngine<()>;
    fn load_history(&self, id: &Id) -> ResultEngine<Vec<TransactionRecord>>;
    /// Writes the list back as it is in memory, history included. Used to
    /// undo a commit that failed halfway.
    fn restore_list(&mut self, list: &ExpenseList) -> ResultEngine<()>;
    /// Deletes every artifact of a list.
    fn forget_list(&mut self, id: &Id) -> ResultEngine<()>;

    fn group_ids(&self) -> ResultEngine<Vec<Id>>;
    fn load_group(&self, id: &Id) -> ResultEngine<Option<Group>>;
    fn save_group(&mut self, group: &Group) -> ResultEngine<()>;
    fn forget_group(&mut self, id: &Id) -> ResultEngine<()>;

    /// Stores a timestamped balance report and returns its key.
    fn save_report(
        &mut self,
        owner: &Id,
        at: DateTime<Utc>,
        report: &BalanceReport,
    ) -> ResultEngine<String>;
}

impl<S: Store + ?Sized> StoreExt for S {
    fn load_ids(&self) -> ResultEngine<Option<IdAllocator>> {
        read_json(self, IDS_KEY)
    }

    fn save_ids(&mut self, ids: &IdAllocator) -> ResultEngine<()> {
        write_json(self, IDS_KEY, ids)
    }

    fn list_ids(&self) -> ResultEngine<Vec<Id>> {
        parse_ids(self.children(LISTS_DIR)?)
    }

    fn load_list(&self, id: &Id) -> ResultEngine<Option<ExpenseList>> {
        let Some(mut list) = read_json::<_, ExpenseList>(self, &list_key(id, "info.json"))? else {
            return Ok(None);
        };
        let pending: Vec<TransactionRecord> = read_json(self, &list_key(id, "pending.json"))?
            .unwrap_or_default();
        let history = self.load_history(id)?;
        let ledger = PendingTransactions::from_records(list.id, list.participants(), pending, history)?;
        list.set_ledger(ledger);
        Ok(Some(list))
    }

    fn save_list(&mut self, list: &ExpenseList) -> ResultEngine<()> {
        write_json(self, &list_key(&list.id, "info.json"), list)?;
        write_json(
            self,
            &list_key(&list.id, "pending.json"),
            &list.ledger().pending_records(),
        )?;
        let fresh = list.ledger().unpersisted_closed();
        if !fresh.is_empty() {
            let mut history = self.load_history(&list.id)?;
            history.extend(fresh);
            write_json(self, &list_key(&list.id, "history.json"), &history)?;
        }
        Ok(())
    }

    fn load_history(&self, id: &Id) -> ResultEngine<Vec<TransactionRecord>> {
        Ok(read_json(self, &list_key(id, "history.json"))?
            .unwrap_or_default())
    }

    fn restore_list(&mut self, list: &ExpenseList) -> ResultEngine<()> {
        write_json(self, &list_key(&list.id, "info.json"), list)?;
        write_json(
            self,
            &list_key(&list.id, "pending.json"),
            &list.ledger().pending_records(),
        )?;
        let history: Vec<TransactionRecord> = list
            .ledger()
            .closed()
            .iter()
            .map(TransactionRecord::from)
            .collect();
        write_json(self, &list_key(&list.id, "history.json"), &history)
    }

    fn forget_list(&mut self, id: &Id) -> ResultEngine<()> {
        self.remove(&format!("{LISTS_DIR}/{id}"))
    }

    fn group_ids(&self) -> ResultEngine<Vec<Id>> {
        parse_ids(self.children(GROUPS_DIR)?)
    }

    fn load_group(&self, id: &Id) -> ResultEngine<Option<Group>> {
        read_json(self, &group_key(id))
    }

    fn save_group(&mut self, group: &Group) -> ResultEngine<()> {
        write_json(self, &group_key(&group.id), group)
    }

    fn forget_group(&mut self, id: &Id) -> ResultEngine<()> {
        self.remove(&format!("{GROUPS_DIR}/{id}"))
    }

    fn save_report(
        &mut self,
        owner: &Id,
        at: DateTime<Utc>,
        report: &BalanceReport,
    ) -> ResultEngine<String> {
        let dir = if owner.kind() == crate::IdKind::Group {
            GROUPS_DIR
        } else {
            LISTS_DIR
        };
        let key = format!(
            "{dir}/{owner}/balance_summaries/balance_summary_{}.json",
            numerical_timestamp(at)
        );
        write_json(self, &key, report)?;
        Ok(key)
    }
}

fn parse_ids(names: Vec<String>) -> ResultEngine<Vec<Id>> {
    names.iter().map(|name| name.parse()).collect()
}

/// One file per artifact under a data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> ResultEngine<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!("json store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Store for JsonStore {
    fn read(&self, key: &str) -> ResultEngine<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, key: &str, contents: &str) -> ResultEngine<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Atomic replace.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn children(&self, prefix: &str) -> ResultEngine<Vec<String>> {
        let entries = match fs::read_dir(self.path(prefix)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&mut self, key: &str) -> ResultEngine<()> {
        let path = self.path(key);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Same documents as [`JsonStore`], kept in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }
}

impl Store for MemoryStore {
    fn read(&self, key: &str) -> ResultEngine<Option<String>> {
        Ok(self.documents.get(key).cloned())
    }

    fn write(&mut self, key: &str, contents: &str) -> ResultEngine<()> {
        self.documents.insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn children(&self, prefix: &str) -> ResultEngine<Vec<String>> {
        let prefix = format!("{prefix}/");
        let mut names: Vec<String> = self
            .documents
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_once('/').map(|(child, _)| child.to_string()))
            .collect();
        names.dedup();
        Ok(names)
    }

    fn remove(&mut self, key: &str) -> ResultEngine<()> {
        let below = format!("{key}/");
        self.documents
            .retain(|stored, _| stored != key && !stored.starts_with(&below));
        Ok(())
    }
}
