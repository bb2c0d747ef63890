use api_types::balance::BalanceReport;

use crate::{
    ResultEngine,
    store::StoreExt,
    summary::{SummaryKind, group_report, list_report, member_statement},
};

use super::Engine;

impl Engine {
    /// Balance summary of a list or a group.
    pub fn report(&self, kind: SummaryKind, key: &str) -> ResultEngine<BalanceReport> {
        match kind {
            SummaryKind::List => Ok(list_report(self.list(key)?)),
            SummaryKind::Group => {
                let group = self.group(key)?;
                Ok(group_report(group, &self.state.lists_of(group)))
            }
        }
    }

    /// Write a timestamped balance summary through the store and return its
    /// key.
    pub fn save_report(&mut self, kind: SummaryKind, key: &str) -> ResultEngine<String> {
        let report = self.report(kind, key)?;
        let owner = match kind {
            SummaryKind::List => self.state.resolve_list(key)?,
            SummaryKind::Group => self.state.resolve_group(key)?,
        };
        let at = self.clock.now();
        let saved = self.store.save_report(&owner, at, &report)?;
        tracing::info!("balance summary of {owner} saved as {saved}");
        Ok(saved)
    }

    /// Transactions of one member phrased from their side.
    pub fn statement(
        &self,
        list: &str,
        member: &str,
        current_event_only: bool,
    ) -> ResultEngine<Vec<String>> {
        member_statement(self.list(list)?, member, current_event_only)
    }
}
