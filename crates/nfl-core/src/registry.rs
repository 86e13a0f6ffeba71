// Arena owning the tables and chains a connection knows about
use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::table::{Family, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(usize);

/// Tables and chains are stored once and referred to by id. Chains point
/// back to their table by [`TableId`]; rules point to their chain by
/// [`ChainId`]. Entries are never removed, so ids stay valid for the life
/// of the registry even after the kernel object is deleted.
#[derive(Debug, Default)]
pub struct Registry {
    tables: Vec<Table>,
    chains: Vec<Chain>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, returning the existing id if one with the same
    /// family and name is known.
    pub fn insert_table(&mut self, table: Table) -> TableId {
        if let Some(id) = self.find_table(table.family, &table.name) {
            return id;
        }
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    /// Register a chain under `table`. A chain with the same name in the
    /// same table is updated in place.
    pub fn insert_chain(&mut self, table: TableId, mut chain: Chain) -> Result<ChainId> {
        if self.table(table).is_none() {
            return Err(Error::IncompleteReference(format!(
                "chain '{}' refers to an unknown table",
                chain.name
            )));
        }
        chain.table = Some(table);

        if let Some(id) = self.find_chain(table, &chain.name) {
            self.chains[id.0] = chain;
            return Ok(id);
        }
        self.chains.push(chain);
        Ok(ChainId(self.chains.len() - 1))
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.0)
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.get(id.0)
    }

    pub fn find_table(&self, family: Family, name: &str) -> Option<TableId> {
        self.tables
            .iter()
            .position(|t| t.family == family && t.name == name)
            .map(TableId)
    }

    pub fn find_chain(&self, table: TableId, name: &str) -> Option<ChainId> {
        self.chains
            .iter()
            .position(|c| c.table == Some(table) && c.name == name)
            .map(ChainId)
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &Table)> {
        self.tables.iter().enumerate().map(|(i, t)| (TableId(i), t))
    }

    pub fn chains_of(&self, table: TableId) -> impl Iterator<Item = (ChainId, &Chain)> {
        self.chains
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.table == Some(table))
            .map(|(i, c)| (ChainId(i), c))
    }

    /// Follow a chain id to the chain and its table
    pub fn resolve_chain(&self, id: ChainId) -> Result<(&Table, &Chain)> {
        let chain = self
            .chain(id)
            .ok_or_else(|| Error::IncompleteReference(format!("unknown chain id {}", id.0)))?;
        let table = chain
            .table
            .and_then(|t| self.table(t))
            .ok_or_else(|| {
                let reason = format!("chain '{}' is not linked to a table", chain.name);
                Error::IncompleteReference(reason)
            })?;
        Ok((table, chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainHook, ChainType};

    #[test]
    fn tables_are_deduplicated_by_identity() {
        let mut registry = Registry::new();
        let a = registry.insert_table(Table::new(Family::Inet, "filter"));
        let b = registry.insert_table(Table::new(Family::Inet, "filter"));
        let c = registry.insert_table(Table::new(Family::Ip, "filter"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn chains_link_back_to_their_table() {
        let mut registry = Registry::new();
        let table = registry.insert_table(Table::new(Family::Inet, "filter"));
        let id = registry
            .insert_chain(table, Chain::base("input", ChainType::Filter, ChainHook::Input, 0))
            .unwrap();

        let (t, c) = registry.resolve_chain(id).unwrap();
        assert_eq!(t.name, "filter");
        assert_eq!(c.name, "input");
        assert_eq!(c.table, Some(table));
        assert_eq!(registry.chains_of(table).count(), 1);
    }

    #[test]
    fn same_chain_name_updates_in_place() {
        let mut registry = Registry::new();
        let table = registry.insert_table(Table::new(Family::Inet, "filter"));
        let first = registry.insert_chain(table, Chain::new("helper")).unwrap();
        let second = registry
            .insert_chain(table, Chain::base("helper", ChainType::Filter, ChainHook::Forward, 0))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.chain(first).unwrap().hook, Some(ChainHook::Forward));
    }

    #[test]
    fn unknown_table_is_an_incomplete_reference() {
        let mut registry = Registry::new();
        let result = registry.insert_chain(TableId(3), Chain::new("c"));
        assert!(matches!(result, Err(Error::IncompleteReference(_))));
    }
}
