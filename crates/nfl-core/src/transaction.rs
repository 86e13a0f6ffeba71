use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::kernel::KernelChain;
use crate::registry::{ChainId, Registry, TableId};
use crate::rule::Rule;
use crate::table::Table;
use crate::transport::{BatchOp, Transport};
use tracing::debug;

/// Whether a connection has changes waiting for `commit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Pending(usize),
}

/// A connection to the kernel with its own queue of pending changes.
///
/// Mutating calls only queue operations; nothing reaches the kernel until
/// [`Conn::commit`] sends the queue as one batch. Reads go straight to the
/// transport and see committed state only.
#[derive(Debug)]
pub struct Conn<T> {
    transport: T,
    registry: Registry,
    queue: Vec<BatchOp>,
}

impl<T: Transport> Conn<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            registry: Registry::new(),
            queue: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn queued(&self) -> &[BatchOp] {
        &self.queue
    }

    pub fn state(&self) -> TxState {
        match self.queue.len() {
            0 => TxState::Idle,
            n => TxState::Pending(n),
        }
    }

    /// Drop every queued operation, returning how many were dropped
    pub fn discard(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded queued operations");
        }
        dropped
    }

    fn enqueue(&mut self, op: BatchOp) {
        debug!(op = %op, pending = self.queue.len() + 1, "queued");
        self.queue.push(op);
    }

    /// Register a table and queue its creation
    pub fn add_table(&mut self, table: Table) -> TableId {
        let op = BatchOp::AddTable(table.to_kernel());
        let id = self.registry.insert_table(table);
        self.enqueue(op);
        id
    }

    /// Register a table that already exists in the kernel
    pub fn use_table(&mut self, table: Table) -> TableId {
        self.registry.insert_table(table)
    }

    pub fn del_table(&mut self, table: TableId) -> Result<()> {
        let kernel = self
            .registry
            .table(table)
            .ok_or_else(|| Error::IncompleteReference("unknown table id".to_string()))?
            .to_kernel();
        self.enqueue(BatchOp::DelTable(kernel));
        Ok(())
    }

    /// Validate and register a chain, then queue its creation
    pub fn add_chain(&mut self, table: TableId, chain: Chain) -> Result<ChainId> {
        let kernel = {
            let t = self.registry.table(table).ok_or_else(|| {
                let reason = format!("chain '{}' refers to an unknown table", chain.name);
                Error::IncompleteReference(reason)
            })?;
            chain.to_kernel(t)?
        };
        let id = self.registry.insert_chain(table, chain)?;
        self.enqueue(BatchOp::AddChain(kernel));
        Ok(id)
    }

    /// Register a chain that already exists in the kernel
    pub fn use_chain(&mut self, table: TableId, chain: Chain) -> Result<ChainId> {
        self.registry.insert_chain(table, chain)
    }

    pub fn del_chain(&mut self, chain: ChainId) -> Result<()> {
        let kernel = self.kernel_chain(chain)?;
        self.enqueue(BatchOp::DelChain(kernel));
        Ok(())
    }

    fn kernel_chain(&self, chain: ChainId) -> Result<KernelChain> {
        let (table, chain) = self.registry.resolve_chain(chain)?;
        Ok(KernelChain::named(table.to_kernel(), &chain.name))
    }

    fn chain_name(&self, chain: ChainId) -> String {
        self.registry
            .chain(chain)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    /// Queue `rule` at the end of `chain`, or after the rule with handle
    /// `position`
    pub fn add_rule(
        &mut self,
        chain: ChainId,
        rule: &mut Rule,
        position: Option<u64>,
    ) -> Result<()> {
        rule.chain = Some(chain);
        let kernel = rule.build(&self.registry, position)?;
        self.enqueue(BatchOp::AddRule(kernel));
        Ok(())
    }

    /// Queue `rule` at the head of `chain`, or before the rule with handle
    /// `position`
    pub fn insert_rule(
        &mut self,
        chain: ChainId,
        rule: &mut Rule,
        position: Option<u64>,
    ) -> Result<()> {
        rule.chain = Some(chain);
        let kernel = rule.build(&self.registry, position)?;
        self.enqueue(BatchOp::InsertRule(kernel));
        Ok(())
    }

    pub fn del_rule(&mut self, chain: ChainId, rule: &mut Rule) -> Result<()> {
        if rule.handle.is_none() {
            return Err(Error::MissingHandle {
                chain: self.chain_name(chain),
            });
        }
        rule.chain = Some(chain);
        let kernel = rule.build(&self.registry, None)?;
        self.enqueue(BatchOp::DelRule(kernel));
        Ok(())
    }

    /// Queue replacing the kernel rule with `rule.handle` by `rule`
    pub fn replace_rule(&mut self, chain: ChainId, rule: &mut Rule) -> Result<()> {
        if rule.handle.is_none() {
            return Err(Error::MissingHandle {
                chain: self.chain_name(chain),
            });
        }
        rule.chain = Some(chain);
        let kernel = rule.build(&self.registry, None)?;
        self.enqueue(BatchOp::ReplaceRule(kernel));
        Ok(())
    }

    /// Queue removal of every rule in `chain`
    pub fn clear_rule(&mut self, chain: ChainId) -> Result<()> {
        let kernel = self.kernel_chain(chain)?;
        self.enqueue(BatchOp::FlushChain(kernel));
        Ok(())
    }

    /// Read the committed rules of `chain`. Queued operations are not
    /// visible here.
    pub async fn list_rule(&mut self, chain: ChainId) -> Result<Vec<Rule>> {
        let kernel = self.kernel_chain(chain)?;
        let rules = self.transport.get_rules(&kernel).await?;
        rules.iter().map(|r| Rule::parse(r, chain)).collect()
    }

    /// Read the kernel tables and register them
    pub async fn list_tables(&mut self) -> Result<Vec<TableId>> {
        let tables = self.transport.get_tables().await?;
        let mut ids = Vec::with_capacity(tables.len());
        for table in &tables {
            ids.push(self.registry.insert_table(Table::from_kernel(table)?));
        }
        Ok(ids)
    }

    /// Read the kernel chains of `table` and register them
    pub async fn list_chains(&mut self, table: TableId) -> Result<Vec<ChainId>> {
        let kernel = self
            .registry
            .table(table)
            .ok_or_else(|| Error::IncompleteReference("unknown table id".to_string()))?
            .to_kernel();
        let chains = self.transport.get_chains(&kernel).await?;
        chains
            .iter()
            .map(|c| self.registry.insert_chain(table, Chain::from_kernel(c)))
            .collect()
    }

    /// Send the queue to the kernel as one batch.
    ///
    /// The queue is emptied before the transport is called, so it is empty
    /// afterwards whether the kernel accepted the batch or not.
    pub async fn commit(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.queue);
        debug!(ops = batch.len(), "committing batch");
        self.transport.commit(&batch).await.map_err(Error::Commit)?;
        debug!(ops = batch.len(), "batch committed");
        Ok(())
    }

    /// A view of the connection scoped to one chain
    pub fn chain(&mut self, id: ChainId) -> Result<ChainTx<'_, T>> {
        self.registry.resolve_chain(id)?;
        Ok(ChainTx { conn: self, id })
    }
}

/// Rule operations bound to a single chain
pub struct ChainTx<'a, T> {
    conn: &'a mut Conn<T>,
    id: ChainId,
}

impl<T: Transport> ChainTx<'_, T> {
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// An empty rule already attached to this chain
    pub fn new_rule(&self) -> Rule {
        Rule {
            chain: Some(self.id),
            ..Rule::default()
        }
    }

    pub fn add_rule(&mut self, rule: &mut Rule, position: Option<u64>) -> Result<()> {
        self.conn.add_rule(self.id, rule, position)
    }

    pub fn insert_rule(&mut self, rule: &mut Rule, position: Option<u64>) -> Result<()> {
        self.conn.insert_rule(self.id, rule, position)
    }

    pub fn del_rule(&mut self, rule: &mut Rule) -> Result<()> {
        self.conn.del_rule(self.id, rule)
    }

    pub fn replace_rule(&mut self, rule: &mut Rule) -> Result<()> {
        self.conn.replace_rule(self.id, rule)
    }

    pub fn clear_rule(&mut self) -> Result<()> {
        self.conn.clear_rule(self.id)
    }

    pub async fn list_rule(&mut self) -> Result<Vec<Rule>> {
        self.conn.list_rule(self.id).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.conn.commit().await
    }
}
