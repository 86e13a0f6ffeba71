// In-memory kernel model implementing the transport contract
use crate::error::TransportError;
use crate::kernel::{ImmediateData, KernelChain, KernelRule, KernelTable, RawExpr};
use crate::transport::{BatchOp, Transport};

#[derive(Debug, Clone)]
struct TableState {
    table: KernelTable,
    chains: Vec<ChainState>,
}

#[derive(Debug, Clone)]
struct ChainState {
    chain: KernelChain,
    rules: Vec<KernelRule>,
}

#[derive(Debug, Clone, Default)]
struct KernelState {
    tables: Vec<TableState>,
    next_handle: u64,
}

/// A kernel that lives in memory.
///
/// Batches are applied to a copy of the state and swapped in only when
/// every operation succeeded, so a rejected batch leaves nothing behind.
/// Rule handles come from a single counter starting at 1.
#[derive(Debug, Clone, Default)]
pub struct MemoryKernel {
    state: KernelState,
    commits: usize,
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches applied successfully
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Rules currently stored in a chain
    pub fn rules(&self, table: &KernelTable, chain: &str) -> Option<&[KernelRule]> {
        self.state
            .tables
            .iter()
            .find(|t| &t.table == table)?
            .chains
            .iter()
            .find(|c| c.chain.name == chain)
            .map(|c| c.rules.as_slice())
    }
}

impl KernelState {
    fn table_mut(&mut self, table: &KernelTable) -> Result<&mut TableState, String> {
        self.tables
            .iter_mut()
            .find(|t| &t.table == table)
            .ok_or_else(|| format!("table {} does not exist", table.name))
    }

    fn chain_mut(&mut self, chain: &KernelChain) -> Result<&mut ChainState, String> {
        self.chain_by_name(&chain.table, &chain.name)
    }

    fn chain_by_name(
        &mut self,
        table: &KernelTable,
        name: &str,
    ) -> Result<&mut ChainState, String> {
        self.table_mut(table)?
            .chains
            .iter_mut()
            .find(|c| c.chain.name == name)
            .ok_or_else(|| format!("chain {} does not exist", name))
    }

    fn apply(&mut self, op: &BatchOp) -> Result<(), String> {
        match op {
            BatchOp::AddTable(table) => {
                if !self.tables.iter().any(|t| &t.table == table) {
                    self.tables.push(TableState {
                        table: table.clone(),
                        chains: vec![],
                    });
                }
            }
            BatchOp::DelTable(table) => {
                let before = self.tables.len();
                self.tables.retain(|t| &t.table != table);
                if self.tables.len() == before {
                    return Err(format!("table {} does not exist", table.name));
                }
            }
            BatchOp::AddChain(chain) => {
                let state = self.table_mut(&chain.table)?;
                match state.chains.iter_mut().find(|c| c.chain.name == chain.name) {
                    Some(existing) => {
                        if existing.chain.hooknum != chain.hooknum {
                            return Err(format!("chain {} exists with another hook", chain.name));
                        }
                        existing.chain.policy = chain.policy.or(existing.chain.policy);
                    }
                    None => state.chains.push(ChainState {
                        chain: chain.clone(),
                        rules: vec![],
                    }),
                }
            }
            BatchOp::DelChain(chain) => {
                let state = self.table_mut(&chain.table)?;
                let referenced = state
                    .chains
                    .iter()
                    .flat_map(|c| c.rules.iter())
                    .any(|r| jump_targets(r).any(|t| t == chain.name));
                if referenced {
                    return Err(format!("chain {} is the target of a jump", chain.name));
                }
                let at = state
                    .chains
                    .iter()
                    .position(|c| c.chain.name == chain.name)
                    .ok_or_else(|| format!("chain {} does not exist", chain.name))?;
                if !state.chains[at].rules.is_empty() {
                    return Err(format!("chain {} still holds rules", chain.name));
                }
                state.chains.remove(at);
            }
            BatchOp::FlushChain(chain) => {
                self.chain_mut(chain)?.rules.clear();
            }
            BatchOp::AddRule(rule) | BatchOp::InsertRule(rule) => {
                self.check_targets(rule)?;
                self.next_handle += 1;
                let mut stored = rule.clone();
                stored.handle = Some(self.next_handle);
                stored.position = None;

                let append = matches!(op, BatchOp::AddRule(_));
                let rules = &mut self.chain_by_name(&rule.table, &rule.chain)?.rules;
                let index = match rule.position {
                    Some(position) => {
                        let at = find_handle(rules, position)?;
                        if append { at + 1 } else { at }
                    }
                    None if append => rules.len(),
                    None => 0,
                };
                rules.insert(index, stored);
            }
            BatchOp::DelRule(rule) => {
                let handle = rule.handle.ok_or("delete needs a rule handle")?;
                let rules = &mut self.chain_by_name(&rule.table, &rule.chain)?.rules;
                let at = find_handle(rules, handle)?;
                rules.remove(at);
            }
            BatchOp::ReplaceRule(rule) => {
                let handle = rule.handle.ok_or("replace needs a rule handle")?;
                self.check_targets(rule)?;
                let rules = &mut self.chain_by_name(&rule.table, &rule.chain)?.rules;
                let at = find_handle(rules, handle)?;
                rules[at].exprs = rule.exprs.clone();
            }
        }

        Ok(())
    }

    /// Jumps must land on an existing regular chain of the same table and
    /// must not lead back to the chain the rule sits in.
    fn check_targets(&mut self, rule: &KernelRule) -> Result<(), String> {
        let table = self.table_mut(&rule.table)?;
        for target in jump_targets(rule) {
            match table.chains.iter().find(|c| c.chain.name == target) {
                None => return Err(format!("jump to missing chain {}", target)),
                Some(c) if c.chain.hooknum.is_some() => {
                    return Err(format!("jump to base chain {}", target));
                }
                Some(_) => {}
            }
            if table.reaches(target, &rule.chain) {
                return Err(format!("jump from {} to {} forms a loop", rule.chain, target));
            }
        }
        Ok(())
    }
}

impl TableState {
    /// Whether `to` can be reached from `from` by following jumps
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen: Vec<&str> = vec![];
        let mut pending = vec![from];

        while let Some(name) = pending.pop() {
            if name == to {
                return true;
            }
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(chain) = self.chains.iter().find(|c| c.chain.name == name) {
                pending.extend(chain.rules.iter().flat_map(jump_targets));
            }
        }

        false
    }
}

fn jump_targets(rule: &KernelRule) -> impl Iterator<Item = &str> {
    rule.exprs.iter().filter_map(|e| match e {
        RawExpr::Immediate {
            data: ImmediateData::Verdict {
                chain: Some(target),
                ..
            },
            ..
        } => Some(target.as_str()),
        _ => None,
    })
}

fn find_handle(rules: &[KernelRule], handle: u64) -> Result<usize, String> {
    rules
        .iter()
        .position(|r| r.handle == Some(handle))
        .ok_or_else(|| format!("rule handle {} does not exist", handle))
}

impl Transport for MemoryKernel {
    async fn commit(&mut self, batch: &[BatchOp]) -> Result<(), TransportError> {
        let mut next = self.state.clone();
        for (op, change) in batch.iter().enumerate() {
            next.apply(change)
                .map_err(|reason| TransportError::Rejected { op, reason })?;
        }
        self.state = next;
        self.commits += 1;
        Ok(())
    }

    async fn get_tables(&mut self) -> Result<Vec<KernelTable>, TransportError> {
        Ok(self.state.tables.iter().map(|t| t.table.clone()).collect())
    }

    async fn get_chains(
        &mut self,
        table: &KernelTable,
    ) -> Result<Vec<KernelChain>, TransportError> {
        let state = self
            .state
            .tables
            .iter()
            .find(|t| &t.table == table)
            .ok_or_else(|| TransportError::NoSuchObject {
                kind: "table",
                name: table.name.clone(),
            })?;
        Ok(state.chains.iter().map(|c| c.chain.clone()).collect())
    }

    async fn get_rules(&mut self, chain: &KernelChain) -> Result<Vec<KernelRule>, TransportError> {
        self.rules(&chain.table, &chain.name)
            .map(|rules| rules.to_vec())
            .ok_or_else(|| TransportError::NoSuchObject {
                kind: "chain",
                name: chain.name.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{NFPROTO_INET, NFT_JUMP, NFT_REG_VERDICT};

    fn table() -> KernelTable {
        KernelTable {
            family: NFPROTO_INET,
            name: "filter".into(),
        }
    }

    fn chain(name: &str) -> KernelChain {
        KernelChain::named(table(), name)
    }

    fn rule(chain: &str, packets: u64) -> KernelRule {
        KernelRule {
            table: table(),
            chain: chain.into(),
            handle: None,
            position: None,
            exprs: vec![RawExpr::Counter { packets, bytes: 0 }],
        }
    }

    fn jump_rule(chain: &str, target: &str) -> KernelRule {
        KernelRule {
            exprs: vec![RawExpr::Immediate {
                dreg: NFT_REG_VERDICT,
                data: ImmediateData::Verdict {
                    code: NFT_JUMP,
                    chain: Some(target.into()),
                },
            }],
            ..rule(chain, 0)
        }
    }

    fn packets(rules: &[KernelRule]) -> Vec<u64> {
        rules
            .iter()
            .map(|r| match r.exprs[0] {
                RawExpr::Counter { packets, .. } => packets,
                _ => panic!("unexpected expr"),
            })
            .collect()
    }

    async fn kernel_with_chain() -> MemoryKernel {
        let mut kernel = MemoryKernel::new();
        kernel
            .commit(&[BatchOp::AddTable(table()), BatchOp::AddChain(chain("input"))])
            .await
            .unwrap();
        kernel
    }

    #[tokio::test]
    async fn handles_are_assigned_in_order() {
        let mut kernel = kernel_with_chain().await;
        kernel
            .commit(&[BatchOp::AddRule(rule("input", 1)), BatchOp::AddRule(rule("input", 2))])
            .await
            .unwrap();

        let rules = kernel.get_rules(&chain("input")).await.unwrap();
        assert_eq!(rules[0].handle, Some(1));
        assert_eq!(rules[1].handle, Some(2));
    }

    #[tokio::test]
    async fn positions_place_rules_after_or_before() {
        let mut kernel = kernel_with_chain().await;
        kernel
            .commit(&[BatchOp::AddRule(rule("input", 1)), BatchOp::AddRule(rule("input", 2))])
            .await
            .unwrap();

        let mut after_first = rule("input", 3);
        after_first.position = Some(1);
        let mut before_second = rule("input", 4);
        before_second.position = Some(2);
        kernel
            .commit(&[
                BatchOp::AddRule(after_first),
                BatchOp::InsertRule(before_second),
                BatchOp::InsertRule(rule("input", 5)),
            ])
            .await
            .unwrap();

        let rules = kernel.get_rules(&chain("input")).await.unwrap();
        assert_eq!(packets(&rules), vec![5, 1, 3, 4, 2]);
    }

    #[tokio::test]
    async fn rejected_batch_changes_nothing() {
        let mut kernel = kernel_with_chain().await;
        let err = kernel
            .commit(&[BatchOp::AddRule(rule("input", 1)), BatchOp::AddRule(rule("missing", 2))])
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Rejected { op: 1, .. }));
        assert!(kernel.get_rules(&chain("input")).await.unwrap().is_empty());
        assert_eq!(kernel.commits(), 1);
    }

    #[tokio::test]
    async fn replace_and_delete_need_existing_handles() {
        let mut kernel = kernel_with_chain().await;
        kernel.commit(&[BatchOp::AddRule(rule("input", 1))]).await.unwrap();

        let mut replacement = rule("input", 9);
        replacement.handle = Some(1);
        kernel.commit(&[BatchOp::ReplaceRule(replacement)]).await.unwrap();
        let rules = kernel.get_rules(&chain("input")).await.unwrap();
        assert_eq!(packets(&rules), vec![9]);
        assert_eq!(rules[0].handle, Some(1));

        let mut unknown = rule("input", 0);
        unknown.handle = Some(42);
        assert!(kernel.commit(&[BatchOp::DelRule(unknown)]).await.is_err());
        assert!(kernel.commit(&[BatchOp::DelRule(rule("input", 0))]).await.is_err());
    }

    #[tokio::test]
    async fn jumps_need_a_regular_target_chain() {
        let mut kernel = kernel_with_chain().await;
        assert!(kernel
            .commit(&[BatchOp::AddRule(jump_rule("input", "helper"))])
            .await
            .is_err());

        let mut hooked = chain("hooked");
        hooked.hooknum = Some(1);
        hooked.chain_type = Some("filter".into());
        assert!(kernel
            .commit(&[BatchOp::AddChain(hooked), BatchOp::AddRule(jump_rule("input", "hooked"))])
            .await
            .is_err());

        kernel
            .commit(&[
                BatchOp::AddChain(chain("helper")),
                BatchOp::AddRule(jump_rule("input", "helper")),
            ])
            .await
            .unwrap();
        assert!(kernel.commit(&[BatchOp::DelChain(chain("helper"))]).await.is_err());
    }

    #[tokio::test]
    async fn chain_with_rules_cannot_be_deleted() {
        let mut kernel = kernel_with_chain().await;
        kernel
            .commit(&[BatchOp::AddChain(chain("helper")), BatchOp::AddRule(rule("helper", 1))])
            .await
            .unwrap();

        let err = kernel.commit(&[BatchOp::DelChain(chain("helper"))]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected { op: 0, ref reason } if reason.contains("rules")
        ));

        kernel
            .commit(&[BatchOp::FlushChain(chain("helper")), BatchOp::DelChain(chain("helper"))])
            .await
            .unwrap();
        assert_eq!(kernel.get_chains(&table()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn jump_loops_are_rejected() {
        let mut kernel = kernel_with_chain().await;
        kernel
            .commit(&[BatchOp::AddChain(chain("a")), BatchOp::AddChain(chain("b"))])
            .await
            .unwrap();

        let err = kernel.commit(&[BatchOp::AddRule(jump_rule("a", "a"))]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Rejected { ref reason, .. } if reason.contains("loop")
        ));

        kernel.commit(&[BatchOp::AddRule(jump_rule("a", "b"))]).await.unwrap();
        assert!(kernel.commit(&[BatchOp::AddRule(jump_rule("b", "a"))]).await.is_err());
        assert!(kernel.get_rules(&chain("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_clears_only_that_chain() {
        let mut kernel = kernel_with_chain().await;
        kernel
            .commit(&[
                BatchOp::AddChain(chain("other")),
                BatchOp::AddRule(rule("input", 1)),
                BatchOp::AddRule(rule("other", 2)),
                BatchOp::FlushChain(chain("input")),
            ])
            .await
            .unwrap();

        assert!(kernel.get_rules(&chain("input")).await.unwrap().is_empty());
        assert_eq!(kernel.get_rules(&chain("other")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_missing_objects_fails() {
        let mut kernel = MemoryKernel::new();
        assert!(kernel.get_chains(&table()).await.is_err());
        assert!(kernel.get_rules(&chain("input")).await.is_err());
        assert!(kernel.get_tables().await.unwrap().is_empty());
    }
}
