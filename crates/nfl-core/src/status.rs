use crate::chain::{ChainHook, ChainPolicy, ChainType};
use crate::error::Result;
use crate::table::Family;
use crate::transaction::Conn;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetStatus {
    pub tables: Vec<TableStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub family: Family,
    pub name: String,
    pub chains: Vec<ChainStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    pub name: String,
    pub hook: Option<ChainHook>,
    #[serde(rename = "type")]
    pub chain_type: Option<ChainType>,
    pub priority: i32,
    pub policy: Option<ChainPolicy>,
    pub rules: usize,
}

impl TableStatus {
    pub fn rule_count(&self) -> usize {
        self.chains.iter().map(|c| c.rules).sum()
    }
}

impl RulesetStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the committed kernel state reachable through `conn`
    pub async fn collect<T: Transport>(conn: &mut Conn<T>) -> Result<Self> {
        let mut status = Self::new();

        for table_id in conn.list_tables().await? {
            let chain_ids = conn.list_chains(table_id).await?;
            let mut chains = Vec::with_capacity(chain_ids.len());
            for chain_id in chain_ids {
                let rules = conn.list_rule(chain_id).await?.len();
                let (_, chain) = conn.registry().resolve_chain(chain_id)?;
                chains.push(ChainStatus {
                    name: chain.name.clone(),
                    hook: chain.hook,
                    chain_type: chain.chain_type,
                    priority: chain.priority,
                    policy: chain.policy,
                    rules,
                });
            }

            if let Some(table) = conn.registry().table(table_id) {
                status.tables.push(TableStatus {
                    family: table.family,
                    name: table.name.clone(),
                    chains,
                });
            }
        }

        Ok(status)
    }

    pub fn display(&self) {
        println!("🔥 nftables ({}):", self.tables.len());
        if self.tables.is_empty() {
            println!("  (none)");
            return;
        }

        for table in &self.tables {
            println!(
                "  • {} ({}) - {} chains, {} rules",
                table.name,
                table.family,
                table.chains.len(),
                table.rule_count()
            );
            for chain in &table.chains {
                match (chain.chain_type, chain.hook) {
                    (Some(chain_type), Some(hook)) => {
                        let policy = chain
                            .policy
                            .map(|p| format!(" policy {}", p))
                            .unwrap_or_default();
                        println!(
                            "    {} [{} hook {} priority {}{}] {} rules",
                            chain.name, chain_type, hook, chain.priority, policy, chain.rules
                        );
                    }
                    _ => println!("    {} {} rules", chain.name, chain.rules),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::expr::Verdict;
    use crate::memory::MemoryKernel;
    use crate::rule::Rule;
    use crate::table::Table;

    #[tokio::test]
    async fn collects_chains_and_rule_counts() {
        let mut conn = Conn::new(MemoryKernel::new());
        let table = conn.add_table(Table::new(Family::Ip, "nat"));
        let post = conn
            .add_chain(
                table,
                Chain::base("postrouting", ChainType::Nat, ChainHook::Postrouting, 100),
            )
            .unwrap();
        conn.add_chain(table, Chain::new("helper")).unwrap();
        conn.add_rule(post, &mut Rule::new().with_expr(Verdict::Accept), None)
            .unwrap();
        conn.add_rule(post, &mut Rule::new().with_expr(Verdict::Return), None)
            .unwrap();
        conn.commit().await.unwrap();

        let status = RulesetStatus::collect(&mut conn).await.unwrap();
        assert_eq!(status.tables.len(), 1);
        let nat = &status.tables[0];
        assert_eq!(nat.family, Family::Ip);
        assert_eq!(nat.rule_count(), 2);

        let post = &nat.chains[0];
        assert_eq!(post.hook, Some(ChainHook::Postrouting));
        assert_eq!(post.chain_type, Some(ChainType::Nat));
        assert_eq!(post.priority, 100);
        assert_eq!(nat.chains[1].hook, None);
    }

    #[tokio::test]
    async fn empty_kernel_has_no_tables() {
        let mut conn = Conn::new(MemoryKernel::new());
        let status = RulesetStatus::collect(&mut conn).await.unwrap();
        assert!(status.tables.is_empty());
    }
}
