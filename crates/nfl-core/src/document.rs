// Declarative ruleset loaded from YAML
use crate::chain::Chain;
use crate::error::Result;
use crate::registry::ChainId;
use crate::rule::Rule;
use crate::table::{Family, Table};
use crate::transaction::Conn;
use crate::transport::Transport;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::with::singleton_map_recursive;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetDocument {
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub family: Family,
    pub name: String,
    #[serde(default)]
    pub chains: Vec<ChainSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    #[serde(flatten)]
    pub chain: Chain,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Chains touched by [`RulesetDocument::stage`], in document order
#[derive(Debug, Clone, Default)]
pub struct Staged {
    pub chains: Vec<ChainId>,
    pub rules: usize,
}

impl RulesetDocument {
    /// Expressions and verdicts are written as single-key maps
    /// (`match: {...}`, `verdict: { jump: x }`) rather than YAML tags.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(yaml))
            .context("Failed to parse ruleset YAML")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read ruleset from {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        let mut out = Vec::new();
        singleton_map_recursive::serialize(self, &mut serde_yaml::Serializer::new(&mut out))
            .context("Failed to serialize ruleset")?;
        String::from_utf8(out).context("Serialized ruleset is not UTF-8")
    }

    /// Queue the document on `conn`: each table and chain is added, each
    /// chain flushed and its rules appended in order. Nothing is committed.
    pub fn stage<T: Transport>(&self, conn: &mut Conn<T>) -> Result<Staged> {
        let mut staged = Staged::default();

        for table in &self.tables {
            let table_id = conn.add_table(Table::new(table.family, &table.name));
            for spec in &table.chains {
                let chain_id = conn.add_chain(table_id, spec.chain.clone())?;
                conn.clear_rule(chain_id)?;
                for rule in &spec.rules {
                    let mut rule = rule.clone();
                    rule.handle = None;
                    conn.add_rule(chain_id, &mut rule, None)?;
                    staged.rules += 1;
                }
                staged.chains.push(chain_id);
            }
        }

        Ok(staged)
    }

    /// The document's rules for one chain, if it declares that chain
    pub fn rules_for(&self, family: Family, table: &str, chain: &str) -> Option<&[Rule]> {
        self.tables
            .iter()
            .find(|t| t.family == family && t.name == table)?
            .chains
            .iter()
            .find(|c| c.chain.name == chain)
            .map(|c| c.rules.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainHook, ChainPolicy, ChainType};
    use crate::error::Error;
    use crate::expr::{Expr, Match, Verdict, IPPROTO_TCP};
    use crate::memory::MemoryKernel;
    use crate::transaction::TxState;

    const RULESET: &str = r#"
tables:
  - family: inet
    name: filter
    chains:
      - name: input
        type: filter
        hook: input
        priority: 0
        policy: drop
        rules:
          - exprs:
              - match: { field: l4proto, value: 6 }
              - match: { field: dport, value: 22 }
              - verdict: accept
          - exprs:
              - match: { field: iifname, value: "lo" }
              - verdict: { jump: trusted }
      - name: trusted
        rules:
          - exprs:
              - counter: {}
              - verdict: accept
"#;

    #[test]
    fn parses_tables_chains_and_rules() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let input = &doc.tables[0].chains[0];
        assert_eq!(doc.tables[0].family, Family::Inet);
        assert_eq!(input.chain.hook, Some(ChainHook::Input));
        assert_eq!(input.chain.chain_type, Some(ChainType::Filter));
        assert_eq!(input.chain.policy, Some(ChainPolicy::Drop));
        assert_eq!(
            input.rules[0].exprs,
            vec![
                Expr::from(Match::l4proto(IPPROTO_TCP)),
                Expr::from(Match::dport(22)),
                Expr::from(Verdict::Accept),
            ]
        );
        assert_eq!(
            input.rules[1].verdict(),
            Some(&Verdict::Jump("trusted".to_string()))
        );
        assert!(!doc.tables[0].chains[1].chain.is_base());
    }

    #[test]
    fn yaml_output_loads_back() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.contains("verdict: accept"));
        assert!(yaml.contains("jump: trusted"));
        assert_eq!(RulesetDocument::from_yaml(&yaml).unwrap(), doc);
    }

    #[test]
    fn bad_yaml_reports_context() {
        let err = RulesetDocument::from_yaml("tables: [ { family: decnet } ]").unwrap_err();
        assert!(err.to_string().contains("ruleset YAML"));
    }

    #[tokio::test]
    async fn staged_document_commits_to_the_kernel() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let mut conn = Conn::new(MemoryKernel::new());

        // trusted is declared after input, so it has to exist before the jump
        let staged = doc.stage(&mut conn).unwrap();
        assert_eq!(staged.rules, 3);
        assert!(matches!(conn.state(), TxState::Pending(_)));
        assert!(conn.commit().await.is_err());

        let mut reordered = doc.clone();
        reordered.tables[0].chains.reverse();
        let staged = reordered.stage(&mut conn).unwrap();
        conn.commit().await.unwrap();

        let trusted = staged.chains[0];
        let input = staged.chains[1];
        assert_eq!(conn.list_rule(input).await.unwrap().len(), 2);
        assert_eq!(conn.list_rule(trusted).await.unwrap().len(), 1);

        // staging again replaces instead of duplicating
        reordered.stage(&mut conn).unwrap();
        conn.commit().await.unwrap();
        assert_eq!(conn.list_rule(input).await.unwrap().len(), 2);
    }

    #[test]
    fn invalid_chain_stops_staging() {
        let doc = RulesetDocument::from_yaml(
            r#"
tables:
  - family: arp
    name: filter
    chains:
      - { name: fwd, type: filter, hook: forward }
"#,
        )
        .unwrap();
        let mut conn = Conn::new(MemoryKernel::new());
        assert!(matches!(doc.stage(&mut conn), Err(Error::InvalidChain { .. })));
    }

    #[test]
    fn rules_for_finds_declared_chain() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        assert_eq!(doc.rules_for(Family::Inet, "filter", "input").map(|r| r.len()), Some(2));
        assert!(doc.rules_for(Family::Ip, "filter", "input").is_none());
    }
}
