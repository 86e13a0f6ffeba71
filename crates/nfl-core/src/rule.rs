use crate::codec;
use crate::error::{Error, Result};
use crate::expr::{Expr, Match, Verdict};
use crate::kernel::KernelRule;
use crate::registry::{ChainId, Registry};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered list of expressions inside a chain.
///
/// A rule without a handle has not been committed yet; one with a handle
/// names an existing kernel rule and can be replaced or deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(skip)]
    pub chain: Option<ChainId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
    #[serde(default)]
    pub exprs: Vec<Expr>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expr(mut self, expr: impl Into<Expr>) -> Self {
        self.exprs.push(expr.into());
        self
    }

    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.exprs.iter().filter_map(|e| match e {
            Expr::Match(m) => Some(m),
            _ => None,
        })
    }

    /// The last verdict of the rule, if it has one
    pub fn verdict(&self) -> Option<&Verdict> {
        self.exprs.iter().rev().find_map(|e| match e {
            Expr::Verdict(v) => Some(v),
            _ => None,
        })
    }

    /// Compile into a kernel rule.
    ///
    /// `position` is the handle of an existing rule the new one is placed
    /// relative to. Passing two handles is not expressible:
    ///
    /// ```compile_fail
    /// # use nfl_core::{Registry, Rule};
    /// # let registry = Registry::new();
    /// Rule::new().build(&registry, Some(1), Some(2));
    /// ```
    pub fn build(&self, registry: &Registry, position: Option<u64>) -> Result<KernelRule> {
        let chain_id = self
            .chain
            .ok_or_else(|| {
                Error::IncompleteReference("rule is not attached to a chain".to_string())
            })?;
        let (table, chain) = registry.resolve_chain(chain_id)?;

        Ok(KernelRule {
            table: table.to_kernel(),
            chain: chain.name.clone(),
            handle: self.handle,
            position,
            exprs: codec::encode(&self.exprs)?,
        })
    }

    /// Decode a kernel rule read from `chain`
    pub fn parse(rule: &KernelRule, chain: ChainId) -> Result<Self> {
        Ok(Self {
            chain: Some(chain),
            handle: rule.handle,
            exprs: codec::decode(&rule.exprs)?,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, expr) in self.exprs.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", expr)?;
        }
        if let Some(handle) = self.handle {
            write!(f, " # handle {}", handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ChainHook, ChainType};
    use crate::expr::{Counter, IPPROTO_TCP};
    use crate::table::{Family, Table};

    fn registry_with_input() -> (Registry, ChainId) {
        let mut registry = Registry::new();
        let table = registry.insert_table(Table::new(Family::Inet, "filter"));
        let chain = registry
            .insert_chain(table, Chain::base("input", ChainType::Filter, ChainHook::Input, 0))
            .unwrap();
        (registry, chain)
    }

    fn ssh_rule() -> Rule {
        Rule::new()
            .with_expr(Match::l4proto(IPPROTO_TCP))
            .with_expr(Match::dport(22))
            .with_expr(Counter::default())
            .with_expr(Verdict::Accept)
    }

    #[test]
    fn build_requires_a_chain() {
        let (registry, _) = registry_with_input();
        let err = ssh_rule().build(&registry, None).unwrap_err();
        assert!(matches!(err, Error::IncompleteReference(_)));
    }

    #[test]
    fn build_fills_table_chain_and_handles() {
        let (registry, chain) = registry_with_input();
        let mut rule = ssh_rule().with_handle(7);
        rule.chain = Some(chain);

        let kernel = rule.build(&registry, Some(3)).unwrap();
        assert_eq!(kernel.table.name, "filter");
        assert_eq!(kernel.chain, "input");
        assert_eq!(kernel.handle, Some(7));
        assert_eq!(kernel.position, Some(3));
        assert_eq!(kernel.exprs.len(), 6);
    }

    #[test]
    fn parse_attaches_the_given_chain() {
        let (registry, chain) = registry_with_input();
        let mut rule = ssh_rule().with_handle(4);
        rule.chain = Some(chain);
        let kernel = rule.build(&registry, None).unwrap();

        let parsed = Rule::parse(&kernel, chain).unwrap();
        assert_eq!(parsed, rule);
        assert_eq!(parsed.verdict(), Some(&Verdict::Accept));
        assert_eq!(parsed.matches().count(), 2);
    }

    #[test]
    fn encode_errors_surface_from_build() {
        let (registry, chain) = registry_with_input();
        let mut rule = Rule::new().with_expr(Match::iifname("an-interface-name-too-long"));
        rule.chain = Some(chain);
        assert!(matches!(rule.build(&registry, None), Err(Error::Encode(_))));
    }

    #[test]
    fn display_reads_like_nft() {
        let rule = Rule::new()
            .with_expr(Match::l4proto(IPPROTO_TCP))
            .with_expr(Match::dport(22))
            .with_expr(Verdict::Accept)
            .with_handle(5);
        assert_eq!(rule.to_string(), "meta l4proto == 6 th dport == 22 accept # handle 5");
    }

    #[test]
    fn rule_serializes_without_chain_link() {
        let mut rule = ssh_rule();
        rule.chain = Some(registry_with_input().1);
        let json = serde_json::to_value(&rule).unwrap();
        assert!(json.get("chain").is_none());
        assert!(json.get("handle").is_none());
        assert_eq!(json["exprs"].as_array().unwrap().len(), 4);
    }
}
