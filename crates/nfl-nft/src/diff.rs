use anyhow::{Context, Result};
use nfl_core::{Chain, ChainSpec, Conn, Counter, Expr, Family, Rule, RulesetDocument, Transport};
use similar::{ChangeTag, TextDiff};

/// Difference between one declared chain and the same chain in the kernel
#[derive(Debug, Clone)]
pub struct ChainDiff {
    pub family: Family,
    pub table: String,
    pub chain: String,
    pub matches: bool,
    pub current_exists: bool,
    pub diff: Option<String>,
}

/// Compare every chain declared in `doc` with the committed kernel state
pub async fn diff_document<T: Transport>(
    conn: &mut Conn<T>,
    doc: &RulesetDocument,
) -> Result<Vec<ChainDiff>> {
    let live_tables = conn.list_tables().await.context("Failed to list tables")?;
    let mut diffs = Vec::new();

    for table in &doc.tables {
        let live_table = conn
            .registry()
            .find_table(table.family, &table.name)
            .filter(|id| live_tables.contains(id));

        let live_chains = match live_table {
            Some(id) => conn
                .list_chains(id)
                .await
                .with_context(|| {
                    format!("Failed to list chains of {} {}", table.family, table.name)
                })?,
            None => vec![],
        };

        for spec in &table.chains {
            let live_chain = live_table
                .and_then(|t| conn.registry().find_chain(t, &spec.chain.name))
                .filter(|id| live_chains.contains(id));

            let desired = render_chain(&spec.chain, &spec.rules);
            let current = match live_chain {
                Some(id) => {
                    let rules = conn
                        .list_rule(id)
                        .await
                        .with_context(|| format!("Failed to list rules of {}", spec.chain.name))?;
                    let chain = conn
                        .registry()
                        .chain(id)
                        .with_context(|| {
                            format!("Chain {} vanished from registry", spec.chain.name)
                        })?;
                    Some(render_chain(chain, &rules))
                }
                None => None,
            };

            diffs.push(compare(table.family, &table.name, spec, current.as_deref(), &desired));
        }
    }

    Ok(diffs)
}

fn compare(
    family: Family,
    table: &str,
    spec: &ChainSpec,
    current: Option<&str>,
    desired: &str,
) -> ChainDiff {
    let mut diff = ChainDiff {
        family,
        table: table.to_string(),
        chain: spec.chain.name.clone(),
        matches: false,
        current_exists: current.is_some(),
        diff: None,
    };

    match current {
        Some(current) if current == desired => diff.matches = true,
        Some(current) => diff.diff = Some(render_diff(current, desired)),
        None => diff.diff = Some(render_diff("", desired)),
    }

    diff
}

/// Chain header plus one line per rule. Counter values and handles are
/// left out so live and declared chains compare equal.
pub fn render_chain(chain: &Chain, rules: &[Rule]) -> String {
    let mut out = format!("chain {}", chain.name);
    if let (Some(chain_type), Some(hook)) = (chain.chain_type, chain.hook) {
        out.push_str(&format!(
            " {{ type {} hook {} priority {};",
            chain_type, hook, chain.priority
        ));
        if let Some(policy) = chain.policy {
            out.push_str(&format!(" policy {};", policy));
        }
        out.push_str(" }");
    }
    out.push('\n');

    for rule in rules {
        let normalized = Rule {
            chain: None,
            handle: None,
            exprs: rule
                .exprs
                .iter()
                .map(|e| match e {
                    Expr::Counter(_) => Expr::Counter(Counter::default()),
                    other => other.clone(),
                })
                .collect(),
        };
        out.push_str(&format!("  {}\n", normalized));
    }

    out
}

pub fn render_diff(current: &str, desired: &str) -> String {
    let diff = TextDiff::from_lines(current, desired);
    let mut output = String::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        output.push(sign);
        output.push_str(change.value());
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfl_core::MemoryKernel;

    const RULESET: &str = r#"
tables:
  - family: inet
    name: filter
    chains:
      - name: input
        type: filter
        hook: input
        policy: drop
        rules:
          - exprs:
              - match: { field: l4proto, value: 6 }
              - match: { field: dport, value: 22 }
              - counter: {}
              - verdict: accept
"#;

    #[tokio::test]
    async fn missing_table_diffs_as_all_inserts() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let mut conn = Conn::new(MemoryKernel::new());

        let diffs = diff_document(&mut conn, &doc).await.unwrap();
        assert_eq!(diffs.len(), 1);
        assert!(!diffs[0].current_exists);
        let text = diffs[0].diff.as_deref().unwrap();
        assert!(text.lines().all(|l| l.starts_with('+')));
        assert!(text.contains("policy drop;"));
    }

    #[tokio::test]
    async fn applied_document_matches() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let mut conn = Conn::new(MemoryKernel::new());
        doc.stage(&mut conn).unwrap();
        conn.commit().await.unwrap();

        let diffs = diff_document(&mut conn, &doc).await.unwrap();
        assert!(diffs[0].matches);
        assert!(diffs[0].diff.is_none());
    }

    #[tokio::test]
    async fn changed_port_shows_up_in_diff() {
        let doc = RulesetDocument::from_yaml(RULESET).unwrap();
        let mut conn = Conn::new(MemoryKernel::new());
        doc.stage(&mut conn).unwrap();
        conn.commit().await.unwrap();

        let mut changed = doc.clone();
        changed.tables[0].chains[0].rules[0].exprs[1] = nfl_core::Match::dport(2222).into();
        let diffs = diff_document(&mut conn, &changed).await.unwrap();
        let text = diffs[0].diff.as_deref().unwrap();
        assert!(text.contains("-  meta l4proto == 6 th dport == 22 "));
        assert!(text.contains("+  meta l4proto == 6 th dport == 2222 "));
    }

    #[test]
    fn regular_chain_has_no_header_block() {
        assert_eq!(render_chain(&Chain::new("helper"), &[]), "chain helper\n");
    }
}
