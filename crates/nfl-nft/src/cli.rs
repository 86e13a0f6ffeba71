use crate::json::{Listing, parse_listing, render_batch};
use nfl_core::kernel::{KernelChain, KernelRule, KernelTable};
use nfl_core::{BatchOp, Family, Transport, TransportError};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Transport that drives the `nft` binary in JSON mode.
///
/// A batch is written as one document to `nft -j -f -`, which nft applies
/// as a single transaction.
#[derive(Debug, Clone)]
pub struct NftCli {
    binary: PathBuf,
}

impl NftCli {
    pub fn new() -> Self {
        Self::with_binary("nft")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The JSON document `commit` would send for `batch`
    pub fn render(&self, batch: &[BatchOp]) -> Result<String, TransportError> {
        Ok(serde_json::to_string_pretty(&render_batch(batch)?)?)
    }

    async fn apply_payload(&self, payload: &str) -> Result<(), TransportError> {
        let mut child = Command::new(&self.binary)
            .arg("-j")
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(TransportError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    /// Run `nft -j list <args>`. A missing object yields `NoSuchObject`.
    async fn list(
        &self,
        args: &[&str],
        kind: &'static str,
        name: &str,
    ) -> Result<Listing, TransportError> {
        debug!(?args, "nft list");
        let output = Command::new(&self.binary)
            .arg("-j")
            .arg("list")
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such file or directory") {
                return Err(TransportError::NoSuchObject {
                    kind,
                    name: name.to_string(),
                });
            }
            return Err(TransportError::Command {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        parse_listing(&parsed)
    }
}

impl Default for NftCli {
    fn default() -> Self {
        Self::new()
    }
}

fn family_arg(nfproto: u8) -> Result<&'static str, TransportError> {
    Family::from_nfproto(nfproto)
        .map(|f| f.as_str())
        .ok_or_else(|| TransportError::Unsupported(format!("family {}", nfproto)))
}

impl Transport for NftCli {
    async fn commit(&mut self, batch: &[BatchOp]) -> Result<(), TransportError> {
        let payload = serde_json::to_string(&render_batch(batch)?)?;
        debug!(ops = batch.len(), bytes = payload.len(), "applying batch with nft");
        self.apply_payload(&payload).await
    }

    async fn get_tables(&mut self) -> Result<Vec<KernelTable>, TransportError> {
        Ok(self.list(&["tables"], "tables", "").await?.tables)
    }

    async fn get_chains(
        &mut self,
        table: &KernelTable,
    ) -> Result<Vec<KernelChain>, TransportError> {
        let family = family_arg(table.family)?;
        let listing = self
            .list(&["table", family, table.name.as_str()], "table", &table.name)
            .await?;
        Ok(listing.chains)
    }

    async fn get_rules(&mut self, chain: &KernelChain) -> Result<Vec<KernelRule>, TransportError> {
        let family = family_arg(chain.table.family)?;
        let listing = self
            .list(
                &["chain", family, chain.table.name.as_str(), chain.name.as_str()],
                "chain",
                &chain.name,
            )
            .await?;
        Ok(listing.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfl_core::kernel::NFPROTO_IPV4;

    fn nat() -> KernelTable {
        KernelTable {
            family: NFPROTO_IPV4,
            name: "nat".into(),
        }
    }

    #[test]
    fn render_matches_commit_payload() {
        let cli = NftCli::new();
        let text = cli
            .render(&[
                BatchOp::AddTable(nat()),
                BatchOp::FlushChain(KernelChain::named(nat(), "post")),
            ])
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["nftables"][0]["add"]["table"]["family"], "ip");
        assert_eq!(doc["nftables"][1]["flush"]["chain"]["name"], "post");
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let mut cli = NftCli::with_binary("/nonexistent/nft");
        let err = cli.commit(&[BatchOp::AddTable(nat())]).await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(matches!(cli.get_tables().await, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn unknown_family_is_unsupported() {
        let mut cli = NftCli::with_binary("/nonexistent/nft");
        let table = KernelTable {
            family: 99,
            name: "x".into(),
        };
        assert!(matches!(cli.get_chains(&table).await, Err(TransportError::Unsupported(_))));
    }
}
