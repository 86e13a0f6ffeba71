use crate::error::TransportError;
use crate::kernel::{KernelChain, KernelRule, KernelTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// One queued change, applied in order as part of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOp {
    AddTable(KernelTable),
    DelTable(KernelTable),
    AddChain(KernelChain),
    DelChain(KernelChain),
    FlushChain(KernelChain),
    AddRule(KernelRule),
    InsertRule(KernelRule),
    DelRule(KernelRule),
    ReplaceRule(KernelRule),
}

impl BatchOp {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::AddTable(_) => "add table",
            Self::DelTable(_) => "delete table",
            Self::AddChain(_) => "add chain",
            Self::DelChain(_) => "delete chain",
            Self::FlushChain(_) => "flush chain",
            Self::AddRule(_) => "add rule",
            Self::InsertRule(_) => "insert rule",
            Self::DelRule(_) => "delete rule",
            Self::ReplaceRule(_) => "replace rule",
        }
    }
}

impl fmt::Display for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTable(t) | Self::DelTable(t) => {
                write!(f, "{} {}/{}", self.verb(), t.family, t.name)
            }
            Self::AddChain(c) | Self::DelChain(c) | Self::FlushChain(c) => {
                write!(f, "{} {}/{} {}", self.verb(), c.table.family, c.table.name, c.name)
            }
            Self::AddRule(r) | Self::InsertRule(r) | Self::DelRule(r) | Self::ReplaceRule(r) => {
                write!(f, "{} {}/{} {}", self.verb(), r.table.family, r.table.name, r.chain)?;
                if let Some(handle) = r.handle.or(r.position) {
                    write!(f, " handle {}", handle)?;
                }
                Ok(())
            }
        }
    }
}

/// The netlink side of a connection.
///
/// `commit` must apply the whole batch or nothing. The read methods return
/// committed kernel state and never see queued operations.
pub trait Transport {
    fn commit(
        &mut self,
        batch: &[BatchOp],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn get_tables(
        &mut self,
    ) -> impl Future<Output = Result<Vec<KernelTable>, TransportError>> + Send;

    fn get_chains(
        &mut self,
        table: &KernelTable,
    ) -> impl Future<Output = Result<Vec<KernelChain>, TransportError>> + Send;

    fn get_rules(
        &mut self,
        chain: &KernelChain,
    ) -> impl Future<Output = Result<Vec<KernelRule>, TransportError>> + Send;
}
