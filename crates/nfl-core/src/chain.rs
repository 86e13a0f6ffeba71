use crate::error::{Error, Result};
use crate::kernel::{
    CHAIN_TYPE_FILTER, CHAIN_TYPE_NAT, CHAIN_TYPE_ROUTE, HostOrder, KernelChain, NF_ACCEPT,
    NF_ARP_FORWARD, NF_ARP_IN, NF_ARP_OUT, NF_DROP, NF_INET_FORWARD, NF_INET_LOCAL_IN,
    NF_INET_LOCAL_OUT, NF_INET_POST_ROUTING, NF_INET_PRE_ROUTING, policy_from_wire,
    policy_to_wire,
};
use crate::registry::TableId;
use crate::table::{Family, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainHook {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Filter,
    Route,
    Nat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainPolicy {
    Accept,
    Drop,
}

impl ChainHook {
    pub const ALL: [ChainHook; 5] = [
        ChainHook::Prerouting,
        ChainHook::Input,
        ChainHook::Forward,
        ChainHook::Output,
        ChainHook::Postrouting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prerouting => "prerouting",
            Self::Input => "input",
            Self::Forward => "forward",
            Self::Output => "output",
            Self::Postrouting => "postrouting",
        }
    }

    /// Hook numbers depend on the family: arp has its own numbering and
    /// no routing hooks.
    pub fn to_hooknum(self, family: Family) -> Option<u32> {
        match family {
            Family::Arp => match self {
                Self::Input => Some(NF_ARP_IN),
                Self::Output => Some(NF_ARP_OUT),
                Self::Forward => Some(NF_ARP_FORWARD),
                Self::Prerouting | Self::Postrouting => None,
            },
            _ => Some(match self {
                Self::Prerouting => NF_INET_PRE_ROUTING,
                Self::Input => NF_INET_LOCAL_IN,
                Self::Forward => NF_INET_FORWARD,
                Self::Output => NF_INET_LOCAL_OUT,
                Self::Postrouting => NF_INET_POST_ROUTING,
            }),
        }
    }

    pub fn from_hooknum(hooknum: u32, family: Option<Family>) -> Option<Self> {
        match family {
            Some(Family::Arp) => match hooknum {
                NF_ARP_IN => Some(Self::Input),
                NF_ARP_OUT => Some(Self::Output),
                NF_ARP_FORWARD => Some(Self::Forward),
                _ => None,
            },
            _ => match hooknum {
                NF_INET_PRE_ROUTING => Some(Self::Prerouting),
                NF_INET_LOCAL_IN => Some(Self::Input),
                NF_INET_FORWARD => Some(Self::Forward),
                NF_INET_LOCAL_OUT => Some(Self::Output),
                NF_INET_POST_ROUTING => Some(Self::Postrouting),
                // ingress and anything newer than this model
                _ => None,
            },
        }
    }
}

impl ChainType {
    pub const ALL: [ChainType; 3] = [ChainType::Filter, ChainType::Route, ChainType::Nat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filter => CHAIN_TYPE_FILTER,
            Self::Route => CHAIN_TYPE_ROUTE,
            Self::Nat => CHAIN_TYPE_NAT,
        }
    }

    pub fn from_kernel_name(name: &str) -> Option<Self> {
        match name {
            CHAIN_TYPE_FILTER => Some(Self::Filter),
            CHAIN_TYPE_ROUTE => Some(Self::Route),
            CHAIN_TYPE_NAT => Some(Self::Nat),
            _ => None,
        }
    }

    /// Whether the kernel registers this chain type for `hook` in `family`
    pub fn supports(&self, hook: ChainHook, family: Family) -> bool {
        match (family, self) {
            (Family::Netdev, _) => false,
            (Family::Arp, Self::Filter) => matches!(hook, ChainHook::Input | ChainHook::Output),
            (Family::Arp, _) => false,
            (Family::Bridge, Self::Filter) => true,
            (Family::Bridge, _) => false,
            (_, Self::Filter) => true,
            (_, Self::Route) => hook == ChainHook::Output,
            (_, Self::Nat) => hook != ChainHook::Forward,
        }
    }
}

impl ChainPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Drop => "drop",
        }
    }

    pub fn to_verdict(self) -> u32 {
        match self {
            Self::Accept => NF_ACCEPT,
            Self::Drop => NF_DROP,
        }
    }

    pub fn from_verdict(verdict: u32) -> Option<Self> {
        match verdict {
            NF_ACCEPT => Some(Self::Accept),
            NF_DROP => Some(Self::Drop),
            _ => None,
        }
    }
}

impl fmt::Display for ChainHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ChainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chain inside a table. Base chains carry a hook, a type and usually a
/// policy; regular chains only have a name and are reached by jumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(skip)]
    pub table: Option<TableId>,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<ChainHook>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chain_type: Option<ChainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ChainPolicy>,
}

impl Chain {
    /// A regular chain
    pub fn new(name: &str) -> Self {
        Self {
            table: None,
            name: name.to_string(),
            priority: 0,
            hook: None,
            chain_type: None,
            policy: None,
        }
    }

    /// A base chain attached to `hook`
    pub fn base(name: &str, chain_type: ChainType, hook: ChainHook, priority: i32) -> Self {
        Self {
            table: None,
            name: name.to_string(),
            priority,
            hook: Some(hook),
            chain_type: Some(chain_type),
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn is_base(&self) -> bool {
        self.hook.is_some()
    }

    /// Check that hook, type and policy form a combination the kernel accepts
    pub fn validate(&self, family: Family) -> Result<()> {
        let invalid = |reason: String| Error::InvalidChain {
            chain: self.name.clone(),
            reason,
        };

        match (self.hook, self.chain_type) {
            (None, chain_type) => {
                if chain_type.is_some() {
                    return Err(invalid("a type requires a hook".to_string()));
                }
                if self.policy.is_some() {
                    return Err(invalid("a policy requires a hook".to_string()));
                }
            }
            (Some(_), None) => {
                return Err(invalid("a base chain requires a type".to_string()));
            }
            (Some(hook), Some(chain_type)) => {
                if !chain_type.supports(hook, family) {
                    return Err(invalid(format!(
                        "type {} cannot attach to hook {} in a {} table",
                        chain_type, hook, family
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn to_kernel(&self, table: &Table) -> Result<KernelChain> {
        self.to_kernel_with(table, HostOrder::NATIVE)
    }

    pub(crate) fn to_kernel_with(&self, table: &Table, host: HostOrder) -> Result<KernelChain> {
        self.validate(table.family)?;

        let hooknum = match self.hook {
            Some(hook) => Some(hook.to_hooknum(table.family).ok_or_else(|| Error::InvalidChain {
                chain: self.name.clone(),
                reason: format!("hook {} does not exist in a {} table", hook, table.family),
            })?),
            None => None,
        };

        Ok(KernelChain {
            table: table.to_kernel(),
            name: self.name.clone(),
            hooknum,
            priority: hooknum.map(|_| self.priority),
            chain_type: self.chain_type.map(|t| t.as_str().to_string()),
            policy: self.policy.map(|p| policy_to_wire(p.to_verdict(), host)),
        })
    }

    /// Decode a kernel chain. Values unknown to this model become `None`
    /// instead of failing, so listings keep working on newer kernels.
    pub fn from_kernel(chain: &KernelChain) -> Self {
        Self::from_kernel_with(chain, HostOrder::NATIVE)
    }

    pub(crate) fn from_kernel_with(chain: &KernelChain, host: HostOrder) -> Self {
        let family = Family::from_nfproto(chain.table.family);

        let hook = match chain.hooknum {
            Some(num) => ChainHook::from_hooknum(num, family),
            None => None,
        };
        let chain_type = match chain.chain_type.as_deref() {
            Some(name) => ChainType::from_kernel_name(name),
            None => None,
        };
        let policy = match chain.policy {
            Some(raw) => ChainPolicy::from_verdict(policy_from_wire(raw, host)),
            None => None,
        };

        Self {
            table: None,
            name: chain.name.clone(),
            priority: chain.priority.unwrap_or(0),
            hook,
            chain_type,
            policy,
        }
    }
}
