// Kernel-shaped objects exchanged with the transport
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NFPROTO_INET: u8 = 1;
pub const NFPROTO_IPV4: u8 = 2;
pub const NFPROTO_ARP: u8 = 3;
pub const NFPROTO_NETDEV: u8 = 5;
pub const NFPROTO_BRIDGE: u8 = 7;
pub const NFPROTO_IPV6: u8 = 10;

pub const NF_INET_PRE_ROUTING: u32 = 0;
pub const NF_INET_LOCAL_IN: u32 = 1;
pub const NF_INET_FORWARD: u32 = 2;
pub const NF_INET_LOCAL_OUT: u32 = 3;
pub const NF_INET_POST_ROUTING: u32 = 4;
pub const NF_INET_INGRESS: u32 = 5;

pub const NF_ARP_IN: u32 = 0;
pub const NF_ARP_OUT: u32 = 1;
pub const NF_ARP_FORWARD: u32 = 2;

pub const NF_DROP: u32 = 0;
pub const NF_ACCEPT: u32 = 1;

pub const NFT_CONTINUE: i32 = -1;
pub const NFT_BREAK: i32 = -2;
pub const NFT_JUMP: i32 = -3;
pub const NFT_GOTO: i32 = -4;
pub const NFT_RETURN: i32 = -5;

pub const NFT_REG_VERDICT: u32 = 0;
pub const NFT_REG_1: u32 = 1;

pub const NFT_CMP_EQ: u32 = 0;
pub const NFT_CMP_NEQ: u32 = 1;
pub const NFT_CMP_LT: u32 = 2;
pub const NFT_CMP_LTE: u32 = 3;
pub const NFT_CMP_GT: u32 = 4;
pub const NFT_CMP_GTE: u32 = 5;

pub const NFT_PAYLOAD_LL_HEADER: u32 = 0;
pub const NFT_PAYLOAD_NETWORK_HEADER: u32 = 1;
pub const NFT_PAYLOAD_TRANSPORT_HEADER: u32 = 2;

pub const NFT_META_MARK: u32 = 3;
pub const NFT_META_IIF: u32 = 4;
pub const NFT_META_OIF: u32 = 5;
pub const NFT_META_IIFNAME: u32 = 6;
pub const NFT_META_OIFNAME: u32 = 7;
pub const NFT_META_NFPROTO: u32 = 15;
pub const NFT_META_L4PROTO: u32 = 16;

pub const IFNAMSIZ: usize = 16;

pub const CHAIN_TYPE_FILTER: &str = "filter";
pub const CHAIN_TYPE_ROUTE: &str = "route";
pub const CHAIN_TYPE_NAT: &str = "nat";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelTable {
    pub family: u8,
    pub name: String,
}

/// A chain as the transport stores it.
///
/// `policy` holds the verdict word in kernel byte order, see
/// [`policy_to_wire`] and [`policy_from_wire`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelChain {
    pub table: KernelTable,
    pub name: String,
    pub hooknum: Option<u32>,
    pub priority: Option<i32>,
    pub chain_type: Option<String>,
    pub policy: Option<u32>,
}

impl KernelChain {
    /// A reference to an existing chain, carrying only its identity.
    pub fn named(table: KernelTable, name: &str) -> Self {
        Self {
            table,
            name: name.to_string(),
            hooknum: None,
            priority: None,
            chain_type: None,
            policy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRule {
    pub table: KernelTable,
    pub chain: String,
    pub handle: Option<u64>,
    pub position: Option<u64>,
    pub exprs: Vec<RawExpr>,
}

/// One primitive of the kernel expression language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawExpr {
    Meta {
        key: u32,
        dreg: u32,
    },
    Payload {
        base: u32,
        offset: u32,
        len: u32,
        dreg: u32,
    },
    Bitwise {
        sreg: u32,
        dreg: u32,
        len: u32,
        mask: Vec<u8>,
        xor: Vec<u8>,
    },
    Cmp {
        sreg: u32,
        op: u32,
        data: Vec<u8>,
    },
    Counter {
        packets: u64,
        bytes: u64,
    },
    Immediate {
        dreg: u32,
        data: ImmediateData,
    },
    Queue {
        num: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmediateData {
    Verdict { code: i32, chain: Option<String> },
    Value(Vec<u8>),
}

fn hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("0x")?;
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

// Same layout as `nft --debug=netlink`
impl fmt::Display for RawExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Meta { key, dreg } => {
                write!(f, "[ meta load {} => reg {} ]", meta_key_name(*key), dreg)
            }
            Self::Payload {
                base,
                offset,
                len,
                dreg,
            } => {
                let base = match *base {
                    NFT_PAYLOAD_LL_HEADER => "link",
                    NFT_PAYLOAD_NETWORK_HEADER => "network",
                    NFT_PAYLOAD_TRANSPORT_HEADER => "transport",
                    _ => "unknown",
                };
                write!(
                    f,
                    "[ payload load {}b @ {} header + {} => reg {} ]",
                    len, base, offset, dreg
                )
            }
            Self::Bitwise {
                sreg,
                dreg,
                mask,
                xor,
                ..
            } => {
                write!(f, "[ bitwise reg {} = ( reg {} & ", dreg, sreg)?;
                hex(f, mask)?;
                f.write_str(" ) ^ ")?;
                hex(f, xor)?;
                f.write_str(" ]")
            }
            Self::Cmp { sreg, op, data } => {
                let op = match *op {
                    NFT_CMP_EQ => "eq",
                    NFT_CMP_NEQ => "neq",
                    NFT_CMP_LT => "lt",
                    NFT_CMP_LTE => "lte",
                    NFT_CMP_GT => "gt",
                    NFT_CMP_GTE => "gte",
                    _ => "unknown",
                };
                write!(f, "[ cmp {} reg {} ", op, sreg)?;
                hex(f, data)?;
                f.write_str(" ]")
            }
            Self::Counter { packets, bytes } => {
                write!(f, "[ counter pkts {} bytes {} ]", packets, bytes)
            }
            Self::Immediate { dreg, data } => match data {
                ImmediateData::Verdict { code, chain } => {
                    let verdict = match *code {
                        NFT_CONTINUE => "continue",
                        NFT_BREAK => "break",
                        NFT_JUMP => "jump",
                        NFT_GOTO => "goto",
                        NFT_RETURN => "return",
                        c if c == NF_DROP as i32 => "drop",
                        c if c == NF_ACCEPT as i32 => "accept",
                        _ => "unknown",
                    };
                    write!(f, "[ immediate reg {} {}", dreg, verdict)?;
                    if let Some(chain) = chain {
                        write!(f, " -> {}", chain)?;
                    }
                    f.write_str(" ]")
                }
                ImmediateData::Value(bytes) => {
                    write!(f, "[ immediate reg {} ", dreg)?;
                    hex(f, bytes)?;
                    f.write_str(" ]")
                }
            },
            Self::Queue { num } => write!(f, "[ queue num {} ]", num),
        }
    }
}

fn meta_key_name(key: u32) -> String {
    match key {
        NFT_META_MARK => "mark".to_string(),
        NFT_META_IIF => "iif".to_string(),
        NFT_META_OIF => "oif".to_string(),
        NFT_META_IIFNAME => "iifname".to_string(),
        NFT_META_OIFNAME => "oifname".to_string(),
        NFT_META_NFPROTO => "nfproto".to_string(),
        NFT_META_L4PROTO => "l4proto".to_string(),
        other => format!("key {}", other),
    }
}

/// Byte order of the host the kernel runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOrder {
    Little,
    Big,
}

impl HostOrder {
    #[cfg(target_endian = "little")]
    pub const NATIVE: HostOrder = HostOrder::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: HostOrder = HostOrder::Big;

    pub fn u32_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            HostOrder::Little => value.to_le_bytes(),
            HostOrder::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_from_bytes(self, bytes: [u8; 4]) -> u32 {
        match self {
            HostOrder::Little => u32::from_le_bytes(bytes),
            HostOrder::Big => u32::from_be_bytes(bytes),
        }
    }
}

/// Turn a chain policy verdict into the word stored on a [`KernelChain`].
pub fn policy_to_wire(verdict: u32, host: HostOrder) -> u32 {
    u32::from_be_bytes(host.u32_to_bytes(verdict))
}

/// Recover the policy verdict from a stored word: write it big-endian and
/// read the bytes back in host order.
pub fn policy_from_wire(raw: u32, host: HostOrder) -> u32 {
    host.u32_from_bytes(raw.to_be_bytes())
}
