// Typed rule expressions
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBase {
    Link,
    Network,
    Transport,
}

/// What a match loads from the packet or its metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    L4proto,
    Nfproto,
    Mark,
    Iif,
    Oif,
    Iifname,
    Oifname,
    IpSaddr,
    IpDaddr,
    Ip6Saddr,
    Ip6Daddr,
    Sport,
    Dport,
    /// Raw header bytes, offset and length in bytes
    Payload {
        base: PayloadBase,
        offset: u32,
        len: u32,
    },
}

impl Field {
    pub fn is_address(&self) -> bool {
        matches!(
            self,
            Self::IpSaddr | Self::IpDaddr | Self::Ip6Saddr | Self::Ip6Daddr
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L4proto => f.write_str("meta l4proto"),
            Self::Nfproto => f.write_str("meta nfproto"),
            Self::Mark => f.write_str("meta mark"),
            Self::Iif => f.write_str("meta iif"),
            Self::Oif => f.write_str("meta oif"),
            Self::Iifname => f.write_str("meta iifname"),
            Self::Oifname => f.write_str("meta oifname"),
            Self::IpSaddr => f.write_str("ip saddr"),
            Self::IpDaddr => f.write_str("ip daddr"),
            Self::Ip6Saddr => f.write_str("ip6 saddr"),
            Self::Ip6Daddr => f.write_str("ip6 daddr"),
            Self::Sport => f.write_str("th sport"),
            Self::Dport => f.write_str("th dport"),
            Self::Payload { base, offset, len } => {
                let base = match base {
                    PayloadBase::Link => "ll",
                    PayloadBase::Network => "nh",
                    PayloadBase::Transport => "th",
                };
                write!(f, "@{},{},{}", base, u64::from(*offset) * 8, u64::from(*len) * 8)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    #[default]
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Neq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            _ => None,
        }
    }
}

/// The right-hand side of a match. Integers take their width and byte
/// order from the field they are compared against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(u64),
    Bytes(Vec<u8>),
    Prefix(IpNet),
    Addr(IpAddr),
    Iface(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Self::Prefix(net) => write!(f, "{}", net),
            Self::Addr(addr) => write!(f, "{}", addr),
            Self::Iface(name) => write!(f, "\"{}\"", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    pub field: Field,
    #[serde(default)]
    pub op: CmpOp,
    pub value: Value,
}

impl Match {
    pub fn new(field: Field, op: CmpOp, value: Value) -> Self {
        Self { field, op, value }
    }

    pub fn eq(field: Field, value: Value) -> Self {
        Self::new(field, CmpOp::Eq, value)
    }

    pub fn l4proto(proto: u8) -> Self {
        Self::eq(Field::L4proto, Value::Int(proto.into()))
    }

    pub fn dport(port: u16) -> Self {
        Self::eq(Field::Dport, Value::Int(port.into()))
    }

    pub fn sport(port: u16) -> Self {
        Self::eq(Field::Sport, Value::Int(port.into()))
    }

    pub fn iifname(name: &str) -> Self {
        Self::eq(Field::Iifname, Value::Iface(name.to_string()))
    }

    pub fn oifname(name: &str) -> Self {
        Self::eq(Field::Oifname, Value::Iface(name.to_string()))
    }

    pub fn saddr(net: IpNet) -> Self {
        let field = match net {
            IpNet::V4(_) => Field::IpSaddr,
            IpNet::V6(_) => Field::Ip6Saddr,
        };
        Self::eq(field, Value::Prefix(net))
    }

    pub fn daddr(net: IpNet) -> Self {
        let field = match net {
            IpNet::V4(_) => Field::IpDaddr,
            IpNet::V6(_) => Field::Ip6Daddr,
        };
        Self::eq(field, Value::Prefix(net))
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub packets: u64,
    #[serde(default)]
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Drop,
    Queue(u16),
    Jump(String),
    Goto(String),
    Return,
    Continue,
}

impl Verdict {
    /// Chain named by a jump or goto
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Jump(chain) | Self::Goto(chain) => Some(chain),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Drop => f.write_str("drop"),
            Self::Queue(num) => write!(f, "queue num {}", num),
            Self::Jump(chain) => write!(f, "jump {}", chain),
            Self::Goto(chain) => write!(f, "goto {}", chain),
            Self::Return => f.write_str("return"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

/// One step of a rule, evaluated left to right
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expr {
    Match(Match),
    Counter(Counter),
    Verdict(Verdict),
}

impl From<Match> for Expr {
    fn from(m: Match) -> Self {
        Expr::Match(m)
    }
}

impl From<Counter> for Expr {
    fn from(c: Counter) -> Self {
        Expr::Counter(c)
    }
}

impl From<Verdict> for Expr {
    fn from(v: Verdict) -> Self {
        Expr::Verdict(v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(m) => write!(f, "{}", m),
            Self::Counter(c) => write!(f, "counter packets {} bytes {}", c.packets, c.bytes),
            Self::Verdict(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_parse_from_yaml() {
        let exprs: Vec<Expr> = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(
                r#"
- match: { field: l4proto, value: 6 }
- match: { field: ip_saddr, op: neq, value: "10.0.0.0/8" }
- match: { field: ip_daddr, value: "192.0.2.1" }
- match: { field: iifname, value: eth0 }
- match: { field: { payload: { base: transport, offset: 0, len: 2 } }, value: [0, 80] }
- counter: {}
- verdict: { jump: other }
- verdict: accept
"#,
            ),
        )
        .unwrap();

        assert_eq!(exprs[0], Expr::Match(Match::l4proto(IPPROTO_TCP)));
        match &exprs[1] {
            Expr::Match(m) => {
                assert_eq!(m.op, CmpOp::Neq);
                assert!(matches!(m.value, Value::Prefix(_)));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
        match &exprs[2] {
            Expr::Match(m) => assert!(matches!(m.value, Value::Addr(_))),
            other => panic!("unexpected expr: {:?}", other),
        }
        assert_eq!(exprs[3], Expr::Match(Match::iifname("eth0")));
        match &exprs[4] {
            Expr::Match(m) => assert_eq!(m.value, Value::Bytes(vec![0, 80])),
            other => panic!("unexpected expr: {:?}", other),
        }
        assert_eq!(exprs[5], Expr::Counter(Counter::default()));
        assert_eq!(exprs[6], Expr::Verdict(Verdict::Jump("other".into())));
        assert_eq!(exprs[7], Expr::Verdict(Verdict::Accept));
    }

    #[test]
    fn display_reads_like_nft() {
        let m = Match::saddr("10.0.0.0/8".parse().unwrap());
        assert_eq!(m.to_string(), "ip saddr == 10.0.0.0/8");
        assert_eq!(Expr::from(Match::dport(22)).to_string(), "th dport == 22");
        assert_eq!(Verdict::Jump("x".into()).to_string(), "jump x");
    }
}
