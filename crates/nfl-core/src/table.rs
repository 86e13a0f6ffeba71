use crate::error::{Error, Result};
use crate::kernel::{
    KernelTable, NFPROTO_ARP, NFPROTO_BRIDGE, NFPROTO_INET, NFPROTO_IPV4, NFPROTO_IPV6,
    NFPROTO_NETDEV,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ip,
    Ip6,
    Inet,
    Arp,
    Bridge,
    Netdev,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Ip6 => "ip6",
            Self::Inet => "inet",
            Self::Arp => "arp",
            Self::Bridge => "bridge",
            Self::Netdev => "netdev",
        }
    }

    pub fn to_nfproto(self) -> u8 {
        match self {
            Self::Ip => NFPROTO_IPV4,
            Self::Ip6 => NFPROTO_IPV6,
            Self::Inet => NFPROTO_INET,
            Self::Arp => NFPROTO_ARP,
            Self::Bridge => NFPROTO_BRIDGE,
            Self::Netdev => NFPROTO_NETDEV,
        }
    }

    pub fn from_nfproto(value: u8) -> Option<Self> {
        match value {
            NFPROTO_IPV4 => Some(Self::Ip),
            NFPROTO_IPV6 => Some(Self::Ip6),
            NFPROTO_INET => Some(Self::Inet),
            NFPROTO_ARP => Some(Self::Arp),
            NFPROTO_BRIDGE => Some(Self::Bridge),
            NFPROTO_NETDEV => Some(Self::Netdev),
            _ => None,
        }
    }

    /// Families whose packets carry an IP header
    pub fn is_ip(&self) -> bool {
        matches!(self, Self::Ip | Self::Ip6 | Self::Inet)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" => Ok(Self::Ip),
            "ip6" => Ok(Self::Ip6),
            "inet" => Ok(Self::Inet),
            "arp" => Ok(Self::Arp),
            "bridge" => Ok(Self::Bridge),
            "netdev" => Ok(Self::Netdev),
            other => Err(format!("unknown family '{}'", other)),
        }
    }
}

/// Named container of chains, identified by (family, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Table {
    pub family: Family,
    pub name: String,
}

impl Table {
    pub fn new(family: Family, name: &str) -> Self {
        Self {
            family,
            name: name.to_string(),
        }
    }

    pub fn to_kernel(&self) -> KernelTable {
        KernelTable {
            family: self.family.to_nfproto(),
            name: self.name.clone(),
        }
    }

    pub fn from_kernel(table: &KernelTable) -> Result<Self> {
        let family = Family::from_nfproto(table.family).ok_or(Error::UnknownFamily(table.family))?;
        Ok(Self {
            family,
            name: table.name.clone(),
        })
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_maps_family_numbers() {
        let table = Table::new(Family::Inet, "filter");
        let kernel = table.to_kernel();
        assert_eq!(kernel.family, NFPROTO_INET);
        assert_eq!(Table::from_kernel(&kernel).unwrap(), table);
    }

    #[test]
    fn unknown_family_is_an_error() {
        let kernel = KernelTable {
            family: 99,
            name: "odd".into(),
        };
        assert!(matches!(Table::from_kernel(&kernel), Err(Error::UnknownFamily(99))));
    }

    #[test]
    fn family_parses_case_insensitively() {
        assert_eq!("INET".parse::<Family>().unwrap(), Family::Inet);
        assert!("ipx".parse::<Family>().is_err());
    }
}
