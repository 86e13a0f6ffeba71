//! Lowering of typed expressions to kernel primitives and back.
//!
//! A match becomes a load into register 1 (meta or payload), an optional
//! bitwise mask for address prefixes, and a compare. Counters and verdicts
//! map one to one. Decoding walks the primitive list left to right and is
//! the exact inverse on this subset; anything else is reported with the
//! index of the primitive that could not be understood.

use crate::error::{DecodeError, EncodeError};
use crate::expr::{CmpOp, Counter, Expr, Field, Match, PayloadBase, Value, Verdict};
use crate::kernel::{
    HostOrder, IFNAMSIZ, ImmediateData, NF_ACCEPT, NF_DROP, NFT_CMP_EQ, NFT_CMP_GT,
    NFT_CMP_GTE, NFT_CMP_LT, NFT_CMP_LTE, NFT_CMP_NEQ, NFT_CONTINUE, NFT_GOTO, NFT_JUMP,
    NFT_META_IIF, NFT_META_IIFNAME, NFT_META_L4PROTO, NFT_META_MARK, NFT_META_NFPROTO,
    NFT_META_OIF, NFT_META_OIFNAME, NFT_PAYLOAD_LL_HEADER, NFT_PAYLOAD_NETWORK_HEADER,
    NFT_PAYLOAD_TRANSPORT_HEADER, NFT_REG_1, NFT_REG_VERDICT, NFT_RETURN, RawExpr,
};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Largest value a single register compare can hold
const MAX_DATA_LEN: u32 = 16;

/// Largest byte offset whose bit offset still fits in 32 bits
pub const MAX_PAYLOAD_OFFSET: u32 = u32::MAX / 8;

pub fn encode(exprs: &[Expr]) -> Result<Vec<RawExpr>, EncodeError> {
    encode_with(exprs, HostOrder::NATIVE)
}

pub fn decode(raw: &[RawExpr]) -> Result<Vec<Expr>, DecodeError> {
    decode_with(raw, HostOrder::NATIVE)
}

pub(crate) fn encode_with(exprs: &[Expr], host: HostOrder) -> Result<Vec<RawExpr>, EncodeError> {
    let mut out = Vec::with_capacity(exprs.len() * 2);

    for (position, expr) in exprs.iter().enumerate() {
        match expr {
            Expr::Match(m) => encode_match(m, host, &mut out)
                .map_err(|reason| EncodeError::new(position, reason))?,
            Expr::Counter(c) => out.push(RawExpr::Counter {
                packets: c.packets,
                bytes: c.bytes,
            }),
            Expr::Verdict(v) => out.push(encode_verdict(v)),
        }
    }

    Ok(out)
}

pub(crate) fn decode_with(raw: &[RawExpr], host: HostOrder) -> Result<Vec<Expr>, DecodeError> {
    let mut exprs = Vec::new();
    let mut i = 0;

    while i < raw.len() {
        match &raw[i] {
            RawExpr::Meta { .. } | RawExpr::Payload { .. } => {
                let (m, consumed) = decode_match(raw, i, host)?;
                exprs.push(Expr::Match(m));
                i += consumed;
            }
            RawExpr::Counter { packets, bytes } => {
                exprs.push(Expr::Counter(Counter {
                    packets: *packets,
                    bytes: *bytes,
                }));
                i += 1;
            }
            RawExpr::Immediate { dreg, data } => {
                if *dreg != NFT_REG_VERDICT {
                    let reason = format!("immediate into data register {}", dreg);
                    return Err(DecodeError::new(i, reason));
                }
                let verdict = decode_verdict(data).map_err(|reason| DecodeError::new(i, reason))?;
                exprs.push(Expr::Verdict(verdict));
                i += 1;
            }
            RawExpr::Queue { num } => {
                exprs.push(Expr::Verdict(Verdict::Queue(*num)));
                i += 1;
            }
            RawExpr::Bitwise { .. } => {
                return Err(DecodeError::new(i, "bitwise without a preceding load"));
            }
            RawExpr::Cmp { .. } => {
                return Err(DecodeError::new(i, "compare without a preceding load"));
            }
        }
    }

    Ok(exprs)
}

fn encode_match(m: &Match, host: HostOrder, out: &mut Vec<RawExpr>) -> Result<(), String> {
    let load = field_load(&m.field)?;
    let width = field_width(&m.field);
    let (data, mask) = encode_value(&m.field, &m.value, width, host)?;

    out.push(load);
    if let Some(mask) = mask {
        out.push(RawExpr::Bitwise {
            sreg: NFT_REG_1,
            dreg: NFT_REG_1,
            len: width,
            xor: vec![0; mask.len()],
            mask,
        });
    }
    out.push(RawExpr::Cmp {
        sreg: NFT_REG_1,
        op: cmp_op_to_kernel(m.op),
        data,
    });

    Ok(())
}

fn encode_verdict(verdict: &Verdict) -> RawExpr {
    let (code, chain) = match verdict {
        Verdict::Accept => (NF_ACCEPT as i32, None),
        Verdict::Drop => (NF_DROP as i32, None),
        Verdict::Return => (NFT_RETURN, None),
        Verdict::Continue => (NFT_CONTINUE, None),
        Verdict::Jump(target) => (NFT_JUMP, Some(target.clone())),
        Verdict::Goto(target) => (NFT_GOTO, Some(target.clone())),
        Verdict::Queue(num) => return RawExpr::Queue { num: *num },
    };

    RawExpr::Immediate {
        dreg: NFT_REG_VERDICT,
        data: ImmediateData::Verdict { code, chain },
    }
}

fn decode_verdict(data: &ImmediateData) -> Result<Verdict, String> {
    let (code, chain) = match data {
        ImmediateData::Verdict { code, chain } => (*code, chain),
        ImmediateData::Value(_) => return Err("immediate value in verdict register".to_string()),
    };

    match code {
        c if c == NF_ACCEPT as i32 => Ok(Verdict::Accept),
        c if c == NF_DROP as i32 => Ok(Verdict::Drop),
        NFT_RETURN => Ok(Verdict::Return),
        NFT_CONTINUE => Ok(Verdict::Continue),
        NFT_JUMP | NFT_GOTO => {
            let target = chain
                .clone()
                .ok_or_else(|| "jump without a target chain".to_string())?;
            if code == NFT_JUMP {
                Ok(Verdict::Jump(target))
            } else {
                Ok(Verdict::Goto(target))
            }
        }
        other => Err(format!("unsupported verdict code {}", other)),
    }
}

fn decode_match(
    raw: &[RawExpr],
    start: usize,
    host: HostOrder,
) -> Result<(Match, usize), DecodeError> {
    let (field, width) = match &raw[start] {
        RawExpr::Meta { key, dreg } => {
            check_reg(*dreg, start)?;
            let field = meta_field(*key)
                .ok_or_else(|| DecodeError::new(start, format!("unsupported meta key {}", key)))?;
            (field, field_width(&field))
        }
        RawExpr::Payload {
            base,
            offset,
            len,
            dreg,
        } => {
            check_reg(*dreg, start)?;
            if *len == 0 || *len > MAX_DATA_LEN {
                return Err(DecodeError::new(start, format!("payload length {}", len)));
            }
            let field = payload_field(*base, *offset, *len).ok_or_else(|| {
                DecodeError::new(start, format!("unsupported payload base {}", base))
            })?;
            (field, *len)
        }
        _ => unreachable!("decode_match starts at a load"),
    };

    let mut next = start + 1;
    let mut mask = None;

    if let Some(RawExpr::Bitwise {
        sreg,
        dreg,
        len,
        mask: bits,
        xor,
    }) = raw.get(next)
    {
        if *sreg != NFT_REG_1 || *dreg != NFT_REG_1 {
            return Err(DecodeError::new(next, "bitwise on a different register"));
        }
        if *len != width || bits.len() as u32 != width {
            return Err(DecodeError::new(next, "bitwise length does not match the load"));
        }
        if xor.iter().any(|b| *b != 0) {
            return Err(DecodeError::new(next, "bitwise with non-zero xor"));
        }
        if !field.is_address() {
            return Err(DecodeError::new(next, format!("mask on non-address field {}", field)));
        }
        mask = Some((next, bits.as_slice()));
        next += 1;
    }

    let (op, data) = match raw.get(next) {
        Some(RawExpr::Cmp { sreg, op, data }) => {
            if *sreg != NFT_REG_1 {
                return Err(DecodeError::new(next, format!("compare reads register {}", sreg)));
            }
            let op = cmp_op_from_kernel(*op)
                .ok_or_else(|| DecodeError::new(next, format!("unknown compare op {}", op)))?;
            (op, data)
        }
        _ => return Err(DecodeError::new(start, "load without a compare")),
    };

    if data.len() as u32 != width {
        return Err(DecodeError::new(
            next,
            format!("compare data is {} bytes, load is {}", data.len(), width),
        ));
    }

    let value = match mask {
        Some((mask_pos, bits)) => {
            decode_prefix(data, bits).map_err(|reason| DecodeError::new(mask_pos, reason))?
        }
        None => decode_value(&field, data, host).map_err(|reason| DecodeError::new(next, reason))?,
    };

    Ok((Match { field, op, value }, next + 1 - start))
}

fn check_reg(dreg: u32, position: usize) -> Result<(), DecodeError> {
    if dreg == NFT_REG_1 {
        Ok(())
    } else {
        Err(DecodeError::new(position, format!("load into register {}", dreg)))
    }
}

fn field_load(field: &Field) -> Result<RawExpr, String> {
    let meta = |key| Ok(RawExpr::Meta { key, dreg: NFT_REG_1 });
    let payload = |base, offset, len| {
        Ok(RawExpr::Payload {
            base,
            offset,
            len,
            dreg: NFT_REG_1,
        })
    };

    match *field {
        Field::L4proto => meta(NFT_META_L4PROTO),
        Field::Nfproto => meta(NFT_META_NFPROTO),
        Field::Mark => meta(NFT_META_MARK),
        Field::Iif => meta(NFT_META_IIF),
        Field::Oif => meta(NFT_META_OIF),
        Field::Iifname => meta(NFT_META_IIFNAME),
        Field::Oifname => meta(NFT_META_OIFNAME),
        Field::IpSaddr => payload(NFT_PAYLOAD_NETWORK_HEADER, 12, 4),
        Field::IpDaddr => payload(NFT_PAYLOAD_NETWORK_HEADER, 16, 4),
        Field::Ip6Saddr => payload(NFT_PAYLOAD_NETWORK_HEADER, 8, 16),
        Field::Ip6Daddr => payload(NFT_PAYLOAD_NETWORK_HEADER, 24, 16),
        Field::Sport => payload(NFT_PAYLOAD_TRANSPORT_HEADER, 0, 2),
        Field::Dport => payload(NFT_PAYLOAD_TRANSPORT_HEADER, 2, 2),
        Field::Payload { base, offset, len } => {
            if len == 0 || len > MAX_DATA_LEN {
                return Err(format!("payload length {} outside 1..={}", len, MAX_DATA_LEN));
            }
            if offset > MAX_PAYLOAD_OFFSET {
                return Err(format!("payload offset {} beyond {}", offset, MAX_PAYLOAD_OFFSET));
            }
            let base = payload_base_to_kernel(base);
            // a raw load of a named field would decode as that field
            if let Some(named) = named_payload_field(base, offset, len) {
                return Err(format!("{} is {}, match it by name", field, named));
            }
            payload(base, offset, len)
        }
    }
}

/// Bytes the load places in the register
fn field_width(field: &Field) -> u32 {
    match field {
        Field::L4proto | Field::Nfproto => 1,
        Field::Mark | Field::Iif | Field::Oif => 4,
        Field::Iifname | Field::Oifname => IFNAMSIZ as u32,
        Field::IpSaddr | Field::IpDaddr => 4,
        Field::Ip6Saddr | Field::Ip6Daddr => 16,
        Field::Sport | Field::Dport => 2,
        Field::Payload { len, .. } => *len,
    }
}

fn meta_field(key: u32) -> Option<Field> {
    match key {
        NFT_META_L4PROTO => Some(Field::L4proto),
        NFT_META_NFPROTO => Some(Field::Nfproto),
        NFT_META_MARK => Some(Field::Mark),
        NFT_META_IIF => Some(Field::Iif),
        NFT_META_OIF => Some(Field::Oif),
        NFT_META_IIFNAME => Some(Field::Iifname),
        NFT_META_OIFNAME => Some(Field::Oifname),
        _ => None,
    }
}

/// The named field a raw payload load is equivalent to, or the field itself
pub fn canonical_field(field: Field) -> Field {
    match field {
        Field::Payload { base, offset, len } => {
            named_payload_field(payload_base_to_kernel(base), offset, len).unwrap_or(field)
        }
        other => other,
    }
}

fn named_payload_field(base: u32, offset: u32, len: u32) -> Option<Field> {
    match (base, offset, len) {
        (NFT_PAYLOAD_NETWORK_HEADER, 12, 4) => Some(Field::IpSaddr),
        (NFT_PAYLOAD_NETWORK_HEADER, 16, 4) => Some(Field::IpDaddr),
        (NFT_PAYLOAD_NETWORK_HEADER, 8, 16) => Some(Field::Ip6Saddr),
        (NFT_PAYLOAD_NETWORK_HEADER, 24, 16) => Some(Field::Ip6Daddr),
        (NFT_PAYLOAD_TRANSPORT_HEADER, 0, 2) => Some(Field::Sport),
        (NFT_PAYLOAD_TRANSPORT_HEADER, 2, 2) => Some(Field::Dport),
        _ => None,
    }
}

fn payload_field(base: u32, offset: u32, len: u32) -> Option<Field> {
    if let Some(named) = named_payload_field(base, offset, len) {
        return Some(named);
    }

    let base = payload_base_from_kernel(base)?;
    Some(Field::Payload { base, offset, len })
}

pub(crate) fn payload_base_to_kernel(base: PayloadBase) -> u32 {
    match base {
        PayloadBase::Link => NFT_PAYLOAD_LL_HEADER,
        PayloadBase::Network => NFT_PAYLOAD_NETWORK_HEADER,
        PayloadBase::Transport => NFT_PAYLOAD_TRANSPORT_HEADER,
    }
}

pub(crate) fn payload_base_from_kernel(base: u32) -> Option<PayloadBase> {
    match base {
        NFT_PAYLOAD_LL_HEADER => Some(PayloadBase::Link),
        NFT_PAYLOAD_NETWORK_HEADER => Some(PayloadBase::Network),
        NFT_PAYLOAD_TRANSPORT_HEADER => Some(PayloadBase::Transport),
        _ => None,
    }
}

fn cmp_op_to_kernel(op: CmpOp) -> u32 {
    match op {
        CmpOp::Eq => NFT_CMP_EQ,
        CmpOp::Neq => NFT_CMP_NEQ,
        CmpOp::Lt => NFT_CMP_LT,
        CmpOp::Lte => NFT_CMP_LTE,
        CmpOp::Gt => NFT_CMP_GT,
        CmpOp::Gte => NFT_CMP_GTE,
    }
}

fn cmp_op_from_kernel(op: u32) -> Option<CmpOp> {
    match op {
        NFT_CMP_EQ => Some(CmpOp::Eq),
        NFT_CMP_NEQ => Some(CmpOp::Neq),
        NFT_CMP_LT => Some(CmpOp::Lt),
        NFT_CMP_LTE => Some(CmpOp::Lte),
        NFT_CMP_GT => Some(CmpOp::Gt),
        NFT_CMP_GTE => Some(CmpOp::Gte),
        _ => None,
    }
}

/// Compare data plus an optional prefix mask for `value` against `field`.
fn encode_value(
    field: &Field,
    value: &Value,
    width: u32,
    host: HostOrder,
) -> Result<(Vec<u8>, Option<Vec<u8>>), String> {
    match (field, value) {
        (Field::L4proto | Field::Nfproto, Value::Int(v)) => {
            let byte = u8::try_from(*v).map_err(|_| format!("{} does not fit in 8 bits", v))?;
            Ok((vec![byte], None))
        }
        // meta words are compared in host byte order
        (Field::Mark | Field::Iif | Field::Oif, Value::Int(v)) => {
            let word = u32::try_from(*v).map_err(|_| format!("{} does not fit in 32 bits", v))?;
            Ok((host.u32_to_bytes(word).to_vec(), None))
        }
        (Field::Iifname | Field::Oifname, Value::Iface(name)) => {
            if name.is_empty() || name.len() >= IFNAMSIZ || name.contains('\0') {
                return Err(format!("invalid interface name '{}'", name));
            }
            let mut data = name.as_bytes().to_vec();
            data.resize(IFNAMSIZ, 0);
            Ok((data, None))
        }
        (Field::Sport | Field::Dport, Value::Int(v)) => {
            let port = u16::try_from(*v).map_err(|_| format!("{} is not a port", v))?;
            Ok((port.to_be_bytes().to_vec(), None))
        }
        (Field::IpSaddr | Field::IpDaddr, Value::Addr(IpAddr::V4(addr))) => {
            Ok((addr.octets().to_vec(), None))
        }
        (Field::Ip6Saddr | Field::Ip6Daddr, Value::Addr(IpAddr::V6(addr))) => {
            Ok((addr.octets().to_vec(), None))
        }
        (Field::IpSaddr | Field::IpDaddr | Field::Ip6Saddr | Field::Ip6Daddr, Value::Prefix(net))
            if net.addr() != net.network() =>
        {
            Err(format!("{} has bits set past the prefix, expected {}", net, net.trunc()))
        }
        (Field::IpSaddr | Field::IpDaddr, Value::Prefix(IpNet::V4(net))) => Ok((
            net.network().octets().to_vec(),
            Some(net.netmask().octets().to_vec()),
        )),
        (Field::Ip6Saddr | Field::Ip6Daddr, Value::Prefix(IpNet::V6(net))) => Ok((
            net.network().octets().to_vec(),
            Some(net.netmask().octets().to_vec()),
        )),
        (Field::Payload { .. }, Value::Bytes(bytes)) => {
            if bytes.len() as u32 != width {
                return Err(format!("{} bytes for a {} byte payload", bytes.len(), width));
            }
            Ok((bytes.clone(), None))
        }
        // raw payloads compare bytes and decode as bytes
        (Field::Payload { .. }, Value::Int(v)) => Err(format!(
            "raw payload {} takes a byte list, not the integer {}",
            field, v
        )),
        (field, value) => Err(format!("value {} does not apply to {}", value, field)),
    }
}

fn decode_value(field: &Field, data: &[u8], host: HostOrder) -> Result<Value, String> {
    match field {
        Field::L4proto | Field::Nfproto => Ok(Value::Int(data[0].into())),
        Field::Mark | Field::Iif | Field::Oif => {
            let word = host.u32_from_bytes(to_array(data)?);
            Ok(Value::Int(word.into()))
        }
        Field::Iifname | Field::Oifname => {
            let end = data.iter().position(|b| *b == 0).ok_or("interface name is not terminated")?;
            if data[end..].iter().any(|b| *b != 0) || end == 0 {
                return Err("malformed interface name".to_string());
            }
            let name = std::str::from_utf8(&data[..end]).map_err(|e| e.to_string())?;
            Ok(Value::Iface(name.to_string()))
        }
        Field::Sport | Field::Dport => {
            Ok(Value::Int(u16::from_be_bytes([data[0], data[1]]).into()))
        }
        Field::IpSaddr | Field::IpDaddr => {
            let octets: [u8; 4] = to_array(data)?;
            Ok(Value::Addr(IpAddr::V4(Ipv4Addr::from(octets))))
        }
        Field::Ip6Saddr | Field::Ip6Daddr => {
            let octets: [u8; 16] = to_array(data)?;
            Ok(Value::Addr(IpAddr::V6(Ipv6Addr::from(octets))))
        }
        Field::Payload { .. } => Ok(Value::Bytes(data.to_vec())),
    }
}

fn decode_prefix(data: &[u8], mask: &[u8]) -> Result<Value, String> {
    let prefix = prefix_len(mask).ok_or("mask is not a prefix")?;
    if data.iter().zip(mask).any(|(d, m)| d & !m != 0) {
        return Err("address has bits outside the mask".to_string());
    }

    let net = match data.len() {
        4 => {
            let octets: [u8; 4] = to_array(data)?;
            IpNet::new(IpAddr::V4(Ipv4Addr::from(octets)), prefix)
        }
        16 => {
            let octets: [u8; 16] = to_array(data)?;
            IpNet::new(IpAddr::V6(Ipv6Addr::from(octets)), prefix)
        }
        n => return Err(format!("{} byte mask is not an address", n)),
    };

    net.map(Value::Prefix).map_err(|e| e.to_string())
}

/// Number of leading one bits, if the mask is a run of ones then zeros
fn prefix_len(mask: &[u8]) -> Option<u8> {
    let mut len = 0u32;
    let mut seen_zero = false;

    for byte in mask {
        for bit in (0..8).rev() {
            if byte & (1 << bit) != 0 {
                if seen_zero {
                    return None;
                }
                len += 1;
            } else {
                seen_zero = true;
            }
        }
    }

    u8::try_from(len).ok()
}

fn to_array<const N: usize>(data: &[u8]) -> Result<[u8; N], String> {
    data.try_into()
        .map_err(|_| format!("expected {} bytes, found {}", N, data.len()))
}
