// nftables JSON documents built from and parsed into the core model
use nfl_core::codec;
use nfl_core::expr::Value as Datum;
use nfl_core::kernel::{
    HostOrder, KernelChain, KernelRule, KernelTable, NF_INET_INGRESS, policy_from_wire,
    policy_to_wire,
};
use nfl_core::{
    BatchOp, ChainHook, ChainPolicy, CmpOp, Counter, Expr, Family, Field, IPPROTO_ICMP,
    IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP, Match, PayloadBase, TransportError, Verdict,
};
use serde_json::{Value, json};
use std::fmt;
use std::net::IpAddr;

type Result<T> = std::result::Result<T, TransportError>;

/// Stands in for hooks and policies nft names but this model does not know.
/// Both decode to `None` through [`nfl_core::Chain::from_kernel`].
const UNKNOWN_HOOKNUM: u32 = u32::MAX;
const UNKNOWN_POLICY: u32 = u32::MAX;

const IPPROTO_DCCP: u8 = 33;
const IPPROTO_SCTP: u8 = 132;
const IPPROTO_UDPLITE: u8 = 136;

/// Objects found in the output of `nft -j list ...`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub tables: Vec<KernelTable>,
    pub chains: Vec<KernelChain>,
    pub rules: Vec<KernelRule>,
}

fn unsupported(what: impl Into<String>) -> TransportError {
    TransportError::Unsupported(what.into())
}

/// Prefix an unsupported-object error with where it was found
fn locate(err: TransportError, location: impl fmt::Display) -> TransportError {
    match err {
        TransportError::Unsupported(reason) => {
            TransportError::Unsupported(format!("{}: {}", location, reason))
        }
        other => other,
    }
}

/// Render a batch as one `{"nftables": [...]}` document
pub fn render_batch(batch: &[BatchOp]) -> Result<Value> {
    let commands = batch.iter().map(render_op).collect::<Result<Vec<_>>>()?;
    Ok(json!({ "nftables": commands }))
}

fn render_op(op: &BatchOp) -> Result<Value> {
    Ok(match op {
        BatchOp::AddTable(t) => json!({"add": {"table": table_json(t)?}}),
        BatchOp::DelTable(t) => json!({"delete": {"table": table_json(t)?}}),
        BatchOp::AddChain(c) => json!({"add": {"chain": chain_json(c)?}}),
        BatchOp::DelChain(c) => json!({"delete": {"chain": chain_ref_json(c)?}}),
        BatchOp::FlushChain(c) => json!({"flush": {"chain": chain_ref_json(c)?}}),
        // on add and insert the handle names the rule to place against
        BatchOp::AddRule(r) => json!({"add": {"rule": rule_json(r, r.position, true)?}}),
        BatchOp::InsertRule(r) => json!({"insert": {"rule": rule_json(r, r.position, true)?}}),
        BatchOp::DelRule(r) => json!({"delete": {"rule": rule_json(r, r.handle, false)?}}),
        BatchOp::ReplaceRule(r) => json!({"replace": {"rule": rule_json(r, r.handle, true)?}}),
    })
}

fn family_name(nfproto: u8) -> Result<&'static str> {
    Family::from_nfproto(nfproto)
        .map(|f| f.as_str())
        .ok_or_else(|| unsupported(format!("family {}", nfproto)))
}

fn table_json(table: &KernelTable) -> Result<Value> {
    Ok(json!({
        "family": family_name(table.family)?,
        "name": table.name,
    }))
}

fn chain_ref_json(chain: &KernelChain) -> Result<Value> {
    Ok(json!({
        "family": family_name(chain.table.family)?,
        "table": chain.table.name,
        "name": chain.name,
    }))
}

fn chain_json(chain: &KernelChain) -> Result<Value> {
    let mut value = chain_ref_json(chain)?;
    let Some(hooknum) = chain.hooknum else {
        return Ok(value);
    };

    let family = Family::from_nfproto(chain.table.family);
    let hook = ChainHook::from_hooknum(hooknum, family)
        .ok_or_else(|| unsupported(format!("hook {}", hooknum)))?;
    value["hook"] = json!(hook.as_str());
    value["prio"] = json!(chain.priority.unwrap_or(0));
    if let Some(chain_type) = &chain.chain_type {
        value["type"] = json!(chain_type);
    }
    if let Some(raw) = chain.policy {
        let verdict = policy_from_wire(raw, HostOrder::NATIVE);
        let policy = ChainPolicy::from_verdict(verdict)
            .ok_or_else(|| unsupported(format!("policy verdict {}", verdict)))?;
        value["policy"] = json!(policy.as_str());
    }
    Ok(value)
}

fn rule_json(rule: &KernelRule, handle: Option<u64>, with_exprs: bool) -> Result<Value> {
    let mut value = json!({
        "family": family_name(rule.table.family)?,
        "table": rule.table.name,
        "chain": rule.chain,
    });
    if let Some(handle) = handle {
        value["handle"] = json!(handle);
    }
    if with_exprs {
        let exprs = codec::decode(&rule.exprs).map_err(|e| unsupported(e.to_string()))?;
        value["expr"] = Value::Array(render_exprs(&exprs)?);
    }
    Ok(value)
}

/// Typed expressions in nft JSON statement form
pub fn render_exprs(exprs: &[Expr]) -> Result<Vec<Value>> {
    exprs.iter().map(render_expr).collect()
}

fn render_expr(expr: &Expr) -> Result<Value> {
    Ok(match expr {
        Expr::Match(m) => json!({
            "match": {
                "op": m.op.symbol(),
                "left": field_json(&m.field),
                "right": datum_json(&m.value)?,
            }
        }),
        Expr::Counter(c) => json!({"counter": {"packets": c.packets, "bytes": c.bytes}}),
        Expr::Verdict(v) => match v {
            Verdict::Accept => json!({"accept": null}),
            Verdict::Drop => json!({"drop": null}),
            Verdict::Return => json!({"return": null}),
            Verdict::Continue => json!({"continue": null}),
            Verdict::Jump(target) => json!({"jump": {"target": target}}),
            Verdict::Goto(target) => json!({"goto": {"target": target}}),
            Verdict::Queue(num) => json!({"queue": {"num": num}}),
        },
    })
}

fn meta(key: &str) -> Value {
    json!({"meta": {"key": key}})
}

fn payload(protocol: &str, field: &str) -> Value {
    json!({"payload": {"protocol": protocol, "field": field}})
}

fn field_json(field: &Field) -> Value {
    match field {
        Field::L4proto => meta("l4proto"),
        Field::Nfproto => meta("nfproto"),
        Field::Mark => meta("mark"),
        Field::Iif => meta("iif"),
        Field::Oif => meta("oif"),
        Field::Iifname => meta("iifname"),
        Field::Oifname => meta("oifname"),
        Field::IpSaddr => payload("ip", "saddr"),
        Field::IpDaddr => payload("ip", "daddr"),
        Field::Ip6Saddr => payload("ip6", "saddr"),
        Field::Ip6Daddr => payload("ip6", "daddr"),
        Field::Sport => payload("th", "sport"),
        Field::Dport => payload("th", "dport"),
        Field::Payload { base, offset, len } => {
            let base = match base {
                PayloadBase::Link => "ll",
                PayloadBase::Network => "nh",
                PayloadBase::Transport => "th",
            };
            json!({"payload": {
                "base": base,
                "offset": u64::from(*offset) * 8,
                "len": u64::from(*len) * 8
            }})
        }
    }
}

fn datum_json(value: &Datum) -> Result<Value> {
    Ok(match value {
        Datum::Int(v) => json!(v),
        Datum::Iface(name) => json!(name),
        Datum::Addr(addr) => json!(addr.to_string()),
        Datum::Prefix(net) => json!({
            "prefix": {"addr": net.addr().to_string(), "len": net.prefix_len()}
        }),
        Datum::Bytes(bytes) => {
            if bytes.is_empty() || bytes.len() > 8 {
                return Err(unsupported(format!("{} byte raw value", bytes.len())));
            }
            let v = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            json!(v)
        }
    })
}

/// Collect tables, chains and rules from an nft JSON listing
pub fn parse_listing(doc: &Value) -> Result<Listing> {
    let items = doc
        .get("nftables")
        .and_then(|n| n.as_array())
        .ok_or_else(|| unsupported("listing without an nftables array"))?;

    let mut listing = Listing::default();
    for item in items {
        if let Some(table) = item.get("table") {
            listing.tables.push(parse_table(table)?);
        } else if let Some(chain) = item.get("chain") {
            listing.chains.push(parse_chain(chain)?);
        } else if let Some(rule) = item.get("rule") {
            listing.rules.push(parse_rule(rule)?);
        }
    }
    Ok(listing)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| unsupported(format!("object without '{}'", key)))
}

fn parse_family(value: &Value) -> Result<Family> {
    str_field(value, "family")?.parse().map_err(unsupported)
}

fn parse_table(value: &Value) -> Result<KernelTable> {
    Ok(KernelTable {
        family: parse_family(value)?.to_nfproto(),
        name: str_field(value, "name")?.to_string(),
    })
}

fn parse_chain(value: &Value) -> Result<KernelChain> {
    let family = parse_family(value)?;
    let table = KernelTable {
        family: family.to_nfproto(),
        name: str_field(value, "table")?.to_string(),
    };
    let mut chain = KernelChain::named(table, str_field(value, "name")?);

    if let Some(hook) = value.get("hook").and_then(|h| h.as_str()) {
        let hooknum = match ChainHook::ALL.iter().find(|h| h.as_str() == hook) {
            Some(h) => h.to_hooknum(family),
            None if hook == "ingress" => Some(NF_INET_INGRESS),
            None => None,
        };
        chain.hooknum = Some(hooknum.unwrap_or(UNKNOWN_HOOKNUM));
        chain.priority = value
            .get("prio")
            .and_then(|p| p.as_i64())
            .and_then(|p| i32::try_from(p).ok());
        chain.chain_type = value.get("type").and_then(|t| t.as_str()).map(str::to_string);
        let wire = |policy: ChainPolicy| policy_to_wire(policy.to_verdict(), HostOrder::NATIVE);
        chain.policy = match value.get("policy").and_then(|p| p.as_str()) {
            Some("accept") => Some(wire(ChainPolicy::Accept)),
            Some("drop") => Some(wire(ChainPolicy::Drop)),
            Some(_) => Some(UNKNOWN_POLICY),
            None => None,
        };
    }

    Ok(chain)
}

fn parse_rule(value: &Value) -> Result<KernelRule> {
    let table = KernelTable {
        family: parse_family(value)?.to_nfproto(),
        name: str_field(value, "table")?.to_string(),
    };
    let chain = str_field(value, "chain")?.to_string();
    let handle = value.get("handle").and_then(|h| h.as_u64());
    let location = match handle {
        Some(handle) => format!("rule {} handle {}", chain, handle),
        None => format!("rule {}", chain),
    };

    let exprs = match value.get("expr").and_then(|e| e.as_array()) {
        Some(exprs) => parse_exprs(exprs).map_err(|e| locate(e, &location))?,
        None => vec![],
    };
    let exprs = codec::encode(&exprs).map_err(|e| locate(unsupported(e.to_string()), &location))?;

    Ok(KernelRule {
        table,
        chain,
        handle,
        position: None,
        exprs,
    })
}

/// Parse nft JSON statements into typed expressions.
///
/// nft drops the `meta l4proto` match in front of a port match when it
/// lists a rule and names the protocol in the payload instead. That match
/// is put back so the result equals what was added.
pub fn parse_exprs(exprs: &[Value]) -> Result<Vec<Expr>> {
    let mut out: Vec<Expr> = Vec::with_capacity(exprs.len());

    for (index, expr) in exprs.iter().enumerate() {
        parse_statement(expr, &mut out).map_err(|e| locate(e, format!("statement {}", index)))?;
    }

    Ok(out)
}

fn parse_statement(expr: &Value, out: &mut Vec<Expr>) -> Result<()> {
    let (key, body) = expr
        .as_object()
        .and_then(|o| o.iter().next())
        .ok_or_else(|| unsupported(format!("malformed {}", expr)))?;

    match key.as_str() {
        "match" => parse_match(body, out)?,
        "counter" => out.push(Expr::Counter(Counter {
            packets: body.get("packets").and_then(|v| v.as_u64()).unwrap_or(0),
            bytes: body.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0),
        })),
        "accept" => out.push(Verdict::Accept.into()),
        "drop" => out.push(Verdict::Drop.into()),
        "return" => out.push(Verdict::Return.into()),
        "continue" => out.push(Verdict::Continue.into()),
        "jump" => out.push(Verdict::Jump(str_field(body, "target")?.to_string()).into()),
        "goto" => out.push(Verdict::Goto(str_field(body, "target")?.to_string()).into()),
        "queue" => {
            let num = body.get("num").and_then(|n| n.as_u64()).unwrap_or(0);
            let num = u16::try_from(num).map_err(|_| unsupported(format!("queue {}", num)))?;
            out.push(Verdict::Queue(num).into());
        }
        other => return Err(unsupported(format!("statement '{}'", other))),
    }

    Ok(())
}

fn parse_match(body: &Value, out: &mut Vec<Expr>) -> Result<()> {
    let op = match body.get("op").and_then(|o| o.as_str()) {
        Some(symbol) => {
            CmpOp::from_symbol(symbol).ok_or_else(|| unsupported(format!("operator {}", symbol)))?
        }
        None => CmpOp::Eq,
    };
    let left = body.get("left").ok_or_else(|| unsupported("match without left"))?;
    let right = body.get("right").ok_or_else(|| unsupported("match without right"))?;

    let (field, implied_proto) = parse_field(left)?;
    if let Some(proto) = implied_proto {
        let present = out.iter().rev().any(|e| {
            matches!(e, Expr::Match(m) if m.field == Field::L4proto && m.op == CmpOp::Eq)
        });
        if !present {
            out.push(Match::l4proto(proto).into());
        }
    }

    let value = parse_datum(&field, right)?;
    out.push(Match::new(field, op, value).into());
    Ok(())
}

/// The field a match loads, plus the l4 protocol a transport field implies
fn parse_field(left: &Value) -> Result<(Field, Option<u8>)> {
    if let Some(meta) = left.get("meta") {
        let field = match str_field(meta, "key")? {
            "l4proto" => Field::L4proto,
            "nfproto" => Field::Nfproto,
            "mark" => Field::Mark,
            "iif" => Field::Iif,
            "oif" => Field::Oif,
            "iifname" => Field::Iifname,
            "oifname" => Field::Oifname,
            other => return Err(unsupported(format!("meta {}", other))),
        };
        return Ok((field, None));
    }

    let payload = left
        .get("payload")
        .ok_or_else(|| unsupported(format!("match on {}", left)))?;

    if let Some(base) = payload.get("base").and_then(|b| b.as_str()) {
        let base = match base {
            "ll" => PayloadBase::Link,
            "nh" => PayloadBase::Network,
            "th" => PayloadBase::Transport,
            other => return Err(unsupported(format!("payload base {}", other))),
        };
        let bits = |key: &str| -> Result<u32> {
            let v = payload.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
            if v % 8 != 0 {
                return Err(unsupported(format!("payload {} of {} bits", key, v)));
            }
            u32::try_from(v / 8).map_err(|_| unsupported(format!("payload {} {}", key, v)))
        };
        let field = Field::Payload {
            base,
            offset: bits("offset")?,
            len: bits("len")?,
        };
        return Ok((codec::canonical_field(field), None));
    }

    let protocol = str_field(payload, "protocol")?;
    let name = str_field(payload, "field")?;
    let field = match (protocol, name) {
        ("ip", "saddr") => Field::IpSaddr,
        ("ip", "daddr") => Field::IpDaddr,
        ("ip6", "saddr") => Field::Ip6Saddr,
        ("ip6", "daddr") => Field::Ip6Daddr,
        (_, "sport") => Field::Sport,
        (_, "dport") => Field::Dport,
        _ => return Err(unsupported(format!("payload {} {}", protocol, name))),
    };

    let implied = match protocol {
        "tcp" => Some(IPPROTO_TCP),
        "udp" => Some(IPPROTO_UDP),
        "dccp" => Some(IPPROTO_DCCP),
        "sctp" => Some(IPPROTO_SCTP),
        "udplite" => Some(IPPROTO_UDPLITE),
        "th" | "ip" | "ip6" => None,
        other => return Err(unsupported(format!("payload protocol {}", other))),
    };
    Ok((field, implied))
}

fn l4proto_number(name: &str) -> Option<u8> {
    Some(match name {
        "icmp" => IPPROTO_ICMP,
        "tcp" => IPPROTO_TCP,
        "udp" => IPPROTO_UDP,
        "dccp" => IPPROTO_DCCP,
        "sctp" => IPPROTO_SCTP,
        "udplite" => IPPROTO_UDPLITE,
        "icmpv6" | "ipv6-icmp" => IPPROTO_ICMPV6,
        _ => return None,
    })
}

fn parse_datum(field: &Field, right: &Value) -> Result<Datum> {
    let bad = || unsupported(format!("value {} for {}", right, field));

    if let Some(prefix) = right.get("prefix") {
        let addr: IpAddr = str_field(prefix, "addr")?.parse().map_err(|_| bad())?;
        let len = prefix
            .get("len")
            .and_then(|l| l.as_u64())
            .and_then(|l| u8::try_from(l).ok())
            .ok_or_else(bad)?;
        let net = ipnet::IpNet::new(addr, len).map_err(|_| bad())?;
        return Ok(Datum::Prefix(net));
    }

    match field {
        Field::L4proto => match right {
            Value::String(name) => {
                l4proto_number(name).map(|p| Datum::Int(p.into())).ok_or_else(bad)
            }
            _ => right.as_u64().map(Datum::Int).ok_or_else(bad),
        },
        Field::Nfproto => match right.as_str() {
            Some("ipv4") => Ok(Datum::Int(nfl_core::kernel::NFPROTO_IPV4.into())),
            Some("ipv6") => Ok(Datum::Int(nfl_core::kernel::NFPROTO_IPV6.into())),
            _ => right.as_u64().map(Datum::Int).ok_or_else(bad),
        },
        Field::Iifname | Field::Oifname => {
            right.as_str().map(|s| Datum::Iface(s.to_string())).ok_or_else(bad)
        }
        Field::IpSaddr | Field::IpDaddr | Field::Ip6Saddr | Field::Ip6Daddr => right
            .as_str()
            .and_then(|s| s.parse::<IpAddr>().ok())
            .map(Datum::Addr)
            .ok_or_else(bad),
        Field::Payload { len, .. } => {
            let v = right.as_u64().ok_or_else(bad)?;
            let width = *len as usize;
            if width == 0 || width > 8 {
                return Err(bad());
            }
            Ok(Datum::Bytes(v.to_be_bytes()[8 - width..].to_vec()))
        }
        Field::Mark | Field::Iif | Field::Oif | Field::Sport | Field::Dport => {
            right.as_u64().map(Datum::Int).ok_or_else(bad)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfl_core::kernel::{NFPROTO_INET, NF_DROP};

    fn inet_filter() -> KernelTable {
        KernelTable {
            family: NFPROTO_INET,
            name: "filter".into(),
        }
    }

    fn ssh_exprs() -> Vec<Expr> {
        vec![
            Match::l4proto(IPPROTO_TCP).into(),
            Match::dport(22).into(),
            Verdict::Accept.into(),
        ]
    }

    fn ssh_rule() -> KernelRule {
        KernelRule {
            table: inet_filter(),
            chain: "input".into(),
            handle: None,
            position: None,
            exprs: codec::encode(&ssh_exprs()).unwrap(),
        }
    }

    #[test]
    fn batch_renders_commands_in_order() {
        let mut chain = KernelChain::named(inet_filter(), "input");
        chain.hooknum = Some(1);
        chain.priority = Some(0);
        chain.chain_type = Some("filter".into());
        chain.policy = Some(policy_to_wire(NF_DROP, HostOrder::NATIVE));

        let doc = render_batch(&[
            BatchOp::AddTable(inet_filter()),
            BatchOp::AddChain(chain),
            BatchOp::AddRule(ssh_rule()),
        ])
        .unwrap();

        let commands = doc["nftables"].as_array().unwrap();
        assert_eq!(commands[0], json!({"add": {"table": {"family": "inet", "name": "filter"}}}));
        assert_eq!(
            commands[1],
            json!({"add": {"chain": {
                "family": "inet", "table": "filter", "name": "input",
                "hook": "input", "prio": 0, "type": "filter", "policy": "drop"
            }}})
        );
        let rule = &commands[2]["add"]["rule"];
        assert_eq!(rule["chain"], "input");
        assert!(rule.get("handle").is_none());
        assert_eq!(
            rule["expr"][1]["match"]["left"],
            json!({"payload": {"protocol": "th", "field": "dport"}})
        );
        assert_eq!(rule["expr"][1]["match"]["right"], 22);
        assert_eq!(rule["expr"][2], json!({"accept": null}));
    }

    #[test]
    fn positions_and_handles_render_as_handle() {
        let mut add = ssh_rule();
        add.position = Some(4);
        let mut del = ssh_rule();
        del.handle = Some(9);

        let doc = render_batch(&[BatchOp::InsertRule(add), BatchOp::DelRule(del)]).unwrap();
        assert_eq!(doc["nftables"][0]["insert"]["rule"]["handle"], 4);
        let delete = &doc["nftables"][1]["delete"]["rule"];
        assert_eq!(delete["handle"], 9);
        assert!(delete.get("expr").is_none());
    }

    #[test]
    fn listing_restores_hidden_protocol_match() {
        let listing = json!({"nftables": [
            {"metainfo": {"version": "1.0.9", "json_schema_version": 1}},
            {"table": {"family": "inet", "name": "filter", "handle": 1}},
            {"chain": {"family": "inet", "table": "filter", "name": "input", "handle": 1,
                       "type": "filter", "hook": "input", "prio": 0, "policy": "drop"}},
            {"rule": {"family": "inet", "table": "filter", "chain": "input", "handle": 2,
                      "expr": [
                          {"match": {"op": "==", "left": {"payload": {"protocol": "tcp", "field": "dport"}}, "right": 22}},
                          {"accept": null}
                      ]}}
        ]});

        let parsed = parse_listing(&listing).unwrap();
        assert_eq!(parsed.tables, vec![inet_filter()]);

        let chain = &parsed.chains[0];
        assert_eq!(chain.hooknum, Some(1));
        assert_eq!(policy_from_wire(chain.policy.unwrap(), HostOrder::NATIVE), NF_DROP);

        let rule = &parsed.rules[0];
        assert_eq!(rule.handle, Some(2));
        assert_eq!(codec::decode(&rule.exprs).unwrap(), ssh_exprs());
    }

    #[test]
    fn explicit_protocol_match_is_not_duplicated() {
        let exprs = parse_exprs(&[
            json!({"match": {"op": "==", "left": {"meta": {"key": "l4proto"}}, "right": "tcp"}}),
            json!({"match": {"op": "==", "left": {"payload": {"protocol": "tcp", "field": "dport"}}, "right": 22}}),
            json!({"accept": null}),
        ])
        .unwrap();
        assert_eq!(exprs, ssh_exprs());
    }

    #[test]
    fn prefixes_interfaces_and_jumps_parse() {
        let exprs = parse_exprs(&[
            json!({"match": {"op": "==", "left": {"meta": {"key": "iifname"}}, "right": "eth0"}}),
            json!({"match": {"op": "!=", "left": {"payload": {"protocol": "ip", "field": "saddr"}},
                             "right": {"prefix": {"addr": "10.0.0.0", "len": 8}}}}),
            json!({"counter": {"packets": 3, "bytes": 120}}),
            json!({"jump": {"target": "helper"}}),
        ])
        .unwrap();

        assert_eq!(exprs[0], Expr::from(Match::iifname("eth0")));
        assert_eq!(
            exprs[1],
            Expr::from(Match::new(
                Field::IpSaddr,
                CmpOp::Neq,
                Datum::Prefix("10.0.0.0/8".parse().unwrap())
            ))
        );
        assert_eq!(exprs[2], Expr::from(Counter { packets: 3, bytes: 120 }));
        assert_eq!(exprs[3], Expr::from(Verdict::Jump("helper".into())));

        let rendered = render_exprs(&exprs).unwrap();
        assert_eq!(parse_exprs(&rendered).unwrap(), exprs);
    }

    #[test]
    fn errors_name_the_failing_statement() {
        let err = parse_exprs(&[
            json!({"counter": {"packets": 0, "bytes": 0}}),
            json!({"masquerade": null}),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("statement 1"));

        let err = parse_rule(&json!({"family": "ip", "table": "nat", "chain": "post", "handle": 7,
                                     "expr": [{"masquerade": null}]}))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("handle 7"));
        assert!(message.contains("statement 0"));
        assert!(message.contains("masquerade"));
    }

    #[test]
    fn raw_payload_of_a_named_field_parses_as_that_field() {
        let exprs = parse_exprs(&[json!({"match": {"op": "==",
            "left": {"payload": {"base": "th", "offset": 16, "len": 16}}, "right": 22}})])
        .unwrap();
        assert_eq!(exprs, vec![Expr::from(Match::dport(22))]);
    }

    #[test]
    fn unknown_statements_are_unsupported() {
        let err = parse_exprs(&[json!({"masquerade": null})]).unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));

        let err = parse_exprs(&[json!({"match": {"op": "in", "left": {"ct": {"key": "state"}},
                                                  "right": ["established"]}})])
        .unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }

    #[test]
    fn unknown_hooks_and_policies_still_list() {
        let ingress = parse_chain(&json!({"family": "netdev", "table": "t", "name": "in",
                                          "type": "filter", "hook": "ingress", "prio": 0}))
        .unwrap();
        assert_eq!(ingress.hooknum, Some(NF_INET_INGRESS));

        let listing = json!({"nftables": [
            {"chain": {"family": "netdev", "table": "t", "name": "out", "type": "filter",
                       "hook": "egress", "prio": 0, "policy": "accept"}},
            {"chain": {"family": "inet", "table": "t", "name": "c", "type": "filter",
                       "hook": "input", "prio": 0, "policy": "steal"}}
        ]});
        let parsed = parse_listing(&listing).unwrap();

        let egress = nfl_core::Chain::from_kernel(&parsed.chains[0]);
        assert_eq!(egress.name, "out");
        assert_eq!(egress.hook, None);
        assert_eq!(egress.policy, Some(ChainPolicy::Accept));

        let odd_policy = nfl_core::Chain::from_kernel(&parsed.chains[1]);
        assert_eq!(odd_policy.hook, Some(ChainHook::Input));
        assert_eq!(odd_policy.policy, None);
    }
}
