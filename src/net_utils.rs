use anyhow::{Context, Result};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parse the first CIDR of a possibly dual-stack, comma separated subnet list
fn first_net(cidrs: &str) -> Result<IpNet> {
    let first = cidrs.split(',').map(str::trim).find(|cidr| !cidr.is_empty()).context("empty CIDR")?;
    first.parse::<IpNet>().with_context(|| format!("invalid CIDR {:?}", first))
}

/// Whether any of the comma separated CIDRs contains the given IP
pub(crate) fn cidrs_contain(cidrs: &str, ip: &str) -> Result<bool> {
    let ip = ip.parse::<IpAddr>().with_context(|| format!("invalid IP {:?}", ip))?;

    for cidr in cidrs.split(',').map(str::trim).filter(|cidr| !cidr.is_empty()) {
        if cidr.parse::<IpNet>().with_context(|| format!("invalid CIDR {:?}", cidr))?.contains(&ip) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// The first usable address of a subnet, i.e. the kubernetes service IP for a service CIDR
pub(crate) fn first_ip(cidrs: &str) -> Result<IpAddr> {
    Ok(match first_net(cidrs)?.network() {
        IpAddr::V4(network) => IpAddr::V4(Ipv4Addr::from(u32::from(network).checked_add(1).context("address overflow")?)),
        IpAddr::V6(network) => IpAddr::V6(Ipv6Addr::from(u128::from(network).checked_add(1).context("address overflow")?)),
    })
}

pub(crate) fn is_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}
