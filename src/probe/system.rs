use super::HostProbe;
use crate::{Error, Result};
use reqwest::blocking::Client;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::Networks;

const ROUTE_TABLE: &str = "/proc/net/route";

/// Host probe backed by sysinfo, `/proc`, and a couple of system commands.
pub struct SystemHost {
    networks: Networks,
    client: Client,
}

impl SystemHost {
    pub fn new() -> Result<Self> {
        Ok(Self {
            networks: Networks::new_with_refreshed_list(),
            client: Client::builder().build()?,
        })
    }
}

impl HostProbe for SystemHost {
    fn routable_addresses(&mut self) -> Vec<IpAddr> {
        self.networks.refresh(true);
        let mut addrs: Vec<IpAddr> = self
            .networks
            .iter()
            .flat_map(|(_, data)| data.ip_networks().iter().map(|net| net.addr))
            .filter(is_routable)
            .collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    fn ping(&mut self, host: &str, timeout: Duration) -> bool {
        let wait_secs = timeout.as_secs().max(1).to_string();
        Command::new("ping")
            .args(["-c", "1", "-W", wait_secs.as_str(), host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn sync_clock(&mut self, command: &[String]) -> Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::InvalidArgs("time sync command is empty".into()))?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Process(format!("failed to run {program}: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Process(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }

    fn default_gateway(&mut self) -> Option<Ipv4Addr> {
        let table = fs::read_to_string(ROUTE_TABLE).ok()?;
        parse_default_gateway(&table)
    }

    fn url_reachable(&mut self, url: &str, timeout: Duration) -> bool {
        self.client.get(url).timeout(timeout).send().is_ok()
    }
}

/// Loopback, unspecified, and link-local addresses do not count as "assigned".
pub fn is_routable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_unspecified() || v4.is_link_local()),
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80)
        }
    }
}

/// Pick the gateway of the lowest-metric default route from `/proc/net/route`.
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 7 || cols[1] != "00000000" {
                return None;
            }
            let gateway = u32::from_str_radix(cols[2], 16).ok()?;
            if gateway == 0 {
                return None;
            }
            let metric: u32 = cols[6].parse().unwrap_or(u32::MAX);
            Some((metric, Ipv4Addr::from(gateway.to_le_bytes())))
        })
        .min_by_key(|(metric, _)| *metric)
        .map(|(_, gateway)| gateway)
}
