use super::HostProbe;
use crate::{Error, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Scripted host for prober tests. Defaults: no address, no internet, no
/// gateway, nothing reachable, clock sync succeeds.
#[derive(Debug, Default)]
pub struct FakeHost {
    address: Option<(usize, IpAddr)>,
    ping_success_after: Option<usize>,
    gateway: Option<Ipv4Addr>,
    reachable: HashSet<String>,
    clock_fails: bool,
    address_calls: usize,
    pings: usize,
    ping_waited: Duration,
    clock_syncs: usize,
}

impl FakeHost {
    /// Report `addr` once `empty_polls` polls have come back empty.
    pub fn address_after(mut self, empty_polls: usize, addr: IpAddr) -> Self {
        self.address = Some((empty_polls, addr));
        self
    }

    /// Ping succeeds after `failures` failed attempts.
    pub fn ping_after(mut self, failures: usize) -> Self {
        self.ping_success_after = Some(failures);
        self
    }

    pub fn gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn reachable(mut self, url: &str) -> Self {
        self.reachable.insert(url.to_string());
        self
    }

    pub fn clock_sync_fails(mut self) -> Self {
        self.clock_fails = true;
        self
    }

    pub fn pings(&self) -> usize {
        self.pings
    }

    /// Time failed pings would have spent waiting for a reply.
    pub fn ping_waited(&self) -> Duration {
        self.ping_waited
    }

    pub fn clock_syncs(&self) -> usize {
        self.clock_syncs
    }
}

impl HostProbe for FakeHost {
    fn routable_addresses(&mut self) -> Vec<IpAddr> {
        let call = self.address_calls;
        self.address_calls += 1;
        match self.address {
            Some((empty_polls, addr)) if call >= empty_polls => vec![addr],
            _ => Vec::new(),
        }
    }

    fn ping(&mut self, _host: &str, timeout: Duration) -> bool {
        let attempt = self.pings;
        self.pings += 1;
        let answered = matches!(self.ping_success_after, Some(failures) if attempt >= failures);
        if !answered {
            self.ping_waited += timeout;
        }
        answered
    }

    fn sync_clock(&mut self, _command: &[String]) -> Result<()> {
        self.clock_syncs += 1;
        if self.clock_fails {
            return Err(Error::Process("scripted clock sync failure".into()));
        }
        Ok(())
    }

    fn default_gateway(&mut self) -> Option<Ipv4Addr> {
        self.gateway
    }

    fn url_reachable(&mut self, url: &str, _timeout: Duration) -> bool {
        self.reachable.contains(url)
    }
}
