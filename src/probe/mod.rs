//! Startup environment checks: address, reachability, clock, network position.

use crate::{
    app::Logger,
    remote::BaseUrl,
    retry::{RetryPolicy, Sleeper},
    Result,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub mod fake;
pub mod system;

pub use system::SystemHost;

/// Upper bound for a single echo request.
pub const MAX_PING_WAIT: Duration = Duration::from_secs(2);

/// OS facilities the prober needs.
pub trait HostProbe {
    /// Interface addresses that are neither loopback nor IPv6 link-local.
    fn routable_addresses(&mut self) -> Vec<IpAddr>;
    fn ping(&mut self, host: &str, timeout: Duration) -> bool;
    fn sync_clock(&mut self, command: &[String]) -> Result<()>;
    fn default_gateway(&mut self) -> Option<Ipv4Addr>;
    /// Any HTTP answer from `url` counts as reachable.
    fn url_reachable(&mut self, url: &str, timeout: Duration) -> bool;
}

/// Prober knobs taken from the app config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub internal_base_url: BaseUrl,
    pub external_base_url: Option<BaseUrl>,
    pub internal_gateway_prefix: Option<String>,
    pub ping_host: String,
    pub probe_interval: Duration,
    pub reachability_timeout: Duration,
    pub http_timeout: Duration,
    pub time_sync_command: Vec<String>,
}

impl ProbeOptions {
    pub fn address_policy(&self) -> RetryPolicy {
        RetryPolicy::forever(self.probe_interval)
    }

    /// Each ping may block for [`ProbeOptions::ping_timeout`]; that time counts
    /// against `reachability_timeout` too.
    pub fn reachability_policy(&self) -> RetryPolicy {
        RetryPolicy::within_costing(
            self.reachability_timeout,
            self.probe_interval,
            self.ping_timeout(),
        )
    }

    pub fn ping_timeout(&self) -> Duration {
        self.http_timeout.min(MAX_PING_WAIT)
    }
}

/// Which network the frame is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPosition {
    Internal,
    External,
}

/// Base URLs to use for the rest of the run, primary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub position: NetworkPosition,
    pub bases: Vec<BaseUrl>,
}

impl NetworkPlan {
    /// Plan without probing: internal first, external as fallback.
    pub fn unprobed(options: &ProbeOptions) -> Self {
        Self::prefer(NetworkPosition::Internal, options)
    }

    pub fn prefer(position: NetworkPosition, options: &ProbeOptions) -> Self {
        let mut bases = Vec::with_capacity(2);
        match (position, options.external_base_url.as_ref()) {
            (NetworkPosition::External, Some(external)) => {
                bases.push(external.clone());
                bases.push(options.internal_base_url.clone());
            }
            (_, external) => {
                bases.push(options.internal_base_url.clone());
                bases.extend(external.cloned());
            }
        }
        Self { position, bases }
    }

    pub fn primary(&self) -> &BaseUrl {
        &self.bases[0]
    }
}

pub struct Prober<'a, H: HostProbe, S: Sleeper + ?Sized> {
    options: &'a ProbeOptions,
    host: H,
    sleeper: &'a S,
    logger: &'a Logger,
}

impl<'a, H: HostProbe, S: Sleeper + ?Sized> Prober<'a, H, S> {
    pub fn new(options: &'a ProbeOptions, host: H, sleeper: &'a S, logger: &'a Logger) -> Self {
        Self {
            options,
            host,
            sleeper,
            logger,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run every startup check in order and decide the base URLs.
    pub fn probe(&mut self) -> NetworkPlan {
        self.wait_for_address(self.options.address_policy());
        self.wait_for_internet(self.options.reachability_policy());
        self.sync_clock();
        self.select_network()
    }

    pub fn wait_for_address(&mut self, policy: RetryPolicy) -> Option<Vec<IpAddr>> {
        let host = &mut self.host;
        let logger = self.logger;
        let found = policy.run(
            self.sleeper,
            || {
                let addrs = host.routable_addresses();
                (!addrs.is_empty()).then_some(addrs)
            },
            |attempt| {
                logger.info(format!(
                    "No IP address assigned yet (attempt {attempt}); waiting {}...",
                    humantime::format_duration(policy.interval)
                ))
            },
        );
        match &found {
            Some(addrs) => {
                let list: Vec<String> = addrs.iter().map(IpAddr::to_string).collect();
                self.logger
                    .info(format!("IP address assigned: {}", list.join(", ")));
            }
            None => self.logger.warn("Gave up waiting for an IP address."),
        }
        found
    }

    pub fn wait_for_internet(&mut self, policy: RetryPolicy) -> bool {
        let host = &mut self.host;
        let logger = self.logger;
        let target = self.options.ping_host.as_str();
        let timeout = self.options.ping_timeout();
        let reachable = policy
            .run(
                self.sleeper,
                || host.ping(target, timeout).then_some(()),
                |attempt| {
                    logger.info(format!(
                        "Internet not reachable yet (ping {target}, attempt {attempt}); retrying..."
                    ))
                },
            )
            .is_some();
        if reachable {
            self.logger.info(format!("Internet reachable via {target}."));
        } else {
            self.logger.warn(format!(
                "Internet still unreachable after {}; continuing anyway.",
                humantime::format_duration(self.options.reachability_timeout)
            ));
        }
        reachable
    }

    pub fn sync_clock(&mut self) -> bool {
        let command = &self.options.time_sync_command;
        if command.is_empty() {
            self.logger.debug("Clock sync disabled.");
            return false;
        }
        match self.host.sync_clock(command) {
            Ok(()) => {
                self.logger.info("Clock synchronised.");
                true
            }
            Err(err) => {
                self.logger.warn(format!("Clock sync failed: {err}"));
                false
            }
        }
    }

    /// Decide internal vs external. Never fails: falls back to a default plan.
    pub fn select_network(&mut self) -> NetworkPlan {
        if let Some(prefix) = self.options.internal_gateway_prefix.as_deref() {
            match self.host.default_gateway() {
                Some(gateway) => {
                    let position = if gateway.to_string().starts_with(prefix) {
                        NetworkPosition::Internal
                    } else {
                        NetworkPosition::External
                    };
                    self.logger.info(format!(
                        "Default gateway {gateway}: using {} network.",
                        position_label(position)
                    ));
                    return NetworkPlan::prefer(position, self.options);
                }
                None => self
                    .logger
                    .warn("No default gateway found; probing base URLs instead."),
            }
        }

        let timeout = self.options.http_timeout;
        let internal = self.options.internal_base_url.settings_url();
        if self.host.url_reachable(internal.as_str(), timeout) {
            self.logger
                .info(format!("Internal server {} reachable.", self.options.internal_base_url));
            return NetworkPlan::prefer(NetworkPosition::Internal, self.options);
        }
        if let Some(external) = self.options.external_base_url.as_ref() {
            if self
                .host
                .url_reachable(external.settings_url().as_str(), timeout)
            {
                self.logger
                    .info(format!("External server {external} reachable."));
                return NetworkPlan::prefer(NetworkPosition::External, self.options);
            }
        }

        let fallback = if self.options.external_base_url.is_some() {
            NetworkPosition::External
        } else {
            NetworkPosition::Internal
        };
        let plan = NetworkPlan::prefer(fallback, self.options);
        self.logger.warn(format!(
            "Could not detect network position; defaulting to {}.",
            plan.primary()
        ));
        plan
    }
}

fn position_label(position: NetworkPosition) -> &'static str {
    match position {
        NetworkPosition::Internal => "internal",
        NetworkPosition::External => "external",
    }
}
