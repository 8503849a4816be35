use std::net::IpAddr;

/// Decides which host name a dump container uses to reach a database.
///
/// With host networking the container shares the host's loopback, so the
/// configured host works as-is. Runtimes that cannot share the network
/// namespace (Docker Desktop) need loopback addresses swapped for a gateway
/// alias such as `host.docker.internal`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPolicy {
    loopback_alias: Option<String>,
}

impl HostPolicy {
    pub fn new(loopback_alias: Option<String>) -> Self {
        Self {
            loopback_alias: loopback_alias.filter(|a| !a.trim().is_empty()),
        }
    }

    pub fn resolve(&self, host: &str) -> String {
        match &self.loopback_alias {
            Some(alias) if is_loopback(host) => alias.clone(),
            _ => host.to_string(),
        }
    }
}

fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
