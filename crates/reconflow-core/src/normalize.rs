use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::OpenPort;

/// Display budget for the joined technology list of an HTTP service.
pub const TECH_DISPLAY_CHARS: usize = 80;
/// Display budget for a vulnerability description.
pub const DESCRIPTION_DISPLAY_CHARS: usize = 100;
/// Display budget for joined host-intel lists (ports, tags, vulnerability ids).
pub const LIST_DISPLAY_CHARS: usize = 80;

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:[A-Za-z0-9-]+\.)+[A-Za-z]{2,}\b").expect("hostname pattern is valid")
});

/// Pull FQDN-like tokens out of free-form enumeration output, lower-cased,
/// unique and sorted.
pub fn extract_hosts<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hosts = BTreeSet::new();
    for line in lines {
        for mat in HOST_RE.find_iter(line) {
            hosts.insert(mat.as_str().to_ascii_lowercase());
        }
    }
    hosts.into_iter().collect()
}

/// Keep hosts equal to, or below, one of the owned domains. An empty owned
/// list disables filtering.
pub fn filter_owned(hosts: Vec<String>, owned_domains: &[String]) -> Vec<String> {
    if owned_domains.is_empty() {
        return hosts;
    }
    hosts
        .into_iter()
        .filter(|host| is_owned(host, owned_domains))
        .collect()
}

fn is_owned(host: &str, owned_domains: &[String]) -> bool {
    owned_domains.iter().any(|domain| {
        host == domain
            || host
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Unique, sorted IPs across port observations.
pub fn unique_ips(ports: &[OpenPort]) -> Vec<String> {
    ports
        .iter()
        .filter_map(|port| port.ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Collapse repeated observations of the same (ip, port, protocol), keeping
/// the first one seen.
pub fn collapse_ports(ports: &[OpenPort]) -> Vec<OpenPort> {
    let mut seen = HashSet::new();
    ports
        .iter()
        .filter(|port| seen.insert(port.key()))
        .cloned()
        .collect()
}

/// Number of distinct hosts that appear in at least one port observation.
pub fn hosts_with_open_ports(ports: &[OpenPort]) -> usize {
    unique_ips(ports).len()
}

/// Cut `input` to at most `max_chars` characters on a char boundary.
pub fn truncate(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

/// Join display items with `, ` and apply [`truncate`].
pub fn join_truncated<T: ToString>(items: &[T], max_chars: usize) -> String {
    let joined = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    truncate(&joined, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(ip: &str) -> OpenPort {
        OpenPort {
            ip: Some(ip.into()),
            port: Some(443),
            protocol: Some("tcp".into()),
            tls: None,
            note: String::new(),
        }
    }

    #[test]
    fn extracts_hosts_from_noisy_tool_output() {
        let lines = [
            "WWW.Acme.com (FQDN) --> a_record --> 1.2.3.4 (IPAddress)",
            "api.acme.com",
            "api.acme.com",
            "garbage without dots",
        ];
        let hosts = extract_hosts(lines);
        assert_eq!(hosts, vec!["api.acme.com", "www.acme.com"]);
    }

    #[test]
    fn ownership_filter_keeps_owned_domains_and_children() {
        let owned = vec!["example.com".to_string()];
        let hosts = vec![
            "a.example.com".to_string(),
            "evil.com".to_string(),
            "example.com".to_string(),
            "notexample.com".to_string(),
        ];
        assert_eq!(
            filter_owned(hosts, &owned),
            vec!["a.example.com".to_string(), "example.com".to_string()]
        );
    }

    #[test]
    fn ownership_filter_passes_through_without_domains() {
        let hosts = vec!["evil.com".to_string()];
        assert_eq!(filter_owned(hosts.clone(), &[]), hosts);
    }

    #[test]
    fn unique_ips_collapse_repeats() {
        let ports = vec![port("1.2.3.4"), port("5.6.7.8"), port("1.2.3.4")];
        assert_eq!(unique_ips(&ports), vec!["1.2.3.4", "5.6.7.8"]);
        assert_eq!(hosts_with_open_ports(&ports), 2);
    }

    #[test]
    fn ownership_requires_a_label_boundary() {
        let owned = vec!["acme.com".to_string()];
        assert!(is_owned("acme.com", &owned));
        assert!(is_owned("deep.api.acme.com", &owned));
        assert!(!is_owned("notacme.com", &owned));
        assert!(!is_owned("acme.com.evil.net", &owned));
    }

    #[test]
    fn collapse_ports_keeps_first_of_each_ip_port_protocol() {
        let mut udp = port("1.2.3.4");
        udp.protocol = Some("udp".into());
        let mut tls = port("1.2.3.4");
        tls.tls = Some(true);
        let ports = vec![port("1.2.3.4"), udp.clone(), tls, port("5.6.7.8")];
        assert_eq!(
            collapse_ports(&ports),
            vec![port("1.2.3.4"), udp, port("5.6.7.8")]
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(join_truncated(&[80, 443, 8080], 7), "80, 443");
    }
}
