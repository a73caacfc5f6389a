use anyhow::Result;
use tracing::{debug, instrument};

use crate::{
    artifact::{parse, ArtifactKind, ArtifactLayout},
    model::{RecordSet, Target},
    normalize::{extract_hosts, filter_owned, unique_ips},
};

/// Reads whatever artifacts exist for a target and normalizes them into one
/// [`RecordSet`]. Missing artifacts contribute empty sequences.
pub struct Aggregator<'a> {
    layout: &'a ArtifactLayout,
    target: &'a Target,
}

impl<'a> Aggregator<'a> {
    pub fn new(layout: &'a ArtifactLayout, target: &'a Target) -> Self {
        Self { layout, target }
    }

    #[instrument(name = "aggregate", skip(self), fields(target = %self.target.name))]
    pub fn collect(&self) -> Result<RecordSet> {
        let subdomain_text = self.read(ArtifactKind::Subdomains)?;
        let subdomains = filter_owned(
            extract_hosts(subdomain_text.lines()),
            &self.target.owned_domains(),
        );
        let open_ports = parse::parse_port_scan(&self.read(ArtifactKind::PortScan)?);
        let ips = unique_ips(&open_ports);

        let records = RecordSet {
            subdomains,
            ips,
            open_ports,
            http_services: parse::parse_http_probe(&self.read(ArtifactKind::HttpProbe)?),
            vulnerabilities: parse::parse_vulnerability_scan(
                &self.read(ArtifactKind::VulnerabilityScan)?,
            ),
            breaches: parse::parse_breaches(&self.read(ArtifactKind::Breaches)?),
            code_leaks: parse::parse_code_leaks(&self.read(ArtifactKind::CodeLeaks)?),
            ip_intel: parse::parse_ip_intel(&self.read(ArtifactKind::IpIntel)?),
            host_intel: parse::parse_host_intel(&self.read(ArtifactKind::HostIntel)?),
        };
        debug!(
            subdomains = records.subdomains.len(),
            open_ports = records.open_ports.len(),
            http_services = records.http_services.len(),
            vulnerabilities = records.vulnerabilities.len(),
            "aggregated artifacts"
        );
        Ok(records)
    }

    fn read(&self, kind: ArtifactKind) -> Result<String> {
        let text = self.layout.read(kind)?;
        if text.is_empty() {
            debug!(artifact = %kind, "artifact missing or empty");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_yields_empty_record_set() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        let target = Target::new("acme", vec!["acme.com".into()]);
        let records = Aggregator::new(&layout, &target).collect().unwrap();
        assert_eq!(records, RecordSet::default());
    }

    #[test]
    fn subdomains_are_extracted_and_filtered_to_owned_domains() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        layout
            .write(
                ArtifactKind::Subdomains,
                "WWW.acme.com\nacme.com (FQDN) --> ns_record --> ns1.dnsprovider.net (FQDN)\nevil.com\nwww.acme.com\n",
            )
            .unwrap();
        let target = Target::new("acme", vec!["acme.com".into()]);
        let records = Aggregator::new(&layout, &target).collect().unwrap();
        assert_eq!(records.subdomains, vec!["acme.com", "www.acme.com"]);
    }

    #[test]
    fn no_owned_domains_keeps_every_host() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        layout
            .write(ArtifactKind::Subdomains, "a.acme.com\nevil.com\n")
            .unwrap();
        let target = Target::new("acme", Vec::new());
        let records = Aggregator::new(&layout, &target).collect().unwrap();
        assert_eq!(records.subdomains, vec!["a.acme.com", "evil.com"]);
    }

    #[test]
    fn repeated_port_records_are_kept_but_ips_collapse() {
        let temp = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(temp.path(), "acme");
        layout
            .write(
                ArtifactKind::PortScan,
                "{\"ip\":\"10.0.0.2\",\"port\":3389}\n{\"ip\":\"10.0.0.2\",\"port\":3389}\nnot json\n{\"ip\":\"10.0.0.1\",\"port\":80}\n",
            )
            .unwrap();
        let target = Target::new("acme", Vec::new());
        let records = Aggregator::new(&layout, &target).collect().unwrap();
        assert_eq!(records.open_ports.len(), 3);
        assert_eq!(records.ips, vec!["10.0.0.1", "10.0.0.2"]);
    }
}
