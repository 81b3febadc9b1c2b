//! Host group loading
//!
//! The group file lists one host per line under `[group]` headers. Hosts
//! before the first header land in the default group.

use crate::errors::{MonitorError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_GROUP: &str = "기본그룹";

/// Sort key used for hosts that are not dotted-quad IPv4 literals
const MALFORMED_OCTETS: [u16; 4] = [u16::MAX; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<String>,
}

/// Ordered set of groups; every host belongs to exactly one group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGroups {
    groups: Vec<HostGroup>,
}

impl HostGroups {
    /// Parse group file contents
    pub fn parse(text: &str) -> Self {
        let mut groups = vec![HostGroup {
            name: DEFAULT_GROUP.to_string(),
            hosts: Vec::new(),
        }];
        let mut current = 0;
        let mut seen: HashSet<String> = HashSet::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let name = &line[1..line.len() - 1];
                current = match groups.iter().position(|g| g.name == name) {
                    Some(index) => index,
                    None => {
                        groups.push(HostGroup {
                            name: name.to_string(),
                            hosts: Vec::new(),
                        });
                        groups.len() - 1
                    }
                };
                continue;
            }

            if seen.insert(line.to_string()) {
                groups[current].hosts.push(line.to_string());
            } else {
                debug!("Skipping duplicate host {} in group {}", line, groups[current].name);
            }
        }

        for group in &mut groups {
            sort_hosts(&mut group.hosts);
        }

        Self { groups }
    }

    /// Read and parse a group file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            MonitorError::GroupFile(format!("cannot read {}: {}", path.display(), e))
        })?;

        let groups = Self::parse(&text);
        if groups.host_count() == 0 {
            return Err(MonitorError::GroupFile(format!(
                "{} does not list any hosts",
                path.display()
            )));
        }

        info!(
            "Loaded {} hosts in {} groups from {}",
            groups.host_count(),
            groups.iter().filter(|g| !g.hosts.is_empty()).count(),
            path.display()
        );

        Ok(groups)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostGroup> {
        self.groups.iter()
    }

    pub fn get(&self, name: &str) -> Option<&HostGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// All hosts in group order
    pub fn hosts(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.hosts.iter().cloned())
            .collect()
    }

    pub fn host_count(&self) -> usize {
        self.groups.iter().map(|g| g.hosts.len()).sum()
    }
}

/// Stable sort by numeric IPv4 octets; anything else goes last
pub fn sort_hosts(hosts: &mut [String]) {
    hosts.sort_by_key(|host| octet_key(host));
}

fn octet_key(host: &str) -> [u16; 4] {
    let mut key = [0u16; 4];
    let mut parts = host.split('.');

    for slot in key.iter_mut() {
        match parts.next().and_then(|p| p.parse::<u8>().ok()) {
            Some(octet) => *slot = octet as u16,
            None => return MALFORMED_OCTETS,
        }
    }

    if parts.next().is_some() {
        return MALFORMED_OCTETS;
    }

    key
}
