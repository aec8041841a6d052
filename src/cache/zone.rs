//! Zone policies: which TTL and watch behavior applies to a path

use std::path::Path;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ZoneConfig;
use crate::error::{Result, SearchError};

/// A compiled zone policy
#[derive(Debug, Clone)]
pub struct CacheZone {
    pub name: String,
    pub ttl: Duration,
    pub check_mtime: bool,
    pub watch: bool,
    pub description: String,
    patterns: GlobSet,
}

impl CacheZone {
    pub fn compile(config: &ZoneConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.patterns {
            let glob = Glob::new(pattern).map_err(|e| SearchError::Config {
                message: format!("zone '{}': bad pattern '{}': {}", config.name, pattern, e),
            })?;
            builder.add(glob);
        }
        let patterns = builder.build().map_err(|e| SearchError::Config {
            message: format!("zone '{}': {}", config.name, e),
        })?;

        Ok(Self {
            name: config.name.clone(),
            ttl: Duration::from_millis(config.ttl_ms),
            check_mtime: config.check_mtime,
            watch: config.watch,
            description: config.description.clone(),
            patterns,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.is_match(path)
    }
}

/// Ordered zones; the first matching zone wins
#[derive(Debug, Clone, Default)]
pub struct ZoneTable {
    zones: Vec<CacheZone>,
}

impl ZoneTable {
    pub fn new(configs: &[ZoneConfig]) -> Result<Self> {
        let zones = configs
            .iter()
            .map(CacheZone::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { zones })
    }

    pub fn resolve(&self, path: &Path) -> Option<&CacheZone> {
        self.zones.iter().find(|zone| zone.matches(path))
    }

    pub fn get(&self, name: &str) -> Option<&CacheZone> {
        self.zones.iter().find(|zone| zone.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().map(|zone| zone.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
