//! Sample filters for `--cpu` and `--dsos`.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use crate::domain::{CpuId, FilterParseError};

/// CPU ids at or above this are rejected
pub const MAX_NR_CPUS: u32 = 4096;

/// CPU allow-set parsed from a list like `0-3,8-11,16`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuFilter {
    cpus: BTreeSet<CpuId>,
}

impl CpuFilter {
    /// Samples without a CPU never pass
    #[must_use]
    pub fn allows(&self, cpu: Option<CpuId>) -> bool {
        cpu.is_some_and(|cpu| self.cpus.contains(&cpu))
    }

    pub fn cpus(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.cpus.iter().copied()
    }
}

impl FromStr for CpuFilter {
    type Err = FilterParseError;

    fn from_str(list: &str) -> Result<Self, Self::Err> {
        let err = |reason: String| FilterParseError { what: "CPU", list: list.to_string(), reason };
        let parse = |s: &str| -> Result<u32, FilterParseError> {
            let cpu = s.trim().parse::<u32>().map_err(|e| err(format!("'{s}': {e}")))?;
            if cpu >= MAX_NR_CPUS {
                return Err(err(format!("CPU {cpu} is above the maximum of {}", MAX_NR_CPUS - 1)));
            }
            Ok(cpu)
        };

        let mut cpus = BTreeSet::new();
        for range in list.split(',').filter(|r| !r.trim().is_empty()) {
            if let Some((start, end)) = range.split_once('-') {
                // Range like "0-3"
                let (start, end) = (parse(start)?, parse(end)?);
                if start > end {
                    return Err(err(format!("descending range {start}-{end}")));
                }
                cpus.extend((start..=end).map(CpuId));
            } else {
                // Single CPU like "5"
                cpus.insert(CpuId(parse(range)?));
            }
        }

        if cpus.is_empty() {
            return Err(err("no CPUs given".to_string()));
        }
        Ok(Self { cpus })
    }
}

/// Image allow-list parsed from `dso[,dso...]`
///
/// An entry matches either the full image path or its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsoFilter {
    names: Vec<String>,
}

impl DsoFilter {
    #[must_use]
    pub fn allows(&self, image: &str) -> bool {
        let file_name = Path::new(image).file_name().and_then(|n| n.to_str());
        self.names.iter().any(|name| name == image || Some(name.as_str()) == file_name)
    }
}

impl FromStr for DsoFilter {
    type Err = FilterParseError;

    fn from_str(list: &str) -> Result<Self, Self::Err> {
        let names: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(FilterParseError {
                what: "DSO",
                list: list.to_string(),
                reason: "no DSOs given".to_string(),
            });
        }
        Ok(Self { names })
    }
}
