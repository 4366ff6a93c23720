//! GPU detection via the driver's query tool, with a PCI bus fallback.

use serde::Serialize;
use tracing::{debug, warn};

use crate::exec::{CommandRunner, CommandSpec};

/// A detected GPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDevice {
    /// Device index (PCI order for the fallback path).
    pub index: u32,
    /// Marketing name (e.g. "NVIDIA RTX A6000").
    pub name: String,
    /// Total memory in MiB, when the driver reports it.
    pub memory_mib: Option<u64>,
}

impl std::fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.memory_mib {
            Some(mib) => write!(f, "#{} {} ({} MiB)", self.index, self.name, mib),
            None => write!(f, "#{} {}", self.index, self.name),
        }
    }
}

/// `nvidia-smi` query for index, name and total memory.
#[must_use]
pub fn nvidia_smi_query() -> CommandSpec {
    CommandSpec::new("nvidia-smi").args([
        "--query-gpu=index,name,memory.total",
        "--format=csv,noheader,nounits",
    ])
}

/// Parse `nvidia-smi --format=csv,noheader,nounits` output.
#[must_use]
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuDevice> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 2 || fields[1].is_empty() {
                return None;
            }
            Some(GpuDevice {
                index: fields[0].parse().ok()?,
                name: fields[1].to_string(),
                memory_mib: fields.get(2).and_then(|m| m.parse().ok()),
            })
        })
        .collect()
}

/// Extract NVIDIA display/compute controllers from `lspci` output.
#[must_use]
pub fn parse_lspci(output: &str) -> Vec<GpuDevice> {
    output
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("nvidia")
                && (lower.contains("vga compatible controller") || lower.contains("3d controller"))
        })
        .enumerate()
        .map(|(i, line)| {
            // "00:1e.0 3D controller: NVIDIA Corporation GA102GL [RTX A6000] (rev a1)"
            let name = line
                .split_once(": ")
                .map_or(line, |(_, rest)| rest)
                .trim()
                .to_string();
            GpuDevice {
                index: u32::try_from(i).unwrap_or(u32::MAX),
                name,
                memory_mib: None,
            }
        })
        .collect()
}

/// Detect GPUs. Returns an empty list when none are found.
///
/// Tool failures are not errors here; an unusable tool simply yields no
/// devices so the caller can decide that absence is fatal.
pub async fn detect_gpus(runner: &dyn CommandRunner) -> Vec<GpuDevice> {
    match runner.run(&nvidia_smi_query()).await {
        Ok(out) if out.success() => {
            let devices = parse_nvidia_smi(&out.stdout);
            if !devices.is_empty() {
                return devices;
            }
            debug!("nvidia-smi returned no devices");
        }
        Ok(out) => warn!(code = ?out.code, stderr = %out.stderr.trim(), "nvidia-smi failed"),
        Err(e) => warn!(error = %e, "nvidia-smi unavailable"),
    }

    match runner.run(&CommandSpec::new("lspci")).await {
        Ok(out) if out.success() => parse_lspci(&out.stdout),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        let out = "0, NVIDIA RTX A6000, 49140\n1, NVIDIA RTX A6000, 49140\n";
        let devices = parse_nvidia_smi(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "NVIDIA RTX A6000");
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[0].memory_mib, Some(49140));
        assert_eq!(devices[0].to_string(), "#0 NVIDIA RTX A6000 (49140 MiB)");
    }

    #[test]
    fn test_parse_nvidia_smi_ignores_noise() {
        assert!(parse_nvidia_smi("No devices were found\n").is_empty());
        assert!(parse_nvidia_smi("").is_empty());
    }

    #[test]
    fn test_parse_nvidia_smi_unknown_memory() {
        let devices = parse_nvidia_smi("0, NVIDIA H100 80GB HBM3, [N/A]\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].memory_mib, None);
    }

    #[test]
    fn test_parse_lspci() {
        let out = "\
00:00.0 Host bridge: Intel Corporation 440FX - 82441FX PMC [Natoma] (rev 02)
00:02.0 VGA compatible controller: Cirrus Logic GD 5446
00:1e.0 3D controller: NVIDIA Corporation GA102GL [RTX A6000] (rev a1)
";
        let devices = parse_lspci(out);
        assert_eq!(devices.len(), 1);
        assert_eq!(
            devices[0].name,
            "NVIDIA Corporation GA102GL [RTX A6000] (rev a1)"
        );
    }
}
