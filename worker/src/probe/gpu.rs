//! GPU telemetry from `nvidia-smi`.

use std::{collections::BTreeMap, io};

use comms::specs::GpuInfo;

use crate::shell;

const QUERY: [&str; 2] = [
    "--query-gpu=name,driver_version,memory.used,memory.total,utilization.gpu",
    "--format=csv,noheader",
];

/// Samples every GPU on the host, keyed `"{name}-{index}"`.
pub async fn sample() -> io::Result<BTreeMap<String, GpuInfo>> {
    let out = shell::exec("nvidia-smi", &QUERY).await?;
    Ok(parse(&out))
}

/// Parses `nvidia-smi` CSV output, skipping lines that are too short.
pub fn parse(out: &str) -> BTreeMap<String, GpuInfo> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 4 {
                return None;
            }
            Some(GpuInfo {
                gpu_name: fields[0].to_string(),
                driver_version: fields[1].to_string(),
                memory_used: fields[2].to_string(),
                memory_total: fields[3].to_string(),
                utilization: fields.get(4).map(|u| u.to_string()),
            })
        })
        .enumerate()
        .map(|(i, info)| (format!("{}-{i}", info.gpu_name), info))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_gpu_line() {
        let out = "NVIDIA GeForce RTX 3090, 535.104.05, 1024 MiB, 24576 MiB, 37 %\n\
                   NVIDIA GeForce RTX 3090, 535.104.05, 0 MiB, 24576 MiB, 0 %\n";

        let gpus = parse(out);
        assert_eq!(gpus.len(), 2);

        let first = &gpus["NVIDIA GeForce RTX 3090-0"];
        assert_eq!(first.memory_used, "1024 MiB");
        assert_eq!(first.utilization.as_deref(), Some("37 %"));
        assert_eq!(gpus["NVIDIA GeForce RTX 3090-1"].memory_used, "0 MiB");
    }

    #[test]
    fn ignores_garbage() {
        assert!(parse("").is_empty());
        assert!(parse("No devices were found\n").is_empty());
    }
}
