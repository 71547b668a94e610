//! Comparison report
//!
//! One row per variant: name, mean latency, artifact size, accuracy.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::benchmark::DeviceInfo;
use super::runner::BenchmarkRecord;
use crate::utils::error::Result;
use crate::utils::{format_bytes, format_latency};

const NAME_WIDTH: usize = 22;
const LATENCY_WIDTH: usize = 12;
const SIZE_WIDTH: usize = 11;
const ACCURACY_WIDTH: usize = 9;

/// Benchmark records of all variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// RFC 3339 creation time
    pub timestamp: String,
    pub device: DeviceInfo,
    /// Test split the variants were scored on
    pub split: String,
    pub records: Vec<BenchmarkRecord>,
}

impl Report {
    pub fn new(split: impl Into<String>, records: Vec<BenchmarkRecord>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            device: DeviceInfo::detect(),
            split: split.into(),
            records,
        }
    }

    pub fn record(&self, name: &str) -> Option<&BenchmarkRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Size of variant `name` relative to variant `reference`
    pub fn size_ratio(&self, name: &str, reference: &str) -> Option<f64> {
        let a = self.record(name)?;
        let b = self.record(reference)?;
        if b.size_bytes == 0 {
            return None;
        }
        Some(a.size_bytes as f64 / b.size_bytes as f64)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        info!("Saved report to {:?}", path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = [NAME_WIDTH, LATENCY_WIDTH, SIZE_WIDTH, ACCURACY_WIDTH];
        let rule = |left: &str, mid: &str, right: &str| {
            let parts: Vec<String> = widths.iter().map(|w| "═".repeat(w + 2)).collect();
            format!("{}{}{}", left, parts.join(mid), right)
        };

        writeln!(f, "{}", rule("╔", "╦", "╗"))?;
        writeln!(
            f,
            "║ {:<nw$} ║ {:>lw$} ║ {:>sw$} ║ {:>aw$} ║",
            "Variant",
            "Latency",
            "Size",
            "Accuracy",
            nw = NAME_WIDTH,
            lw = LATENCY_WIDTH,
            sw = SIZE_WIDTH,
            aw = ACCURACY_WIDTH
        )?;
        writeln!(f, "{}", rule("╠", "╬", "╣"))?;
        for r in &self.records {
            writeln!(
                f,
                "║ {:<nw$} ║ {:>lw$} ║ {:>sw$} ║ {:>aw$} ║",
                r.name,
                format_latency(r.mean_latency_s),
                format_bytes(r.size_bytes),
                format!("{:.2}%", r.accuracy * 100.0),
                nw = NAME_WIDTH,
                lw = LATENCY_WIDTH,
                sw = SIZE_WIDTH,
                aw = ACCURACY_WIDTH
            )?;
        }
        writeln!(f, "{}", rule("╚", "╩", "╝"))?;
        let samples = self.records.first().map_or(0, |r| r.samples);
        write!(f, "{} samples from '{}', {}", samples, self.split, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, size: u64, accuracy: f64) -> BenchmarkRecord {
        BenchmarkRecord {
            name: name.to_string(),
            mean_latency_s: 0.002,
            accuracy,
            size_bytes: size,
            p50_latency_s: 0.002,
            p95_latency_s: 0.003,
            samples: 10,
            per_class_recall: vec![Some(accuracy), None],
        }
    }

    fn report() -> Report {
        Report::new(
            "test",
            vec![
                record("baseline", 4000, 0.9),
                record("converted", 2000, 0.9),
                record("converted-quantized", 500, 0.8),
            ],
        )
    }

    #[test]
    fn test_table_has_one_row_per_variant() {
        let table = report().to_string();
        assert!(table.contains("converted-quantized"));
        assert!(table.contains("80.00%"));
        assert!(table.contains("2.000 ms"));
        // header + 3 rows + 3 rules + footer
        assert_eq!(table.lines().count(), 8);
    }

    #[test]
    fn test_size_ratio() {
        let r = report();
        assert_eq!(r.size_ratio("converted-quantized", "converted"), Some(0.25));
        assert_eq!(r.size_ratio("missing", "converted"), None);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/report.json");
        let r = report();
        r.save(&path).unwrap();

        let loaded = Report::load(&path).unwrap();
        assert_eq!(loaded.timestamp, r.timestamp);
        assert_eq!(loaded.records.len(), 3);
        assert_eq!(loaded.records[2].name, "converted-quantized");
        assert_eq!(loaded.records[2].size_bytes, 500);
        assert!((loaded.records[2].accuracy - 0.8).abs() < 1e-12);
    }
}
