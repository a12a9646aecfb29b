//! Machine tier selection and boot disk sizing for compute jobs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Effectively-unbounded image cap for the final catch-all tier.
pub const UNBOUNDED_IMAGES: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineTier {
    pub name: String,
    pub machine_type: String,
    pub cpu_milli: u32,
    pub memory_mib: u32,
    /// Largest image count this tier accepts.
    pub max_images: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Tiers ordered by ascending capacity; selection is first-fit.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<MachineTier>,
    #[serde(default = "default_min_boot_disk_mb")]
    pub min_boot_disk_mb: u64,
    #[serde(default = "default_disk_safety_margin")]
    pub disk_safety_margin: f64,
    #[serde(default = "default_avg_image_size_mb")]
    pub avg_image_size_mb: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            min_boot_disk_mb: default_min_boot_disk_mb(),
            disk_safety_margin: default_disk_safety_margin(),
            avg_image_size_mb: default_avg_image_size_mb(),
        }
    }
}

fn tier(name: &str, machine_type: &str, cpu_milli: u32, memory_mib: u32, max_images: u32) -> MachineTier {
    MachineTier {
        name: name.to_string(),
        machine_type: machine_type.to_string(),
        cpu_milli,
        memory_mib,
        max_images,
    }
}

fn default_tiers() -> Vec<MachineTier> {
    vec![
        tier("small", "e2-standard-4", 4000, 16384, 200),
        tier("medium", "e2-standard-8", 8000, 32768, 500),
        tier("large", "e2-highmem-8", 8000, 65536, 1000),
        tier("xlarge", "e2-highmem-16", 16000, 131072, 2000),
        tier("max", "n2-highmem-32", 32000, 262144, UNBOUNDED_IMAGES),
    ]
}

fn default_min_boot_disk_mb() -> u64 {
    51200
}

fn default_disk_safety_margin() -> f64 {
    1.15
}

fn default_avg_image_size_mb() -> f64 {
    9.0
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("No machine tier can fit {0} images")]
    CapacityExceeded(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub tier: MachineTier,
    pub disk_size_mb: u64,
}

/// Picks the smallest tier that fits and sizes the boot disk for it.
pub fn plan_job(image_count: u32, config: &PlannerConfig) -> Result<JobPlan, PlannerError> {
    let tier = select_tier(image_count, &config.tiers)
        .ok_or(PlannerError::CapacityExceeded(image_count))?;
    Ok(JobPlan {
        tier: tier.clone(),
        disk_size_mb: disk_size_mb(image_count, config),
    })
}

/// First tier, in configured order, whose cap covers `image_count`.
pub fn select_tier(image_count: u32, tiers: &[MachineTier]) -> Option<&MachineTier> {
    tiers.iter().find(|t| image_count <= t.max_images)
}

/// Estimated working set with the safety margin applied, floored at the
/// configured minimum so small jobs still get room for intermediates.
pub fn disk_size_mb(image_count: u32, config: &PlannerConfig) -> u64 {
    let estimated =
        (image_count as f64 * config.avg_image_size_mb * config.disk_safety_margin).ceil() as u64;
    estimated.max(config.min_boot_disk_mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_tier_first_fit() {
        let config = PlannerConfig::default();
        assert_eq!(select_tier(150, &config.tiers).unwrap().name, "small");
        assert_eq!(select_tier(200, &config.tiers).unwrap().name, "small");
        assert_eq!(select_tier(201, &config.tiers).unwrap().name, "medium");
        assert_eq!(select_tier(250, &config.tiers).unwrap().name, "medium");
        assert_eq!(select_tier(999, &config.tiers).unwrap().name, "large");
        assert_eq!(select_tier(2001, &config.tiers).unwrap().name, "max");
        assert_eq!(select_tier(50000, &config.tiers).unwrap().name, "max");
    }

    #[test]
    fn test_select_tier_exhausted() {
        let tiers = vec![MachineTier {
            name: "only".to_string(),
            machine_type: "e2-standard-4".to_string(),
            cpu_milli: 4000,
            memory_mib: 16384,
            max_images: 100,
        }];
        assert!(select_tier(101, &tiers).is_none());

        let err = plan_job(
            101,
            &PlannerConfig {
                tiers,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, PlannerError::CapacityExceeded(101)));
    }

    #[test]
    fn test_disk_size_floored_at_minimum() {
        let config = PlannerConfig::default();
        // 500 * 9.0 * 1.15 = 5175, below the 51200 floor.
        assert_eq!(disk_size_mb(500, &config), 51200);
        assert_eq!(disk_size_mb(0, &config), 51200);
    }

    #[test]
    fn test_disk_size_scales_past_minimum() {
        let config = PlannerConfig::default();
        // 6000 * 9.0 * 1.15 = 62100.
        assert_eq!(disk_size_mb(6000, &config), 62100);
    }

    #[test]
    fn test_plan_job_combines_tier_and_disk() {
        let plan = plan_job(6000, &PlannerConfig::default()).unwrap();
        assert_eq!(plan.tier.name, "max");
        assert_eq!(plan.disk_size_mb, 62100);
    }
}
