use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use log::{debug, warn};

use crate::error::VmError;

/// Environment variable that overrides the detected optimization level.
pub const LEVEL_ENV_VAR: &str = "VECVM_AVX512_LEVEL";

/// Opcode implementation tier.
///
/// The ordering matters: a requested level is only honored when it is not
/// greater than the detected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptLevel {
    #[default]
    None,
    V1,
    V2,
}

impl Display for OptLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OptLevel::None => "none",
            OptLevel::V1 => "avx512_v1",
            OptLevel::V2 => "avx512_v2",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OptLevel {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "disabled" => Ok(OptLevel::None),
            "v1" | "avx512_v1" => Ok(OptLevel::V1),
            "v2" | "avx512_v2" => Ok(OptLevel::V2),
            _ => Err(VmError::InternalError(format!("unrecognized optimization level {:?}", s))),
        }
    }
}

static ENV_LEVEL: OnceLock<OptLevel> = OnceLock::new();

impl OptLevel {
    /// Highest level the running CPU supports.
    pub fn detect() -> OptLevel {
        #[cfg(target_arch = "x86_64")]
        {
            let v1 = is_x86_feature_detected!("avx512f")
                && is_x86_feature_detected!("avx512bw")
                && is_x86_feature_detected!("avx512vl")
                && is_x86_feature_detected!("avx512dq");
            if !v1 {
                return OptLevel::None;
            }
            let v2 = is_x86_feature_detected!("avx512vbmi2")
                && is_x86_feature_detected!("avx512bitalg")
                && is_x86_feature_detected!("avx512vpopcntdq")
                && is_x86_feature_detected!("vpclmulqdq")
                && is_x86_feature_detected!("gfni")
                && is_x86_feature_detected!("vaes");
            if v2 {
                OptLevel::V2
            } else {
                OptLevel::V1
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            OptLevel::None
        }
    }

    /// Resolves an override value against the detected level.
    ///
    /// An empty or unknown value selects `detected`; a request for a level
    /// the hardware does not reach falls back to `detected` as well.
    pub fn from_env_value(value: &str, detected: OptLevel) -> OptLevel {
        let value = value.trim();
        if value.is_empty() {
            return detected;
        }
        match value.parse::<OptLevel>() {
            Ok(requested) if requested <= detected => requested,
            Ok(requested) => {
                warn!("{}={} not supported by this cpu, using {}", LEVEL_ENV_VAR, requested, detected);
                detected
            }
            Err(_) => {
                warn!("ignoring {}={:?}", LEVEL_ENV_VAR, value);
                detected
            }
        }
    }

    /// Level chosen for this process.
    ///
    /// Computed on first use and never changed afterwards, so it is settled
    /// before any program is compiled.
    pub fn from_env() -> OptLevel {
        *ENV_LEVEL.get_or_init(|| {
            let detected = OptLevel::detect();
            let value = std::env::var(LEVEL_ENV_VAR).unwrap_or_default();
            let level = OptLevel::from_env_value(&value, detected);
            debug!("optimization level {} (detected {})", level, detected);
            level
        })
    }
}

/// Immutable engine configuration passed to the compiler and the bytecode
/// constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub level: OptLevel,
    /// initial scratch capacity in bytes; grown on demand
    pub scratch_size: usize,
    pub max_buckets: usize,
}

pub const DEFAULT_SCRATCH_SIZE: usize = 64 * 1024;
pub const MAX_BUCKETS: usize = 1 << 24;

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            level: OptLevel::from_env(),
            scratch_size: DEFAULT_SCRATCH_SIZE,
            max_buckets: MAX_BUCKETS,
        }
    }
}

impl VmConfig {
    pub fn withLevel(level: OptLevel) -> Self {
        VmConfig {
            level,
            ..VmConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_table() {
        let detected = OptLevel::V2;
        assert_eq!(OptLevel::from_env_value("", detected), OptLevel::V2);
        assert_eq!(OptLevel::from_env_value("none", detected), OptLevel::None);
        assert_eq!(OptLevel::from_env_value("DISABLED", detected), OptLevel::None);
        assert_eq!(OptLevel::from_env_value("v1", detected), OptLevel::V1);
        assert_eq!(OptLevel::from_env_value("AVX512_V1", detected), OptLevel::V1);
        assert_eq!(OptLevel::from_env_value("V2", detected), OptLevel::V2);
        assert_eq!(OptLevel::from_env_value("avx512_v2", detected), OptLevel::V2);
    }

    #[test]
    fn test_override_unsupported_falls_back() {
        assert_eq!(OptLevel::from_env_value("v2", OptLevel::V1), OptLevel::V1);
        assert_eq!(OptLevel::from_env_value("avx512_v1", OptLevel::None), OptLevel::None);
        // downgrades are always honored
        assert_eq!(OptLevel::from_env_value("none", OptLevel::V1), OptLevel::None);
    }

    #[test]
    fn test_override_garbage() {
        assert_eq!(OptLevel::from_env_value("avx1024", OptLevel::V1), OptLevel::V1);
        assert!("avx1024".parse::<OptLevel>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for level in [OptLevel::None, OptLevel::V1, OptLevel::V2] {
            assert_eq!(level.to_string().parse::<OptLevel>().unwrap(), level);
        }
    }
}
