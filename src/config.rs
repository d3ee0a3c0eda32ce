use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::core::CliTool;
use crate::orchestration::{AgentState, MatchStrategy};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
}

/// Tick timing and per-session I/O bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub interval_secs: u64,
    pub capture_lines: u16,
    pub capture_timeout_secs: u64,
    pub send_timeout_secs: u64,
    /// How long a working agent may sit idle before it is nudged.
    pub stuck_nudge_after_secs: u64,
    pub nudge_cooldown_secs: u64,
    /// Nudges on one story before the manager escalates instead.
    pub max_stuck_nudges: u32,
    pub session_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            capture_lines: 50,
            capture_timeout_secs: 5,
            send_timeout_secs: 5,
            stuck_nudge_after_secs: 300,
            nudge_cooldown_secs: 300,
            max_stuck_nudges: 3,
            session_prefix: "hive-".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Never zero; a zero period would stall the tick timer.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// An indicator supplied through configuration rather than compiled in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSpec {
    pub state: AgentState,
    pub pattern: String,
    #[serde(default = "default_indicator_priority")]
    pub priority: u8,
    #[serde(default = "default_indicator_confidence")]
    pub confidence: f32,
    /// Tools the indicator applies to; empty means every tool.
    #[serde(default)]
    pub tools: Vec<CliTool>,
}

fn default_indicator_priority() -> u8 {
    50
}

fn default_indicator_confidence() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub stuck_timeout_secs: u64,
    pub strategy: MatchStrategy,
    pub extra_indicators: Vec<IndicatorSpec>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            stuck_timeout_secs: 120,
            strategy: MatchStrategy::FirstMatch,
            extra_indicators: Vec::new(),
        }
    }
}

impl DetectionConfig {
    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Confidence assigned when a "not done" verdict is overridden.
    pub override_floor: f32,
    pub ai_enabled: bool,
    pub classifier_command: String,
    pub classifier_timeout_secs: u64,
    /// How long a fallback verdict is cached before the classifier is retried.
    pub unavailable_retry_secs: u64,
    pub cache_capacity: usize,
    /// Completion signals needed before output counts as a candidate.
    pub min_heuristic_signals: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            override_floor: 0.84,
            ai_enabled: true,
            classifier_command: "claude".to_string(),
            classifier_timeout_secs: 30,
            unavailable_retry_secs: 300,
            cache_capacity: 512,
            min_heuristic_signals: 2,
        }
    }
}

impl CompletionConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    pub fn unavailable_retry(&self) -> Duration {
        Duration::from_secs(self.unavailable_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub junior_max_complexity: u8,
    pub intermediate_max_complexity: u8,
    pub senior_capacity: usize,
    pub max_agents_per_tier: usize,
    pub max_queued_prs_per_team: usize,
    pub agent_command: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            junior_max_complexity: 3,
            intermediate_max_complexity: 5,
            senior_capacity: 3,
            max_agents_per_tier: 4,
            max_queued_prs_per_team: 5,
            agent_command: "claude".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub lookback_mins: i64,
    pub rate_limit_base_secs: u64,
    pub rate_limit_max_secs: u64,
    pub interruption_cap: u32,
    pub recovery_cooldown_secs: u64,
    pub submit_command: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            lookback_mins: 30,
            rate_limit_base_secs: 90,
            rate_limit_max_secs: 300,
            interruption_cap: 3,
            recovery_cooldown_secs: 60,
            submit_command: "hive pr submit".to_string(),
        }
    }
}

impl EscalationConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookback_mins)
    }

    /// The lookback as a monotonic window for in-memory marks.
    pub fn lookback_window(&self) -> Duration {
        Duration::from_secs(self.lookback_mins.max(0).unsigned_abs() * 60)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_secs)
    }
}

impl Config {
    pub fn hive_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".hive"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.toml"))
    }

    pub fn store_path() -> Result<PathBuf> {
        Ok(Self::hive_dir()?.join("hive.json"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::parse(&fs::read_to_string(&path)?)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.junior_max_complexity > s.intermediate_max_complexity {
            return Err(Error::Validation(format!(
                "junior_max_complexity ({}) exceeds intermediate_max_complexity ({})",
                s.junior_max_complexity, s.intermediate_max_complexity
            )));
        }
        if !(0.0..=1.0).contains(&self.completion.override_floor) {
            return Err(Error::Validation(format!(
                "override_floor must be within 0..=1, got {}",
                self.completion.override_floor
            )));
        }
        if self.escalation.interruption_cap == 0 {
            return Err(Error::Validation(
                "interruption_cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let hive_dir = Self::hive_dir()?;
        if !hive_dir.exists() {
            debug!(dir = %hive_dir.display(), "creating hive directory");
            fs::create_dir_all(&hive_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }
}
