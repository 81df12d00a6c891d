//! Small shared value types: severities, risk and automation grades, and the
//! deterministic id/clock sources used by replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Canonical alert severity. Ordering is meaningful: `Info < Warning < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Parse a canonical severity name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "high" | "major" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Graded severity of a proposed remediation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Minimal => "MINIMAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// How much of a recommendation may execute without human approval.
///
/// Ordering is meaningful: `Manual < Assisted < Full`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationLevel {
    #[default]
    Manual,
    Assisted,
    Full,
}

impl AutomationLevel {
    /// The maximum automation a risk grade permits.
    ///
    /// `CRITICAL` forces manual handling; `HIGH` caps at assisted.
    pub fn ceiling_for(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Critical => Self::Manual,
            RiskLevel::High => Self::Assisted,
            _ => Self::Full,
        }
    }

    /// Clamp this level to the ceiling the risk grade permits.
    pub fn bounded_by(self, risk: RiskLevel) -> Self {
        self.min(Self::ceiling_for(risk))
    }
}

impl std::fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::Assisted => "ASSISTED",
            Self::Full => "FULL",
        };
        write!(f, "{s}")
    }
}

/// Id source for decision-path entities.
///
/// Runtime uses random v4 uuids. Replay uses a seeded counter hashed through
/// SHA-256 so that a fixed seed and a fixed input stream yield byte-identical
/// identifiers, which the replay engine requires for its determinism check.
#[derive(Debug)]
pub struct IdGen {
    seed: Option<u64>,
    counter: AtomicU64,
}

impl IdGen {
    /// Random ids for live operation.
    pub fn random() -> Self {
        Self {
            seed: None,
            counter: AtomicU64::new(0),
        }
    }

    /// Deterministic ids derived from `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> Uuid {
        match self.seed {
            None => Uuid::new_v4(),
            Some(seed) => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let mut hasher = Sha256::new();
                hasher.update(seed.to_be_bytes());
                hasher.update(n.to_be_bytes());
                let digest = hasher.finalize();
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&digest[..16]);
                // Keep the uuid well-formed (version 4, RFC variant).
                bytes[6] = (bytes[6] & 0x0f) | 0x40;
                bytes[8] = (bytes[8] & 0x3f) | 0x80;
                Uuid::from_bytes(bytes)
            }
        }
    }

    /// Whether this generator is deterministic.
    pub fn is_seeded(&self) -> bool {
        self.seed.is_some()
    }
}

/// Time source. Replay pins timestamps to the original event time.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    /// Wall clock.
    Wall,
    /// Fixed instant, used when replaying historical events.
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Current time according to this source.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::Wall => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }
}
