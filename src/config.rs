//! Configuration management with environment variable support.
//!
//! Centralized configuration for uiproof:
//! - Environment variables for all configurable values
//! - Sensible defaults matching the tool's built-in policy
//! - A `defaults()` constructor that ignores the environment (tests)
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `UIPROOF_JUDGE_BIN` | Judge CLI binary | `claude` |
//! | `UIPROOF_JUDGE_MODEL` | Model passed to the judge | `sonnet` |
//! | `UIPROOF_JUDGE_TIMEOUT` | Judge call timeout (seconds) | `120` |
//! | `UIPROOF_SESSION_DIR` | Base directory for evidence sessions | `/tmp/uiproof` |
//! | `UIPROOF_DEFAULT_SIZE` | Default terminal size preset | `standard` |
//! | `UIPROOF_CAPTURE_TIMEOUT` | Default capture timeout (seconds) | `30` |
//! | `UIPROOF_FIX_MAX_ATTEMPTS` | Auto-fix attempt bound | `3` |
//! | `UIPROOF_FIX_MIN_CONFIDENCE` | Minimum proposal confidence | `0.5` |
//! | `UIPROOF_FIX_RELOAD_DELAY_MS` | Pause after an applied fix (ms) | `2000` |

use std::env;
use std::sync::OnceLock;

use crate::capture::term::TerminalSize;

// ============================================================================
// Default Values
// ============================================================================

/// Default judge CLI binary
pub const DEFAULT_JUDGE_BIN: &str = "claude";

/// Default judge model name
pub const DEFAULT_JUDGE_MODEL: &str = "sonnet";

/// Default judge call timeout (seconds)
pub const DEFAULT_JUDGE_TIMEOUT: u64 = 120;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/uiproof";

/// Default capture timeout (seconds)
pub const DEFAULT_CAPTURE_TIMEOUT: f64 = 30.0;

/// Default viewport width (pixels)
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height (pixels)
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

/// Default auto-fix attempt bound
pub const DEFAULT_FIX_MAX_ATTEMPTS: u32 = 3;

/// Default auto-fix confidence threshold
pub const DEFAULT_FIX_MIN_CONFIDENCE: f64 = 0.5;

/// Default pause after an applied fix, letting hot reload pick it up (ms)
pub const DEFAULT_FIX_RELOAD_DELAY_MS: u64 = 2000;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_JUDGE_BIN: &str = "UIPROOF_JUDGE_BIN";
pub const ENV_JUDGE_MODEL: &str = "UIPROOF_JUDGE_MODEL";
pub const ENV_JUDGE_TIMEOUT: &str = "UIPROOF_JUDGE_TIMEOUT";
pub const ENV_SESSION_DIR: &str = "UIPROOF_SESSION_DIR";
pub const ENV_DEFAULT_SIZE: &str = "UIPROOF_DEFAULT_SIZE";
pub const ENV_CAPTURE_TIMEOUT: &str = "UIPROOF_CAPTURE_TIMEOUT";
pub const ENV_FIX_MAX_ATTEMPTS: &str = "UIPROOF_FIX_MAX_ATTEMPTS";
pub const ENV_FIX_MIN_CONFIDENCE: &str = "UIPROOF_FIX_MIN_CONFIDENCE";
pub const ENV_FIX_RELOAD_DELAY_MS: &str = "UIPROOF_FIX_RELOAD_DELAY_MS";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for uiproof
#[derive(Debug, Clone)]
pub struct Config {
    /// Judge client settings
    pub judge: JudgeSettings,
    /// Evidence session settings
    pub session: SessionSettings,
    /// Capture defaults
    pub defaults: DefaultSettings,
    /// Auto-fix policy
    pub fix: FixPolicy,
}

/// Judge-related settings
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    /// Judge CLI binary name or path
    pub bin: String,
    /// Model name passed to the judge
    pub model: String,
    /// Timeout for one judge call (seconds)
    pub timeout: u64,
}

/// Evidence session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

/// Capture defaults
#[derive(Debug, Clone)]
pub struct DefaultSettings {
    /// Default terminal size for PTY captures
    pub terminal_size: TerminalSize,
    /// Default capture timeout (seconds)
    pub capture_timeout: f64,
    /// Default viewport width
    pub viewport_width: u32,
    /// Default viewport height
    pub viewport_height: u32,
}

/// Policy parameters for the auto-fix loop.
///
/// The attempt bound and confidence threshold are configuration, not
/// hard-coded constants.
#[derive(Debug, Clone)]
pub struct FixPolicy {
    /// Maximum number of fix attempts before giving up
    pub max_attempts: u32,
    /// Proposals below this confidence are never applied
    pub min_confidence: f64,
    /// Pause after an applied fix, letting hot reload pick it up (ms)
    pub reload_delay_ms: u64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            judge: JudgeSettings::from_env(),
            session: SessionSettings::from_env(),
            defaults: DefaultSettings::from_env(),
            fix: FixPolicy::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            judge: JudgeSettings::defaults(),
            session: SessionSettings::defaults(),
            defaults: DefaultSettings::defaults(),
            fix: FixPolicy::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl JudgeSettings {
    pub fn from_env() -> Self {
        Self {
            bin: env::var(ENV_JUDGE_BIN).unwrap_or_else(|_| DEFAULT_JUDGE_BIN.to_string()),
            model: env::var(ENV_JUDGE_MODEL).unwrap_or_else(|_| DEFAULT_JUDGE_MODEL.to_string()),
            timeout: env::var(ENV_JUDGE_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JUDGE_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            bin: DEFAULT_JUDGE_BIN.to_string(),
            model: DEFAULT_JUDGE_MODEL.to_string(),
            timeout: DEFAULT_JUDGE_TIMEOUT,
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

impl DefaultSettings {
    pub fn from_env() -> Self {
        let terminal_size = env::var(ENV_DEFAULT_SIZE)
            .ok()
            .and_then(|s| TerminalSize::parse(&s))
            .unwrap_or_default();

        Self {
            terminal_size,
            capture_timeout: env::var(ENV_CAPTURE_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CAPTURE_TIMEOUT),
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }

    pub fn defaults() -> Self {
        Self {
            terminal_size: TerminalSize::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

impl FixPolicy {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env::var(ENV_FIX_MAX_ATTEMPTS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FIX_MAX_ATTEMPTS),
            min_confidence: env::var(ENV_FIX_MIN_CONFIDENCE)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FIX_MIN_CONFIDENCE),
            reload_delay_ms: env::var(ENV_FIX_RELOAD_DELAY_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FIX_RELOAD_DELAY_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_attempts: DEFAULT_FIX_MAX_ATTEMPTS,
            min_confidence: DEFAULT_FIX_MIN_CONFIDENCE,
            reload_delay_ms: DEFAULT_FIX_RELOAD_DELAY_MS,
        }
    }
}

/// Get the session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.judge.bin, DEFAULT_JUDGE_BIN);
        assert_eq!(config.judge.model, DEFAULT_JUDGE_MODEL);
        assert_eq!(config.session.base_dir, DEFAULT_SESSION_DIR);
        assert_eq!(config.fix.max_attempts, DEFAULT_FIX_MAX_ATTEMPTS);
        assert_eq!(config.fix.min_confidence, DEFAULT_FIX_MIN_CONFIDENCE);
    }

    #[test]
    fn fix_policy_defaults_match_documented_bounds() {
        let policy = FixPolicy::defaults();
        assert_eq!(policy.max_attempts, 3);
        assert!((policy.min_confidence - 0.5).abs() < f64::EPSILON);
    }
}
