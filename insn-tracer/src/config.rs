//! Tracer configuration
//!
//! The only tunable exposed on the plugin command line is the flush
//! threshold, given as `threshold=<instructions>`. The register catalog is
//! fixed at startup and can only be replaced programmatically.

use serde::{Deserialize, Serialize};

use crate::catalog::{RegisterCatalog, DEFAULT_X86_64_REGISTERS};
use crate::error::TracerError;
use crate::Result;

/// Instructions buffered per context before a flush
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 1_000_000;

/// Startup configuration of the tracer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Flush a context's buffer after this many instructions
    pub flush_threshold: u64,
    /// Registers to trace, in output order
    pub registers: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            registers: DEFAULT_X86_64_REGISTERS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl TracerConfig {
    /// Parse plugin arguments of the form `key=value`
    ///
    /// Recognized keys: `threshold`. Anything else is rejected.
    pub fn from_plugin_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| TracerError::InvalidArgument {
                arg: arg.to_string(),
                reason: "expected key=value".to_string(),
            })?;

            match key.trim() {
                "threshold" => {
                    config.flush_threshold =
                        value
                            .trim()
                            .parse()
                            .map_err(|e| TracerError::InvalidArgument {
                                arg: arg.to_string(),
                                reason: format!("threshold is not an unsigned integer: {e}"),
                            })?;
                }
                other => {
                    return Err(TracerError::InvalidArgument {
                        arg: arg.to_string(),
                        reason: format!("unknown option {other:?}"),
                    })
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace the traced registers
    pub fn with_registers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flush_threshold(mut self, threshold: u64) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(TracerError::InvalidThreshold(self.flush_threshold));
        }
        Ok(())
    }

    pub fn catalog(&self) -> RegisterCatalog {
        RegisterCatalog::new(self.registers.iter().cloned())
    }
}
