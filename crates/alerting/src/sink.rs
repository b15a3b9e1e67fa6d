//! Alert sinks and the fallback strategy

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{AlertError, SinkFailure};

/// Something that can sound an alert
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Play one alert to completion.
    ///
    /// Dropping the returned future must stop the alert.
    async fn play(&self) -> Result<(), AlertError>;
}

/// Final fallback: a structured log line. Never fails.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn play(&self) -> Result<(), AlertError> {
        warn!(target: "alert", "DROWSINESS ALERT: eyes closed, wake up");
        Ok(())
    }
}

/// Terminal bell on stderr
#[derive(Debug)]
pub struct BellSink {
    repeats: u32,
    gap: Duration,
}

impl BellSink {
    pub fn new(repeats: u32, gap: Duration) -> Self {
        Self {
            repeats: repeats.max(1),
            gap,
        }
    }
}

impl Default for BellSink {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

#[async_trait]
impl AlertSink for BellSink {
    fn name(&self) -> &str {
        "bell"
    }

    async fn play(&self) -> Result<(), AlertError> {
        let mut stderr = tokio::io::stderr();
        for i in 0..self.repeats {
            if i > 0 {
                tokio::time::sleep(self.gap).await;
            }
            stderr.write_all(b"\x07").await?;
            stderr.flush().await?;
        }
        Ok(())
    }
}

/// Runs an external player, e.g. `aplay sounds/alarm.wav`.
///
/// The player is killed if the play is dropped before it exits.
pub struct CommandSink {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{program}"),
            program,
            args,
        }
    }
}

#[async_trait]
impl AlertSink for CommandSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn play(&self) -> Result<(), AlertError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AlertError::Unavailable(format!("{}: {}", self.program, e)))?;

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(AlertError::Command(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }
}

/// Ordered list of sinks tried in turn until one succeeds
#[derive(Default)]
pub struct FallbackChain {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority sink
    pub fn then(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Build a chain from configuration, in order
    pub fn from_specs(specs: &[SinkSpec]) -> Self {
        let mut chain = Self::new();
        for spec in specs {
            chain.push(spec.build());
        }
        chain
    }
}

#[async_trait]
impl AlertSink for FallbackChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    async fn play(&self) -> Result<(), AlertError> {
        let mut failures = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            match sink.play().await {
                Ok(()) => {
                    if !failures.is_empty() {
                        debug!("Alert played via fallback sink {}", sink.name());
                    }
                    return Ok(());
                }
                Err(e) => {
                    debug!("Alert sink {} failed: {}", sink.name(), e);
                    failures.push(SinkFailure {
                        sink: sink.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(AlertError::Exhausted(failures))
    }
}

/// Configurable alert sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkSpec {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Bell {
        #[serde(default = "default_bell_repeats")]
        repeats: u32,
    },
    Log,
}

fn default_bell_repeats() -> u32 {
    3
}

impl SinkSpec {
    /// Default chain: terminal bell, then a log line
    pub fn default_chain() -> Vec<SinkSpec> {
        vec![
            SinkSpec::Bell {
                repeats: default_bell_repeats(),
            },
            SinkSpec::Log,
        ]
    }

    fn build(&self) -> Arc<dyn AlertSink> {
        match self {
            SinkSpec::Command { program, args } => {
                Arc::new(CommandSink::new(program.clone(), args.clone()))
            }
            SinkSpec::Bell { repeats } => {
                Arc::new(BellSink::new(*repeats, Duration::from_millis(500)))
            }
            SinkSpec::Log => Arc::new(LogSink),
        }
    }
}
