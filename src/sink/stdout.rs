use std::io::Write;

use anyhow::{Context, Result};

use super::EnrichedRecord;

/// Console forwarder: writes each record to stdout as one JSON line.
///
/// Useful during development and as a credential-free delivery path.
pub struct StdoutForwarder;

impl StdoutForwarder {
    pub fn new() -> Self {
        Self
    }

    /// Returns the forwarder name for logging.
    pub fn name(&self) -> &str {
        "stdout"
    }

    /// Print one record.
    pub async fn forward(&self, record: &EnrichedRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serializing record")?;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").context("writing record to stdout")?;

        Ok(())
    }
}

impl Default for StdoutForwarder {
    fn default() -> Self {
        Self::new()
    }
}
