pub mod http;
pub mod stdout;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::broker::{ConnectionList, ServerStats};

/// The unit of delivery: one source's status document with the derived
/// per-second rates merged in, paired with its connection list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub stats: ServerStats,
    pub connections: ConnectionList,
}

/// Forwarder dispatches enriched records to a delivery backend.
///
/// Enum dispatch rather than trait objects keeps the async delivery call
/// free of `Pin<Box<dyn Future>>` overhead.
pub enum Forwarder {
    Http(http::HttpForwarder),
    Stdout(stdout::StdoutForwarder),
}

impl Forwarder {
    /// Returns the forwarder name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Http(f) => f.name(),
            Self::Stdout(f) => f.name(),
        }
    }

    /// Deliver one record. A failure means the record is dropped; the
    /// caller logs and moves on, there is no retry or buffering.
    pub async fn forward(&self, record: &EnrichedRecord) -> Result<()> {
        match self {
            Self::Http(f) => f.forward(record).await,
            Self::Stdout(f) => f.forward(record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enriched_record_serialization() {
        let record = EnrichedRecord {
            stats: ServerStats {
                server_id: "S1".to_string(),
                in_bytes_sec: 512.0,
                ..Default::default()
            },
            connections: ConnectionList {
                num_connections: 3,
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["stats"]["server_id"], "S1");
        assert_eq!(json["stats"]["in_bytes_sec"], 512.0);
        assert_eq!(json["connections"]["num_connections"], 3);
    }

    #[test]
    fn test_forwarder_names() {
        let stdout = Forwarder::Stdout(stdout::StdoutForwarder::new());
        assert_eq!(stdout.name(), "stdout");
    }
}
