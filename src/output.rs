//! Diagnostic record types handed to the output worker.
//!
//! The library only defines the records and their serialization; writing
//! them to disk (and the IO thread doing so) lives with the binary.

use crate::errors::*;
use crate::Float;
use serde_derive::{Deserialize, Serialize};

/// Axis description of a grid record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub label: String,
    pub units: String,
    pub min: Float,
    pub max: Float,
}

/// One scalar grid snapshot in simulation units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRecord {
    pub name: String,
    pub iteration: u64,
    pub time: Float,
    pub units: String,
    pub axes: [AxisInfo; 2],
    /// `[columns, rows]`.
    pub shape: [usize; 2],
    /// Row-major values.
    pub data: Vec<Float>,
}

/// Serialization format of the diagnostic files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Bincode,
    MsgPack,
    Cbor,
}

impl Default for OutputFormat {
    fn default() -> OutputFormat {
        OutputFormat::Bincode
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Bincode => "bin",
            OutputFormat::MsgPack => "msgpack",
            OutputFormat::Cbor => "cbor",
        }
    }

    pub fn to_bytes(&self, record: &GridRecord) -> Result<Vec<u8>> {
        match self {
            OutputFormat::Bincode => {
                bincode::serialize(record).chain_err(|| "bincode serialization failed")
            }
            OutputFormat::MsgPack => {
                rmp_serde::to_vec(record).chain_err(|| "msgpack serialization failed")
            }
            OutputFormat::Cbor => {
                serde_cbor::to_vec(record).chain_err(|| "cbor serialization failed")
            }
        }
    }
}

/// Sink contract for grid snapshots: the simulation hands a record over
/// every `ndump` steps.
pub trait DiagnosticSink {
    fn emit_grid(&mut self, record: GridRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> GridRecord {
        GridRecord {
            name: "e3".to_string(),
            iteration: 120,
            time: 4.8,
            units: "m_e c \\omega_p / e".to_string(),
            axes: [
                AxisInfo {
                    label: "x_1".to_string(),
                    units: "c/\\omega_p".to_string(),
                    min: 0.,
                    max: 6.4,
                },
                AxisInfo {
                    label: "x_2".to_string(),
                    units: "c/\\omega_p".to_string(),
                    min: 0.,
                    max: 6.4,
                },
            ],
            shape: [4, 2],
            data: vec![0., 1., 2., 3., 4., 5., 6., 7.],
        }
    }

    #[test]
    fn bincode_roundtrip() {
        let r = record();
        let bytes = OutputFormat::Bincode.to_bytes(&r).unwrap();
        let back: GridRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn formats_have_distinct_extensions() {
        assert_eq!(OutputFormat::Bincode.extension(), "bin");
        assert_eq!(OutputFormat::MsgPack.extension(), "msgpack");
        assert_eq!(OutputFormat::Cbor.extension(), "cbor");
    }
}
