//! Control signals: one-shot instructions from the controller to the job.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// An out-of-band instruction, consumed at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
    Resume,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Run => "run",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Resume => "resume",
        })
    }
}

impl FromStr for ControlSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Self::Run),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            "resume" => Ok(Self::Resume),
            other => Err(format!("unknown control signal: {other}")),
        }
    }
}
