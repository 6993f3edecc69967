use crate::core::racer::{ProgressEvent, RacerId};
use crate::post::race_result::RaceOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalEntry {
    pub rank: u32,
    pub racer: RacerId,
    pub time_s: Option<f64>,
}

/// RaceMessage is what an observer receives: any number of progress messages followed by
/// exactly one final message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaceMessage {
    Progress {
        racer: RacerId,
        progress: f64,
        finished: bool,
    },
    Final {
        finish_order: Vec<FinalEntry>,
    },
}

impl RaceMessage {
    pub fn progress(event: &ProgressEvent) -> RaceMessage {
        RaceMessage::Progress {
            racer: event.racer.clone(),
            progress: event.progress,
            finished: event.finished,
        }
    }

    pub fn final_outcome(outcome: &RaceOutcome) -> RaceMessage {
        RaceMessage::Final {
            finish_order: outcome
                .finish_order
                .iter()
                .map(|entry| FinalEntry {
                    rank: entry.rank,
                    racer: entry.racer.clone(),
                    time_s: entry.time_s,
                })
                .collect(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, RaceMessage::Final { .. })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
