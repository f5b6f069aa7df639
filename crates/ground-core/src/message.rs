use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Messages pushed to live subscribers.
///
/// `{"type":"initial","data":[...]}` carries the replay batch (newest first);
/// `{"type":"event","data":{...}}` carries one freshly ingested sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Initial(Vec<Sample>),
    Event(Sample),
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initial(_) => "initial",
            Self::Event(_) => "event",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
