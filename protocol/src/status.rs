use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Health snapshot pushed to the controller as the payload of a `status`
/// frame.
///
/// Memory and storage figures are MiB. `tps` maps dimension id to the mean
/// ticks-per-second the server reported for it; serde_json renders the
/// integer keys as JSON object keys, so the wire form is
/// `{"0": 20.0, "-1": 19.5}` and `{}` when no dimension has reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub name: String,
    pub playercount: u32,
    pub playermax: u32,
    pub activetime: u64,
    pub status: String,
    pub memory: u64,
    pub memorymax: u64,
    pub storage: u64,
    pub storagemax: u64,
    pub tps: BTreeMap<i32, f64>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> StatusReport {
        StatusReport {
            name: "testserver".to_string(),
            playercount: 2,
            playermax: 20,
            activetime: 3600,
            status: "Running".to_string(),
            memory: 2048,
            memorymax: 6192,
            storage: 1200,
            storagemax: 102400,
            tps: BTreeMap::from([(0, 20.0), (-1, 19.5)]),
        }
    }

    #[test]
    fn tps_serializes_as_object_with_string_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["tps"]["0"], 20.0);
        assert_eq!(value["tps"]["-1"], 19.5);
        assert_eq!(value["playercount"], 2);
        assert_eq!(value["status"], "Running");
    }

    #[test]
    fn empty_tps_is_an_empty_object() {
        let report = StatusReport {
            tps: BTreeMap::new(),
            ..sample()
        };
        let text = serde_json::to_string(&report).unwrap();
        assert!(text.contains(r#""tps":{}"#));
    }

    #[test]
    fn report_round_trip() {
        let report = sample();
        let back: StatusReport =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(report, back);
    }
}
