use crate::error::{AdError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One ad tag in the waterfall, plus its tracking beacons.
///
/// Empty beacon URLs mean "no beacon"; the sender treats them as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCandidate {
    pub ad_tag_url: String,
    pub request_url: String,
    pub impression_url: String,
}

impl AdCandidate {
    /// A bare ad tag without request or impression beacons.
    pub fn from_tag(ad_tag_url: impl Into<String>) -> Self {
        AdCandidate {
            ad_tag_url: ad_tag_url.into(),
            request_url: String::new(),
            impression_url: String::new(),
        }
    }
}

/// Wire shape of a single creative-parameter entry: `{url, r, i}`.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    url: String,
    #[serde(default)]
    r: Option<String>,
    #[serde(default)]
    i: Option<String>,
}

impl From<RawCandidate> for AdCandidate {
    fn from(raw: RawCandidate) -> Self {
        AdCandidate {
            ad_tag_url: raw.url,
            request_url: raw.r.unwrap_or_default(),
            impression_url: raw.i.unwrap_or_default(),
        }
    }
}

/// Ordered, read-only list of ad candidates tried one after another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waterfall {
    candidates: Vec<AdCandidate>,
}

impl Waterfall {
    pub fn new(candidates: Vec<AdCandidate>) -> Self {
        Waterfall { candidates }
    }

    /// Parse creative parameters: `{"0": {"url": .., "r": .., "i": ..}, "1": ..}`.
    ///
    /// Candidates are taken in index order starting at 0; the first missing
    /// index ends the waterfall. Non-numeric keys are ignored.
    pub fn from_creative_data(json: &str) -> Result<Self> {
        let params: Map<String, Value> = serde_json::from_str(json)?;
        let mut candidates: Vec<AdCandidate> = Vec::new();
        for index in 0usize.. {
            let Some(entry) = params.get(&index.to_string()) else {
                break;
            };
            candidates.push(RawCandidate::deserialize(entry)?.into());
        }
        Ok(Waterfall { candidates })
    }

    /// Single-tag session (no waterfall). An empty tag cannot start a session.
    pub fn from_ad_tag(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(AdError::EmptyAdTagInput);
        }
        Ok(Waterfall {
            candidates: vec![AdCandidate::from_tag(tag)],
        })
    }

    pub fn get(&self, index: usize) -> Option<&AdCandidate> {
        self.candidates.get(index)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdCandidate> {
        self.candidates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candidates_in_index_order() {
        let json = r#"{
            "1": {"url": "B", "r": "https://t/r1", "i": "https://t/i1"},
            "0": {"url": "A", "r": "https://t/r0", "i": "https://t/i0"}
        }"#;
        let wf = Waterfall::from_creative_data(json).unwrap();
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.get(0).unwrap().ad_tag_url, "A");
        assert_eq!(wf.get(1).unwrap().impression_url, "https://t/i1");
        assert!(wf.get(2).is_none());
    }

    #[test]
    fn missing_beacons_become_empty() {
        let wf = Waterfall::from_creative_data(r#"{"0": {"url": "A"}, "1": {"url": "B", "r": null}}"#).unwrap();
        assert_eq!(wf.get(0).unwrap().request_url, "");
        assert_eq!(wf.get(1).unwrap().request_url, "");
        assert_eq!(wf.get(1).unwrap().impression_url, "");
    }

    #[test]
    fn index_gap_ends_waterfall() {
        let wf = Waterfall::from_creative_data(r#"{"0": {"url": "A"}, "2": {"url": "C"}}"#).unwrap();
        assert_eq!(wf.len(), 1);
    }

    #[test]
    fn non_numeric_keys_are_ignored() {
        let wf = Waterfall::from_creative_data(r#"{"tags": {"url": "X"}, "0": {"url": "A"}}"#).unwrap();
        assert_eq!(wf.len(), 1);
        assert_eq!(wf.get(0).unwrap().ad_tag_url, "A");
    }

    #[test]
    fn non_numeric_keys_of_any_shape_are_ignored() {
        let wf = Waterfall::from_creative_data(
            r#"{"tags": [{"url": "X"}], "width": 640, "0": {"url": "A"}}"#,
        )
        .unwrap();
        assert_eq!(wf.len(), 1);
        assert_eq!(wf.get(0).unwrap().ad_tag_url, "A");
    }

    #[test]
    fn index_keys_must_match_exactly() {
        let json = r#"{"0": {"url": "A"}, "00": {"url": "B"}, "+0": {"url": "D"}, " 1": {"url": "C"}}"#;
        for _ in 0..16 {
            let wf = Waterfall::from_creative_data(json).unwrap();
            let tags: Vec<&str> = wf.iter().map(|c| c.ad_tag_url.as_str()).collect();
            assert_eq!(tags, vec!["A"]);
        }
    }

    #[test]
    fn empty_object_is_an_empty_waterfall() {
        let wf = Waterfall::from_creative_data("{}").unwrap();
        assert!(wf.is_empty());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Waterfall::from_creative_data(r#"{"0": "not an object"}"#).unwrap_err();
        assert!(matches!(err, AdError::InvalidWaterfall(_)));
    }

    #[test]
    fn empty_ad_tag_cannot_start() {
        assert!(matches!(Waterfall::from_ad_tag("   "), Err(AdError::EmptyAdTagInput)));
        let wf = Waterfall::from_ad_tag("https://ads.example/vast").unwrap();
        assert_eq!(wf.len(), 1);
        assert_eq!(wf.get(0).unwrap().impression_url, "");
    }
}
