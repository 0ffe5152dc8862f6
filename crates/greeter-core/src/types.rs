use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Text shown (and optionally spoken) when no content is available.
pub const FALLBACK_TEXT: &str = "Have a nice day!";

/// A face detection in capture-surface pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub top_left: (f32, f32),
    pub bottom_right: (f32, f32),
    /// Detector confidence. Some detectors report a one-element list; a
    /// missing value counts as 0 when filtering.
    #[serde(default, deserialize_with = "deserialize_probability")]
    pub probability: Option<f32>,
}

impl Detection {
    pub fn new(top_left: (f32, f32), bottom_right: (f32, f32), probability: f32) -> Self {
        Self {
            top_left,
            bottom_right,
            probability: Some(probability),
        }
    }

    pub fn width(&self) -> f32 {
        (self.bottom_right.0 - self.top_left.0).abs()
    }

    pub fn height(&self) -> f32 {
        (self.bottom_right.1 - self.top_left.1).abs()
    }

    /// Center point, measured from `top_left`.
    pub fn center(&self) -> (f32, f32) {
        (
            self.top_left.0 + self.width() / 2.0,
            self.top_left.1 + self.height() / 2.0,
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProbability {
    Scalar(f32),
    List(Vec<f32>),
}

fn deserialize_probability<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawProbability>::deserialize(deserializer)? {
        Some(RawProbability::Scalar(p)) => Some(p),
        Some(RawProbability::List(values)) => values.first().copied(),
        None => None,
    })
}

/// One poll cycle's worth of detector output.
///
/// `count` is what the detector claims; downstream logic only trusts the
/// number of detections that pass the filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            count: detections.len(),
            detections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Pixel dimensions of the capture surface the detections refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
}

impl Surface {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

/// A greeting line with an optional audio clip reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compliment {
    pub text: String,
    #[serde(default)]
    pub audio: Option<String>,
}

impl Compliment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: None,
        }
    }

    pub fn with_audio(text: impl Into<String>, audio: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            audio: Some(audio.into()),
        }
    }

    /// The fixed line used when a pool is empty or content failed to load.
    pub fn fallback() -> Self {
        Self::new(FALLBACK_TEXT)
    }
}

/// Stats key for a calendar day (`YYYY-MM-DD`).
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}
