//! Database models
//!
//! Row types for the curation tables plus the small enums stored as text or
//! real columns.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A vote on whether a sound belongs to a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteValue {
    /// Present and predominant (1.0)
    PresentPredominant,
    /// Present but not predominant (0.5)
    PresentNotPredominant,
    /// Unsure (0.0)
    Unsure,
    /// Not present (-1.0)
    NotPresent,
}

impl VoteValue {
    /// Order in which consensus checks vote values
    pub const PRIORITY_ORDER: [VoteValue; 4] = [
        VoteValue::PresentPredominant,
        VoteValue::PresentNotPredominant,
        VoteValue::Unsure,
        VoteValue::NotPresent,
    ];

    pub fn as_f64(self) -> f64 {
        match self {
            VoteValue::PresentPredominant => 1.0,
            VoteValue::PresentNotPredominant => 0.5,
            VoteValue::Unsure => 0.0,
            VoteValue::NotPresent => -1.0,
        }
    }

    /// Map a stored value back to the enum; anything else is invalid input
    pub fn from_f64(value: f64) -> Result<Self> {
        VoteValue::PRIORITY_ORDER
            .into_iter()
            .find(|v| v.as_f64() == value)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid vote value: {}", value)))
    }

    /// Whether the value confirms the category (1 or 0.5)
    pub fn is_present(self) -> bool {
        matches!(
            self,
            VoteValue::PresentPredominant | VoteValue::PresentNotPredominant
        )
    }
}

impl FromStr for VoteValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Invalid vote value: {}", s)))?;
        VoteValue::from_f64(value)
    }
}

/// Implements the text code mapping shared by the tag enums
macro_rules! text_code_enum {
    ($name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($code => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("Invalid ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Quality-control outcome recorded with a vote
///
/// `Failed` votes are excluded from consensus and priority scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteTest {
    Unknown,
    Passed,
    Failed,
    NotApplicable,
}

text_code_enum!(VoteTest {
    Unknown => "UN",
    Passed => "AP",
    Failed => "FA",
    NotApplicable => "NA",
});

/// Annotation task the vote was cast from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteTask {
    Beginner,
    Advanced,
}

text_code_enum!(VoteTask {
    Beginner => "BE",
    Advanced => "AD",
});

/// Origin of a candidate annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationType {
    Manual,
    Automatic,
    Unknown,
}

text_code_enum!(AnnotationType {
    Manual => "MA",
    Automatic => "AU",
    Unknown => "UK",
});

/// A category of the taxonomy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub node_id: String,
    pub name: String,
    pub description: String,
    pub citation_uri: String,
    pub is_abstract: bool,
    pub omitted: bool,
    pub advanced_task: bool,
    pub beginner_task: bool,
    pub ground_truth_count: i64,
}

impl TaxonomyNode {
    /// Node with the given id and name and every flag cleared
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            description: String::new(),
            citation_uri: String::new(),
            is_abstract: false,
            omitted: false,
            advanced_task: true,
            beginner_task: false,
            ground_truth_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i64,
    pub short_name: String,
    pub name: String,
}

/// External audio asset reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sound {
    pub id: i64,
    pub freesound_id: i64,
    pub name: String,
    /// Duration in seconds, when known
    pub duration: Option<f64>,
    pub deleted_in_freesound: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundDataset {
    pub id: i64,
    pub sound_id: i64,
    pub dataset_id: i64,
}

/// Claim that a sound belongs to a taxonomy node within a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnnotation {
    pub id: i64,
    pub sound_dataset_id: i64,
    pub taxonomy_node_id: String,
    pub annotation_type: AnnotationType,
    pub algorithm: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Cached consensus output; never authoritative
    pub ground_truth: Option<f64>,
    pub priority_score: i64,
    pub created_by: Option<String>,
}

/// One user's judgment on one candidate annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub candidate_annotation_id: i64,
    pub created_by: String,
    pub value: VoteValue,
    pub from_expert: bool,
    pub test: VoteTest,
    pub from_task: VoteTask,
    pub visited_sound: Option<bool>,
    pub from_test_page: bool,
    pub created_at: String,
}

impl Vote {
    /// Whether the vote counts toward consensus and scoring
    pub fn counts(&self) -> bool {
        self.test != VoteTest::Failed
    }
}

/// Confirmed label for a (taxonomy node, sound in dataset) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthAnnotation {
    pub id: i64,
    pub sound_dataset_id: i64,
    pub taxonomy_node_id: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub ground_truth: f64,
    pub from_propagation: bool,
    pub created_by: Option<String>,
}
