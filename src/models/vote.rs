use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::validate_id,
    store::{COMMENTS, Document, POSTS, int_field},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Post,
    Comment,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Post => "post",
            ResourceType::Comment => "comment",
        }
    }

    /// Collection holding resources of this type.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::Post => POSTS,
            ResourceType::Comment => COMMENTS,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "post" | "Post" | "posts" => Ok(ResourceType::Post),
            "comment" | "Comment" | "comments" => Ok(ResourceType::Comment),
            _ => Err(AppError::InvalidArgument(format!(
                "Unknown resource type: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// Signed-count encoding used in stored vote records.
    pub fn count(&self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }

    pub fn from_count(count: i64) -> Option<Self> {
        match count {
            1 => Some(VoteDirection::Up),
            -1 => Some(VoteDirection::Down),
            _ => None,
        }
    }

    /// Aggregate counter this direction bumps.
    pub fn counter_field(&self) -> &'static str {
        match self {
            VoteDirection::Up => "countUp",
            VoteDirection::Down => "countDown",
        }
    }
}

impl FromStr for VoteDirection {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" | "Up" | "1" | "+1" => Ok(VoteDirection::Up),
            "down" | "Down" | "-1" => Ok(VoteDirection::Down),
            _ => Err(AppError::InvalidArgument(format!(
                "Unknown vote direction: {}",
                s
            ))),
        }
    }
}

mod signed_count {
    use super::VoteDirection;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        direction: &VoteDirection,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(direction.count())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<VoteDirection, D::Error> {
        let count = i64::deserialize(deserializer)?;
        VoteDirection::from_count(count)
            .ok_or_else(|| D::Error::custom(format!("invalid vote count {}", count)))
    }
}

/// One user's current stance on one resource. Absence of a record is the
/// neutral state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    #[serde(skip)]
    pub id: String,
    pub user_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    #[serde(with = "signed_count")]
    pub direction: VoteDirection,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Vote {
    pub fn from_document(id: String, doc: Document) -> Result<Self> {
        let mut vote: Vote = serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| AppError::Internal(format!("Malformed vote {}: {}", id, e)))?;
        vote.id = id;
        Ok(vote)
    }

    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(AppError::Internal("Vote did not serialize to an object".into())),
            Err(e) => Err(AppError::Internal(format!("Failed to encode vote: {}", e))),
        }
    }

    /// Collection-scoped uniqueness key for `(user, resource type, resource)`.
    pub fn unique_key(user_id: &str, resource_type: ResourceType, resource_id: &str) -> String {
        format!("{}:{}:{}", user_id, resource_type, resource_id)
    }
}

/// Vote-relevant subset of a post or comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAggregate {
    pub count_up: i64,
    pub count_down: i64,
    pub score: i64,
}

impl ResourceAggregate {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            count_up: int_field(doc, "countUp"),
            count_down: int_field(doc, "countDown"),
            score: int_field(doc, "score"),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.score == self.count_up - self.count_down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Created,
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteResult {
    pub result: VoteOutcome,
    pub direction: Option<VoteDirection>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteState {
    pub direction: Option<VoteDirection>,
    pub score: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVoteState {
    pub direction: Option<VoteDirection>,
    pub count_up: i64,
    pub count_down: i64,
    pub score: i64,
}

impl BatchVoteState {
    pub fn from_aggregate(aggregate: ResourceAggregate, direction: Option<VoteDirection>) -> Self {
        Self {
            direction,
            count_up: aggregate.count_up,
            count_down: aggregate.count_down,
            score: aggregate.score,
        }
    }
}

/// Direction as it arrives on the wire: `"up"`/`"down"` or the signed count.
#[derive(Debug, Clone)]
pub enum WireDirection {
    Named(String),
    Count(i64),
}

impl<'de> Deserialize<'de> for WireDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Named(String),
            Count(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Named(s) => WireDirection::Named(s),
            Raw::Count(n) => WireDirection::Count(n),
        })
    }
}

impl Serialize for WireDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            WireDirection::Named(s) => serializer.serialize_str(s),
            WireDirection::Count(n) => serializer.serialize_i64(*n),
        }
    }
}

impl WireDirection {
    pub fn parse(&self) -> Result<VoteDirection> {
        match self {
            WireDirection::Named(s) => s.parse(),
            WireDirection::Count(n) => VoteDirection::from_count(*n).ok_or_else(|| {
                AppError::InvalidArgument(format!("Unknown vote direction: {}", n))
            }),
        }
    }
}

// Vote request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[validate(length(min = 1, max = 36))]
    pub resource_id: String,
    pub resource_type: String,
    pub direction: WireDirection,
}

/// A vote request with every field parsed into its domain type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteIntent {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub direction: VoteDirection,
}

impl VoteRequest {
    pub fn parse(&self) -> Result<VoteIntent> {
        self.validate()?;
        validate_id("resource", &self.resource_id)?;
        Ok(VoteIntent {
            resource_id: self.resource_id.clone(),
            resource_type: self.resource_type.parse()?,
            direction: self.direction.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_id: String,
    pub resource_type: ResourceType,
}

impl ResourceRef {
    pub fn new(resource_id: &str, resource_type: ResourceType) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchVoteRequest {
    pub resources: Vec<ResourceRef>,
}
