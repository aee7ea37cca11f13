use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    store::Document,
};

/// Time-decay component every post starts with.
pub const INITIAL_TIME_SCORE: f64 = 100.0;

/// Optional signals produced by the content-enhancement pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spelling_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spam_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl QualitySignals {
    pub fn is_empty(&self) -> bool {
        self.spelling_score.is_none()
            && self.spam_score.is_none()
            && self.safety_score.is_none()
            && self.quality_score.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(skip_deserializing, default)]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub author_id: String,
    #[serde(default)]
    pub count_up: i64,
    #[serde(default)]
    pub count_down: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default = "initial_time_score")]
    pub time_score: f64,
    #[serde(default)]
    pub rank: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub quality: QualitySignals,
}

fn initial_time_score() -> f64 {
    INITIAL_TIME_SCORE
}

impl Post {
    pub fn from_document(id: String, doc: Document) -> Result<Self> {
        let mut post: Post = serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| AppError::Internal(format!("Malformed post {}: {}", id, e)))?;
        post.id = id;
        Ok(post)
    }

    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut doc)) => {
                doc.remove("id");
                Ok(doc)
            }
            Ok(_) => Err(AppError::Internal("Post did not serialize to an object".into())),
            Err(e) => Err(AppError::Internal(format!("Failed to encode post: {}", e))),
        }
    }
}

// Create post request
#[derive(Debug, Validate, Deserialize)]
pub struct CreatePostRequest {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(url)]
    pub url: Option<String>,
    #[validate(length(max = 40000))]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsQuery {
    pub limit: Option<usize>,
}
