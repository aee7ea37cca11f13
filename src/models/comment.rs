use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::{AppError, Result},
    store::Document,
};

/// Comments point back at their post; posts never hold their comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip_deserializing, default)]
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(default)]
    pub count_up: i64,
    #[serde(default)]
    pub count_down: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn from_document(id: String, doc: Document) -> Result<Self> {
        let mut comment: Comment = serde_json::from_value(serde_json::Value::Object(doc))
            .map_err(|e| AppError::Internal(format!("Malformed comment {}: {}", id, e)))?;
        comment.id = id;
        Ok(comment)
    }

    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut doc)) => {
                doc.remove("id");
                Ok(doc)
            }
            Ok(_) => Err(AppError::Internal(
                "Comment did not serialize to an object".into(),
            )),
            Err(e) => Err(AppError::Internal(format!("Failed to encode comment: {}", e))),
        }
    }
}

// Create comment request
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 36))]
    pub post_id: String,
    #[validate(length(min = 1, max = 10000))]
    pub text: String,
}
