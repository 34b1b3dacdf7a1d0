//! Per-owner reports over the activity log, the document table and the
//! search query log.


use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::database::sqlite::Database;
use crate::database::sqlite::models::UserActivity;
use crate::database::sqlite::queries::{
    ActivityQueries, ChatSessionQueries, DocumentQueries, SearchQueryQueries,
};
use crate::{RagError, Result};

pub const DEFAULT_USAGE_DAYS: u32 = 30;
pub const MAX_USAGE_DAYS: u32 = 365;

const RECENT_ACTIVITY_LIMIT: i64 = 20;
const RECENT_UPLOAD_LIMIT: i64 = 10;
const POPULAR_SEARCH_LIMIT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub days: u32,
    pub total_documents: i64,
    pub total_searches: i64,
    pub total_chat_sessions: i64,
    pub recent_activities: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub action: String,
    pub resource_id: Option<String>,
    pub timestamp: NaiveDateTime,
    /// Parsed details, an empty object when absent or not valid JSON
    pub details: Value,
}

impl From<UserActivity> for ActivityEntry {
    #[inline]
    fn from(activity: UserActivity) -> Self {
        let details = activity
            .details
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        Self {
            id: activity.id,
            action: activity.action,
            resource_id: activity.resource_id,
            timestamp: activity.timestamp,
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub total_documents: i64,
    pub documents_by_type: BTreeMap<String, i64>,
    pub recent_uploads: Vec<RecentUpload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentUpload {
    pub id: i64,
    pub filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPerformance {
    pub average_results_per_search: f64,
    pub popular_searches: Vec<PopularSearch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularSearch {
    pub query: String,
    pub count: i64,
}

/// Short label for a MIME type as shown in reports
#[inline]
pub fn display_file_type(mime_type: Option<&str>) -> &'static str {
    match mime_type {
        Some("application/pdf") => "PDF",
        Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document") => "Word",
        Some("text/plain") => "Text",
        Some("text/markdown") => "Markdown",
        Some("image/jpeg" | "image/png" | "image/gif") => "Image",
        _ => "Other",
    }
}

#[derive(Clone)]
pub struct Analytics {
    database: Database,
}

impl Analytics {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Activity over the last `days` days, which must be in 1..=365
    #[inline]
    pub async fn usage(&self, owner_id: i64, days: u32) -> Result<UsageReport> {
        if !(1..=MAX_USAGE_DAYS).contains(&days) {
            return Err(RagError::Validation(format!(
                "Days must be between 1 and {}, got {}",
                MAX_USAGE_DAYS, days
            )));
        }

        let pool = self.database.pool();
        let since = Utc::now().naive_utc() - Duration::days(i64::from(days));
        debug!("Building usage report for owner {} since {}", owner_id, since);

        let recent_activities =
            ActivityQueries::recent_since(pool, owner_id, since, RECENT_ACTIVITY_LIMIT)
                .await?
                .into_iter()
                .map(ActivityEntry::from)
                .collect();

        Ok(UsageReport {
            days,
            total_documents: DocumentQueries::count_by_owner(pool, owner_id).await?,
            total_searches: SearchQueryQueries::count_since(pool, owner_id, since).await?,
            total_chat_sessions: ChatSessionQueries::count_since(pool, owner_id, since).await?,
            recent_activities,
        })
    }

    #[inline]
    pub async fn documents(&self, owner_id: i64) -> Result<DocumentReport> {
        let pool = self.database.pool();

        let mut documents_by_type = BTreeMap::new();
        for row in DocumentQueries::count_by_file_type(pool, owner_id).await? {
            *documents_by_type
                .entry(display_file_type(row.file_type.as_deref()).to_string())
                .or_insert(0) += row.count;
        }

        let recent_uploads = DocumentQueries::list_by_owner(pool, owner_id, None, 0, RECENT_UPLOAD_LIMIT)
            .await?
            .into_iter()
            .map(|document| RecentUpload {
                id: document.id,
                file_type: display_file_type(document.file_type.as_deref()).to_string(),
                filename: document.original_filename,
                file_size: document.file_size,
                created_at: document.created_at,
            })
            .collect();

        Ok(DocumentReport {
            total_documents: DocumentQueries::count_by_owner(pool, owner_id).await?,
            documents_by_type,
            recent_uploads,
        })
    }

    #[inline]
    pub async fn search_performance(&self, owner_id: i64) -> Result<SearchPerformance> {
        let pool = self.database.pool();

        let average = SearchQueryQueries::average_results(pool, owner_id)
            .await?
            .unwrap_or_default();

        let popular_searches = SearchQueryQueries::most_frequent(pool, owner_id, POPULAR_SEARCH_LIMIT)
            .await?
            .into_iter()
            .map(|row| PopularSearch {
                query: row.query,
                count: row.count,
            })
            .collect();

        Ok(SearchPerformance {
            average_results_per_search: (average * 100.0).round() / 100.0,
            popular_searches,
        })
    }
}
