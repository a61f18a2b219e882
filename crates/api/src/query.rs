//! Query parameter types for API handlers.

use serde::Deserialize;

/// `GET /api/v1/jobs?status=&limit=&offset=`.
///
/// `status` is kept as a string so an unknown value can be reported as a
/// validation error rather than a generic extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
