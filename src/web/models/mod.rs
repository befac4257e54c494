use serde::{Deserialize, Serialize};

use crate::db::store::PageRequest;

pub mod alert_models;
pub mod dashboard_models;
pub mod tracked_api_models;

/// Identity injected by the upstream gateway, passed as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub size: Option<u64>,
}

impl PageQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.size)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u64,
    pub page: u64,
    pub size: u64,
}

impl<T> PageResponse<T> {
    pub fn new(content: Vec<T>, total_elements: u64, request: PageRequest) -> Self {
        Self {
            content,
            total_elements,
            total_pages: total_elements.div_ceil(request.size.max(1)),
            page: request.page,
            size: request.size,
        }
    }
}
