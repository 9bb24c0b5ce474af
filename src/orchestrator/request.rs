//! Inbound orchestration request shape.

use serde::{Deserialize, Serialize};

use crate::sqlvalidate::ValidationLevel;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    50
}

impl Default for PaginationRequest {
    fn default() -> Self {
        Self { page: default_page(), page_size: default_page_size() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub question: String,
    pub connection_id: String,
    pub user_id: String,
    #[serde(default)]
    pub pagination: Option<PaginationRequest>,
    #[serde(default = "default_true")]
    pub enable_analytics: bool,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_true")]
    pub enable_rls: bool,
    #[serde(default)]
    pub conversation: Vec<String>,
    #[serde(default = "default_validation_level")]
    pub validation_level: ValidationLevel,
}

fn default_validation_level() -> ValidationLevel {
    ValidationLevel::Moderate
}
