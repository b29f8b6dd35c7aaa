use serde::Deserialize;
use validator::Validate;

use crate::models::dispute::{DisputeOutcome, DisputeParty};
use crate::services::disputes::OpenDispute;

#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeRequest {
    pub opened_by: DisputeParty,
    #[validate(length(min = 2, max = 100, message = "Issue type must be 2-100 characters"))]
    pub issue_type: String,
    #[validate(length(min = 10, max = 2000, message = "Description must be 10-2000 characters"))]
    pub description: String,
}

impl From<OpenDisputeRequest> for OpenDispute {
    fn from(req: OpenDisputeRequest) -> Self {
        OpenDispute {
            opened_by: req.opened_by,
            issue_type: req.issue_type,
            description: req.description,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}
