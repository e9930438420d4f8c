use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

/// Users with at least one live connection
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ActiveUsersResponse {
    pub users: Vec<String>,
    pub count: usize,
}

/// Query for presence counts, e.g. `?ids=1,2,3`
#[derive(Deserialize, IntoParams)]
pub struct PresenceCountsQuery {
    /// Comma separated document ids
    pub ids: String,
}

/// Connections present per document id
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PresenceCountsResponse {
    pub counts: BTreeMap<String, usize>,
}
