use std::collections::BTreeSet;

use crate::db::{DocId, UserId};
use crate::ws::ConnId;

/// State the coordinator keeps for one WebSocket connection.
#[derive(Clone, Debug)]
pub struct ConnCtx {
    pub conn_id: ConnId,
    pub username: Option<String>,
    pub user_id: Option<UserId>,
    /// Rooms this connection joined and has not left yet
    pub rooms: BTreeSet<DocId>,
}

impl ConnCtx {
    pub fn new(conn_id: ConnId) -> Self {
        Self {
            conn_id,
            username: None,
            user_id: None,
            rooms: BTreeSet::new(),
        }
    }

    /// Connection id as used in store keys and on the wire
    pub fn key(&self) -> String {
        self.conn_id.to_string()
    }
}
