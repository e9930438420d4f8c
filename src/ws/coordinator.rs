//! Realtime session coordinator.
//!
//! Turns client events into presence, cursor, session and persistence updates
//! and fans the results out to the document room. Room membership is tracked
//! on the connection so a disconnect can undo every join deterministically.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::{DocId, SharedDocumentStore};
use crate::services::cursors::{CursorData, CursorTracker};
use crate::services::operations::diff;
use crate::services::persistence::PersistenceQueue;
use crate::services::presence::{PresenceRegistry, PresenceUser};
use crate::services::sessions::SessionTracker;
use crate::ws::connctx::ConnCtx;
use crate::ws::events::{
    ChatPayload, ClientEvent, CursorBroadcast, CursorPayload, EditPayload, JoinPayload,
    LoginPayload, PresenceChange, ServerEvent, TypingKind, TypingPayload,
};
use crate::ws::transport::Transport;

pub const ERR_INVALID_PAYLOAD: &str = "invalid_payload";
pub const ERR_DOCUMENT_NOT_FOUND: &str = "document_not_found";
pub const ERR_SNAPSHOT_FAILED: &str = "snapshot_failed";
pub const ERR_CHAT_FAILED: &str = "chat_failed";

pub struct Coordinator {
    transport: Arc<dyn Transport>,
    documents: SharedDocumentStore,
    presence: PresenceRegistry,
    cursors: CursorTracker,
    sessions: SessionTracker,
    persistence: PersistenceQueue,
}

impl Coordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        documents: SharedDocumentStore,
        presence: PresenceRegistry,
        cursors: CursorTracker,
        sessions: SessionTracker,
        persistence: PersistenceQueue,
    ) -> Self {
        Self {
            transport,
            documents,
            presence,
            cursors,
            sessions,
            persistence,
        }
    }

    /// Greet a freshly registered connection with its id.
    pub async fn connect(&self, ctx: &ConnCtx) {
        info!("Connection {} opened", ctx.conn_id);
        self.transport
            .emit_to_connection(ctx.conn_id, &ServerEvent::Connected { id: ctx.key() })
            .await;
    }

    /// Parse and dispatch one text frame.
    pub async fn handle_text(&self, ctx: &mut ConnCtx, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(ctx, event).await,
            Err(e) => {
                warn!("Dropping frame from {}: {}", ctx.conn_id, e);
                self.send_error(ctx, ERR_INVALID_PAYLOAD, e.to_string()).await;
            }
        }
    }

    pub async fn dispatch(&self, ctx: &mut ConnCtx, event: ClientEvent) {
        debug!("{} from {}", event.name(), ctx.conn_id);
        match event {
            ClientEvent::ActiveLogin(payload) => self.on_login(ctx, payload).await,
            ClientEvent::ActiveHeartbeat => self.on_active_heartbeat(ctx).await,
            ClientEvent::DocHeartbeat(payload) => self.on_doc_heartbeat(ctx, payload.doc_id).await,
            ClientEvent::JoinDoc(payload) => self.on_join(ctx, payload).await,
            ClientEvent::LeaveDoc(payload) => self.leave(ctx, payload.doc_id).await,
            ClientEvent::Cursor(payload) => self.on_cursor(ctx, payload).await,
            ClientEvent::Edit(payload) => self.on_edit(ctx, payload).await,
            ClientEvent::ChatMessage(payload) => self.on_chat(ctx, payload).await,
            ClientEvent::EditorTyping(payload) => self.on_typing(ctx, TypingKind::Editor, payload).await,
            ClientEvent::ChatTyping(payload) => self.on_typing(ctx, TypingKind::Chat, payload).await,
        }
    }

    /// Leave every joined room and drop the user's liveness key.
    pub async fn disconnect(&self, ctx: &mut ConnCtx) {
        let rooms: Vec<DocId> = ctx.rooms.iter().copied().collect();
        for doc_id in rooms {
            self.leave(ctx, doc_id).await;
        }
        if let Some(username) = ctx.username.clone() {
            if let Err(e) = self.presence.mark_user_inactive(&username, &ctx.key()).await {
                warn!("Failed to mark {} inactive: {}", username, e);
            }
        }
        info!("Connection {} closed", ctx.conn_id);
    }

    async fn on_login(&self, ctx: &mut ConnCtx, payload: LoginPayload) {
        if payload.username.is_empty() {
            warn!("Ignoring login without username from {}", ctx.conn_id);
            return;
        }
        if let Err(e) = self.presence.mark_user_active(&payload.username, &ctx.key()).await {
            warn!("Failed to mark {} active: {}", payload.username, e);
        }
        ctx.username = Some(payload.username);
        if payload.user_id.is_some() {
            ctx.user_id = payload.user_id;
        }
    }

    async fn on_active_heartbeat(&self, ctx: &ConnCtx) {
        let Some(username) = &ctx.username else {
            return;
        };
        if let Err(e) = self.presence.heartbeat_user(username, &ctx.key()).await {
            warn!("Heartbeat for {} failed: {}", username, e);
        }
    }

    async fn on_doc_heartbeat(&self, ctx: &ConnCtx, doc_id: DocId) {
        let Some(username) = &ctx.username else {
            return;
        };
        if let Err(e) = self.presence.add_presence(doc_id, &ctx.key(), username).await {
            warn!("Presence heartbeat for document {} failed: {}", doc_id, e);
        }
        if ctx.rooms.contains(&doc_id) {
            self.keep_room_alive(doc_id).await;
        }
    }

    /// Re-arm the member counter and session of a room that is still in use.
    async fn keep_room_alive(&self, doc_id: DocId) {
        if let Err(e) = self.presence.touch_room(doc_id).await {
            warn!("Failed to refresh member counter for document {}: {}", doc_id, e);
        }
        if let Err(e) = self.sessions.touch_session(doc_id).await {
            warn!("Failed to refresh session for document {}: {}", doc_id, e);
        }
    }

    async fn on_join(&self, ctx: &mut ConnCtx, payload: JoinPayload) {
        let doc_id = payload.doc_id;
        let snapshot = match self.persistence.get_snapshot(doc_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("Connection {} tried to join missing document {}", ctx.conn_id, doc_id);
                self.send_error(ctx, ERR_DOCUMENT_NOT_FOUND, format!("document {} does not exist", doc_id))
                    .await;
                return;
            }
            Err(e) => {
                error!("Failed to load document {}: {}", doc_id, e);
                self.send_error(ctx, ERR_SNAPSHOT_FAILED, format!("document {} could not be loaded", doc_id))
                    .await;
                return;
            }
        };

        if ctx.username.is_none() {
            ctx.username = Some(payload.username.clone());
        }
        if payload.user_id.is_some() {
            ctx.user_id = payload.user_id;
        }

        self.transport.join_room(ctx.conn_id, doc_id).await;
        if let Err(e) = self.presence.add_presence(doc_id, &ctx.key(), &payload.username).await {
            warn!("Failed to add presence for document {}: {}", doc_id, e);
        }

        if ctx.rooms.insert(doc_id) {
            match self.presence.enter_room(doc_id).await {
                Ok(1) => {
                    if let Err(e) = self
                        .sessions
                        .start_session(doc_id, &snapshot.content, payload.user_id)
                        .await
                    {
                        warn!("Failed to start session for document {}: {}", doc_id, e);
                    }
                }
                Ok(members) => debug!("Document {} now has {} members", doc_id, members),
                Err(e) => warn!("Failed to count member into document {}: {}", doc_id, e),
            }
        }

        let users = self.roster(doc_id).await;
        let cursors = self.cursors.get_cursors(doc_id).await.unwrap_or_else(|e| {
            warn!("Failed to read cursors for document {}: {}", doc_id, e);
            Default::default()
        });

        self.transport
            .emit_to_room(
                doc_id,
                &ServerEvent::PresenceUpdate {
                    change: PresenceChange::Join,
                    users,
                },
                None,
            )
            .await;
        self.transport
            .emit_to_connection(ctx.conn_id, &ServerEvent::CursorsInit(cursors))
            .await;
        self.transport
            .emit_to_connection(
                ctx.conn_id,
                &ServerEvent::DocSnapshot {
                    content: snapshot.content,
                    version: snapshot.version,
                },
            )
            .await;
        info!("Connection {} joined document {}", ctx.conn_id, doc_id);
    }

    /// Shared by `leaveDoc` and disconnect.
    async fn leave(&self, ctx: &mut ConnCtx, doc_id: DocId) {
        let conn_key = ctx.key();
        self.transport.leave_room(ctx.conn_id, doc_id).await;
        if let Err(e) = self.presence.remove_presence(doc_id, &conn_key).await {
            warn!("Failed to remove presence from document {}: {}", doc_id, e);
        }
        if let Err(e) = self.cursors.remove_cursor(doc_id, &conn_key).await {
            warn!("Failed to remove cursor from document {}: {}", doc_id, e);
        }

        if ctx.rooms.remove(&doc_id) {
            match self.presence.exit_room(doc_id).await {
                Ok(0) => self.close_session(doc_id).await,
                Ok(members) => debug!("Document {} now has {} members", doc_id, members),
                Err(e) => warn!("Failed to count member out of document {}: {}", doc_id, e),
            }
        }

        let users = self.roster(doc_id).await;
        self.transport
            .emit_to_room(
                doc_id,
                &ServerEvent::PresenceUpdate {
                    change: PresenceChange::Leave,
                    users,
                },
                None,
            )
            .await;
        self.transport
            .emit_to_room(doc_id, &ServerEvent::CursorRemove { user_id: conn_key }, None)
            .await;
        info!("Connection {} left document {}", ctx.conn_id, doc_id);
    }

    async fn close_session(&self, doc_id: DocId) {
        self.persistence.flush(doc_id).await;
        match self.sessions.end_session(doc_id).await {
            Ok(Some(version)) => info!("Document {} saved as version {}", doc_id, version.version),
            Ok(None) => {}
            Err(e) => error!("Failed to close session for document {}: {}", doc_id, e),
        }
    }

    async fn on_cursor(&self, ctx: &ConnCtx, payload: CursorPayload) {
        let Some(username) = ctx.username.clone() else {
            debug!("Ignoring cursor from anonymous connection {}", ctx.conn_id);
            return;
        };
        let doc_id = payload.doc_id;
        let cursor = CursorData {
            username: username.clone(),
            is_typing: payload.is_typing,
            position: payload.position,
        };
        if let Err(e) = self.cursors.set_cursor(doc_id, &ctx.key(), &cursor).await {
            warn!("Failed to store cursor for document {}: {}", doc_id, e);
        }
        self.transport
            .emit_to_room(
                doc_id,
                &ServerEvent::Cursor(CursorBroadcast {
                    user_id: ctx.key(),
                    username,
                    is_typing: cursor.is_typing,
                    position: cursor.position,
                }),
                Some(ctx.conn_id),
            )
            .await;
    }

    async fn on_edit(&self, ctx: &ConnCtx, payload: EditPayload) {
        let EditPayload {
            doc_id,
            content,
            version,
        } = payload;

        let previous = self
            .sessions
            .update_session(doc_id, &content)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to update session for document {}: {}", doc_id, e);
                None
            });
        let ops = previous
            .map(|session| diff(&session.current_content, &content))
            .unwrap_or_default();
        if let Err(e) = self.presence.touch_room(doc_id).await {
            warn!("Failed to refresh member counter for document {}: {}", doc_id, e);
        }

        self.transport
            .emit_to_room(
                doc_id,
                &ServerEvent::Edit {
                    user_id: ctx.key(),
                    content: content.clone(),
                    version,
                    ops,
                },
                Some(ctx.conn_id),
            )
            .await;
        self.persistence.queue_update(doc_id, content, version).await;
    }

    async fn on_chat(&self, ctx: &ConnCtx, payload: ChatPayload) {
        let ChatPayload {
            doc_id,
            message,
            user,
        } = payload;
        let chat = match self
            .documents
            .append_chat_message(doc_id, user.id, &message)
            .await
        {
            Ok(chat) => chat,
            Err(e) => {
                error!("Failed to store chat message for document {}: {}", doc_id, e);
                self.send_error(ctx, ERR_CHAT_FAILED, "message could not be saved").await;
                return;
            }
        };
        self.transport
            .emit_to_room(
                doc_id,
                &ServerEvent::ChatMessage {
                    message,
                    user,
                    created_at: chat.created_at,
                },
                None,
            )
            .await;
    }

    async fn on_typing(&self, ctx: &ConnCtx, kind: TypingKind, payload: TypingPayload) {
        self.transport
            .emit_to_room(
                payload.doc_id,
                &ServerEvent::Typing {
                    kind,
                    username: payload.username,
                },
                Some(ctx.conn_id),
            )
            .await;
    }

    async fn roster(&self, doc_id: DocId) -> Vec<PresenceUser> {
        self.presence.list_presence(doc_id).await.unwrap_or_else(|e| {
            warn!("Failed to list presence for document {}: {}", doc_id, e);
            Vec::new()
        })
    }

    async fn send_error(&self, ctx: &ConnCtx, code: &str, message: impl Into<String>) {
        self.transport
            .emit_to_connection(ctx.conn_id, &ServerEvent::error(code, message))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStore, MemoryDocumentStore};
    use crate::kv::{keys, KvStore, MemoryKvStore};
    use crate::services::cache::DocCache;
    use crate::services::persistence::PersistenceSettings;
    use crate::services::presence::PresenceTtls;
    use crate::services::versions::VersionService;
    use crate::ws::transport::LocalHub;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    struct Harness {
        coordinator: Coordinator,
        hub: Arc<LocalHub>,
        docs: Arc<MemoryDocumentStore>,
        kv: Arc<MemoryKvStore>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_ttls(PresenceTtls::default()).await
        }

        async fn with_ttls(ttls: PresenceTtls) -> Self {
            let hub = Arc::new(LocalHub::new());
            let docs = Arc::new(MemoryDocumentStore::new());
            let kv = Arc::new(MemoryKvStore::new(10_000));
            let cache = DocCache::new(kv.clone(), Duration::from_secs(30));
            let coordinator = Coordinator::new(
                hub.clone(),
                docs.clone(),
                PresenceRegistry::new(kv.clone(), ttls),
                CursorTracker::new(kv.clone(), Duration::from_secs(30)),
                SessionTracker::new(kv.clone(), VersionService::new(docs.clone()), Duration::from_secs(300)),
                PersistenceQueue::new(docs.clone(), cache, PersistenceSettings::default()),
            );
            Self {
                coordinator,
                hub,
                docs,
                kv,
            }
        }

        async fn connect(&self) -> (ConnCtx, UnboundedReceiver<String>) {
            let ctx = ConnCtx::new(Uuid::new_v4());
            let rx = self.hub.register(ctx.conn_id).await;
            self.coordinator.connect(&ctx).await;
            (ctx, rx)
        }

        async fn send(&self, ctx: &mut ConnCtx, frame: Value) {
            self.coordinator.handle_text(ctx, &frame.to_string()).await;
        }
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    fn events(frames: &[Value]) -> Vec<&str> {
        frames.iter().map(|f| f["event"].as_str().unwrap()).collect()
    }

    fn join(doc_id: i64, username: &str, user_id: i64) -> Value {
        json!({"event": "joinDoc", "data": {"docId": doc_id, "username": username, "userId": user_id}})
    }

    fn edit(doc_id: i64, content: &str, version: i64) -> Value {
        json!({"event": "edit", "data": {"docId": doc_id, "content": content, "version": version}})
    }

    fn leave(doc_id: i64) -> Value {
        json!({"event": "leaveDoc", "data": {"docId": doc_id}})
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_edit_leave_creates_one_version() {
        let h = Harness::new().await;
        h.docs.seed_document(42, "Greeting", "Hello").await;

        let (mut alice, mut alice_rx) = h.connect().await;
        h.send(&mut alice, join(42, "alice", 1)).await;
        let frames = drain(&mut alice_rx);
        assert_eq!(events(&frames), vec!["connected", "presence:update", "cursors:init", "doc:snapshot"]);
        assert_eq!(frames[0]["data"]["id"], json!(alice.key()));
        assert_eq!(frames[3]["data"], json!({"content": "Hello", "version": 0}));

        let session = h.coordinator.sessions.get_session(42).await.unwrap().unwrap();
        assert_eq!(session.original_content, "Hello");
        assert_eq!(session.created_by, Some(1));

        h.send(&mut alice, json!({"event": "edit", "data": {"docId": 42, "content": "Hello world", "version": 1}}))
            .await;
        let session = h.coordinator.sessions.get_session(42).await.unwrap().unwrap();
        assert!(session.has_edits);
        assert_eq!(session.current_content, "Hello world");

        h.send(&mut alice, json!({"event": "leaveDoc", "data": {"docId": 42}})).await;

        let versions = h.docs.list_versions(42).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "Hello world");
        assert_eq!(versions[0].version, 2);
        assert_eq!(h.docs.get_current_version(42).await.unwrap(), Some(2));
        assert_eq!(h.docs.get_document(42).await.unwrap().unwrap().content, "Hello world");
        assert!(h.coordinator.sessions.get_session(42).await.unwrap().is_none());
        assert!(alice.rooms.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_reaches_peers_but_not_sender() {
        let h = Harness::new().await;
        h.docs.seed_document(7, "Shared", "abc").await;
        let (mut alice, mut alice_rx) = h.connect().await;
        let (mut bob, mut bob_rx) = h.connect().await;
        h.send(&mut alice, join(7, "alice", 1)).await;
        h.send(&mut bob, join(7, "bob", 2)).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        h.send(&mut alice, json!({"event": "edit", "data": {"docId": 7, "content": "abXc", "version": 1}})).await;

        assert!(drain(&mut alice_rx).is_empty());
        let frames = drain(&mut bob_rx);
        assert_eq!(
            frames,
            vec![json!({"event": "edit", "data": {
                "userId": alice.key(),
                "content": "abXc",
                "version": 1,
                "ops": [{"type": "retain", "length": 2}, {"type": "insert", "content": "X"}]
            }})]
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.docs.get_document(7).await.unwrap().unwrap().content, "abXc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_member_sees_join_and_session_survives_first_leave() {
        let h = Harness::new().await;
        h.docs.seed_document(3, "Doc", "x").await;
        let (mut alice, mut alice_rx) = h.connect().await;
        let (mut bob, mut bob_rx) = h.connect().await;
        h.send(&mut alice, join(3, "alice", 1)).await;
        h.send(&mut bob, join(3, "bob", 2)).await;

        let alice_frames = drain(&mut alice_rx);
        let update = alice_frames.last().unwrap();
        assert_eq!(update["event"], json!("presence:update"));
        assert_eq!(update["data"]["type"], json!("join"));
        assert_eq!(update["data"]["users"].as_array().unwrap().len(), 2);
        drain(&mut bob_rx);

        h.send(&mut bob, json!({"event": "leaveDoc", "data": {"docId": 3}})).await;
        assert!(h.coordinator.sessions.get_session(3).await.unwrap().is_some());
        let frames = drain(&mut alice_rx);
        assert_eq!(events(&frames), vec!["presence:update", "cursor:remove"]);
        assert_eq!(frames[1]["data"], json!({"userId": bob.key()}));

        // Rejoining the same room twice does not double-count the member.
        h.send(&mut alice, join(3, "alice", 1)).await;
        assert_eq!(h.kv.get(&keys::members(3)).await.unwrap(), Some("1".to_string()));
        h.send(&mut alice, json!({"event": "leaveDoc", "data": {"docId": 3}})).await;
        assert!(h.coordinator.sessions.get_session(3).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cleans_up_every_room() {
        let h = Harness::new().await;
        h.docs.seed_document(1, "One", "1").await;
        h.docs.seed_document(2, "Two", "2").await;
        let (mut alice, _alice_rx) = h.connect().await;
        let (mut bob, mut bob_rx) = h.connect().await;
        h.send(&mut alice, json!({"event": "active:login", "data": {"username": "alice", "userId": 1}})).await;
        h.send(&mut alice, join(1, "alice", 1)).await;
        h.send(&mut alice, join(2, "alice", 1)).await;
        h.send(&mut bob, join(1, "bob", 2)).await;
        h.send(&mut alice, json!({"event": "cursor", "data": {"docId": 1, "isTyping": true, "x": 5, "y": 9}})).await;
        drain(&mut bob_rx);

        h.coordinator.disconnect(&mut alice).await;

        let presence = h.coordinator.presence.list_presence(1).await.unwrap();
        assert_eq!(presence, vec![PresenceUser { id: bob.key(), username: "bob".into() }]);
        assert!(h.coordinator.presence.list_presence(2).await.unwrap().is_empty());
        assert!(h.coordinator.cursors.get_cursors(1).await.unwrap().is_empty());
        assert!(h.coordinator.sessions.get_session(2).await.unwrap().is_none());
        assert!(h.coordinator.sessions.get_session(1).await.unwrap().is_some());
        assert!(h.coordinator.presence.list_active_users().await.unwrap().is_empty());

        let frames = drain(&mut bob_rx);
        assert_eq!(events(&frames), vec!["presence:update", "cursor:remove"]);
        h.hub.unregister(alice.conn_id).await;
        assert_eq!(h.hub.room_members(2).await.len(), 0);
    }

    #[tokio::test]
    async fn test_missing_document_is_reported_privately() {
        let h = Harness::new().await;
        let (mut alice, mut alice_rx) = h.connect().await;
        drain(&mut alice_rx);

        h.send(&mut alice, join(999, "alice", 1)).await;

        let frames = drain(&mut alice_rx);
        assert_eq!(events(&frames), vec!["error"]);
        assert_eq!(frames[0]["data"]["code"], json!(ERR_DOCUMENT_NOT_FOUND));
        assert!(alice.rooms.is_empty());
        assert!(h.coordinator.presence.list_presence(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_reply() {
        let h = Harness::new().await;
        let (mut alice, mut alice_rx) = h.connect().await;
        drain(&mut alice_rx);

        h.coordinator.handle_text(&mut alice, "{\"event\":\"edit\",\"data\":{}}").await;
        h.coordinator.handle_text(&mut alice, "garbage").await;

        let frames = drain(&mut alice_rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["data"]["code"] == json!(ERR_INVALID_PAYLOAD)));
    }

    #[tokio::test]
    async fn test_cursor_requires_identity_and_skips_sender() {
        let h = Harness::new().await;
        h.docs.seed_document(5, "Doc", "").await;
        let (mut anon, _anon_rx) = h.connect().await;
        h.send(&mut anon, json!({"event": "cursor", "data": {"docId": 5, "x": 1}})).await;
        assert!(h.coordinator.cursors.get_cursors(5).await.unwrap().is_empty());

        let (mut alice, mut alice_rx) = h.connect().await;
        let (mut bob, mut bob_rx) = h.connect().await;
        h.send(&mut alice, join(5, "alice", 1)).await;
        h.send(&mut bob, join(5, "bob", 2)).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        h.send(&mut alice, json!({"event": "cursor", "data": {"docId": 5, "isTyping": false, "index": 12}})).await;
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(
            drain(&mut bob_rx),
            vec![json!({"event": "cursor", "data": {
                "userId": alice.key(), "username": "alice", "isTyping": false, "index": 12
            }})]
        );
    }

    #[tokio::test]
    async fn test_chat_is_stored_and_broadcast_to_whole_room() {
        let h = Harness::new().await;
        h.docs.seed_document(8, "Doc", "").await;
        let (mut alice, mut alice_rx) = h.connect().await;
        h.send(&mut alice, join(8, "alice", 1)).await;
        drain(&mut alice_rx);

        h.send(
            &mut alice,
            json!({"event": "chat:message", "data": {"docId": 8, "message": "hi", "user": {"id": 1, "username": "alice"}}}),
        )
        .await;
        let frames = drain(&mut alice_rx);
        assert_eq!(events(&frames), vec!["chat:message"]);
        assert_eq!(frames[0]["data"]["message"], json!("hi"));
        assert!(frames[0]["data"]["createdAt"].is_string());
        assert_eq!(h.docs.chat_messages(8).await.len(), 1);

        h.send(
            &mut alice,
            json!({"event": "chat:message", "data": {"docId": 404, "message": "lost", "user": {"id": 1, "username": "alice"}}}),
        )
        .await;
        let frames = drain(&mut alice_rx);
        assert_eq!(frames[0]["data"]["code"], json!(ERR_CHAT_FAILED));
    }

    #[tokio::test]
    async fn test_typing_goes_to_others_only() {
        let h = Harness::new().await;
        h.docs.seed_document(9, "Doc", "").await;
        let (mut alice, mut alice_rx) = h.connect().await;
        let (mut bob, mut bob_rx) = h.connect().await;
        h.send(&mut alice, join(9, "alice", 1)).await;
        h.send(&mut bob, join(9, "bob", 2)).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        h.send(&mut bob, json!({"event": "chat:typing", "data": {"docId": 9, "username": "bob"}})).await;
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(
            drain(&mut alice_rx),
            vec![json!({"event": "typing", "data": {"kind": "chat", "username": "bob"}})]
        );
    }

    #[tokio::test]
    async fn test_late_joiner_does_not_restart_session_after_counter_lapses() {
        let h = Harness::with_ttls(PresenceTtls {
            room_counter: Duration::from_millis(50),
            ..PresenceTtls::default()
        })
        .await;
        h.docs.seed_document(1, "Doc", "base").await;
        let (mut alice, _alice_rx) = h.connect().await;
        h.send(&mut alice, join(1, "alice", 1)).await;
        h.send(&mut alice, edit(1, "base+A", 1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.kv.get(&keys::members(1)).await.unwrap(), None);

        let (mut bob, _bob_rx) = h.connect().await;
        h.send(&mut bob, join(1, "bob", 2)).await;
        let session = h.coordinator.sessions.get_session(1).await.unwrap().unwrap();
        assert!(session.has_edits);
        assert_eq!(session.original_content, "base");
        assert_eq!(h.kv.get(&keys::members(1)).await.unwrap(), Some("2".to_string()));

        h.send(&mut bob, leave(1)).await;
        assert!(h.coordinator.sessions.get_session(1).await.unwrap().is_some());
        assert!(h.docs.list_versions(1).await.unwrap().is_empty());

        h.send(&mut alice, edit(1, "base+AB", 2)).await;
        h.send(&mut alice, leave(1)).await;
        let versions = h.docs.list_versions(1).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content, "base+AB");
    }

    #[tokio::test]
    async fn test_edits_keep_member_counter_alive() {
        let h = Harness::with_ttls(PresenceTtls {
            room_counter: Duration::from_millis(100),
            ..PresenceTtls::default()
        })
        .await;
        h.docs.seed_document(2, "Doc", "").await;
        let (mut alice, _alice_rx) = h.connect().await;
        h.send(&mut alice, join(2, "alice", 1)).await;

        for i in 1..=4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            h.send(&mut alice, edit(2, &"a".repeat(i), i as i64)).await;
        }
        assert_eq!(h.kv.get(&keys::members(2)).await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_doc_heartbeat_keeps_roster_and_counter_alive() {
        let h = Harness::with_ttls(PresenceTtls {
            roster: Duration::from_millis(100),
            room_counter: Duration::from_millis(100),
            ..PresenceTtls::default()
        })
        .await;
        h.docs.seed_document(3, "Doc", "").await;
        let (mut alice, _alice_rx) = h.connect().await;
        h.send(&mut alice, join(3, "alice", 1)).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            h.send(&mut alice, json!({"event": "doc:heartbeat", "data": {"docId": 3}})).await;
        }
        assert_eq!(
            h.coordinator.presence.list_presence(3).await.unwrap(),
            vec![PresenceUser { id: alice.key(), username: "alice".into() }]
        );
        assert_eq!(h.kv.get(&keys::members(3)).await.unwrap(), Some("1".to_string()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(h.coordinator.presence.list_presence(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_heartbeat_keeps_user_online() {
        let h = Harness::with_ttls(PresenceTtls {
            active_user: Duration::from_millis(100),
            ..PresenceTtls::default()
        })
        .await;
        let (mut alice, _alice_rx) = h.connect().await;
        h.send(&mut alice, json!({"event": "active:login", "data": {"username": "alice", "userId": 1}})).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            h.send(&mut alice, json!({"event": "active:heartbeat"})).await;
        }
        assert_eq!(h.coordinator.presence.list_active_users().await.unwrap(), vec!["alice"]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(h.coordinator.presence.list_active_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_from_anonymous_connection_are_ignored() {
        let h = Harness::new().await;
        h.docs.seed_document(4, "Doc", "").await;
        let (mut anon, mut anon_rx) = h.connect().await;
        drain(&mut anon_rx);

        h.send(&mut anon, json!({"event": "active:heartbeat"})).await;
        h.send(&mut anon, json!({"event": "doc:heartbeat", "data": {"docId": 4}})).await;

        assert!(drain(&mut anon_rx).is_empty());
        assert!(h.coordinator.presence.list_active_users().await.unwrap().is_empty());
        assert!(h.coordinator.presence.list_presence(4).await.unwrap().is_empty());
    }
}
