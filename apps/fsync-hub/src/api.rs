// api.rs — The administrative REST surface.
//
// Auth is one shared bearer value in the X-GoHook-Key header, checked by
// middleware; an empty configured key disables the check (local dev).
// Bodies are serde camelCase JSON throughout.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use fsync_git::{DeployRef, GitSync};
use fsync_journal::{TaskFilter, TaskStatus};
use fsync_manifest::ProjectSyncConfig;
use fsync_queue::ChangeKind;
use fsync_registry::{ConnectionStatus, NodeKind, RegistryError};

use crate::state::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/sync/nodes", get(list_nodes).post(create_node))
        .route("/api/sync/nodes/{id}", put(update_node).delete(delete_node))
        .route("/api/sync/nodes/{id}/rotate-token", post(rotate_token))
        .route("/api/sync/nodes/{id}/reset-pairing", post(reset_pairing))
        .route("/api/sync/projects", get(list_projects))
        .route("/api/sync/projects/{name}/config", put(update_project_config))
        .route("/api/sync/projects/{name}/run", post(run_project))
        .route("/api/sync/tasks", get(list_tasks).delete(prune_tasks))
        .route("/api/sync/tasks/{id}", get(get_task))
        .route("/api/webhook/{project}", post(webhook_deploy))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(api)
        .route("/ws", get(ws::upgrade))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !state.auth_key.is_empty() {
        let presented = request
            .headers()
            .get("X-GoHook-Key")
            .and_then(|v| v.to_str().ok());
        if presented != Some(state.auth_key.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(request).await
}

/// Error shape every handler returns.
#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiError { error: message.into() })).into_response()
}

fn registry_error(e: RegistryError) -> Response {
    match e {
        RegistryError::NotFound(id) => error(StatusCode::NOT_FOUND, format!("node {id} not found")),
        RegistryError::NameTaken(name) => {
            error(StatusCode::CONFLICT, format!("node name {name} taken"))
        }
        other => error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ── Nodes ─────────────────────────────────────────────────────────

async fn list_nodes(State(state): State<AppState>) -> Response {
    match state.nodes.list() {
        Ok(nodes) => {
            let redacted: Vec<_> = nodes.into_iter().map(|n| n.redacted()).collect();
            Json(redacted).into_response()
        }
        Err(e) => registry_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNodeBody {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default = "default_kind")]
    kind: NodeKind,
}

fn default_kind() -> NodeKind {
    NodeKind::Agent
}

async fn create_node(
    State(state): State<AppState>,
    Json(body): Json<CreateNodeBody>,
) -> Response {
    if body.name.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "node name must not be empty");
    }
    match state.nodes.create(body.name.trim(), &body.address, body.kind) {
        // The one response that carries the pairing token.
        Ok(node) => (StatusCode::CREATED, Json(node)).into_response(),
        Err(e) => registry_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateNodeBody {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default = "default_kind")]
    kind: NodeKind,
}

async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNodeBody>,
) -> Response {
    if body.name.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "node name must not be empty");
    }
    match state.nodes.update(&id, body.name.trim(), &body.address, body.kind) {
        Ok(node) => Json(node.redacted()).into_response(),
        Err(e) => registry_error(e),
    }
}

async fn delete_node(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.nodes.delete(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error(StatusCode::NOT_FOUND, format!("node {id} not found")),
        Err(e) => registry_error(e),
    }
}

async fn rotate_token(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.nodes.rotate_token(&id) {
        // Reveals the fresh token, once.
        Ok(node) => Json(node).into_response(),
        Err(e) => registry_error(e),
    }
}

async fn reset_pairing(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.nodes.reset_pairing(&id) {
        Ok(node) => Json(node.redacted()).into_response(),
        Err(e) => registry_error(e),
    }
}

// ── Projects ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSummary {
    name: String,
    path: String,
    enabled: bool,
    status: ProjectStatus,
    nodes: Vec<NodeRollup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ProjectStatus {
    Misconfigured,
    Syncing,
    Degraded,
    Healthy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRollup {
    node_id: String,
    target_path: String,
    strategy: fsync_manifest::SyncStrategy,
    connection_status: ConnectionStatus,
}

async fn list_projects(State(state): State<AppState>) -> Response {
    // Live sessions are authoritative over the persisted status.
    let live = state.transport.connected_nodes();
    let mut summaries = Vec::new();
    for config in state.configs.all() {
        let mut rollups = Vec::new();
        let mut any_offline = false;
        for binding in &config.nodes {
            let status = if live.contains(&binding.node_id) {
                ConnectionStatus::Connected
            } else {
                state
                    .nodes
                    .get(&binding.node_id)
                    .ok()
                    .flatten()
                    .map(|n| n.connection_status)
                    .unwrap_or(ConnectionStatus::Unknown)
            };
            if status != ConnectionStatus::Connected {
                any_offline = true;
            }
            rollups.push(NodeRollup {
                node_id: binding.node_id.clone(),
                target_path: binding.target_path.clone(),
                strategy: binding.strategy,
                connection_status: status,
            });
        }

        let status = if rollups.is_empty() {
            ProjectStatus::Misconfigured
        } else if state.journal.any_running(&config.name).unwrap_or(false) {
            ProjectStatus::Syncing
        } else if any_offline
            || state.journal.recent_failure(&config.name).unwrap_or(false)
            || state.queue.is_degraded(&config.name).unwrap_or(false)
        {
            ProjectStatus::Degraded
        } else {
            ProjectStatus::Healthy
        };

        summaries.push(ProjectSummary {
            name: config.name.clone(),
            path: config.path.clone(),
            enabled: config.enabled,
            status,
            nodes: rollups,
        });
    }
    Json(summaries).into_response()
}

async fn update_project_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ProjectSyncConfig>,
) -> Response {
    if body.name != name {
        return error(
            StatusCode::BAD_REQUEST,
            "config name does not match the path parameter",
        );
    }
    if state.configs.get(&name).is_none() {
        return error(StatusCode::NOT_FOUND, format!("project {name} not found"));
    }
    for binding in &body.nodes {
        if !binding.target_path_valid() {
            return error(
                StatusCode::BAD_REQUEST,
                format!("invalid target path for node {}", binding.node_id),
            );
        }
    }

    if let Err(e) = state.project_store.save(&body) {
        return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    state.configs.upsert(body.clone());
    state.watchers.reconcile(&body).await;
    state
        .events
        .publish(fsync_events::EventKind::ProjectManaged, serde_json::json!({ "name": name }));
    StatusCode::NO_CONTENT.into_response()
}

async fn run_project(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.configs.get(&name).is_none() {
        return error(StatusCode::NOT_FOUND, format!("project {name} not found"));
    }
    match state.queue.enqueue(&name, None, ChangeKind::FullRescan) {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Tasks ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskQuery {
    project_name: Option<String>,
    node_id: Option<String>,
    status: Option<String>,
    limit: Option<u32>,
    before_id: Option<i64>,
    #[serde(default)]
    include_logs: bool,
    #[serde(default)]
    include_active: bool,
}

impl TaskQuery {
    fn filter(&self) -> Result<TaskFilter, Response> {
        let status = match &self.status {
            None => None,
            Some(raw) => Some(raw.parse::<TaskStatus>().map_err(|_| {
                error(StatusCode::BAD_REQUEST, format!("unknown status `{raw}`"))
            })?),
        };
        Ok(TaskFilter {
            project: self.project_name.clone(),
            node_id: self.node_id.clone(),
            status,
            before_id: self.before_id,
            limit: self.limit,
        })
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Response {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };
    match state.journal.list(&filter, query.include_logs) {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskGetQuery {
    #[serde(default)]
    include_logs: bool,
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TaskGetQuery>,
) -> Response {
    match state.journal.get(id, query.include_logs) {
        Ok(Some(task)) => Json(task).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("task {id} not found")),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct PruneResult {
    deleted: usize,
}

async fn prune_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Response {
    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(response) => return response,
    };
    match state.journal.prune(&filter, query.include_active) {
        Ok(deleted) => Json(PruneResult { deleted }).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Webhook deploy ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody {
    /// Branch name, `refs/...` path, tag, or commit SHA.
    #[serde(default, rename = "ref")]
    reference: Option<String>,
    #[serde(default)]
    force: Option<bool>,
}

async fn webhook_deploy(
    State(state): State<AppState>,
    Path(project): Path<String>,
    body: Option<Json<WebhookBody>>,
) -> Response {
    let Some(config) = state.configs.get(&project) else {
        return error(StatusCode::NOT_FOUND, format!("project {project} not found"));
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let hook = state.hooks.get(&project);

    let force = body.force.or(hook.map(|h| h.force)).unwrap_or(false);
    let reference = body
        .reference
        .or_else(|| hook.and_then(|h| h.default_ref.clone()));

    state.events.publish(
        fsync_events::EventKind::HookTriggered,
        serde_json::json!({ "project": project, "force": force }),
    );

    // Git work happens off the runtime; the project may not be a repo at
    // all, in which case the webhook just re-syncs.
    if let Some(raw_ref) = reference {
        let path = config.path.clone();
        let deploy = DeployRef::parse(&raw_ref);
        let result = tokio::task::spawn_blocking(move || {
            let git = GitSync::new(&path)?;
            git.force_sync(&deploy, force)
        })
        .await
        .expect("git task panicked");

        match result {
            Ok(outcome) => {
                state.events.publish(
                    fsync_events::EventKind::VersionSwitched,
                    serde_json::json!({
                        "project": project,
                        "ref": outcome.reference,
                        "forced": outcome.forced,
                    }),
                );
            }
            Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    // Re-converge every bound node. A failed enqueue is a 500: the caller
    // must know the change was not recorded.
    match state.queue.enqueue(&project, None, ChangeKind::FullRescan) {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    use fsync_events::EventBus;
    use fsync_journal::TaskJournal;
    use fsync_registry::NodeStore;
    use fsync_sched::ProjectConfigs;
    use fsync_store::Db;
    use fsync_transport::{HubTransport, SessionDeps};

    use crate::config::ProjectConfigStore;
    use crate::state::WatcherManager;

    pub(super) fn test_state(auth_key: &str) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open_in_memory().unwrap();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        // Keep the receiver alive so notifications do not error out.
        std::mem::forget(notify_rx);
        let (online_tx, online_rx) = mpsc::unbounded_channel();
        std::mem::forget(online_rx);

        let nodes = NodeStore::new(db.clone());
        let events = EventBus::new(16);
        let queue = fsync_queue::ChangeQueue::new(db.clone(), notify_tx, 100);
        let transport = HubTransport::new(SessionDeps {
            nodes: nodes.clone(),
            events: events.clone(),
            node_online_tx: online_tx,
        });

        let state = AppState {
            nodes,
            configs: ProjectConfigs::new(),
            queue: queue.clone(),
            journal: TaskJournal::new(db),
            events,
            transport,
            hooks: Arc::new(Default::default()),
            auth_key: Arc::new(auth_key.to_string()),
            project_store: Arc::new(ProjectConfigStore::new(dir.path()).unwrap()),
            watchers: Arc::new(WatcherManager::new(queue, CancellationToken::new())),
        };
        (state, dir)
    }

    pub(super) async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    pub(super) fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub(super) fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn auth_is_enforced_when_configured() {
        let (state, _dir) = test_state("secret");
        let app = router(state);

        let denied = app.clone().oneshot(get("/api/sync/nodes")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/api/sync/nodes")
                    .header("X-GoHook-Key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn node_lifecycle_over_rest() {
        let (state, _dir) = test_state("");
        let app = router(state);

        // Create reveals the one-time token.
        let created = app
            .clone()
            .oneshot(post_json(
                "/api/sync/nodes",
                serde_json::json!({"name": "edge-1", "address": "10.0.0.5:9443"}),
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let node = body_json(created).await;
        let id = node["id"].as_str().unwrap().to_string();
        let token = node["agentToken"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);
        assert_eq!(node["connectionStatus"], "UNPAIRED");

        // Listing never leaks the token.
        let listed = body_json(app.clone().oneshot(get("/api/sync/nodes")).await.unwrap()).await;
        assert!(listed[0].get("agentToken").is_none());

        // Duplicate name conflicts.
        let dup = app
            .clone()
            .oneshot(post_json(
                "/api/sync/nodes",
                serde_json::json!({"name": "edge-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        // Rotate returns a fresh token.
        let rotated = body_json(
            app.clone()
                .oneshot(post_json(
                    &format!("/api/sync/nodes/{id}/rotate-token"),
                    serde_json::json!({}),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_ne!(rotated["agentToken"].as_str().unwrap(), token);

        // Delete, then 404.
        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sync/nodes/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        let gone = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sync/nodes/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_node_name_is_a_bad_request() {
        let (state, _dir) = test_state("");
        let app = router(state);
        let response = app
            .oneshot(post_json(
                "/api/sync/nodes",
                serde_json::json!({"name": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn manual_run_enqueues_a_full_rescan() {
        let (state, _dir) = test_state("");
        let mut config = ProjectSyncConfig::new("web", "/srv/web");
        config.watch_enabled = false;
        state.configs.upsert(config);
        let queue = state.queue.clone();
        let app = router(state);

        let missing = app
            .clone()
            .oneshot(post_json(
                "/api/sync/projects/nope/run",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let accepted = app
            .oneshot(post_json(
                "/api/sync/projects/web/run",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        assert_eq!(queue.depth("web").unwrap(), 1);
    }

    #[tokio::test]
    async fn project_summary_status_rollup() {
        let (state, _dir) = test_state("");
        let mut bare = ProjectSyncConfig::new("bare", "/srv/bare");
        bare.watch_enabled = false;
        state.configs.upsert(bare);
        let app = router(state);

        let projects = body_json(app.oneshot(get("/api/sync/projects")).await.unwrap()).await;
        assert_eq!(projects[0]["name"], "bare");
        assert_eq!(projects[0]["status"], "MISCONFIGURED");
    }

    #[tokio::test]
    async fn task_listing_and_pruning() {
        let (state, _dir) = test_state("");
        let journal = state.journal.clone();
        let t = journal.create("web", "n1").unwrap();
        journal.mark_running(t.id).unwrap();
        journal.mark_success(t.id, 5, 1, 10, None).unwrap();
        journal.create("web", "n1").unwrap();
        let app = router(state);

        let bad = app
            .clone()
            .oneshot(get("/api/sync/tasks?status=bogus"))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let tasks = body_json(
            app.clone()
                .oneshot(get("/api/sync/tasks?projectName=web&status=success"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["bytes"], 5);

        let one = body_json(
            app.clone()
                .oneshot(get(&format!("/api/sync/tasks/{}", t.id)))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(one["id"], t.id);

        // Default prune spares the pending task.
        let pruned = body_json(
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/api/sync/tasks")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(pruned["deleted"], 1);

        let rest = body_json(app.oneshot(get("/api/sync/tasks")).await.unwrap()).await;
        assert_eq!(rest.as_array().unwrap().len(), 1);
        assert_eq!(rest[0]["status"], "pending");
    }

    #[tokio::test]
    async fn config_update_validates_and_persists() {
        let (state, _dir) = test_state("");
        let mut config = ProjectSyncConfig::new("web", "/srv/web");
        config.watch_enabled = false;
        state.configs.upsert(config.clone());
        let configs = state.configs.clone();
        let store = state.project_store.clone();
        let app = router(state);

        // Name mismatch.
        let mismatch = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/projects/other/config")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&config).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);

        // Invalid binding target.
        let mut bad = config.clone();
        bad.nodes = vec![fsync_manifest::ProjectNodeBinding {
            node_id: "n1".into(),
            target_path: "/".into(),
            strategy: fsync_manifest::SyncStrategy::Mirror,
            ignore_patterns: vec![],
            ignore_file: None,
            mirror_fast_delete: true,
            mirror_fast_fullscan_every: 20,
            mirror_clean_empty_dirs: true,
            mirror_sync_empty_dirs: false,
        }];
        let invalid = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/projects/web/config")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&bad).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        // A good update lands in the registry and on disk.
        let mut good = config.clone();
        good.ignore_patterns = vec!["*.log".into()];
        let ok = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/sync/projects/web/config")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&good).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);
        assert_eq!(configs.get("web").unwrap().ignore_patterns, vec!["*.log"]);
        assert_eq!(store.load_all().unwrap()[0].ignore_patterns, vec!["*.log"]);
    }

    #[tokio::test]
    async fn webhook_without_git_still_reconverges() {
        let (state, _dir) = test_state("");
        let mut config = ProjectSyncConfig::new("web", "/srv/web");
        config.watch_enabled = false;
        state.configs.upsert(config);
        let queue = state.queue.clone();
        let app = router(state);

        let missing = app
            .clone()
            .oneshot(post_json("/api/webhook/nope", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let ok = app
            .oneshot(post_json("/api/webhook/web", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::ACCEPTED);
        assert_eq!(queue.depth("web").unwrap(), 1);
    }
}
