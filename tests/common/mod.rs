//! In-process stand-in for the tutoring service: Socket.IO over WebSocket on
//! `/socket.io/` plus the REST routes under `/api`, bound to an ephemeral port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use math_mentor::ClientConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const ALICE_TOKEN: &str = "token-1";
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PASSWORD: &str = "hunter22";

#[derive(Debug, Clone)]
struct User {
    id: i64,
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Default)]
pub struct ServiceLog {
    /// Every text frame a socket client sent after the namespace handshake.
    pub frames: Vec<String>,
    /// Auth object presented with each namespace connect.
    pub auth: Vec<Value>,
    pub sockets_opened: usize,
}

/// How the socket side of the fake behaves once a client arrives.
#[derive(Debug, Clone, Copy)]
pub struct SocketBehaviour {
    pub ping_interval: u64,
    pub ping_timeout: u64,
    /// Send an engine ping every `ping_interval`.
    pub ping: bool,
    /// Leave the namespace connect unanswered.
    pub never_accept: bool,
    /// Accept the namespace, then never send another frame.
    pub silent: bool,
}

impl Default for SocketBehaviour {
    fn default() -> Self {
        Self {
            ping_interval: 25000,
            ping_timeout: 20000,
            ping: false,
            never_accept: false,
            silent: false,
        }
    }
}

#[derive(Default)]
struct Data {
    users: Vec<User>,
    training: Vec<Value>,
    history: Vec<(i64, Value)>,
    status: Value,
    runs: u32,
}

#[derive(Clone)]
pub struct FakeState {
    require_token: bool,
    socket: SocketBehaviour,
    pub log: Arc<Mutex<ServiceLog>>,
    data: Arc<Mutex<Data>>,
    pushes: broadcast::Sender<String>,
}

impl FakeState {
    fn new(require_token: bool, socket: SocketBehaviour) -> Self {
        let (pushes, _) = broadcast::channel(64);
        let data = Data {
            users: vec![User {
                id: 1,
                username: "alice".into(),
                email: ALICE_EMAIL.into(),
                password: ALICE_PASSWORD.into(),
            }],
            status: json!({ "is_training": false, "progress": 0, "message": "Ready", "training_id": null }),
            ..Data::default()
        };
        Self {
            require_token,
            socket,
            log: Arc::new(Mutex::new(ServiceLog::default())),
            data: Arc::new(Mutex::new(data)),
            pushes,
        }
    }

    /// Send an event to every connected socket.
    pub fn emit(&self, name: &str, payload: Value) {
        let _ = self.pushes.send(format!("42{}", json!([name, payload])));
    }

    /// Send a raw text frame to every connected socket.
    pub fn push_raw(&self, frame: &str) {
        let _ = self.pushes.send(frame.to_string());
    }

    /// Drop every socket from the server side with a namespace disconnect.
    pub fn kick(&self) {
        let _ = self.pushes.send("41".to_string());
    }

    /// Finish a run started over REST.
    pub fn finish_training(&self) {
        let status = {
            let mut data = self.data.lock();
            data.status["is_training"] = json!(false);
            data.status["progress"] = json!(100);
            data.status["message"] = json!("Training completed successfully");
            data.status.clone()
        };
        self.emit("training_completed", status);
    }

    fn user_for(&self, headers: &HeaderMap) -> Result<User, (StatusCode, Json<Value>)> {
        let Some(header) = headers.get("authorization").and_then(|h| h.to_str().ok()) else {
            return Err(unauthorized("Token is missing"));
        };
        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        self.user_for_token(token)
            .ok_or_else(|| unauthorized("Token is invalid"))
    }

    fn user_for_token(&self, token: &str) -> Option<User> {
        let id: i64 = token.strip_prefix("token-")?.parse().ok()?;
        self.data.lock().users.iter().find(|u| u.id == id).cloned()
    }

    fn begin_run(&self) -> Option<Value> {
        let mut data = self.data.lock();
        if data.status["is_training"] == json!(true) {
            return None;
        }
        data.runs += 1;
        data.status = json!({
            "is_training": true,
            "progress": 0,
            "message": "Starting training...",
            "training_id": format!("run-{}", data.runs),
        });
        Some(data.status.clone())
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

pub struct FakeService {
    pub addr: SocketAddr,
    pub state: FakeState,
    task: JoinHandle<()>,
}

impl FakeService {
    pub async fn start() -> Self {
        Self::spawn(false, SocketBehaviour::default()).await
    }

    /// Socket connects without a valid token are refused.
    pub async fn start_strict() -> Self {
        Self::spawn(true, SocketBehaviour::default()).await
    }

    pub async fn start_with(socket: SocketBehaviour) -> Self {
        Self::spawn(false, socket).await
    }

    async fn spawn(require_token: bool, socket: SocketBehaviour) -> Self {
        let state = FakeState::new(require_token, socket);
        let app = Router::new()
            .route("/socket.io/", get(socket_handler))
            .route("/api/health", get(health))
            .route("/api/auth/register", post(register))
            .route("/api/auth/login", post(login))
            .route("/api/solve", post(solve))
            .route("/api/train", post(train))
            .route("/api/training-data", get(training_data))
            .route("/api/retrain", post(retrain))
            .route("/api/training/status", get(training_status))
            .route("/api/solutions/history", get(history))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self, home: &std::path::Path) -> ClientConfig {
        let mut config = ClientConfig::with_home(home);
        config.api_url = format!("{}/api", self.base_url());
        config.ws_url = self.base_url();
        config.request_timeout = Duration::from_secs(5);
        config.connect_timeout = Duration::from_secs(5);
        config
    }

    pub fn log(&self) -> parking_lot::MutexGuard<'_, ServiceLog> {
        self.state.log.lock()
    }

    /// Poll until `check` holds or two seconds pass.
    pub async fn eventually(&self, check: impl Fn(&ServiceLog) -> bool) -> bool {
        for _ in 0..100 {
            if check(&self.state.log.lock()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn socket_handler(State(state): State<FakeState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_session(state, socket))
}

async fn socket_session(state: FakeState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    state.log.lock().sockets_opened += 1;
    let behaviour = state.socket;

    let open = json!({
        "sid": format!("sid-{}", uuid::Uuid::new_v4()),
        "upgrades": [],
        "pingInterval": behaviour.ping_interval,
        "pingTimeout": behaviour.ping_timeout,
        "maxPayload": 1000000
    });
    if sender.send(Message::Text(format!("0{open}").into())).await.is_err() {
        return;
    }

    // Namespace connect carries the auth object
    let auth = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) if text.as_str().starts_with("40") => {
                let body = &text.as_str()[2..];
                break serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    state.log.lock().auth.push(auth.clone());

    if behaviour.never_accept {
        while let Some(Ok(_)) = receiver.next().await {}
        return;
    }

    let token_ok = auth
        .get("token")
        .and_then(Value::as_str)
        .and_then(|t| state.user_for_token(t))
        .is_some();
    if state.require_token && !token_ok {
        let _ = sender
            .send(Message::Text(r#"44{"message":"Token is invalid"}"#.into()))
            .await;
        let _ = sender.close().await;
        return;
    }

    let mut pushes = state.pushes.subscribe();
    let accepted = json!({ "sid": "ns-1" });
    if sender.send(Message::Text(format!("40{accepted}").into())).await.is_err() {
        return;
    }

    if behaviour.silent {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => state.log.lock().frames.push(text.as_str().to_string()),
                Some(Ok(_)) => continue,
                _ => return,
            }
        }
    }

    let greeting = json!(["connected", { "message": "Connected to Math Mentor AI" }]);
    if sender.send(Message::Text(format!("42{greeting}").into())).await.is_err() {
        return;
    }

    let period = Duration::from_millis(behaviour.ping_interval);
    let mut pinger = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = pinger.tick(), if behaviour.ping => {
                if sender.send(Message::Text("2".into())).await.is_err() {
                    break;
                }
            }
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                state.log.lock().frames.push(text.clone());

                if text == "41" {
                    break;
                }
                for reply in replies_for(&state, &text) {
                    if sender.send(Message::Text(reply.into())).await.is_err() {
                        return;
                    }
                }
            }
            push = pushes.recv() => match push {
                Ok(frame) => {
                    let leaving = frame == "41";
                    if sender.send(Message::Text(frame.into())).await.is_err() || leaving {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn replies_for(state: &FakeState, frame: &str) -> Vec<String> {
    let Some(args) = frame.strip_prefix("42") else {
        return Vec::new();
    };
    let Ok(Value::Array(args)) = serde_json::from_str::<Value>(args) else {
        return Vec::new();
    };
    let event = |name: &str, payload: Value| format!("42{}", json!([name, payload]));

    match args.first().and_then(Value::as_str) {
        Some("chat_message") => {
            let problem = args
                .get(1)
                .and_then(|p| p.get("problem"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if problem.is_empty() {
                return vec![event("chat_error", json!({ "error": "No problem provided" }))];
            }
            vec![event(
                "chat_response",
                json!({
                    "problem": problem,
                    "solution": "x = 1",
                    "confidence": 0.87,
                    "timestamp": "2024-01-01T00:00:00"
                }),
            )]
        }
        Some("start_training") => match state.begin_run() {
            Some(started) => {
                let training_id = started["training_id"].clone();
                state.data.lock().status = json!({
                    "is_training": false,
                    "progress": 100,
                    "message": "Training completed successfully",
                    "training_id": training_id.clone(),
                });
                vec![
                    event("training_started", started),
                    event("training_progress", json!({ "progress": 50, "message": "Training model..." })),
                    event(
                        "training_completed",
                        json!({
                            "is_training": false,
                            "progress": 100,
                            "message": "Training completed successfully",
                            "training_id": training_id,
                        }),
                    ),
                ]
            }
            None => vec![event(
                "training_failed",
                json!({ "message": "Training already in progress" }),
            )],
        },
        _ => Vec::new(),
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": "2024-01-01T00:00:00",
        "version": "2.0.0",
        "services": { "database": "connected", "model": "not_loaded", "websocket": "connected" }
    }))
}

async fn register(State(state): State<FakeState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    let (Some(username), Some(email), Some(password)) = (field("username"), field("email"), field("password")) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing required fields" })));
    };

    let mut data = state.data.lock();
    if data.users.iter().any(|u| u.username == username || u.email == email) {
        return (StatusCode::CONFLICT, Json(json!({ "error": "User already exists" })));
    }
    let id = data.users.len() as i64 + 1;
    data.users.push(User {
        id,
        username: username.clone(),
        email: email.clone(),
        password,
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "token": format!("token-{id}"),
            "user": { "id": id, "username": username, "email": email }
        })),
    )
}

async fn login(State(state): State<FakeState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let email = body.get("email").and_then(Value::as_str).unwrap_or_default();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();

    let data = state.data.lock();
    match data.users.iter().find(|u| u.email == email && u.password == password) {
        Some(user) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Login successful",
                "token": format!("token-{}", user.id),
                "user": { "id": user.id, "username": user.username, "email": user.email }
            })),
        ),
        None => unauthorized("Invalid credentials"),
    }
}

async fn solve(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let user = match state.user_for(&headers) {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let Some(problem) = body.get("problem").and_then(Value::as_str).filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "No problem provided" })));
    };

    let solution = json!({
        "steps": ["Subtract 5 from both sides", "Divide both sides by 2"],
        "final_answer": "x = 5",
        "concepts": ["linear equations"],
        "confidence": 0.92,
        "processing_time": 0.01
    });
    state.data.lock().history.push((
        user.id,
        json!({ "problem_text": problem, "solution_data": solution.clone(), "created_at": "2024-01-01T00:00:00" }),
    ));

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "solution": solution,
            "metadata": { "timestamp": "2024-01-01T00:00:00", "model_version": "2.0.0", "model_loaded": false }
        })),
    )
}

async fn train(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Err(rejection) = state.user_for(&headers) {
        return rejection;
    }
    let problem = body.get("problem_text").and_then(Value::as_str).unwrap_or_default().to_string();
    if problem.is_empty() || body.get("solution_text").is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Missing required fields" })));
    }
    let contributor = body
        .get("contributed_by")
        .and_then(Value::as_str)
        .unwrap_or("Anonymous")
        .to_string();

    let id = {
        let mut data = state.data.lock();
        let id = data.training.len() as i64 + 1;
        let mut record = body.clone();
        record["id"] = json!(id);
        record["validation_status"] = json!("pending");
        data.training.push(record);
        id
    };
    state.emit(
        "training_data_added",
        json!({ "id": id, "problem_text": problem, "contributor": contributor }),
    );

    (
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Training data added successfully", "id": id })),
    )
}

fn paging(query: &HashMap<String, String>, default_limit: usize) -> (usize, usize) {
    let page = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1usize).max(1);
    let limit = query
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(default_limit)
        .max(1);
    (page, limit)
}

fn paged(items: Vec<Value>, page: usize, limit: usize) -> Value {
    let total = items.len();
    let data: Vec<Value> = items.into_iter().skip((page - 1) * limit).take(limit).collect();
    json!({
        "data": data,
        "pagination": { "page": page, "limit": limit, "total": total, "pages": total.div_ceil(limit) }
    })
}

async fn training_data(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    if let Err(rejection) = state.user_for(&headers) {
        return rejection;
    }
    let (page, limit) = paging(&query, 20);
    let mut items = state.data.lock().training.clone();
    items.reverse();
    (StatusCode::OK, Json(paged(items, page, limit)))
}

async fn retrain(State(state): State<FakeState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if let Err(rejection) = state.user_for(&headers) {
        return rejection;
    }
    match state.begin_run() {
        Some(started) => {
            state.emit("training_started", started.clone());
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Model training started",
                    "training_id": started["training_id"]
                })),
            )
        }
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Training already in progress" })),
        ),
    }
}

async fn training_status(State(state): State<FakeState>) -> Json<Value> {
    Json(state.data.lock().status.clone())
}

async fn history(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let user = match state.user_for(&headers) {
        Ok(user) => user,
        Err(rejection) => return rejection,
    };
    let requested: i64 = query
        .get("userId")
        .and_then(|id| id.parse().ok())
        .unwrap_or(user.id);
    let (page, limit) = paging(&query, 10);
    let items = state
        .data
        .lock()
        .history
        .iter()
        .filter(|(owner, _)| *owner == requested)
        .map(|(_, entry)| entry.clone())
        .collect();
    (StatusCode::OK, Json(paged(items, page, limit)))
}
