#![allow(dead_code)]

//! In-process fake of the pgAnalytics auth API.
//!
//! Speaks just enough HTTP/1.1 for reqwest: one request per connection,
//! `Content-Length` bodies, `Connection: close` replies.

use pga_core::Config;
use serde_json::{json, Value};
use session_engine::SessionManager;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use token_store::{MemoryStorage, TokenPair, TokenStore};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const DEMO_USERNAME: &str = "demo";
pub const DEMO_PASSWORD: &str = "Demo123!";

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

struct Account {
    password: String,
    record: Value,
}

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, Account>,
    /// access token -> username
    access_tokens: HashMap<String, String>,
    /// refresh token -> username
    refresh_tokens: HashMap<String, String>,
    next_token: u64,
    next_user_id: i64,
    requests: Vec<RecordedRequest>,

    me_fails: bool,
    refresh_fails: bool,
    logout_fails: bool,
    register_returns_tokens: bool,
    refresh_delay: Duration,
    login_delay: Duration,
}

impl ServerState {
    fn add_account(&mut self, username: &str, password: &str, email: &str, full_name: &str) {
        self.next_user_id += 1;
        let record = json!({
            "id": self.next_user_id,
            "username": username,
            "email": email,
            "full_name": full_name,
            "role": "VIEWER",
            "is_active": true,
            "is_verified": false,
            "created_at": "2025-08-27T09:37:56.123456",
            "last_login": null
        });
        self.accounts.insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                record,
            },
        );
    }

    fn issue_pair(&mut self, username: &str) -> TokenPair {
        self.next_token += 1;
        let access = format!("access-{}-{}", username, self.next_token);
        let refresh = format!("refresh-{}-{}", username, self.next_token);
        self.access_tokens.insert(access.clone(), username.to_string());
        self.refresh_tokens.insert(refresh.clone(), username.to_string());
        TokenPair::new(access, refresh)
    }

    fn user_for(&self, authorization: Option<&str>) -> Option<String> {
        let token = authorization?.strip_prefix("Bearer ")?;
        self.access_tokens.get(token).cloned()
    }
}

/// Handle to a running fake server. The listener stops when dropped.
pub struct FakeAuthServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl Drop for FakeAuthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeAuthServer {
    /// Start a server with the demo account.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake server");
        let addr = listener.local_addr().expect("no local addr");

        let mut state = ServerState::default();
        state.add_account(DEMO_USERNAME, DEMO_PASSWORD, "demo@pganalytics.local", "Demo User");
        let state = Arc::new(Mutex::new(state));

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(socket, state).await;
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> Config {
        Config {
            api_url: self.url(),
            request_timeout_secs: 5,
            ..Config::default()
        }
    }

    /// Session manager over an in-memory token store pointed at this server.
    pub fn manager(&self) -> (Arc<SessionManager>, Arc<TokenStore>) {
        let tokens = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
        let manager =
            SessionManager::connect(&self.config(), tokens.clone()).expect("failed to connect");
        (manager, tokens)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ServerState) -> T) -> T {
        let mut state = self.state.lock().expect("fake server state poisoned");
        f(&mut state)
    }

    pub fn add_account(&self, username: &str, password: &str) {
        let email = format!("{}@pganalytics.local", username);
        self.with_state(|s| s.add_account(username, password, &email, username));
    }

    /// Issue a valid pair for an existing account, as a past login would have.
    pub fn issue_tokens(&self, username: &str) -> TokenPair {
        self.with_state(|s| s.issue_pair(username))
    }

    /// Issue a pair whose access token the server no longer accepts.
    pub fn issue_expired_tokens(&self, username: &str) -> TokenPair {
        self.with_state(|s| {
            let pair = s.issue_pair(username);
            s.access_tokens.remove(&pair.access_token);
            pair
        })
    }

    /// Revoke every access token, as if they all expired.
    pub fn expire_access_tokens(&self) {
        self.with_state(|s| s.access_tokens.clear());
    }

    pub fn set_me_fails(&self, value: bool) {
        self.with_state(|s| s.me_fails = value);
    }

    pub fn set_refresh_fails(&self, value: bool) {
        self.with_state(|s| s.refresh_fails = value);
    }

    pub fn set_logout_fails(&self, value: bool) {
        self.with_state(|s| s.logout_fails = value);
    }

    pub fn set_register_returns_tokens(&self, value: bool) {
        self.with_state(|s| s.register_returns_tokens = value);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.with_state(|s| s.refresh_delay = delay);
    }

    pub fn set_login_delay(&self, delay: Duration) {
        self.with_state(|s| s.login_delay = delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn total_requests(&self) -> usize {
        self.with_state(|s| s.requests.len())
    }

    /// Number of requests received for a path, any method.
    pub fn count(&self, path: &str) -> usize {
        self.with_state(|s| s.requests.iter().filter(|r| r.path == path).count())
    }

    /// Wait until at least `n` requests for `path` have arrived.
    pub async fn wait_for(&self, path: &str, n: usize) {
        for _ in 0..500 {
            if self.count(path) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} request(s) to {}", n, path);
    }

    pub fn is_access_token_valid(&self, token: &str) -> bool {
        self.with_state(|s| s.access_tokens.contains_key(token))
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    state: Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let (refresh_delay, login_delay) = {
        let mut s = state.lock().expect("fake server state poisoned");
        s.requests.push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            authorization: authorization.clone(),
            body: body.clone(),
        });
        (s.refresh_delay, s.login_delay)
    };

    match path.as_str() {
        "/api/v1/auth/refresh" if !refresh_delay.is_zero() => tokio::time::sleep(refresh_delay).await,
        "/api/v1/auth/login" if !login_delay.is_zero() => tokio::time::sleep(login_delay).await,
        _ => {}
    }

    let (status, payload) = {
        let mut s = state.lock().expect("fake server state poisoned");
        route(&mut s, &method, &path, authorization.as_deref(), &body)
    };

    let payload = payload.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        payload.len(),
        payload
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn unauthorized() -> (u16, Value) {
    (401, json!({"detail": "Could not validate credentials"}))
}

fn route(
    s: &mut ServerState,
    method: &str,
    path: &str,
    authorization: Option<&str>,
    body: &Value,
) -> (u16, Value) {
    let text = |key: &str| body.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    match (method, path) {
        ("POST", "/api/v1/auth/login") => {
            let username = text("username");
            let valid = s
                .accounts
                .get(&username)
                .is_some_and(|account| account.password == text("password"));
            if !valid {
                return (401, json!({"detail": "Incorrect username or password"}));
            }
            let pair = s.issue_pair(&username);
            (
                200,
                json!({
                    "access_token": pair.access_token,
                    "refresh_token": pair.refresh_token,
                    "token_type": "bearer",
                    "expires_in": 1800
                }),
            )
        }
        ("POST", "/api/v1/auth/register") => {
            let username = text("username");
            let email = text("email");
            if !email.contains('@') {
                return (
                    422,
                    json!({"detail": [{
                        "loc": ["body", "email"],
                        "msg": "value is not a valid email address",
                        "type": "value_error.email"
                    }]}),
                );
            }
            if s.accounts.contains_key(&username) {
                return (400, json!({"detail": "Username already registered"}));
            }
            s.add_account(&username, &text("password"), &email, &text("full_name"));
            let mut record = s.accounts[&username].record.clone();
            if s.register_returns_tokens {
                let pair = s.issue_pair(&username);
                record["access_token"] = json!(pair.access_token);
                record["refresh_token"] = json!(pair.refresh_token);
            }
            (200, record)
        }
        ("GET", "/api/v1/auth/me") => {
            if s.me_fails {
                return (500, json!({"detail": "Internal server error"}));
            }
            match s.user_for(authorization) {
                Some(username) => (200, s.accounts[&username].record.clone()),
                None => unauthorized(),
            }
        }
        ("PUT", "/api/v1/auth/me") => {
            let Some(username) = s.user_for(authorization) else {
                return unauthorized();
            };
            let Some(account) = s.accounts.get_mut(&username) else {
                return (404, json!({"detail": "User not found"}));
            };
            for key in ["email", "full_name"] {
                if let Some(value) = body.get(key) {
                    account.record[key] = value.clone();
                }
            }
            (200, account.record.clone())
        }
        ("POST", "/api/v1/auth/refresh") => {
            if s.refresh_fails {
                return (401, json!({"detail": "Invalid refresh token"}));
            }
            // Single use: the presented refresh token is rotated out
            match s.refresh_tokens.remove(&text("refresh_token")) {
                Some(username) => {
                    let pair = s.issue_pair(&username);
                    (
                        200,
                        json!({
                            "access_token": pair.access_token,
                            "refresh_token": pair.refresh_token,
                            "token_type": "bearer",
                            "expires_in": 1800
                        }),
                    )
                }
                None => (401, json!({"detail": "Invalid refresh token"})),
            }
        }
        ("POST", "/api/v1/auth/logout") => {
            if s.logout_fails {
                return (500, json!({"detail": "Internal server error"}));
            }
            if s.user_for(authorization).is_none() {
                return unauthorized();
            }
            if let Some(token) = authorization.and_then(|a| a.strip_prefix("Bearer ")) {
                s.access_tokens.remove(token);
            }
            (200, json!({"message": "Successfully logged out"}))
        }
        ("POST", "/api/v1/auth/change-password") => {
            let Some(username) = s.user_for(authorization) else {
                return unauthorized();
            };
            let Some(account) = s.accounts.get_mut(&username) else {
                return (404, json!({"detail": "User not found"}));
            };
            if account.password != text("current_password") {
                return (400, json!({"detail": "Incorrect current password"}));
            }
            account.password = text("new_password");
            (200, json!({"message": "Password changed successfully"}))
        }
        _ => (404, json!({"detail": "Not Found"})),
    }
}
