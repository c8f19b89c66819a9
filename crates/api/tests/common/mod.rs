//! Shared fixtures for the HTTP integration tests.
//!
//! Every test builds its own application over a fresh `MemoryStore`. The
//! outbox is a detached channel, so tests read queued emails and pushes
//! directly instead of running delivery workers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use domain::models::Role;
use domain::services::{OutboundMessage, Outbox, DEFAULT_THRESHOLD_PROPERTY};
use domain::store::{MemoryStore, Store};
use foodshare_api::app::{create_app, AppState};
use foodshare_api::config::Config;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "panthers-4-ever";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub outbox_rx: mpsc::Receiver<OutboundMessage>,
}

/// A verified user holding fresh tokens.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestApp {
    pub async fn new(threshold: u32) -> Self {
        Self::with_overrides(threshold, &[]).await
    }

    pub async fn with_overrides(threshold: u32, overrides: &[(&str, &str)]) -> Self {
        let config = Config::load_for_test(overrides).expect("test config");
        let store = Arc::new(MemoryStore::with_properties([(
            DEFAULT_THRESHOLD_PROPERTY,
            threshold.to_string().as_str(),
        )]));
        let (outbox, outbox_rx) = Outbox::channel(256);

        let state = AppState::new(config, store.clone(), outbox).expect("app state");
        Self {
            router: create_app(state),
            store,
            outbox_rx,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> Response {
        self.send(json_request(Method::POST, uri, Some(body), token))
            .await
    }

    pub async fn put(&self, uri: &str, body: Value, token: &str) -> Response {
        self.send(json_request(Method::PUT, uri, Some(body), Some(token)))
            .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        self.send(json_request(Method::GET, uri, None, token)).await
    }

    /// Drains queued messages.
    pub fn drain_outbox(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbox_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// The most recent verification code queued for `email`.
    pub fn take_code_for(&mut self, email: &str) -> Option<String> {
        self.drain_outbox()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::VerificationEmail { to, code } if to == email => Some(code),
                _ => None,
            })
            .last()
    }

    pub async fn threshold(&self) -> i64 {
        let mut tx = self.store.begin().await.unwrap();
        tx.get_property(DEFAULT_THRESHOLD_PROPERTY)
            .await
            .unwrap()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub async fn set_threshold(&self, value: u32) {
        let mut tx = self.store.begin().await.unwrap();
        tx.set_property(DEFAULT_THRESHOLD_PROPERTY, &value.to_string())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn grant_role(&self, user_id: Uuid, role: Role) {
        let mut tx = self.store.begin().await.unwrap();
        let mut user = tx.get_user(user_id).await.unwrap().unwrap();
        user.roles.insert(role);
        tx.set_user_roles(user_id, &user.roles).await.unwrap();
        tx.commit().await.unwrap();
    }

    pub async fn signup(&self, email: &str) -> Response {
        self.post(
            "/api/v1/signup",
            json!({ "email": email, "password": PASSWORD }),
            None,
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Response {
        self.post(
            "/api/v1/login",
            json!({ "email": email, "password": password }),
            None,
        )
        .await
    }

    /// Signs up, logs in and verifies a user. Consumes one threshold unit.
    pub async fn verified_user(&mut self, email: &str) -> TestUser {
        let response = self.signup(email).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let code = self
            .take_code_for(email)
            .expect("threshold should allow a verification code");

        let response = self.login(email, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = parse_response_body(response).await;
        let access_token = body["tokens"]["accessToken"].as_str().unwrap().to_string();
        let refresh_token = body["tokens"]["refreshToken"].as_str().unwrap().to_string();
        let id = body["user"]["id"].as_str().unwrap().parse().unwrap();

        let response = self
            .post(
                "/api/v1/users/verify",
                json!({ "code": code }),
                Some(&access_token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        TestUser {
            id,
            email: email.to_string(),
            access_token,
            refresh_token,
        }
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn parse_response_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}
