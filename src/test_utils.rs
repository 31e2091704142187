// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for standing in for the Kubernetes API.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// An in-memory API server: objects are stored by request path.
///
/// POST to a collection creates `<collection>/<metadata.name>`, GET/PUT/DELETE address
/// objects directly. Responses follow the shape kube expects, including Status bodies on
/// failure.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Value>,
    failures: HashMap<(String, String), Injected>,
    stuck: HashSet<String>,
    requests: Vec<(String, String)>,
    next_version: u64,
}

struct Injected {
    code: u16,
    reason: String,
    remaining: Option<usize>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a kube Client backed by this server
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    /// Pre-populate an object at `path`
    pub fn insert(&self, path: &str, object: Value) {
        self.state.lock().unwrap().objects.insert(path.to_string(), object);
    }

    /// Drop an object out-of-band, as if something else deleted it
    pub fn remove(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(path)
    }

    /// Answer every `method` request on `path` with an error status
    pub fn fail_on(&self, method: &str, path: &str, code: u16, reason: &str) {
        self.inject(method, path, code, reason, None);
    }

    /// Answer the next `times` `method` requests on `path` with an error status
    pub fn fail_times(&self, method: &str, path: &str, code: u16, reason: &str, times: usize) {
        self.inject(method, path, code, reason, Some(times));
    }

    /// Objects at `path` acknowledge deletion but never go away
    pub fn stick(&self, path: &str) {
        self.state.lock().unwrap().stuck.insert(path.to_string());
    }

    /// (method, path) of every request received, in order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Paths of every DELETE received, in order
    pub fn deletes(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|(method, _)| method == "DELETE")
            .map(|(_, path)| path)
            .collect()
    }

    fn inject(&self, method: &str, path: &str, code: u16, reason: &str, remaining: Option<usize>) {
        self.state.lock().unwrap().failures.insert(
            (method.to_string(), path.to_string()),
            Injected {
                code,
                reason: reason.to_string(),
                remaining,
            },
        );
    }

    fn handle(&self, method: &str, path: &str, body: &[u8]) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), path.to_string()));

        let key = (method.to_string(), path.to_string());
        if let Some(injected) = state.failures.get_mut(&key) {
            let response = (injected.code, status_json(injected.code, &injected.reason, path));
            match injected.remaining {
                Some(0) => {}
                Some(n) => {
                    injected.remaining = Some(n - 1);
                    return response;
                }
                None => return response,
            }
        }

        match method {
            "POST" => {
                let Ok(mut object) = serde_json::from_slice::<Value>(body) else {
                    return (400, status_json(400, "BadRequest", path));
                };
                let Some(name) = object["metadata"]["name"].as_str().map(str::to_string) else {
                    return (422, status_json(422, "Invalid", path));
                };
                let object_path = format!("{}/{}", path, name);
                if state.objects.contains_key(&object_path) {
                    return (409, status_json(409, "AlreadyExists", &object_path));
                }
                if object["kind"] == "Namespace" {
                    object["status"] = json!({ "phase": "Active" });
                }
                state.next_version += 1;
                object["metadata"]["resourceVersion"] = json!(state.next_version.to_string());
                object["metadata"]["uid"] = json!(format!("uid-{}", state.next_version));
                state.objects.insert(object_path, object.clone());
                (201, object)
            }
            "GET" => match state.objects.get(path) {
                Some(object) => (200, object.clone()),
                None => (404, status_json(404, "NotFound", path)),
            },
            "PUT" => {
                let Ok(mut object) = serde_json::from_slice::<Value>(body) else {
                    return (400, status_json(400, "BadRequest", path));
                };
                let Some(current) = state.objects.get(path) else {
                    return (404, status_json(404, "NotFound", path));
                };
                let expected = &current["metadata"]["resourceVersion"];
                let given = &object["metadata"]["resourceVersion"];
                if !given.is_null() && given != expected {
                    return (409, status_json(409, "Conflict", path));
                }
                if object["kind"] == "Namespace" {
                    object["status"] = current["status"].clone();
                }
                state.next_version += 1;
                object["metadata"]["resourceVersion"] = json!(state.next_version.to_string());
                state.objects.insert(path.to_string(), object.clone());
                (200, object)
            }
            "DELETE" => {
                if state.stuck.contains(path) {
                    return match state.objects.get_mut(path) {
                        Some(object) => {
                            object["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
                            (200, object.clone())
                        }
                        None => (404, status_json(404, "NotFound", path)),
                    };
                }
                match state.objects.remove(path) {
                    Some(object) => (200, object),
                    None => (404, status_json(404, "NotFound", path)),
                }
            }
            _ => (405, status_json(405, "MethodNotAllowed", path)),
        }
    }
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let body: Bytes = req.into_body().collect().await?.to_bytes();

            let (status, value) = server.handle(&method, &path, &body);
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value)?))?)
        })
    }
}

/// Create an error Status body
pub fn status_json(code: u16, reason: &str, path: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} {}", reason, path),
        "reason": reason,
        "code": code
    })
}

/// Create a namespace object
pub fn namespace_json(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    })
}

/// Create a config map object with a single data entry
pub fn config_map_json(namespace: &str, name: &str, value: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": namespace },
        "data": { "key": value }
    })
}
