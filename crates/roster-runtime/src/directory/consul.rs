use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, Url};
use roster_core::cluster::{
    go_duration, CheckStatus, Directory, DirectoryFuture, QueryOptions, ServiceEntry,
    ServiceHealth, ServiceRegistration,
};
use roster_core::config::DirectoryConfig;
use roster_core::{Result, RosterError};
use serde::de::IgnoredAny;
use serde::Serialize;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Directory backed by the HTTP API of a local Consul agent.
pub struct ConsulDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    datacenter: Option<String>,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct CheckUpdate<'a> {
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "Output")]
    output: &'a str,
}

impl ConsulDirectory {
    /// Create a client for the agent described by `config`.
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RosterError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Create a directory on top of an existing HTTP client.
    pub fn with_client(client: reqwest::Client, config: &DirectoryConfig) -> Self {
        Self {
            client,
            base_url: config.address.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            datacenter: config.datacenter.clone().filter(|dc| !dc.is_empty()),
            request_timeout: config.request_timeout(),
        }
    }

    /// Base URL of the agent.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Agent URL for `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            RosterError::Config(format!("Invalid agent address {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                RosterError::Config(format!("Agent address {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        timeout: Duration,
    ) -> Result<RequestBuilder> {
        let builder = self
            .client
            .request(method, self.endpoint(segments)?)
            .timeout(timeout);

        Ok(match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            RosterError::Directory(format!("{} request failed: {}", operation, e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RosterError::Directory(format!(
            "{} failed with {}: {}",
            operation,
            status,
            body.trim()
        )))
    }

    /// Time to allow a blocking query before giving up on the agent.
    ///
    /// Consul adds up to `wait / 16` of jitter to the wait it was asked for.
    fn health_timeout(&self, wait_time: Duration) -> Duration {
        wait_time + wait_time / 16 + self.request_timeout
    }
}

impl Directory for ConsulDirectory {
    fn register_service<'a>(
        &'a self,
        registration: &'a ServiceRegistration,
    ) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let builder = self
                .request(
                    Method::PUT,
                    &["v1", "agent", "service", "register"],
                    self.request_timeout,
                )?
                .json(registration);
            self.send(builder, "service register").await?;
            Ok(())
        })
    }

    fn deregister_service<'a>(&'a self, service_id: &'a str) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let builder = self.request(
                Method::PUT,
                &["v1", "agent", "service", "deregister", service_id],
                self.request_timeout,
            )?;
            self.send(builder, "service deregister").await?;
            Ok(())
        })
    }

    fn update_ttl<'a>(&'a self, check_id: &'a str, status: CheckStatus) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let builder = self
                .request(
                    Method::PUT,
                    &["v1", "agent", "check", "update", check_id],
                    self.request_timeout,
                )?
                .json(&CheckUpdate {
                    status: status.as_str(),
                    output: "",
                });
            self.send(builder, "check update").await?;
            Ok(())
        })
    }

    fn health_service<'a>(
        &'a self,
        service: &'a str,
        options: &'a QueryOptions,
    ) -> DirectoryFuture<'a, ServiceHealth> {
        Box::pin(async move {
            let mut query: Vec<(&str, String)> = Vec::new();
            if options.wait_index != 0 {
                query.push(("index", options.wait_index.to_string()));
            }
            if !options.wait_time.is_zero() {
                query.push(("wait", go_duration(options.wait_time)));
            }
            if let Some(dc) = &self.datacenter {
                query.push(("dc", dc.clone()));
            }

            let builder = self
                .request(
                    Method::GET,
                    &["v1", "health", "service", service],
                    self.health_timeout(options.wait_time),
                )?
                .query(&query);
            let response = self.send(builder, "health query").await?;

            let last_index = response
                .headers()
                .get(INDEX_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .ok_or_else(|| {
                    RosterError::Directory(format!(
                        "health query response is missing a valid {} header",
                        INDEX_HEADER
                    ))
                })?;

            let entries: Option<Vec<ServiceEntry>> = response.json().await?;

            Ok(ServiceHealth {
                entries: entries.unwrap_or_default(),
                last_index,
            })
        })
    }

    fn local_services(&self) -> DirectoryFuture<'_, Vec<String>> {
        Box::pin(async move {
            let builder = self.request(
                Method::GET,
                &["v1", "agent", "services"],
                self.request_timeout,
            )?;
            let response = self.send(builder, "local services").await?;
            let services: HashMap<String, IgnoredAny> = response.json().await?;
            Ok(services.into_keys().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use roster_core::cluster::TtlCheck;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeAgent {
        index: u64,
        services: BTreeMap<String, Value>,
        checks: HashMap<String, String>,
        health_queries: Vec<HashMap<String, String>>,
        tokens: Vec<Option<String>>,
    }

    type Shared = Arc<Mutex<FakeAgent>>;

    fn record_token(agent: &mut FakeAgent, headers: &HeaderMap) {
        let token = headers
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        agent.tokens.push(token);
    }

    async fn register(
        State(agent): State<Shared>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let mut agent = agent.lock().unwrap();
        record_token(&mut agent, &headers);
        let id = body["ID"].as_str().unwrap_or_default().to_string();
        agent
            .checks
            .insert(format!("service:{}", id), "critical".to_string());
        agent.services.insert(id, body);
        agent.index += 1;
        StatusCode::OK
    }

    async fn deregister(State(agent): State<Shared>, Path(id): Path<String>) -> StatusCode {
        let mut agent = agent.lock().unwrap();
        agent.services.remove(&id);
        agent.checks.remove(&format!("service:{}", id));
        agent.index += 1;
        StatusCode::OK
    }

    async fn update_check(
        State(agent): State<Shared>,
        Path(check_id): Path<String>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let mut agent = agent.lock().unwrap();
        match agent.checks.get_mut(&check_id) {
            Some(status) => {
                *status = body["Status"].as_str().unwrap_or_default().to_string();
                (StatusCode::OK, String::new())
            }
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("CheckID \"{}\" does not have associated TTL", check_id),
            ),
        }
    }

    async fn health(
        State(agent): State<Shared>,
        Path(name): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let mut agent = agent.lock().unwrap();
        agent.health_queries.push(params);

        let entries: Vec<Value> = agent
            .services
            .values()
            .filter(|s| s["Name"] == name.as_str())
            .map(|s| {
                let id = s["ID"].as_str().unwrap_or_default();
                let check_id = format!("service:{}", id);
                json!({
                    "Node": { "Node": "agent-one", "Address": "10.0.0.250" },
                    "Service": {
                        "ID": id,
                        "Service": s["Name"],
                        "Tags": s["Tags"],
                        "Address": s["Address"],
                        "Port": s["Port"],
                        "Meta": s.get("Meta").cloned().unwrap_or(Value::Null),
                    },
                    "Checks": [{
                        "CheckID": check_id,
                        "Name": "Service check",
                        "Status": agent.checks.get(&check_id).cloned().unwrap_or_default(),
                        "ServiceID": id,
                    }],
                })
            })
            .collect();

        ([(INDEX_HEADER, agent.index.to_string())], Json(entries))
    }

    async fn services(State(agent): State<Shared>) -> Json<Value> {
        let agent = agent.lock().unwrap();
        let map: serde_json::Map<String, Value> = agent
            .services
            .iter()
            .map(|(id, body)| (id.clone(), json!({ "ID": id, "Service": body["Name"] })))
            .collect();
        Json(Value::Object(map))
    }

    async fn start_agent() -> (String, Shared) {
        let agent: Shared = Arc::new(Mutex::new(FakeAgent {
            index: 1,
            ..Default::default()
        }));
        let app = Router::new()
            .route("/v1/agent/service/register", put(register))
            .route("/v1/agent/service/deregister/{id}", put(deregister))
            .route("/v1/agent/check/update/{check_id}", put(update_check))
            .route("/v1/health/service/{name}", get(health))
            .route("/v1/agent/services", get(services))
            .with_state(agent.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), agent)
    }

    fn directory(address: &str) -> ConsulDirectory {
        ConsulDirectory::new(&DirectoryConfig {
            address: address.to_string(),
            token: Some("acl-token".to_string()),
            datacenter: Some("eu-west".to_string()),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    fn registration() -> ServiceRegistration {
        let mut meta = BTreeMap::new();
        meta.insert("StatusValue".to_string(), r#"{"load":1}"#.to_string());
        ServiceRegistration {
            id: "orders@10.0.0.1:4000".to_string(),
            name: "orders".to_string(),
            tags: vec!["cart".to_string()],
            address: "10.0.0.1".to_string(),
            port: 4000,
            meta,
            check: TtlCheck {
                ttl: Duration::from_secs(3),
                deregister_critical_after: Duration::from_secs(60),
            },
        }
    }

    #[tokio::test]
    async fn test_register_sends_consul_payload() {
        let (address, agent) = start_agent().await;
        let consul = directory(&address);

        consul.register_service(&registration()).await.unwrap();

        let agent = agent.lock().unwrap();
        let body = &agent.services["orders@10.0.0.1:4000"];
        assert_eq!(body["Name"], "orders");
        assert_eq!(body["Port"], 4000);
        assert_eq!(body["Tags"], json!(["cart"]));
        assert_eq!(body["Meta"]["StatusValue"], r#"{"load":1}"#);
        assert_eq!(body["Check"]["TTL"], "3s");
        assert_eq!(body["Check"]["DeregisterCriticalServiceAfter"], "60s");
        assert_eq!(agent.tokens, vec![Some("acl-token".to_string())]);
    }

    #[tokio::test]
    async fn test_ttl_update_and_health_query() {
        let (address, agent) = start_agent().await;
        let consul = directory(&address);
        let registration = registration();

        consul.register_service(&registration).await.unwrap();
        consul
            .update_ttl(&registration.check_id(), CheckStatus::Passing)
            .await
            .unwrap();

        let health = consul
            .health_service(
                "orders",
                &QueryOptions {
                    wait_index: 1,
                    wait_time: Duration::from_secs(20),
                },
            )
            .await
            .unwrap();

        assert_eq!(health.last_index, 2);
        assert_eq!(health.entries.len(), 1);
        let entry = &health.entries[0];
        assert_eq!(entry.service.id, "orders@10.0.0.1:4000");
        assert_eq!(entry.address(), "10.0.0.1");
        assert_eq!(
            entry.service.meta.get("StatusValue").map(String::as_str),
            Some(r#"{"load":1}"#)
        );
        assert!(entry.is_alive());

        let agent = agent.lock().unwrap();
        let params = &agent.health_queries[0];
        assert_eq!(params.get("index").map(String::as_str), Some("1"));
        assert_eq!(params.get("wait").map(String::as_str), Some("20s"));
        assert_eq!(params.get("dc").map(String::as_str), Some("eu-west"));
    }

    #[tokio::test]
    async fn test_first_health_query_omits_index() {
        let (address, agent) = start_agent().await;
        let consul = directory(&address);

        let health = consul
            .health_service("orders", &QueryOptions::default())
            .await
            .unwrap();

        assert!(health.entries.is_empty());
        assert_eq!(health.last_index, 1);
        let agent = agent.lock().unwrap();
        assert!(!agent.health_queries[0].contains_key("index"));
        assert!(!agent.health_queries[0].contains_key("wait"));
    }

    #[tokio::test]
    async fn test_unknown_check_is_directory_error() {
        let (address, _agent) = start_agent().await;
        let consul = directory(&address);

        let err = consul
            .update_ttl("service:missing", CheckStatus::Passing)
            .await
            .unwrap_err();

        match err {
            RosterError::Directory(message) => {
                assert!(message.contains("500"));
                assert!(message.contains("does not have associated TTL"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_services_and_deregister() {
        let (address, _agent) = start_agent().await;
        let consul = directory(&address);

        consul.register_service(&registration()).await.unwrap();
        assert_eq!(
            consul.local_services().await.unwrap(),
            vec!["orders@10.0.0.1:4000".to_string()]
        );

        consul
            .deregister_service("orders@10.0.0.1:4000")
            .await
            .unwrap();
        assert!(consul.local_services().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_directory_error() {
        let consul = directory("http://127.0.0.1:1");
        let err = consul.local_services().await.unwrap_err();
        assert!(err.is_directory());
    }

    #[tokio::test]
    async fn test_reserved_characters_stay_in_one_path_segment() {
        let (address, agent) = start_agent().await;
        let consul = directory(&address);
        let mut registration = registration();
        registration.id = "orders/eu?a#1@10.0.0.1:4000".to_string();
        registration.name = "orders/eu?a#1".to_string();

        consul.register_service(&registration).await.unwrap();
        consul
            .update_ttl(&registration.check_id(), CheckStatus::Passing)
            .await
            .unwrap();

        let health = consul
            .health_service("orders/eu?a#1", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(health.entries.len(), 1);
        assert_eq!(health.entries[0].service.id, registration.id);
        assert!(health.entries[0].is_alive());

        consul.deregister_service(&registration.id).await.unwrap();
        assert!(agent.lock().unwrap().services.is_empty());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let consul = directory("http://127.0.0.1:8500/");
        let url = consul
            .endpoint(&["v1", "health", "service", "a/b?c#d"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8500/v1/health/service/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn test_health_timeout_covers_jitter() {
        let consul = directory("http://127.0.0.1:8500/");
        assert_eq!(consul.base_url(), "http://127.0.0.1:8500");
        assert_eq!(
            consul.health_timeout(Duration::from_secs(16)),
            Duration::from_secs(22)
        );
    }
}
