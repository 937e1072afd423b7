//! Network client for edge-resolved, per-entity decisions and remote resolution.
//!
//! Public operations never fail: every error is logged and surfaces as `None` (or an all-`None`
//! vector for batches). No retries are performed; each call makes at most one round trip and is
//! bounded by a timeout.
use std::time::Duration;

use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    bucketing::compute_bucket,
    bundle::{BundleVersion, ConfigBundle, ResolutionMode},
    conditions::evaluate_conditions,
    config::DecisionClientConfig,
    context::{key_string, lookup_field, Context},
    decision::DecisionResult,
    engine::{EdgeResult, EdgeResults},
    selection::{allocation_count, derive_entity_id},
    transport::{HttpRequest, ReqwestTransport, Transport},
    Error, Result,
};

const RESOLVE_ENDPOINT: &[&str] = &["v1", "resolve"];
const DECIDE_ENDPOINT: &[&str] = &["v1", "decide"];
const DECIDE_BATCH_ENDPOINT: &[&str] = &["v1", "decide", "batch"];

/// Request for a single per-entity decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDecideRequest {
    /// Policy to decide for. Sent in the URL path.
    pub policy_id: String,
    /// Entity id derived from the policy's entity keys.
    pub entity_id: String,
    /// Unit the decision is made for.
    pub unit_key_value: String,
    /// Live allocation count for dynamic policies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_count: Option<usize>,
    /// Caller context forwarded to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Body of `POST /v1/decide/{policyId}`. The policy id travels in the path.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EdgeDecideBody<'a> {
    entity_id: &'a str,
    unit_key_value: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    allocation_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a Context>,
}

/// Allocation chosen by the server for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDecideResponse {
    /// Ordinal of the chosen allocation.
    pub allocation_index: usize,
    /// Name of the chosen allocation.
    pub allocation_name: String,
    /// Weights the server drew from.
    #[serde(default)]
    pub weights: Vec<f64>,
    /// The server had no learned state for the entity and used the prior.
    #[serde(default)]
    pub cold_start: bool,
    /// Version of the server-side state the choice was made with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_version: Option<BundleVersion>,
}

#[derive(Serialize)]
struct EdgeDecideBatchBody<'a> {
    requests: &'a [EdgeDecideRequest],
}

#[derive(Deserialize)]
struct EdgeDecideBatchResponse {
    responses: Vec<Option<EdgeDecideResponse>>,
}

/// Request for full remote resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    /// Context to resolve for.
    pub context: Context,
    /// Restrict resolution to these parameter keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ResolveBody<'a> {
    context: &'a Context,
    env: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a [String]>,
}

/// Response of remote resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResolveResponse {
    /// The decision, flattened into the response body.
    #[serde(flatten)]
    pub decision: DecisionResult,
    /// Version of the bundle the server resolved with.
    pub state_version: BundleVersion,
    /// Refresh interval suggested by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_refresh_ms: Option<u64>,
}

/// Build a decide request for `policy_id`, deriving the entity id from `entity_keys` exactly as
/// in-process selection does. Returns `None` if any entity key is absent from `context`.
pub fn create_edge_decide_request(
    policy_id: &str,
    entity_keys: &[String],
    context: &Context,
    unit_key_value: &str,
    allocation_count: Option<usize>,
) -> Option<EdgeDecideRequest> {
    let entity_id = derive_entity_id(entity_keys, context)?;
    Some(EdgeDecideRequest {
        policy_id: policy_id.to_owned(),
        entity_id,
        unit_key_value: unit_key_value.to_owned(),
        allocation_count,
        context: Some(context.clone()),
    })
}

/// A client for the decision API.
///
/// # Examples
/// ```no_run
/// # use rollout_core::{DecisionClientConfig, create_edge_decide_request, Context};
/// # async fn run(context: Context) {
/// let client = DecisionClientConfig::from_api_key("api-key").to_client();
/// let keys = vec!["storeId".to_owned()];
/// if let Some(request) = create_edge_decide_request("pol_1", &keys, &context, "user-1", Some(3)) {
///     let response = client.decide_entity(&request, None).await;
/// }
/// # }
/// ```
pub struct DecisionClient<T = ReqwestTransport> {
    config: DecisionClientConfig,
    transport: T,
}

impl DecisionClient {
    /// Create a new `DecisionClient` using the default HTTP transport.
    pub fn new(config: DecisionClientConfig) -> DecisionClient {
        DecisionClient::with_transport(config, ReqwestTransport::new())
    }
}

impl<T: Transport> DecisionClient<T> {
    /// Create a client that sends requests through `transport`.
    pub fn with_transport(config: DecisionClientConfig, transport: T) -> DecisionClient<T> {
        DecisionClient { config, transport }
    }

    /// Fetch the allocation for one entity. Returns `None` on any failure.
    pub async fn decide_entity(
        &self,
        request: &EdgeDecideRequest,
        timeout: Option<Duration>,
    ) -> Option<EdgeDecideResponse> {
        let body = EdgeDecideBody {
            entity_id: &request.entity_id,
            unit_key_value: &request.unit_key_value,
            allocation_count: request.allocation_count,
            context: request.context.as_ref(),
        };
        let path = DECIDE_ENDPOINT
            .iter()
            .copied()
            .chain([request.policy_id.as_str()]);

        self.post(path, &body, timeout.unwrap_or(self.config.decide_timeout))
            .await
            .inspect_err(|err| {
                log::warn!(target: "rollout",
                           policy_id:display = request.policy_id,
                           entity_id:display = request.entity_id;
                           "edge decide request failed: {:?}", err);
            })
            .ok()
    }

    /// Fetch allocations for several entities in one round trip.
    ///
    /// The result is always index-aligned with `requests`; on failure every element is `None`.
    pub async fn decide_entity_batch(
        &self,
        requests: &[EdgeDecideRequest],
        timeout: Option<Duration>,
    ) -> Vec<Option<EdgeDecideResponse>> {
        match requests {
            [] => return Vec::new(),
            [request] => return vec![self.decide_entity(request, timeout).await],
            _ => {}
        }

        let result = self
            .post::<_, EdgeDecideBatchResponse>(
                DECIDE_BATCH_ENDPOINT.iter().copied(),
                &EdgeDecideBatchBody { requests },
                timeout.unwrap_or(self.config.decide_timeout),
            )
            .await;

        match result {
            Ok(batch) if batch.responses.len() == requests.len() => batch.responses,
            Ok(batch) => {
                log::warn!(target: "rollout",
                           expected = requests.len(),
                           received = batch.responses.len();
                           "edge decide batch response is misaligned with requests");
                vec![None; requests.len()]
            }
            Err(err) => {
                log::warn!(target: "rollout",
                           requests = requests.len();
                           "edge decide batch request failed: {:?}", err);
                vec![None; requests.len()]
            }
        }
    }

    /// Resolve parameters remotely. Returns `None` on any failure.
    pub async fn resolve(
        &self,
        request: &ResolveRequest,
        timeout: Option<Duration>,
    ) -> Option<ServerResolveResponse> {
        let body = ResolveBody {
            context: &request.context,
            env: &self.config.env,
            parameters: request.parameters.as_deref(),
        };

        self.post(
            RESOLVE_ENDPOINT.iter().copied(),
            &body,
            timeout.unwrap_or(self.config.resolve_timeout),
        )
        .await
        .inspect_err(|err| {
            log::warn!(target: "rollout", "resolve request failed: {:?}", err);
        })
        .ok()
    }

    /// Pre-fetch results for every running edge-mode policy in `bundle` the unit is eligible for.
    ///
    /// The returned map can be passed to [`resolve`](crate::resolve) as
    /// [`ResolveOptions::edge_results`](crate::ResolveOptions). Policies whose entity cannot be
    /// identified, and failed lookups, are left out.
    pub async fn fetch_edge_results(
        &self,
        bundle: &ConfigBundle,
        context: &Context,
        timeout: Option<Duration>,
    ) -> EdgeResults {
        let Some(unit_key_value) =
            lookup_field(context, &bundle.hashing.unit_key).and_then(key_string)
        else {
            return EdgeResults::new();
        };

        let mut requests = Vec::new();
        for layer in &bundle.layers {
            let bucket = compute_bucket(&unit_key_value, &layer.id, bundle.hashing.bucket_count);
            for policy in layer.parsed_policies() {
                let Some(entity_config) = policy
                    .entity_config
                    .as_ref()
                    .filter(|config| config.resolution_mode == ResolutionMode::Edge)
                else {
                    continue;
                };
                let eligible = policy.is_running()
                    && policy
                        .eligible_bucket_range
                        .map_or(true, |range| range.contains(bucket))
                    && evaluate_conditions(&policy.conditions, context);
                if !eligible {
                    continue;
                }

                let count = allocation_count(policy, entity_config, context);
                if let Some(request) = create_edge_decide_request(
                    &policy.id,
                    &entity_config.entity_keys,
                    context,
                    &unit_key_value,
                    count,
                ) {
                    requests.push(request);
                }
            }
        }

        let responses = self.decide_entity_batch(&requests, timeout).await;

        requests
            .into_iter()
            .zip(responses)
            .filter_map(|(request, response)| {
                let response = response?;
                Some((
                    request.policy_id,
                    EdgeResult {
                        allocation_index: response.allocation_index,
                        entity_id: request.entity_id,
                    },
                ))
            })
            .collect()
    }

    async fn post<'a, B: Serialize, R: DeserializeOwned>(
        &self,
        path: impl IntoIterator<Item = &'a str>,
        body: &B,
        timeout: Duration,
    ) -> Result<R> {
        let url = self.url(path)?;
        let body = serde_json::to_value(body).map_err(|err| Error::Serialization(err.into()))?;

        log::debug!(target: "rollout", url:display = url; "sending request");

        let request = HttpRequest {
            url,
            headers: self.config.headers(),
            body,
            timeout,
        };
        let response = tokio::time::timeout(timeout, self.transport.post_json(request))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        serde_json::from_value(response).map_err(|err| Error::InvalidResponse(err.into()))
    }

    fn url<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url).map_err(Error::InvalidBaseUrl)?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use serde_json::{json, Value};

    use crate::{
        engine::{
            resolve,
            tests::{context, defaults, layered_bundle},
            ResolveOptions,
        },
        transport::{HttpRequest, Transport},
        DecisionClientConfig, Error, Result,
    };

    use super::{create_edge_decide_request, DecisionClient, EdgeDecideRequest, ResolveRequest};

    /// Records requests and replays canned responses in order.
    #[derive(Clone, Default)]
    struct RecordingTransport {
        requests: Arc<Mutex<Vec<HttpRequest>>>,
        responses: Arc<Mutex<VecDeque<Result<Value>>>>,
        delay: Option<Duration>,
    }

    impl RecordingTransport {
        fn replying(responses: impl IntoIterator<Item = Result<Value>>) -> Self {
            RecordingTransport {
                responses: Arc::new(Mutex::new(responses.into_iter().collect())),
                ..Default::default()
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        async fn post_json(&self, request: HttpRequest) -> Result<Value> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let response = self.responses.lock().unwrap().pop_front();
            response.unwrap_or(Err(Error::Status(500)))
        }
    }

    fn client(transport: RecordingTransport) -> DecisionClient<RecordingTransport> {
        DecisionClient::with_transport(
            DecisionClientConfig::from_api_key("secret")
                .with_base_url("https://decisions.test/api/")
                .with_org_id("org_test")
                .with_project_id("proj_test")
                .with_env("staging"),
            transport,
        )
    }

    fn request(policy_id: &str, entity_id: &str) -> EdgeDecideRequest {
        EdgeDecideRequest {
            policy_id: policy_id.to_owned(),
            entity_id: entity_id.to_owned(),
            unit_key_value: "user-1".to_owned(),
            allocation_count: Some(3),
            context: None,
        }
    }

    fn decide_response(index: usize) -> Value {
        json!({
            "allocationIndex": index,
            "allocationName": index.to_string(),
            "weights": [0.2, 0.3, 0.5],
            "coldStart": false,
            "stateVersion": 42
        })
    }

    #[test]
    fn edge_request_joins_entity_keys() {
        let ctx = context(json!({"storeId": "s1", "channel": "web", "userId": "u1"}));
        let keys = vec!["storeId".to_owned(), "channel".to_owned()];
        let request = create_edge_decide_request("pol_1", &keys, &ctx, "u1", Some(4)).unwrap();
        assert_eq!(request.policy_id, "pol_1");
        assert_eq!(request.entity_id, "s1_web");
        assert_eq!(request.unit_key_value, "u1");
        assert_eq!(request.allocation_count, Some(4));
        assert_eq!(request.context, Some(ctx));
    }

    #[test]
    fn edge_request_requires_all_entity_keys() {
        let ctx = context(json!({"storeId": "s1"}));
        let keys = vec!["storeId".to_owned(), "channel".to_owned()];
        assert_eq!(create_edge_decide_request("pol_1", &keys, &ctx, "u1", None), None);
    }

    #[tokio::test]
    async fn decide_entity_posts_to_policy_endpoint() {
        let transport = RecordingTransport::replying([Ok(decide_response(2))]);
        let client = client(transport.clone());

        let response = client
            .decide_entity(&request("pol_1", "s1"), None)
            .await
            .unwrap();
        assert_eq!(response.allocation_index, 2);
        assert_eq!(response.weights, vec![0.2, 0.3, 0.5]);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url.as_str(), "https://decisions.test/api/v1/decide/pol_1");
        assert_eq!(
            sent[0].body,
            json!({"entityId": "s1", "unitKeyValue": "user-1", "allocationCount": 3})
        );
        assert_eq!(sent[0].timeout, DecisionClientConfig::DEFAULT_DECIDE_TIMEOUT);

        let header = |name| {
            sent[0]
                .headers
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(header("Authorization"), Some("Bearer secret"));
        assert_eq!(header("Content-Type"), Some("application/json"));
        assert_eq!(header("X-Org-Id"), Some("org_test"));
        assert_eq!(header("X-Project-Id"), Some("proj_test"));
        assert_eq!(header("X-Env"), Some("staging"));
    }

    #[tokio::test]
    async fn decide_entity_returns_none_on_failure() {
        let transport = RecordingTransport::replying([Err(Error::Status(503))]);
        assert_eq!(
            client(transport).decide_entity(&request("pol_1", "s1"), None).await,
            None
        );

        let transport = RecordingTransport::replying([Ok(json!({"unexpected": true}))]);
        assert_eq!(
            client(transport).decide_entity(&request("pol_1", "s1"), None).await,
            None
        );
    }

    #[tokio::test]
    async fn decide_entity_times_out() {
        let transport = RecordingTransport {
            delay: Some(Duration::from_millis(500)),
            ..RecordingTransport::replying([Ok(decide_response(0))])
        };
        let response = client(transport)
            .decide_entity(&request("pol_1", "s1"), Some(Duration::from_millis(20)))
            .await;
        assert_eq!(response, None);
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let transport = RecordingTransport::default();
        let responses = client(transport.clone()).decide_entity_batch(&[], None).await;
        assert!(responses.is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn single_element_batch_uses_single_endpoint() {
        let transport =
            RecordingTransport::replying([Ok(decide_response(1)), Ok(decide_response(1))]);
        let client = client(transport.clone());

        let batched = client
            .decide_entity_batch(&[request("pol_1", "s1")], None)
            .await;
        let direct = client.decide_entity(&request("pol_1", "s1"), None).await;

        assert_eq!(batched, vec![direct]);
        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url, sent[1].url);
        assert_eq!(sent[0].body, sent[1].body);
    }

    #[tokio::test]
    async fn batch_posts_once_and_keeps_alignment() {
        let transport = RecordingTransport::replying([Ok(json!({
            "responses": [decide_response(0), null]
        }))]);
        let client = client(transport.clone());

        let responses = client
            .decide_entity_batch(&[request("pol_1", "s1"), request("pol_2", "s2")], None)
            .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].as_ref().unwrap().allocation_index, 0);
        assert_eq!(responses[1], None);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url.as_str(), "https://decisions.test/api/v1/decide/batch");
        assert_eq!(sent[0].body["requests"][1]["policyId"], json!("pol_2"));
    }

    #[tokio::test]
    async fn failed_batch_yields_all_none() {
        let transport = RecordingTransport::replying([Err(Error::Status(502))]);
        let responses = client(transport)
            .decide_entity_batch(&[request("pol_1", "s1"), request("pol_2", "s2")], None)
            .await;
        assert_eq!(responses, vec![None, None]);
    }

    #[tokio::test]
    async fn batch_over_unreachable_network_yields_all_none() {
        let client = DecisionClientConfig::from_api_key("secret")
            .with_base_url("http://127.0.0.1:9")
            .with_decide_timeout(Duration::from_millis(500))
            .to_client();
        let responses = client
            .decide_entity_batch(&[request("pol_1", "s1"), request("pol_2", "s2")], None)
            .await;
        assert_eq!(responses, vec![None, None]);
    }

    #[tokio::test]
    async fn misaligned_batch_response_yields_all_none() {
        let transport = RecordingTransport::replying([Ok(json!({
            "responses": [decide_response(0)]
        }))]);
        let responses = client(transport)
            .decide_entity_batch(&[request("pol_1", "s1"), request("pol_2", "s2")], None)
            .await;
        assert_eq!(responses, vec![None, None]);
    }

    #[tokio::test]
    async fn resolve_sends_env_and_parses_response() {
        let transport = RecordingTransport::replying([Ok(json!({
            "decisionId": "d-1",
            "assignments": {"button_color": "green"},
            "metadata": {
                "timestamp": "2024-06-10T12:00:00Z",
                "unitKeyValue": "user-abc",
                "layers": [{"layerId": "layer_ui", "bucket": 551, "policyId": "pol_ui"}]
            },
            "stateVersion": "v7",
            "suggestedRefreshMs": 30000
        }))]);
        let client = client(transport.clone());

        let response = client
            .resolve(
                &ResolveRequest {
                    context: context(json!({"userId": "user-abc"})),
                    parameters: Some(vec!["button_color".to_owned()]),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.decision.decision_id, "d-1");
        assert_eq!(response.decision.metadata.layers[0].bucket, 551);
        assert_eq!(response.state_version.to_string(), "v7");
        assert_eq!(response.suggested_refresh_ms, Some(30000));

        let sent = transport.requests();
        assert_eq!(sent[0].url.as_str(), "https://decisions.test/api/v1/resolve");
        assert_eq!(
            sent[0].body,
            json!({
                "context": {"userId": "user-abc"},
                "env": "staging",
                "parameters": ["button_color"]
            })
        );
        assert_eq!(sent[0].timeout, DecisionClientConfig::DEFAULT_RESOLVE_TIMEOUT);
    }

    #[tokio::test]
    async fn resolve_returns_none_on_failure() {
        let transport = RecordingTransport::replying([Err(Error::Unauthorized)]);
        assert!(client(transport)
            .resolve(&ResolveRequest::default(), None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn fetched_edge_results_feed_resolution() {
        let bundle = layered_bundle();
        let ctx = context(json!({
            "userId": "user-abc",
            "storeId": "store-1",
            "channel": "web",
            "slotCount": 4
        }));
        let transport = RecordingTransport::replying([Ok(json!({
            "responses": [decide_response(1), decide_response(3)]
        }))]);
        let client = client(transport.clone());

        let edge_results = client.fetch_edge_results(&bundle, &ctx, None).await;
        assert_eq!(edge_results["pol_promo_edge"].allocation_index, 1);
        assert_eq!(edge_results["pol_promo_edge"].entity_id, "store-1_web");
        assert_eq!(edge_results["pol_slots"].allocation_index, 3);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        let requests = &sent[0].body["requests"];
        assert_eq!(requests[0]["policyId"], json!("pol_promo_edge"));
        assert_eq!(requests[0]["allocationCount"], json!(2));
        assert_eq!(requests[1]["policyId"], json!("pol_slots"));
        assert_eq!(requests[1]["allocationCount"], json!(4));

        let resolution = resolve(
            Some(&bundle),
            &ctx,
            &defaults(),
            ResolveOptions {
                edge_results: Some(&edge_results),
            },
        );
        assert_eq!(resolution.assignments["promo_variant"], json!("b"));
    }

    #[tokio::test]
    async fn edge_results_skip_unidentifiable_entities() {
        let bundle = layered_bundle();
        // no storeId: neither edge policy can build an entity id
        let transport = RecordingTransport::default();
        let edge_results = client(transport.clone())
            .fetch_edge_results(&bundle, &context(json!({"userId": "user-abc"})), None)
            .await;
        assert!(edge_results.is_empty());
        assert!(transport.requests().is_empty());
    }
}
