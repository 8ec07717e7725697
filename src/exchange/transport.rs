//! Terminal HTTP stage.
//!
//! POSTs `{query, variables, operationName}` to the operation's URL with the
//! headers from its fetch options and classifies the response:
//!
//! - HTTP 401, or any GraphQL error whose `extensions.code` is
//!   `UNAUTHENTICATED` → `Authentication`
//! - other GraphQL errors → `GraphQl`, partial `data` kept
//! - send failure, unparseable body, non-2xx without a GraphQL body → `Network`

use super::{from_future, Exchange, Next, ResultStream};
use crate::error::{ExchangeError, GraphQlError};
use crate::operation::{Operation, OperationKind, OperationResult, ResultSource};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Clone)]
pub struct TransportExchange {
    client: reqwest::Client,
}

impl TransportExchange {
    /// Use an existing HTTP client, sharing its connection pool.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(client: reqwest::Client, operation: Operation) -> OperationResult {
        let network_error = |message: String| {
            OperationResult::from_error(
                &operation,
                ExchangeError::Network { message },
                ResultSource::Network,
            )
        };

        let body = GraphQlRequest {
            query: operation.document(),
            variables: operation.variables(),
            operation_name: operation.operation_name(),
        };

        let mut request = client.post(&operation.context().url).json(&body);
        for (name, value) in &operation.context().fetch_options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(key = %operation.key(), "GraphQL request failed: {}", e);
                return network_error(format!("Failed to send GraphQL request: {}", e));
            }
        };

        let status = response.status();
        debug!(key = %operation.key(), %status, "GraphQL response received");

        if status == StatusCode::UNAUTHORIZED {
            return OperationResult::from_error(
                &operation,
                ExchangeError::authentication(format!("API rejected credentials ({})", status)),
                ResultSource::Network,
            );
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return network_error(format!("Failed to read GraphQL response: {}", e)),
        };

        let parsed: GraphQlResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return network_error(format!("GraphQL API error ({}): {}", status, text));
            }
            Err(e) => return network_error(format!("Failed to parse GraphQL response: {}", e)),
        };

        classify(&operation, status, parsed)
    }
}

fn classify(operation: &Operation, status: StatusCode, response: GraphQlResponse) -> OperationResult {
    let errors = response.errors.unwrap_or_default();

    if let Some(denied) = errors.iter().find(|e| e.is_unauthenticated()) {
        return OperationResult::from_error(
            operation,
            ExchangeError::authentication(&denied.message),
            ResultSource::Network,
        );
    }

    if !errors.is_empty() {
        return OperationResult {
            key: operation.key(),
            kind: operation.kind(),
            data: response.data.filter(|data| !data.is_null()),
            error: Some(ExchangeError::GraphQl { errors }),
            stale: false,
            source: ResultSource::Network,
        };
    }

    match response.data {
        Some(data) if status.is_success() && !data.is_null() => {
            OperationResult::from_data(operation, data, ResultSource::Network)
        }
        _ if !status.is_success() => OperationResult::from_error(
            operation,
            ExchangeError::network(format!("GraphQL API error ({})", status)),
            ResultSource::Network,
        ),
        _ => OperationResult::from_error(
            operation,
            ExchangeError::network("GraphQL response carried neither data nor errors"),
            ResultSource::Network,
        ),
    }
}

impl Default for TransportExchange {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl Exchange for TransportExchange {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn call(&self, operation: Operation, _next: Next) -> ResultStream {
        if operation.kind() == OperationKind::Subscription {
            warn!(key = %operation.key(), "Subscriptions are not supported over HTTP");
            return super::once(OperationResult::from_error(
                &operation,
                ExchangeError::network("subscriptions are not supported by the HTTP transport"),
                ResultSource::Synthesized,
            ));
        }
        let client = self.client.clone();
        from_future(Self::send(client, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{compose, first_result, Exchange};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    async fn execute(server: &MockServer, op: Operation) -> OperationResult {
        let op = op.with_url(format!("{}/api/graphql", server.uri()));
        let pipeline = compose(vec![Arc::new(TransportExchange::default()) as Arc<dyn Exchange>]);
        first_result(pipeline.execute(op.clone()), &op).await
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn test_posts_document_variables_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .and(header("Accept-Language", "fr"))
            .and(body_partial_json(json!({
                "query": "query AnimeById($id: ID!) { anime(id: $id) { title } }",
                "variables": { "id": "1" },
                "operationName": "AnimeById"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "anime": { "title": "Cowboy Bebop" } } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let op = Operation::query(
            "query AnimeById($id: ID!) { anime(id: $id) { title } }",
            json!({ "id": "1" }),
        )
        .with_header("Accept-Language", "fr");
        let result = execute(&server, op).await;

        assert!(result.is_success());
        assert_eq!(result.source, ResultSource::Network);
        assert_eq!(result.data.unwrap()["anime"]["title"], "Cowboy Bebop");
    }

    // ==================== Classification Tests ====================

    #[tokio::test]
    async fn test_http_401_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let result = execute(&server, Operation::query("{ viewer { id } }", json!({}))).await;

        assert!(result.is_auth_error());
    }

    #[tokio::test]
    async fn test_unauthenticated_code_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "token expired", "extensions": { "code": "UNAUTHENTICATED" } }]
            })))
            .mount(&server)
            .await;

        let result = execute(&server, Operation::query("{ viewer { id } }", json!({}))).await;

        assert_eq!(result.error, Some(ExchangeError::authentication("token expired")));
    }

    #[tokio::test]
    async fn test_graphql_errors_keep_partial_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "anime": null, "manga": { "id": "2" } },
                "errors": [{ "message": "anime not found", "path": ["anime"] }]
            })))
            .mount(&server)
            .await;

        let result = execute(&server, Operation::query("{ anime manga }", json!({}))).await;

        match result.error {
            Some(ExchangeError::GraphQl { ref errors }) => {
                assert_eq!(errors[0].message, "anime not found");
            }
            ref other => panic!("expected GraphQL error, got {:?}", other),
        }
        assert_eq!(result.data.unwrap()["manga"]["id"], "2");
    }

    #[tokio::test]
    async fn test_server_error_without_graphql_body_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;

        let result = execute(&server, Operation::query("{ a }", json!({}))).await;

        let error = result.error.unwrap();
        assert!(error.is_network());
        assert!(error.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = execute(&server, Operation::query("{ a }", json!({}))).await;

        assert!(result.error.unwrap().is_network());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let op = Operation::query("{ a }", json!({})).with_url("http://127.0.0.1:1/api/graphql");
        let pipeline = compose(vec![Arc::new(TransportExchange::default()) as Arc<dyn Exchange>]);

        let result = first_result(pipeline.execute(op.clone()), &op).await;

        assert!(result.error.unwrap().is_network());
    }

    #[tokio::test]
    async fn test_subscription_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = execute(&server, Operation::subscription("subscription { feed }", json!({}))).await;

        assert_eq!(result.source, ResultSource::Synthesized);
        assert!(result.error.unwrap().is_network());
    }

    #[test]
    fn test_request_omits_missing_operation_name() {
        let variables = json!({});
        let body = GraphQlRequest {
            query: "{ a }",
            variables: &variables,
            operation_name: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, json!({ "query": "{ a }", "variables": {} }));
    }
}
