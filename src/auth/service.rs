//! ext_authz authorization service implementation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::grpc::proto::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use crate::grpc::proto::envoy::r#type::v3::{HttpStatus, StatusCode};
use crate::grpc::proto::envoy::service::auth::v3::{
    authorization_server::Authorization, check_response::HttpResponse, CheckRequest,
    CheckResponse, DeniedHttpResponse, OkHttpResponse,
};
use crate::grpc::proto::google::rpc;
use crate::store::{AuthorizeOutcome, DecisionReason, LimitStore, REQUEST_COST};

use super::token::BotToken;

// Machine reasons for checks that never reach a settled store decision.
const REASON_MISSING_ATTRIBUTES: &str = "missing_http_attributes";
const REASON_INVALID_TOKEN: &str = "invalid_bot_token";
const REASON_STORE_FAILURE: &str = "rate_limit_error";

// Retry hints: the rate window expires in 1 s; quota periods are managed by
// the operator, so clients get a coarse one-hour backoff.
const RETRY_AFTER_RATE: &str = "1";
const RETRY_AFTER_QUOTA: &str = "3600";

/// JSON body attached to every denied response.
#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

/// Implementation of the Envoy ext_authz Authorization gRPC interface.
pub struct AuthorizerService<S> {
    /// The shared limit store
    store: Arc<S>,
}

impl<S> AuthorizerService<S> {
    /// Create a new AuthorizerService backed by the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl<S: LimitStore + 'static> Authorization for AuthorizerService<S> {
    /// Decide whether the request may proceed upstream.
    ///
    /// Every recoverable failure becomes a Deny response; the RPC itself only
    /// errs on conditions tonic cannot represent otherwise.
    #[instrument(skip(self, request))]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        let http = req
            .attributes
            .as_ref()
            .and_then(|attributes| attributes.request.as_ref())
            .and_then(|request| request.http.as_ref());

        let Some(http) = http else {
            warn!("Check request carried no HTTP attributes");
            return Ok(Response::new(denied(
                StatusCode::Unauthorized,
                REASON_MISSING_ATTRIBUTES,
                "No HTTP attributes found",
                None,
            )));
        };

        let Some(token) = BotToken::from_path(&http.path) else {
            debug!(path = %http.path, "No valid bot token in path");
            return Ok(Response::new(denied(
                StatusCode::Unauthorized,
                REASON_INVALID_TOKEN,
                "Invalid or missing bot token in URL",
                None,
            )));
        };

        let second = unix_now();

        let response = match self.store.authorize(token.tenant(), second, REQUEST_COST).await {
            Ok(outcome) if outcome.allowed => {
                info!(
                    tenant = token.tenant(),
                    usage = outcome.usage,
                    quota = outcome.quota,
                    "Request authorized"
                );
                allowed(&token, &outcome)
            }
            Ok(outcome) => {
                info!(
                    tenant = token.tenant(),
                    reason = outcome.reason.as_str(),
                    usage = outcome.usage,
                    counter = outcome.counter,
                    "Request denied"
                );
                denied_for(&outcome)
            }
            Err(e) => {
                error!(tenant = token.tenant(), error = %e, "Authorization check failed");
                denied(
                    StatusCode::InternalServerError,
                    REASON_STORE_FAILURE,
                    "Internal rate limiting error",
                    None,
                )
            }
        };

        Ok(Response::new(response))
    }
}

/// Current unix second; the rate window identifier.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn header(key: &str, value: String) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the OK response carrying the informational limit headers.
///
/// The same list rides in `headers` (injected into the forwarded upstream
/// request) and `response_headers_to_add` (injected onto the client response).
fn allowed(token: &BotToken, outcome: &AuthorizeOutcome) -> CheckResponse {
    let headers = vec![
        header("x-bot-token", token.as_str().to_string()),
        header(
            "x-quota-remaining",
            (outcome.quota - outcome.usage).to_string(),
        ),
        header("x-quota-limit", outcome.quota.to_string()),
        header("x-rate-limit", outcome.rate_limit.to_string()),
        header("content-type", "application/json".to_string()),
    ];

    CheckResponse {
        status: Some(rpc::Status {
            code: tonic::Code::Ok as i32,
            message: String::new(),
        }),
        http_response: Some(HttpResponse::OkResponse(OkHttpResponse {
            headers: headers.clone(),
            response_headers_to_add: headers,
            ..Default::default()
        })),
    }
}

/// Map a settled deny outcome onto the wire taxonomy.
fn denied_for(outcome: &AuthorizeOutcome) -> CheckResponse {
    match outcome.reason {
        DecisionReason::RateExceeded => denied(
            StatusCode::TooManyRequests,
            outcome.reason.as_str(),
            "Rate limit exceeded - too many requests per second",
            Some(RETRY_AFTER_RATE),
        ),
        DecisionReason::QuotaExceeded => denied(
            StatusCode::TooManyRequests,
            outcome.reason.as_str(),
            &format!(
                "Bot quota exceeded ({}/{} requests used)",
                outcome.usage, outcome.quota
            ),
            Some(RETRY_AFTER_QUOTA),
        ),
        // A non-allowed outcome tagged success is outside the script contract.
        DecisionReason::Success => denied(
            StatusCode::InternalServerError,
            REASON_STORE_FAILURE,
            "Rate limit exceeded",
            None,
        ),
    }
}

fn denied(
    status: StatusCode,
    reason: &str,
    message: &str,
    retry_after: Option<&'static str>,
) -> CheckResponse {
    let mut headers = vec![header("x-rate-limit-reason", reason.to_string())];
    if let Some(seconds) = retry_after {
        headers.push(header("retry-after", seconds.to_string()));
    }
    headers.push(header("content-type", "application/json".to_string()));

    let body = serde_json::to_string(&ErrorBody {
        error: reason,
        message,
    })
    .unwrap_or_default();

    CheckResponse {
        status: Some(rpc::Status {
            code: tonic::Code::PermissionDenied as i32,
            message: message.to_string(),
        }),
        http_response: Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
            status: Some(HttpStatus {
                code: status.into(),
            }),
            headers,
            body,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::proto::envoy::service::auth::v3::attribute_context::{
        HttpRequest, Request as AttributeRequest,
    };
    use crate::grpc::proto::envoy::service::auth::v3::AttributeContext;
    use crate::store::memory::{FailingStore, MemoryStore};

    fn check_request(path: &str) -> Request<CheckRequest> {
        Request::new(CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(AttributeRequest {
                    http: Some(HttpRequest {
                        method: "POST".to_string(),
                        path: path.to_string(),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
        })
    }

    fn header_value<'a>(headers: &'a [HeaderValueOption], key: &str) -> Option<&'a str> {
        headers
            .iter()
            .filter_map(|option| option.header.as_ref())
            .find(|header| header.key == key)
            .map(|header| header.value.as_str())
    }

    fn denied_response(response: CheckResponse) -> DeniedHttpResponse {
        match response.http_response {
            Some(HttpResponse::DeniedResponse(denied)) => denied,
            other => panic!("expected denied response, got {other:?}"),
        }
    }

    fn ok_response(response: CheckResponse) -> OkHttpResponse {
        match response.http_response {
            Some(HttpResponse::OkResponse(ok)) => ok,
            other => panic!("expected ok response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_allow_injects_limit_headers() {
        let store = Arc::new(MemoryStore::new());
        store.set_rate_limit(42, 10);
        store.set_quota(42, 3);
        let service = AuthorizerService::new(store);

        let response = service
            .check(check_request("/bot42:XYZ/getMe"))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.status.as_ref().unwrap().code, tonic::Code::Ok as i32);
        let ok = ok_response(response);
        assert_eq!(header_value(&ok.headers, "x-bot-token"), Some("42:XYZ"));
        assert_eq!(header_value(&ok.headers, "x-quota-remaining"), Some("2"));
        assert_eq!(header_value(&ok.headers, "x-quota-limit"), Some("3"));
        assert_eq!(header_value(&ok.headers, "x-rate-limit"), Some("10"));
        assert_eq!(
            header_value(&ok.headers, "content-type"),
            Some("application/json")
        );
        // The same headers land on the client response.
        assert_eq!(
            header_value(&ok.response_headers_to_add, "x-quota-remaining"),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_quota_remaining_counts_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_rate_limit(42, 10);
        store.set_quota(42, 3);
        let service = AuthorizerService::new(store);

        let first = ok_response(
            service
                .check(check_request("/bot42:XYZ/getMe"))
                .await
                .unwrap()
                .into_inner(),
        );
        let second = ok_response(
            service
                .check(check_request("/bot42:XYZ/getMe"))
                .await
                .unwrap()
                .into_inner(),
        );

        assert_eq!(header_value(&first.headers, "x-quota-remaining"), Some("2"));
        assert_eq!(header_value(&second.headers, "x-quota-remaining"), Some("1"));
    }

    #[tokio::test]
    async fn test_rate_breach_denies_with_retry_after_one() {
        let store = Arc::new(MemoryStore::new());
        store.set_rate_limit(42, 0);
        store.set_quota(42, 100);
        let service = AuthorizerService::new(store);

        let response = service
            .check(check_request("/bot42:XYZ/getMe"))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            denied.status.as_ref().unwrap().code,
            i32::from(StatusCode::TooManyRequests)
        );
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("rate_exceeded")
        );
        assert_eq!(header_value(&denied.headers, "retry-after"), Some("1"));

        let body: serde_json::Value = serde_json::from_str(&denied.body).unwrap();
        assert_eq!(body["error"], "rate_exceeded");
        assert_eq!(
            body["message"],
            "Rate limit exceeded - too many requests per second"
        );
    }

    #[tokio::test]
    async fn test_quota_breach_denies_with_retry_after_hour() {
        let store = Arc::new(MemoryStore::new());
        store.set_rate_limit(42, 10);
        store.set_quota(42, 2);
        let service = AuthorizerService::new(store.clone());

        for _ in 0..2 {
            service
                .check(check_request("/bot42:XYZ/getMe"))
                .await
                .unwrap();
        }

        let response = service
            .check(check_request("/bot42:XYZ/getMe"))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("quota_exceeded")
        );
        assert_eq!(header_value(&denied.headers, "retry-after"), Some("3600"));

        let body: serde_json::Value = serde_json::from_str(&denied.body).unwrap();
        assert_eq!(body["error"], "quota_exceeded");
        assert_eq!(body["message"], "Bot quota exceeded (2/2 requests used)");
        // The denied request reserved no quota.
        assert_eq!(store.usage(42), 2);
    }

    #[tokio::test]
    async fn test_unprovisioned_tenant_denied_as_rate_exceeded() {
        let store = Arc::new(MemoryStore::new());
        let service = AuthorizerService::new(store);

        let response = service
            .check(check_request("/bot99:XYZ/getMe"))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            denied.status.as_ref().unwrap().code,
            i32::from(StatusCode::TooManyRequests)
        );
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("rate_exceeded")
        );
    }

    #[tokio::test]
    async fn test_malformed_token_denies_without_store_access() {
        let store = Arc::new(MemoryStore::new());
        let service = AuthorizerService::new(store.clone());

        let response = service
            .check(check_request("/botabc/getMe"))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            denied.status.as_ref().unwrap().code,
            i32::from(StatusCode::Unauthorized)
        );
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("invalid_bot_token")
        );
        assert!(header_value(&denied.headers, "retry-after").is_none());
        assert_eq!(store.authorize_calls(), 0);

        let body: serde_json::Value = serde_json::from_str(&denied.body).unwrap();
        assert_eq!(body["message"], "Invalid or missing bot token in URL");
    }

    #[tokio::test]
    async fn test_missing_http_attributes_denied() {
        let store = Arc::new(MemoryStore::new());
        let service = AuthorizerService::new(store);

        let response = service
            .check(Request::new(CheckRequest::default()))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            denied.status.as_ref().unwrap().code,
            i32::from(StatusCode::Unauthorized)
        );
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("missing_http_attributes")
        );
    }

    #[tokio::test]
    async fn test_store_failure_denies_with_internal_error() {
        let service = AuthorizerService::new(Arc::new(FailingStore));

        let response = service
            .check(check_request("/bot42:XYZ/getMe"))
            .await
            .unwrap()
            .into_inner();

        let denied = denied_response(response);
        assert_eq!(
            denied.status.as_ref().unwrap().code,
            i32::from(StatusCode::InternalServerError)
        );
        assert_eq!(
            header_value(&denied.headers, "x-rate-limit-reason"),
            Some("rate_limit_error")
        );
        assert!(header_value(&denied.headers, "retry-after").is_none());
    }
}
