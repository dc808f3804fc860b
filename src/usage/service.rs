//! ext_proc usage adjustment service implementation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, instrument, trace};

use crate::auth::BotToken;
use crate::grpc::proto::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
};
use crate::grpc::proto::envoy::service::ext_proc::v3::{
    external_processor_server::ExternalProcessor, processing_request, processing_response,
    CommonResponse, HeaderMutation, HeadersResponse, HttpHeaders, ProcessingRequest,
    ProcessingResponse,
};
use crate::store::{LimitStore, REQUEST_COST};

use super::correlation::{CorrelationTable, LimitHeaders};

/// Response statuses that leave the quota reservation in place. Any other
/// status refunds exactly one unit.
const PAID_STATUSES: [u16; 6] = [200, 201, 202, 204, 206, 304];

/// Whether a response status is billable.
pub fn is_paid_status(status: u16) -> bool {
    PAID_STATUSES.contains(&status)
}

/// Implementation of the Envoy ext_proc ExternalProcessor gRPC interface.
pub struct AdjusterService<S> {
    /// The shared limit store
    store: Arc<S>,
    /// In-flight request correlations
    correlations: Arc<CorrelationTable>,
}

// Manual impl: clones share the handles without requiring `S: Clone`.
impl<S> Clone for AdjusterService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            correlations: self.correlations.clone(),
        }
    }
}

impl<S> AdjusterService<S> {
    /// Create a new AdjusterService backed by the given store and table.
    pub fn new(store: Arc<S>, correlations: Arc<CorrelationTable>) -> Self {
        Self {
            store,
            correlations,
        }
    }
}

#[tonic::async_trait]
impl<S: LimitStore + 'static> ExternalProcessor for AdjusterService<S> {
    type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

    /// Handle one proxy processing stream.
    ///
    /// Every inbound message produces exactly one outbound response. Stream
    /// errors end the stream; they never terminate the process.
    #[instrument(skip(self, request))]
    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let service = self.clone();

        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => {
                        let response = service.handle_message(message).await;
                        if tx.send(Ok(response)).await.is_err() {
                            // Peer stopped reading.
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        debug!(error = %status, "Processing stream closed with error");
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

impl<S: LimitStore> AdjusterService<S> {
    /// Dispatch one processing message and build its reply.
    pub(crate) async fn handle_message(&self, message: ProcessingRequest) -> ProcessingResponse {
        use processing_request::Request as Msg;

        match message.request {
            Some(Msg::RequestHeaders(headers)) => self.on_request_headers(headers),
            Some(Msg::ResponseHeaders(headers)) => self.on_response_headers(headers).await,
            // Bodies and trailers are not acted upon; an empty response keeps
            // the stream live.
            _ => ProcessingResponse::default(),
        }
    }

    /// Capture the tenant and limit headers under the correlation id.
    fn on_request_headers(&self, headers: HttpHeaders) -> ProcessingResponse {
        let token = header_value(&headers, "x-bot-token")
            .and_then(|raw| BotToken::from_token(&raw));
        let request_id = header_value(&headers, "x-request-id").filter(|id| !id.is_empty());

        if let (Some(token), Some(request_id)) = (token, request_id) {
            let limits = LimitHeaders {
                quota_remaining: header_value(&headers, "x-quota-remaining").unwrap_or_default(),
                quota_limit: header_value(&headers, "x-quota-limit").unwrap_or_default(),
                rate_limit: header_value(&headers, "x-rate-limit").unwrap_or_default(),
            };
            trace!(
                tenant = token.tenant(),
                request_id = %request_id,
                "Captured request correlation"
            );
            self.correlations.insert(request_id, token.tenant(), limits);
        } else {
            trace!("Request headers without bot token or correlation id");
        }

        ProcessingResponse {
            response: Some(processing_response::Response::RequestHeaders(
                HeadersResponse::default(),
            )),
        }
    }

    /// Settle the request: mirror limit headers and refund non-paid statuses.
    async fn on_response_headers(&self, headers: HttpHeaders) -> ProcessingResponse {
        let status = header_value(&headers, ":status")
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(200);
        let entry = header_value(&headers, "x-request-id")
            .and_then(|request_id| self.correlations.take(&request_id));

        let limits = entry
            .as_ref()
            .map(|entry| entry.headers.clone())
            .unwrap_or_default();

        match &entry {
            Some(entry) if !is_paid_status(status) => {
                match self.store.refund(entry.tenant, REQUEST_COST).await {
                    Ok(refund) => info!(
                        tenant = entry.tenant,
                        status,
                        usage = refund.usage,
                        refunded = refund.refunded,
                        "Refunded usage for non-paid response"
                    ),
                    // Logged and swallowed; the stream proceeds.
                    Err(e) => error!(
                        tenant = entry.tenant,
                        status,
                        error = %e,
                        "Failed to refund usage"
                    ),
                }
            }
            Some(entry) => {
                debug!(tenant = entry.tenant, status, "Paid response, usage kept");
            }
            None => {
                debug!(status, "Response headers without correlation entry");
            }
        }

        ProcessingResponse {
            response: Some(processing_response::Response::ResponseHeaders(
                HeadersResponse {
                    response: Some(CommonResponse {
                        header_mutation: Some(HeaderMutation {
                            set_headers: mirror_headers(&limits),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                },
            )),
        }
    }
}

/// Read a header, accepting both the `value` and `raw_value` encodings.
fn header_value(headers: &HttpHeaders, name: &str) -> Option<String> {
    headers
        .headers
        .as_ref()?
        .headers
        .iter()
        .find(|header| header.key == name)
        .map(|header| {
            if !header.value.is_empty() {
                header.value.clone()
            } else {
                String::from_utf8_lossy(&header.raw_value).into_owned()
            }
        })
}

fn mirror_headers(limits: &LimitHeaders) -> Vec<HeaderValueOption> {
    vec![
        overwrite_header("x-quota-remaining", limits.quota_remaining.clone()),
        overwrite_header("x-quota-limit", limits.quota_limit.clone()),
        overwrite_header("x-rate-limit", limits.rate_limit.clone()),
    ]
}

fn overwrite_header(key: &str, value: String) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value,
            ..Default::default()
        }),
        // Overwrite so values injected at authorization time are not doubled.
        append_action: HeaderAppendAction::OverwriteIfExistsOrAdd.into(),
        // A missing correlation still mirrors explicit empty values.
        keep_empty_value: true,
    }
}
