use crate::error::ProxyError;
use crate::redirect::{next_hop, Hop, MAX_REDIRECTS};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Body as _;
use hyper::header::LOCATION;
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;

/// Body type flowing through the proxy in both directions.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub fn full_body<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed_unsync()
}

/// Sends one fully-built outbound request to its destination.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ProxyError>;
}

/// Default outbound client: hyper-util with library defaults over
/// `hyper-tls`. Reaches both `http` and `https` destinations and follows up
/// to ten redirects before handing the final response back.
#[derive(Clone)]
pub struct HttpsUpstream {
    client: Client<HttpsConnector<HttpConnector>, ProxyBody>,
}

impl HttpsUpstream {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpsConnector::new()),
        }
    }
}

impl Default for HttpsUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HttpsUpstream {
    async fn send(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ProxyError> {
        let (parts, body) = req.into_parts();

        // An empty body can be sent again on a 307/308; anything else is
        // streamed once and gone.
        let body_replayable = body.is_end_stream();
        let mut body = Some(body);

        let origin = Hop {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            with_body: true,
        };
        let mut current = origin.clone();
        let mut sent = 0;

        loop {
            let hop_body = match body.take() {
                Some(body) if current.with_body => body,
                _ => full_body(Bytes::new()),
            };

            let mut outbound = Request::new(hop_body);
            *outbound.method_mut() = current.method.clone();
            *outbound.uri_mut() = current.uri.clone();
            *outbound.headers_mut() = current.headers.clone();

            let response = self
                .client
                .request(outbound)
                .await
                .map_err(|e| ProxyError::Upstream(e.to_string()))?;
            sent += 1;

            let next = next_hop(
                &origin,
                &current,
                response.status(),
                response.headers().get(LOCATION),
                body_replayable,
            )?;

            let Some(next) = next else {
                return Ok(response.map(|body| body.boxed_unsync()));
            };

            if sent >= MAX_REDIRECTS {
                return Err(ProxyError::Upstream(format!(
                    "stopped after {} redirects",
                    MAX_REDIRECTS
                )));
            }

            debug!(
                "Following {} from {} to {} {}",
                response.status(),
                current.uri,
                next.method,
                next.uri
            );
            current = next;
        }
    }
}
