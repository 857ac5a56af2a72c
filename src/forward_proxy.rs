use crate::error::ProxyError;
use crate::logging::{LogCrateSink, LogSink};
use crate::upstream::{full_body, HttpsUpstream, ProxyBody, Upstream};
use http::uri::{Authority, PathAndQuery, Scheme};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST, PROXY_AUTHORIZATION, X_CONTENT_TYPE_OPTIONS};
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use log::{debug, Level};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Single-hop forwarding proxy: every inbound request is rebuilt toward the
/// host it names, sent once, and the destination's response is relayed back.
pub struct ForwardProxy {
    upstream: Arc<dyn Upstream>,
    log: Arc<dyn LogSink>,
}

impl ForwardProxy {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(HttpsUpstream::new()), Arc::new(LogCrateSink))
    }

    pub fn with_parts(upstream: Arc<dyn Upstream>, log: Arc<dyn LogSink>) -> Self {
        Self { upstream, log }
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept loop. One task per connection, no state shared between them
    /// beyond the upstream client and the log sink.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        let addr = listener.local_addr()?;
        self.log
            .write_line(Level::Info, &format!("Starting HTTP proxy server on {}", addr));

        let proxy = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let proxy = proxy.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let proxy = proxy.clone();
                    async move { proxy.handle_request(req.map(|body| body.boxed_unsync())).await }
                });

                if let Err(e) = ServerBuilder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Connection from {} ended: {}", remote_addr, e);
                }
            });
        }
    }

    pub async fn handle_request(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, Infallible> {
        self.log.write_line(
            Level::Info,
            &format!(
                "Received request: {} {} {}",
                req.method(),
                request_host(&req),
                req.uri().path()
            ),
        );

        match self.process_request(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let (status, message) = e.caller_response();
                self.log.write_line(Level::Error, &format!("{}: {}", message, e));
                Ok(error_response(status, message))
            }
        }
    }

    async fn process_request(&self, req: Request<ProxyBody>) -> Result<Response<ProxyBody>, ProxyError> {
        let outbound = build_outbound_request(req)?;
        let target = outbound.uri().clone();

        let response = self.upstream.send(outbound).await?;

        self.log.write_line(
            Level::Info,
            &format!("Received response {} for {}", response.status(), target),
        );

        Ok(relay_response(response))
    }
}

impl Default for ForwardProxy {
    fn default() -> Self {
        Self::new()
    }
}

/// Host as the caller addressed it: URL authority first, then the Host header.
fn request_host<B>(req: &Request<B>) -> &str {
    req.uri()
        .authority()
        .map(|authority| authority.as_str())
        .or_else(|| req.headers().get(HOST).and_then(|host| host.to_str().ok()))
        .unwrap_or("")
}

/// Fill in what origin-form requests leave out. Missing scheme means https;
/// missing authority comes from the Host header.
pub fn resolve_target_uri<B>(req: &Request<B>) -> Result<Uri, ProxyError> {
    let uri = req.uri();

    let scheme = uri.scheme().cloned().unwrap_or(Scheme::HTTPS);

    let authority = match uri.authority() {
        Some(authority) => authority.clone(),
        None => {
            let host = req
                .headers()
                .get(HOST)
                .ok_or_else(|| ProxyError::BuildRequest("request has no host".to_string()))?;
            Authority::try_from(host.as_bytes())
                .map_err(|e| ProxyError::BuildRequest(format!("invalid Host header: {}", e)))?
        }
    };

    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::BuildRequest(e.to_string()))
}

/// Rebuild the inbound request for the destination. The body is moved, not
/// buffered.
pub fn build_outbound_request<B>(req: Request<B>) -> Result<Request<B>, ProxyError> {
    let target = resolve_target_uri(&req)?;
    let (parts, body) = req.into_parts();

    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(target)
        .body(body)
        .map_err(|e| ProxyError::BuildRequest(e.to_string()))?;

    copy_forward_headers(&parts.headers, outbound.headers_mut());

    Ok(outbound)
}

/// Copy every value of every header, then drop the two that belong to the
/// client-to-proxy leg.
pub fn copy_forward_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        to.append(name.clone(), value.clone());
    }

    to.remove(&PROXY_CONNECTION);
    to.remove(PROXY_AUTHORIZATION);
}

/// Status and headers verbatim, body streamed as-is. Response headers are not
/// filtered.
pub fn relay_response(response: Response<ProxyBody>) -> Response<ProxyBody> {
    let (parts, body) = response.into_parts();

    let mut relayed = Response::new(body);
    *relayed.status_mut() = parts.status;
    for (name, value) in parts.headers.iter() {
        relayed.headers_mut().append(name.clone(), value.clone());
    }

    relayed
}

fn error_response(status: hyper::StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(format!("{}\n", message)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    response
}
