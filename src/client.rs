//! Client surface and dispatcher.
//!
//! The builder assembles an immutable [`Client`]; request factories
//! produce [`RequestBuilder`]s whose `send` walks the middleware
//! pipeline, the transport, the redirect policies and the retry loop.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http::Method;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::cookie::{CookieJar, MemoryCookieJar};
use crate::digest::{Challenge, DigestAuth};
use crate::error::{Error, Result};
use crate::fingerprint::{ClientHelloSpec, H2Spec, Profile};
use crate::middleware::{
    merge_cookies, merge_headers, resolve_url, serialize_body, RequestMiddleware,
    ResponseMiddleware,
};
use crate::redirect::{default_policy, RedirectAttempt, RedirectPolicy};
use crate::request::{Part, Payload, Request};
use crate::response::{default_result_state, Response, ResultState};
use crate::retry::{backoff_interval, fixed_interval, RetryCondition, RetryHook, RetryPolicy};
use crate::transport::Transport;
use crate::version::HttpVersion;

/// Factory producing fresh cookie jars on [`Client::deep_clone`].
pub type JarFactory = Arc<dyn Fn() -> Arc<dyn CookieJar> + Send + Sync>;

/// Hook fired once per terminal failure, after retries are exhausted.
pub type ErrorHook = Arc<dyn Fn(&Client, &Request, Option<&Response>, &Error) + Send + Sync>;

/// Override for the result-state classification.
pub type ResultStateCheck = Arc<dyn Fn(&Response) -> ResultState + Send + Sync>;

struct ClientCore {
    transport: Transport,
    base_url: Option<String>,
    common_headers: Vec<(String, String)>,
    common_query: Vec<(String, String)>,
    common_path_params: HashMap<String, String>,
    common_cookies: Vec<(String, String)>,
    jar: Option<Arc<dyn CookieJar>>,
    jar_factory: Option<JarFactory>,
    before_request: Vec<RequestMiddleware>,
    after_response: Vec<ResponseMiddleware>,
    digest: Option<Arc<DigestAuth>>,
    retry: RetryPolicy,
    redirect_policies: Vec<RedirectPolicy>,
    result_state_check: Option<ResultStateCheck>,
    timeout: Option<Duration>,
    on_error: Option<ErrorHook>,
}

/// Browser-impersonating HTTP client. Cheap to clone; configuration is
/// immutable after build.
#[derive(Clone)]
pub struct Client {
    core: Arc<ClientCore>,
}

impl Default for Client {
    fn default() -> Self {
        ClientBuilder::new().build()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Deep clone: the transport (and its pool) is rebuilt, the cookie
    /// jar is re-created through its factory, middleware chains are
    /// copied.
    pub fn deep_clone(&self) -> Self {
        let core = &self.core;
        let jar = match &core.jar_factory {
            Some(factory) => Some(factory()),
            None => core.jar.clone(),
        };
        Self {
            core: Arc::new(ClientCore {
                transport: core.transport.deep_clone(),
                base_url: core.base_url.clone(),
                common_headers: core.common_headers.clone(),
                common_query: core.common_query.clone(),
                common_path_params: core.common_path_params.clone(),
                common_cookies: core.common_cookies.clone(),
                jar,
                jar_factory: core.jar_factory.clone(),
                before_request: core.before_request.clone(),
                after_response: core.after_response.clone(),
                digest: core.digest.clone(),
                retry: core.retry.clone(),
                redirect_policies: core.redirect_policies.clone(),
                result_state_check: core.result_state_check.clone(),
                timeout: core.timeout,
                on_error: core.on_error.clone(),
            }),
        }
    }

    // Accessors used by the middleware layer.

    pub fn transport(&self) -> &Transport {
        &self.core.transport
    }

    pub fn base_url(&self) -> Option<&str> {
        self.core.base_url.as_deref()
    }

    pub fn common_headers(&self) -> &[(String, String)] {
        &self.core.common_headers
    }

    pub fn common_query(&self) -> &[(String, String)] {
        &self.core.common_query
    }

    pub fn common_path_params(&self) -> &HashMap<String, String> {
        &self.core.common_path_params
    }

    pub fn common_cookies(&self) -> &[(String, String)] {
        &self.core.common_cookies
    }

    pub fn cookie_jar(&self) -> Option<&Arc<dyn CookieJar>> {
        self.core.jar.as_ref()
    }

    /// Close pooled connections with no in-flight requests.
    pub fn close_idle_connections(&self) {
        self.core.transport.close_idle_connections();
    }

    // Request factories.

    /// Start a request with no method or URL yet.
    pub fn r(&self) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::GET, "")
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PUT, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PATCH, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::DELETE, url)
    }

    pub fn head(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::HEAD, url)
    }

    pub fn options(&self, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::OPTIONS, url)
    }

    /// Dispatch a request: retry loop around single attempts.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let retry = request
            .retry
            .clone()
            .unwrap_or_else(|| self.core.retry.clone());
        let timeout = request.timeout.or(self.core.timeout);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut retries_done: u32 = 0;
        loop {
            request.attempt = retries_done;
            let outcome = self.attempt(&mut request, deadline).await;

            let (response, error) = match &outcome {
                Ok(resp) => (Some(resp), resp.err.as_ref()),
                Err(err) => (None, Some(err)),
            };

            if retry.should_retry(response, error) && retry.allows_retry(retries_done) {
                if !request.is_replayable() {
                    let err = Error::request("cannot retry: request body is not replayable")
                        .with_attempt(&request.url, retries_done);
                    self.fire_on_error(&request, response, &err);
                    return Err(err);
                }
                for hook in &retry.hooks {
                    hook(response, retries_done);
                }
                let sleep = (retry.interval)(response, retries_done);
                debug!(attempt = retries_done, ?sleep, "retrying request");
                if let Some(deadline) = deadline {
                    let now = Instant::now();
                    if now + sleep >= deadline {
                        tokio::time::sleep_until(deadline).await;
                        let err = Error::DeadlineExceeded("deadline expired during retry wait".into())
                            .with_attempt(&request.url, retries_done);
                        self.fire_on_error(&request, response, &err);
                        return Err(err);
                    }
                }
                tokio::time::sleep(sleep).await;
                retries_done += 1;
                continue;
            }

            return match outcome {
                Ok(mut resp) => {
                    if let Some(err) = resp.err.take() {
                        let err = err.with_attempt(&request.url, retries_done);
                        self.fire_on_error(&request, Some(&resp), &err);
                        Err(err)
                    } else {
                        Ok(resp)
                    }
                }
                Err(err) => {
                    let err = err.with_attempt(&request.url, retries_done);
                    self.fire_on_error(&request, None, &err);
                    Err(err)
                }
            };
        }
    }

    fn fire_on_error(&self, request: &Request, response: Option<&Response>, error: &Error) {
        if let Some(hook) = &self.core.on_error {
            hook(self, request, response, error);
        }
    }

    /// One attempt: pre-request middleware, transport (with redirect
    /// following), post-response middleware.
    async fn attempt(&self, request: &mut Request, deadline: Option<Instant>) -> Result<Response> {
        let started = std::time::Instant::now();

        // Built-in pre-request pipeline.
        merge_headers(self, request);
        let mut url = resolve_url(self, request)?;
        merge_cookies(self, request, &url);
        serialize_body(request)?;
        for middleware in &self.core.before_request {
            middleware(self, request)?;
        }

        let mut method = request.method.clone();
        let mut body = request.body.clone();
        let mut history: Vec<Url> = vec![url.clone()];

        let transport_response = loop {
            let uri: http::Uri = url
                .as_str()
                .parse()
                .map_err(|e| Error::request(format!("bad URL {url}: {e}")))?;
            let tr = self
                .core
                .transport
                .round_trip(&method, &uri, &request.headers, body.clone(), request.version, deadline)
                .await?;

            if let Some(jar) = self.cookie_jar() {
                let set_cookies: Vec<String> = tr
                    .headers
                    .iter()
                    .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
                    .map(|(_, v)| v.clone())
                    .collect();
                if !set_cookies.is_empty() {
                    jar.set_cookies(&url, &set_cookies);
                }
            }

            let location = (300..400).contains(&tr.status).then(|| {
                tr.headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case("location"))
                    .map(|(_, v)| v.clone())
            });
            let Some(Some(location)) = location else {
                break tr;
            };
            let next = url
                .join(&location)
                .map_err(|e| Error::request(format!("bad redirect location {location:?}: {e}")))?;

            // First policy error stops the chain and surfaces.
            let attempt_info = RedirectAttempt {
                next: &next,
                history: &history,
            };
            for policy in &self.core.redirect_policies {
                policy(&attempt_info)?;
            }

            debug!(from = %url, to = %next, status = tr.status, "following redirect");
            // 303 always rewrites to GET; 301/302 do for POST.
            if tr.status == 303 || ((tr.status == 301 || tr.status == 302) && method == Method::POST)
            {
                if method != Method::HEAD {
                    method = Method::GET;
                }
                body = None;
                request
                    .headers
                    .retain(|(n, _)| !n.eq_ignore_ascii_case("content-type"));
            }
            history.push(next.clone());
            url = next;
            merge_cookies(self, request, &url);
        };

        let mut response = Response::new(
            transport_response.status,
            transport_response.headers,
            transport_response.body,
        );
        response.trailers = transport_response.trailers;
        response.protocol = transport_response.protocol.to_string();
        response.tls = transport_response.tls;
        response.url = url.to_string();
        response.attempt = request.attempt;
        response.elapsed = started.elapsed();
        response.result_state = match &self.core.result_state_check {
            Some(check) => check(&response),
            None => default_result_state(response.status),
        };
        response.request = Some(Box::new(request.clone()));

        // Post-response pipeline; errors bind to the response.
        if let Some(auth) = &self.core.digest {
            if let Err(err) = self.apply_digest(auth, &mut response).await {
                response.err = Some(err);
            }
        }
        if response.err.is_none() {
            for middleware in &self.core.after_response {
                if let Err(err) = middleware(self, &mut response).await {
                    response.err = Some(err);
                    break;
                }
            }
        }
        Ok(response)
    }
}

impl Client {
    /// Digest re-auth: on a 401 Digest challenge, rebuild the original
    /// request with an Authorization header and round-trip once more.
    /// The new exchange replaces the response in place.
    async fn apply_digest(&self, auth: &DigestAuth, response: &mut Response) -> Result<()> {
        if response.status != 401 {
            return Ok(());
        }
        let Some(challenge_value) = response
            .header("www-authenticate")
            .filter(|v| v.trim_start().starts_with("Digest"))
            .map(str::to_string)
        else {
            return Ok(());
        };
        let challenge = Challenge::parse(&challenge_value)?;
        let Some(original) = response.request.as_deref() else {
            return Ok(());
        };

        let mut request = original.clone();
        request.rematerialize_body()?;
        serialize_body(&mut request)?;

        let url = Url::parse(&response.url)?;
        let digest_uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let authorization = auth.authorization(&challenge, request.method.as_str(), &digest_uri)?;
        request.set_header("authorization", authorization);

        debug!(url = %url, "answering digest challenge");
        let uri: http::Uri = response
            .url
            .parse()
            .map_err(|e| Error::request(format!("bad URL {}: {e}", response.url)))?;
        let tr = self
            .transport()
            .round_trip(
                &request.method,
                &uri,
                &request.headers,
                request.body.clone(),
                request.version,
                None,
            )
            .await?;

        let mut replacement = Response::new(tr.status, tr.headers, tr.body);
        replacement.trailers = tr.trailers;
        replacement.protocol = tr.protocol.to_string();
        replacement.tls = tr.tls;
        replacement.url = response.url.clone();
        replacement.attempt = response.attempt;
        replacement.elapsed = response.elapsed;
        replacement.request = response.request.take();
        *response = replacement;
        Ok(())
    }
}

/// Chainable client configuration.
pub struct ClientBuilder {
    transport: Transport,
    base_url: Option<String>,
    common_headers: Vec<(String, String)>,
    common_query: Vec<(String, String)>,
    common_path_params: HashMap<String, String>,
    common_cookies: Vec<(String, String)>,
    jar_factory: Option<JarFactory>,
    jar_override: Option<Option<Arc<dyn CookieJar>>>,
    before_request: Vec<RequestMiddleware>,
    after_response: Vec<ResponseMiddleware>,
    digest: Option<Arc<DigestAuth>>,
    retry: RetryPolicy,
    redirect_policies: Vec<RedirectPolicy>,
    result_state_check: Option<ResultStateCheck>,
    timeout: Option<Duration>,
    on_error: Option<ErrorHook>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: Transport::new(),
            base_url: None,
            common_headers: Vec::new(),
            common_query: Vec::new(),
            common_path_params: HashMap::new(),
            common_cookies: Vec::new(),
            jar_factory: Some(Arc::new(|| {
                Arc::new(MemoryCookieJar::new()) as Arc<dyn CookieJar>
            })),
            jar_override: None,
            before_request: Vec::new(),
            after_response: Vec::new(),
            digest: None,
            retry: RetryPolicy::default(),
            redirect_policies: vec![default_policy()],
            result_state_check: None,
            timeout: Some(Duration::from_secs(120)),
            on_error: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Route all requests through an HTTP proxy.
    pub fn proxy(mut self, proxy_url: &str) -> Result<Self> {
        self.transport.dialer.set_proxy(proxy_url)?;
        Ok(self)
    }

    /// Dial a Unix socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.transport.dialer.unix_socket = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.dialer.connect_timeout = Some(timeout);
        self
    }

    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.transport.handshaker.options_mut().handshake_timeout = Some(timeout);
        self
    }

    /// Skip certificate verification. Testing only.
    pub fn insecure_skip_verify(mut self) -> Self {
        self.transport.handshaker.options_mut().insecure_skip_verify = true;
        self.transport.h3_config.verify_peer = false;
        self
    }

    /// Add a root CA from PEM content.
    pub fn root_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.transport
            .handshaker
            .options_mut()
            .root_cert_pems
            .push(pem.into());
        self
    }

    /// Load a root CA from a PEM file.
    pub fn root_cert_file(self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let pem = std::fs::read(path.as_ref())
            .map_err(|e| Error::config(format!("failed to read root cert file: {e}")))?;
        Ok(self.root_cert_pem(pem))
    }

    /// Client certificate and key, PEM file paths.
    pub fn client_cert_files(
        mut self,
        cert: impl Into<std::path::PathBuf>,
        key: impl Into<std::path::PathBuf>,
    ) -> Self {
        self.transport.handshaker.options_mut().client_cert = Some((cert.into(), key.into()));
        self
    }

    // Fingerprint configuration.

    /// Configure the TLS ClientHello from a JA3 string. Malformed input
    /// fails without side effects.
    pub fn ja3(mut self, ja3: &str) -> Result<Self> {
        let spec = ClientHelloSpec::from_ja3(ja3)?;
        self.transport.handshaker.set_spec(spec);
        Ok(self)
    }

    /// Configure the TLS ClientHello from a parsed spec.
    pub fn client_hello(mut self, spec: ClientHelloSpec) -> Self {
        self.transport.handshaker.set_spec(spec);
        self
    }

    /// Configure HTTP/2 shaping from an Akamai fingerprint string.
    /// Malformed input fails without side effects.
    pub fn akamai(mut self, spec: &str) -> Result<Self> {
        self.transport.h2_spec = H2Spec::from_akamai(spec)?;
        Ok(self)
    }

    /// Configure HTTP/2 shaping from a parsed spec.
    pub fn h2_spec(mut self, spec: H2Spec) -> Self {
        self.transport.h2_spec = spec;
        self
    }

    /// Apply a browser profile: JA3, Akamai H2, default headers and
    /// header order.
    pub fn impersonate(mut self, profile: Profile) -> Result<Self> {
        self.transport.handshaker.set_spec(profile.client_hello()?);
        self.transport.h2_spec = profile.h2_spec()?;
        self.transport.header_order = Some(profile.header_order());
        for (name, value) in profile.headers() {
            self = self.common_header(name, value);
        }
        Ok(self)
    }

    /// Client-wide regular-header emission order (lowercase names).
    pub fn header_order(mut self, order: Vec<String>) -> Self {
        self.transport.header_order = Some(order);
        self
    }

    // Protocol selection.

    pub fn force_http1(mut self) -> Self {
        self.transport.version = HttpVersion::ForceHttp1;
        self
    }

    pub fn force_http2(mut self) -> Self {
        self.transport.version = HttpVersion::ForceHttp2;
        self
    }

    pub fn force_http3(mut self) -> Self {
        self.transport.version = HttpVersion::ForceHttp3;
        self
    }

    /// Always use HTTP/3 for a specific host.
    pub fn h3_host(mut self, host: impl Into<String>) -> Self {
        self.transport.h3_hosts.push(host.into());
        self
    }

    pub fn enable_h3_datagrams(mut self) -> Self {
        self.transport.h3_config.enable_datagrams = true;
        self
    }

    pub fn allow_get_method_payload(mut self, allow: bool) -> Self {
        self.transport.allow_get_method_payload = allow;
        self
    }

    // Defaults inherited by requests.

    pub fn common_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.common_headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.common_headers.push((name, value.into()));
        self
    }

    pub fn user_agent(self, value: impl Into<String>) -> Self {
        self.common_header("user-agent", value)
    }

    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let header = format!("Bearer {}", token.as_ref());
        self.common_header("authorization", header)
    }

    /// RFC 7617 Basic authentication on every request.
    pub fn basic_auth(self, username: &str, password: &str) -> Self {
        let encoded = BASE64.encode(format!("{username}:{password}"));
        self.common_header("authorization", format!("Basic {encoded}"))
    }

    /// RFC 7616 Digest authentication: answers 401 challenges
    /// automatically.
    pub fn digest_auth(mut self, username: &str, password: &str) -> Self {
        self.digest = Some(DigestAuth::new(username, password));
        self
    }

    pub fn common_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common_query.push((key.into(), value.into()));
        self
    }

    pub fn common_path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common_path_params.insert(key.into(), value.into());
        self
    }

    pub fn common_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.common_cookies.push((name.into(), value.into()));
        self
    }

    // Cookie jar wiring.

    /// Use a specific jar; `deep_clone` will share it.
    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar_override = Some(Some(jar));
        self.jar_factory = None;
        self
    }

    /// Use a factory; `deep_clone` re-creates the jar.
    pub fn cookie_jar_factory(mut self, factory: JarFactory) -> Self {
        self.jar_factory = Some(factory);
        self.jar_override = None;
        self
    }

    pub fn no_cookies(mut self) -> Self {
        self.jar_override = Some(None);
        self.jar_factory = None;
        self
    }

    // Retry knobs.

    /// Maximum retries; negative means unbounded.
    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry.max_retries = count;
        self
    }

    pub fn retry_fixed_interval(mut self, interval: Duration) -> Self {
        self.retry.interval = fixed_interval(interval);
        self
    }

    /// Capped exponential backoff with jitter over `[min, max]`.
    pub fn retry_backoff_interval(mut self, min: Duration, max: Duration) -> Self {
        self.retry.interval = backoff_interval(min, max);
        self
    }

    pub fn add_retry_condition(mut self, condition: RetryCondition) -> Self {
        self.retry.conditions.push(condition);
        self
    }

    pub fn add_retry_hook(mut self, hook: RetryHook) -> Self {
        self.retry.hooks.push(hook);
        self
    }

    // Redirect policy.

    /// Replace the redirect policy chain.
    pub fn redirect_policies(mut self, policies: Vec<RedirectPolicy>) -> Self {
        self.redirect_policies = policies;
        self
    }

    // Hooks and middleware.

    pub fn on_before_request(mut self, middleware: RequestMiddleware) -> Self {
        self.before_request.push(middleware);
        self
    }

    pub fn on_after_response(mut self, middleware: ResponseMiddleware) -> Self {
        self.after_response.push(middleware);
        self
    }

    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn result_state_check(mut self, check: ResultStateCheck) -> Self {
        self.result_state_check = Some(check);
        self
    }

    pub fn build(self) -> Client {
        let jar = match self.jar_override {
            Some(explicit) => explicit,
            None => self.jar_factory.as_ref().map(|f| f()),
        };
        Client {
            core: Arc::new(ClientCore {
                transport: self.transport,
                base_url: self.base_url,
                common_headers: self.common_headers,
                common_query: self.common_query,
                common_path_params: self.common_path_params,
                common_cookies: self.common_cookies,
                jar,
                jar_factory: self.jar_factory,
                before_request: self.before_request,
                after_response: self.after_response,
                digest: self.digest,
                retry: self.retry,
                redirect_policies: self.redirect_policies,
                result_state_check: self.result_state_check,
                timeout: self.timeout,
                on_error: self.on_error,
            }),
        }
    }
}

/// A request under construction, bound to its client.
pub struct RequestBuilder {
    client: Client,
    request: Request,
    build_error: Option<Error>,
}

impl RequestBuilder {
    fn new(client: Client, method: Method, url: impl Into<String>) -> Self {
        Self {
            client,
            request: Request::new(method, url),
            build_error: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.request.url = url.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.add_header(name, value);
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        for (name, value) in headers {
            self.request.add_header(name, value);
        }
        self
    }

    pub fn bearer_auth(mut self, token: impl AsRef<str>) -> Self {
        self.request
            .set_header("authorization", format!("Bearer {}", token.as_ref()));
        self
    }

    pub fn basic_auth(mut self, username: &str, password: &str) -> Self {
        let encoded = BASE64.encode(format!("{username}:{password}"));
        self.request
            .set_header("authorization", format!("Basic {encoded}"));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query_params.push((key.into(), value.into()));
        self
    }

    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.path_params.insert(key.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.cookies.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.payload = Payload::Bytes(body.into());
        self
    }

    /// Streaming body with a restartable factory for retries.
    pub fn body_stream(mut self, factory: crate::request::BodyFactory) -> Self {
        self.request.payload = Payload::Stream(factory);
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => self.request.payload = Payload::Json(v),
            Err(e) => self.build_error = Some(e.into()),
        }
        self
    }

    pub fn xml<T: serde::Serialize>(mut self, value: &T) -> Self {
        match quick_xml::se::to_string(value) {
            Ok(xml) => self.request.payload = Payload::Xml(xml),
            Err(e) => {
                self.build_error = Some(Error::request(format!("XML serialization failed: {e}")))
            }
        }
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.request.payload = Payload::Form(fields);
        self
    }

    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.request.payload = Payload::Multipart(parts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    pub fn version(mut self, version: HttpVersion) -> Self {
        self.request.version = Some(version);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = Some(policy);
        self
    }

    pub fn trace(mut self) -> Self {
        self.request.trace = true;
        self
    }

    /// Take the built request without sending it.
    pub fn into_request(self) -> Result<Request> {
        match self.build_error {
            Some(err) => Err(err),
            None => Ok(self.request),
        }
    }

    /// Send the request through the client's dispatcher.
    pub async fn send(self) -> Result<Response> {
        let client = self.client.clone();
        let request = self.into_request()?;
        client.execute(request).await
    }
}

// Process-wide default client: builder-returns-fresh with an explicit
// override setter.
static DEFAULT_CLIENT: OnceLock<RwLock<Client>> = OnceLock::new();

fn default_cell() -> &'static RwLock<Client> {
    DEFAULT_CLIENT.get_or_init(|| RwLock::new(Client::default()))
}

/// The process-wide default client.
pub fn default_client() -> Client {
    default_cell()
        .read()
        .map(|c| c.clone())
        .unwrap_or_default()
}

/// Override the process-wide default client.
pub fn set_default_client(client: Client) {
    if let Ok(mut slot) = default_cell().write() {
        *slot = client;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_bad_fingerprints() {
        assert!(Client::builder().ja3("bogus").is_err());
        assert!(Client::builder().akamai("also|bogus").is_err());
        assert!(Client::builder().proxy("::: nope").is_err());
    }

    #[test]
    fn impersonate_sets_headers_and_specs() {
        let client = Client::builder().impersonate(Profile::Chrome).unwrap().build();
        assert!(client
            .common_headers()
            .iter()
            .any(|(n, v)| n == "user-agent" && v.contains("Chrome")));
        assert_eq!(client.transport().h2_spec.conn_flow, 15663105);
        assert!(client.transport().handshaker.spec().is_some());
    }

    #[test]
    fn deep_clone_recreates_jar_and_pool() {
        let client = Client::builder().build();
        let url = Url::parse("https://example.com/").unwrap();
        client
            .cookie_jar()
            .unwrap()
            .set_cookies(&url, &["a=1".to_string()]);
        let cloned = client.deep_clone();
        // Fresh jar from the factory: no cookies.
        assert!(cloned.cookie_jar().unwrap().cookie_header(&url).is_none());
        // Original jar unaffected.
        assert!(client.cookie_jar().unwrap().cookie_header(&url).is_some());
    }

    #[test]
    fn shared_jar_survives_deep_clone() {
        let jar: Arc<dyn CookieJar> = Arc::new(MemoryCookieJar::new());
        let client = Client::builder().cookie_jar(Arc::clone(&jar)).build();
        let url = Url::parse("https://example.com/").unwrap();
        jar.set_cookies(&url, &["a=1".to_string()]);
        let cloned = client.deep_clone();
        assert!(cloned.cookie_jar().unwrap().cookie_header(&url).is_some());
    }

    #[test]
    fn default_client_can_be_overridden() {
        let custom = Client::builder().base_url("https://api.example.com").build();
        set_default_client(custom);
        assert_eq!(default_client().base_url(), Some("https://api.example.com"));
        set_default_client(Client::default());
    }

    #[test]
    fn request_builder_collects_build_errors() {
        // serde_json cannot serialize a map with non-string keys.
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], "x");
        let result = default_client().post("https://h/").json(&bad).into_request();
        assert!(result.is_err());
    }
}
