//! Middleware chains and the built-in request middlewares.
//!
//! Pre-request middleware runs in registration order over `(client,
//! request)`; post-response middleware over `(client, response)`.
//! Errors short-circuit the chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::request::{Part, Payload, Request};
use crate::response::Response;

/// Pre-request middleware.
pub type RequestMiddleware = Arc<dyn Fn(&Client, &mut Request) -> Result<()> + Send + Sync>;

/// Boxed future used by response middleware (digest re-auth needs to
/// re-dispatch, so the chain is async).
pub type MiddlewareFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Post-response middleware.
pub type ResponseMiddleware =
    Arc<dyn for<'a> Fn(&'a Client, &'a mut Response) -> MiddlewareFuture<'a> + Send + Sync>;

/// Resolve the request URL: base URL join, `{path}` parameter
/// substitution, then client and request query parameters.
pub fn resolve_url(client: &Client, request: &Request) -> Result<Url> {
    let mut raw = request.url.clone();

    for (key, value) in client.common_path_params() {
        raw = raw.replace(&format!("{{{key}}}"), value);
    }
    for (key, value) in &request.path_params {
        raw = raw.replace(&format!("{{{key}}}"), value);
    }

    let mut url = match Url::parse(&raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = client
                .base_url()
                .ok_or_else(|| Error::config(format!("relative URL {raw:?} without a base URL")))?;
            let base = Url::parse(base.trim_end_matches('/'))?;
            base.join(&raw)?
        }
        Err(e) => return Err(e.into()),
    };

    if !client.common_query().is_empty() || !request.query_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in client.common_query() {
            pairs.append_pair(k, v);
        }
        for (k, v) in &request.query_params {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Merge client-level default headers under the request's own headers.
/// Request headers win on name conflicts; defaults keep client order.
pub fn merge_headers(client: &Client, request: &mut Request) {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in client.common_headers() {
        if request.header(name).is_none() {
            merged.push((name.clone(), value.clone()));
        }
    }
    merged.append(&mut request.headers);
    request.headers = merged;
}

/// Build the Cookie header from the jar plus client and request
/// cookies.
pub fn merge_cookies(client: &Client, request: &mut Request, url: &Url) {
    let mut pairs: Vec<String> = Vec::new();
    if let Some(jar) = client.cookie_jar() {
        if let Some(header) = jar.cookie_header(url) {
            pairs.push(header);
        }
    }
    for (name, value) in client.common_cookies() {
        pairs.push(format!("{name}={value}"));
    }
    for (name, value) in &request.cookies {
        pairs.push(format!("{name}={value}"));
    }
    if !pairs.is_empty() {
        request.set_header("cookie", pairs.join("; "));
    }
}

/// Serialize the payload into wire bytes and set the content type.
pub fn serialize_body(request: &mut Request) -> Result<()> {
    match &request.payload {
        Payload::None => {
            request.body = None;
        }
        Payload::Bytes(bytes) => {
            request.body = Some(bytes.clone());
        }
        Payload::Stream(factory) => {
            request.body = Some(factory()?);
        }
        Payload::Json(value) => {
            request.body = Some(Bytes::from(serde_json::to_vec(value)?));
            set_content_type_if_absent(request, "application/json; charset=utf-8");
        }
        Payload::Xml(xml) => {
            request.body = Some(Bytes::from(xml.clone().into_bytes()));
            set_content_type_if_absent(request, "text/xml; charset=utf-8");
        }
        Payload::Form(fields) => {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            request.body = Some(Bytes::from(encoded.into_bytes()));
            set_content_type_if_absent(request, "application/x-www-form-urlencoded");
        }
        Payload::Multipart(parts) => {
            let boundary = generate_boundary();
            request.body = Some(encode_multipart(parts, &boundary));
            let content_type = format!("multipart/form-data; boundary={boundary}");
            request.set_header("content-type", content_type);
        }
    }
    Ok(())
}

fn set_content_type_if_absent(request: &mut Request, value: &str) {
    if request.header("content-type").is_none() {
        request.add_header("content-type", value);
    }
}

fn generate_boundary() -> String {
    let mut raw = [0u8; 15];
    let _ = getrandom::getrandom(&mut raw);
    format!("mimic{}", hex::encode(raw))
}

fn encode_multipart(parts: &[Part], boundary: &str) -> Bytes {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_encoding_layout() {
        let parts = vec![
            Part {
                name: "field".to_string(),
                filename: None,
                content_type: None,
                data: Bytes::from_static(b"value"),
            },
            Part {
                name: "file".to_string(),
                filename: Some("a.bin".to_string()),
                content_type: Some("application/octet-stream".to_string()),
                data: Bytes::from_static(b"\x00\x01"),
            },
        ];
        let body = encode_multipart(&parts, "XYZ");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\n"));
        assert!(text.contains("Content-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n"));
        assert!(text.contains("filename=\"a.bin\""));
        assert!(text.contains("Content-Type: application/octet-stream"));
        assert!(text.ends_with("--XYZ--\r\n"));
    }

    #[test]
    fn boundary_is_unique_enough() {
        assert_ne!(generate_boundary(), generate_boundary());
    }

    #[test]
    fn form_serialization() {
        let mut req = Request::new(http::Method::POST, "https://h/");
        req.payload = Payload::Form(vec![
            ("a".to_string(), "1".to_string()),
            ("b c".to_string(), "d&e".to_string()),
        ]);
        serialize_body(&mut req).unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"a=1&b+c=d%26e"[..]));
        assert_eq!(
            req.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn json_serialization_sets_content_type() {
        let mut req = Request::new(http::Method::POST, "https://h/");
        req.payload = Payload::Json(serde_json::json!({"k": "v"}));
        serialize_body(&mut req).unwrap();
        assert_eq!(req.body.as_deref(), Some(&br#"{"k":"v"}"#[..]));
        assert!(req.header("content-type").unwrap().starts_with("application/json"));
    }
}
