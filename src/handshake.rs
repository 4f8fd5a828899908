//! Client-side opening handshake (component 4.D): builds the upgrade
//! request and validates the response line-by-line as it streams in,
//! without needing the whole response buffered first.

use crate::error::WebSocketError;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key, has_prefix_ci, trim_ows};
use url::Url;

const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept:";
const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol:";
const LOCATION: &str = "location:";

/// Everything the response validator needs to check the handshake, kept
/// alongside the request so a redirect can rebuild both.
pub struct HandshakeRequest {
    pub host: String,
    pub path: String,
    pub key: String,
    pub protocols: Vec<String>,
    pub extra_headers: Vec<(String, String)>,
    pub expect: bool,
}

impl HandshakeRequest {
    pub fn new(
        url: &Url,
        protocols: &[String],
        extra_headers: &[(String, String)],
        expect: bool,
    ) -> Result<Self, WebSocketError> {
        crate::config::validate_extra_headers(extra_headers)?;

        let host = url.host_str().ok_or(WebSocketError::UrlNoHost)?.to_string();
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let path = if url.query().is_some() {
            format!("{}?{}", url.path(), url.query().unwrap())
        } else {
            url.path().to_string()
        };

        Ok(HandshakeRequest {
            host,
            path,
            key: generate_websocket_key(),
            protocols: protocols.to_vec(),
            extra_headers: extra_headers.to_vec(),
            expect,
        })
    }

    /// Renders the full HTTP/1.1 upgrade request, ready to be written to
    /// the transport verbatim.
    pub fn render(&self) -> String {
        let mut req = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            path = self.path,
            host = self.host,
            key = self.key,
        );
        if !self.protocols.is_empty() {
            req.push_str(&format!(
                "Sec-WebSocket-Protocol: {}\r\n",
                self.protocols.join(", ")
            ));
        }
        if self.expect {
            req.push_str("Expect: 101\r\n");
        }
        for (name, value) in &self.extra_headers {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        req.push_str("\r\n");
        req
    }
}

/// Outcome of feeding the response validator another batch of header
/// bytes. Mirrors `frame::DecodeOutcome`'s need-more/done shape.
pub enum HandshakeOutcome {
    NeedMore,
    Redirect(Url),
    /// `consumed` is the length of the status-line-plus-headers block per
    /// `httparse::Status::Complete`, so the transport can split any bytes
    /// of the first WebSocket frame that arrived in the same read off the
    /// end of the response buffer.
    Accepted { protocol: Option<String>, consumed: usize },
}

/// Validates a complete set of response headers (status line + header
/// block) against the request that produced them. The transport adapter is
/// responsible for buffering until the blank line that ends the headers;
/// this function only runs once that much is available.
pub fn validate_response(raw: &[u8], request: &HandshakeRequest) -> Result<HandshakeOutcome, WebSocketError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);

    let header_len = match response.parse(raw)? {
        httparse::Status::Partial => return Ok(HandshakeOutcome::NeedMore),
        httparse::Status::Complete(n) => n,
    };

    let code = response.code.unwrap_or(0);

    if (300..400).contains(&code) {
        for header in response.headers.iter() {
            if has_prefix_ci(header.name, &LOCATION[..LOCATION.len() - 1]) {
                let location = std::str::from_utf8(header.value)
                    .map_err(|_| WebSocketError::UnexpectedStatusLine("non-UTF-8 Location".into()))?;
                let url = Url::parse(trim_ows(location))?;
                return Ok(HandshakeOutcome::Redirect(url));
            }
        }
        return Err(WebSocketError::UnexpectedStatusLine(format!(
            "{code} redirect with no Location header"
        )));
    }

    if code != 101 {
        return Err(WebSocketError::UnexpectedStatusLine(format!("status {code}")));
    }

    let expected_accept = generate_websocket_accept_value(&request.key);
    let mut accept_ok = false;
    let mut protocol = None;

    for header in response.headers.iter() {
        let name = header.name;
        let value = std::str::from_utf8(header.value).unwrap_or("");
        if has_prefix_ci(name, &SEC_WEBSOCKET_ACCEPT[..SEC_WEBSOCKET_ACCEPT.len() - 1]) {
            accept_ok = trim_ows(value) == expected_accept;
        } else if has_prefix_ci(name, &SEC_WEBSOCKET_PROTOCOL[..SEC_WEBSOCKET_PROTOCOL.len() - 1]) {
            protocol = Some(trim_ows(value).to_string());
        }
    }

    if !accept_ok {
        return Err(WebSocketError::InvalidAcceptKey);
    }

    Ok(HandshakeOutcome::Accepted { protocol, consumed: header_len })
}
