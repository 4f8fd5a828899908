//! Batteries-included async transport (ambient §10): the only part of the
//! crate that touches a socket. It owns the `TcpStream`/TLS stream, drives
//! the opening handshake, and then shuttles bytes between the wire and the
//! sans-IO [`Session`] — the same division of labor the original client had
//! between its `connection.rs`/`read.rs`/`write.rs` and its frame codec,
//! just with the codec and close bookkeeping now living in one engine
//! instead of being interleaved with the I/O.
//!
//! Unlike the original `Stream` impl, [`WebSocketStream::poll_next`] never
//! blocks inside a poll: every read and write goes through the transport's
//! own `poll_read`/`poll_write`, propagating `Poll::Pending` instead of
//! parking the executor on `futures::executor::block_on`.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use log::debug;
use pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::WebSocketConfig;
use crate::error::WebSocketError;
use crate::handshake::{self, HandshakeOutcome, HandshakeRequest};
use crate::session::{HandlerResult, Outbound, PullOutcome, Session, WebSocketHandler};

const READ_CHUNK: usize = 8 * 1024;
const HANDSHAKE_READ_CHUNK: usize = 1024;

/// Connection-level settings that live outside the sans-IO engine: where to
/// connect and which TLS roots to trust. Mirrors the original library's
/// split between `WebSocketConfig` (frame/engine limits, owned by
/// `Session`) and `ClientConfig` (`ca_file`, owned by the transport).
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    pub websocket: WebSocketConfig,
    /// Extra PEM-encoded CA certificates to trust alongside the bundled
    /// `webpki-roots` set, the same override the original `ClientConfig::ca_file` gave.
    pub ca_file: Option<String>,
}

/// A plain or TLS-wrapped `TcpStream`, so [`WebSocketStream`] can stay
/// generic over the transport without forcing every caller who already has
/// their own stream type to go through connection setup here.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One inbound occurrence the stream hands back through [`Stream::poll_next`],
/// mirroring `WebSocketHandler`'s callbacks for code that would rather poll
/// an event stream than implement a handler trait.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text(String),
    Binary(Vec<u8>),
    /// Only produced when `FragmentMode::Raw` is configured.
    Fragment { is_text: bool, data: Vec<u8>, is_final: bool },
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: Option<u16>, reason: String },
}

/// `WebSocketHandler` that just records events instead of acting on them,
/// so `WebSocketStream` can present the protocol engine as a plain
/// `futures::Stream` without asking callers to implement the handler trait.
#[derive(Default)]
struct Collector {
    events: Vec<Event>,
}

impl WebSocketHandler for Collector {
    fn on_text(&mut self, text: &str, _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Text(text.to_string()));
        Ok(())
    }

    fn on_binary(&mut self, data: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Binary(data.to_vec()));
        Ok(())
    }

    fn on_fragment(&mut self, is_text: bool, data: &[u8], is_final: bool, _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Fragment { is_text, data: data.to_vec(), is_final });
        Ok(())
    }

    fn on_ping(&mut self, payload: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Ping(payload.to_vec()));
        Ok(())
    }

    fn on_pong(&mut self, payload: &[u8], _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Pong(payload.to_vec()));
        Ok(())
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str, _outbound: &mut Outbound) -> HandlerResult {
        self.events.push(Event::Close { code, reason: reason.to_string() });
        Ok(())
    }
}

/// A live client connection: the sans-IO [`Session`] plus the transport
/// driving it. Implements [`futures::Stream`] for inbound events; outbound
/// sends are plain async methods that queue into the session and then
/// drain the send queue over the wire.
pub struct WebSocketStream<S> {
    io: S,
    session: Session,
    collector: Collector,
    read_buf: Box<[u8]>,
    pending_events: VecDeque<Event>,
    out_buf: Vec<u8>,
    out_pos: usize,
    shutdown_sent: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WebSocketStream<S> {
    fn new(io: S, session: Session, collector: Collector, pending_events: VecDeque<Event>) -> Self {
        WebSocketStream {
            io,
            session,
            collector,
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            pending_events,
            out_buf: Vec::new(),
            out_pos: 0,
            shutdown_sent: false,
        }
    }

    /// Drains whatever the session has queued, writing it to the
    /// transport. Resumable: a partially written buffer survives a
    /// `Poll::Pending` across calls instead of being re-pulled and
    /// duplicated.
    fn poll_flush_outbound(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), WebSocketError>> {
        loop {
            if self.out_pos < self.out_buf.len() {
                match Pin::new(&mut self.io).poll_write(cx, &self.out_buf[self.out_pos..]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into()))
                    }
                    Poll::Ready(Ok(n)) => {
                        self.out_pos += n;
                        continue;
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                    Poll::Pending => return Poll::Pending,
                }
            }

            self.out_buf.clear();
            self.out_pos = 0;
            self.out_buf.resize(READ_CHUNK, 0);
            match self.session.pull_outbound(&mut self.out_buf) {
                PullOutcome::Data(n) => {
                    self.out_buf.truncate(n);
                    continue;
                }
                PullOutcome::Paused => {
                    self.out_buf.clear();
                    return Poll::Ready(Ok(()));
                }
                PullOutcome::Eof => {
                    self.out_buf.clear();
                    if self.shutdown_sent {
                        return Poll::Ready(Ok(()));
                    }
                    match Pin::new(&mut self.io).poll_shutdown(cx) {
                        Poll::Ready(Ok(())) => {
                            self.shutdown_sent = true;
                            return Poll::Ready(Ok(()));
                        }
                        Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<(), WebSocketError> {
        futures::future::poll_fn(|cx| self.poll_flush_outbound(cx)).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        self.session.send_text(text)?;
        self.flush().await
    }

    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.session.send_binary(data)?;
        self.flush().await
    }

    pub async fn send_stream_text(&mut self, first: bool, last: bool, text: &str) -> Result<(), WebSocketError> {
        self.session.send_stream_text(first, last, text)?;
        self.flush().await
    }

    pub async fn send_stream_binary(&mut self, first: bool, last: bool, data: &[u8]) -> Result<(), WebSocketError> {
        self.session.send_stream_binary(first, last, data)?;
        self.flush().await
    }

    pub async fn ping(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.session.ping(payload)?;
        self.flush().await
    }

    pub async fn pong(&mut self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.session.pong(payload)?;
        self.flush().await
    }

    /// Queues a close frame and drains the send queue. Matches the
    /// original client's `close_connection`, minus its fixed post-close
    /// sleep: keep polling this stream until it ends instead of waiting a
    /// fixed duration for the peer's echoing close.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        self.session.close_now(code, reason, true)?;
        self.flush().await
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Stream for WebSocketStream<S> {
    type Item = Result<Event, WebSocketError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending_events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            match this.poll_flush_outbound(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err))),
                Poll::Pending => return Poll::Pending,
            }

            if this.session.is_closed() {
                return Poll::Ready(None);
            }

            let mut read_buf = ReadBuf::new(&mut this.read_buf);
            match Pin::new(&mut this.io).poll_read(cx, &mut read_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        return Poll::Ready(None);
                    }
                    let chunk = read_buf.filled().to_vec();
                    match this.session.receive(&chunk, &mut this.collector) {
                        Ok(_) => {
                            this.pending_events.extend(this.collector.events.drain(..));
                            continue;
                        }
                        Err(err) => return Poll::Ready(Some(Err(err))),
                    }
                }
            }
        }
    }
}

fn build_tls_connector(ca_file: Option<&str>) -> Result<TlsConnector, WebSocketError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_file {
        let file = std::fs::File::open(path)?;
        let mut reader = io::BufReader::new(file);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert?;
            roots
                .add(cert)
                .map_err(|_| WebSocketError::InternalError("invalid CA certificate in ca_file"))?;
        }
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

enum HandshakeResult {
    Accepted { io: MaybeTlsStream, leftover: Vec<u8>, protocol: Option<String> },
    Redirect(Url),
}

/// Writes the upgrade request and reads the response line-by-line,
/// feeding whatever arrives to [`handshake::validate_response`] until it
/// stops asking for more. Any bytes read past the header block belong to
/// the first WebSocket frame and are handed back as `leftover`.
async fn perform_handshake(mut io: MaybeTlsStream, request: &HandshakeRequest) -> Result<HandshakeResult, WebSocketError> {
    io.write_all(request.render().as_bytes()).await?;
    io.flush().await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; HANDSHAKE_READ_CHUNK];

    loop {
        match handshake::validate_response(&buf, request)? {
            HandshakeOutcome::NeedMore => {
                let n = io.read(&mut chunk).await?;
                if n == 0 {
                    return Err(WebSocketError::IoError {
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed during handshake"),
                    });
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            HandshakeOutcome::Redirect(url) => return Ok(HandshakeResult::Redirect(url)),
            HandshakeOutcome::Accepted { protocol, consumed } => {
                let leftover = buf[consumed..].to_vec();
                return Ok(HandshakeResult::Accepted { io, leftover, protocol });
            }
        }
    }
}

/// Connects with the default [`ConnectConfig`] (plain `webpki-roots` trust,
/// default engine limits).
pub async fn connect_async(url: &str) -> Result<WebSocketStream<MaybeTlsStream>, WebSocketError> {
    connect_async_with_config(url, ConnectConfig::default()).await
}

/// Resolves `url`, opens a TCP connection (wrapped in TLS for `wss://`),
/// performs the opening handshake — following redirects up to
/// `config.websocket.max_redirects` times — and returns a stream ready to
/// exchange application messages.
pub async fn connect_async_with_config(
    url: &str,
    config: ConnectConfig,
) -> Result<WebSocketStream<MaybeTlsStream>, WebSocketError> {
    let mut current_url = Url::parse(url)?;
    let mut redirects = 0u8;

    loop {
        let is_tls = match current_url.scheme() {
            "ws" => false,
            "wss" => true,
            _ => return Err(WebSocketError::InvalidSchemeUrl),
        };

        let host = current_url.host_str().ok_or(WebSocketError::UrlNoHost)?.to_string();
        let port = current_url.port_or_known_default().unwrap_or(if is_tls { 443 } else { 80 });

        debug!("connecting to {host}:{port} (tls={is_tls})");
        let tcp = TcpStream::connect((host.as_str(), port)).await?;
        let _ = tcp.set_nodelay(true);

        let io = if is_tls {
            let connector = build_tls_connector(config.ca_file.as_deref())?;
            let server_name = ServerName::try_from(host.clone())?;
            let tls = connector.connect(server_name, tcp).await?;
            MaybeTlsStream::Tls(Box::new(tls))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let request = HandshakeRequest::new(
            &current_url,
            &config.websocket.websocket_protocols,
            &config.websocket.extra_headers,
            config.websocket.expect,
        )?;

        match perform_handshake(io, &request).await? {
            HandshakeResult::Accepted { io, leftover, protocol } => {
                if let Some(protocol) = &protocol {
                    debug!("handshake accepted, negotiated subprotocol {protocol:?}");
                } else {
                    debug!("handshake accepted");
                }

                let mut session = Session::new(config.websocket.clone());
                let mut collector = Collector::default();
                if !leftover.is_empty() {
                    session.receive(&leftover, &mut collector)?;
                }
                let pending_events: VecDeque<Event> = collector.events.drain(..).collect();

                return Ok(WebSocketStream::new(io, session, collector, pending_events));
            }
            HandshakeResult::Redirect(next_url) => {
                if redirects >= config.websocket.max_redirects {
                    return Err(WebSocketError::HandshakeRejected);
                }
                redirects += 1;
                debug!("following redirect to {next_url}");
                current_url = next_url;
            }
        }
    }
}
