//! # HTTP/WebSocket Transport
//!
//! The production [`Transport`]:
//!
//! - Resolve is an HTTP `POST {endpoint}/actors/resolve` whose body is the encoded frame.
//! - Each handle's push connection is a WebSocket at
//!   `ws(s)://{host}/actors/{actor_id}/connect?encoding={json|msgpack}`. JSON frames travel
//!   as text messages, MessagePack frames as binary messages.

use std::time::Duration;

use actorwire::Encoding;
use actorwire::ToClient;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::transport::Connection;
use crate::transport::Result;
use crate::transport::Transport;
use crate::transport::TransportError;

const USER_AGENT: &str = concat!("actorlink/", env!("CARGO_PKG_VERSION"));

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    encoding: Encoding,
    connect_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> std::result::Result<Self, Error> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint '{}': {}", config.endpoint, e)))?;

        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(limit) = config.connect_timeout {
            builder = builder.connect_timeout(limit).timeout(limit);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Connection(TransportError::Io(e.to_string())))?;

        Ok(Self {
            client,
            endpoint,
            encoding: config.encoding,
            connect_timeout: config.connect_timeout,
        })
    }

    /// The endpoint with `segments` appended to its path.
    pub(crate) fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Io(format!("endpoint '{}' cannot carry a path", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn connect_url(&self, actor_id: &str, encoding: Encoding) -> Result<Url> {
        let mut url = self.url_for(&["actors", actor_id, "connect"])?;

        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Io(format!("cannot derive a websocket url from '{}'", url)))?;
        url.query_pairs_mut().append_pair("encoding", encoding.as_str());

        Ok(url)
    }
}

/// Decides whether a resolve response is a reply.
///
/// Error statuses still count when the body decodes as a frame; the runtime answers rejected
/// resolves with an error frame under a 4xx or 5xx status.
pub(crate) fn reply_body(encoding: Encoding, status: StatusCode, body: &[u8]) -> Result<Vec<u8>> {
    if status.is_success() {
        return Ok(body.to_vec());
    }

    if !body.is_empty() && encoding.decode::<ToClient>(body).is_ok() {
        return Ok(body.to_vec());
    }

    Err(TransportError::Rejected {
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionLost(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let url = self.url_for(&["actors", "resolve"])?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, self.encoding.content_type())
            .body(payload.to_vec())
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest)?;
        reply_body(self.encoding, status, &body)
    }

    async fn open(&self, actor_id: &str, encoding: Encoding) -> Result<Box<dyn Connection>> {
        let url = self.connect_url(actor_id, encoding)?;
        tracing::debug!(url = %url, "opening websocket");

        let connecting = tokio_tungstenite::connect_async(url.as_str());
        let connected = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => connecting.await,
        };
        let (socket, _response) = connected.map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        let (sink, stream) = socket.split();
        Ok(Box::new(WebSocketConnection {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            binary: encoding.is_binary(),
        }))
    }
}

/// One WebSocket, split so a blocked `recv` never holds up `send`.
pub struct WebSocketConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    binary: bool,
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        let message = if self.binary {
            Message::Binary(payload.to_vec())
        } else {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|e| TransportError::Io(format!("text frame is not utf-8: {}", e)))?;
            Message::Text(text)
        };

        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(bytes)),
                // Ping, pong and raw frames carry no protocol data.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ConnectionLost(e.to_string())),
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}
