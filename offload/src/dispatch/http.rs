//! Trigger worker invocations with a non-blocking HTTP request.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::COOKIE, Client};

use super::{Trigger, TriggerError, TriggerRequest};
use crate::credentials::IdentityContext;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// A [`Trigger`] that POSTs the request to an endpoint of the host.
///
/// The request is sent to `<url>?action=<identifier>&nonce=<token>` with the JSON encoded
/// [`TriggerRequest`] as its body and the identity context as a `Cookie` header. The endpoint
/// should decode the body and pass it to [`crate::BackgroundProcess::handle_request`].
///
/// The request is sent from a spawned task. [`Trigger::trigger`] waits at most the configured
/// timeout for it, so that a connection that cannot be opened is reported, and otherwise returns
/// while the request is still in flight.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpTrigger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// How long to wait for an early failure. Defaults to 10 milliseconds.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }
}

fn cookie_header(identity: &IdentityContext) -> String {
    identity
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl Trigger for HttpTrigger {
    async fn trigger(&self, request: TriggerRequest) -> Result<(), TriggerError> {
        let mut builder = self
            .client
            .post(&self.url)
            .query(&[
                ("action", request.identifier.as_str()),
                ("nonce", request.token.as_str()),
            ])
            .json(&request);
        if !request.identity.is_empty() {
            builder = builder.header(COOKIE, cookie_header(&request.identity));
        }

        let identifier = request.identifier;
        let send = tokio::spawn(builder.send());
        match tokio::time::timeout(self.timeout, send).await {
            Err(_elapsed) => {
                tracing::trace!(%identifier, "Trigger for {identifier} still in flight");
                Ok(())
            }
            Ok(Ok(Ok(response))) => {
                tracing::trace!(%identifier, status = %response.status(), "Trigger for {identifier} answered");
                Ok(())
            }
            Ok(Ok(Err(error))) => Err(TriggerError::Transport(error.to_string())),
            Ok(Err(error)) => Err(TriggerError::Transport(error.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{credentials::Token, dispatch::ChainId};
    use assert_matches::assert_matches;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn request() -> TriggerRequest {
        TriggerRequest {
            identifier: "job".to_owned(),
            token: Token::from("abc123".to_owned()),
            identity: IdentityContext::new().with("session", "s1"),
            chain_id: ChainId::generate(),
        }
    }

    #[test]
    fn cookie_header_joins_values() {
        let identity = IdentityContext::new().with("a", "1").with("b", "2");

        assert_eq!(cookie_header(&identity), "a=1; b=2");
    }

    #[tokio::test]
    async fn posts_request_to_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/worker", listener.local_addr().unwrap());
        let trigger = HttpTrigger::new(url);

        trigger.trigger(request()).await.unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0; 1024];
        while !String::from_utf8_lossy(&received).contains("\"chain_id\"") {
            let read = socket.read(&mut buf).await.unwrap();
            assert_ne!(read, 0, "connection closed early");
            received.extend_from_slice(&buf[..read]);
        }
        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();

        let received = String::from_utf8_lossy(&received);
        assert!(received.starts_with("POST /worker?action=job&nonce=abc123 HTTP/1.1"));
        assert!(received.to_lowercase().contains("cookie: session=s1"));
        assert!(received.contains("\"identifier\":\"job\""));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/worker", listener.local_addr().unwrap());
        drop(listener);
        let trigger = HttpTrigger::new(url).with_timeout(Duration::from_secs(5));

        assert_matches!(
            trigger.trigger(request()).await,
            Err(TriggerError::Transport(_))
        );
    }
}
