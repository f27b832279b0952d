use crate::config::PurgerSettings;
use crate::errors::{Result, ValidationError};
use crate::request::PurgeRequest;
use async_trait::async_trait;
use http::StatusCode;

/// Sends a built request and reports the response status.
///
/// Implementations must honour the connect and request timeouts they were
/// configured with; the dispatcher applies no timeouts of its own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PurgeRequest) -> Result<StatusCode>;
}

/// `reqwest`-backed transport.
///
/// # Timeout Behavior
///
/// `connect_timeout` bounds establishing the connection, `timeout` bounds the
/// whole request/response cycle. The response body is not read.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(settings: &PurgerSettings) -> Result<Self, ValidationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(!settings.verify)
            .build()
            .map_err(|e| ValidationError::HttpClient(e.to_string()))?;

        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PurgeRequest) -> Result<StatusCode> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.as_str());

        // `header` appends, so repeated names are all sent
        for header in &request.headers {
            builder = builder.header(&header.field, &header.value);
        }

        let response = builder.send().await?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Header, RequestMethod};
    use crate::errors::DispatchError;
    use crate::testutils::start_test_server;
    use std::time::Duration;
    use url::Url;

    fn settings(timeout: f64, connect_timeout: f64) -> PurgerSettings {
        PurgerSettings {
            id: "test".into(),
            timeout,
            connect_timeout,
            ..Default::default()
        }
    }

    fn request(port: u16, method: RequestMethod, headers: Vec<Header>) -> PurgeRequest {
        PurgeRequest {
            method,
            url: Url::parse(&format!("http://127.0.0.1:{port}/node/1?x=1")).unwrap(),
            headers,
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = start_test_server(StatusCode::OK, Duration::ZERO).await;
        let transport = HttpTransport::new(&settings(2.0, 1.0)).unwrap();

        let headers = vec![
            Header::new("X-Foo", "bar"),
            Header::new("Cache-Tags", "node:1"),
            Header::new("X-Foo", "baz"),
        ];
        let status = transport
            .send(&request(server.port, RequestMethod::Purge, headers))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let recorded = server.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, "PURGE");
        assert_eq!(recorded[0].path_and_query, "/node/1?x=1");

        let foo: Vec<_> = recorded[0]
            .headers
            .iter()
            .filter(|(name, _)| name == "x-foo")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(foo, ["bar", "baz"]);
    }

    #[tokio::test]
    async fn test_send_reports_error_status() {
        let server = start_test_server(StatusCode::FORBIDDEN, Duration::ZERO).await;
        let transport = HttpTransport::new(&settings(2.0, 1.0)).unwrap();

        let status = transport
            .send(&request(server.port, RequestMethod::Ban, vec![]))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = start_test_server(StatusCode::OK, Duration::from_secs(3)).await;
        let transport = HttpTransport::new(&settings(0.3, 0.2)).unwrap();

        let result = transport
            .send(&request(server.port, RequestMethod::Ban, vec![]))
            .await;
        assert_eq!(result, Err(DispatchError::RequestTimeout));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let transport = HttpTransport::new(&settings(2.0, 0.2)).unwrap();

        // Use a non-routable IP to trigger a connect timeout
        let request = PurgeRequest {
            method: RequestMethod::Ban,
            url: Url::parse("http://192.0.2.1:9999/").unwrap(),
            headers: vec![],
        };
        let result = transport.send(&request).await;
        // Hosts without any route fail fast with "network unreachable" instead
        if let Err(DispatchError::ConnectionFailed(reason)) = &result {
            eprintln!("skipping connect timeout check: {reason}");
            return;
        }
        assert_eq!(result, Err(DispatchError::ConnectTimeout));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind and drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new(&settings(1.0, 0.5)).unwrap();
        let result = transport
            .send(&request(port, RequestMethod::Ban, vec![]))
            .await;
        assert!(matches!(result, Err(DispatchError::ConnectionFailed(_))));
    }
}
