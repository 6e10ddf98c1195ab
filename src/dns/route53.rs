use super::{
    boxed_err, sigv4, AwsCredentials, ChangeHandle, ChangeStatus, DnsProvider, TxtRecord,
};
use crate::error::BoxError;
use chrono::Utc;
use openssl::error::ErrorStack;
use quick_xml::{de::from_str, escape::partial_escape, DeError};
use reqwest::{header, Client, Method, StatusCode, Url};
use serde::Deserialize;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter},
};
use tracing::debug;

const ENDPOINT: &str = "https://route53.amazonaws.com";
const API_VERSION: &str = "2013-04-01";
const REGION: &str = "us-east-1";
const SERVICE: &str = "route53";
const COMMENT: &str = "letsencrypt challenge";

#[derive(Debug)]
pub enum Route53Error {
    /// Error occurred while processing the request
    Reqwest(reqwest::Error),
    /// Failed to sign the request
    Signing(ErrorStack),
    /// The endpoint is not a valid URL
    InvalidEndpoint(String),
    /// Route53 rejected the request
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
    /// The response body could not be parsed
    Xml(DeError),
    /// The change had a status other than `PENDING` or `INSYNC`
    UnknownStatus(String),
}

impl Display for Route53Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reqwest(_) => write!(f, "an error occurred while processing the request"),
            Self::Signing(_) => write!(f, "failed to sign the request"),
            Self::InvalidEndpoint(endpoint) => write!(f, "`{endpoint}` is not a valid endpoint"),
            Self::Api {
                status,
                code,
                message,
            } => write!(f, "route53 responded with {status} {code}: {message}"),
            Self::Xml(_) => write!(f, "failed to parse the route53 response"),
            Self::UnknownStatus(status) => write!(f, "unknown change status `{status}`"),
        }
    }
}

impl StdError for Route53Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Reqwest(e) => Some(e),
            Self::Signing(e) => Some(e),
            Self::Xml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Route53Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Reqwest(err)
    }
}

impl From<DeError> for Route53Error {
    fn from(err: DeError) -> Self {
        Self::Xml(err)
    }
}

#[derive(Clone, Copy, Debug)]
enum Action {
    Upsert,
    Delete,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Upsert => "UPSERT",
            Action::Delete => "DELETE",
        }
    }
}

/// Publishes challenge records in a Route53 hosted zone.
#[derive(Debug)]
pub struct Route53Provider {
    client: Client,
    endpoint: String,
    host: String,
    hosted_zone_id: String,
    credentials: AwsCredentials,
}

impl Route53Provider {
    /// Create a provider for the hosted zone. Both `Z123` and `/hostedzone/Z123` are accepted.
    pub fn new<S: Into<String>>(hosted_zone_id: S, credentials: AwsCredentials) -> Self {
        let hosted_zone_id = hosted_zone_id.into();
        let hosted_zone_id = hosted_zone_id
            .strip_prefix("/hostedzone/")
            .map(str::to_owned)
            .unwrap_or(hosted_zone_id);

        Route53Provider {
            client: Client::new(),
            endpoint: ENDPOINT.to_owned(),
            host: "route53.amazonaws.com".to_owned(),
            hosted_zone_id,
            credentials,
        }
    }

    /// Use a custom [`reqwest::Client`] for all requests
    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Send requests to a different endpoint, defaults to `https://route53.amazonaws.com`
    pub fn endpoint(mut self, endpoint: &str) -> Result<Self, Route53Error> {
        let url = Url::parse(endpoint)
            .map_err(|_| Route53Error::InvalidEndpoint(endpoint.to_owned()))?;
        let host = url
            .host_str()
            .ok_or_else(|| Route53Error::InvalidEndpoint(endpoint.to_owned()))?;

        self.host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        self.endpoint = endpoint.trim_end_matches('/').to_owned();
        Ok(self)
    }

    async fn change(&self, action: Action, record: &TxtRecord) -> Result<ChangeHandle, Route53Error> {
        let path = format!("/{API_VERSION}/hostedzone/{}/rrset/", self.hosted_zone_id);
        let body = change_batch(action, record);

        debug!(action = action.as_str(), record = %record.name, "submitting record change");
        let response = self.send(Method::POST, &path, body).await?;

        let info = parse_change_info(&response)?;
        Ok(ChangeHandle::new(info.id))
    }

    async fn send(&self, method: Method, path: &str, body: String) -> Result<String, Route53Error> {
        let request = sigv4::Request {
            method: method.as_str(),
            host: &self.host,
            path,
            query: "",
            payload: body.as_bytes(),
        };
        let signature = sigv4::sign(&request, &self.credentials, REGION, SERVICE, Utc::now())
            .map_err(Route53Error::Signing)?;

        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.endpoint))
            .header("x-amz-date", signature.amz_date)
            .header(header::AUTHORIZATION, signature.authorization);
        if let Some(token) = signature.security_token {
            builder = builder.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            builder = builder
                .header(header::CONTENT_TYPE, "application/xml")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(api_error(status, &text))
        }
    }
}

#[async_trait::async_trait]
impl DnsProvider for Route53Provider {
    async fn upsert_txt(&self, record: &TxtRecord) -> Result<ChangeHandle, BoxError> {
        self.change(Action::Upsert, record).await.map_err(boxed_err)
    }

    async fn delete_txt(&self, record: &TxtRecord) -> Result<ChangeHandle, BoxError> {
        self.change(Action::Delete, record).await.map_err(boxed_err)
    }

    async fn change_status(&self, change: &ChangeHandle) -> Result<ChangeStatus, BoxError> {
        let path = format!("/{API_VERSION}/change/{}", change.id());
        let response = self
            .send(Method::GET, &path, String::new())
            .await
            .map_err(boxed_err)?;

        let info = parse_change_info(&response).map_err(boxed_err)?;
        match info.status.as_str() {
            "PENDING" => Ok(ChangeStatus::Pending),
            "INSYNC" => Ok(ChangeStatus::Done),
            _ => Err(boxed_err(Route53Error::UnknownStatus(info.status))),
        }
    }
}

/// Shared by `ChangeResourceRecordSetsResponse` and `GetChangeResponse`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeResponse {
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeInfo {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvalidChangeBatch {
    messages: Messages,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Messages {
    #[serde(default)]
    message: Vec<String>,
}

fn change_batch(action: Action, record: &TxtRecord) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ChangeResourceRecordSetsRequest xmlns="https://route53.amazonaws.com/doc/2013-04-01/">"#,
            "<ChangeBatch><Comment>{comment}</Comment><Changes><Change>",
            "<Action>{action}</Action>",
            "<ResourceRecordSet><Name>{name}</Name><Type>TXT</Type><TTL>{ttl}</TTL>",
            "<ResourceRecords><ResourceRecord><Value>{value}</Value></ResourceRecord></ResourceRecords>",
            "</ResourceRecordSet></Change></Changes></ChangeBatch>",
            "</ChangeResourceRecordSetsRequest>",
        ),
        comment = COMMENT,
        action = action.as_str(),
        name = partial_escape(record.name.as_str()),
        ttl = record.ttl,
        value = partial_escape(record.value.as_str()),
    )
}

/// Parse the change info, stripping the `/change/` prefix from the id
fn parse_change_info(body: &str) -> Result<ChangeInfo, DeError> {
    let mut info = from_str::<ChangeResponse>(body)?.change_info;
    if let Some(id) = info.id.strip_prefix("/change/") {
        info.id = id.to_owned();
    }
    Ok(info)
}

fn api_error(status: StatusCode, body: &str) -> Route53Error {
    if let Ok(response) = from_str::<ErrorResponse>(body) {
        return Route53Error::Api {
            status,
            code: response.error.code,
            message: response.error.message,
        };
    }

    if let Ok(batch) = from_str::<InvalidChangeBatch>(body) {
        return Route53Error::Api {
            status,
            code: "InvalidChangeBatch".to_owned(),
            message: batch.messages.message.join("; "),
        };
    }

    Route53Error::Api {
        status,
        code: "Unknown".to_owned(),
        message: body.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        api_error, change_batch, parse_change_info, Action, Route53Error, Route53Provider,
    };
    use crate::dns::{AwsCredentials, ChangeHandle, ChangeStatus, DnsProvider, TxtRecord};
    use reqwest::StatusCode;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    const CHANGE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ChangeResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ChangeInfo>
    <Id>/change/C2682N5HXP0BZ4</Id>
    <Status>PENDING</Status>
    <SubmittedAt>2024-01-01T00:00:00.000Z</SubmittedAt>
    <Comment>letsencrypt challenge</Comment>
  </ChangeInfo>
</ChangeResourceRecordSetsResponse>"#;

    const GET_CHANGE_INSYNC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GetChangeResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ChangeInfo>
    <Id>/change/C2682N5HXP0BZ4</Id>
    <Status>INSYNC</Status>
    <SubmittedAt>2024-01-01T00:00:00.000Z</SubmittedAt>
  </ChangeInfo>
</GetChangeResponse>"#;

    const NO_SUCH_ZONE: &str = r#"<?xml version="1.0"?>
<ErrorResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <Error>
    <Type>Sender</Type>
    <Code>NoSuchHostedZone</Code>
    <Message>No hosted zone found with ID: Z404</Message>
  </Error>
  <RequestId>6b0d0d2f</RequestId>
</ErrorResponse>"#;

    const INVALID_BATCH: &str = r#"<?xml version="1.0"?>
<InvalidChangeBatch xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <Messages>
    <Message>Tried to delete resource record set but it was not found</Message>
  </Messages>
  <RequestId>b25f48e8</RequestId>
</InvalidChangeBatch>"#;

    fn record() -> TxtRecord {
        TxtRecord {
            name: "_acme-challenge.example.com".into(),
            value: "\"LoqXcYV8q5ONbJQxbmR7SCTNo3tiAXDfowyjxAjEuX0\"".into(),
            ttl: 300,
        }
    }

    /// Serve one canned response per connection, returning the raw requests received
    fn fake_route53(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            let mut requests = Vec::new();

            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();

                let mut buffer = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let read = socket.read(&mut chunk).await.unwrap();
                    buffer.extend_from_slice(&chunk[..read]);
                    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|l| l.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                while buffer.len() < header_end + length {
                    let read = socket.read(&mut chunk).await.unwrap();
                    buffer.extend_from_slice(&chunk[..read]);
                }
                requests.push(String::from_utf8_lossy(&buffer).into_owned());

                let response = format!(
                    "HTTP/1.1 {status} Status\r\ncontent-type: text/xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }

            requests
        });

        (format!("http://{addr}"), handle)
    }

    fn provider(endpoint: &str) -> Route53Provider {
        Route53Provider::new("/hostedzone/Z123", AwsCredentials::new("AKID", "secret"))
            .endpoint(endpoint)
            .unwrap()
    }

    #[test]
    fn builds_change_batch() {
        let body = change_batch(Action::Upsert, &record());

        assert!(body.contains("<Comment>letsencrypt challenge</Comment>"));
        assert!(body.contains("<Action>UPSERT</Action>"));
        assert!(body.contains("<Name>_acme-challenge.example.com</Name>"));
        assert!(body.contains("<Type>TXT</Type><TTL>300</TTL>"));
        assert!(body.contains(
            "<Value>\"LoqXcYV8q5ONbJQxbmR7SCTNo3tiAXDfowyjxAjEuX0\"</Value>"
        ));

        let body = change_batch(Action::Delete, &record());
        assert!(body.contains("<Action>DELETE</Action>"));
    }

    #[test]
    fn parses_change_info() {
        let info = parse_change_info(CHANGE_RESPONSE).unwrap();
        assert_eq!(info.id, "C2682N5HXP0BZ4");
        assert_eq!(info.status, "PENDING");

        let info = parse_change_info(GET_CHANGE_INSYNC).unwrap();
        assert_eq!(info.status, "INSYNC");
    }

    #[test]
    fn parses_error_documents() {
        let error = api_error(StatusCode::NOT_FOUND, NO_SUCH_ZONE);
        let Route53Error::Api { code, message, .. } = error else { panic!("expected Api error") };
        assert_eq!(code, "NoSuchHostedZone");
        assert_eq!(message, "No hosted zone found with ID: Z404");

        let error = api_error(StatusCode::BAD_REQUEST, INVALID_BATCH);
        let Route53Error::Api { code, message, .. } = error else { panic!("expected Api error") };
        assert_eq!(code, "InvalidChangeBatch");
        assert!(message.contains("not found"));

        let error = api_error(StatusCode::BAD_GATEWAY, "upstream unavailable");
        let Route53Error::Api { code, message, .. } = error else { panic!("expected Api error") };
        assert_eq!(code, "Unknown");
        assert_eq!(message, "upstream unavailable");
    }

    #[test]
    fn accepts_prefixed_zone_id() {
        let provider = Route53Provider::new("/hostedzone/Z123", AwsCredentials::new("a", "b"));
        assert_eq!(provider.hosted_zone_id, "Z123");
    }

    #[tokio::test]
    async fn upsert_then_poll() {
        let (endpoint, server) =
            fake_route53(vec![(200, CHANGE_RESPONSE), (200, GET_CHANGE_INSYNC)]);
        let provider = provider(&endpoint);

        let change = provider.upsert_txt(&record()).await.unwrap();
        assert_eq!(change, ChangeHandle::new("C2682N5HXP0BZ4"));

        let status = provider.change_status(&change).await.unwrap();
        assert_eq!(status, ChangeStatus::Done);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /2013-04-01/hostedzone/Z123/rrset/ HTTP/1.1"));
        assert!(requests[0]
            .to_lowercase()
            .contains("authorization: aws4-hmac-sha256 credential=akid/"));
        assert!(requests[0].contains("<Action>UPSERT</Action>"));
        assert!(requests[1].starts_with("GET /2013-04-01/change/C2682N5HXP0BZ4 HTTP/1.1"));
    }

    #[tokio::test]
    async fn rejected_delete() {
        let (endpoint, server) = fake_route53(vec![(400, INVALID_BATCH)]);
        let provider = provider(&endpoint);

        let error = provider.delete_txt(&record()).await.unwrap_err();
        let error = error.downcast::<Route53Error>().unwrap();
        assert!(matches!(
            *error,
            Route53Error::Api { status, ref code, .. }
                if status == StatusCode::BAD_REQUEST && code == "InvalidChangeBatch"
        ));

        server.await.unwrap();
    }
}
