//! Request routing for the metricdb HTTP API.
//!
//! ## Routes
//!
//! * `GET /metrics` -- describe every metric.
//! * `POST /metrics` -- insert one sample. Parameters are read from the
//!   urlencoded body, or from the query string when the body is empty:
//!   `metric`, `value`, any number of `label[<key>]=<value>` and an optional
//!   `timestamp` in microseconds since the epoch.
//! * `GET /metrics/<key>` -- every sample of `<key>` up to now.
//!
//! ## Metrics
//!
//! `requests_received`: Total requests received
//! `samples_inserted`: Total samples accepted
//!

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Method, Request, Response, StatusCode, body::Body, header};
use metricdb::{
    Label, Repository,
    api::{self, Ingest},
};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error};

const METRICS_PATH: &str = "/metrics";
const METRICS_PATH_PREFIX: &str = "/metrics/";
const MIN_KEY_LEN: usize = 3;
const JSON: &str = "application/json; charset=utf-8";
const TEXT: &str = "text/plain; charset=utf-8";
const LABEL_PREFIX: &str = "label[";
const LABEL_SUFFIX: &str = "]";

/// Problems with an insert request. The display text is the response body.
#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestError {
    /// `metric` was missing or empty.
    #[error("error: invalid metric key: {0}")]
    MetricKey(String),
    /// `value` was missing.
    #[error("error: missing ?value=... parameter")]
    MissingValue,
    /// `value` was not a number.
    #[error("error: invalid value: {0}")]
    Value(String),
    /// `timestamp` was not an unsigned integer.
    #[error("error: invalid timestamp: {0}")]
    Timestamp(String),
}

/// Insert parameters, decoded from `application/x-www-form-urlencoded`.
///
/// For `metric`, `value` and `timestamp` the first occurrence wins. Every
/// `label[<key>]` pair is kept, in request order, duplicates and empty keys
/// included.
#[derive(Debug, Default, PartialEq)]
struct IngestParams {
    metric: Option<String>,
    value: Option<String>,
    timestamp: Option<String>,
    labels: Vec<Label>,
}

impl IngestParams {
    fn parse(input: &[u8]) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(input) {
            let slot = match key.as_ref() {
                "metric" => &mut params.metric,
                "value" => &mut params.value,
                "timestamp" => &mut params.timestamp,
                other => {
                    if let Some(label) = other
                        .strip_prefix(LABEL_PREFIX)
                        .and_then(|rest| rest.strip_suffix(LABEL_SUFFIX))
                    {
                        params.labels.push((label.to_string(), value.into_owned()));
                    }
                    continue;
                }
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

impl TryFrom<IngestParams> for Ingest {
    type Error = RequestError;

    fn try_from(params: IngestParams) -> Result<Self, Self::Error> {
        let metric = match params.metric {
            Some(metric) if !metric.is_empty() => metric,
            other => return Err(RequestError::MetricKey(other.unwrap_or_default())),
        };
        let raw_value = params.value.ok_or(RequestError::MissingValue)?;
        let Ok(value) = raw_value.trim().parse::<f64>() else {
            return Err(RequestError::Value(raw_value));
        };
        // A timestamp of zero means "not provided".
        let timestamp = match params.timestamp {
            None => None,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(ts) => Some(ts),
                Err(_) => return Err(RequestError::Timestamp(raw)),
            },
        };

        Ok(Ingest {
            metric,
            value,
            labels: params.labels,
            timestamp,
        })
    }
}

/// A response before it is handed to hyper.
#[derive(Debug, PartialEq)]
pub(crate) struct Reply {
    pub(crate) status: StatusCode,
    pub(crate) content_type: Option<&'static str>,
    pub(crate) body: Bytes,
}

impl Reply {
    fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some(TEXT),
            body: Bytes::from(body.into()),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status: StatusCode::OK,
                content_type: Some(JSON),
                body: Bytes::from(body),
            },
            Err(e) => {
                error!("Failed to serialize response: {e}");
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn into_response(self) -> Response<BoxBody<Bytes, hyper::Error>> {
        let mut builder = Response::builder()
            .status(self.status)
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
        if let Some(ct) = self.content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        match builder.body(full(self.body)) {
            Ok(resp) => resp,
            Err(e) => {
                error!("Error building response: {e}");
                let mut resp = Response::new(full(Bytes::new()));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            }
        }
    }
}

fn full(chunk: Bytes) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk).map_err(|never| match never {}).boxed()
}

/// Serve one request against `repository`.
pub(crate) async fn srv<B>(
    req: Request<B>,
    repository: &Repository,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, B::Error>
where
    B: Body<Data = Bytes>,
{
    counter!("requests_received").increment(1);

    let (parts, body) = req.into_parts();
    let bytes = body.collect().await?.to_bytes();

    let reply = route(
        &parts.method,
        parts.uri.path(),
        parts.uri.query(),
        &bytes,
        repository,
    );
    Ok(reply.into_response())
}

pub(crate) fn route(
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
    repository: &Repository,
) -> Reply {
    let path = path.trim_end_matches('/');

    if path == METRICS_PATH {
        return match *method {
            Method::GET => Reply::json(&api::list(repository)),
            Method::POST => insert_sample(query, body, repository),
            _ => Reply::empty(StatusCode::METHOD_NOT_ALLOWED),
        };
    }

    if let Some(key) = path.strip_prefix(METRICS_PATH_PREFIX) {
        return match *method {
            Method::GET => render_sample_scan(key, repository),
            _ => Reply::empty(StatusCode::METHOD_NOT_ALLOWED),
        };
    }

    Reply::empty(StatusCode::NOT_FOUND)
}

fn insert_sample(query: Option<&str>, body: &[u8], repository: &Repository) -> Reply {
    let params = if body.is_empty() {
        query.unwrap_or_default().as_bytes()
    } else {
        body
    };

    let ingest = match Ingest::try_from(IngestParams::parse(params)) {
        Ok(ingest) => ingest,
        Err(e) => {
            debug!("Rejected insert: {e}");
            return Reply::text(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    debug!(
        metric = %ingest.metric,
        value = ingest.value,
        timestamp = ?ingest.timestamp,
        "inserting sample"
    );
    api::ingest(repository, ingest);
    counter!("samples_inserted").increment(1);
    Reply::empty(StatusCode::CREATED)
}

fn render_sample_scan(key: &str, repository: &Repository) -> Reply {
    if key.len() < MIN_KEY_LEN {
        return Reply::text(
            StatusCode::BAD_REQUEST,
            format!("error: invalid metric key: {key}"),
        );
    }

    match api::scan_history(repository, key) {
        Some(scan) => Reply::json(&scan),
        None => Reply::text(StatusCode::NOT_FOUND, format!("metric not found: {key}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::{Method, Request, StatusCode, header};
    use metricdb::{Backend, ManualClock, Metric, Repository};

    use super::{IngestParams, JSON, Reply, route, srv};

    fn repository() -> Repository {
        Repository::with_clock(Backend::InMemory, Arc::new(ManualClock::new(5_000)))
    }

    fn post(repo: &Repository, query: Option<&str>, body: &str) -> Reply {
        route(&Method::POST, "/metrics", query, body.as_bytes(), repo)
    }

    fn json(reply: &Reply) -> serde_json::Value {
        assert_eq!(reply.content_type, Some(JSON));
        serde_json::from_slice(&reply.body).expect("valid json")
    }

    #[test]
    fn insert_from_body_then_scan() {
        let repo = repository();
        let reply = post(
            &repo,
            None,
            "metric=cpu&value=0.5&label[host]=a&label[dc]=eu&timestamp=1000",
        );
        assert_eq!(reply.status, StatusCode::CREATED);
        assert!(reply.body.is_empty());

        let reply = route(&Method::GET, "/metrics/cpu", None, b"", &repo);
        assert_eq!(reply.status, StatusCode::OK);
        let scan = json(&reply);
        assert_eq!(scan["metric"]["key"], "cpu");
        assert_eq!(scan["metric"]["labels"], serde_json::json!(["dc", "host"]));
        assert_eq!(scan["samples"][0]["time"], 1000);
        assert_eq!(scan["samples"][0]["value"], 0.5);
        assert_eq!(scan["samples"][0]["labels"]["host"], "a");
    }

    #[test]
    fn insert_from_query_when_body_empty() {
        let repo = repository();
        let reply = post(&repo, Some("metric=mem&value=42"), "");
        assert_eq!(reply.status, StatusCode::CREATED);

        let metric = repo.find("mem").expect("created");
        let samples = metric.collect_samples(0, u64::MAX);
        assert_eq!(samples.len(), 1);
        // No timestamp: stamped with the repository clock.
        assert_eq!(samples[0].time(), 5_000);
        assert_eq!(metric.last_insert_time(), 5_000);
    }

    #[test]
    fn zero_timestamp_means_unspecified() {
        let repo = repository();
        post(&repo, None, "metric=cpu&value=1&timestamp=0");
        let samples = repo
            .find("cpu")
            .expect("created")
            .collect_samples(0, u64::MAX);
        assert_eq!(samples[0].time(), 5_000);
    }

    fn stored_labels(repo: &Repository, key: &str) -> Vec<(String, String)> {
        let samples = repo
            .find(key)
            .expect("created")
            .collect_samples(0, u64::MAX);
        assert_eq!(samples.len(), 1);
        samples[0].labels().to_vec()
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn percent_encoded_label_brackets_are_decoded() {
        let repo = repository();
        let reply = post(
            &repo,
            None,
            "metric=cpu&value=1&label%5Bhost%5D=a&label%5Bdc%5D=eu%2Dwest",
        );
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(
            stored_labels(&repo, "cpu"),
            pairs(&[("host", "a"), ("dc", "eu-west")])
        );
        assert!(repo.find("cpu").expect("created").has_label("host"));
    }

    #[test]
    fn labels_keep_request_order_and_duplicates() {
        let repo = repository();
        let reply = post(
            &repo,
            None,
            "metric=cpu&value=1&label[zone]=b&label[a]=x&label[a]=y&label[]=empty",
        );
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(
            stored_labels(&repo, "cpu"),
            pairs(&[("zone", "b"), ("a", "x"), ("a", "y"), ("", "empty")])
        );
    }

    #[test]
    fn first_scalar_parameter_wins() {
        let params = IngestParams::parse(b"metric=cpu&metric=mem&value=1+&label[host=a&value=2");
        assert_eq!(params.metric.as_deref(), Some("cpu"));
        assert_eq!(params.value.as_deref(), Some("1 "));
        // No closing bracket: not a label.
        assert!(params.labels.is_empty());

        let repo = repository();
        let reply = post(&repo, None, "metric=cpu&metric=mem&value=1");
        assert_eq!(reply.status, StatusCode::CREATED);
        assert!(repo.find("cpu").is_some());
        assert!(repo.find("mem").is_none());
    }

    #[test]
    fn bad_inserts_are_rejected() {
        let repo = repository();

        let reply = post(&repo, None, "value=1");
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, Bytes::from("error: invalid metric key: "));

        let reply = post(&repo, None, "metric=cpu");
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, Bytes::from("error: missing ?value=... parameter"));

        let reply = post(&repo, None, "metric=cpu&value=abc");
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, Bytes::from("error: invalid value: abc"));

        let reply = post(&repo, None, "metric=cpu&value=1&timestamp=yesterday");
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, Bytes::from("error: invalid timestamp: yesterday"));

        assert!(repo.is_empty());
    }

    #[test]
    fn listing() {
        let repo = repository();
        post(&repo, None, "metric=mem&value=1&label[host]=a");
        post(&repo, None, "metric=cpu&value=2");

        let reply = route(&Method::GET, "/metrics/", None, b"", &repo);
        assert_eq!(reply.status, StatusCode::OK);
        let listing = json(&reply);
        let metrics = listing["metrics"].as_array().expect("array");
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0]["key"], "cpu");
        assert_eq!(metrics[1]["key"], "mem");
        assert_eq!(metrics[1]["last_insert"], 5_000);
        assert_eq!(metrics[1]["labels"], serde_json::json!(["host"]));
    }

    #[test]
    fn scan_errors() {
        let repo = repository();
        let reply = route(&Method::GET, "/metrics/ab", None, b"", &repo);
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body, Bytes::from("error: invalid metric key: ab"));

        let reply = route(&Method::GET, "/metrics/disk", None, b"", &repo);
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.body, Bytes::from("metric not found: disk"));
        assert!(repo.is_empty());
    }

    #[test]
    fn unknown_routes_and_methods() {
        let repo = repository();
        assert_eq!(
            route(&Method::GET, "/query", None, b"", &repo).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            route(&Method::DELETE, "/metrics", None, b"", &repo).status,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            route(&Method::POST, "/metrics/cpu", None, b"", &repo).status,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn srv_sets_cors_and_content_type() {
        let repo = repository();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Full::new(Bytes::new()))
            .expect("valid request");

        let resp = srv(req, &repo).await.expect("infallible body");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], JSON);

        let body = resp
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(body, Bytes::from(r#"{"metrics":[]}"#));
    }

    #[tokio::test]
    async fn srv_reads_post_body() {
        let repo = repository();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(Full::new(Bytes::from("metric=cpu&value=3")))
            .expect("valid request");

        let resp = srv(req, &repo).await.expect("infallible body");
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(repo.len(), 1);
    }
}
