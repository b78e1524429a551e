//! Concurrent source fetcher.
//!
//! Every source gets its own task, bounded by a semaphore. A task never fails:
//! it always yields a [`RawPayload`] whose outcome records what went wrong, so
//! one broken source cannot abort the others.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use subharvest_shared::{FetchConfig, FetchOutcome, HarvestError, RawPayload, Result, Source};

use crate::retry::RetryPolicy;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("subharvest/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Result of a single request.
enum Attempt {
    /// Success, or a failure that will not change on retry.
    Final(FetchOutcome),
    /// A failure worth retrying.
    Transient(FetchOutcome),
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetches sources concurrently with per-source retry.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
    concurrency: usize,
    max_body_bytes: u64,
}

impl Fetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            concurrency: config.concurrency.max(1),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetch every source and return one payload per source, in registry order.
    ///
    /// `on_complete` is called as each fetch finishes (completion order) with
    /// the payload and the number finished so far. Dropping the returned
    /// future aborts every in-flight fetch.
    #[instrument(skip_all, fields(sources = sources.len(), concurrency = self.concurrency))]
    pub async fn fetch_all<F>(&self, sources: &[Source], mut on_complete: F) -> Vec<RawPayload>
    where
        F: FnMut(&RawPayload, usize),
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, source) in sources.iter().enumerate() {
            let fetcher = self.clone();
            let source = source.clone();
            let sem = semaphore.clone();

            tasks.spawn(async move {
                let payload = match sem.acquire_owned().await {
                    Ok(_permit) => fetcher.fetch_one(&source).await,
                    Err(_) => failed_payload(&source, "fetch pool closed", 0),
                };
                (idx, payload)
            });
        }

        let mut slots: Vec<Option<RawPayload>> = vec![None; sources.len()];
        let mut finished = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, payload)) => {
                    finished += 1;
                    on_complete(&payload, finished);
                    slots[idx] = Some(payload);
                }
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }

        // A panicked task leaves its slot empty; report it as a failure.
        let payloads: Vec<RawPayload> = slots
            .into_iter()
            .zip(sources)
            .map(|(slot, source)| {
                slot.unwrap_or_else(|| failed_payload(source, "fetch task aborted", 0))
            })
            .collect();

        let ok = payloads.iter().filter(|p| p.outcome.is_success()).count();
        info!(ok, failed = payloads.len() - ok, "fetch phase completed");

        payloads
    }

    /// Fetch one source, retrying transient failures with backoff.
    #[instrument(skip_all, fields(source_id = %source.id))]
    pub async fn fetch_one(&self, source: &Source) -> RawPayload {
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            debug!(attempt = attempts, location = %source.location, "fetching source");

            match self.attempt(&source.location).await {
                Attempt::Final(outcome) => break outcome,
                Attempt::Transient(outcome) => {
                    let retry = attempts;
                    if retry > self.policy.max_retries {
                        break outcome;
                    }
                    let delay = self.policy.delay_for(retry);
                    warn!(
                        attempt = attempts,
                        reason = %outcome.failure_reason().unwrap_or_default(),
                        delay_ms = delay.as_millis() as u64,
                        "transient fetch failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match &outcome {
            FetchOutcome::Success { body } => {
                info!(attempts, bytes = body.len(), "source fetched");
            }
            failure => {
                warn!(
                    attempts,
                    reason = %failure.failure_reason().unwrap_or_default(),
                    "source failed for this run"
                );
            }
        }

        RawPayload {
            source_id: source.id.clone(),
            format: source.format,
            outcome,
            attempts,
        }
    }

    async fn attempt(&self, location: &Url) -> Attempt {
        match location.scheme() {
            "file" => self.read_file(location).await,
            _ => self.get(location).await,
        }
    }

    async fn get(&self, url: &Url) -> Attempt {
        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(classify_reqwest(&e)),
        };

        let status = response.status();
        if !status.is_success() {
            let outcome = FetchOutcome::Status {
                code: status.as_u16(),
            };
            return if RetryPolicy::is_transient(&outcome) {
                Attempt::Transient(outcome)
            } else {
                Attempt::Final(outcome)
            };
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Attempt::Final(FetchOutcome::Connection {
                    cause: format!("response too large ({len} bytes, max {})", self.max_body_bytes),
                });
            }
        }

        match response.text().await {
            Ok(body) if body.len() as u64 > self.max_body_bytes => {
                Attempt::Final(FetchOutcome::Connection {
                    cause: format!(
                        "response too large ({} bytes, max {})",
                        body.len(),
                        self.max_body_bytes
                    ),
                })
            }
            Ok(body) => Attempt::Final(FetchOutcome::Success { body }),
            Err(e) => Attempt::Transient(classify_reqwest(&e)),
        }
    }

    async fn read_file(&self, location: &Url) -> Attempt {
        let Ok(path) = location.to_file_path() else {
            return Attempt::Final(FetchOutcome::Connection {
                cause: format!("{location}: not a local file path"),
            });
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.len() as u64 > self.max_body_bytes => {
                Attempt::Final(FetchOutcome::Connection {
                    cause: format!("file too large ({} bytes)", bytes.len()),
                })
            }
            Ok(bytes) => Attempt::Final(FetchOutcome::Success {
                body: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) => Attempt::Final(FetchOutcome::Connection {
                cause: format!("{}: {e}", path.display()),
            }),
        }
    }
}

/// Map a reqwest error onto the fetch outcome taxonomy.
fn classify_reqwest(err: &reqwest::Error) -> FetchOutcome {
    if err.is_timeout() {
        FetchOutcome::Timeout
    } else {
        FetchOutcome::Connection {
            cause: err.to_string(),
        }
    }
}

fn failed_payload(source: &Source, cause: &str, attempts: u32) -> RawPayload {
    RawPayload {
        source_id: source.id.clone(),
        format: source.format,
        outcome: FetchOutcome::Connection {
            cause: cause.to_string(),
        },
        attempts,
    }
}

#[cfg(test)]
mod fetcher_tests {
    use super::*;
    use subharvest_shared::SourceFormat;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> FetchConfig {
        FetchConfig {
            concurrency: 4,
            timeout_secs: 5,
            max_retries: 2,
            backoff_ms: 1,
            max_body_bytes: 1024 * 1024,
        }
    }

    fn source(id: &str, url: &str) -> Source {
        Source {
            id: id.into(),
            location: Url::parse(url).unwrap(),
            format: SourceFormat::Plain,
        }
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(200).set_body_string("vless://a@b:1\n"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let payload = fetcher
            .fetch_one(&source("a", &format!("{}/sub", server.uri())))
            .await;

        assert_eq!(payload.attempts, 1);
        assert_eq!(
            payload.outcome,
            FetchOutcome::Success {
                body: "vless://a@b:1\n".into()
            }
        );
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let payload = fetcher
            .fetch_one(&source("flaky", &format!("{}/flaky", server.uri())))
            .await;

        assert_eq!(payload.attempts, 3);
        assert!(payload.outcome.is_success());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let payload = fetcher
            .fetch_one(&source("down", &format!("{}/down", server.uri())))
            .await;

        assert_eq!(payload.attempts, 3);
        assert_eq!(payload.outcome, FetchOutcome::Status { code: 502 });
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let payload = fetcher
            .fetch_one(&source("missing", &format!("{}/missing", server.uri())))
            .await;

        assert_eq!(payload.attempts, 1);
        assert_eq!(payload.outcome, FetchOutcome::Status { code: 404 });
    }

    #[tokio::test]
    async fn test_timeout_is_tagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let config = FetchConfig {
            timeout_secs: 1,
            max_retries: 0,
            ..fast_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let payload = fetcher
            .fetch_one(&source("slow", &format!("{}/slow", server.uri())))
            .await;

        assert_eq!(payload.outcome, FetchOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_registry_order_and_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        Mock::given(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fast"))
            .mount(&server)
            .await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let sources = vec![
            source("slow", &format!("{}/slow", server.uri())),
            source("gone", &format!("{}/gone", server.uri())),
            source("fast", &format!("{}/fast", server.uri())),
        ];

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let mut seen = 0;
        let payloads = fetcher.fetch_all(&sources, |_, n| seen = n).await;

        assert_eq!(seen, 3);
        let ids: Vec<&str> = payloads.iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(ids, ["slow", "gone", "fast"]);
        assert!(payloads[0].outcome.is_success());
        assert_eq!(payloads[1].outcome, FetchOutcome::Status { code: 410 });
        assert!(payloads[2].outcome.is_success());
    }

    #[tokio::test]
    async fn test_concurrency_one_fetches_serially() {
        let server = MockServer::start().await;
        let delay = Duration::from_millis(200);
        let ids = ["a", "b", "c", "d"];
        for id in ids {
            Mock::given(method("GET"))
                .and(path(format!("/{id}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(id).set_delay(delay))
                .expect(1)
                .mount(&server)
                .await;
        }
        let sources: Vec<Source> = ids
            .iter()
            .map(|id| source(id, &format!("{}/{id}", server.uri())))
            .collect();

        let config = FetchConfig {
            concurrency: 1,
            max_retries: 0,
            ..fast_config()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        let started = std::time::Instant::now();
        let payloads = fetcher.fetch_all(&sources, |_, _| {}).await;
        let elapsed = started.elapsed();

        assert!(
            elapsed >= delay * ids.len() as u32,
            "four 200ms fetches overlapped: {elapsed:?}"
        );
        let bodies: Vec<_> = payloads
            .iter()
            .map(|p| match &p.outcome {
                FetchOutcome::Success { body } => body.as_str(),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(bodies, ids);
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = std::env::temp_dir().join(format!("sh-fetch-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("list.txt");
        std::fs::write(&file, "trojan://pw@host:443\n").unwrap();

        let fetcher = Fetcher::new(&fast_config()).unwrap();
        let location = Url::from_file_path(&file).unwrap();
        let payload = fetcher.fetch_one(&source("local", location.as_str())).await;
        assert!(payload.outcome.is_success());

        let missing = Url::from_file_path(dir.join("nope.txt")).unwrap();
        let payload = fetcher.fetch_one(&source("nope", missing.as_str())).await;
        assert_eq!(payload.attempts, 1);
        assert!(matches!(payload.outcome, FetchOutcome::Connection { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
