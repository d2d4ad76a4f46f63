use crate::error::Error;
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

/// The remote queue service, reduced to the two calls a send run needs.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait QueueClient {
    /// Looks up the URL of the queue called `queue_name`.
    async fn queue_url(&self, queue_name: &str) -> Result<String, String>;
    /// Sends one message and returns its id, when the service reports one.
    async fn send_message(&self, queue_url: &str, body: Vec<u8>) -> Result<Option<String>, String>;
}

/// Produces the body for one message. Called once per iteration.
#[cfg_attr(any(test, feature = "mocks"), automock)]
pub trait PayloadSource {
    fn next_payload(&mut self) -> Result<Vec<u8>, Error>;
}

/// A resolved queue URL.
///
/// Keeps the text exactly as the operator typed it or the service returned
/// it; that text is what gets sent to and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddress {
    raw: String,
    url: Url,
}

impl QueueAddress {
    /// Accepts `raw` only if it is an absolute URL with a host.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(raw)?;
        if !url.has_host() {
            return Err(url::ParseError::EmptyHost);
        }
        Ok(Self {
            raw: raw.to_string(),
            url,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Turns a queue name or URL into the address messages are sent to.
///
/// Absolute URLs are returned as given. Anything else is looked up by name,
/// with a single call to the queue service.
#[tracing::instrument(skip(client))]
pub async fn resolve_queue_url<C: QueueClient>(
    client: &C,
    identifier: &str,
) -> Result<QueueAddress, Error> {
    if identifier.is_empty() {
        return Err(Error::InvalidInput("empty identifier".to_string()));
    }

    if let Ok(address) = QueueAddress::parse(identifier) {
        tracing::debug!("identifier is already a queue URL");
        return Ok(address);
    }

    let raw_url = client
        .queue_url(identifier)
        .await
        .map_err(|reason| Error::Resolution {
            identifier: identifier.to_string(),
            reason,
        })?;
    tracing::debug!(queue_url = %raw_url, "resolved queue by name");

    QueueAddress::parse(&raw_url).map_err(|e| Error::Resolution {
        identifier: identifier.to_string(),
        reason: format!("service returned an invalid URL '{}': {}", raw_url, e),
    })
}

/// One line of operator output, written after each successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub bytes: usize,
    pub queue_url: QueueAddress,
    pub elapsed: Duration,
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes to {}: time={} ms",
            self.bytes,
            self.queue_url,
            self.elapsed.as_millis()
        )
    }
}

/// Sends `count` messages to `queue_url`, one after another.
///
/// Sleeps for `interval` between sends, never before the first or after the
/// last. The first failure stops the run. Returns how many messages went out.
#[tracing::instrument(skip(client, queue_url, source, out), fields(queue_url = %queue_url))]
pub async fn run_sends<C, P, W>(
    client: &C,
    queue_url: &QueueAddress,
    source: &mut P,
    count: u32,
    interval: Duration,
    out: &mut W,
) -> Result<u32, Error>
where
    C: QueueClient,
    P: PayloadSource + ?Sized,
    W: Write + ?Sized,
{
    let mut sent = 0;
    for i in 0..count {
        let payload = source.next_payload()?;
        let bytes = payload.len();

        let start = Instant::now();
        let message_id = client
            .send_message(queue_url.as_str(), payload)
            .await
            .map_err(Error::Send)?;
        let report = SendReport {
            bytes,
            queue_url: queue_url.clone(),
            elapsed: start.elapsed(),
        };
        sent += 1;
        tracing::debug!(iteration = i, ?message_id, "message sent");

        // The message is already out; a broken stdout is a local failure.
        writeln!(out, "{}", report).map_err(Error::Report)?;

        if i + 1 < count {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::function;
    use mockall::Sequence;

    const QUEUE_URL: &str = "https://sqs.eu-west-1.amazonaws.com/123456789012/orders";

    fn queue_url() -> QueueAddress {
        QueueAddress::parse(QUEUE_URL).unwrap()
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn when_identifier_is_a_url_should_return_it_without_lookup() {
        let mut client = MockQueueClient::new();
        client.expect_queue_url().times(0);

        let result = resolve_queue_url(&client, QUEUE_URL).await.unwrap();

        assert_eq!(result.as_str(), QUEUE_URL);
    }

    #[tokio::test]
    async fn when_identifier_is_a_local_endpoint_url_should_return_it_without_lookup() {
        let mut client = MockQueueClient::new();
        client.expect_queue_url().times(0);

        let result = resolve_queue_url(&client, "http://localhost:9324/000000000000/jobs")
            .await
            .unwrap();

        assert_eq!(result.as_str(), "http://localhost:9324/000000000000/jobs");
    }

    #[tokio::test]
    async fn when_identifier_is_not_canonical_should_keep_it_verbatim() {
        let mut client = MockQueueClient::new();
        client.expect_queue_url().times(0);

        for identifier in [
            "https://sqs.us-east-1.amazonaws.com",
            "HTTPS://SQS.US-EAST-1.amazonaws.com/123/Q",
            "http://localhost:9324/000/my queue",
        ] {
            let result = resolve_queue_url(&client, identifier).await.unwrap();

            assert_eq!(result.as_str(), identifier);
            assert_eq!(result.to_string(), identifier);
        }
    }

    #[tokio::test]
    async fn when_identifier_is_not_canonical_should_send_and_report_it_verbatim() {
        const IDENTIFIER: &str = "HTTP://LocalHost:9324/000000000000/jobs";
        let mut client = MockQueueClient::new();
        client.expect_queue_url().times(0);
        client
            .expect_send_message()
            .with(
                function(|url: &str| url == IDENTIFIER),
                function(|_: &Vec<u8>| true),
            )
            .times(1)
            .returning(|_, _| Ok(None));
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(1)
            .returning(|| Ok(b"ping".to_vec()));
        let mut out = Vec::new();

        let address = resolve_queue_url(&client, IDENTIFIER).await.unwrap();
        run_sends(&client, &address, &mut source, 1, Duration::ZERO, &mut out)
            .await
            .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.starts_with(&format!("4 bytes to {}: time=", IDENTIFIER)));
    }

    #[tokio::test]
    async fn when_identifier_is_empty_should_fail_without_lookup() {
        let mut client = MockQueueClient::new();
        client.expect_queue_url().times(0);

        let result = resolve_queue_url(&client, "").await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn when_identifier_is_a_name_should_lookup_once() {
        let mut client = MockQueueClient::new();
        client
            .expect_queue_url()
            .with(function(|name: &str| name == "orders"))
            .times(1)
            .returning(|_| Ok(QUEUE_URL.to_string()));

        let result = resolve_queue_url(&client, "orders").await.unwrap();

        assert_eq!(result, queue_url());
    }

    #[tokio::test]
    async fn when_lookup_fails_should_return_resolution_error() {
        let mut client = MockQueueClient::new();
        client
            .expect_queue_url()
            .times(1)
            .returning(|_| Err("AWS.SimpleQueueService.NonExistentQueue".to_string()));

        let result = resolve_queue_url(&client, "missing").await;

        match result {
            Err(Error::Resolution { identifier, reason }) => {
                assert_eq!(identifier, "missing");
                assert!(reason.contains("NonExistentQueue"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn when_lookup_returns_garbage_should_return_resolution_error() {
        let mut client = MockQueueClient::new();
        client
            .expect_queue_url()
            .times(1)
            .returning(|_| Ok("not a url".to_string()));

        let result = resolve_queue_url(&client, "orders").await;

        assert!(matches!(result, Err(Error::Resolution { .. })));
    }

    #[tokio::test]
    async fn when_count_is_three_should_send_same_payload_three_times() {
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(3)
            .returning(|| Ok(b"hello queue".to_vec()));
        let mut client = MockQueueClient::new();
        client
            .expect_send_message()
            .with(
                function(|url: &str| url == QUEUE_URL),
                function(|body: &Vec<u8>| body.as_slice() == b"hello queue"),
            )
            .times(3)
            .returning(|_, _| Ok(Some("msg-1".to_string())));
        let mut out = Vec::new();

        let sent = run_sends(&client, &queue_url(), &mut source, 3, Duration::ZERO, &mut out)
            .await
            .unwrap();

        assert_eq!(sent, 3);
        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            assert!(line.starts_with(&format!("11 bytes to {}: time=", QUEUE_URL)));
            assert!(line.ends_with(" ms"));
        }
    }

    #[tokio::test]
    async fn when_count_is_zero_should_not_send() {
        let mut source = MockPayloadSource::new();
        source.expect_next_payload().times(0);
        let mut client = MockQueueClient::new();
        client.expect_send_message().times(0);
        let mut out = Vec::new();

        let sent = run_sends(
            &client,
            &queue_url(),
            &mut source,
            0,
            Duration::from_millis(200),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(sent, 0);
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn when_second_send_fails_should_stop_the_run() {
        let mut seq = Sequence::new();
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(2)
            .returning(|| Ok(b"{}".to_vec()));
        let mut client = MockQueueClient::new();
        client
            .expect_send_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        client
            .expect_send_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err("throttled".to_string()));
        let mut out = Vec::new();

        let result = run_sends(
            &client,
            &queue_url(),
            &mut source,
            5,
            Duration::from_millis(200),
            &mut out,
        )
        .await;

        match result {
            Err(Error::Send(reason)) => assert_eq!(reason, "throttled"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn when_payload_fails_should_not_send() {
        let mut source = MockPayloadSource::new();
        source.expect_next_payload().times(1).returning(|| {
            Err(Error::Read {
                source_name: "stdin".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "closed"),
            })
        });
        let mut client = MockQueueClient::new();
        client.expect_send_message().times(0);
        let mut out = Vec::new();

        let result = run_sends(&client, &queue_url(), &mut source, 2, Duration::ZERO, &mut out).await;

        assert!(matches!(result, Err(Error::Read { .. })));
    }

    #[tokio::test]
    async fn when_report_cannot_be_written_should_fail_with_report_error() {
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(1)
            .returning(|| Ok(b"ping".to_vec()));
        let mut client = MockQueueClient::new();
        client
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(Some("msg-1".to_string())));

        let result = run_sends(
            &client,
            &queue_url(),
            &mut source,
            3,
            Duration::ZERO,
            &mut BrokenPipe,
        )
        .await;

        match result {
            Err(Error::Report(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn when_count_is_two_should_sleep_only_between_sends() {
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(2)
            .returning(|| Ok(b"ping".to_vec()));
        let mut client = MockQueueClient::new();
        client
            .expect_send_message()
            .times(2)
            .returning(|_, _| Ok(None));
        let mut out = Vec::new();
        let interval = Duration::from_millis(500);

        let start = Instant::now();
        run_sends(&client, &queue_url(), &mut source, 2, interval, &mut out)
            .await
            .unwrap();

        assert_eq!(start.elapsed(), interval);
    }

    #[tokio::test(start_paused = true)]
    async fn when_count_is_one_should_not_sleep() {
        let mut source = MockPayloadSource::new();
        source
            .expect_next_payload()
            .times(1)
            .returning(|| Ok(b"ping".to_vec()));
        let mut client = MockQueueClient::new();
        client
            .expect_send_message()
            .times(1)
            .returning(|_, _| Ok(None));
        let mut out = Vec::new();

        let start = Instant::now();
        run_sends(
            &client,
            &queue_url(),
            &mut source,
            1,
            Duration::from_secs(10),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn report_should_render_bytes_url_and_millis() {
        let report = SendReport {
            bytes: 42,
            queue_url: queue_url(),
            elapsed: Duration::from_micros(12_900),
        };

        assert_eq!(
            report.to_string(),
            format!("42 bytes to {}: time=12 ms", QUEUE_URL)
        );
    }
}
