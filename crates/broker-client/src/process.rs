use crate::retry::RetryConfig;
use broker_api::{codec, BrokerError, StreamEvent, StreamRequest};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::debug;

/// A process living behind the broker, bound to one stream connection.
///
/// Events arrive in order; [`StreamEvent::Exited`] is terminal. Reads go
/// through the bounded transient-retry policy: an interrupted read is
/// retried up to the configured attempts with a fixed delay, anything else
/// fails the read immediately.
pub struct RemoteProcess {
    id: String,
    stream: UnixStream,
    retry: RetryConfig,
}

impl RemoteProcess {
    pub(crate) fn new(id: String, stream: UnixStream, retry: RetryConfig) -> Self {
        Self { id, stream, retry }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read the next event, seeing through transient interruptions.
    pub async fn next_event(&mut self) -> Result<StreamEvent, BrokerError> {
        let max_attempts = std::cmp::max(1, self.retry.max_attempts);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let outcome = match codec::read_frame::<_, StreamEvent>(&mut self.stream).await {
                // Mid-stream errors reported by the broker classify like
                // local read errors: interrupted is transient.
                Ok(StreamEvent::Error { message }) => {
                    Err(BrokerError::from_service_message(&message))
                }
                Ok(event) => Ok(event),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(event) => return Ok(event),
                Err(err) if err.is_transient() => {
                    debug!(
                        target: "broker_client::process",
                        id = %self.id,
                        attempt,
                        max_attempts,
                        "interrupted read, retrying"
                    );
                    last_error = Some(err);
                    if attempt < max_attempts {
                        sleep(self.retry.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(BrokerError::Interrupted))
    }

    /// Send bytes to the process's stdin.
    pub async fn write_stdin(&mut self, data: &[u8]) -> Result<(), BrokerError> {
        let request = StreamRequest::Stdin {
            data_b64: broker_api::encode_payload(data),
        };
        codec::write_frame(&mut self.stream, &request).await
    }

    /// Close the process's stdin, signalling end of input.
    pub async fn close_stdin(&mut self) -> Result<(), BrokerError> {
        codec::write_frame(&mut self.stream, &StreamRequest::CloseStdin).await
    }
}
