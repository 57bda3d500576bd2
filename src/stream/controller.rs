//! Stream Controller
//!
//! Drives one streaming response: awaits the connection, reads frames,
//! decodes and accumulates them, and yields choice deltas in arrival order.
//! Cancellation is raced against every transport await.

use crate::api::chat::Usage;
use crate::error::{DeepSeekError, Result};
use crate::stream::accumulator::{AccumulatedMessage, DeltaAccumulator, ProtocolViolation};
use crate::stream::chunk::{decode_frame, ChoiceDelta, StreamEvent};
use crate::stream::frame::{Frame, FrameReader};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Body of a streaming response
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Not polled yet
    Idle,
    /// Waiting for the response
    Connecting,
    /// Reading content frames
    Streaming,
    /// `[DONE]` seen, reading to the end of the body
    Draining,
    /// Body fully consumed without error
    Completed,
    /// Ended by an error or cancellation
    Aborted,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Aborted)
    }
}

#[derive(Debug)]
struct Shared {
    state: StreamState,
    accumulator: DeltaAccumulator,
}

/// Cancellable stream of choice deltas for one chat completion.
///
/// The accumulated messages stay inspectable through [`ChatStream::messages`]
/// during and after iteration, including after an error.
pub struct ChatStream {
    inner: BoxStream<'static, Result<ChoiceDelta>>,
    shared: Arc<Mutex<Shared>>,
}

impl ChatStream {
    /// Stream whose transport is produced by `connect`. Nothing happens
    /// until the stream is first polled.
    pub fn connect<F>(connect: F, cancel: CancellationToken) -> Self
    where
        F: Future<Output = Result<ByteStream>> + Send + 'static,
    {
        Self::with_source(Source::Pending(Box::pin(connect)), cancel)
    }

    /// Stream over an already open transport
    pub fn from_transport<S>(transport: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        let open = async move { Ok::<ByteStream, DeepSeekError>(transport.boxed()) };
        Self::with_source(Source::Pending(Box::pin(open)), cancel)
    }

    fn with_source(source: Source, cancel: CancellationToken) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            state: StreamState::Idle,
            accumulator: DeltaAccumulator::new(),
        }));

        let driver = Driver {
            source,
            reader: FrameReader::new(),
            pending: VecDeque::new(),
            failure: None,
            cancel,
            shared: shared.clone(),
        };

        let inner = futures::stream::unfold(driver, |mut driver| async move {
            driver.next_item().await.map(|item| (item, driver))
        })
        .fuse()
        .boxed();

        Self { inner, shared }
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    /// Copy of every accumulated message, ordered by choice index
    pub fn messages(&self) -> Vec<AccumulatedMessage> {
        self.shared.lock().accumulator.messages().cloned().collect()
    }

    /// Copy of the accumulated message for one choice
    pub fn message(&self, index: u32) -> Option<AccumulatedMessage> {
        self.shared.lock().accumulator.message(index).cloned()
    }

    pub fn usage(&self) -> Option<Usage> {
        self.shared.lock().accumulator.usage().cloned()
    }

    pub fn model(&self) -> Option<String> {
        self.shared.lock().accumulator.model().map(str::to_string)
    }

    pub fn violations(&self) -> Vec<ProtocolViolation> {
        self.shared.lock().accumulator.violations().to_vec()
    }

    /// Drain the stream and return the finished messages
    pub async fn collect_messages(mut self) -> Result<Vec<AccumulatedMessage>> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(self.messages())
    }
}

impl Stream for ChatStream {
    type Item = Result<ChoiceDelta>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Where the driver gets its bytes from
enum Source {
    Pending(BoxFuture<'static, Result<ByteStream>>),
    Open(ByteStream),
    Released,
}

/// Owns the transport for the lifetime of one stream
struct Driver {
    source: Source,
    reader: FrameReader,
    /// Deltas already accumulated but not yet yielded
    pending: VecDeque<ChoiceDelta>,
    /// Terminal error, yielded after `pending` drains
    failure: Option<DeepSeekError>,
    cancel: CancellationToken,
    shared: Arc<Mutex<Shared>>,
}

impl Driver {
    async fn next_item(&mut self) -> Option<Result<ChoiceDelta>> {
        loop {
            if self.cancel.is_cancelled() && !self.state().is_terminal() {
                self.pending.clear();
                self.abort(DeepSeekError::Cancelled);
            }

            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }

            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }

            if self.state().is_terminal() {
                return None;
            }

            if let Err(err) = self.step().await {
                self.abort(err);
            }
        }
    }

    /// Advance by one transport event
    async fn step(&mut self) -> Result<()> {
        match self.state() {
            StreamState::Idle => {
                self.set_state(StreamState::Connecting);
                self.connect().await
            }
            StreamState::Connecting => self.connect().await,
            StreamState::Streaming | StreamState::Draining => self.read().await,
            StreamState::Completed | StreamState::Aborted => Ok(()),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let Source::Pending(connect) = &mut self.source else {
            return Err(DeepSeekError::Internal(
                "stream connected twice".to_string(),
            ));
        };

        let transport = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DeepSeekError::Cancelled),
            transport = connect => transport?,
        };

        debug!("stream connected");
        self.source = Source::Open(transport);
        self.set_state(StreamState::Streaming);
        Ok(())
    }

    async fn read(&mut self) -> Result<()> {
        let Source::Open(transport) = &mut self.source else {
            return Err(DeepSeekError::Internal(
                "read without an open transport".to_string(),
            ));
        };

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DeepSeekError::Cancelled),
            next = transport.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                let (frames, err) = self.reader.feed(&bytes);
                for frame in frames {
                    self.handle_frame(frame)?;
                }
                err.map_or(Ok(()), Err)
            }
            Some(Err(err @ DeepSeekError::TransportFailure(_))) => Err(err),
            Some(Err(err)) => Err(DeepSeekError::TransportFailure(err.to_string())),
            None => self.close(),
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if self.state() == StreamState::Draining {
            warn!(?frame, "frame after [DONE] ignored");
            return Ok(());
        }

        trace!(?frame, "frame received");
        match decode_frame(&frame)? {
            StreamEvent::Done => {
                self.set_state(StreamState::Draining);
                Ok(())
            }
            StreamEvent::Chunk(chunk) => {
                if chunk.is_usage_only() {
                    trace!(usage = ?chunk.usage, "usage chunk received");
                }
                let mut shared = self.shared.lock();
                shared.accumulator.observe_chunk(&chunk);
                for choice in chunk.choices {
                    shared.accumulator.apply(&choice)?;
                    self.pending.push_back(choice);
                }
                Ok(())
            }
        }
    }

    /// The transport reported end of body
    fn close(&mut self) -> Result<()> {
        self.release();
        let leftover = self.reader.finish()?;

        match (self.state(), leftover) {
            (StreamState::Draining, _) | (_, Some(Frame::Done)) => {
                self.set_state(StreamState::Completed);
                Ok(())
            }
            _ => Err(DeepSeekError::TransportFailure(
                "connection closed before [DONE]".to_string(),
            )),
        }
    }

    fn abort(&mut self, err: DeepSeekError) {
        self.release();
        if err.is_cancelled() {
            debug!("stream cancelled");
        } else {
            warn!(error = %err, "stream aborted");
        }
        self.set_state(StreamState::Aborted);
        self.failure = Some(err);
    }

    fn release(&mut self) {
        if !matches!(self.source, Source::Released) {
            self.source = Source::Released;
            debug!("transport released");
        }
    }

    fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    fn set_state(&self, state: StreamState) {
        let mut shared = self.shared.lock();
        debug!(from = ?shared.state, to = ?state, "stream state");
        shared.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::chunk::FinishReason;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const HELLO: &str = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    fn transport(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<Bytes, DeepSeekError>(Bytes::from(p))),
        )
    }

    fn single(body: &str) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        transport(vec![body.as_bytes().to_vec()])
    }

    async fn drain(stream: &mut ChatStream) -> (Vec<ChoiceDelta>, Option<DeepSeekError>) {
        let mut deltas = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => deltas.push(delta),
                Err(err) => {
                    assert!(stream.next().await.is_none());
                    return (deltas, Some(err));
                }
            }
        }
        (deltas, None)
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let mut stream = ChatStream::from_transport(single(HELLO), CancellationToken::new());
        assert_eq!(stream.state(), StreamState::Idle);

        let (deltas, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(deltas.len(), 3);
        assert_eq!(stream.state(), StreamState::Completed);

        let message = stream.message(0).unwrap();
        assert_eq!(message.content, "Hello");
        assert_eq!(message.finish_reason, Some(FinishReason::Stop));

        // Polling a finished stream keeps returning None
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frame_boundary_independence() {
        let bytes = HELLO.as_bytes();
        for split in 1..bytes.len() {
            let parts = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
            let stream = ChatStream::from_transport(transport(parts), CancellationToken::new());
            let messages = stream.collect_messages().await.unwrap();
            assert_eq!(messages[0].content, "Hello", "split at {}", split);
        }

        let bytewise = bytes.iter().map(|b| vec![*b]).collect();
        let messages = ChatStream::from_transport(transport(bytewise), CancellationToken::new())
            .collect_messages()
            .await
            .unwrap();
        assert_eq!(messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_tool_call_and_usage() {
        let body = concat!(
            "data: {\"model\":\"deepseek-chat\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"GetWeather\",\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"NYC\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":4,\"total_tokens\":7}}\n\n",
            "data: [DONE]\n\n",
        );

        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(deltas.len(), 3);

        let message = stream.message(0).unwrap();
        let call = message.tool_call(0).unwrap();
        assert_eq!(call.arguments, r#"{"city":"NYC"}"#);
        assert!(call.parse_arguments::<serde_json::Value>().is_ok());
        assert_eq!(stream.usage().unwrap().total_tokens, 7);
        assert_eq!(stream.model().as_deref(), Some("deepseek-chat"));
    }

    #[tokio::test]
    async fn test_truncated_stream_keeps_partial_content() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" more\"}}]}",
        );

        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;

        assert_eq!(deltas.len(), 1);
        assert!(matches!(err, Some(DeepSeekError::TruncatedStream { .. })));
        assert_eq!(stream.state(), StreamState::Aborted);
        assert_eq!(stream.message(0).unwrap().content, "partial");
    }

    #[tokio::test]
    async fn test_close_without_done_is_transport_failure() {
        let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (_, err) = drain(&mut stream).await;
        assert!(matches!(err, Some(DeepSeekError::TransportFailure(_))));
    }

    #[tokio::test]
    async fn test_undelimited_done_completes() {
        let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]";
        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (_, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(stream.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn test_draining_truncation_and_ignored_frames() {
        let body = format!("{}data: {{\"choices\":[]}}\n\n", HELLO);
        let mut stream = ChatStream::from_transport(single(&body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(deltas.len(), 3);

        let body = format!("{}data: {{\"cho", HELLO);
        let mut stream = ChatStream::from_transport(single(&body), CancellationToken::new());
        let (_, err) = drain(&mut stream).await;
        assert!(matches!(err, Some(DeepSeekError::TruncatedStream { .. })));
        assert_eq!(stream.message(0).unwrap().content, "Hello");
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_fatal() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: not json\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"never\"}}]}\n\n",
        );

        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert_eq!(deltas.len(), 1);
        assert!(matches!(err, Some(DeepSeekError::MalformedChunk(_))));
        assert_eq!(stream.message(0).unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_bad_record_after_good_frame_in_one_read() {
        let good = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n".to_vec();
        let bad = b"data: \xff\n\n".to_vec();
        let joined = [good.clone(), bad.clone()].concat();

        for parts in [vec![good, bad], vec![joined]] {
            let mut stream = ChatStream::from_transport(transport(parts), CancellationToken::new());
            let (deltas, err) = drain(&mut stream).await;
            assert_eq!(deltas.len(), 1);
            assert!(matches!(err, Some(DeepSeekError::MalformedChunk(_))));
            assert_eq!(stream.message(0).unwrap().content, "ok");
        }
    }

    #[tokio::test]
    async fn test_trailing_comment_after_done_completes() {
        let body = format!("{}: keep-alive\n", HELLO);
        let mut stream = ChatStream::from_transport(single(&body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert!(err.is_none());
        assert_eq!(deltas.len(), 3);
        assert_eq!(stream.state(), StreamState::Completed);
    }

    #[tokio::test]
    async fn test_delta_after_finish_is_protocol_error() {
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"}}]}\n\n",
            "data: [DONE]\n\n",
        );

        let mut stream = ChatStream::from_transport(single(body), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert_eq!(deltas.len(), 1);
        assert!(matches!(err, Some(DeepSeekError::StreamProtocol(_))));
    }

    #[tokio::test]
    async fn test_transport_error_aborts() {
        let parts: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n\n",
            )),
            Err(DeepSeekError::Request("connection reset".to_string())),
        ];
        let mut stream =
            ChatStream::from_transport(futures::stream::iter(parts), CancellationToken::new());
        let (deltas, err) = drain(&mut stream).await;
        assert_eq!(deltas.len(), 1);
        assert!(matches!(err, Some(DeepSeekError::TransportFailure(_))));
        assert_eq!(stream.message(0).unwrap().content, "x");
    }

    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let released = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));

        let flag = ReleaseFlag(released.clone());
        let counter = reads.clone();
        let first = Bytes::from_static(
            b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        );
        let body = futures::stream::iter(vec![Ok::<Bytes, DeepSeekError>(first)])
            .chain(futures::stream::pending())
            .map(move |item| {
                let _held = &flag;
                counter.fetch_add(1, Ordering::SeqCst);
                item
            });

        let cancel = CancellationToken::new();
        let mut stream = ChatStream::from_transport(body, cancel.clone());

        let delta = stream.next().await.unwrap().unwrap();
        assert_eq!(delta.delta.content.as_deref(), Some("Hel"));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        // The driver is parked on the pending transport until cancelled
        let waiter = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        let (item, mut stream) = waiter.await.unwrap();
        assert!(matches!(item, Some(Err(DeepSeekError::Cancelled))));
        assert!(stream.next().await.is_none());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Aborted);
        assert_eq!(stream.message(0).unwrap().content, "Hel");
    }

    #[tokio::test]
    async fn test_cancel_while_connecting() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(released.clone());

        let cancel = CancellationToken::new();
        let mut stream = ChatStream::connect(
            async move {
                let _held = flag;
                futures::future::pending::<()>().await;
                Ok::<ByteStream, DeepSeekError>(single(HELLO).boxed())
            },
            cancel.clone(),
        );

        let waiter = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        let (item, mut stream) = waiter.await.unwrap();
        assert!(matches!(item, Some(Err(DeepSeekError::Cancelled))));
        assert!(stream.next().await.is_none());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(stream.state(), StreamState::Aborted);
        assert!(stream.messages().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_draining() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = ReleaseFlag(released.clone());
        let body = futures::stream::iter(vec![Ok::<Bytes, DeepSeekError>(Bytes::from_static(
            HELLO.as_bytes(),
        ))])
        .chain(futures::stream::pending())
        .map(move |item| {
            let _held = &flag;
            item
        });

        let cancel = CancellationToken::new();
        let mut stream = ChatStream::from_transport(body, cancel.clone());
        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }
        assert_eq!(stream.state(), StreamState::Draining);

        let waiter = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::task::yield_now().await;
        cancel.cancel();

        let (item, mut stream) = waiter.await.unwrap();
        assert!(matches!(item, Some(Err(DeepSeekError::Cancelled))));
        assert!(stream.next().await.is_none());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(stream.state(), StreamState::Aborted);
        assert_eq!(stream.message(0).unwrap().content, "Hello");
    }

    #[tokio::test]
    async fn test_cancel_before_connect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let mut stream = ChatStream::connect(
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<ByteStream, DeepSeekError>(single(HELLO).boxed())
            },
            cancel,
        );

        let (deltas, err) = drain(&mut stream).await;
        assert!(deltas.is_empty());
        assert!(matches!(err, Some(DeepSeekError::Cancelled)));
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_error_aborts() {
        let mut stream = ChatStream::connect(
            async { Err::<ByteStream, _>(DeepSeekError::Auth("bad key".to_string())) },
            CancellationToken::new(),
        );
        let (_, err) = drain(&mut stream).await;
        assert!(matches!(err, Some(DeepSeekError::Auth(_))));
        assert_eq!(stream.state(), StreamState::Aborted);
    }
}
