use std::{any::Any, fmt, num::NonZeroUsize, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    bridge::{BridgeClosed, BridgeReader, BridgeWriter, byte_bridge},
    deadline::DeadlineGuard,
    engine::{RenderEngine, ShellContext},
    signal::{Effect, RenderMachine, RenderSignal},
    sink::{ErrorSink, StreamErrorEvent},
    types::{PostStreamFailure, PrerenderFailure, RenderError, RenderRequest},
};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_ABORT_GRACE: Duration = Duration::from_millis(1_000);
const DEFAULT_BRIDGE_HIGH_WATER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RenderPipelineConfig {
    /// Nominal budget for a streaming render.
    pub stream_timeout: Duration,
    /// Extra time granted past `stream_timeout` before the render is aborted.
    pub abort_grace: Duration,
    /// Buffered body size above which a slow consumer is reported.
    pub bridge_high_water: NonZeroUsize,
}

impl RenderPipelineConfig {
    /// Time after which an unfinished render is forcibly terminated.
    pub fn deadline(&self) -> Duration {
        self.stream_timeout + self.abort_grace
    }
}

impl Default for RenderPipelineConfig {
    fn default() -> Self {
        Self {
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            abort_grace: DEFAULT_ABORT_GRACE,
            bridge_high_water: NonZeroUsize::new(DEFAULT_BRIDGE_HIGH_WATER_BYTES)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&crate::config::RenderSettings> for RenderPipelineConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            stream_timeout: settings.stream_timeout,
            abort_grace: settings.abort_grace,
            bridge_high_water: settings.bridge_high_water_bytes,
        }
    }
}

/// Status, headers and streaming body of a render that reached its shell.
///
/// Status and headers are fixed when the descriptor is built.
pub struct ResponseDescriptor {
    status: StatusCode,
    headers: HeaderMap,
    body: BridgeReader,
}

impl ResponseDescriptor {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_body(self) -> BridgeReader {
        self.body
    }
}

impl fmt::Debug for ResponseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseDescriptor")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

impl IntoResponse for ResponseDescriptor {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self.body.into_stream()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Drives one render per call: starts the engine, settles exactly one outcome,
/// streams the body, and enforces the deadline.
pub struct RenderCoordinator<E> {
    engine: Arc<E>,
    config: RenderPipelineConfig,
    sink: Arc<dyn ErrorSink>,
}

impl<E> Clone for RenderCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<E: RenderEngine> RenderCoordinator<E> {
    pub fn new(engine: Arc<E>, config: RenderPipelineConfig, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            engine,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &RenderPipelineConfig {
        &self.config
    }

    /// Render `request`, resolving once the shell is ready or the render has
    /// failed before sending anything.
    ///
    /// A failure after the shell is ready never reaches the caller: the body is
    /// cut short and the failure goes to the error sink.
    pub async fn render(
        &self,
        request: RenderRequest<E::View>,
        status: StatusCode,
        headers: HeaderMap,
    ) -> Result<ResponseDescriptor, PrerenderFailure> {
        let render_id = Uuid::new_v4();
        let started = Instant::now();
        let url = request.url.clone();

        if let Err(error) = self.engine.start(&request) {
            counter!("olian_render_prerender_failure_total").increment(1);
            warn!(
                target = "olian::render",
                render_id = %render_id,
                url = %url,
                error = %error,
                "render engine failed to start"
            );
            return Err(PrerenderFailure::Startup(error));
        }

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = oneshot::channel();
        let (writer, reader) = byte_bridge(self.config.bridge_high_water);

        let engine_task = spawn_engine(
            Arc::clone(&self.engine),
            request,
            ShellContext::new(signals_tx.clone()),
            signals_tx.clone(),
        );

        let deadline = self.config.deadline();
        let guard = DeadlineGuard::arm(deadline, move || {
            let _ = signals_tx.send(RenderSignal::AbortRequested);
        });

        let driver = RenderDriver {
            render_id,
            url,
            started,
            machine: RenderMachine::new(deadline),
            status,
            headers: Some(headers),
            reader: Some(reader),
            writer,
            settle: Some(settle_tx),
            engine_task,
            guard,
            sink: Arc::clone(&self.sink),
        };
        tokio::spawn(driver.run(signals_rx));

        settle_rx
            .await
            .unwrap_or(Err(PrerenderFailure::Interrupted))
    }
}

fn spawn_engine<E: RenderEngine>(
    engine: Arc<E>,
    request: RenderRequest<E::View>,
    shell: ShellContext,
    completion: mpsc::UnboundedSender<RenderSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = AssertUnwindSafe(engine.render(request, shell))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(RenderError::panicked(panic_message(payload.as_ref()))));
        let _ = completion.send(RenderSignal::Completed(result));
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

enum Flow {
    Continue,
    Stop,
}

struct RenderDriver {
    render_id: Uuid,
    url: String,
    started: Instant,
    machine: RenderMachine,
    status: StatusCode,
    headers: Option<HeaderMap>,
    reader: Option<BridgeReader>,
    writer: BridgeWriter,
    settle: Option<oneshot::Sender<Result<ResponseDescriptor, PrerenderFailure>>>,
    engine_task: JoinHandle<()>,
    guard: DeadlineGuard,
    sink: Arc<dyn ErrorSink>,
}

impl RenderDriver {
    async fn run(mut self, mut signals: mpsc::UnboundedReceiver<RenderSignal>) {
        'signals: while let Some(signal) = signals.recv().await {
            for effect in self.machine.apply(signal) {
                if let Flow::Stop = self.perform(effect) {
                    break 'signals;
                }
            }
            if self.machine.phase().is_terminal() {
                break;
            }
        }

        self.finish();
    }

    fn perform(&mut self, effect: Effect) -> Flow {
        match effect {
            Effect::Ready { errored } => self.settle_ready(errored),
            Effect::Fail(failure) => {
                self.settle_failed(failure);
                Flow::Continue
            }
            Effect::Forward(chunk) => match self.writer.write(chunk) {
                Ok(()) | Err(BridgeClosed::Closed) => Flow::Continue,
                Err(BridgeClosed::ReaderDropped) => {
                    debug!(
                        target = "olian::render",
                        render_id = %self.render_id,
                        "response body dropped by the transport; stopping render"
                    );
                    Flow::Stop
                }
            },
            Effect::Report(failure) => {
                self.report(failure);
                Flow::Continue
            }
            Effect::Warn(error) => {
                warn!(
                    target = "olian::render",
                    render_id = %self.render_id,
                    url = %self.url,
                    error = %error,
                    "render error before the shell was ready"
                );
                Flow::Continue
            }
            Effect::Close => {
                self.writer.close();
                Flow::Continue
            }
            Effect::Abort => {
                counter!("olian_render_deadline_total").increment(1);
                warn!(
                    target = "olian::render",
                    render_id = %self.render_id,
                    url = %self.url,
                    deadline_ms = self.guard.duration().as_millis() as u64,
                    "render deadline exceeded; aborting engine"
                );
                self.engine_task.abort();
                Flow::Continue
            }
            Effect::Truncate => {
                let discarded = self.writer.abort();
                debug!(
                    target = "olian::render",
                    render_id = %self.render_id,
                    discarded_bytes = discarded,
                    "response body truncated"
                );
                Flow::Continue
            }
            Effect::Ignore(reason) => {
                debug!(
                    target = "olian::render",
                    render_id = %self.render_id,
                    reason,
                    "render signal ignored"
                );
                Flow::Continue
            }
        }
    }

    fn settle_ready(&mut self, errored: bool) -> Flow {
        let (Some(settle), Some(reader)) = (self.settle.take(), self.reader.take()) else {
            return Flow::Continue;
        };

        let mut headers = self.headers.take().unwrap_or_default();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        let status = if errored {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            self.status
        };

        histogram!("olian_render_shell_ms").record(self.started.elapsed().as_secs_f64() * 1_000.0);
        debug!(
            target = "olian::render",
            render_id = %self.render_id,
            url = %self.url,
            status = status.as_u16(),
            "render shell ready"
        );

        let descriptor = ResponseDescriptor {
            status,
            headers,
            body: reader,
        };
        if settle.send(Ok(descriptor)).is_err() {
            debug!(
                target = "olian::render",
                render_id = %self.render_id,
                "render caller went away before the shell was ready"
            );
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn settle_failed(&mut self, failure: PrerenderFailure) {
        counter!("olian_render_prerender_failure_total").increment(1);
        warn!(
            target = "olian::render",
            render_id = %self.render_id,
            url = %self.url,
            error = %failure,
            "render failed before the shell was ready"
        );
        self.reader = None;
        if let Some(settle) = self.settle.take() {
            let _ = settle.send(Err(failure));
        }
    }

    fn report(&self, failure: PostStreamFailure) {
        counter!("olian_render_stream_error_total").increment(1);
        self.sink.report(StreamErrorEvent {
            render_id: self.render_id,
            url: self.url.clone(),
            failure,
            elapsed: self.started.elapsed(),
        });
    }

    fn finish(self) {
        self.guard.cancel();
        self.engine_task.abort();
        self.writer.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<StreamErrorEvent>>,
    }

    impl ErrorSink for RecordingSink {
        fn report(&self, event: StreamErrorEvent) {
            self.events.lock().expect("sink lock").push(event);
        }
    }

    /// Plays back a fixed script; each step waits its delay before running.
    struct ScriptedEngine {
        steps: Vec<(u64, Step)>,
    }

    #[derive(Clone)]
    enum Step {
        Write(&'static str),
        Ready,
        ShellError(&'static str),
        RenderError(&'static str),
        Panic,
    }

    #[async_trait]
    impl RenderEngine for ScriptedEngine {
        type View = ();

        async fn render(
            &self,
            _request: RenderRequest<()>,
            shell: ShellContext,
        ) -> Result<(), RenderError> {
            for (delay_ms, step) in self.steps.clone() {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                match step {
                    Step::Write(text) => shell.write(Bytes::from_static(text.as_bytes())),
                    Step::Ready => shell.shell_ready(),
                    Step::ShellError(message) => shell.shell_error(RenderError::engine(message)),
                    Step::RenderError(message) => {
                        shell.render_error(RenderError::component("Chat", message))
                    }
                    Step::Panic => panic!("engine exploded"),
                }
            }
            Ok(())
        }
    }

    fn coordinator(steps: Vec<(u64, Step)>) -> (RenderCoordinator<ScriptedEngine>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let coordinator = RenderCoordinator::new(
            Arc::new(ScriptedEngine { steps }),
            RenderPipelineConfig::default(),
            sink.clone(),
        );
        (coordinator, sink)
    }

    async fn drain(descriptor: ResponseDescriptor) -> String {
        let mut body = descriptor.into_body();
        let mut out = Vec::new();
        while let Some(chunk) = body.next_chunk().await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8(out).expect("utf-8 body")
    }

    #[tokio::test(start_paused = true)]
    async fn ready_render_keeps_caller_headers_and_status() {
        let (coordinator, sink) = coordinator(vec![(5, Step::Ready), (5, Step::Write("<main/>"))]);
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let descriptor = coordinator
            .render(RenderRequest::new("/", ()), StatusCode::NOT_FOUND, headers)
            .await
            .expect("shell ready");

        assert_eq!(descriptor.status(), StatusCode::NOT_FOUND);
        assert_eq!(descriptor.headers()["x-request-id"], "abc");
        assert_eq!(descriptor.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
        assert_eq!(drain(descriptor).await, "<main/>");
        assert!(sink.events.lock().expect("sink lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn startup_failure_is_a_prerender_failure() {
        struct Refusing;

        #[async_trait]
        impl RenderEngine for Refusing {
            type View = ();

            fn start(&self, _request: &RenderRequest<()>) -> Result<(), RenderError> {
                Err(RenderError::engine("no route"))
            }

            async fn render(
                &self,
                _request: RenderRequest<()>,
                _shell: ShellContext,
            ) -> Result<(), RenderError> {
                unreachable!("render must not run when start fails")
            }
        }

        let coordinator = RenderCoordinator::new(
            Arc::new(Refusing),
            RenderPipelineConfig::default(),
            Arc::new(RecordingSink::default()),
        );
        let failure = coordinator
            .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
            .await
            .expect_err("startup failure");

        assert_eq!(
            failure,
            PrerenderFailure::Startup(RenderError::engine("no route"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panic_before_shell_is_a_prerender_failure() {
        let (coordinator, _sink) = coordinator(vec![(5, Step::Panic)]);
        let failure = coordinator
            .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
            .await
            .expect_err("panic before shell");

        assert_eq!(
            failure,
            PrerenderFailure::Shell(RenderError::panicked("engine exploded"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panic_after_shell_is_reported_and_body_closes() {
        let (coordinator, sink) = coordinator(vec![
            (5, Step::Write("<html>")),
            (0, Step::Ready),
            (10, Step::Panic),
        ]);
        let descriptor = coordinator
            .render(RenderRequest::new("/chat", ()), StatusCode::OK, HeaderMap::new())
            .await
            .expect("shell ready");

        assert_eq!(drain(descriptor).await, "<html>");
        let events = sink.events.lock().expect("sink lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "/chat");
        assert_eq!(
            events[0].failure,
            PostStreamFailure::Render(RenderError::panicked("engine exploded"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn render_error_before_shell_forces_500() {
        let (coordinator, sink) = coordinator(vec![(1, Step::RenderError("early")), (1, Step::Ready)]);
        let descriptor = coordinator
            .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
            .await
            .expect("shell ready");

        assert_eq!(descriptor.status(), StatusCode::INTERNAL_SERVER_ERROR);
        drain(descriptor).await;
        assert!(sink.events.lock().expect("sink lock").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_body_stops_the_engine() {
        let (coordinator, _sink) = coordinator(vec![
            (1, Step::Ready),
            (10, Step::Write("a")),
            (10, Step::Write("b")),
        ]);
        let descriptor = coordinator
            .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
            .await
            .expect("shell ready");
        drop(descriptor);

        // Nothing observable is left to assert beyond not hanging or panicking.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn deadline_is_timeout_plus_grace() {
        let config = RenderPipelineConfig::default();
        assert_eq!(config.deadline(), Duration::from_millis(6_000));
    }
}
