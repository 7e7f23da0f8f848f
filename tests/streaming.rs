use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;

use olian::application::render::{
    ErrorSink, HTML_CONTENT_TYPE, PostStreamFailure, PrerenderFailure, RenderCoordinator,
    RenderEngine, RenderError, RenderPipelineConfig, RenderRequest, ResponseDescriptor,
    ShellContext, StreamErrorEvent,
};

#[derive(Default)]
struct RecordingSink {
    events: std::sync::Mutex<Vec<StreamErrorEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<StreamErrorEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, event: StreamErrorEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Counts how many times an engine future was torn down before finishing.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine driven by a closure so each test can describe its own timeline.
struct FnEngine<F>(F);

type EngineFuture = BoxFuture<'static, Result<(), RenderError>>;

#[async_trait]
impl<F> RenderEngine for FnEngine<F>
where
    F: Fn(ShellContext) -> EngineFuture + Send + Sync + 'static,
{
    type View = ();

    async fn render(
        &self,
        _request: RenderRequest<()>,
        shell: ShellContext,
    ) -> Result<(), RenderError> {
        (self.0)(shell).await
    }
}

fn coordinator<F>(engine: F) -> (RenderCoordinator<FnEngine<F>>, Arc<RecordingSink>)
where
    F: Fn(ShellContext) -> EngineFuture + Send + Sync + 'static,
{
    let sink = Arc::new(RecordingSink::default());
    let config = RenderPipelineConfig {
        stream_timeout: Duration::from_millis(5_000),
        abort_grace: Duration::from_millis(1_000),
        ..RenderPipelineConfig::default()
    };
    let coordinator = RenderCoordinator::new(Arc::new(FnEngine(engine)), config, sink.clone());
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

fn sleep_ms(ms: u64) -> tokio::time::Sleep {
    tokio::time::sleep(Duration::from_millis(ms))
}

#[tokio::test(start_paused = true)]
async fn shell_ready_streams_body_in_order() {
    let (coordinator, sink) = coordinator(|shell| async move {
        sleep_ms(10).await;
        shell.shell_ready();
        shell.write("<html>");
        sleep_ms(20).await;
        shell.write("</html>");
        sleep_ms(20).await;
        Ok(())
    }
    .boxed());

    let started = Instant::now();
    let descriptor = coordinator
        .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect("shell ready");

    assert_eq!(started.elapsed(), Duration::from_millis(10));
    assert_eq!(descriptor.status(), StatusCode::OK);
    assert_eq!(descriptor.headers()[CONTENT_TYPE], HTML_CONTENT_TYPE);
    assert_eq!(drain(descriptor).await, "<html></html>");
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shell_error_settles_failed_without_a_body() {
    let (coordinator, sink) = coordinator(|shell| async move {
        sleep_ms(5).await;
        shell.shell_error(RenderError::engine("E1"));
        // Anything after the failure must be ignored.
        shell.shell_ready();
        shell.write("<html>");
        Ok(())
    }
    .boxed());

    let failure = coordinator
        .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect_err("shell error");

    assert_eq!(failure, PrerenderFailure::Shell(RenderError::engine("E1")));
    assert_eq!(failure.render_error(), Some(&RenderError::engine("E1")));
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_render_is_aborted_once_at_the_deadline() {
    let drops = Arc::new(AtomicUsize::new(0));
    let engine_drops = Arc::clone(&drops);
    let (coordinator, sink) = coordinator(move |_shell| {
        let guard = DropCounter(Arc::clone(&engine_drops));
        async move {
            let _guard = guard;
            std::future::pending::<()>().await;
            Ok(())
        }
        .boxed()
    });

    let started = Instant::now();
    let failure = coordinator
        .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect_err("deadline exceeded");

    assert_eq!(started.elapsed(), Duration::from_millis(6_000));
    assert_eq!(
        failure,
        PrerenderFailure::DeadlineExceeded(Duration::from_millis(6_000))
    );

    sleep_ms(10_000).await;
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn render_error_after_ready_keeps_the_outcome_and_reports_once() {
    let (coordinator, sink) = coordinator(|shell| async move {
        sleep_ms(10).await;
        shell.write("<html>");
        shell.shell_ready();
        sleep_ms(190).await;
        shell.render_error(RenderError::component("Chat", "E2"));
        shell.write("</html>");
        Ok(())
    }
    .boxed());

    let descriptor = coordinator
        .render(RenderRequest::new("/chat", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect("shell ready");

    assert_eq!(descriptor.status(), StatusCode::OK);
    assert_eq!(drain(descriptor).await, "<html></html>");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].url, "/chat");
    assert_eq!(events[0].elapsed, Duration::from_millis(200));
    assert_eq!(
        events[0].failure,
        PostStreamFailure::Render(RenderError::component("Chat", "E2"))
    );
}

#[tokio::test(start_paused = true)]
async fn deadline_after_ready_truncates_the_body() {
    let (coordinator, sink) = coordinator(|shell| async move {
        sleep_ms(10).await;
        shell.shell_ready();
        while !shell.is_detached() {
            shell.write("tick;");
            sleep_ms(1_000).await;
        }
        Ok(())
    }
    .boxed());

    let descriptor = coordinator
        .render(RenderRequest::new("/slow", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect("shell ready");

    let started = Instant::now();
    let body = drain(descriptor).await;

    // Reader reaches end-of-stream once the deadline (6s from the start) cuts the render.
    assert_eq!(started.elapsed(), Duration::from_millis(5_990));
    assert!(body.starts_with("tick;"));
    assert!(body.matches("tick;").count() <= 6);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].failure,
        PostStreamFailure::DeadlineExceeded(Duration::from_millis(6_000))
    );
}

#[tokio::test(start_paused = true)]
async fn finished_render_never_trips_the_deadline() {
    let (coordinator, sink) = coordinator(|shell| async move {
        shell.shell_ready();
        shell.write("done");
        Ok(())
    }
    .boxed());

    let descriptor = coordinator
        .render(RenderRequest::new("/", ()), StatusCode::OK, HeaderMap::new())
        .await
        .expect("shell ready");
    assert_eq!(drain(descriptor).await, "done");

    sleep_ms(30_000).await;
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_renders_do_not_share_state() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let engine_order = Arc::clone(&order);
    let (coordinator, _sink) = coordinator(move |shell| {
        let order = Arc::clone(&engine_order);
        async move {
            shell.shell_ready();
            order.lock().await.push(());
            shell.write("x");
            Ok(())
        }
        .boxed()
    });

    let renders = (0..8).map(|i| {
        let coordinator = coordinator.clone();
        async move {
            let descriptor = coordinator
                .render(
                    RenderRequest::new(format!("/{i}"), ()),
                    StatusCode::OK,
                    HeaderMap::new(),
                )
                .await
                .expect("shell ready");
            drain(descriptor).await
        }
    });
    let bodies = futures::future::join_all(renders).await;

    assert!(bodies.iter().all(|body| body == "x"));
    assert_eq!(order.lock().await.len(), 8);
}
