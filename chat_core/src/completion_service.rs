use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;

use crate::context_assembler::ContextAssembler;
use crate::document_processor::DocumentExtractor;
use crate::error::{ChatError, Result};
use crate::gemini_service::{ChunkStream, ModelClient};
use crate::models::*;
use crate::prompt::{augment_prompt, SYSTEM_INSTRUCTION};

/// Events for one response, ending with `Done` or an error item.
pub type EventStream = ReceiverStream<Result<StreamEvent>>;

const EVENT_BUFFER: usize = 32;

/// Relays one streaming completion per request. Holds no conversation state;
/// everything arrives with the request.
pub struct CompletionService {
    model: Arc<dyn ModelClient>,
    extractor: Arc<dyn DocumentExtractor>,
    assembler: ContextAssembler,
    request_timeout: Duration,
}

impl CompletionService {
    pub fn new(
        model: Arc<dyn ModelClient>,
        extractor: Arc<dyn DocumentExtractor>,
        assembler: ContextAssembler,
        request_timeout: Duration,
    ) -> Self {
        Self {
            model,
            extractor,
            assembler,
            request_timeout,
        }
    }

    /// Runs everything that can fail cleanly (validation, extraction, opening
    /// the upstream call and waiting for its first chunk), then hands the rest
    /// of the stream to a producer task.
    pub async fn start(&self, request: CompletionRequest) -> Result<EventStream> {
        if request.prompt.trim().is_empty() {
            return Err(ChatError::Input("Prompt is required".to_string()));
        }

        log::info!(
            "Completion request: prompt {} chars, {} history turns, file: {}, cached document: {}",
            request.prompt.chars().count(),
            request.history.len(),
            request.file.is_some(),
            request.cached_document_text.is_some()
        );

        let mut extracted = None;
        let document = match request.file {
            Some(bytes) => {
                if bytes.is_empty() {
                    return Err(ChatError::Input("uploaded file is empty".to_string()));
                }
                let text = self.extractor.extract(bytes).await?;
                extracted = Some(text.clone());
                Some(DocumentContext {
                    full_text: text,
                    is_new_upload: true,
                })
            }
            None => request
                .cached_document_text
                .filter(|text| !text.trim().is_empty())
                .map(|text| DocumentContext {
                    full_text: text,
                    is_new_upload: false,
                }),
        };

        let prompt = augment_prompt(&request.prompt);
        let contents = self
            .assembler
            .assemble(&request.history, document.as_ref(), &prompt);

        let timeout_secs = self.request_timeout.as_secs();
        let deadline = Instant::now() + self.request_timeout;

        let model_request = ModelRequest {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            contents,
        };
        let mut upstream = timeout_at(deadline, self.model.stream_chat(model_request))
            .await
            .map_err(|_| ChatError::Timeout(timeout_secs))??;

        let first = match timeout_at(deadline, upstream.next()).await {
            Err(_) => return Err(ChatError::Timeout(timeout_secs)),
            Ok(Some(Err(e))) => {
                log::error!("{} failed before streaming: {}", self.model.name(), e);
                return Err(e);
            }
            Ok(Some(Ok(text))) => Some(text),
            Ok(None) => None,
        };

        log::info!("Starting stream response from {}", self.model.name());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(produce(upstream, first, extracted, deadline, timeout_secs, tx));
        Ok(ReceiverStream::new(rx))
    }
}

async fn produce(
    mut upstream: ChunkStream,
    first: Option<String>,
    document_text: Option<String>,
    deadline: Instant,
    timeout_secs: u64,
    tx: mpsc::Sender<Result<StreamEvent>>,
) {
    let mut chunk_count = 0usize;
    let mut total_chars = 0usize;
    let mut next_text = first;

    loop {
        if let Some(text) = next_text.take() {
            chunk_count += 1;
            total_chars += text.chars().count();
            if chunk_count % 10 == 0 {
                log::debug!("Streamed {chunk_count} chunks, total length: {total_chars}");
            }
            match deliver(&tx, Ok(StreamEvent::chunk(text)), deadline).await {
                Delivery::Sent => {}
                Delivery::Closed => {
                    log::info!("Client disconnected after {chunk_count} chunks");
                    return;
                }
                Delivery::Stalled => {
                    log::warn!("Client stopped reading after {chunk_count} chunks, dropping upstream stream");
                    let _ = tx.try_send(Err(ChatError::Timeout(timeout_secs)));
                    return;
                }
            }
        }

        let next = tokio::select! {
            _ = tx.closed() => {
                log::info!("Client disconnected after {chunk_count} chunks, dropping upstream stream");
                return;
            }
            next = timeout_at(deadline, upstream.next()) => next,
        };

        match next {
            Ok(Some(Ok(text))) => next_text = Some(text),
            Ok(Some(Err(e))) => {
                log::error!("Stream error after {chunk_count} chunks: {e}");
                drop(upstream);
                deliver(&tx, Err(e), deadline).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                log::error!("Stream timed out after {chunk_count} chunks");
                drop(upstream);
                deliver(&tx, Err(ChatError::Timeout(timeout_secs)), deadline).await;
                return;
            }
        }
    }

    log::info!("Stream complete. Total chunks: {chunk_count}, total length: {total_chars}");
    drop(upstream);
    deliver(&tx, Ok(StreamEvent::done(document_text)), deadline).await;
}

enum Delivery {
    Sent,
    Closed,
    /// The receiver is alive but did not make room before the deadline.
    Stalled,
}

async fn deliver(
    tx: &mpsc::Sender<Result<StreamEvent>>,
    item: Result<StreamEvent>,
    deadline: Instant,
) -> Delivery {
    match timeout_at(deadline, tx.send(item)).await {
        Ok(Ok(())) => Delivery::Sent,
        Ok(Err(_)) => Delivery::Closed,
        Err(_) => Delivery::Stalled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_assembler::DOCUMENT_CONTEXT_ACK;
    use crate::prompt::CHART_REMINDER;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Step {
        Chunk(&'static str),
        Fail(&'static str),
        Hang,
    }

    /// Replays a fixed script and remembers what it was asked.
    struct ScriptedModel {
        script: Vec<Step>,
        reject: Option<&'static str>,
        seen: Mutex<Vec<ModelRequest>>,
        dropped: Arc<AtomicBool>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                reject: None,
                seen: Mutex::new(Vec::new()),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn rejecting(message: &'static str) -> Self {
            Self {
                reject: Some(message),
                ..Self::new(Vec::new())
            }
        }

        fn last_request(&self) -> ModelRequest {
            self.seen.lock().unwrap().last().cloned().expect("model was called")
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn stream_chat(&self, request: ModelRequest) -> Result<ChunkStream> {
            self.seen.lock().unwrap().push(request);
            if let Some(message) = self.reject {
                return Err(ChatError::Upstream(message.to_string()));
            }

            let mut items = Vec::new();
            let mut hang = false;
            for step in &self.script {
                match step {
                    Step::Chunk(t) => items.push(Ok(t.to_string())),
                    Step::Fail(m) => items.push(Err(ChatError::Upstream(m.to_string()))),
                    Step::Hang => {
                        hang = true;
                        break;
                    }
                }
            }

            let guard = DropFlag(self.dropped.clone());
            let head = stream::iter(items).map(move |item| {
                let _guard = &guard;
                item
            });
            if hang {
                Ok(head.chain(stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    struct CannedExtractor {
        text: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl CannedExtractor {
        fn returning(text: &'static str) -> Self {
            Self {
                text: Some(text),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                text: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentExtractor for CannedExtractor {
        async fn extract(&self, _bytes: Bytes) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.text
                .map(str::to_string)
                .ok_or_else(|| ChatError::Extraction("Invalid PDF structure".to_string()))
        }
    }

    fn service_with(
        model: Arc<ScriptedModel>,
        extractor: Arc<CannedExtractor>,
        timeout: Duration,
    ) -> CompletionService {
        CompletionService::new(model, extractor, ContextAssembler::default(), timeout)
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    async fn collect(stream: EventStream) -> Vec<Result<StreamEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn plain_prompt_sends_single_turn_and_streams_chunks() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("Hel"), Step::Chunk("lo")]));
        let service = service_with(
            model.clone(),
            Arc::new(CannedExtractor::failing()),
            Duration::from_secs(5),
        );

        let events = collect(service.start(request("What is 2+2?")).await.unwrap()).await;
        let events: Vec<StreamEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::chunk("Hel"),
                StreamEvent::chunk("lo"),
                StreamEvent::done(None)
            ]
        );

        let sent = model.last_request();
        assert_eq!(sent.contents, vec![ConversationTurn::user("What is 2+2?")]);
        assert_eq!(sent.system_instruction, SYSTEM_INSTRUCTION);
    }

    #[tokio::test]
    async fn new_upload_is_announced_and_returned_on_done() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("summary")]));
        let extractor = Arc::new(CannedExtractor::returning("Page one.\nPage two.\nPage three."));
        let service = service_with(model.clone(), extractor.clone(), Duration::from_secs(5));

        let mut req = request("Summarize");
        req.file = Some(Bytes::from_static(b"%PDF-1.7"));
        let events = collect(service.start(req).await.unwrap()).await;

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        let sent = model.last_request();
        assert_eq!(sent.contents.len(), 3);
        assert!(sent.contents[0].text.contains("Page two."));
        assert_eq!(sent.contents[1].role, Role::Model);
        assert_eq!(sent.contents[2], ConversationTurn::user("Summarize"));

        match events.last() {
            Some(Ok(StreamEvent::Done { document_text })) => {
                assert_eq!(document_text.as_deref(), Some("Page one.\nPage two.\nPage three."));
            }
            other => panic!("unexpected terminal event {other:?}"),
        }
    }

    #[tokio::test]
    async fn cached_document_skips_extraction_and_is_not_echoed() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("ok")]));
        let extractor = Arc::new(CannedExtractor::returning("unused"));
        let service = service_with(model.clone(), extractor.clone(), Duration::from_secs(5));

        let mut req = request("And page 2?");
        req.cached_document_text = Some("cached body".to_string());
        req.history = vec![ConversationTurn::user("hi"), ConversationTurn::model("hello")];
        let events = collect(service.start(req).await.unwrap()).await;

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        let sent = model.last_request();
        assert_eq!(sent.contents.len(), 5);
        assert_eq!(sent.contents[0].text, "[Document Context]\ncached body");
        assert_eq!(sent.contents[1], ConversationTurn::model(DOCUMENT_CONTEXT_ACK));
        assert!(matches!(
            events.last(),
            Some(Ok(StreamEvent::Done { document_text: None }))
        ));
    }

    #[tokio::test]
    async fn blank_cached_document_is_ignored() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("ok")]));
        let service = service_with(
            model.clone(),
            Arc::new(CannedExtractor::failing()),
            Duration::from_secs(5),
        );

        let mut req = request("hi");
        req.cached_document_text = Some("   ".to_string());
        collect(service.start(req).await.unwrap()).await;
        assert_eq!(model.last_request().contents.len(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_aborts_before_model_call() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("never")]));
        let service = service_with(
            model.clone(),
            Arc::new(CannedExtractor::failing()),
            Duration::from_secs(5),
        );

        let mut req = request("Summarize");
        req.file = Some(Bytes::from_static(b"junk"));
        let err = service.start(req).await.unwrap_err();
        assert!(matches!(err, ChatError::Extraction(_)));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_and_empty_file_are_input_errors() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let extractor = Arc::new(CannedExtractor::returning("x"));
        let service = service_with(model.clone(), extractor.clone(), Duration::from_secs(5));

        assert!(matches!(
            service.start(request("  ")).await.unwrap_err(),
            ChatError::Input(_)
        ));

        let mut req = request("read this");
        req.file = Some(Bytes::new());
        assert!(matches!(service.start(req).await.unwrap_err(), ChatError::Input(_)));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chart_prompt_is_augmented_with_reminder() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("```chart")]));
        let service = service_with(
            model.clone(),
            Arc::new(CannedExtractor::failing()),
            Duration::from_secs(5),
        );

        collect(
            service
                .start(request("show me a bar chart comparing X and Y"))
                .await
                .unwrap(),
        )
        .await;
        let last = model.last_request().contents.pop().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text.contains(CHART_REMINDER));
    }

    #[tokio::test]
    async fn upstream_rejection_is_an_immediate_error() {
        let model = Arc::new(ScriptedModel::rejecting("HTTP 503"));
        let service = service_with(model, Arc::new(CannedExtractor::failing()), Duration::from_secs(5));
        assert!(matches!(
            service.start(request("hi")).await.unwrap_err(),
            ChatError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn error_before_first_chunk_is_an_immediate_error() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Fail("safety block")]));
        let service = service_with(model, Arc::new(CannedExtractor::failing()), Duration::from_secs(5));
        assert!(matches!(
            service.start(request("hi")).await.unwrap_err(),
            ChatError::Upstream(_)
        ));
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_without_done() {
        let model = Arc::new(ScriptedModel::new(vec![
            Step::Chunk("one "),
            Step::Chunk("two"),
            Step::Fail("connection reset"),
        ]));
        let service = service_with(model, Arc::new(CannedExtractor::failing()), Duration::from_secs(5));

        let events = collect(service.start(request("count")).await.unwrap()).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Ok(StreamEvent::Chunk { .. })));
        assert!(matches!(events[1], Ok(StreamEvent::Chunk { .. })));
        assert!(matches!(events[2], Err(ChatError::Upstream(_))));
    }

    #[tokio::test]
    async fn stalled_upstream_times_out() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("partial"), Step::Hang]));
        let service = service_with(
            model,
            Arc::new(CannedExtractor::failing()),
            Duration::from_millis(50),
        );

        let events = collect(service.start(request("slow")).await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ChatError::Timeout(_))));
    }

    #[tokio::test]
    async fn silent_upstream_times_out_before_streaming() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Hang]));
        let service = service_with(
            model,
            Arc::new(CannedExtractor::failing()),
            Duration::from_millis(50),
        );
        assert!(matches!(
            service.start(request("slow")).await.unwrap_err(),
            ChatError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn dropping_the_receiver_releases_upstream() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("first"), Step::Hang]));
        let dropped = model.dropped.clone();
        let service = service_with(
            model,
            Arc::new(CannedExtractor::failing()),
            Duration::from_secs(30),
        );

        let mut events = service.start(request("long answer")).await.unwrap();
        assert!(matches!(events.next().await, Some(Ok(StreamEvent::Chunk { .. }))));
        drop(events);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upstream stream was not dropped after client went away");
    }

    /// Yields forever without waiting, like a model that never stops talking.
    struct EndlessModel {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ModelClient for EndlessModel {
        fn name(&self) -> &'static str {
            "endless"
        }

        async fn stream_chat(&self, _request: ModelRequest) -> Result<ChunkStream> {
            let guard = DropFlag(self.dropped.clone());
            Ok(stream::repeat_with(move || {
                let _guard = &guard;
                Ok("tick ".to_string())
            })
            .boxed())
        }
    }

    #[tokio::test]
    async fn unread_receiver_releases_upstream_at_deadline() {
        let dropped = Arc::new(AtomicBool::new(false));
        let service = CompletionService::new(
            Arc::new(EndlessModel {
                dropped: dropped.clone(),
            }),
            Arc::new(CannedExtractor::failing()),
            ContextAssembler::default(),
            Duration::from_millis(50),
        );

        let events = service.start(request("never stop")).await.unwrap();
        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(
            dropped.load(Ordering::SeqCst),
            "upstream stream outlived the deadline while the client was not reading"
        );

        let items: Vec<_> = events.collect().await;
        assert_eq!(items.len(), EVENT_BUFFER);
        assert!(items.iter().all(|item| matches!(item, Ok(StreamEvent::Chunk { .. }))));
    }
}
