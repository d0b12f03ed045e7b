use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aihelper_core::llm::{ChatRequest, ChatResponse, DynEmbedder};
use aihelper_core::{
    Assistant, AssistantSettings, Collaborators, DocumentFormat, Embedder, HashEmbedder,
    HelperError, LoadOutcome, LocalRetriever, MemoryMailer, PipelineKind, RunLog, ScriptedModel,
    SearchResult, StaticFetcher, StaticSearch,
};
use async_trait::async_trait;
use tempfile::TempDir;

fn field<'a>(request: &'a ChatRequest, label: &str) -> &'a str {
    request
        .last_user_message()
        .and_then(|text| text.split_once(label))
        .map(|(_, rest)| rest.split('\n').next().unwrap_or_default())
        .unwrap_or_default()
}

/// Research stages append a marker to their input; document answers echo the
/// retrieved context.
fn stub_model() -> ScriptedModel {
    ScriptedModel::new(|request| {
        let system = request.system_prompt().unwrap_or_default();
        let reply = if system.starts_with("You are a search agent") {
            "[search]".to_string()
        } else if system.starts_with("You are a synthesizer") {
            format!("{}[synth]", field(request, "Search Results: "))
        } else if system.starts_with("You are a citation") {
            format!("{}[cite]", field(request, "Content: "))
        } else if system.starts_with("You are a fact-checking") {
            format!("{}[fact]", field(request, "Claims: "))
        } else if system.starts_with("You are a bias detection") {
            format!("{}[bias]", field(request, "Content: "))
        } else if system.starts_with("Use the following pieces of context") {
            let context = system.rsplit("----------------\n").next().unwrap_or_default();
            format!("answer from: {context}")
        } else {
            return Err(HelperError::Model(format!("unexpected prompt: {system}")));
        };
        Ok(ChatResponse::text(reply))
    })
}

struct Harness {
    assistant: Assistant,
    mailer: Arc<MemoryMailer>,
    search: Arc<StaticSearch>,
}

fn harness_with(model: ScriptedModel, fetcher: StaticFetcher) -> Harness {
    harness_from(model, fetcher, Arc::new(HashEmbedder::new(128)))
}

fn harness_from(model: ScriptedModel, fetcher: StaticFetcher, embedder: DynEmbedder) -> Harness {
    let mailer = Arc::new(MemoryMailer::new());
    let search = Arc::new(StaticSearch::new(vec![
        SearchResult::new(
            "IEA renewables report",
            "https://iea.example/renewables",
            "Policy support drove record solar additions.",
        ),
        SearchResult::new(
            "EU climate policy",
            "https://eu.example/policy",
            "Auctions replaced feed-in tariffs in most member states.",
        ),
    ]));
    let collaborators = Collaborators {
        model: Arc::new(model),
        retriever: Arc::new(LocalRetriever::new(embedder)),
        search: search.clone(),
        fetcher: Arc::new(fetcher),
        mailer: mailer.clone(),
    };
    Harness {
        assistant: Assistant::new(collaborators, AssistantSettings::default()),
        mailer,
        search,
    }
}

fn harness() -> Harness {
    harness_with(stub_model(), StaticFetcher::new())
}

#[tokio::test]
async fn research_stores_stage_markers_in_order() {
    let h = harness();

    let outcome = h
        .assistant
        .research("s1", "renewable energy policy")
        .await
        .expect("research should succeed");

    let expected = "[search][synth][cite][fact][bias]";
    assert_eq!(outcome.output, expected);
    assert_eq!(
        h.assistant.presenter("s1", PipelineKind::Research).get(),
        (
            "renewable energy policy".to_string(),
            Some(expected.to_string())
        )
    );
    assert_eq!(h.search.queries().len(), 1);
}

#[tokio::test]
async fn failed_research_leaves_previous_result() {
    let h = harness();
    h.assistant.research("s1", "wind power").await.unwrap();
    let before = h.assistant.state("s1", PipelineKind::Research);

    let err = h.assistant.research("s1", "   ").await.unwrap_err();
    assert!(matches!(err, HelperError::MissingInput(_)));
    assert_eq!(h.assistant.state("s1", PipelineKind::Research), before);
}

#[tokio::test]
async fn collaborator_failure_leaves_state_unchanged() {
    let h = harness_with(ScriptedModel::failing("rate limited"), StaticFetcher::new());
    h.assistant
        .presenter("s1", PipelineKind::Essay)
        .set("old topic", "old essay");

    let err = h.assistant.write_essay("s1", "tides").await.unwrap_err();
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(
        h.assistant.presenter("s1", PipelineKind::Essay).get(),
        ("old topic".to_string(), Some("old essay".to_string()))
    );
}

#[tokio::test]
async fn sessions_do_not_share_results() {
    let h = harness();
    h.assistant.research("alice", "solar subsidies").await.unwrap();

    assert!(h.assistant.result("bob", PipelineKind::Research).is_none());
    assert!(h.assistant.result("alice", PipelineKind::Research).is_some());
}

#[tokio::test]
async fn zero_byte_text_file_has_no_content() {
    let h = harness();

    let outcome = h
        .assistant
        .load_document("s1", "empty.txt", DocumentFormat::PlainText, Vec::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        LoadOutcome::NoContent {
            name: "empty.txt".into()
        }
    );
    assert!(matches!(
        h.assistant.ask("s1", "anything?").await.unwrap_err(),
        HelperError::NoDocumentLoaded
    ));
}

#[tokio::test]
async fn whitespace_only_document_keeps_previous_index() {
    let h = harness();
    h.assistant
        .load_document("s1", "plant.txt", DocumentFormat::PlainText, b"Turbines spin.".to_vec())
        .await
        .unwrap();

    let outcome = h
        .assistant
        .load_document(
            "s1",
            "blank.txt",
            DocumentFormat::PlainText,
            b"   \n\n  \t ".to_vec(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        LoadOutcome::NoContent {
            name: "blank.txt".into()
        }
    );
    let answer = h.assistant.ask("s1", "What spins?").await.unwrap();
    assert!(answer.contains("Turbines spin."));
}

/// Embeds successfully `remaining` times, then fails.
struct ExhaustibleEmbedder {
    inner: HashEmbedder,
    remaining: AtomicUsize,
}

#[async_trait]
impl Embedder for ExhaustibleEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, HelperError> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(HelperError::Model("embedding quota exceeded".into()));
        }
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn failed_reindex_keeps_the_previous_document() {
    // One call indexes the first document and one answers the question.
    let embedder = Arc::new(ExhaustibleEmbedder {
        inner: HashEmbedder::new(128),
        remaining: AtomicUsize::new(1),
    });
    let h = harness_from(stub_model(), StaticFetcher::new(), embedder.clone());

    h.assistant
        .load_document("s1", "first.txt", DocumentFormat::PlainText, b"Dams store water.".to_vec())
        .await
        .unwrap();
    let before = h.assistant.state("s1", PipelineKind::DocumentQa);

    let err = h
        .assistant
        .load_document("s1", "second.txt", DocumentFormat::PlainText, b"Wind farms.".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, HelperError::Model(_)));
    assert_eq!(h.assistant.state("s1", PipelineKind::DocumentQa), before);

    embedder.remaining.store(1, Ordering::SeqCst);
    let answer = h.assistant.ask("s1", "What do dams do?").await.unwrap();
    assert!(answer.contains("Dams store water."));
}

#[tokio::test]
async fn unsupported_mime_leaves_state_unchanged() {
    let h = harness();
    let before = h.assistant.state("s1", PipelineKind::DocumentQa);

    let err = h
        .assistant
        .load_document_with_mime("s1", "photo.png", "image/png", vec![1, 2, 3])
        .await
        .unwrap_err();

    assert!(matches!(err, HelperError::UnsupportedFormat(mime) if mime == "image/png"));
    assert_eq!(h.assistant.state("s1", PipelineKind::DocumentQa), before);
}

#[tokio::test]
async fn text_document_answers_from_its_chunks() {
    let h = harness();
    let text = "The reactor was commissioned in 1998 and produces 600 MW.";

    let outcome = h
        .assistant
        .load_document_with_mime("s1", "plant.txt", "text/plain", text.as_bytes().to_vec())
        .await
        .unwrap();
    assert_eq!(outcome.chunks(), 1);

    let answer = h
        .assistant
        .ask("s1", "When was the reactor commissioned?")
        .await
        .unwrap();
    assert!(answer.contains("commissioned in 1998"));
    assert_eq!(
        h.assistant.presenter("s1", PipelineKind::DocumentQa).get().0,
        "When was the reactor commissioned?"
    );

    h.assistant.clear("s1", PipelineKind::DocumentQa).await.unwrap();
    assert_eq!(
        h.assistant.presenter("s1", PipelineKind::DocumentQa).get(),
        (String::new(), None)
    );
    assert!(matches!(
        h.assistant.ask("s1", "again?").await.unwrap_err(),
        HelperError::NoDocumentLoaded
    ));
}

#[tokio::test]
async fn scrape_extract_and_email() {
    let html = r#"<html><head><title>Shop</title></head>
        <body><h1>Offers</h1><script>track()</script><p>Lamp: 20 EUR</p></body></html>"#;
    let model = ScriptedModel::new(|request| {
        let prompt = request.last_user_message().unwrap_or_default();
        assert!(!prompt.contains("track()"));
        Ok(ChatResponse::text(if prompt.contains("Lamp") {
            "Lamp: 20 EUR"
        } else {
            ""
        }))
    });
    let h = harness_with(
        model,
        StaticFetcher::new().with_page("https://shop.example", html),
    );

    let text = h
        .assistant
        .scrape("s1", "https://shop.example")
        .await
        .unwrap();
    assert_eq!(text, "Offers\nLamp: 20 EUR");

    let extracted = h.assistant.extract("s1", "prices").await.unwrap();
    assert_eq!(extracted, "Lamp: 20 EUR");

    h.assistant
        .email_result("s1", PipelineKind::WebScraper, "buyer@example.com")
        .await
        .unwrap();
    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "buyer@example.com");
    assert_eq!(sent[0].subject, "Extraction");
    assert_eq!(sent[0].body, "Lamp: 20 EUR");
}

#[tokio::test]
async fn end_session_removes_run_log_lines() {
    let temp = TempDir::new().unwrap();
    let h = harness();
    let assistant = h.assistant.with_run_log(RunLog::new(temp.path(), 0));

    assistant.research("s1", "geothermal").await.unwrap();
    assert!(temp.path().read_dir().unwrap().next().is_some());

    assistant.end_session("s1").await.unwrap();
    assert!(temp.path().read_dir().unwrap().next().is_none());
    assert!(assistant.sessions().snapshot("s1").is_empty());
}
