//! End-to-end ingest and query scenarios against the embedded index and the
//! deterministic local embedder.

use agora_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, HashedNgramProvider};
use agora_retriever::config::RetrieverConfig;
use agora_retriever::error::RetrievalError;
use agora_retriever::index::{EmbeddedVectorIndex, IndexFilter};
use agora_retriever::service::{DocumentUpload, RetrievalService};
use agora_retriever::store::{DocumentIndex, DocumentStatus, DocumentType};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const DIM: usize = 128;

/// Counts embed_texts calls, to verify idempotence and retry behavior.
struct CountingProvider {
    inner: HashedNgramProvider,
    calls: AtomicU32,
    /// Number of leading calls that fail with a transient error.
    fail_first: u32,
}

impl CountingProvider {
    fn new(fail_first: u32) -> Self {
        Self {
            inner: HashedNgramProvider::new(DIM),
            calls: AtomicU32::new(0),
            fail_first,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed_texts(&self, texts: &[String]) -> agora_embed::Result<EmbeddingResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(EmbedError::transient("simulated provider outage"));
        }
        self.inner.embed_texts(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        "counting"
    }
}

/// Blocks inside embed_texts until released, to hold a document in the
/// `embedding` state.
struct GatedProvider {
    inner: HashedNgramProvider,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl EmbeddingProvider for GatedProvider {
    async fn embed_texts(&self, texts: &[String]) -> agora_embed::Result<EmbeddingResult> {
        self.gate.notified().await;
        self.inner.embed_texts(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        "gated"
    }
}

async fn service_with(
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrieverConfig,
) -> RetrievalService {
    let store = DocumentIndex::open_memory().await.unwrap();
    let index = Arc::new(EmbeddedVectorIndex::open_memory(DIM).await.unwrap());
    RetrievalService::new(store, index, embedder, config).unwrap()
}

fn text_upload(filename: &str, doc_type: DocumentType, text: &str) -> DocumentUpload {
    DocumentUpload {
        filename: filename.to_string(),
        format_hint: "text/plain".to_string(),
        doc_type,
        collection: "default".to_string(),
        bytes: text.as_bytes().to_vec(),
    }
}

/// Minimal PDF with one page of text per entry.
fn build_pdf(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content stream encodes"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("PDF serializes");
    buffer
}

/// Minimal DOCX with one paragraph per entry.
fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>{body}</w:body></w:document>"#
    );

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

#[tokio::test]
async fn pdf_ingest_reports_page_provenance() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default().with_relevance_threshold(0.1),
    )
    .await;

    let pdf = build_pdf(&[
        "Meeting called to order at noon by the chair.",
        "Budget allocation: 2.3M for streets",
        "Meeting adjourned without further discussion.",
    ]);
    let report = service
        .ingest(DocumentUpload {
            filename: "minutes.pdf".to_string(),
            format_hint: "application/pdf".to_string(),
            doc_type: DocumentType::Minutes,
            collection: "council".to_string(),
            bytes: pdf,
        })
        .await
        .unwrap();

    assert_eq!(report.status, DocumentStatus::Indexed);
    assert!(report.chunk_count >= 1);

    let results = service
        .query("street budget", &IndexFilter::default(), Some(3))
        .await
        .unwrap();
    assert!(!results.is_empty());
    let hit = results
        .iter()
        .find(|item| item.text.contains("Budget allocation"))
        .expect("budget chunk retrieved");
    assert_eq!(hit.page, Some(2));
    assert_eq!(hit.filename, "minutes.pdf");
}

#[tokio::test]
async fn docx_ingest_round_trips_through_query() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default().with_relevance_threshold(0.1),
    )
    .await;

    let docx = build_docx(&[
        "Resolution 2024-17: sidewalk repair funding approved.",
        "Next public hearing scheduled for March.",
    ]);
    let report = service
        .ingest(DocumentUpload {
            filename: "resolution.docx".to_string(),
            format_hint: "docx".to_string(),
            doc_type: DocumentType::Legislation,
            collection: "council".to_string(),
            bytes: docx,
        })
        .await
        .unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed);

    let results = service
        .query("sidewalk repair funding", &IndexFilter::default(), None)
        .await
        .unwrap();
    assert!(results.iter().any(|item| item.text.contains("sidewalk repair")));
}

#[tokio::test]
async fn identical_reingest_spends_no_provider_calls() {
    let provider = Arc::new(CountingProvider::new(0));
    let service = service_with(provider.clone(), RetrieverConfig::default()).await;

    let text = "The transit committee endorsed the bus rapid transit corridor.";
    let first = service
        .ingest(text_upload("transit.txt", DocumentType::Report, text))
        .await
        .unwrap();
    assert!(!first.reused);
    let calls_after_first = provider.calls();
    assert_eq!(calls_after_first, 1);

    let second = service
        .ingest(text_upload("transit-copy.txt", DocumentType::Report, text))
        .await
        .unwrap();
    assert!(second.reused);
    assert_eq!(second.document_id, first.document_id);
    // Idempotence: byte-identical content costs nothing.
    assert_eq!(provider.calls(), calls_after_first);
}

#[tokio::test]
async fn transient_provider_failure_is_retried_to_success() {
    let provider = Arc::new(CountingProvider::new(1));
    let mut config = RetrieverConfig::default();
    config.embed_retry.max_attempts = 3;
    config.embed_retry.base_delay_ms = 1;
    let service = service_with(provider.clone(), config).await;

    let report = service
        .ingest(text_upload(
            "permits.txt",
            DocumentType::Policy,
            "Permit fees increase takes effect in July.",
        ))
        .await
        .unwrap();

    assert_eq!(report.status, DocumentStatus::Indexed);
    assert_eq!(report.embed_attempts, 2);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn exhausted_retries_mark_the_document_failed() {
    let provider = Arc::new(CountingProvider::new(u32::MAX));
    let mut config = RetrieverConfig::default();
    config.embed_retry.max_attempts = 3;
    config.embed_retry.base_delay_ms = 1;
    let service = service_with(provider.clone(), config).await;

    let err = service
        .ingest(text_upload(
            "fees.txt",
            DocumentType::Policy,
            "Schedule of fees for recreational facilities.",
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::EmbeddingProvider { attempts: 3, .. }
    ));
    assert_eq!(provider.calls(), 3);

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.failed_documents, 1);
    // Rollback: the failed attempt left no chunks behind.
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn failed_ingest_records_retryable_detail_and_can_be_retried() {
    // Calls 0..4 fail: the first run exhausts its 3 attempts, the second
    // run fails once more and then succeeds.
    let provider = Arc::new(CountingProvider::new(4));
    let mut config = RetrieverConfig::default();
    config.embed_retry.max_attempts = 3;
    config.embed_retry.base_delay_ms = 1;
    let service = service_with(provider.clone(), config).await;

    let document = service
        .register(text_upload(
            "parks.txt",
            DocumentType::Report,
            "Parks department quarterly maintenance summary.",
        ))
        .await
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Pending);

    let err = service.process_document(&document.id).await.unwrap_err();
    assert!(matches!(err, RetrievalError::EmbeddingProvider { .. }));

    let failed = service.document_status(&document.id).await.unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);
    let detail = failed.error_detail.expect("failure detail recorded");
    assert!(detail.contains("retryable"), "detail was: {detail}");

    // A later retry of the same document succeeds once the provider
    // recovers, from the failed state.
    let report = service.process_document(&document.id).await.unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed);
    assert_eq!(report.embed_attempts, 2);

    let recovered = service.document_status(&document.id).await.unwrap();
    assert_eq!(recovered.status, DocumentStatus::Indexed);
    assert!(recovered.error_detail.is_none());
}

#[tokio::test]
async fn deletion_cascades_to_chunks_and_vectors() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default().with_relevance_threshold(0.1),
    )
    .await;

    let report = service
        .ingest(text_upload(
            "shelter.txt",
            DocumentType::Report,
            "Emergency shelter capacity doubled for winter operations.",
        ))
        .await
        .unwrap();

    let before = service
        .query("emergency shelter capacity", &IndexFilter::default(), None)
        .await
        .unwrap();
    assert!(!before.is_empty());

    assert!(service.delete_document(&report.document_id).await.unwrap());

    let after = service
        .query("emergency shelter capacity", &IndexFilter::default(), None)
        .await
        .unwrap();
    assert!(
        after.iter().all(|item| item.document_id != report.document_id),
        "deleted document leaked into query results"
    );
    assert!(after.is_empty());

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.chunks, 0);
}

#[tokio::test]
async fn filtered_query_never_crosses_document_types() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default().with_relevance_threshold(0.0),
    )
    .await;

    for i in 0..3 {
        service
            .ingest(text_upload(
                &format!("ordinance-{i}.txt"),
                DocumentType::Legislation,
                &format!("Ordinance {i} regulating sidewalk cafe permits downtown."),
            ))
            .await
            .unwrap();
    }
    for i in 0..3 {
        service
            .ingest(text_upload(
                &format!("budget-{i}.txt"),
                DocumentType::Budget,
                &format!("Budget line {i} for sidewalk cafe permit administration."),
            ))
            .await
            .unwrap();
    }

    let filter = IndexFilter::for_doc_type(DocumentType::Legislation);
    let results = service
        .query("sidewalk cafe permits", &filter, Some(5))
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 5);
    assert!(
        results
            .iter()
            .all(|item| item.doc_type == DocumentType::Legislation),
        "filter leaked a non-legislation chunk"
    );
    // Three qualifying documents exist; the filter must not shrink the
    // result below what qualifies.
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn round_trip_query_returns_the_upserted_chunk_first() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default(),
    )
    .await;

    let text = "Stormwater fee credits available for permeable paving installations.";
    let report = service
        .ingest(text_upload("stormwater.txt", DocumentType::Policy, text))
        .await
        .unwrap();

    // Querying with the chunk's own text must return it as the top result
    // with near-perfect similarity, well above the default threshold.
    let results = service
        .query(text, &IndexFilter::default(), Some(1))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_id, report.document_id);
    assert!(results[0].score > service.config().relevance_threshold);
    assert!(results[0].score > 0.99);
}

#[tokio::test]
async fn on_disk_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = RetrieverConfig::default().with_relevance_threshold(0.1);

    let document_id = {
        let store = DocumentIndex::open(dir.path()).await.unwrap();
        let index = Arc::new(EmbeddedVectorIndex::open(dir.path(), DIM).await.unwrap());
        let service = RetrievalService::new(
            store,
            index,
            Arc::new(HashedNgramProvider::new(DIM)),
            config.clone(),
        )
        .unwrap();
        service
            .ingest(text_upload(
                "archive.txt",
                DocumentType::Report,
                "Historical preservation grant awarded for the old courthouse.",
            ))
            .await
            .unwrap()
            .document_id
    };

    // A fresh process over the same directory sees the indexed document.
    let store = DocumentIndex::open(dir.path()).await.unwrap();
    let index = Arc::new(EmbeddedVectorIndex::open(dir.path(), DIM).await.unwrap());
    let service = RetrievalService::new(
        store,
        index,
        Arc::new(HashedNgramProvider::new(DIM)),
        config,
    )
    .unwrap();
    service.startup_check().await.unwrap();

    let document = service.document_status(&document_id).await.unwrap();
    assert_eq!(document.status, DocumentStatus::Indexed);

    let results = service
        .query("preservation grant courthouse", &IndexFilter::default(), None)
        .await
        .unwrap();
    assert!(results.iter().any(|item| item.document_id == document_id));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn scanned_pages_produce_warnings_not_failures() {
    let service = service_with(
        Arc::new(HashedNgramProvider::new(DIM)),
        RetrieverConfig::default(),
    )
    .await;

    // Page 2 has no text layer at all.
    let pdf = build_pdf(&["Inspection report for pump station three.", ""]);
    let report = service
        .ingest(DocumentUpload {
            filename: "inspection.pdf".to_string(),
            format_hint: "pdf".to_string(),
            doc_type: DocumentType::Report,
            collection: "default".to_string(),
            bytes: pdf,
        })
        .await
        .unwrap();

    assert_eq!(report.status, DocumentStatus::Indexed);
    assert!(logs_contain("extraction warning"));
}

#[tokio::test]
async fn concurrent_ingest_of_one_document_runs_exactly_one_pipeline() {
    let provider = Arc::new(GatedProvider {
        inner: HashedNgramProvider::new(DIM),
        gate: tokio::sync::Notify::new(),
    });
    let service = Arc::new(service_with(provider.clone(), RetrieverConfig::default()).await);

    let document = service
        .register(text_upload(
            "hearing.txt",
            DocumentType::Minutes,
            "Public hearing transcript, planning commission.",
        ))
        .await
        .unwrap();

    // First pipeline parks inside the gated embedding call.
    let service_clone = service.clone();
    let document_id = document.id.clone();
    let first = tokio::spawn(async move { service_clone.process_document(&document_id).await });

    // Wait until it reaches the embedding stage, holding the claim.
    loop {
        let status = service.document_status(&document.id).await.unwrap().status;
        if status == DocumentStatus::Embedding {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // A second pipeline for the same document must be rejected, not run.
    let err = service.process_document(&document.id).await.unwrap_err();
    assert!(matches!(err, RetrievalError::IngestInFlight(_)));

    // Release the first pipeline; it completes normally.
    provider.gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed);
    assert!(report.chunk_count >= 1);
}
