//! One interactive chat session over a set of processed documents.
//!
//! The session owns the current index and the message history. Every method
//! that changes either takes `&mut self`, so document processing and question
//! answering never overlap on the same session.

use crate::chunking::ChunkingConfig;
use crate::embeddings::CharacterNgramEmbedder;
use crate::error::{IndexBuildError, RetrievalError, SessionError};
use crate::extractor::LopdfExtractor;
use crate::generation::AnswerGenerator;
use crate::index::{IndexBuilder, Retriever, VectorIndex};
use crate::ingest::{ingest_documents, SkippedDocument};
use crate::models::{Document, Message};
use crate::traits::{Embedder, TextExtractor};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Processing,
    Ready,
}

#[derive(Clone)]
pub struct SessionOptions {
    pub chunking: ChunkingConfig,
    pub retriever: Retriever,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retriever: Retriever::default(),
            extractor: Arc::new(LopdfExtractor),
            embedder: Arc::new(CharacterNgramEmbedder::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingReport {
    pub indexed_documents: Vec<String>,
    pub skipped_documents: Vec<SkippedDocument>,
    pub chunk_count: usize,
}

struct ProcessedBatch {
    index: VectorIndex,
    report: ProcessingReport,
}

/// Extraction, chunking and indexing running on a blocking worker. Hand it
/// back to [`Session::finish_processing`] to install the result. Dropping it
/// abandons the batch and the session leaves `Processing`.
pub struct ProcessingJob {
    handle: JoinHandle<Result<ProcessedBatch, SessionError>>,
    session_id: Uuid,
    pending: Arc<()>,
}

pub struct Session {
    id: Uuid,
    // alive while a ProcessingJob of this session exists
    pending: Weak<()>,
    index: Option<Arc<VectorIndex>>,
    generator: AnswerGenerator,
    messages: Vec<Message>,
    options: SessionOptions,
}

impl Session {
    pub fn new(generator: AnswerGenerator, options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            pending: Weak::new(),
            index: None,
            generator,
            messages: Vec::new(),
            options,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        if self.pending.strong_count() > 0 {
            SessionState::Processing
        } else if self.index.is_some() {
            SessionState::Ready
        } else {
            SessionState::Empty
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn chunk_count(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len())
    }

    /// Clears the message history. The index stays loaded.
    pub fn reset(&mut self) {
        self.messages.clear();
        info!(session = %self.id, "history cleared");
    }

    pub fn start_processing(&mut self, documents: Vec<Document>) -> Result<ProcessingJob, SessionError> {
        if self.state() == SessionState::Processing {
            return Err(SessionError::Busy);
        }

        let pending = Arc::new(());
        self.pending = Arc::downgrade(&pending);
        info!(session = %self.id, document_count = documents.len(), "processing documents");

        let options = self.options.clone();
        let handle = tokio::task::spawn_blocking(move || process_batch(options, documents));

        Ok(ProcessingJob {
            handle,
            session_id: self.id,
            pending,
        })
    }

    /// Installs the new index on success. On failure the session keeps its
    /// old index, so it returns to the state it had before processing started.
    /// A job started by another session is refused without touching this one.
    pub async fn finish_processing(
        &mut self,
        job: ProcessingJob,
    ) -> Result<ProcessingReport, SessionError> {
        if job.session_id != self.id {
            warn!(session = %self.id, job_session = %job.session_id, "refused foreign processing job");
            return Err(SessionError::ForeignJob);
        }

        let ProcessingJob {
            handle, pending, ..
        } = job;
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(IndexBuildError::Worker(join_error.to_string()).into()),
        };
        drop(pending);

        match outcome {
            Ok(batch) => {
                self.index = Some(Arc::new(batch.index));
                info!(
                    session = %self.id,
                    chunk_count = batch.report.chunk_count,
                    skipped = batch.report.skipped_documents.len(),
                    "documents processed"
                );
                Ok(batch.report)
            }
            Err(error) => {
                warn!(session = %self.id, %error, "processing failed");
                Err(error)
            }
        }
    }

    pub async fn process_documents(
        &mut self,
        documents: Vec<Document>,
    ) -> Result<ProcessingReport, SessionError> {
        let job = self.start_processing(documents)?;
        self.finish_processing(job).await
    }

    /// Answers `question` from the current index and records the exchange.
    /// A question asked before any index is ready is rejected without being
    /// recorded. When generation fails the question stays in the history
    /// without an answer.
    pub async fn ask(&mut self, question: &str) -> Result<Message, SessionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        let index = match (self.state(), &self.index) {
            (SessionState::Ready, Some(index)) => Arc::clone(index),
            _ => return Err(SessionError::NotReady),
        };

        self.messages.push(Message::user(question));

        let retriever = self.options.retriever;
        let query = question.to_string();
        let retrieved = tokio::task::spawn_blocking(move || retriever.retrieve(&index, &query))
            .await
            .map_err(|join_error| RetrievalError::Worker(join_error.to_string()))??;

        let completion = self.generator.answer(&retrieved, question).await?;
        let answer = Message::assistant(completion.text);
        self.messages.push(answer.clone());
        Ok(answer)
    }
}

fn process_batch(
    options: SessionOptions,
    documents: Vec<Document>,
) -> Result<ProcessedBatch, SessionError> {
    let ingested = ingest_documents(options.extractor.as_ref(), documents, options.chunking)?;
    if ingested.chunks.is_empty() {
        return Err(SessionError::NothingIndexed(ingested.skipped_documents));
    }

    let chunk_count = ingested.chunks.len();
    let index = IndexBuilder::new(options.embedder).build(ingested.chunks)?;

    Ok(ProcessedBatch {
        index,
        report: ProcessingReport {
            indexed_documents: ingested.indexed_documents,
            skipped_documents: ingested.skipped_documents,
            chunk_count,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, ExtractionError, GenerationError};
    use crate::models::{Completion, Role};
    use crate::traits::ChatModel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Treats the document bytes as UTF-8 text; `corrupt` files fail.
    struct PlainTextExtractor;

    impl TextExtractor for PlainTextExtractor {
        fn extract(&self, document: &Document) -> Result<String, ExtractionError> {
            if document.filename.starts_with("corrupt") {
                return Err(ExtractionError::Parse {
                    filename: document.filename.clone(),
                    details: "invalid header".to_string(),
                });
            }
            Ok(String::from_utf8_lossy(&document.bytes).to_string())
        }
    }

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> Option<usize> {
            CharacterNgramEmbedder::default().dimensions()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::ModelLoad("no model".to_string()));
            }
            CharacterNgramEmbedder::default().embed(text)
        }
    }

    #[derive(Default)]
    struct CountingModel {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        async fn complete(&self, _prompt: &str) -> Result<Completion, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GenerationError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                });
            }
            Ok(Completion {
                text: "You have a mild fever.".to_string(),
            })
        }
    }

    fn session_with(embedder: Arc<CountingEmbedder>, model: Arc<CountingModel>) -> Session {
        let options = SessionOptions {
            extractor: Arc::new(PlainTextExtractor),
            embedder,
            ..SessionOptions::default()
        };
        Session::new(AnswerGenerator::new(model), options)
    }

    fn note(name: &str, text: &str) -> Document {
        Document::new(name, text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn asking_while_empty_touches_nothing() {
        let embedder = Arc::new(CountingEmbedder::default());
        let model = Arc::new(CountingModel::default());
        let mut session = session_with(embedder.clone(), model.clone());

        let result = session.ask("What does the patient have?").await;

        assert!(matches!(result, Err(SessionError::NotReady)));
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.messages().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn asking_while_processing_is_rejected() {
        let embedder = Arc::new(CountingEmbedder::default());
        let model = Arc::new(CountingModel::default());
        let mut session = session_with(embedder, model.clone());

        let job = session
            .start_processing(vec![note("a.pdf", "Patient has mild fever.")])
            .unwrap();
        assert_eq!(session.state(), SessionState::Processing);
        assert!(matches!(session.ask("anything?").await, Err(SessionError::NotReady)));
        assert!(matches!(
            session.start_processing(Vec::new()),
            Err(SessionError::Busy)
        ));

        session.finish_processing(job).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answered_question_appends_user_then_assistant() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        session
            .process_documents(vec![note("a.pdf", "Patient has mild fever.")])
            .await
            .unwrap();

        let answer = session.ask("What does the patient have?").await.unwrap();

        assert_eq!(answer.role, Role::Assistant);
        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(session.messages()[0].content, "What does the patient have?");
    }

    #[tokio::test]
    async fn failed_generation_keeps_question_without_answer() {
        let model = Arc::new(CountingModel {
            fail: true,
            ..CountingModel::default()
        });
        let mut session = session_with(Arc::new(CountingEmbedder::default()), model);
        session
            .process_documents(vec![note("a.pdf", "Patient has mild fever.")])
            .await
            .unwrap();

        let result = session.ask("What does the patient have?").await;

        assert!(matches!(result, Err(SessionError::Generation(_))));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn failed_index_build_restores_previous_state() {
        let mut session = session_with(
            Arc::new(CountingEmbedder {
                fail: true,
                ..CountingEmbedder::default()
            }),
            Arc::new(CountingModel::default()),
        );

        let result = session
            .process_documents(vec![note("a.pdf", "Patient has mild fever.")])
            .await;

        assert!(matches!(result, Err(SessionError::IndexBuild(_))));
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.chunk_count(), 0);
    }

    #[tokio::test]
    async fn reprocessing_replaces_the_index() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        session
            .process_documents(vec![note("a.pdf", "first"), note("b.pdf", "second")])
            .await
            .unwrap();
        assert_eq!(session.chunk_count(), 2);

        session
            .process_documents(vec![note("c.pdf", "third")])
            .await
            .unwrap();
        assert_eq!(session.chunk_count(), 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn batch_where_everything_fails_keeps_ready_index() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        session
            .process_documents(vec![note("a.pdf", "Patient has mild fever.")])
            .await
            .unwrap();

        let result = session
            .process_documents(vec![note("corrupt.pdf", "???")])
            .await;

        match result {
            Err(SessionError::NothingIndexed(skipped)) => {
                assert_eq!(skipped.len(), 1);
                assert_eq!(skipped[0].filename, "corrupt.pdf");
            }
            other => panic!("expected NothingIndexed, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.chunk_count(), 1);
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        assert!(matches!(session.ask("   ").await, Err(SessionError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn reset_clears_history_but_keeps_index() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        session
            .process_documents(vec![note("a.pdf", "Patient has mild fever.")])
            .await
            .unwrap();
        session.ask("What does the patient have?").await.unwrap();

        session.reset();

        assert!(session.messages().is_empty());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn dropped_job_leaves_processing() {
        let mut session = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );

        let job = session
            .start_processing(vec![note("a.pdf", "Patient has mild fever.")])
            .unwrap();
        assert_eq!(session.state(), SessionState::Processing);
        drop(job);
        assert_eq!(session.state(), SessionState::Empty);

        let report = session
            .process_documents(vec![note("b.pdf", "Recommend rest and fluids.")])
            .await
            .unwrap();
        assert_eq!(report.indexed_documents, vec!["b.pdf".to_string()]);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn job_from_another_session_is_refused() {
        let mut first = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );
        let mut second = session_with(
            Arc::new(CountingEmbedder::default()),
            Arc::new(CountingModel::default()),
        );

        let job = first
            .start_processing(vec![note("a.pdf", "Patient has mild fever.")])
            .unwrap();

        assert!(matches!(
            second.finish_processing(job).await,
            Err(SessionError::ForeignJob)
        ));
        assert_eq!(second.state(), SessionState::Empty);
        assert_eq!(second.chunk_count(), 0);
        assert_eq!(first.state(), SessionState::Empty);
    }
}
