//! End-to-end pipeline tests over mocked collaborators.
//!
//! These tests drive the real processor, runner, context and progress
//! tracker; only the external services (fetch, LLM, TTS, audio tooling)
//! are mocked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use podforge::config::Config;
use podforge::error::{AudioError, FetchError, GenerationError, SynthesisError};
use podforge::pipeline::{keys, ProgressTracker, Step, TaskContext, TaskError, TaskProcessor};
use podforge::pipeline::steps::{AudioStep, SubtitleStep, TranslationStep};
use podforge::prompts::PromptPair;
use podforge::scheduler::TaskRunner;
use podforge::services::generator::extract_json;
use podforge::services::{
    AudioToolkit, ContentFetcher, DialogueTurn, Page, SpeechSynthesizer, StepServices,
    TextGenerator, VoiceMap,
};
use podforge::storage::{
    ArtifactKind, BlobStore, InMemoryTaskStore, Lang, Level, RecordError, Role, TaskRecord,
    TaskStatus, TaskStore,
};

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

struct MockFetcher {
    calls: AtomicUsize,
}

impl MockFetcher {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, _url: &str) -> Result<Page, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Page {
            text: "A long article about rust pipelines and how they are tested.".to_string(),
            title: Some("Mock Title".to_string()),
        })
    }
}

/// Dispatches on the prompt's system message to emulate every LLM call the
/// pipeline makes. Failure knobs let tests break specific stages.
struct MockGenerator {
    dialogue_calls: AtomicUsize,
    translation_calls: AtomicUsize,
    /// Remaining dialogue calls that fail transiently; negative = always.
    dialogue_failures_remaining: AtomicI64,
    /// When set, multi-item translation batches fail.
    fail_batch_translation: AtomicBool,
    /// Single-item translations whose content contains this string fail.
    failing_item: std::sync::Mutex<Option<String>>,
}

impl MockGenerator {
    fn new() -> Self {
        Self {
            dialogue_calls: AtomicUsize::new(0),
            translation_calls: AtomicUsize::new(0),
            dialogue_failures_remaining: AtomicI64::new(0),
            fail_batch_translation: AtomicBool::new(false),
            failing_item: std::sync::Mutex::new(None),
        }
    }

    fn dialogue_json() -> String {
        serde_json::to_string(&vec![
            DialogueTurn::new(Role::Host, "第一句"),
            DialogueTurn::new(Role::Guest, "第二句"),
            DialogueTurn::new(Role::Host, "第三句"),
            DialogueTurn::new(Role::Guest, "第四句"),
        ])
        .expect("serialize dialogue")
    }

    fn transient_error() -> GenerationError {
        GenerationError::Api {
            status: 503,
            message: "mock overload".to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, prompt: &PromptPair) -> Result<String, GenerationError> {
        if prompt.system.contains("naming podcast episodes") {
            return Ok("Fallback Title".to_string());
        }

        if prompt.system.contains("content editor") {
            return Ok("Adapted article text for the target level.".to_string());
        }

        if prompt.system.contains("podcast script writer") {
            self.dialogue_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.dialogue_failures_remaining.load(Ordering::SeqCst);
            if remaining != 0 {
                if remaining > 0 {
                    self.dialogue_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(Self::transient_error());
            }
            return Ok(Self::dialogue_json());
        }

        if prompt.system.contains("translator") {
            self.translation_calls.fetch_add(1, Ordering::SeqCst);
            let turns: Vec<DialogueTurn> = serde_json::from_str(extract_json(&prompt.user))
                .map_err(|e| GenerationError::InvalidJson(e.to_string()))?;

            if turns.len() > 1 && self.fail_batch_translation.load(Ordering::SeqCst) {
                return Err(Self::transient_error());
            }
            if turns.len() == 1 {
                let failing = self.failing_item.lock().expect("lock").clone();
                if let Some(marker) = failing {
                    if turns[0].content.contains(&marker) {
                        return Err(Self::transient_error());
                    }
                }
            }

            let translated: Vec<DialogueTurn> = turns
                .iter()
                .map(|t| DialogueTurn::new(t.role, format!("EN {}", t.content)))
                .collect();
            serde_json::to_string(&translated)
                .map_err(|e| GenerationError::InvalidJson(e.to_string()))
        } else {
            Err(GenerationError::InvalidJson(format!(
                "unexpected prompt: {}",
                prompt.system
            )))
        }
    }
}

struct MockSynthesizer {
    calls: AtomicUsize,
    /// Calls that fail before synthesis starts succeeding.
    failures_remaining: AtomicI64,
}

impl MockSynthesizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(format!("AUDIO[{}|{}]", voice, text).into_bytes())
    }
}

/// Audio toolkit over fake files: duration comes from a per-file-name map
/// (default 2.0 s), validity is "file exists and is non-empty", and concat
/// just splices bytes.
struct MockToolkit {
    durations: std::sync::Mutex<HashMap<String, f64>>,
}

impl MockToolkit {
    fn new() -> Self {
        Self {
            durations: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn set_duration(&self, file_name: &str, secs: f64) {
        self.durations
            .lock()
            .expect("lock")
            .insert(file_name.to_string(), secs);
    }
}

#[async_trait]
impl AudioToolkit for MockToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64, AudioError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| AudioError::InvalidFile(path.to_path_buf()))?;
        if metadata.len() == 0 {
            return Err(AudioError::InvalidFile(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(*self.durations.lock().expect("lock").get(&name).unwrap_or(&2.0))
    }

    async fn is_valid(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    async fn concat_with_gap(
        &self,
        inputs: &[PathBuf],
        _gap_secs: f64,
        output: &Path,
    ) -> Result<(), AudioError> {
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(tokio::fs::read(input).await?);
            merged.extend(b"<GAP>");
        }
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

/// Store decorator that records every committed (step index, progress)
/// pair, for the monotonicity property.
struct RecordingStore {
    inner: InMemoryTaskStore,
    history: std::sync::Mutex<Vec<(u32, u8)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryTaskStore::new(),
            history: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn history(&self) -> Vec<(u32, u8)> {
        self.history.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), RecordError> {
        self.inner.insert(record).await
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, RecordError> {
        self.inner.get(task_id).await
    }

    async fn commit(&self, record: &mut TaskRecord) -> Result<(), RecordError> {
        self.history
            .lock()
            .expect("lock")
            .push((record.current_step_index, record.step_progress));
        self.inner.commit(record).await
    }

    async fn list_unfinished(&self) -> Result<Vec<TaskRecord>, RecordError> {
        self.inner.list_unfinished().await
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<TaskRecord>, RecordError> {
        self.inner.find_by_url(url).await
    }

    async fn delete(&self, task_id: &str) -> Result<(), RecordError> {
        self.inner.delete(task_id).await
    }
}

// ---------------------------------------------------------------------------
// Test environment
// ---------------------------------------------------------------------------

struct TestEnv {
    _tmp: tempfile::TempDir,
    config: Arc<Config>,
    store: Arc<dyn TaskStore>,
    services: Arc<StepServices>,
    fetcher: Arc<MockFetcher>,
    generator: Arc<MockGenerator>,
    synthesizer: Arc<MockSynthesizer>,
    toolkit: Arc<MockToolkit>,
}

impl TestEnv {
    fn new(store: Arc<dyn TaskStore>, mutate: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default()
            .with_data_dir(tmp.path())
            .with_step_retry_delay(Duration::from_millis(1))
            .with_task_retry_delay(Duration::from_millis(1));
        mutate(&mut config);
        let config = Arc::new(config);

        let fetcher = Arc::new(MockFetcher::new());
        let generator = Arc::new(MockGenerator::new());
        let synthesizer = Arc::new(MockSynthesizer::new());
        let toolkit = Arc::new(MockToolkit::new());

        let services = Arc::new(StepServices {
            fetcher: fetcher.clone(),
            generator: generator.clone(),
            synthesizer: synthesizer.clone(),
            audio: toolkit.clone(),
            blob: Arc::new(BlobStore::new(tmp.path())),
            voices: VoiceMap::default(),
            config: config.clone(),
        });

        Self {
            _tmp: tmp,
            config,
            store,
            services,
            fetcher,
            generator,
            synthesizer,
            toolkit,
        }
    }

    fn default_with_store(store: Arc<dyn TaskStore>) -> Self {
        Self::new(store, |_| {})
    }

    async fn create_task(&self) -> TaskRecord {
        let record = TaskRecord::new("https://example.com/article");
        self.store.insert(&record).await.expect("insert");
        record
    }

    fn runner(&self) -> TaskRunner {
        TaskRunner::new(self.store.clone(), self.services.clone(), self.config.clone())
    }
}

// ---------------------------------------------------------------------------
// Whole-pipeline properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_completes_and_registers_artifacts() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let record = env.create_task().await;

    env.runner().submit(&record.task_id).await.expect("join");

    let done = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.step_progress, 100);
    assert_eq!(done.total_steps, 29);
    assert_eq!(done.current_step_index, 28);
    assert_eq!(done.title.as_deref(), Some("Mock Title"));
    assert!(done.error.is_none());

    // Every level × lang pair published both artifacts
    for level in Level::ALL {
        for lang in Lang::ALL {
            let audio = done.files.get(level, lang, ArtifactKind::Audio).expect("audio");
            let subtitle = done
                .files
                .get(level, lang, ArtifactKind::Subtitle)
                .expect("subtitle");
            assert_eq!(
                audio,
                format!("{}_{}_audio_{}.mp3", level, lang, record.task_id)
            );
            assert!(env.services.blob.exists(&record.task_id, audio).await);
            assert!(env.services.blob.exists(&record.task_id, subtitle).await);
        }
    }

    // One fetch, one dialogue generation per level
    assert_eq!(env.fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(env.generator.dialogue_calls.load(Ordering::SeqCst), 3);
    // 4 turns × 2 langs × 3 levels synthesized
    assert_eq!(env.synthesizer.calls.load(Ordering::SeqCst), 24);
}

#[tokio::test]
async fn rerunning_a_completed_task_skips_steps_with_surviving_outputs() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let record = env.create_task().await;
    let runner = env.runner();

    runner.submit(&record.task_id).await.expect("first run");
    let fetches = env.fetcher.calls.load(Ordering::SeqCst);
    let dialogues = env.generator.dialogue_calls.load(Ordering::SeqCst);
    let translations = env.generator.translation_calls.load(Ordering::SeqCst);
    let syntheses = env.synthesizer.calls.load(Ordering::SeqCst);

    runner.submit(&record.task_id).await.expect("second run");

    // Fetch, title, content, dialogue, translation, subtitle and merge
    // outputs all survive the first run, so none of them re-execute.
    assert_eq!(env.fetcher.calls.load(Ordering::SeqCst), fetches);
    assert_eq!(env.generator.dialogue_calls.load(Ordering::SeqCst), dialogues);
    assert_eq!(
        env.generator.translation_calls.load(Ordering::SeqCst),
        translations
    );
    // The merge steps consumed the per-turn audio lists, so only the audio
    // steps run again: 3 levels × 2 langs × 4 turns.
    assert_eq!(env.synthesizer.calls.load(Ordering::SeqCst), syntheses + 24);

    let done = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn step_failure_resumes_at_failed_step_on_retry() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let record = env.create_task().await;
    let runner = env.runner();

    // Dialogue generation fails until healed
    env.generator
        .dialogue_failures_remaining
        .store(-1, Ordering::SeqCst);

    runner.submit(&record.task_id).await.expect("failing run");

    let failed = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.current_step.as_deref(), Some("dialogue:elementary"));
    assert!(failed.error.is_some());

    // Attempts: (1 + max_step_retries) per pass × (1 + max_task_retries)
    assert_eq!(env.generator.dialogue_calls.load(Ordering::SeqCst), 4);
    let fetches_after_failure = env.fetcher.calls.load(Ordering::SeqCst);
    assert_eq!(fetches_after_failure, 1);

    // Heal and retry: earlier steps must be skipped
    env.generator
        .dialogue_failures_remaining
        .store(0, Ordering::SeqCst);
    runner.retry_task(&record.task_id).await.expect("retry run");

    let done = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(env.fetcher.calls.load(Ordering::SeqCst), 1);
    // 1 healed re-run for elementary + intermediate + advanced
    assert_eq!(env.generator.dialogue_calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn failing_step_is_attempted_exactly_one_plus_max_step_retries_times() {
    let env = TestEnv::new(Arc::new(InMemoryTaskStore::new()), |c| {
        c.max_task_retries = 0;
        c.max_step_retries = 1;
    });
    let record = env.create_task().await;

    env.generator
        .dialogue_failures_remaining
        .store(-1, Ordering::SeqCst);

    env.runner().submit(&record.task_id).await.expect("run");

    assert_eq!(env.generator.dialogue_calls.load(Ordering::SeqCst), 2);
    let failed = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(failed.status, TaskStatus::Failed);
}

#[tokio::test]
async fn progress_is_monotonic_over_a_successful_run() {
    let recording = Arc::new(RecordingStore::new());
    let env = TestEnv::default_with_store(recording.clone());
    let record = env.create_task().await;

    env.runner().submit(&record.task_id).await.expect("run");

    let history = recording.history();
    assert!(!history.is_empty());

    // Step indexes never decrease, and each step starts at 0 and ends at 100
    let mut last_index = 0u32;
    let mut first_seen: HashMap<u32, u8> = HashMap::new();
    let mut last_seen: HashMap<u32, u8> = HashMap::new();
    for (index, progress) in &history {
        assert!(
            *index >= last_index,
            "step index regressed: {} after {}",
            index,
            last_index
        );
        last_index = *index;
        first_seen.entry(*index).or_insert(*progress);
        last_seen.insert(*index, *progress);
    }

    for step in 0..29u32 {
        assert_eq!(first_seen[&step], 0, "step {} did not start at 0", step);
        assert_eq!(last_seen[&step], 100, "step {} did not end at 100", step);
    }
}

#[tokio::test]
async fn deadline_between_steps_aborts_the_task() {
    let env = TestEnv::new(Arc::new(InMemoryTaskStore::new()), |c| {
        c.task_deadline = Some(Duration::ZERO);
    });
    let record = env.create_task().await;

    let processor = TaskProcessor::new(
        &record.task_id,
        env.store.clone(),
        env.services.clone(),
        false,
    )
    .await
    .expect("build processor");

    let err = processor.run().await.expect_err("deadline");
    assert!(matches!(err, TaskError::DeadlineExceeded { .. }));

    let failed = env.store.get(&record.task_id).await.expect("get");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.expect("error").contains("time budget"));
}

#[tokio::test]
async fn deleted_record_exits_quietly() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let record = env.create_task().await;

    let processor = TaskProcessor::new(
        &record.task_id,
        env.store.clone(),
        env.services.clone(),
        false,
    )
    .await
    .expect("build processor");

    env.store.delete(&record.task_id).await.expect("delete");

    let err = processor.run().await.expect_err("record gone");
    assert!(matches!(err, TaskError::RecordGone(_)));
}

// ---------------------------------------------------------------------------
// Targeted step properties
// ---------------------------------------------------------------------------

/// Builds a context + tracker for running a single step in isolation.
async fn step_fixture(env: &TestEnv) -> (TaskRecord, TaskContext, ProgressTracker) {
    let record = env.create_task().await;
    env.services
        .blob
        .ensure_task_dirs(&record.task_id)
        .await
        .expect("dirs");
    let task_dir = env.services.blob.task_dir(&record.task_id);

    let mut ctx = TaskContext::load_or_init(&task_dir).await.expect("ctx");
    ctx.set(keys::TASK_ID, json!(record.task_id)).await.expect("seed");
    ctx.set(keys::URL, json!(record.url)).await.expect("seed");
    ctx.set(keys::TASK_DIR, json!(task_dir.to_string_lossy()))
        .await
        .expect("seed");

    let tracker = ProgressTracker::new(env.store.clone(), record.task_id.clone(), 29);
    (record, ctx, tracker)
}

async fn write_dialogue_file(
    env: &TestEnv,
    task_id: &str,
    relative: &str,
    turns: &[DialogueTurn],
) {
    let path = env.services.blob.task_dir(task_id).join(relative);
    tokio::fs::write(&path, serde_json::to_vec(turns).expect("serialize"))
        .await
        .expect("write dialogue");
}

#[tokio::test]
async fn translation_falls_back_per_item_and_substitutes_placeholders() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let (record, mut ctx, tracker) = step_fixture(&env).await;

    let turns = vec![
        DialogueTurn::new(Role::Host, "句一"),
        DialogueTurn::new(Role::Guest, "句二"),
        DialogueTurn::new(Role::Host, "句三"),
        DialogueTurn::new(Role::Guest, "句四"),
        DialogueTurn::new(Role::Host, "句五"),
    ];
    let cn_key = keys::dialogue(Level::Elementary, Lang::Cn);
    write_dialogue_file(&env, &record.task_id, &cn_key, &turns).await;
    ctx.set(cn_key.clone(), json!(cn_key)).await.expect("seed dialogue");

    // The batch call fails; item 3 of 5 also fails per-item
    env.generator
        .fail_batch_translation
        .store(true, Ordering::SeqCst);
    *env.generator.failing_item.lock().expect("lock") = Some("句三".to_string());

    let step = TranslationStep::new(Level::Elementary, env.services.clone());
    let output = step.execute(&mut ctx, &tracker).await.expect("translate");
    ctx.update(output).await.expect("merge");

    let en_key = keys::dialogue(Level::Elementary, Lang::En);
    let en_path = env
        .services
        .blob
        .task_dir(&record.task_id)
        .join(ctx.get_str(&en_key).expect("translated path"));
    let translated: Vec<DialogueTurn> =
        serde_json::from_slice(&tokio::fs::read(en_path).await.expect("read"))
            .expect("parse translated");

    assert_eq!(translated.len(), 5);
    assert_eq!(translated[0].content, "EN 句一");
    assert_eq!(translated[1].content, "EN 句二");
    // The failed item keeps its role and gets empty content
    assert_eq!(translated[2].role, Role::Host);
    assert_eq!(translated[2].content, "");
    assert_eq!(translated[3].content, "EN 句四");
    assert_eq!(translated[4].content, "EN 句五");

    // 1 failed batch call + 5 per-item calls
    assert_eq!(env.generator.translation_calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn subtitle_alignment_uses_durations_gap_and_placeholders() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let (record, mut ctx, tracker) = step_fixture(&env).await;
    let task_dir = env.services.blob.task_dir(&record.task_id);

    // Primary has two turns, secondary only one
    let cn_key = keys::dialogue(Level::Elementary, Lang::Cn);
    let en_key = keys::dialogue(Level::Elementary, Lang::En);
    write_dialogue_file(
        &env,
        &record.task_id,
        &cn_key,
        &[
            DialogueTurn::new(Role::Host, "A"),
            DialogueTurn::new(Role::Guest, "B"),
        ],
    )
    .await;
    write_dialogue_file(
        &env,
        &record.task_id,
        &en_key,
        &[DialogueTurn::new(Role::Host, "X")],
    )
    .await;
    ctx.set(cn_key.clone(), json!(cn_key)).await.expect("seed");
    ctx.set(en_key.clone(), json!(en_key)).await.expect("seed");

    // Two audio turns of 2.0 s and 3.0 s
    let audio_key = keys::audio_files(Level::Elementary, Lang::Cn);
    let entries = json!([
        {"index": 0, "role": "host", "filename": "elementary/0000_cn_host.mp3"},
        {"index": 1, "role": "guest", "filename": "elementary/0001_cn_guest.mp3"},
    ]);
    tokio::fs::write(
        task_dir.join(&audio_key),
        serde_json::to_vec(&entries).expect("serialize"),
    )
    .await
    .expect("write list");
    tokio::fs::write(task_dir.join("elementary/0000_cn_host.mp3"), b"turn0")
        .await
        .expect("write");
    tokio::fs::write(task_dir.join("elementary/0001_cn_guest.mp3"), b"turn1")
        .await
        .expect("write");
    env.toolkit.set_duration("0000_cn_host.mp3", 2.0);
    env.toolkit.set_duration("0001_cn_guest.mp3", 3.0);
    ctx.set(audio_key.clone(), json!(audio_key)).await.expect("seed");

    let step = SubtitleStep::new(Level::Elementary, Lang::Cn, env.services.clone());
    let output = step.execute(&mut ctx, &tracker).await.expect("subtitle");
    ctx.update(output).await.expect("merge");

    let filename = ctx
        .get_str(&keys::subtitle(Level::Elementary, Lang::Cn))
        .expect("subtitle file");
    assert_eq!(
        filename,
        format!("elementary_cn_subtitle_{}.srt", record.task_id)
    );
    let content = tokio::fs::read_to_string(task_dir.join(filename))
        .await
        .expect("read srt");

    let blocks: Vec<&str> = content.split("\n\n").collect();
    assert_eq!(blocks.len(), 2);

    // Entry 1: 0.0 → 2.0 + 0.5 gap
    assert_eq!(blocks[0], "1\n00:00:00,000 --> 00:00:02,500\nA\nX");
    // Entry 2 starts at 2.0 + 0.5 = 2.5 s; secondary text is the placeholder
    assert_eq!(
        blocks[1],
        "2\n00:00:02,500 --> 00:00:06,000\nB\n【Missing English content】\n"
    );

    // The subtitle artifact is registered on the record
    let loaded = env.store.get(&record.task_id).await.expect("get");
    assert!(loaded
        .files
        .get(Level::Elementary, Lang::Cn, ArtifactKind::Subtitle)
        .is_some());
}

#[tokio::test]
async fn audio_step_retries_synthesis_per_turn() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let (record, mut ctx, tracker) = step_fixture(&env).await;

    let cn_key = keys::dialogue(Level::Elementary, Lang::Cn);
    write_dialogue_file(
        &env,
        &record.task_id,
        &cn_key,
        &[
            DialogueTurn::new(Role::Host, "только"),
            DialogueTurn::new(Role::Guest, "два"),
        ],
    )
    .await;
    ctx.set(cn_key.clone(), json!(cn_key)).await.expect("seed");

    // First two synthesis calls fail, then succeed; turn 1 needs 3 attempts
    env.synthesizer.failures_remaining.store(2, Ordering::SeqCst);

    let step = AudioStep::new(Level::Elementary, Lang::Cn, env.services.clone());
    let output = step.execute(&mut ctx, &tracker).await.expect("audio");
    ctx.update(output).await.expect("merge");

    // 3 attempts for the first turn, 1 for the second
    assert_eq!(env.synthesizer.calls.load(Ordering::SeqCst), 4);

    let list_path = env
        .services
        .blob
        .task_dir(&record.task_id)
        .join(ctx.get_str(&keys::audio_files(Level::Elementary, Lang::Cn)).expect("list"));
    let entries: Vec<serde_json::Value> =
        serde_json::from_slice(&tokio::fs::read(list_path).await.expect("read"))
            .expect("parse list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["filename"], "elementary/0000_cn_host.mp3");
}

#[tokio::test]
async fn audio_step_fails_after_exhausting_synthesis_retries() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));
    let (record, mut ctx, tracker) = step_fixture(&env).await;

    let cn_key = keys::dialogue(Level::Elementary, Lang::Cn);
    write_dialogue_file(
        &env,
        &record.task_id,
        &cn_key,
        &[DialogueTurn::new(Role::Host, "无法合成")],
    )
    .await;
    ctx.set(cn_key.clone(), json!(cn_key)).await.expect("seed");

    env.synthesizer
        .failures_remaining
        .store(i64::MAX, Ordering::SeqCst);

    let step = AudioStep::new(Level::Elementary, Lang::Cn, env.services.clone());
    let err = step.execute(&mut ctx, &tracker).await.expect_err("exhausted");
    assert!(err.is_transient());
    assert!(err.to_string().contains("after 3 attempts"));
    assert_eq!(env.synthesizer.calls.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Restart reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_reconciliation_fails_interrupted_tasks() {
    let env = TestEnv::default_with_store(Arc::new(InMemoryTaskStore::new()));

    let mut processing = TaskRecord::new("https://example.com/in-flight");
    processing.status = TaskStatus::Processing;
    env.store.insert(&processing).await.expect("insert");

    let count = env
        .runner()
        .check_incomplete_tasks()
        .await
        .expect("reconcile");
    assert_eq!(count, 1);

    let loaded = env.store.get(&processing.task_id).await.expect("get");
    assert_eq!(loaded.status, TaskStatus::Failed);
    assert!(loaded.progress_message.contains("restart"));
}
