//! Output Pipeline Tests
//!
//! Feeds hand-built byte streams through `OutputPipeline::run` into the
//! in-memory store and checks what lands in the job history.

use agent_runner_core::application::OutputPipeline;
use agent_runner_core::domain::{ChunkKind, Job, JobOptions, JobStatus, JobUpdate};
use agent_runner_core::port::process::mocks::assistant_line;
use agent_runner_core::port::{ByteStream, JobStore, SystemTimeProvider, TimeProvider};
use agent_runner_infra_memory::{InMemoryJobStore, StoreLimits};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;

const JOB_ID: &str = "pipeline-job";

async fn running_job() -> (Arc<InMemoryJobStore>, OutputPipeline) {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(InMemoryJobStore::new(
        StoreLimits::default(),
        time_provider.clone(),
    ));
    store
        .create_job(Job::new(JOB_ID, "prompt", JobOptions::default(), 0))
        .await
        .unwrap();
    store
        .update_job(&JOB_ID.to_string(), JobUpdate::status(JobStatus::Running))
        .await
        .unwrap();

    let pipeline = OutputPipeline::new(store.clone(), time_provider);
    (store, pipeline)
}

fn bytes_of(parts: Vec<Vec<u8>>) -> ByteStream {
    futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p)))).boxed()
}

fn empty() -> ByteStream {
    bytes_of(vec![])
}

async fn history(store: &InMemoryJobStore, kind: ChunkKind) -> Vec<String> {
    store
        .get_job(&JOB_ID.to_string())
        .await
        .unwrap()
        .unwrap()
        .output_history
        .into_iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.text)
        .collect()
}

#[tokio::test]
async fn test_multibyte_char_split_across_stdout_chunks() {
    let (store, pipeline) = running_job().await;

    let line = assistant_line("héllo 🚀");
    // 'é' is 0xC3 0xA9; cut between the two bytes
    let cut = line.windows(2).position(|w| w == [0xC3, 0xA9]).unwrap() + 1;
    let rocket = line.windows(2).position(|w| w == [0xF0, 0x9F]).unwrap() + 2;
    let parts = vec![
        line[..cut].to_vec(),
        line[cut..rocket].to_vec(),
        line[rocket..].to_vec(),
    ];

    pipeline
        .run(&JOB_ID.to_string(), bytes_of(parts), empty())
        .await;

    assert_eq!(history(&store, ChunkKind::Stdout).await, vec!["héllo 🚀"]);
    let job = store.get_job(&JOB_ID.to_string()).await.unwrap().unwrap();
    assert_eq!(job.progress, "héllo 🚀");

    println!("✅ Pipeline: split UTF-8 on stdout reassembled");
}

#[tokio::test]
async fn test_multibyte_char_split_across_stderr_chunks() {
    let (store, pipeline) = running_job().await;

    let text = "erreur: échec\n".as_bytes();
    let cut = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
    let parts = vec![text[..cut].to_vec(), text[cut..].to_vec()];

    pipeline
        .run(&JOB_ID.to_string(), empty(), bytes_of(parts))
        .await;

    let stderr = history(&store, ChunkKind::Stderr).await.concat();
    assert_eq!(stderr, "erreur: échec\n");
    assert!(!stderr.contains(char::REPLACEMENT_CHARACTER));

    println!("✅ Pipeline: split UTF-8 on stderr held back, not replaced");
}

#[tokio::test]
async fn test_trailing_line_without_newline_is_flushed() {
    let (store, pipeline) = running_job().await;

    let mut first = assistant_line("first");
    first.extend_from_slice(b"plain tail ");
    let parts = vec![first, b"without newline".to_vec()];

    pipeline
        .run(&JOB_ID.to_string(), bytes_of(parts), empty())
        .await;

    assert_eq!(
        history(&store, ChunkKind::Stdout).await,
        vec!["first", "plain tail without newline"]
    );
    let job = store.get_job(&JOB_ID.to_string()).await.unwrap().unwrap();
    assert_eq!(job.progress, "firstplain tail without newline");

    println!("✅ Pipeline: unterminated last line flushed at end of stream");
}

#[tokio::test]
async fn test_stderr_failure_leaves_stdout_draining() {
    let (store, pipeline) = running_job().await;

    let stderr: ByteStream = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"partial warning\n")),
        Err(std::io::Error::new(std::io::ErrorKind::Other, "read failed")),
        Ok(Bytes::from_static(b"never read\n")),
    ])
    .boxed();
    let stdout = bytes_of(vec![
        assistant_line("one"),
        assistant_line("two"),
        assistant_line("three"),
    ]);

    pipeline.run(&JOB_ID.to_string(), stdout, stderr).await;

    assert_eq!(
        history(&store, ChunkKind::Stdout).await,
        vec!["one", "two", "three"]
    );
    assert_eq!(
        history(&store, ChunkKind::Stderr).await,
        vec!["partial warning\n"]
    );
    let errors = history(&store, ChunkKind::Error).await;
    assert_eq!(errors, vec!["stderr stream error: read failed"]);

    // The pipeline never touches status; the job is still running
    let job = store.get_job(&JOB_ID.to_string()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);

    println!("✅ Pipeline: stderr failure recorded, stdout fully drained");
}

#[tokio::test]
async fn test_output_after_job_finished_is_dropped() {
    let (store, pipeline) = running_job().await;
    store
        .update_job(&JOB_ID.to_string(), JobUpdate::status(JobStatus::Completed))
        .await
        .unwrap();

    pipeline
        .run(
            &JOB_ID.to_string(),
            bytes_of(vec![assistant_line("late")]),
            bytes_of(vec![b"late warning\n".to_vec()]),
        )
        .await;

    let job = store.get_job(&JOB_ID.to_string()).await.unwrap().unwrap();
    assert!(job.output_history.is_empty());
    assert!(job.progress.is_empty());

    println!("✅ Pipeline: writes after completion dropped");
}
