use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use caption_engine::{
    DecodeParams, EngineRegistry, GenerationParams, LocalModel, ModelLoader, RemoteEngineConfig,
    ResidencyManager,
};
use caption_task::{CaptionOutcome, JobDispatcher, ProgressStore, Task, TaskError, TaskStatus};
use caption_text::{count_words, ConsistencyMode};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use storage::{ImageStore, OpendalImageStore};
use uuid::Uuid;

/// Treats the stored "image" bytes as the caption to produce, which keeps every
/// scenario readable. `panic` and `fail` trigger the matching misbehaviour.
struct EchoModel;

#[async_trait]
impl LocalModel for EchoModel {
    async fn decode(&mut self, image: &[u8], _params: &DecodeParams) -> anyhow::Result<String> {
        match std::str::from_utf8(image)? {
            "panic" => panic!("model exploded"),
            "fail" => anyhow::bail!("decoder failed"),
            caption => Ok(caption.to_string()),
        }
    }
}

fn echo_loader(engine_id: &str) -> ModelLoader {
    ModelLoader::new(engine_id, || async { Ok(EchoModel) })
}

/// Echoes after a short pause, so concurrent batches get a chance to interleave.
struct PacedEchoModel;

#[async_trait]
impl LocalModel for PacedEchoModel {
    async fn decode(&mut self, image: &[u8], _params: &DecodeParams) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_millis(3)).await;
        Ok(std::str::from_utf8(image)?.to_string())
    }
}

/// Loads once. Any later load of the same engine fails, as a GPU that ran out of
/// memory would.
fn load_once_loader(engine_id: &str, loads: Arc<AtomicUsize>) -> ModelLoader {
    ModelLoader::new(engine_id, move || {
        let loads = loads.clone();
        async move {
            if loads.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(anyhow::anyhow!("out of memory while reloading"));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(PacedEchoModel)
        }
    })
}

fn broken_loader(engine_id: &str) -> ModelLoader {
    ModelLoader::new(engine_id, || async {
        Err::<EchoModel, _>(anyhow::anyhow!("CUDA out of memory"))
    })
}

async fn image_store(images: &[(&str, Vec<u8>)]) -> OpendalImageStore {
    let store = OpendalImageStore::new_memory().unwrap();
    for (filename, bytes) in images {
        store.write(filename, bytes.clone()).await.unwrap();
    }
    store
}

fn dispatcher(
    residency: ResidencyManager,
    remote: RemoteEngineConfig,
    images: OpendalImageStore,
) -> JobDispatcher {
    JobDispatcher::new(
        EngineRegistry::standard(residency, remote),
        ProgressStore::new(None),
        Arc::new(images),
    )
}

/// Poll until the task is finished, returning it and every `current` value observed.
async fn wait_for(dispatcher: &JobDispatcher, task_id: Uuid) -> (Task, Vec<usize>) {
    let mut observed = vec![];
    for _ in 0..500 {
        let task = dispatcher.poll(task_id).await.unwrap();
        observed.push(task.current);
        if task.is_finished() {
            return (task, observed);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", task_id);
}

fn caption_of(task: &Task, index: usize) -> &str {
    match &task.results[index].outcome {
        CaptionOutcome::Captioned { caption } => caption,
        CaptionOutcome::Failed { reason } => panic!("result {} failed: {}", index, reason),
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 10]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

#[test_log::test(tokio::test)]
async fn batch_with_auto_consistency_completes_in_order() {
    let images = image_store(&[
        (
            "a.jpg",
            b"a young woman with long hair standing next to a man in a park on a sunny day holding a red umbrella".to_vec(),
        ),
        (
            "b.jpg",
            b"a little girl and a boy sitting on a wooden bench beside a small brown dog in a quiet sunny garden".to_vec(),
        ),
    ])
    .await;
    let dispatcher = dispatcher(
        ResidencyManager::new().with_loader(echo_loader("blip")),
        RemoteEngineConfig::default(),
        images,
    );

    let params = GenerationParams {
        min_words: 15,
        consistency_mode: ConsistencyMode::Auto,
        ..Default::default()
    };
    let task_id = dispatcher
        .submit(vec!["a.jpg".into(), "b.jpg".into()], "blip", params)
        .await
        .unwrap();

    let (task, observed) = wait_for(&dispatcher, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.current, 2);
    assert_eq!(task.progress_pct, 100);
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));

    let filenames: Vec<_> = task.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(filenames, vec!["a.jpg", "b.jpg"]);
    assert_eq!(
        caption_of(&task, 0),
        "a young woman with long hair standing next to a woman in a park on a sunny day holding a red umbrella"
    );
    assert_eq!(
        caption_of(&task, 1),
        "a little girl and a little girl sitting on a wooden bench beside a small brown dog in a quiet sunny garden"
    );
    assert!(task.results.iter().all(|r| count_words(&r.caption_text()) >= 15));

    // the batch released its engine
    assert_eq!(dispatcher.loaded_engine().await, None);
}

#[test_log::test(tokio::test)]
async fn explicit_consistency_term() {
    let images = image_store(&[("kids.jpg", b"a girl and a boy play".to_vec())]).await;
    let dispatcher = dispatcher(
        ResidencyManager::new().with_loader(echo_loader("blip")),
        RemoteEngineConfig::default(),
        images,
    );

    let params = GenerationParams {
        min_words: 5,
        consistency_mode: ConsistencyMode::from("woman"),
        ..Default::default()
    };
    let task_id = dispatcher
        .submit(vec!["kids.jpg".into()], "blip", params)
        .await
        .unwrap();

    let (task, _) = wait_for(&dispatcher, task_id).await;
    assert_eq!(caption_of(&task, 0), "a woman and a woman play");
}

#[test_log::test(tokio::test)]
async fn load_failure_marks_engine_unavailable() {
    let images = image_store(&[("a.jpg", b"a cat".to_vec())]).await;
    let dispatcher = dispatcher(
        ResidencyManager::new()
            .with_loader(echo_loader("blip"))
            .with_loader(broken_loader("blip2")),
        RemoteEngineConfig::default(),
        images,
    );

    let task_id = dispatcher
        .submit(vec!["a.jpg".into()], "blip2", GenerationParams::default())
        .await
        .unwrap();
    let (task, _) = wait_for(&dispatcher, task_id).await;
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error.as_deref().unwrap().contains("CUDA out of memory"));
    assert!(task.results.is_empty());

    let catalogue = dispatcher.engine_catalogue().await;
    let blip2 = catalogue.iter().find(|e| e.descriptor.id == "blip2").unwrap();
    assert!(!blip2.status.available);

    // stays unavailable for later requests, without another load attempt
    let task_id = dispatcher
        .submit(vec!["a.jpg".into()], "blip2", GenerationParams::default())
        .await
        .unwrap();
    let (task, _) = wait_for(&dispatcher, task_id).await;
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error.as_deref().unwrap().contains("not available"));

    // no fallback, but other engines still work
    let caption = dispatcher
        .regenerate_one("a.jpg", "blip", &GenerationParams {
            min_words: 2,
            consistency_mode: ConsistencyMode::None,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(caption, "a cat");
}

#[test_log::test(tokio::test)]
async fn per_image_failures_do_not_abort_the_batch() {
    let images = image_store(&[
        ("boom.jpg", b"panic".to_vec()),
        ("broken.jpg", b"fail".to_vec()),
        ("ok.jpg", b"a dog".to_vec()),
    ])
    .await;
    let dispatcher = dispatcher(
        ResidencyManager::new().with_loader(echo_loader("blip")),
        RemoteEngineConfig::default(),
        images,
    );

    let params = GenerationParams {
        min_words: 2,
        consistency_mode: ConsistencyMode::None,
        ..Default::default()
    };
    let task_id = dispatcher
        .submit(
            vec![
                "boom.jpg".into(),
                "missing.jpg".into(),
                "broken.jpg".into(),
                "ok.jpg".into(),
            ],
            "blip",
            params,
        )
        .await
        .unwrap();

    let (task, _) = wait_for(&dispatcher, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.results.len(), task.total);

    assert!(task.results[0].caption_text().contains("model exploded"));
    assert!(task.results[1].caption_text().starts_with("Error: image not found"));
    assert!(task.results[2].is_failed());
    assert_eq!(caption_of(&task, 3), "a dog");
    assert_eq!(dispatcher.loaded_engine().await, None);

    // pollers see failures inline in the caption field
    let polled = serde_json::to_value(&task).unwrap();
    assert_eq!(polled["results"][1]["outcome"], "failed");
    assert!(polled["results"][1]["caption"]
        .as_str()
        .unwrap()
        .starts_with("Error: image not found"));
    assert_eq!(polled["results"][3]["caption"], "a dog");
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_batches_load_each_engine_once() {
    let captions: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| (format!("{}.jpg", i), format!("a red kite number {}", i).into_bytes()))
        .collect();
    let images = image_store(
        &captions
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.clone()))
            .collect::<Vec<_>>(),
    )
    .await;

    let blip_loads = Arc::new(AtomicUsize::new(0));
    let blip2_loads = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher(
        ResidencyManager::new()
            .with_loader(load_once_loader("blip", blip_loads.clone()))
            .with_loader(load_once_loader("blip2", blip2_loads.clone())),
        RemoteEngineConfig::default(),
        images,
    );

    let filenames: Vec<String> = captions.iter().map(|(name, _)| name.clone()).collect();
    let params = GenerationParams {
        min_words: 3,
        consistency_mode: ConsistencyMode::None,
        ..Default::default()
    };
    let first = dispatcher
        .submit(filenames.clone(), "blip", params.clone())
        .await
        .unwrap();
    let second = dispatcher
        .submit(filenames, "blip2", params)
        .await
        .unwrap();

    for task_id in [first, second] {
        let (task, _) = wait_for(&dispatcher, task_id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.results.len(), 6);
        for index in 0..6 {
            assert_eq!(caption_of(&task, index), format!("a red kite number {}", index));
        }
    }

    assert_eq!(blip_loads.load(Ordering::SeqCst), 1);
    assert_eq!(blip2_loads.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.loaded_engine().await, None);
}

async fn flaky_completions(State(calls): State<Arc<AtomicUsize>>) -> Json<Value> {
    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    Json(json!({ "choices": [{ "message": { "content": " A green square. " } }] }))
}

#[test_log::test(tokio::test)]
async fn remote_timeout_fails_only_that_image() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new()
        .route("/v1/chat/completions", post(flaky_completions))
        .with_state(Arc::new(AtomicUsize::new(0)));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let images = image_store(&[("a.png", png(640, 480)), ("b.png", png(32, 32))]).await;
    let dispatcher = dispatcher(
        ResidencyManager::new(),
        RemoteEngineConfig {
            endpoint_url: format!("http://{}/v1/chat/completions", addr),
            api_key: "test-key".into(),
            timeout: Duration::from_millis(300),
            ..Default::default()
        },
        images,
    );

    let task_id = dispatcher
        .submit(
            vec!["a.png".into(), "b.png".into()],
            "llama-vision",
            GenerationParams::default(),
        )
        .await
        .unwrap();

    let (task, _) = wait_for(&dispatcher, task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.results[0].is_failed());
    assert!(task.results[0].caption_text().contains("timed out"));
    // remote output is only trimmed
    assert_eq!(caption_of(&task, 1), "A green square.");
}

#[test_log::test(tokio::test)]
async fn regenerate_keeps_engine_resident() {
    let images = image_store(&[("a.jpg", b"a small cat sleeping on a sofa".to_vec())]).await;
    let dispatcher = dispatcher(
        ResidencyManager::new().with_loader(echo_loader("blip")),
        RemoteEngineConfig::default(),
        images,
    );

    let params = GenerationParams {
        min_words: 3,
        keyword: "sks".into(),
        ..Default::default()
    };
    let caption = dispatcher.regenerate_one("a.jpg", "blip", &params).await.unwrap();
    assert_eq!(caption, "sks a small cat sleeping on a sofa");
    assert_eq!(dispatcher.loaded_engine().await.as_deref(), Some("blip"));

    // nothing was added to the progress store
    assert!(dispatcher.store().is_empty().await);

    dispatcher.shutdown().await;
    assert_eq!(dispatcher.loaded_engine().await, None);
}

#[test_log::test(tokio::test)]
async fn request_errors() {
    let dispatcher = dispatcher(
        ResidencyManager::new(),
        RemoteEngineConfig::default(),
        image_store(&[]).await,
    );

    assert!(matches!(
        dispatcher.submit(vec![], "blip", GenerationParams::default()).await,
        Err(TaskError::EmptyBatch)
    ));
    assert!(matches!(
        dispatcher
            .submit(vec!["a.jpg".into()], "dalle", GenerationParams::default())
            .await,
        Err(TaskError::Engine(caption_engine::CaptionError::UnknownEngine(_)))
    ));
    assert!(matches!(
        dispatcher.poll(Uuid::new_v4()).await,
        Err(TaskError::TaskNotFound(_))
    ));
    assert!(matches!(
        dispatcher
            .regenerate_one("nope.jpg", "blip", &GenerationParams::default())
            .await,
        Err(TaskError::ImageNotFound(_))
    ));
}
