//! Request path and worker together, over in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use darkroom_core::pipeline::codec;
use darkroom_core::{
    Config, Darkroom, DispatchOutcome, ImageRecord, MemoryObjectStore, MemoryQueue,
    MemoryRecordStore, ObjectStore, OutputFormat, RecordStore, TransformSpec,
};
use image::{DynamicImage, Rgb, RgbImage};

const IDLE: Duration = Duration::from_millis(200);

struct Harness {
    darkroom: Darkroom,
    objects: Arc<MemoryObjectStore>,
    records: Arc<MemoryRecordStore>,
    queue: Arc<MemoryQueue>,
}

async fn harness() -> Harness {
    let mut config = Config::default();
    config.pipeline.watermark_path = "/nonexistent/logo.png".into();
    config.worker.retry_delay_ms = 1;

    let objects = Arc::new(MemoryObjectStore::default());
    let records = Arc::new(MemoryRecordStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let darkroom = Darkroom::new(config, objects.clone(), records.clone(), queue.clone())
        .await
        .unwrap();
    Harness {
        darkroom,
        objects,
        records,
        queue,
    }
}

fn landscape_jpeg() -> Vec<u8> {
    let image = RgbImage::from_fn(1000, 800, |x, y| {
        Rgb([(x / 4) as u8, (y / 4) as u8, ((x + y) / 8) as u8])
    });
    codec::encode(&DynamicImage::ImageRgb8(image), OutputFormat::Jpeg, 85).unwrap()
}

async fn upload(h: &Harness) -> ImageRecord {
    h.darkroom
        .upload("owner-1", landscape_jpeg(), "landscape.jpg")
        .await
        .unwrap()
}

fn resize_to_webp() -> TransformSpec {
    TransformSpec::from_json(r#"{"resize":{"width":500,"height":400},"format":"webp"}"#).unwrap()
}

#[tokio::test]
async fn miss_then_worker_then_hit() {
    let h = harness().await;
    let source = upload(&h).await;
    assert_eq!((source.width, source.height), (1000, 800));
    assert_eq!(source.format, "jpeg");

    let first = h
        .darkroom
        .dispatch_by_id(source.id, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    assert_eq!(first.status_code(), 202);
    assert_eq!(first.cache_status(), "miss");
    let DispatchOutcome::Accepted { expected_key, .. } = &first else {
        panic!("expected a miss, got {first:?}");
    };

    let stats = h.darkroom.worker().run_until_idle(IDLE).await.unwrap();
    assert_eq!(stats.completed, 1);

    let derived = h
        .records
        .find_by_key(expected_key.as_str(), "owner-1")
        .await
        .unwrap()
        .expect("worker indexed the result");
    assert_eq!((derived.width, derived.height), (500, 400));
    assert_eq!(derived.format, "webp");

    let stored = h.objects.get(expected_key.as_str()).await.unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (500, 400));

    let second = h
        .darkroom
        .dispatch_by_id(source.id, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    assert_eq!(second.status_code(), 200);
    assert_eq!(second.cache_status(), "hit");
    assert_eq!(second, DispatchOutcome::Hit(derived));
    assert_eq!(h.queue.ready(&h.darkroom.config().queue.name), 0);
}

#[tokio::test]
async fn equivalent_requests_share_a_result() {
    let h = harness().await;
    let source = upload(&h).await;

    h.darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    h.darkroom.worker().run_until_idle(IDLE).await.unwrap();

    // Different field order and an explicit default quality.
    let reordered = TransformSpec::from_json(
        r#"{"format":"webp","compress":{"quality":80},"resize":{"height":400,"width":500}}"#,
    )
    .unwrap();
    let outcome = h
        .darkroom
        .dispatch(&source, reordered, "owner-1")
        .await
        .unwrap();
    assert!(outcome.is_hit());
}

#[tokio::test]
async fn object_without_record_is_reprocessed() {
    let h = harness().await;
    let source = upload(&h).await;

    let first = h
        .darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    h.darkroom.worker().run_until_idle(IDLE).await.unwrap();
    let DispatchOutcome::Accepted { expected_key, .. } = first else {
        panic!("expected a miss");
    };

    // Simulate a crash between the object write and the record insert.
    let record = h
        .records
        .find_by_key(expected_key.as_str(), "owner-1")
        .await
        .unwrap()
        .unwrap();
    assert!(h.records.remove(record.id).await);

    let retry = h
        .darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    assert_eq!(retry.status_code(), 202);

    let stats = h.darkroom.worker().run_until_idle(IDLE).await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!(h
        .darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap()
        .is_hit());
}

#[tokio::test]
async fn record_without_object_is_reprocessed() {
    let h = harness().await;
    let source = upload(&h).await;
    let key = h.darkroom.cache_key(&source, &resize_to_webp());

    h.darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    h.darkroom.worker().run_until_idle(IDLE).await.unwrap();
    assert!(h.objects.remove(key.as_str()).await);

    let outcome = h
        .darkroom
        .dispatch(&source, resize_to_webp(), "owner-1")
        .await
        .unwrap();
    assert_eq!(outcome.cache_status(), "miss");
}

#[tokio::test]
async fn inline_and_background_results_are_interchangeable() {
    let h = harness().await;
    let source = upload(&h).await;
    let spec = TransformSpec::from_json(r#"{"crop":{"width":400,"height":400,"x":100,"y":50},"filters":{"grayscale":true},"format":"png"}"#).unwrap();

    let inline = h.darkroom.transform_now(&source, spec.clone()).await.unwrap();
    let bytes_inline = h.objects.get(&inline.key).await.unwrap();
    assert!(h.objects.remove(&inline.key).await);
    assert!(h.records.remove(inline.id).await);

    h.darkroom.dispatch(&source, spec, "owner-1").await.unwrap();
    h.darkroom.worker().run_until_idle(IDLE).await.unwrap();

    let background = h
        .records
        .find_by_key(&inline.key, "owner-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        (background.width, background.height, background.format.as_str()),
        (400, 400, "png")
    );
    assert_eq!(h.objects.get(&background.key).await.unwrap(), bytes_inline);
}
