//! End-to-end training runs against synthetic in-memory image records.

use std::path::PathBuf;

use image::RgbImage;

use matstudio::backend::{default_device, RuntimeOptions, TrainingBackend};
use matstudio::store::ImageRecord;
use matstudio::training::events::EventStream;
use matstudio::training::{PhaseResult, TrainingConfig, TrainingPipeline};

fn jpeg_record(label: &str, tint: [u8; 3], index: usize) -> ImageRecord {
    // Distinct color per class with a little per-image texture so the
    // classes are actually separable.
    let img = RgbImage::from_fn(64, 64, |x, y| {
        let noise = ((x * 7 + y * 13 + index as u32 * 31) % 32) as u8;
        image::Rgb([
            tint[0].saturating_add(noise),
            tint[1].saturating_add(noise / 2),
            tint[2].saturating_add(noise / 3),
        ])
    });
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Jpeg,
    )
    .unwrap();
    ImageRecord {
        filename: format!("{}_{}.jpg", label, index),
        label: label.to_string(),
        data: bytes,
    }
}

fn synthetic_records(per_class: usize) -> Vec<ImageRecord> {
    let mut records = Vec::new();
    for i in 0..per_class {
        records.push(jpeg_record("bricks", [180, 60, 40], i));
        records.push(jpeg_record("steel", [60, 80, 180], i));
    }
    records
}

fn tiny_config(models_dir: PathBuf, model_id: &str) -> TrainingConfig {
    let mut config = TrainingConfig::new(model_id);
    config.models_dir = models_dir;
    config.epochs = 1;
    config.batch_size = 4;
    config.image_size = 64;
    config.min_samples = 6;
    config.balance_floor = 8;
    config.early_stopping_patience = 3;
    config
}

fn parsed_events(buf: &std::sync::Arc<std::sync::Mutex<Vec<u8>>>) -> Vec<serde_json::Value> {
    let data = buf.lock().unwrap().clone();
    String::from_utf8(data)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("every stream line is a JSON object"))
        .collect()
}

#[test]
fn full_run_writes_artifacts_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf(), "run-a");
    let (stream, buf) = EventStream::buffer();

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let outcome = pipeline
        .run(synthetic_records(8), &RuntimeOptions { seed: 7 })
        .unwrap();

    // Canonical artifact layout.
    let artifact_dir = dir.path().join("run-a");
    assert_eq!(outcome.artifact_dir, artifact_dir);
    assert!(artifact_dir.join("model.mpk").is_file());
    assert!(artifact_dir.join("best_model.mpk").is_file());
    assert!(artifact_dir.join("labels.json").is_file());
    assert!(artifact_dir.join("metadata.json").is_file());

    // Labels are sorted class names.
    assert_eq!(outcome.metadata.classes, vec!["bricks", "steel"]);
    assert_eq!(outcome.metadata.num_classes, 2);
    assert_eq!(outcome.metadata.original_samples, 16);
    assert!(outcome.metadata.validation_samples >= 2);
    assert!(outcome.metadata.epochs_trained >= 1);

    // At least feature extraction and fine tuning ran; the deep phase may
    // be skipped depending on validation accuracy, but is always reported.
    assert_eq!(outcome.phase_results.len(), 3);
    assert!(outcome.phase_results[0].epochs_run() >= 1);
    assert!(outcome.phase_results[1].epochs_run() >= 1);

    let events = parsed_events(&buf);
    assert!(!events.is_empty());

    let types: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"log"));
    assert!(types.contains(&"phase_update"));
    assert!(types.contains(&"epoch_end"));
    assert!(types.contains(&"confusion_matrix"));

    // Phase updates arrive in order with correct numbering.
    let phases: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "phase_update")
        .collect();
    assert!(phases.len() >= 2);
    assert_eq!(phases[0]["phase_name"], "FeatureExtraction");
    assert_eq!(phases[0]["phase_number"], 1);
    assert_eq!(phases[0]["total_phases"], 3);
    assert_eq!(phases[1]["phase_name"], "FineTuning");

    // Epoch counters are global across phases.
    let epochs: Vec<u64> = events
        .iter()
        .filter(|e| e["type"] == "epoch_end")
        .map(|e| e["epoch"].as_u64().unwrap())
        .collect();
    assert_eq!(epochs[0], 1);
    assert!(epochs.windows(2).all(|w| w[1] == w[0] + 1));

    // The confusion matrix covers every validation sample.
    let cm = events
        .iter()
        .find(|e| e["type"] == "confusion_matrix")
        .unwrap();
    assert_eq!(cm["classes"].as_array().unwrap().len(), 2);
    let total: u64 = cm["matrix"]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|row| row.as_array().unwrap())
        .map(|v| v.as_u64().unwrap())
        .sum();
    assert_eq!(total as usize, outcome.metadata.validation_samples);
}

#[test]
fn deep_phase_skipped_when_fine_tuning_accuracy_insufficient() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = tiny_config(dir.path().to_path_buf(), "run-skip-deep");
    // No run can clear this bar, so the deep phase deterministically skips.
    config.deep_phase_accuracy_threshold = 1.1;
    let (stream, buf) = EventStream::buffer();

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let outcome = pipeline
        .run(synthetic_records(8), &RuntimeOptions { seed: 7 })
        .unwrap();

    // The skipped phase is reported explicitly and ran nothing.
    assert_eq!(outcome.phase_results.len(), 3);
    assert!(matches!(
        outcome.phase_results[2],
        PhaseResult::Skipped { .. }
    ));
    assert_eq!(outcome.phase_results[2].epochs_run(), 0);

    let events = parsed_events(&buf);

    // Only the two executed phases announce themselves.
    let phases: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "phase_update")
        .collect();
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[0]["phase_name"], "FeatureExtraction");
    assert_eq!(phases[1]["phase_name"], "FineTuning");

    // No epoch belongs to the deep phase: two phases of one epoch each.
    let epoch_count = events.iter().filter(|e| e["type"] == "epoch_end").count();
    assert_eq!(epoch_count, 2);

    // Exactly one terminal confusion matrix, sized num_classes x num_classes.
    let matrices: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "confusion_matrix")
        .collect();
    assert_eq!(matrices.len(), 1);
    let matrix = matrices[0]["matrix"].as_array().unwrap();
    assert_eq!(matrix.len(), 2);
    assert!(matrix.iter().all(|row| row.as_array().unwrap().len() == 2));
}

#[test]
fn deep_phase_runs_when_threshold_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = tiny_config(dir.path().to_path_buf(), "run-deep");
    // Any accuracy clears this bar, so all three phases execute.
    config.deep_phase_accuracy_threshold = -1.0;
    let (stream, buf) = EventStream::buffer();

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let outcome = pipeline
        .run(synthetic_records(8), &RuntimeOptions { seed: 7 })
        .unwrap();

    assert!(matches!(
        outcome.phase_results[2],
        PhaseResult::Executed(_)
    ));
    assert!(outcome.phase_results[2].epochs_run() >= 1);

    let events = parsed_events(&buf);
    let phases: Vec<&serde_json::Value> = events
        .iter()
        .filter(|e| e["type"] == "phase_update")
        .collect();
    assert_eq!(phases.len(), 3);
    assert_eq!(phases[2]["phase_name"], "DeepFineTuning");
}

#[test]
fn too_few_samples_fails_with_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf(), "run-small");
    let (stream, buf) = EventStream::buffer();

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let result = pipeline.run(synthetic_records(2), &RuntimeOptions { seed: 7 });
    assert!(result.is_err());

    let events = parsed_events(&buf);
    let error = events
        .iter()
        .find(|e| e["type"] == "log" && e["level"] == "error")
        .expect("failure is reported on the stream");
    assert!(error["message"]
        .as_str()
        .unwrap()
        .contains("insufficient training data"));
}

#[test]
fn single_class_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf(), "run-one-class");
    let (stream, buf) = EventStream::buffer();

    let records: Vec<ImageRecord> = (0..8)
        .map(|i| jpeg_record("bricks", [180, 60, 40], i))
        .collect();

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    assert!(pipeline.run(records, &RuntimeOptions { seed: 7 }).is_err());

    let events = parsed_events(&buf);
    assert!(events
        .iter()
        .any(|e| e["type"] == "log" && e["level"] == "error"));
}

#[test]
fn undecodable_records_are_skipped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path().to_path_buf(), "run-skip");
    let (stream, buf) = EventStream::buffer();

    let mut records = synthetic_records(8);
    records.push(ImageRecord {
        filename: "broken.jpg".to_string(),
        label: "bricks".to_string(),
        data: vec![0xde, 0xad, 0xbe, 0xef],
    });

    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let outcome = pipeline
        .run(records, &RuntimeOptions { seed: 7 })
        .unwrap();

    // The broken record never reaches the dataset.
    assert_eq!(outcome.metadata.original_samples, 16);

    let events = parsed_events(&buf);
    let warning = events
        .iter()
        .find(|e| e["type"] == "log" && e["level"] == "warning")
        .expect("skipped record is reported");
    assert!(warning["message"].as_str().unwrap().contains("broken.jpg"));
}
