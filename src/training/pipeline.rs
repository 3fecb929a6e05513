//! The multi-phase training pipeline.
//!
//! Takes raw image records (already fetched from the store), prepares the
//! dataset, and runs the three fine-tuning phases. Weights persist across
//! phases; each phase gets a freshly built optimizer and its own
//! warmup-cosine schedule. The best validation checkpoint seen anywhere in
//! the run becomes the canonical artifact.

use burn::{
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::artifacts::{ArtifactWriter, ModelMetadata, TrainingConfigSnapshot};
use crate::backend::RuntimeOptions;
use crate::dataset::{
    balance_classes, class_distribution, class_weights, preprocess, stratified_split,
    AugmentConfig, Augmenter, BalanceConfig, LabelCodec, MaterialBatch, MaterialBatcher, Sample,
};
use crate::model::cnn::{MaterialClassifier, MaterialClassifierConfig, ARCHITECTURE};
use crate::store::ImageRecord;
use crate::training::events::{BatchStats, EpochStats, EventStream, PhaseInfo, TrainingObserver};
use crate::training::phases::{plan_phases, skip_deep_phase, Phase, PhaseHistory, PhaseResult};
use crate::training::schedule::WarmupCosine;
use crate::training::TrainingConfig;
use crate::utils::error::{MatStudioError, Result};
use crate::utils::metrics::Metrics;

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub metadata: ModelMetadata,
    pub phase_results: Vec<PhaseResult>,
    pub artifact_dir: std::path::PathBuf,
}

/// The training pipeline.
///
/// Observers receive every batch and epoch notification; the event stream is
/// always registered as one and additionally carries log and
/// confusion-matrix events.
pub struct TrainingPipeline<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    stream: EventStream,
    observers: Vec<Box<dyn TrainingObserver>>,
}

impl<B: AutodiffBackend> TrainingPipeline<B> {
    pub fn new(config: TrainingConfig, device: B::Device, stream: EventStream) -> Self {
        let observers: Vec<Box<dyn TrainingObserver>> = vec![Box::new(stream.clone())];
        Self {
            config,
            device,
            stream,
            observers,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn TrainingObserver>) {
        self.observers.push(observer);
    }

    /// Run the full pipeline. Any failure is reported as an error event on
    /// the stream before propagating.
    pub fn run(
        mut self,
        records: Vec<ImageRecord>,
        runtime: &RuntimeOptions,
    ) -> Result<TrainingOutcome> {
        match self.run_inner(records, runtime) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.stream.error(format!("Training failed: {}", e));
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        records: Vec<ImageRecord>,
        runtime: &RuntimeOptions,
    ) -> Result<TrainingOutcome> {
        runtime.initialize::<B>();
        let config = self.config.clone();

        if config.enable_segmentation {
            self.stream.warning(
                "Segmentation flag is recorded in metadata but segmentation training is not \
                 performed; running classification only",
            );
        }

        self.stream
            .info(format!("Loaded {} image records from store", records.len()));

        // Decode and validate every record; bad images are warnings, not
        // failures.
        let mut images = Vec::new();
        let mut labels = Vec::new();
        for record in &records {
            match preprocess::decode_and_resize(&record.data, config.image_size as u32) {
                Ok(image) => {
                    images.push(image);
                    labels.push(record.label.clone());
                }
                Err(e) => {
                    tracing::warn!("skipping {}: {}", record.filename, e);
                    self.stream
                        .warning(format!("Skipping image {}: {}", record.filename, e));
                }
            }
        }

        let (indices, codec) = LabelCodec::fit(&labels);
        let num_classes = codec.num_classes();

        // Preconditions before any training starts.
        if images.len() < config.min_samples {
            return Err(MatStudioError::Training(format!(
                "insufficient training data: {} usable samples, need at least {}",
                images.len(),
                config.min_samples
            )));
        }
        if num_classes < 2 {
            return Err(MatStudioError::Training(format!(
                "need at least 2 material classes, found {}",
                num_classes
            )));
        }

        let samples: Vec<Sample> = images
            .into_iter()
            .zip(indices)
            .map(|(image, label)| Sample { image, label })
            .collect();
        let original_samples = samples.len();

        self.stream.info(format!(
            "Preparing dataset: {} samples across {} classes",
            original_samples, num_classes
        ));

        // Split first, then balance the training half only.
        let split = stratified_split(samples, config.validation_split, config.seed)?;
        let validation_samples = split.validation.len();

        let train = balance_classes(
            split.train,
            &BalanceConfig {
                floor: config.balance_floor,
                seed: config.seed,
            },
        );
        let training_samples = train.len();
        let distribution = class_distribution(&train, num_classes);
        let weights = class_weights(&distribution);

        self.stream.info(format!(
            "Balanced training set: {} samples, validation: {}",
            training_samples, validation_samples
        ));

        let model_config = MaterialClassifierConfig::new(num_classes)
            .with_input_size(config.image_size);
        let mut model = MaterialClassifier::<B>::new(&model_config, &self.device);

        let plans = plan_phases(config.epochs);
        let total_phases = plans.len();
        let total_planned: usize = plans.iter().map(|p| p.epochs).sum();

        let writer = ArtifactWriter::create(&config.models_dir, &config.model_id)?;
        let recorder = CompactRecorder::new();

        let train_batcher = MaterialBatcher::<B>::new(self.device.clone(), config.image_size);
        let valid_batcher =
            MaterialBatcher::<B::InnerBackend>::new(self.device.clone(), config.image_size);
        let val_batches = valid_batcher.batches(&split.validation, config.batch_size);

        let augmenter = Augmenter::new(AugmentConfig::training());
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));

        let mut phase_results = Vec::new();
        let mut global_epoch = 0usize;
        let mut best_overall_acc = -1.0f64;
        let mut fine_tuning_best = 0.0f64;
        let mut last_train_loss = 0.0f64;
        let mut last_train_acc = 0.0f64;

        for plan in &plans {
            if plan.phase == Phase::DeepFineTuning
                && skip_deep_phase(fine_tuning_best, config.deep_phase_accuracy_threshold)
            {
                let reason = format!(
                    "fine-tuning validation accuracy {:.3} did not exceed {:.1}",
                    fine_tuning_best, config.deep_phase_accuracy_threshold
                );
                self.stream
                    .info(format!("Skipping {}: {}", plan.phase.name(), reason));
                phase_results.push(PhaseResult::Skipped {
                    phase: plan.phase,
                    reason,
                });
                continue;
            }

            // Carry weights over but reset gradient flags, then freeze the
            // prefix this phase keeps fixed.
            let record = model.into_record();
            model = MaterialClassifier::new(&model_config, &self.device)
                .load_record(record)
                .with_frozen_backbone(plan.unfrozen_blocks);

            // Fresh optimizer state per phase.
            let mut optimizer = AdamConfig::new()
                .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
                .init();
            let schedule =
                WarmupCosine::for_phase(config.learning_rate * plan.lr_scale, plan.epochs);

            self.stream.info(format!(
                "Starting phase {} ({} epochs, {} unfrozen backbone blocks, peak lr {:.6})",
                plan.phase.name(),
                plan.epochs,
                plan.unfrozen_blocks,
                schedule.peak_lr
            ));
            let info = PhaseInfo {
                phase_name: plan.phase.name().to_string(),
                phase_number: plan.phase.number(),
                total_phases,
                phase_epoch: global_epoch + 1,
            };
            for observer in &mut self.observers {
                observer.on_phase_begin(&info);
            }

            let mut best_phase_acc = -1.0f64;
            let mut best_phase_model = model.clone();
            let mut epochs_without_improvement = 0usize;
            let mut epochs_run = 0usize;
            let mut stopped_early = false;

            for phase_epoch in 0..plan.epochs {
                let lr = schedule.get_lr(phase_epoch);
                global_epoch += 1;
                epochs_run += 1;

                // Fresh augmentation draw and sample order every epoch.
                let mut order: Vec<usize> = (0..train.len()).collect();
                order.shuffle(&mut rng);
                let epoch_samples: Vec<Sample> = order
                    .iter()
                    .map(|&i| Sample {
                        image: augmenter.apply(&train[i].image, &mut rng),
                        label: train[i].label,
                    })
                    .collect();
                let batches = train_batcher.batches(&epoch_samples, config.batch_size);
                let steps_per_epoch = batches.len();

                let mut total_loss = 0.0f64;
                let mut correct = 0usize;
                let mut seen = 0usize;

                for (batch_idx, batch) in batches.iter().enumerate() {
                    let output = model.forward(batch.images.clone());
                    let loss = CrossEntropyLossConfig::new()
                        .with_weights(Some(weights.clone()))
                        .with_smoothing(Some(config.label_smoothing))
                        .init(&output.device())
                        .forward(output.clone(), batch.targets.clone());

                    let loss_value: f64 = loss.clone().into_scalar().elem();
                    total_loss += loss_value;

                    let predictions = output.argmax(1).squeeze::<1>(1);
                    let batch_correct: i64 = predictions
                        .equal(batch.targets.clone())
                        .int()
                        .sum()
                        .into_scalar()
                        .elem();
                    correct += batch_correct as usize;
                    seen += batch.targets.dims()[0];

                    let grads = GradientsParams::from_grads(loss.backward(), &model);
                    model = optimizer.step(lr, model, grads);

                    let stats = BatchStats {
                        batch: batch_idx,
                        steps_per_epoch,
                        epoch: global_epoch,
                        total_epochs: total_planned,
                        loss: loss_value,
                        accuracy: correct as f64 / seen.max(1) as f64,
                    };
                    for observer in &mut self.observers {
                        observer.on_batch_end(&stats);
                    }
                }

                let train_loss = total_loss / steps_per_epoch.max(1) as f64;
                let train_acc = correct as f64 / seen.max(1) as f64;
                last_train_loss = train_loss;
                last_train_acc = train_acc;

                let (val_loss, val_acc, _, _) =
                    evaluate(&model.valid(), &val_batches, &weights, config.label_smoothing)?;

                tracing::info!(
                    "epoch {}/{}: loss {:.4}, acc {:.3}, val_loss {:.4}, val_acc {:.3}, lr {:.6}",
                    global_epoch,
                    total_planned,
                    train_loss,
                    train_acc,
                    val_loss,
                    val_acc,
                    lr
                );
                let stats = EpochStats {
                    epoch: global_epoch,
                    total_epochs: total_planned,
                    loss: train_loss,
                    accuracy: train_acc,
                    val_loss,
                    val_accuracy: val_acc,
                };
                for observer in &mut self.observers {
                    observer.on_epoch_end(&stats);
                }

                if val_acc > best_phase_acc {
                    best_phase_acc = val_acc;
                    best_phase_model = model.clone();
                    epochs_without_improvement = 0;
                } else {
                    epochs_without_improvement += 1;
                }

                if val_acc > best_overall_acc {
                    best_overall_acc = val_acc;
                    model
                        .clone()
                        .save_file(writer.best_record_base(), &recorder)
                        .map_err(|e| {
                            MatStudioError::Model(format!("failed to save checkpoint: {:?}", e))
                        })?;
                    self.stream.info(format!(
                        "New best model at epoch {} (val_accuracy {:.3})",
                        global_epoch, val_acc
                    ));
                }

                if epochs_without_improvement >= config.early_stopping_patience {
                    stopped_early = true;
                    self.stream.info(format!(
                        "Early stopping {} after {} epochs without improvement",
                        plan.phase.name(),
                        epochs_without_improvement
                    ));
                    break;
                }
            }

            // The next phase continues from the best weights of this one.
            model = best_phase_model;
            let best_phase_acc = best_phase_acc.max(0.0);
            if plan.phase == Phase::FineTuning {
                fine_tuning_best = best_phase_acc;
            }

            phase_results.push(PhaseResult::Executed(PhaseHistory {
                phase: plan.phase,
                epochs_planned: plan.epochs,
                epochs_run,
                best_val_accuracy: best_phase_acc,
                final_train_loss: last_train_loss,
                final_train_accuracy: last_train_acc,
                stopped_early,
            }));
        }

        // Restore the best checkpoint from disk and re-save it as the
        // canonical artifact.
        model = model
            .load_file(writer.best_record_base(), &recorder, &self.device)
            .map_err(|e| {
                MatStudioError::Model(format!("failed to reload best checkpoint: {:?}", e))
            })?;
        model
            .clone()
            .save_file(writer.model_record_base(), &recorder)
            .map_err(|e| MatStudioError::Model(format!("failed to save model: {:?}", e)))?;

        // Final evaluation of the canonical model.
        let (final_val_loss, final_val_acc, predictions, targets) =
            evaluate(&model.valid(), &val_batches, &weights, config.label_smoothing)?;
        let metrics = Metrics::from_predictions(&predictions, &targets, num_classes);

        self.stream.emit(&crate::training::events::Event::ConfusionMatrix {
            matrix: metrics.confusion_matrix.rows(),
            classes: codec.classes().to_vec(),
        })?;

        let metadata = ModelMetadata {
            model_id: config.model_id.clone(),
            model_architecture: ARCHITECTURE.to_string(),
            classes: codec.classes().to_vec(),
            num_classes,
            class_indices: codec
                .classes()
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
            input_shape: [3, config.image_size, config.image_size],
            original_samples,
            training_samples,
            validation_samples,
            final_accuracy: last_train_acc,
            final_val_accuracy: final_val_acc,
            precision: metrics.macro_precision,
            recall: metrics.macro_recall,
            f1_score: metrics.macro_f1,
            epochs_trained: global_epoch,
            segmentation_enabled: config.enable_segmentation,
            created_at: chrono::Utc::now().to_rfc3339(),
            training_config: TrainingConfigSnapshot {
                epochs: config.epochs,
                batch_size: config.batch_size,
                learning_rate: config.learning_rate,
                validation_split: config.validation_split,
                seed: config.seed,
                image_size: config.image_size,
                pixel_normalization: preprocess::PIXEL_NORMALIZATION.to_string(),
            },
        };

        writer.write_labels(&codec)?;
        writer.write_metadata(&metadata)?;

        self.stream.info(format!(
            "Training complete: {} epochs, val_accuracy {:.3}, val_loss {:.3}, artifacts in {}",
            global_epoch,
            final_val_acc,
            final_val_loss,
            writer.dir().display()
        ));

        Ok(TrainingOutcome {
            metadata,
            phase_results,
            artifact_dir: writer.dir().to_path_buf(),
        })
    }
}

/// Evaluate a model on prepared validation batches.
///
/// Returns (loss, accuracy, predictions, targets).
fn evaluate<B: burn::tensor::backend::Backend>(
    model: &MaterialClassifier<B>,
    batches: &[MaterialBatch<B>],
    weights: &[f32],
    label_smoothing: f32,
) -> Result<(f64, f64, Vec<usize>, Vec<usize>)> {
    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    let mut total = 0usize;
    let mut all_predictions = Vec::new();
    let mut all_targets = Vec::new();

    for batch in batches {
        let output = model.forward(batch.images.clone());
        let loss = CrossEntropyLossConfig::new()
            .with_weights(Some(weights.to_vec()))
            .with_smoothing(Some(label_smoothing))
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();
        total_loss += loss_value;

        let predictions = output.argmax(1).squeeze::<1>(1);
        let batch_correct: i64 = predictions
            .clone()
            .equal(batch.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += batch_correct as usize;
        total += batch.targets.dims()[0];

        let pred_vec: Vec<i64> = predictions
            .into_data()
            .to_vec()
            .map_err(|e| MatStudioError::Model(format!("prediction readback failed: {:?}", e)))?;
        let target_vec: Vec<i64> = batch
            .targets
            .clone()
            .into_data()
            .to_vec()
            .map_err(|e| MatStudioError::Model(format!("target readback failed: {:?}", e)))?;
        all_predictions.extend(pred_vec.iter().map(|&p| p as usize));
        all_targets.extend(target_vec.iter().map(|&t| t as usize));
    }

    let avg_loss = total_loss / batches.len().max(1) as f64;
    let accuracy = if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    };
    Ok((avg_loss, accuracy, all_predictions, all_targets))
}
