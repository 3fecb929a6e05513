//! MongoDB image store and model registry.
//!
//! Two collections in the `Construction_test` database:
//! - `materialimages`: labelled training images with the raw JPEG bytes
//!   embedded in the document
//! - `mlmodels`: the registry the downstream application reads to find the
//!   active classifier
//!
//! All access goes through the synchronous client; these are operator
//! commands, not a serving path.

use std::collections::BTreeMap;
use std::path::Path;

use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, Bson, DateTime, Document};
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::sync::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::artifacts::ModelMetadata;
use crate::utils::error::{MatStudioError, Result};

pub const DEFAULT_DATABASE: &str = "Construction_test";
const IMAGES_COLLECTION: &str = "materialimages";
const MODELS_COLLECTION: &str = "mlmodels";

/// Side length images are normalized to before storage
pub const STORED_IMAGE_SIZE: u32 = 224;
const JPEG_QUALITY: u8 = 95;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// Connection settings for the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

/// One labelled training image fetched from the store
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub filename: String,
    pub label: String,
    pub data: Vec<u8>,
}

/// Access to the `materialimages` collection
pub struct ImageStore {
    collection: Collection<Document>,
}

impl ImageStore {
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let database = open_database(config)?;
        Ok(Self {
            collection: database.collection(IMAGES_COLLECTION),
        })
    }

    /// Fetch every usable image record.
    ///
    /// Documents without embedded image bytes or without a material label are
    /// skipped with a warning rather than failing the fetch.
    pub fn fetch_all(&self) -> Result<Vec<ImageRecord>> {
        let mut records = Vec::new();
        let cursor = self.collection.find(doc! {}, None)?;
        for document in cursor {
            let document = document?;
            match record_from_document(&document) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(
                        "skipping store document without image data or label: {:?}",
                        document.get_object_id("_id").ok()
                    );
                }
            }
        }
        Ok(records)
    }

    /// Image counts per material label.
    pub fn class_counts(&self) -> Result<BTreeMap<String, u64>> {
        let pipeline = vec![doc! {
            "$group": { "_id": "$material_key", "count": { "$sum": 1 } }
        }];
        let mut counts = BTreeMap::new();
        for document in self.collection.aggregate(pipeline, None)? {
            let document = document?;
            let label = document
                .get_str("_id")
                .unwrap_or("<unlabelled>")
                .to_string();
            let count = match document.get("count") {
                Some(Bson::Int32(n)) => *n as u64,
                Some(Bson::Int64(n)) => *n as u64,
                _ => 0,
            };
            counts.insert(label, count);
        }
        Ok(counts)
    }

    /// Insert one image after normalizing it, unless its hash is already
    /// present. Returns false on a duplicate.
    pub fn insert_image(
        &self,
        material: &str,
        raw_bytes: &[u8],
        filename: &str,
        source: &str,
    ) -> Result<bool> {
        let hash = image_hash(raw_bytes);
        if self
            .collection
            .find_one(doc! { "hash": &hash }, None)?
            .is_some()
        {
            tracing::debug!("duplicate image skipped: {} ({})", filename, &hash[..8]);
            return Ok(false);
        }

        let processed = prepare_image_bytes(raw_bytes)?;
        let document = image_document(material, filename, processed, &hash, source);
        self.collection.insert_one(document, None)?;
        Ok(true)
    }
}

/// Pull the fields training needs out of a store document.
///
/// `material_key` is the label; `material_official` is accepted as a
/// fallback for older documents.
fn record_from_document(document: &Document) -> Option<ImageRecord> {
    let data = document.get_binary_generic("data").ok()?.clone();
    let label = document
        .get_str("material_key")
        .or_else(|_| document.get_str("material_official"))
        .ok()?
        .to_string();
    let filename = document
        .get_str("filename")
        .unwrap_or("<unnamed>")
        .to_string();
    Some(ImageRecord {
        filename,
        label,
        data,
    })
}

fn image_document(
    material: &str,
    filename: &str,
    processed: Vec<u8>,
    hash: &str,
    source: &str,
) -> Document {
    let size = processed.len() as i64;
    doc! {
        "material_key": material,
        "material_official": material,
        "filename": filename,
        "data": Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: processed,
        }),
        "hash": hash,
        "source": source,
        "size": size,
        "added_at": DateTime::now(),
    }
}

/// Content hash used for ingest deduplication.
pub fn image_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize an image for storage: center-crop to square, resize to the
/// stored side length, re-encode as JPEG.
pub fn prepare_image_bytes(raw_bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw_bytes)
        .map_err(|e| MatStudioError::Dataset(format!("cannot decode image: {}", e)))?;

    let (width, height) = (decoded.width(), decoded.height());
    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;
    let cropped = decoded.crop_imm(left, top, side, side);

    let resized = cropped.resize_exact(
        STORED_IMAGE_SIZE,
        STORED_IMAGE_SIZE,
        image::imageops::FilterType::Lanczos3,
    );

    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| MatStudioError::Dataset(format!("cannot encode image: {}", e)))?;
    Ok(buffer)
}

/// Summary of one ingest run
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub added: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Walk a directory and insert every supported image for one material.
pub fn ingest_directory(store: &ImageStore, directory: &Path, material: &str) -> Result<IngestReport> {
    if !directory.is_dir() {
        return Err(MatStudioError::PathNotFound(directory.to_path_buf()));
    }

    let mut report = IngestReport::default();
    for entry in WalkDir::new(directory).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("cannot read {}: {}", entry.path().display(), e);
                report.failed += 1;
                continue;
            }
        };
        match store.insert_image(material, &bytes, &filename, "local") {
            Ok(true) => report.added += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                tracing::warn!("cannot ingest {}: {}", filename, e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// A registry entry as listed back to the operator
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub version: String,
    pub accuracy: f64,
    pub status: String,
    pub model_id: Option<String>,
    pub is_active: bool,
}

/// Access to the `mlmodels` registry collection
pub struct ModelRegistry {
    collection: Collection<Document>,
}

impl ModelRegistry {
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let database = open_database(config)?;
        Ok(Self {
            collection: database.collection(MODELS_COLLECTION),
        })
    }

    /// Publish a trained model to the registry.
    ///
    /// Upserts on the model id so re-syncing the same model updates its entry
    /// in place. With `activate`, every other entry is deactivated first so
    /// at most one model is active. Returns the version string assigned.
    pub fn sync_model(
        &self,
        metadata: &ModelMetadata,
        model_path: &Path,
        labels_path: &Path,
        activate: bool,
    ) -> Result<String> {
        if !model_path.is_file() {
            return Err(MatStudioError::PathNotFound(model_path.to_path_buf()));
        }
        if !labels_path.is_file() {
            return Err(MatStudioError::PathNotFound(labels_path.to_path_buf()));
        }

        let version = registry_version(chrono::Utc::now());
        let document = registry_document(metadata, model_path, labels_path, &version)?;

        self.collection.update_one(
            doc! { "mlstudioModelId": &metadata.model_id },
            doc! { "$set": document },
            UpdateOptions::builder().upsert(true).build(),
        )?;

        if activate {
            self.collection.update_many(
                doc! { "mlstudioModelId": { "$ne": &metadata.model_id } },
                doc! { "$set": { "isActive": false } },
                None,
            )?;
            self.collection.update_one(
                doc! { "mlstudioModelId": &metadata.model_id },
                doc! { "$set": { "isActive": true } },
                None,
            )?;
        }

        Ok(version)
    }

    /// List registry entries, newest first.
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .build();
        let mut entries = Vec::new();
        for document in self.collection.find(doc! {}, options)? {
            let document = document?;
            entries.push(RegistryEntry {
                name: document.get_str("name").unwrap_or("<unnamed>").to_string(),
                version: document.get_str("version").unwrap_or("").to_string(),
                accuracy: document.get_f64("accuracy").unwrap_or(0.0),
                status: document.get_str("status").unwrap_or("unknown").to_string(),
                model_id: document
                    .get_str("mlstudioModelId")
                    .ok()
                    .map(|s| s.to_string()),
                is_active: document.get_bool("isActive").unwrap_or(false),
            });
        }
        Ok(entries)
    }
}

/// Version string derived from the sync time.
fn registry_version(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("v{}", now.format("%Y%m%d.%H%M"))
}

/// Registry document shape the downstream application expects.
fn registry_document(
    metadata: &ModelMetadata,
    model_path: &Path,
    labels_path: &Path,
    version: &str,
) -> Result<Document> {
    let model_path = absolute_path(model_path)?;
    let labels_path = absolute_path(labels_path)?;
    let class_indices: Document = metadata
        .class_indices
        .iter()
        .map(|(name, idx)| (name.clone(), Bson::Int64(*idx as i64)))
        .collect();
    let input_shape: Vec<Bson> = metadata
        .input_shape
        .iter()
        .map(|&d| Bson::Int64(d as i64))
        .collect();

    Ok(doc! {
        "name": "EcoBuild Material Detector",
        "version": version,
        "description": format!(
            "Trained on {} samples, {} material classes",
            metadata.original_samples, metadata.num_classes
        ),
        "status": "ready",
        "accuracy": metadata.final_val_accuracy,
        "precision": metadata.precision,
        "recall": metadata.recall,
        "f1Score": metadata.f1_score,
        "totalSamples": metadata.original_samples as i64,
        "epochs": metadata.epochs_trained as i64,
        "trainingTime": 0i64,
        "modelPath": model_path,
        "labelsPath": labels_path,
        "classes": metadata.classes.clone(),
        "classIndices": class_indices,
        "inputShape": input_shape,
        "architecture": metadata.model_architecture.clone(),
        "mlstudioModelId": metadata.model_id.clone(),
        "isActive": false,
        "createdAt": DateTime::now(),
        "updatedAt": DateTime::now(),
    })
}

fn absolute_path(path: &Path) -> Result<String> {
    let canonical = path.canonicalize()?;
    Ok(canonical.to_string_lossy().to_string())
}

fn open_database(config: &StoreConfig) -> Result<Database> {
    let client = Client::with_uri_str(&config.uri)?;
    Ok(client.database(&config.database))
}
