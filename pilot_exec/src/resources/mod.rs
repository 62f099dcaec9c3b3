//! # Resources
//!
//! The remote coordination service client and the local filesystem cache of
//! maps and recognition models. Artifacts are fetched once and reused;
//! telemetry posts are thin wrappers over the REST surface.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;

use field_if::service::{
    AssignmentComplete, AssignmentEntry, EncodedImage, EntryNumResponse, FixBasis,
    LidarRecord, PositionLogRecord, PositionView, RecognitionModel, SearchHitRecord,
    format_timestamp,
};

use crate::nav::PositionFix;
use crate::pilot_nav::{PositionSink, SearchHit};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Blocking client for the coordination service.
#[derive(Clone)]
pub struct ServiceClient {
    base_url: String,
    vehicle_id: String,
    session_id: String,
    http: reqwest::blocking::Client,
}

/// Filesystem cache of maps, models, and saved images.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    maps_dir: PathBuf,
    models_dir: PathBuf,
    images_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No coordination service reachable (tried {0:?})")]
    NoService(Vec<String>),

    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Model decode failed: {0}")]
    ModelDecode(#[from] base64::DecodeError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ServiceClient {
    /// Probe the configured URLs in order and build a client on the first
    /// one that answers the vehicle listing.
    pub fn discover(
        urls: &[String],
        vehicle_id: &str,
        session_id: &str,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        for url in urls {
            let base = url.trim_end_matches('/').to_string();
            match http.get(format!("{}/vehicles/", base)).send() {
                Ok(resp) if resp.status().is_success() => {
                    info!("Coordination service at {}", base);
                    return Ok(Self {
                        base_url: base,
                        vehicle_id: vehicle_id.to_string(),
                        session_id: session_id.to_string(),
                        http,
                    });
                }
                Ok(resp) => debug!("Probe {} answered {}", base, resp.status()),
                Err(e) => debug!("Probe {} failed: {}", base, e),
            }
        }

        Err(ServiceError::NoService(urls.to_vec()))
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Pending assignments for this vehicle.
    pub fn fetch_assignments(&self) -> Result<Vec<AssignmentEntry>, ServiceError> {
        let url = format!("{}/assignments/{}/", self.base_url, self.vehicle_id);
        Ok(self.http.get(url).send()?.error_for_status()?.json()?)
    }

    /// Mark an assignment done.
    pub fn mark_complete(&self, entry_num: u64) -> Result<(), ServiceError> {
        let url = format!(
            "{}/assignment/{}/{}/",
            self.base_url, self.vehicle_id, entry_num
        );
        self.http
            .post(url)
            .json(&AssignmentComplete { complete: true })
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn fetch_map_json(&self, map_id: &str) -> Result<String, ServiceError> {
        let url = format!("{}/nav_map/{}/", self.base_url, map_id);
        Ok(self.http.get(url).send()?.error_for_status()?.text()?)
    }

    pub fn fetch_model(
        &self,
        model_id: &str,
        object_type: &str,
        format: &str,
    ) -> Result<RecognitionModel, ServiceError> {
        let url = format!(
            "{}/recognition_model/{}/{}/{}/",
            self.base_url, model_id, object_type, format
        );
        Ok(self.http.get(url).send()?.error_for_status()?.json()?)
    }

    /// Ship a position fix; the returned entry number keys any follow-up
    /// view images.
    pub fn log_position(
        &self,
        map_id: &str,
        fix: &PositionFix,
    ) -> Result<u64, ServiceError> {
        let record = PositionLogRecord::new(
            &self.session_id,
            &self.vehicle_id,
            map_id,
            fix.timestamp,
            fix.x,
            fix.y,
            fix.heading_deg,
            FixBasis {
                angles: fix.basis.angles.clone(),
                distances: fix.basis.distances.clone(),
                landmarks: fix.basis.landmarks.clone(),
            },
        );

        let url = format!(
            "{}/position_log/{}/{}/",
            self.base_url, self.vehicle_id, self.session_id
        );
        let resp: EntryNumResponse = self
            .http
            .post(url)
            .json(&record)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(resp.entry_num)
    }

    pub fn post_position_view(
        &self,
        entry_num: u64,
        camera_id: &str,
        image_png: &[u8],
    ) -> Result<(), ServiceError> {
        let url = format!(
            "{}/position_view/{}/{}/{}/",
            self.base_url, self.vehicle_id, entry_num, camera_id
        );
        self.http
            .post(url)
            .json(&PositionView {
                image: EncodedImage::from_bytes(image_png),
            })
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn post_lidar(&self, measurements: Vec<(f64, f64)>) -> Result<(), ServiceError> {
        let record = LidarRecord {
            session_id: self.session_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            occurred: format_timestamp(Utc::now()),
            measurements,
        };

        let url = format!(
            "{}/lidar/{}/{}/",
            self.base_url, self.vehicle_id, self.session_id
        );
        self.http
            .post(url)
            .json(&record)
            .send()?
            .error_for_status()?;
        Ok(())
    }

    pub fn post_search_hit(&self, hit: &SearchHit) -> Result<(), ServiceError> {
        let record = SearchHitRecord {
            session_id: self.session_id.clone(),
            vehicle_id: self.vehicle_id.clone(),
            occurred: format_timestamp(Utc::now()),
            object_type: hit.object_type.clone(),
            position_x: field_if::service::round2(hit.x),
            position_y: field_if::service::round2(hit.y),
            distance: field_if::service::round2(hit.distance),
            confidence: hit.confidence,
            is_lidar: hit.is_lidar,
            image: hit
                .image_png
                .as_deref()
                .map(EncodedImage::from_bytes),
        };

        let url = format!(
            "{}/new_search_hit/{}/{}/",
            self.base_url, self.vehicle_id, self.session_id
        );
        self.http
            .post(url)
            .json(&record)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

impl PositionSink for ServiceClient {
    fn push_fix(
        &self,
        map_id: &str,
        fix: &PositionFix,
        images: &[(String, Vec<u8>)],
    ) -> color_eyre::eyre::Result<()> {
        let entry_num = self.log_position(map_id, fix)?;

        for (camera_id, png) in images {
            if let Err(e) = self.post_position_view(entry_num, camera_id, png) {
                // A fix without its pictures is still a fix
                warn!("Position view upload for {} failed: {}", camera_id, e);
            }
        }

        Ok(())
    }
}

impl ResourceCache {
    pub fn new<P: AsRef<Path>>(maps_dir: P, models_dir: P, images_dir: P) -> Result<Self, ServiceError> {
        let cache = Self {
            maps_dir: maps_dir.as_ref().to_path_buf(),
            models_dir: models_dir.as_ref().to_path_buf(),
            images_dir: images_dir.as_ref().to_path_buf(),
        };

        fs::create_dir_all(&cache.maps_dir)?;
        fs::create_dir_all(&cache.models_dir)?;
        fs::create_dir_all(&cache.images_dir)?;
        Ok(cache)
    }

    /// Map JSON, from cache or the service. With no client only the cache
    /// is consulted.
    pub fn map_json(
        &self,
        map_id: &str,
        client: Option<&ServiceClient>,
    ) -> Result<String, ServiceError> {
        let path = self.maps_dir.join(format!("{}.json", map_id));

        if path.is_file() {
            debug!("Map {} served from cache", map_id);
            return Ok(fs::read_to_string(path)?);
        }

        let client = client.ok_or_else(|| {
            ServiceError::NoService(vec![format!("map {} not cached", map_id)])
        })?;
        let json = client.fetch_map_json(map_id)?;
        fs::write(&path, &json)?;
        info!("Cached map {} at {}", map_id, path.display());
        Ok(json)
    }

    /// A model binary on disk, fetched and decoded when missing. Returns
    /// the binary path; the per-model parameters land beside it as JSON.
    pub fn model(
        &self,
        model_id: &str,
        object_type: &str,
        format: &str,
        client: Option<&ServiceClient>,
    ) -> Result<PathBuf, ServiceError> {
        let bin_path = self.models_dir.join(format!("{}.{}", model_id, format));
        let params_path = self.models_dir.join(format!("{}.params.json", model_id));

        if bin_path.is_file() && params_path.is_file() {
            debug!("Model {} served from cache", model_id);
            return Ok(bin_path);
        }

        let client = client.ok_or_else(|| {
            ServiceError::NoService(vec![format!("model {} not cached", model_id)])
        })?;
        let model = client.fetch_model(model_id, object_type, format)?;

        fs::write(&bin_path, base64::decode(&model.encoded_model)?)?;
        fs::write(
            &params_path,
            serde_json::to_string_pretty(&model.additional_params)?,
        )?;
        info!("Cached model {} at {}", model_id, bin_path.display());
        Ok(bin_path)
    }

    /// Persist an image beside the other artifacts; name collisions
    /// overwrite.
    pub fn save_image(&self, name: &str, png: &[u8]) -> Result<PathBuf, ServiceError> {
        let path = self.images_dir.join(name);
        fs::write(&path, png)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn temp_cache() -> (ResourceCache, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "pilot_cache_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_nanos()
        ));
        let cache = ResourceCache::new(
            root.join("maps"),
            root.join("models"),
            root.join("images"),
        )
        .unwrap();
        (cache, root)
    }

    #[test]
    fn test_map_served_from_cache_without_client() {
        let (cache, root) = temp_cache();

        fs::write(root.join("maps/back_garden.json"), "{\"shape\":\"rectangle\"}")
            .unwrap();

        let json = cache.map_json("back_garden", None).unwrap();
        assert!(json.contains("rectangle"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_missing_map_without_client_errors() {
        let (cache, root) = temp_cache();
        assert!(cache.map_json("nowhere", None).is_err());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_save_image() {
        let (cache, root) = temp_cache();
        let path = cache.save_image("fix_1_cam_a.png", b"png-bytes").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"png-bytes");
        fs::remove_dir_all(root).unwrap();
    }
}
