//! # Detector Transport
//!
//! The object-detection model runs as a separate process; this module speaks
//! its line protocol. One JSON request per frame on stdin, one JSON response
//! on stdout:
//!
//! ```text
//! -> {"camera": "front"}
//! <- {"detections": [{"model": "yard", "type": "tree", "pattern": "",
//!      "confidence": 0.84, "x1": 100, "y1": 50, "x2": 180, "y2": 400}],
//!     "image": "<base64 png, optional>"}
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use color_eyre::eyre::{eyre, WrapErr};
use log::{debug, info};
use serde::Deserialize;
use serde_json::json;

use crate::pilot_nav::{Detection, DetectionFrame, Detector};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Detector backed by a child process.
pub struct ChildDetector {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Cloneable handle so multiple navigators can share one detector.
#[derive(Clone)]
pub struct SharedDetector(Arc<Mutex<Box<dyn Detector + Send>>>);

/// Stand-in used when no detector process is configured. Localization is
/// impossible with it, lidar-only assignments still work.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

/// One response line from the detector process.
#[derive(Debug, Deserialize)]
struct FrameReply {
    #[serde(default)]
    detections: Vec<DetectionReply>,

    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    model: String,

    #[serde(rename = "type")]
    object_type: String,

    #[serde(default)]
    pattern: String,

    confidence: f64,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ChildDetector {
    /// Spawn the detector process from its command line.
    pub fn spawn(command: &[String]) -> color_eyre::eyre::Result<Self> {
        let program = command
            .first()
            .ok_or_else(|| eyre!("Empty detector command"))?;

        let mut child = Command::new(program)
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .wrap_err_with(|| format!("Could not spawn detector {:?}", program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre!("Detector stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre!("Detector stdout unavailable"))?;

        info!("Detector process {:?} started", program);
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    pub fn into_shared(self) -> SharedDetector {
        SharedDetector::new(Box::new(self))
    }
}

impl SharedDetector {
    pub fn new(inner: Box<dyn Detector + Send>) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }
}

impl Drop for ChildDetector {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Detector for ChildDetector {
    fn detect(&mut self, camera_id: &str) -> color_eyre::eyre::Result<DetectionFrame> {
        let request = json!({ "camera": camera_id });
        writeln!(self.stdin, "{}", request).wrap_err("Detector request failed")?;
        self.stdin.flush().wrap_err("Detector request failed")?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .wrap_err("Detector response failed")?;
        if read == 0 {
            return Err(eyre!("Detector process closed its output"));
        }

        let reply: FrameReply =
            serde_json::from_str(line.trim()).wrap_err("Bad detector response")?;

        let image_png = match reply.image {
            Some(encoded) => Some(base64::decode(&encoded).wrap_err("Bad detector image")?),
            None => None,
        };

        let detections: Vec<Detection> = reply
            .detections
            .into_iter()
            .map(|d| Detection {
                model: d.model,
                object_type: d.object_type,
                pattern: d.pattern,
                confidence: d.confidence,
                x1: d.x1,
                y1: d.y1,
                x2: d.x2,
                y2: d.y2,
            })
            .collect();

        debug!("Camera {}: {} detection(s)", camera_id, detections.len());

        Ok(DetectionFrame {
            timestamp: Utc::now(),
            detections,
            image_png,
        })
    }
}

impl Detector for SharedDetector {
    fn detect(&mut self, camera_id: &str) -> color_eyre::eyre::Result<DetectionFrame> {
        self.0
            .lock()
            .map_err(|_| eyre!("Detector handle poisoned"))?
            .detect(camera_id)
    }
}

impl Detector for NullDetector {
    fn detect(&mut self, _camera_id: &str) -> color_eyre::eyre::Result<DetectionFrame> {
        Ok(DetectionFrame {
            timestamp: Utc::now(),
            detections: Vec::new(),
            image_png: None,
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        let reply: FrameReply = serde_json::from_str(
            r#"{
                "detections": [
                    {"model": "yard", "type": "tree", "confidence": 0.84,
                     "x1": 100, "y1": 50, "x2": 180, "y2": 400}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(reply.detections.len(), 1);
        assert_eq!(reply.detections[0].object_type, "tree");
        assert_eq!(reply.detections[0].pattern, "");
        assert!(reply.image.is_none());
    }

    #[test]
    fn test_empty_reply_parses() {
        let reply: FrameReply = serde_json::from_str("{}").unwrap();
        assert!(reply.detections.is_empty());
    }
}
