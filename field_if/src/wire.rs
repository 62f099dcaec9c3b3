//! # Vehicle Wire Protocol
//!
//! The embedded motion controller is a line-oriented serial device. Host to
//! vehicle messages end with `\n`; vehicle to host lines terminate on `\n`,
//! `\r`, or NUL. Every command elicits one `Result:<code>` line where 0 is
//! success. This module contains the codec only, the transport lives with the
//! pilot executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::{self, Display};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Line the vehicle emits once its boot sequence is complete.
pub const READY_LINE: &str = "!READY!";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message recieved from the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleMsg {
    /// The vehicle has completed its boot sequence.
    Ready,

    /// Command acknowledgement, 0 indicates success.
    CmdResult(i32),

    /// Informational text from the vehicle, forwarded to the log.
    Log(String),

    /// Response to `GetConfig:<key>`.
    Config { key: String, value: String },

    /// Response to `GetCameras:none`, one entry per camera turret.
    Cameras(Vec<CameraRange>),

    /// A lidar frame, raw distances in millimeters indexed by sample number.
    LidarFrame(Vec<f64>),

    /// Response to `Measure` or `FindMeasurement`.
    Measurement { angle_deg: f64, distance_mm: f64 },
}

/// A command sent from the host to the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCmd {
    /// Rotate the vehicle by the given signed degrees.
    Rotate(f64),

    /// Drive at the given speed for the given number of milliseconds.
    Go { speed: f64, millis: u64 },

    /// Drive forward a distance (inches) at a speed.
    Forward { dist_in: f64, speed: f64 },

    /// Drive backward a distance (inches) at a speed.
    Reverse { dist_in: f64, speed: f64 },

    /// Stop all motion.
    Stop,

    /// Point one or more camera turrets, each as a (rotation, tilt) pair.
    Look(Vec<(f64, f64)>),

    /// Request a configuration value.
    GetConfig(ConfigKey),

    /// Request the camera turret table.
    GetCameras,

    /// Request a lidar frame no older than the given age.
    RequestLidar { max_age_ms: u64 },

    /// One-shot distance measurement at a relative heading.
    Measure { deg: f64, tol_deg: f64 },

    /// Measurement constrained to an expected distance window.
    FindMeasurement {
        deg: f64,
        tol_deg: f64,
        expected_mm: f64,
        dist_tol_mm: f64,
        max_age_ms: u64,
    },

    /// Display the operating mode on the vehicle's screen.
    ShowMode(String),

    /// Display a status string on the vehicle's screen.
    ShowStatus(String),

    /// Display the executing command on the vehicle's screen.
    ShowCommand(String),

    /// Display the current position estimate on the vehicle's screen.
    ShowPosition { x: f64, y: f64, heading: f64 },

    /// Display detected objects. A `*` suffix on a name flags a lidar hit.
    ShowObjects(Vec<ShownObject>),
}

/// Configuration keys the vehicle understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// Angular offset of the lidar's zero sample from vehicle front, degrees.
    LidarHeading,

    /// Degrees per lidar sample.
    LidarGranularity,
}

/// Errors from parsing vehicle lines.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("The line is empty")]
    EmptyLine,

    #[error("Unrecognised message key: {0}")]
    UnknownKey(String),

    #[error("Malformed payload for {key}: {reason}")]
    MalformedPayload { key: String, reason: String },
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One camera turret's rotation and tilt capability, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRange {
    pub rotation: f64,
    pub tilt: f64,
    pub min_rotation: f64,
    pub max_rotation: f64,
    pub min_tilt: f64,
    pub max_tilt: f64,
}

/// An object entry for `ShowObjects`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShownObject {
    pub name: String,
    pub dist_in: f64,
    pub is_lidar: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleMsg {
    /// Parse a single line recieved from the vehicle.
    ///
    /// The line must already be stripped of its terminator (`\n`, `\r` or NUL).
    pub fn parse(line: &str) -> Result<Self, WireError> {
        let line = line.trim_matches(|c| c == '\n' || c == '\r' || c == '\0');

        if line.is_empty() {
            return Err(WireError::EmptyLine);
        }

        if line == READY_LINE {
            return Ok(VehicleMsg::Ready);
        }

        // All other messages are Key:payload
        let (key, payload) = match line.find(':') {
            Some(idx) => (&line[..idx], &line[idx + 1..]),
            None => return Err(WireError::UnknownKey(line.into())),
        };

        match key {
            "Result" => {
                let code = payload.trim().parse::<i32>().map_err(|e| {
                    WireError::MalformedPayload {
                        key: key.into(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(VehicleMsg::CmdResult(code))
            }
            "Log" => Ok(VehicleMsg::Log(payload.into())),
            "Config" => {
                let mut parts = payload.splitn(2, '|');
                let cfg_key = parts.next().unwrap_or("");
                let value = parts.next().ok_or_else(|| WireError::MalformedPayload {
                    key: key.into(),
                    reason: "missing value".into(),
                })?;
                Ok(VehicleMsg::Config {
                    key: cfg_key.into(),
                    value: value.into(),
                })
            }
            "Cameras" => {
                let mut cameras = Vec::new();
                for cam_str in payload.split(',') {
                    let fields = parse_floats(key, cam_str, '|')?;
                    if fields.len() != 6 {
                        return Err(WireError::MalformedPayload {
                            key: key.into(),
                            reason: format!("expected 6 fields, got {}", fields.len()),
                        });
                    }
                    cameras.push(CameraRange {
                        rotation: fields[0],
                        tilt: fields[1],
                        min_rotation: fields[2],
                        max_rotation: fields[3],
                        min_tilt: fields[4],
                        max_tilt: fields[5],
                    });
                }
                Ok(VehicleMsg::Cameras(cameras))
            }
            "Map" => Ok(VehicleMsg::LidarFrame(parse_floats(key, payload, '|')?)),
            "Measurement" => {
                let fields = parse_floats(key, payload, '|')?;
                if fields.len() != 2 {
                    return Err(WireError::MalformedPayload {
                        key: key.into(),
                        reason: format!("expected 2 fields, got {}", fields.len()),
                    });
                }
                Ok(VehicleMsg::Measurement {
                    angle_deg: fields[0],
                    distance_mm: fields[1],
                })
            }
            other => Err(WireError::UnknownKey(other.into())),
        }
    }
}

impl HostCmd {
    /// Format this command as a wire line, without the trailing `\n`.
    pub fn to_line(&self) -> String {
        format!("{}", self)
    }
}

impl Display for HostCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCmd::Rotate(deg) => write!(f, "Rotate:{}", deg),
            HostCmd::Go { speed, millis } => write!(f, "Go:{}|{}", speed, millis),
            HostCmd::Forward { dist_in, speed } => write!(f, "Forward:{}|{}", dist_in, speed),
            HostCmd::Reverse { dist_in, speed } => write!(f, "Reverse:{}|{}", dist_in, speed),
            HostCmd::Stop => write!(f, "Stop:0"),
            HostCmd::Look(positions) => {
                write!(f, "Look:")?;
                for (i, (rot, tilt)) in positions.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}|{}", rot, tilt)?;
                }
                Ok(())
            }
            HostCmd::GetConfig(key) => write!(f, "GetConfig:{}", key),
            HostCmd::GetCameras => write!(f, "GetCameras:none"),
            HostCmd::RequestLidar { max_age_ms } => write!(f, "Map:{}", max_age_ms),
            HostCmd::Measure { deg, tol_deg } => write!(f, "Measure:{}|{}", deg, tol_deg),
            HostCmd::FindMeasurement {
                deg,
                tol_deg,
                expected_mm,
                dist_tol_mm,
                max_age_ms,
            } => write!(
                f,
                "FindMeasurement:{}|{}|{}|{}|{}",
                deg, tol_deg, expected_mm, dist_tol_mm, max_age_ms
            ),
            HostCmd::ShowMode(s) => write!(f, "ShowMode:{}", s),
            HostCmd::ShowStatus(s) => write!(f, "ShowStatus:{}", s),
            HostCmd::ShowCommand(s) => write!(f, "ShowCommand:{}", s),
            HostCmd::ShowPosition { x, y, heading } => {
                write!(f, "ShowPosition:{:.1}|{:.1}|{:.1}", x, y, heading)
            }
            HostCmd::ShowObjects(objects) => {
                write!(f, "ShowObjects:")?;
                for (i, obj) in objects.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    let marker = if obj.is_lidar { "*" } else { "" };
                    write!(f, "{}{}|{:.0}", obj.name, marker, obj.dist_in)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKey::LidarHeading => write!(f, "LidarHeading"),
            ConfigKey::LidarGranularity => write!(f, "LidarGranularity"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_floats(key: &str, payload: &str, sep: char) -> Result<Vec<f64>, WireError> {
    payload
        .split(sep)
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| WireError::MalformedPayload {
                    key: key.into(),
                    reason: format!("{:?}: {}", s, e),
                })
        })
        .collect()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_ready_and_result() {
        assert_eq!(VehicleMsg::parse("!READY!\n").unwrap(), VehicleMsg::Ready);
        assert_eq!(
            VehicleMsg::parse("Result:0\r").unwrap(),
            VehicleMsg::CmdResult(0)
        );
        assert_eq!(
            VehicleMsg::parse("Result:-3").unwrap(),
            VehicleMsg::CmdResult(-3)
        );
    }

    #[test]
    fn test_parse_config() {
        assert_eq!(
            VehicleMsg::parse("Config:LidarHeading|90").unwrap(),
            VehicleMsg::Config {
                key: "LidarHeading".into(),
                value: "90".into()
            }
        );
    }

    #[test]
    fn test_parse_cameras() {
        let msg = VehicleMsg::parse("Cameras:0|10|-90|90|-45|45,180|0|90|270|-45|45").unwrap();
        match msg {
            VehicleMsg::Cameras(cams) => {
                assert_eq!(cams.len(), 2);
                assert_eq!(cams[0].rotation, 0.0);
                assert_eq!(cams[0].max_rotation, 90.0);
                assert_eq!(cams[1].rotation, 180.0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_parse_lidar_frame() {
        let msg = VehicleMsg::parse("Map:100|0|250.5|3000\0").unwrap();
        assert_eq!(
            msg,
            VehicleMsg::LidarFrame(vec![100.0, 0.0, 250.5, 3000.0])
        );
    }

    #[test]
    fn test_parse_measurement() {
        assert_eq!(
            VehicleMsg::parse("Measurement:45.5|1220").unwrap(),
            VehicleMsg::Measurement {
                angle_deg: 45.5,
                distance_mm: 1220.0
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VehicleMsg::parse("").is_err());
        assert!(VehicleMsg::parse("Bogus:1|2").is_err());
        assert!(VehicleMsg::parse("Result:abc").is_err());
        assert!(VehicleMsg::parse("Measurement:45.5").is_err());
    }

    #[test]
    fn test_format_commands() {
        assert_eq!(HostCmd::Rotate(-12.5).to_line(), "Rotate:-12.5");
        assert_eq!(HostCmd::Stop.to_line(), "Stop:0");
        assert_eq!(
            HostCmd::Forward {
                dist_in: 24.0,
                speed: 0.5
            }
            .to_line(),
            "Forward:24|0.5"
        );
        assert_eq!(
            HostCmd::Look(vec![(0.0, 10.0), (180.0, 0.0)]).to_line(),
            "Look:0|10|180|0"
        );
        assert_eq!(
            HostCmd::GetConfig(ConfigKey::LidarGranularity).to_line(),
            "GetConfig:LidarGranularity"
        );
        assert_eq!(HostCmd::GetCameras.to_line(), "GetCameras:none");
        assert_eq!(HostCmd::RequestLidar { max_age_ms: 500 }.to_line(), "Map:500");
    }

    #[test]
    fn test_format_show_objects() {
        let cmd = HostCmd::ShowObjects(vec![
            ShownObject {
                name: "cone".into(),
                dist_in: 48.0,
                is_lidar: true,
            },
            ShownObject {
                name: "ball".into(),
                dist_in: 90.4,
                is_lidar: false,
            },
        ]);
        assert_eq!(cmd.to_line(), "ShowObjects:cone*|48|ball|90");
    }
}
