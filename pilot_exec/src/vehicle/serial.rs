//! Serial transport for the vehicle protocol.
//!
//! Opens the first working port from a fallback list, performs the ready
//! handshake, and turns the line protocol into [`Vehicle`] calls. On
//! prolonged silence the port is closed and reopened.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serialport::SerialPort;

use field_if::wire::{CameraRange, ConfigKey, HostCmd, ShownObject, VehicleMsg};

use super::{Vehicle, VehicleError};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Per-read timeout on the port itself.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default wait for a command acknowledgement.
const CMD_TIMEOUT: Duration = Duration::from_secs(1);

/// Longer wait for bulk responses (lidar frames, camera tables).
const DATA_TIMEOUT: Duration = Duration::from_secs(3);

/// Wait for the boot banner before assuming the vehicle is already up.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Silence longer than this means the link is stale and the port is
/// reopened.
const STALE_SILENCE: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A vehicle reached over a serial line.
pub struct SerialVehicle {
    port: Box<dyn SerialPort>,
    port_paths: Vec<String>,
    baud: u32,
    rx_buf: Vec<u8>,

    /// Complete lines received but not yet consumed; a single read can
    /// deliver several.
    pending: VecDeque<String>,

    last_rx: Instant,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SerialVehicle {
    /// Open the first port in `paths` that accepts the baud rate, then wait
    /// for the boot banner. A vehicle that is already running never sends
    /// one, so a quiet handshake is not an error.
    pub fn connect(paths: &[String], baud: u32) -> Result<Self, VehicleError> {
        let port = open_first(paths, baud)?;

        let mut vehicle = Self {
            port,
            port_paths: paths.to_vec(),
            baud,
            rx_buf: Vec::new(),
            pending: VecDeque::new(),
            last_rx: Instant::now(),
        };

        match vehicle.wait_ready() {
            true => info!("Vehicle reported ready"),
            false => info!("No boot banner, assuming the vehicle is already up"),
        }

        Ok(vehicle)
    }

    fn wait_ready(&mut self) -> bool {
        let deadline = Instant::now() + READY_TIMEOUT;
        while Instant::now() < deadline {
            match self.read_message(deadline - Instant::now()) {
                Ok(VehicleMsg::Ready) => return true,
                Ok(other) => debug!("Pre-ready message: {:?}", other),
                Err(_) => return false,
            }
        }
        false
    }

    /// Close and reopen the port after stale silence.
    fn reopen(&mut self) -> Result<(), VehicleError> {
        warn!(
            "No vehicle traffic for {:?}, reopening the serial port",
            STALE_SILENCE
        );
        self.port = open_first(&self.port_paths, self.baud)?;
        self.rx_buf.clear();
        self.pending.clear();
        self.last_rx = Instant::now();
        Ok(())
    }

    fn send(&mut self, cmd: &HostCmd) -> Result<(), VehicleError> {
        if self.last_rx.elapsed() > STALE_SILENCE {
            self.reopen()?;
        }

        debug!("-> {}", cmd.to_line());
        self.port.write_all(cmd.to_line().as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    /// Read until one complete message parses or the timeout passes.
    /// Informational `Log:` lines are forwarded to the log and skipped;
    /// single unparseable lines are warned about and skipped too.
    fn read_message(&mut self, timeout: Duration) -> Result<VehicleMsg, VehicleError> {
        let deadline = Instant::now() + timeout;

        loop {
            while let Some(line) = self.pending.pop_front() {
                match VehicleMsg::parse(&line) {
                    Ok(VehicleMsg::Log(text)) => info!("Vehicle: {}", text),
                    Ok(msg) => return Ok(msg),
                    Err(e) => warn!("Bad vehicle line {:?}: {}", line, e),
                }
            }

            if Instant::now() >= deadline {
                return Err(VehicleError::Timeout);
            }

            let mut chunk = [0u8; 256];
            match self.port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.last_rx = Instant::now();
                    self.rx_buf.extend_from_slice(&chunk[..n]);
                    self.pending.extend(split_frames(&mut self.rx_buf));
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(VehicleError::Io(e)),
            }
        }
    }

    /// Send a command and wait for its `Result:` acknowledgement.
    fn transact(&mut self, cmd: &HostCmd, timeout: Duration) -> Result<(), VehicleError> {
        self.send(cmd)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(VehicleError::Timeout)?;
            match self.read_message(remaining)? {
                VehicleMsg::CmdResult(0) => return Ok(()),
                VehicleMsg::CmdResult(code) => return Err(VehicleError::CommandFailed(code)),
                other => debug!("Skipping message while awaiting result: {:?}", other),
            }
        }
    }

    /// Send a command and wait for a data response, tolerating the
    /// acknowledgement arriving first.
    fn query<T>(
        &mut self,
        cmd: &HostCmd,
        timeout: Duration,
        mut extract: impl FnMut(VehicleMsg) -> Option<T>,
    ) -> Result<T, VehicleError> {
        self.send(cmd)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(VehicleError::Timeout)?;
            match self.read_message(remaining)? {
                VehicleMsg::CmdResult(0) => {}
                VehicleMsg::CmdResult(code) => return Err(VehicleError::CommandFailed(code)),
                msg => {
                    if let Some(value) = extract(msg) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    /// Movement commands get a timeout scaled to the expected travel time.
    fn motion_timeout(millis: u64) -> Duration {
        CMD_TIMEOUT + Duration::from_millis(millis)
    }
}

impl Vehicle for SerialVehicle {
    fn rotate(&mut self, degrees: f64) -> Result<(), VehicleError> {
        self.transact(&HostCmd::Rotate(degrees), Duration::from_secs(10))
    }

    fn go(&mut self, speed: f64, millis: u64) -> Result<(), VehicleError> {
        self.transact(&HostCmd::Go { speed, millis }, Self::motion_timeout(millis))
    }

    fn forward(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError> {
        self.transact(
            &HostCmd::Forward {
                dist_in: distance_in,
                speed,
            },
            Duration::from_secs(30),
        )
    }

    fn reverse(&mut self, distance_in: f64, speed: f64) -> Result<(), VehicleError> {
        self.transact(
            &HostCmd::Reverse {
                dist_in: distance_in,
                speed,
            },
            Duration::from_secs(30),
        )
    }

    fn stop(&mut self) -> Result<(), VehicleError> {
        self.transact(&HostCmd::Stop, CMD_TIMEOUT)
    }

    fn look(&mut self, positions: &[(f64, f64)]) -> Result<(), VehicleError> {
        self.transact(&HostCmd::Look(positions.to_vec()), Duration::from_secs(5))
    }

    fn get_lidar(&mut self, max_age_ms: u64) -> Result<Vec<f64>, VehicleError> {
        self.query(
            &HostCmd::RequestLidar { max_age_ms },
            DATA_TIMEOUT,
            |msg| match msg {
                VehicleMsg::LidarFrame(frame) => Some(frame),
                _ => None,
            },
        )
    }

    fn measure(
        &mut self,
        angle_deg: f64,
        tolerance_deg: f64,
    ) -> Result<(f64, f64), VehicleError> {
        self.query(
            &HostCmd::Measure {
                deg: angle_deg,
                tol_deg: tolerance_deg,
            },
            DATA_TIMEOUT,
            |msg| match msg {
                VehicleMsg::Measurement {
                    angle_deg,
                    distance_mm,
                } => Some((angle_deg, distance_mm)),
                _ => None,
            },
        )
    }

    fn find_measurement(
        &mut self,
        angle_deg: f64,
        tolerance_deg: f64,
        expected_mm: f64,
        distance_tolerance_mm: f64,
        max_age_ms: u64,
    ) -> Result<(f64, f64), VehicleError> {
        self.query(
            &HostCmd::FindMeasurement {
                deg: angle_deg,
                tol_deg: tolerance_deg,
                expected_mm,
                dist_tol_mm: distance_tolerance_mm,
                max_age_ms,
            },
            DATA_TIMEOUT,
            |msg| match msg {
                VehicleMsg::Measurement {
                    angle_deg,
                    distance_mm,
                } => Some((angle_deg, distance_mm)),
                _ => None,
            },
        )
    }

    fn get_config(&mut self, key: ConfigKey) -> Result<String, VehicleError> {
        let wanted = key.to_string();
        self.query(&HostCmd::GetConfig(key), CMD_TIMEOUT, move |msg| match msg {
            VehicleMsg::Config { key, value } if key == wanted => Some(value),
            _ => None,
        })
    }

    fn get_cameras(&mut self) -> Result<Vec<CameraRange>, VehicleError> {
        self.query(&HostCmd::GetCameras, DATA_TIMEOUT, |msg| match msg {
            VehicleMsg::Cameras(cameras) => Some(cameras),
            _ => None,
        })
    }

    fn display_mode(&mut self, text: &str) -> Result<(), VehicleError> {
        self.transact(&HostCmd::ShowMode(text.into()), CMD_TIMEOUT)
    }

    fn display_status(&mut self, text: &str) -> Result<(), VehicleError> {
        self.transact(&HostCmd::ShowStatus(text.into()), CMD_TIMEOUT)
    }

    fn display_command(&mut self, text: &str) -> Result<(), VehicleError> {
        self.transact(&HostCmd::ShowCommand(text.into()), CMD_TIMEOUT)
    }

    fn display_position(&mut self, x: f64, y: f64, heading: f64) -> Result<(), VehicleError> {
        self.transact(&HostCmd::ShowPosition { x, y, heading }, CMD_TIMEOUT)
    }

    fn display_objects(&mut self, objects: &[ShownObject]) -> Result<(), VehicleError> {
        self.transact(&HostCmd::ShowObjects(objects.to_vec()), CMD_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn open_first(paths: &[String], baud: u32) -> Result<Box<dyn SerialPort>, VehicleError> {
    for path in paths {
        match serialport::new(path, baud)
            .timeout(PORT_READ_TIMEOUT)
            .open()
        {
            Ok(port) => {
                info!("Opened vehicle port {}", path);
                return Ok(port);
            }
            Err(e) => debug!("Port {} unavailable: {}", path, e),
        }
    }
    Err(VehicleError::NoPort(paths.to_vec()))
}

/// Pull every complete line out of the receive buffer. Lines terminate on
/// `\n`, `\r`, or NUL; the unterminated tail stays in the buffer.
fn split_frames(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;

    for i in 0..buf.len() {
        if matches!(buf[i], b'\n' | b'\r' | 0) {
            if i > start {
                lines.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
            }
            start = i + 1;
        }
    }

    buf.drain(..start);
    lines
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
