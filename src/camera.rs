use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CameraError, CaptureError};
use crate::{CameraConfig, Frame};

/// Anything that can hand out the most recent frame of a live feed.
pub trait FrameSource {
    /// Binds the capture device. Must succeed before `current_frame`.
    fn open(&mut self) -> Result<(), CameraError>;

    fn current_frame(&mut self) -> Result<Frame, CaptureError>;
}

#[derive(Debug, Default)]
struct Latest {
    frame: Option<Frame>,
    closed: bool,
}

/// FfmpegCamera streams raw RGB24 frames out of an ffmpeg child process and
/// keeps the newest one around for whoever asks.
pub struct FfmpegCamera {
    config: CameraConfig,
    child: Option<Child>,
    latest: Arc<Mutex<Latest>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

const POLL_STEP: Duration = Duration::from_millis(5);

impl FfmpegCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            child: None,
            latest: Arc::new(Mutex::new(Latest::default())),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            self.config.format.clone(),
            "-i".into(),
            self.config.device.clone(),
            "-vf".into(),
            format!("scale={}:{}", self.config.width, self.config.height),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
        }
        if let Some(hnd) = self.thread.take() {
            hnd.join().ok();
        }
        self.shutdown = Arc::new(AtomicBool::new(false));
        self.latest = Arc::new(Mutex::new(Latest::default()));
    }

    fn wait_for_frame(&self, timeout: Duration) -> Result<Frame, CaptureError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
                if latest.closed {
                    return Err(CaptureError::StreamClosed);
                }
                if let Some(frame) = &latest.frame {
                    return Ok(frame.clone());
                }
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::Timeout(timeout));
            }
            thread::sleep(POLL_STEP);
        }
    }

    fn mainloop(
        width: u32,
        height: u32,
        latest: Arc<Mutex<Latest>>,
        shutdown: Arc<AtomicBool>,
        mut stdout: ChildStdout,
    ) {
        let frame_len = width as usize * height as usize * 3;
        let mut frame_id = 0;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let mut pixels = vec![0u8; frame_len];
            if let Err(e) = stdout.read_exact(&mut pixels) {
                tracing::debug!("capture stream ended: {e}");
                latest.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
                return;
            }

            let frame = Frame {
                id: frame_id,
                width,
                height,
                pixels,
            };
            frame_id += 1;

            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            latest.lock().unwrap_or_else(PoisonError::into_inner).frame = Some(frame);
        }
    }
}

impl FrameSource for FfmpegCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.child.is_some() {
            return Ok(());
        }
        if self.config.format == "v4l2" && !Path::new(&self.config.device).exists() {
            return Err(CameraError::NoDevice(self.config.device.clone().into()));
        }

        let mut child = Command::new(&self.config.command)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| CameraError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            child.kill().ok();
            return Err(CameraError::Exited {
                command: self.config.command.clone(),
            });
        };

        let (width, height) = (self.config.width, self.config.height);
        let latest = self.latest.clone();
        let shutdown = self.shutdown.clone();
        self.thread = Some(thread::spawn(move || {
            FfmpegCamera::mainloop(width, height, latest, shutdown, stdout);
        }));
        self.child = Some(child);

        // Camera permission problems surface as ffmpeg exiting straight away.
        match self.wait_for_frame(self.config.frame_timeout()) {
            Ok(_) => {
                tracing::info!(
                    "camera {} streaming at {}x{}",
                    self.config.device,
                    width,
                    height
                );
                Ok(())
            }
            Err(e) => {
                tracing::debug!("camera produced no first frame: {e}");
                self.close();
                Err(first_frame_failure(&self.config.command, e))
            }
        }
    }

    fn current_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.child.is_none() {
            return Err(CaptureError::NotOpen);
        }
        self.wait_for_frame(self.config.frame_timeout())
    }
}

fn first_frame_failure(command: &str, error: CaptureError) -> CameraError {
    let command = command.to_string();
    match error {
        CaptureError::Timeout(timeout) => CameraError::NoFrame { command, timeout },
        _ => CameraError::Exited { command },
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_before_open_is_rejected() {
        let mut camera = FfmpegCamera::new(CameraConfig::default());
        assert!(matches!(
            camera.current_frame(),
            Err(CaptureError::NotOpen)
        ));
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut camera = FfmpegCamera::new(CameraConfig {
            device: "/dev/hands-off-no-such-camera".into(),
            ..CameraConfig::default()
        });
        assert!(matches!(camera.open(), Err(CameraError::NoDevice(_))));
    }

    #[test]
    fn silent_stream_is_not_reported_as_exited() {
        let timeout = Duration::from_millis(2000);
        assert!(matches!(
            first_frame_failure("ffmpeg", CaptureError::Timeout(timeout)),
            CameraError::NoFrame { timeout: t, .. } if t == timeout
        ));
        assert!(matches!(
            first_frame_failure("ffmpeg", CaptureError::StreamClosed),
            CameraError::Exited { .. }
        ));
    }

    #[test]
    fn capture_command_that_quits_fails_to_open() {
        let mut camera = FfmpegCamera::new(CameraConfig {
            command: "true".into(),
            format: "lavfi".into(),
            ..CameraConfig::default()
        });
        assert!(matches!(camera.open(), Err(CameraError::Exited { .. })));
        assert!(matches!(
            camera.current_frame(),
            Err(CaptureError::NotOpen)
        ));
    }

    #[test]
    fn ffmpeg_args_scale_to_configured_size() {
        let camera = FfmpegCamera::new(CameraConfig {
            width: 128,
            height: 96,
            ..CameraConfig::default()
        });
        let args = camera.args();
        assert!(args.contains(&"scale=128:96".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }
}
