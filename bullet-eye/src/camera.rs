//! Network camera capture
//!
//! The range camera serves `multipart/x-mixed-replace` MJPEG over HTTP.
//! [`HttpMjpegCamera`] reads that stream directly; with the `opencv` feature
//! [`OpenCvCamera`] hands the URL to `videoio` instead. `camera_backend` in
//! the configuration picks one of the two.

use crate::config::{CameraBackend, DetectorConfig};
use crate::error::VisionError;
use image::{ImageFormat, RgbImage};
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 16 * 1024;

/// Chunks buffered between the socket thread and the frame reader.
const STALL_QUEUE: usize = 8;

/// Largest JPEG accepted from the stream before the reader gives up.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// A source of RGB frames. Only one connection is held at a time.
pub trait FrameSource: Send {
    /// Open the connection. Opening an already open source is a no-op.
    fn open(&mut self) -> Result<(), VisionError>;

    fn is_opened(&self) -> bool;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<RgbImage, VisionError>;

    /// Drop the connection. Safe to call any number of times.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn open(&mut self) -> Result<(), VisionError> {
        (**self).open()
    }

    fn is_opened(&self) -> bool {
        (**self).is_opened()
    }

    fn read_frame(&mut self) -> Result<RgbImage, VisionError> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Build the (unopened) camera selected by `config.camera_backend`.
pub fn camera_from_config(config: &DetectorConfig) -> Result<Box<dyn FrameSource>, VisionError> {
    info!("Using {} camera backend", config.camera_backend);
    match config.camera_backend {
        CameraBackend::Http => Ok(Box::new(HttpMjpegCamera::from_config(config))),
        #[cfg(feature = "opencv")]
        CameraBackend::OpenCv => Ok(Box::new(OpenCvCamera::from_config(config))),
        #[cfg(not(feature = "opencv"))]
        CameraBackend::OpenCv => Err(VisionError::Config(
            "Camera backend 'opencv' needs a build with the opencv feature".to_string(),
        )),
    }
}

/// Reader that fails with `TimedOut` once its source stays silent for `timeout`.
///
/// The source is drained on a helper thread. A helper stuck on a silent socket
/// exits when that connection closes or the next chunk finds no receiver.
pub struct StallReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
    timeout: Duration,
}

impl StallReader {
    pub fn spawn<R: Read + Send + 'static>(mut inner: R, timeout: Duration) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(STALL_QUEUE);

        thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || loop {
                let mut chunk = vec![0u8; READ_CHUNK];
                match inner.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        chunk.truncate(read);
                        if tx.send(Ok(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            })?;

        Ok(Self {
            chunks: rx,
            current: Vec::new(),
            offset: 0,
            timeout,
        })
    }
}

impl Read for StallReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.offset >= self.current.len() {
            match self.chunks.recv_timeout(self.timeout) {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Ok(Err(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data for {:?}", self.timeout),
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let read = (self.current.len() - self.offset).min(buf.len());
        buf[..read].copy_from_slice(&self.current[self.offset..self.offset + read]);
        self.offset += read;
        Ok(read)
    }
}

/// Run `task` on its own thread and give up waiting after `deadline`.
fn with_deadline<T, F>(deadline: Duration, task: F) -> Result<Option<T>, VisionError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("camera-connect".to_string())
        .spawn(move || {
            let _ = tx.send(task());
        })?;

    match rx.recv_timeout(deadline) {
        Ok(value) => Ok(Some(value)),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => {
            Err(VisionError::Camera("Connect thread exited without a result".to_string()))
        }
    }
}

/// Splits a multipart MJPEG body into JPEG payloads.
///
/// Parts carrying a `Content-Length` header are cut by length; otherwise the
/// payload runs from the start-of-image to the end-of-image marker.
pub struct MjpegReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_CHUNK),
            max_frame_bytes,
        }
    }

    /// Next JPEG in the stream, or `None` once the body has ended.
    pub fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>, VisionError> {
        loop {
            if let Some((start, end)) = self.locate_frame() {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(jpeg));
            }

            if self.buffer.len() > self.max_frame_bytes {
                return Err(VisionError::Camera(format!(
                    "No complete frame within {} bytes of stream",
                    self.max_frame_bytes
                )));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = match self.inner.read(&mut chunk) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(VisionError::Camera(format!("Stream stalled: {}", e)));
                }
                Err(e) => return Err(e.into()),
            };
            if read == 0 {
                if !self.buffer.is_empty() {
                    debug!("Stream ended with {} unparsed bytes", self.buffer.len());
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn locate_frame(&self) -> Option<(usize, usize)> {
        let start = find(&self.buffer, &SOI)?;

        if let Some(length) = content_length(&self.buffer[..start]) {
            let end = start.checked_add(length)?;
            return (end <= self.buffer.len()).then_some((start, end));
        }

        let tail = find(&self.buffer[start + SOI.len()..], &EOI)?;
        Some((start, start + SOI.len() + tail + EOI.len()))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// `Content-Length` of the part header immediately preceding a payload.
fn content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.lines().rev().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Decode a JPEG payload into an RGB frame.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(image.to_rgb8())
}

/// MJPEG-over-HTTP camera
///
/// Every blocking step is bounded: the TCP connect by `connect_timeout`, the
/// response headers by `connect_timeout + read_timeout`, and each body read by
/// `read_timeout`.
pub struct HttpMjpegCamera {
    url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    reader: Option<MjpegReader<StallReader>>,
}

impl HttpMjpegCamera {
    pub fn new(url: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            read_timeout,
            reader: None,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.stream_url.clone(),
            config.connect_timeout(),
            config.read_timeout(),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FrameSource for HttpMjpegCamera {
    fn open(&mut self) -> Result<(), VisionError> {
        if self.reader.is_some() {
            return Ok(());
        }

        // The body never ends, so the client itself only bounds the connect
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(None)
            .build()?;

        let request = client.get(&self.url);
        let deadline = self.connect_timeout + self.read_timeout;
        let Some(response) = with_deadline(deadline, move || request.send())? else {
            return Err(VisionError::Camera(format!(
                "No response from {} within {:?}",
                self.url, deadline
            )));
        };
        let response = response?;

        if !response.status().is_success() {
            return Err(VisionError::Camera(format!(
                "Stream {} answered {}",
                self.url,
                response.status()
            )));
        }

        let body = StallReader::spawn(response, self.read_timeout)?;
        self.reader = Some(MjpegReader::new(body));
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.reader.is_some()
    }

    fn read_frame(&mut self) -> Result<RgbImage, VisionError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| VisionError::Camera("Camera not opened".to_string()))?;

        match reader.next_jpeg() {
            Ok(Some(jpeg)) => decode_jpeg(&jpeg),
            Ok(None) => {
                warn!("Camera stream {} ended", self.url);
                self.reader = None;
                Err(VisionError::Camera("Stream ended".to_string()))
            }
            Err(e) => {
                warn!("Dropping camera stream {}: {}", self.url, e);
                self.reader = None;
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        self.reader = None;
    }
}

/// OpenCV `VideoCapture` camera
#[cfg(feature = "opencv")]
pub struct OpenCvCamera {
    url: String,
    open_timeout: Duration,
    read_timeout: Duration,
    capture: Option<opencv::videoio::VideoCapture>,
}

#[cfg(feature = "opencv")]
impl OpenCvCamera {
    pub fn new(url: impl Into<String>, open_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            open_timeout,
            read_timeout,
            capture: None,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.stream_url.clone(),
            config.connect_timeout(),
            config.read_timeout(),
        )
    }
}

#[cfg(feature = "opencv")]
fn millis_i32(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(feature = "opencv")]
impl FrameSource for OpenCvCamera {
    fn open(&mut self) -> Result<(), VisionError> {
        use opencv::prelude::*;

        if self.is_opened() {
            return Ok(());
        }

        use opencv::videoio;

        let params = opencv::core::Vector::<i32>::from_slice(&[
            videoio::CAP_PROP_OPEN_TIMEOUT_MSEC,
            millis_i32(self.open_timeout),
            videoio::CAP_PROP_READ_TIMEOUT_MSEC,
            millis_i32(self.read_timeout),
        ]);
        let capture = videoio::VideoCapture::from_file_with_params(&self.url, videoio::CAP_ANY, &params)
            .map_err(|e| VisionError::Camera(format!("Failed to open {}: {}", self.url, e)))?;
        let opened = capture.is_opened()?;
        self.capture = Some(capture);

        if !opened {
            return Err(VisionError::Camera(format!("Stream {} failed to open", self.url)));
        }
        Ok(())
    }

    fn is_opened(&self) -> bool {
        use opencv::prelude::*;

        self.capture
            .as_ref()
            .map(|capture| capture.is_opened().unwrap_or(false))
            .unwrap_or(false)
    }

    fn read_frame(&mut self) -> Result<RgbImage, VisionError> {
        use opencv::prelude::*;

        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| VisionError::Camera("Camera not opened".to_string()))?;

        let mut frame = opencv::core::Mat::default();
        if !capture.read(&mut frame)? || frame.empty() {
            return Err(VisionError::Camera("Failed to read frame".to_string()));
        }
        crate::utils::mat_to_rgb(&frame)
    }

    fn release(&mut self) {
        use opencv::prelude::*;

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                warn!("Failed to release capture: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    /// Hands out at most `step` bytes per `read` call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Yields `data` once, then blocks until `hold` has passed.
    struct Silent {
        data: Option<Vec<u8>>,
        hold: Duration,
    }

    impl Read for Silent {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(data) = self.data.take() {
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }
            thread::sleep(self.hold);
            Ok(0)
        }
    }

    fn part(jpeg: &[u8], with_length: bool) -> Vec<u8> {
        let mut out = b"--123456789000000000000987654321\r\nContent-Type: image/jpeg\r\n".to_vec();
        if with_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", jpeg.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(jpeg);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn test_reader_splits_on_markers() {
        let first = [0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
        let second = [0xFF, 0xD8, 9, 0xFF, 0xD9];
        let mut body = part(&first, false);
        body.extend(part(&second, false));

        let mut reader = MjpegReader::new(Cursor::new(body));
        assert_eq!(reader.next_jpeg().unwrap().unwrap(), first.to_vec());
        assert_eq!(reader.next_jpeg().unwrap().unwrap(), second.to_vec());
        assert!(reader.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_reader_prefers_content_length() {
        // an embedded EOI must not cut the payload short
        let jpeg = [0xFF, 0xD8, 0xFF, 0xD9, 7, 7, 0xFF, 0xD9];
        let body = part(&jpeg, true);

        let mut reader = MjpegReader::new(Cursor::new(body));
        assert_eq!(reader.next_jpeg().unwrap().unwrap(), jpeg.to_vec());
    }

    #[test]
    fn test_reader_reassembles_frames_split_across_reads() {
        let sized = [0xFF, 0xD8, 0xFF, 0xD9, 4, 5, 6, 0xFF, 0xD9];
        let marked = [0xFF, 0xD8, 8, 8, 8, 8, 0xFF, 0xD9];
        let mut body = part(&sized, true);
        body.extend(part(&marked, false));
        body.extend(part(&sized, true));

        for step in [1, 2, 3, 7] {
            let mut reader = MjpegReader::new(Trickle {
                data: body.clone(),
                pos: 0,
                step,
            });
            assert_eq!(reader.next_jpeg().unwrap().unwrap(), sized.to_vec(), "step {}", step);
            assert_eq!(reader.next_jpeg().unwrap().unwrap(), marked.to_vec(), "step {}", step);
            assert_eq!(reader.next_jpeg().unwrap().unwrap(), sized.to_vec(), "step {}", step);
            assert!(reader.next_jpeg().unwrap().is_none(), "step {}", step);
        }
    }

    #[test]
    fn test_stall_reader_passes_data_through() {
        let body = part(&[0xFF, 0xD8, 1, 0xFF, 0xD9], false);
        let stall = StallReader::spawn(Cursor::new(body), Duration::from_secs(5)).unwrap();

        let mut reader = MjpegReader::new(stall);
        assert_eq!(reader.next_jpeg().unwrap().unwrap(), vec![0xFF, 0xD8, 1, 0xFF, 0xD9]);
        assert!(reader.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_stalled_stream_fails_as_camera_error() {
        // headers of a part, then silence
        let silent = Silent {
            data: Some(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8".to_vec()),
            hold: Duration::from_secs(30),
        };
        let stall = StallReader::spawn(silent, Duration::from_millis(100)).unwrap();
        let mut reader = MjpegReader::new(stall);

        let started = Instant::now();
        match reader.next_jpeg() {
            Err(VisionError::Camera(msg)) => assert!(msg.contains("stalled")),
            other => panic!("Expected Camera error, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_reader_handles_truncated_stream() {
        let body = vec![0xFF, 0xD8, 1, 2, 3];
        let mut reader = MjpegReader::new(Cursor::new(body));
        assert!(reader.next_jpeg().unwrap().is_none());
    }

    #[test]
    fn test_reader_frame_limit() {
        let mut body = vec![0xFF, 0xD8];
        body.extend(std::iter::repeat(0u8).take(64));
        let mut reader = MjpegReader::with_limit(Cursor::new(body), 16);
        assert!(matches!(reader.next_jpeg(), Err(VisionError::Camera(_))));
    }

    #[test]
    fn test_content_length_header() {
        assert_eq!(content_length(b"Content-Type: image/jpeg\r\ncontent-length: 42\r\n\r\n"), Some(42));
        assert_eq!(content_length(b"Content-Type: image/jpeg\r\n\r\n"), None);
    }

    #[test]
    fn test_http_camera_release_is_idempotent() {
        let mut camera = HttpMjpegCamera::new(
            "http://127.0.0.1:9/stream",
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(!camera.is_opened());
        camera.release();
        camera.release();
        assert!(!camera.is_opened());
    }

    #[test]
    fn test_camera_from_config_http() {
        let config = DetectorConfig::default();
        let mut camera = camera_from_config(&config).unwrap();
        assert!(!camera.is_opened());
        match camera.read_frame() {
            Err(VisionError::Camera(msg)) => assert!(msg.contains("not opened")),
            other => panic!("Expected Camera error, got {:?}", other.map(|f| f.dimensions())),
        }
        camera.release();
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_camera_from_config_opencv_unavailable() {
        let config = DetectorConfig {
            camera_backend: CameraBackend::OpenCv,
            ..DetectorConfig::default()
        };
        assert!(matches!(camera_from_config(&config), Err(VisionError::Config(_))));
    }

    #[test]
    fn test_http_camera_read_without_open() {
        let mut camera = HttpMjpegCamera::new(
            "http://127.0.0.1:9/stream",
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(matches!(camera.read_frame(), Err(VisionError::Camera(_))));
    }
}
