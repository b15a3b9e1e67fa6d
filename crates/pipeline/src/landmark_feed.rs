//! JSON-lines landmark feed
//!
//! Replays eye landmarks produced by an external detector, one frame per line:
//!
//! ```text
//! {"t_ms": 1200, "faces": [{"eyes": [[[x, y], [x, y], [x, y], [x, y], [x, y], [x, y]]]}]}
//! ```
//!
//! [`open`] splits a feed into a frame source and a perception stage that
//! share the parsed landmarks. A malformed line becomes a frame whose
//! perception fails, and so does a line that is not valid UTF-8.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use camera_capture::{CameraError, FrameSource, VideoFrame};
use dms::{DmsError, FaceLandmarks, Perception, Point};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::Signal;

/// How often a waiting [`DetachedReader`] checks its stop signal
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct FeedLine {
    t_ms: u64,
    #[serde(default)]
    faces: Vec<FeedFace>,
}

#[derive(Debug, Deserialize)]
struct FeedFace {
    #[serde(default)]
    eyes: Vec<[[f32; 2]; 6]>,
}

impl From<FeedFace> for FaceLandmarks {
    fn from(face: FeedFace) -> Self {
        let eyes = face
            .eyes
            .into_iter()
            .map(|eye| eye.map(|[x, y]| Point::new(x, y)))
            .collect();
        FaceLandmarks::new(eyes)
    }
}

type Parsed = (u32, Result<Vec<FaceLandmarks>, String>);

/// Frames read from the feed
pub struct LandmarkFeedSource<R> {
    reader: R,
    slot: Arc<Mutex<Option<Parsed>>>,
    sequence: u32,
    last_t_ms: u64,
    line_no: usize,
}

/// Landmarks for the frame the source handed out last
pub struct FeedPerception {
    slot: Arc<Mutex<Option<Parsed>>>,
}

/// Split a feed into its frame source and matching perception
pub fn open<R: BufRead + Send>(reader: R) -> (LandmarkFeedSource<R>, FeedPerception) {
    let slot = Arc::new(Mutex::new(None));
    let source = LandmarkFeedSource {
        reader,
        slot: Arc::clone(&slot),
        sequence: 0,
        last_t_ms: 0,
        line_no: 0,
    };
    (source, FeedPerception { slot })
}

/// Open a feed file
pub fn open_path(
    path: impl AsRef<Path>,
) -> io::Result<(LandmarkFeedSource<BufReader<File>>, FeedPerception)> {
    let file = File::open(path.as_ref())?;
    info!("Reading landmark feed from {}", path.as_ref().display());
    Ok(open(BufReader::new(file)))
}

/// Reader over a stream pumped by a detached thread.
///
/// Reports end of input as soon as `stop` is raised, even while the
/// underlying stream (e.g. stdin) is blocked in a read. The pump thread is
/// left behind and ends with the process.
pub struct DetachedReader {
    chunks: Receiver<io::Result<Vec<u8>>>,
    stop: Signal,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl DetachedReader {
    pub fn spawn<R: Read + Send + 'static>(mut inner: R, stop: Signal) -> io::Result<Self> {
        let (tx, chunks) = mpsc::sync_channel(16);
        thread::Builder::new()
            .name("feed-reader".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; 8192];
                loop {
                    let chunk = match inner.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.send(chunk).is_err() || failed {
                        break;
                    }
                }
                debug!("Feed reader thread finished");
            })?;

        Ok(Self {
            chunks,
            stop,
            pending: Vec::new(),
            pos: 0,
            done: false,
        })
    }
}

impl Read for DetachedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for DetachedReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.pos >= self.pending.len() && !self.done {
            if self.stop.is_raised() {
                debug!("Feed reader stopped");
                self.done = true;
                break;
            }
            match self.chunks.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.done = true,
            }
        }
        Ok(&self.pending[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.pending.len());
    }
}

impl<R: BufRead + Send> FrameSource for LandmarkFeedSource<R> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, CameraError> {
        let mut bytes = Vec::new();
        loop {
            bytes.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut bytes)
                .map_err(|e| CameraError::Stream(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if !bytes.iter().all(u8::is_ascii_whitespace) {
                break;
            }
        }

        let entry = String::from_utf8(bytes)
            .map_err(|e| e.to_string())
            .and_then(|line| {
                serde_json::from_str::<FeedLine>(line.trim()).map_err(|e| e.to_string())
            });
        let parsed = match entry {
            Ok(entry) => {
                self.last_t_ms = entry.t_ms;
                Ok(entry.faces.into_iter().map(FaceLandmarks::from).collect())
            }
            Err(e) => {
                warn!("Malformed feed line {}: {}", self.line_no, e);
                Err(format!("malformed feed line {}: {}", self.line_no, e))
            }
        };

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((sequence, parsed));

        Ok(Some(VideoFrame::metadata_only(
            self.last_t_ms.saturating_mul(1_000_000),
            sequence,
        )))
    }

    fn close(&mut self) {
        info!("Landmark feed closed after {} lines", self.line_no);
    }
}

impl Perception for FeedPerception {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<FaceLandmarks>, DmsError> {
        let parsed = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match parsed {
            Some((sequence, result)) if sequence == frame.sequence => {
                result.map_err(DmsError::Perception)
            }
            _ => Err(DmsError::Perception(format!(
                "no landmarks for frame {}",
                frame.sequence
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const OPEN_EYE: &str = "[[0,0],[0.3,0.15],[0.7,0.15],[1,0],[0.7,-0.15],[0.3,-0.15]]";

    #[test]
    fn test_feed_yields_frames_and_landmarks() {
        let text = format!(
            "{{\"t_ms\": 0, \"faces\": [{{\"eyes\": [{OPEN_EYE}, {OPEN_EYE}]}}]}}\n\n\
             {{\"t_ms\": 33, \"faces\": []}}\n"
        );
        let (mut source, mut perception) = open(Cursor::new(text));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        let faces = perception.detect(&first).unwrap();
        assert_eq!(faces.len(), 1);
        assert!((faces[0].openness() - 0.3).abs() < 1e-5);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.timestamp_ns, 33_000_000);
        assert!(perception.detect(&second).unwrap().is_empty());

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_fails_perception_only() {
        let text = "{\"t_ms\": 100, \"faces\": []}\nnot json\n{\"t_ms\": 200}\n";
        let (mut source, mut perception) = open(Cursor::new(text));

        source.next_frame().unwrap();
        let bad = source.next_frame().unwrap().unwrap();
        assert_eq!(bad.timestamp_ns, 100_000_000);
        assert!(matches!(perception.detect(&bad), Err(DmsError::Perception(_))));

        let next = source.next_frame().unwrap().unwrap();
        assert!(perception.detect(&next).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_utf8_line_fails_perception_only() {
        let mut text = b"{\"t_ms\": 100, \"faces\": []}\n".to_vec();
        text.extend_from_slice(&[0xff, 0xfe, b'\n']);
        text.extend_from_slice(b"{\"t_ms\": 200, \"faces\": []}\n");
        let (mut source, mut perception) = open(Cursor::new(text));

        let first = source.next_frame().unwrap().unwrap();
        assert!(perception.detect(&first).unwrap().is_empty());

        let bad = source.next_frame().unwrap().unwrap();
        assert_eq!(bad.sequence, 1);
        match perception.detect(&bad) {
            Err(DmsError::Perception(reason)) => assert!(reason.contains("line 2")),
            other => panic!("expected perception failure, got {other:?}"),
        }

        let next = source.next_frame().unwrap().unwrap();
        assert_eq!(next.timestamp_ns, 200_000_000);
        assert!(perception.detect(&next).unwrap().is_empty());
        assert!(source.next_frame().unwrap().is_none());
    }

    /// Never produces data while the sender is alive
    struct Silent(std::sync::mpsc::Receiver<()>);

    impl Read for Silent {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_detached_reader_passes_lines_through() {
        let text = "{\"t_ms\": 10}\n{\"t_ms\": 20}\n";
        let reader = DetachedReader::spawn(Cursor::new(text), Signal::new()).unwrap();
        let (mut source, _) = open(reader);

        assert_eq!(source.next_frame().unwrap().unwrap().timestamp_ns, 10_000_000);
        assert_eq!(source.next_frame().unwrap().unwrap().timestamp_ns, 20_000_000);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_detached_reader_ends_on_stop_while_input_blocked() {
        let (_keep_open, rx) = std::sync::mpsc::channel();
        let stop = Signal::new();
        let reader = DetachedReader::spawn(Silent(rx), stop.clone()).unwrap();
        let (mut source, _) = open(reader);

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.raise();
        });
        let started = std::time::Instant::now();
        assert!(source.next_frame().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        stopper.join().unwrap();
    }

    #[test]
    fn test_face_without_eyes_parses() {
        let (mut source, mut perception) = open(Cursor::new("{\"t_ms\": 5, \"faces\": [{}]}"));
        let frame = source.next_frame().unwrap().unwrap();
        let faces = perception.detect(&frame).unwrap();
        assert_eq!(faces[0].openness(), 0.0);
    }
}
