//! Landmark sources
//!
//! The detector runs outside this crate; a [`LandmarkSource`] hands its
//! per-frame output to the tracking runtime.

use crate::capture::landmarks::LandmarkFrame;
use crate::error::{GazeError, GazeResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

/// Producer of landmark frames
#[async_trait]
pub trait LandmarkSource: Send {
    /// Next frame, or `None` once the stream has ended
    async fn next_frame(&mut self) -> GazeResult<Option<LandmarkFrame>>;

    fn name(&self) -> &str;
}

/// Recorded frames, one JSON object per line
pub struct JsonLinesSource<R> {
    name: String,
    lines: Lines<BufReader<R>>,
    line_no: usize,
}

impl JsonLinesSource<tokio::fs::File> {
    pub async fn open(path: &Path) -> GazeResult<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(path.display().to_string(), file))
    }
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> LandmarkSource for JsonLinesSource<R> {
    async fn next_frame(&mut self) -> GazeResult<Option<LandmarkFrame>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame = serde_json::from_str(line).map_err(|e| {
                GazeError::Source(format!("{} line {}: {}", self.name, self.line_no, e))
            })?;
            return Ok(Some(frame));
        }
        Ok(None)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory frames, optionally released at a fixed interval
pub struct ScriptedSource {
    frames: VecDeque<LandmarkFrame>,
    interval: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = LandmarkFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl LandmarkSource for ScriptedSource {
    async fn next_frame(&mut self) -> GazeResult<Option<LandmarkFrame>> {
        if let Some(interval) = self.interval {
            tokio::time::sleep(interval).await;
        }
        Ok(self.frames.pop_front())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Read every frame of a JSON-lines file
pub async fn read_frames(path: &Path) -> GazeResult<Vec<LandmarkFrame>> {
    let mut source = JsonLinesSource::open(path).await?;
    let mut frames = Vec::new();
    while let Some(frame) = source.next_frame().await? {
        frames.push(frame);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::landmarks::fixtures;

    #[tokio::test]
    async fn test_json_lines_source_skips_blank_lines() {
        let a = serde_json::to_string(&fixtures::open_frame(1, 0.0, (0.5, 0.5))).unwrap();
        let b = serde_json::to_string(&fixtures::frame(2, 33.0, None)).unwrap();
        let input = format!("{}\n\n{}\n", a, b);

        let mut source = JsonLinesSource::new("memory", input.as_bytes());
        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.seq, 1);
        assert!(first.face.is_some());
        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(second.seq, 2);
        assert!(second.face.is_none());
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_lines_source_reports_bad_line() {
        let mut source = JsonLinesSource::new("memory", "{\"seq\": }\n".as_bytes());
        let err = source.next_frame().await.unwrap_err();
        assert!(matches!(err, GazeError::Source(msg) if msg.contains("line 1")));
    }

    #[tokio::test]
    async fn test_scripted_source_drains_in_order() {
        let frames = (0..3).map(|i| fixtures::frame(i, i as f64 * 33.0, None));
        let mut source = ScriptedSource::new(frames);
        for expected in 0..3 {
            assert_eq!(source.next_frame().await.unwrap().unwrap().seq, expected);
        }
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frames_from_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let frame = fixtures::open_frame(7, 10.0, (0.4, 0.6));
        std::fs::write(tmp.path(), serde_json::to_string(&frame).unwrap() + "\n").unwrap();

        let frames = read_frames(tmp.path()).await.unwrap();
        assert_eq!(frames, vec![frame]);
    }
}
