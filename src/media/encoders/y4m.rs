// SPDX-License-Identifier: MPL-2.0

//! YUV4MPEG2 writer for raw I420 streams
//!
//! Writes `.y4m` files, or streams the same byte format over a TCP
//! connection for `tcp://host:port` destinations.

use super::{Codec, OutputSummary, OutputTarget, OutputWriter, Packet, SpanTracker, StreamInfo, WriterFactory};
use crate::errors::PipelineError;
use crate::media::timebase::Rational;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::TcpStream;
use tracing::{debug, info, warn};

/// Per-frame marker preceding each frame's planes
const FRAME_MARKER: &[u8] = b"FRAME\n";

#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mWriterFactory;

impl WriterFactory for Y4mWriterFactory {
    fn open(
        &self,
        target: &OutputTarget,
        stream: &StreamInfo,
    ) -> Result<Box<dyn OutputWriter>, PipelineError> {
        if stream.codec != Codec::RawI420 {
            return Err(PipelineError::EncoderOrMuxFailure(format!(
                "Y4M cannot carry {:?}",
                stream.codec
            )));
        }

        let sink: Box<dyn Write + Send> = match target {
            OutputTarget::File(path) => {
                let file = File::create(path).map_err(|e| {
                    PipelineError::EncoderOrMuxFailure(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Box::new(file)
            }
            OutputTarget::Network(url) => {
                let address = url.strip_prefix("tcp://").ok_or_else(|| {
                    PipelineError::EncoderOrMuxFailure(format!(
                        "Unsupported destination '{}' (software streaming needs tcp://host:port)",
                        url
                    ))
                })?;
                let socket = TcpStream::connect(address).map_err(|e| {
                    PipelineError::EncoderOrMuxFailure(format!("Failed to connect to {}: {}", url, e))
                })?;
                if let Err(e) = socket.set_nodelay(true) {
                    warn!(error = %e, "Failed to disable Nagle on stream socket");
                }
                Box::new(socket)
            }
        };

        info!(target = %target, width = stream.width, height = stream.height, "Opened Y4M output");

        Ok(Box::new(Y4mWriter {
            sink: Some(BufWriter::new(sink)),
            stream: stream.clone(),
            span: SpanTracker::default(),
            bytes_written: 0,
            last_pts: None,
        }))
    }
}

pub struct Y4mWriter {
    sink: Option<BufWriter<Box<dyn Write + Send>>>,
    stream: StreamInfo,
    span: SpanTracker,
    bytes_written: u64,
    last_pts: Option<i64>,
}

impl Y4mWriter {
    /// Stream header line
    pub fn header(stream: &StreamInfo) -> String {
        format!(
            "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C420jpeg\n",
            stream.width, stream.height, stream.fps_num, stream.fps_den
        )
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            PipelineError::EncoderOrMuxFailure("write after trailer".to_string())
        })?;
        sink.write_all(bytes)
            .map_err(|e| PipelineError::EncoderOrMuxFailure(format!("Write failed: {}", e)))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl OutputWriter for Y4mWriter {
    fn time_base(&self) -> Rational {
        Rational::MPEG
    }

    fn write_header(&mut self) -> Result<(), PipelineError> {
        let header = Self::header(&self.stream);
        self.write_all(header.as_bytes())
    }

    fn write_packet(&mut self, packet: Packet) -> Result<(), PipelineError> {
        let expected = self.stream.width as usize * self.stream.height as usize * 3 / 2;
        if packet.data.len() != expected {
            return Err(PipelineError::EncoderOrMuxFailure(format!(
                "packet of {} bytes, frame needs {}",
                packet.data.len(),
                expected
            )));
        }
        if let Some(last) = self.last_pts
            && packet.pts <= last
        {
            debug!(pts = packet.pts, last, "Non-increasing pts in raw stream");
        }
        self.last_pts = Some(packet.pts);

        self.span.record(&packet);
        self.write_all(FRAME_MARKER)?;
        self.write_all(&packet.data)
    }

    fn write_trailer(&mut self) -> Result<OutputSummary, PipelineError> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush()
                .map_err(|e| PipelineError::EncoderOrMuxFailure(format!("Flush failed: {}", e)))?;
        }
        Ok(self.span.summary(Rational::MPEG, self.bytes_written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn stream() -> StreamInfo {
        StreamInfo {
            codec: Codec::RawI420,
            width: 8,
            height: 4,
            fps_num: 30,
            fps_den: 1,
            time_base: Rational::frame_period(30, 1),
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("y4m-{}.y4m", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_layout() {
        let path = temp_path();
        let mut writer = Y4mWriterFactory
            .open(&OutputTarget::File(path.clone()), &stream())
            .unwrap();
        writer.write_header().unwrap();
        for k in 0..3 {
            writer
                .write_packet(Packet {
                    data: vec![k as u8; 48],
                    pts: k * 3000,
                    dts: k * 3000,
                    duration: 3000,
                    keyframe: true,
                    time_base: Rational::MPEG,
                })
                .unwrap();
        }
        let summary = writer.write_trailer().unwrap();

        let header = Y4mWriter::header(&stream());
        let contents = std::fs::read(&path).unwrap();
        assert!(contents.starts_with(header.as_bytes()));
        assert_eq!(contents.len(), header.len() + 3 * (FRAME_MARKER.len() + 48));
        assert_eq!(summary.bytes, contents.len() as u64);
        assert_eq!(summary.duration, std::time::Duration::from_millis(100));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_compressed_stream() {
        let mut info = stream();
        info.codec = Codec::H264;
        assert!(Y4mWriterFactory
            .open(&OutputTarget::File(temp_path()), &info)
            .is_err());
    }

    #[test]
    fn test_rejects_rtsp_destination() {
        let target = OutputTarget::Network("rtsp://127.0.0.1:8554/live".to_string());
        assert!(Y4mWriterFactory.open(&target, &stream()).is_err());
    }
}
