//! Tagged log reader
//!
//! Walks a tlog record by record. Frame length comes from the MAVLink
//! header, so no index or separator is needed.

use bytes::Bytes;
use std::fs;
use std::path::Path;

use super::writer::TAG_HEADER_LEN;
use crate::error::{ProxyError, Result};
use crate::mavlink::protocol::*;

/// One record read back from a tagged log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlogRecord {
    /// Microseconds since the epoch, low two bits cleared
    pub timestamp_us: u64,
    /// Link index the frame arrived on
    pub link: usize,
    /// Frame bytes exactly as received
    pub frame: Bytes,
}

/// Iterator over the records of a tagged log
#[derive(Debug)]
pub struct TlogReader {
    data: Bytes,
    pos: usize,
}

impl TlogReader {
    /// Read a whole tlog file into memory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    fn frame_len(&self, at: usize) -> Result<usize> {
        let rest = &self.data[at..];
        let (header_len, signed) = match rest.first() {
            Some(&MAVLINK_V1_STX) => (MAVLINK_V1_HEADER_LEN, false),
            Some(&MAVLINK_V2_STX) => {
                let flags = rest.get(2).copied().unwrap_or(0);
                (MAVLINK_V2_HEADER_LEN, flags & MAVLINK_IFLAG_SIGNED != 0)
            }
            Some(other) => {
                return Err(ProxyError::Protocol(format!(
                    "tlog record at offset {} starts with 0x{:02X}",
                    at, other
                )))
            }
            None => return Err(ProxyError::Protocol("tlog ends after a header".to_string())),
        };
        let payload_len = *rest
            .get(1)
            .ok_or_else(|| ProxyError::Protocol("tlog frame truncated".to_string()))?
            as usize;
        let mut len = header_len + payload_len + MAVLINK_CHECKSUM_LEN;
        if signed {
            len += MAVLINK_SIGNATURE_LEN;
        }
        Ok(len)
    }
}

impl Iterator for TlogReader {
    type Item = Result<TlogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        if self.data.len() - self.pos < TAG_HEADER_LEN {
            self.pos = self.data.len();
            return Some(Err(ProxyError::Protocol("tlog ends inside a header".to_string())));
        }

        let mut header = [0u8; TAG_HEADER_LEN];
        header.copy_from_slice(&self.data[self.pos..self.pos + TAG_HEADER_LEN]);
        let tag = u64::from_be_bytes(header);
        let frame_at = self.pos + TAG_HEADER_LEN;

        let len = match self.frame_len(frame_at) {
            Ok(len) => len,
            Err(e) => {
                self.pos = self.data.len();
                return Some(Err(e));
            }
        };
        if frame_at + len > self.data.len() {
            self.pos = self.data.len();
            return Some(Err(ProxyError::Protocol("tlog frame truncated".to_string())));
        }

        self.pos = frame_at + len;
        Some(Ok(TlogRecord {
            timestamp_us: tag & !3,
            link: (tag & 3) as usize,
            frame: self.data.slice(frame_at..frame_at + len),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::encoder::{encode_frame, FrameHeader};
    use crate::telemetry::session::LogPaths;
    use crate::telemetry::writer::{LogWriter, TaggedRecord};
    use crate::mavlink::MavVersion;
    use tempfile::TempDir;

    fn frame(version: MavVersion, seq: u8, id: u32, payload: &[u8]) -> Bytes {
        let header = FrameHeader {
            version,
            seq,
            system_id: 1,
            component_id: 1,
        };
        encode_frame(header, id, payload).unwrap()
    }

    #[test]
    fn test_round_trip_reproduces_exact_bytes() {
        let tmp = TempDir::new().unwrap();
        let paths = LogPaths {
            dir: tmp.path().to_path_buf(),
            tlog: tmp.path().join("t.tlog"),
            raw: tmp.path().join("t.tlog.raw"),
        };

        let frames = vec![
            (0usize, frame(MavVersion::V1, 0, MSG_ID_HEARTBEAT, &[0, 0, 0, 0, 2, 3, 0, 4, 3])),
            (1, frame(MavVersion::V2, 1, MSG_ID_VFR_HUD, &[7u8; 20])),
            // Unknown message id, forwarded and logged untouched
            (2, Bytes::from_static(&[0xFD, 0x02, 0x00, 0x00, 0x05, 0x01, 0x01, 0xEF, 0xCD, 0xAB, 0xAA, 0xBB, 0x12, 0x34])),
        ];

        let writer = LogWriter::start(&paths, false).unwrap();
        let handle = writer.handle();
        for (i, (link, bytes)) in frames.iter().enumerate() {
            handle.log_frame(*link, 1_700_000_000_000_000 + i as u64 * 1000, bytes.clone());
        }
        writer.close();

        let records: Vec<_> = TlogReader::open(&paths.tlog)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), frames.len());
        for (record, (link, bytes)) in records.iter().zip(&frames) {
            assert_eq!(record.link, *link);
            assert_eq!(&record.frame, bytes);
        }
        assert_eq!(records[1].timestamp_us, 1_700_000_000_001_000);
    }

    #[test]
    fn test_signed_v2_frame_length() {
        let mut raw = frame(MavVersion::V2, 0, MSG_ID_HEARTBEAT, &[1u8; 9]).to_vec();
        raw[2] |= MAVLINK_IFLAG_SIGNED;
        raw.extend_from_slice(&[0u8; MAVLINK_SIGNATURE_LEN]);
        let record = TaggedRecord {
            timestamp_us: 4,
            link: 0,
            frame: Bytes::from(raw.clone()),
        };

        let mut reader = TlogReader::from_bytes(record.to_bytes());
        assert_eq!(reader.next().unwrap().unwrap().frame.as_ref(), raw.as_slice());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_log_reports_error() {
        let record = TaggedRecord {
            timestamp_us: 4,
            link: 0,
            frame: frame(MavVersion::V1, 0, MSG_ID_HEARTBEAT, &[0u8; 9]),
        };
        let mut bytes = record.to_bytes();
        bytes.truncate(bytes.len() - 3);

        let mut reader = TlogReader::from_bytes(bytes);
        assert!(matches!(reader.next(), Some(Err(ProxyError::Protocol(_)))));
        assert!(reader.next().is_none());
    }
}
