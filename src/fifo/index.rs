use crate::error::QueueError;

/// Size of the header at the start of every non-empty queue file.
pub const INDEX_SIZE: u32 = 16;

/// Size of the length prefix in front of each record.
pub const LENGTH_SIZE: u32 = 2;

/// Largest payload a single record can hold.
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// Queue header: where live data starts and ends, and how many records it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueIndex {
    pub start: u32,
    pub end: u32,
    pub count: u32,
}

impl QueueIndex {
    /// Header of a queue that holds nothing yet.
    pub fn empty() -> Self {
        Self {
            start: INDEX_SIZE,
            end: INDEX_SIZE,
            count: 0,
        }
    }

    pub fn checksum(&self) -> u32 {
        self.start ^ self.end ^ self.count
    }

    /// Bytes of live record data between `start` and `end`.
    pub fn span(&self) -> u32 {
        self.end - self.start
    }

    pub fn encode(&self) -> [u8; INDEX_SIZE as usize] {
        let mut buf = [0u8; INDEX_SIZE as usize];
        buf[0..4].copy_from_slice(&self.start.to_le_bytes());
        buf[4..8].copy_from_slice(&self.end.to_le_bytes());
        buf[8..12].copy_from_slice(&self.count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.checksum().to_le_bytes());
        buf
    }

    /// Decode and validate a header.
    pub fn decode(buf: &[u8; INDEX_SIZE as usize]) -> Result<Self, QueueError> {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let (start, end, count, checksum) = (word(0), word(4), word(8), word(12));

        let index = Self { start, end, count };
        if index.checksum() != checksum || start < INDEX_SIZE || start > end {
            return Err(QueueError::CorruptIndex {
                start,
                end,
                count,
                checksum,
            });
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_points_past_header() {
        let index = QueueIndex::empty();
        assert_eq!(index.start, 16);
        assert_eq!(index.end, 16);
        assert_eq!(index.count, 0);
        assert_eq!(index.span(), 0);
    }

    #[test]
    fn encode_is_little_endian_with_checksum() {
        let index = QueueIndex {
            start: 16,
            end: 0x0102,
            count: 3,
        };
        let buf = index.encode();
        assert_eq!(&buf[0..4], &[16, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[0x02, 0x01, 0, 0]);
        assert_eq!(&buf[8..12], &[3, 0, 0, 0]);
        assert_eq!(
            u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            16 ^ 0x0102 ^ 3
        );
        assert_eq!(QueueIndex::decode(&buf).unwrap(), index);
    }

    #[test]
    fn checksum_matches_known_header() {
        let index = QueueIndex {
            start: 4016,
            end: 10016,
            count: 60,
        };
        assert_eq!(index.checksum(), 10412);
    }

    #[test]
    fn every_flipped_checksum_bit_is_rejected() {
        let buf = QueueIndex {
            start: 116,
            end: 2016,
            count: 19,
        }
        .encode();

        for bit in 0..32 {
            let mut corrupt = buf;
            corrupt[12 + bit / 8] ^= 1 << (bit % 8);
            assert!(
                matches!(
                    QueueIndex::decode(&corrupt),
                    Err(QueueError::CorruptIndex { .. })
                ),
                "bit {bit} not detected"
            );
        }
    }

    #[test]
    fn start_past_end_is_rejected() {
        // Checksum is consistent but the pointers are not.
        let bogus = QueueIndex {
            start: 200,
            end: 100,
            count: 1,
        };
        assert!(matches!(
            QueueIndex::decode(&bogus.encode()),
            Err(QueueError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn all_zero_header_is_rejected() {
        assert!(matches!(
            QueueIndex::decode(&[0u8; 16]),
            Err(QueueError::CorruptIndex { .. })
        ));
    }
}
