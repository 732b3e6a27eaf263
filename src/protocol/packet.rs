use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Wire packet header (zero-copy).
///
/// Layout:
/// - length: 3 bytes (little-endian payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    /// Encode `length`/`sequence_id` into an already-reserved header slot.
    pub fn encode_in_place(&mut self, length: usize, sequence_id: u8) {
        let raw = (length as u32).to_le_bytes();
        self.length = [raw[0], raw[1], raw[2]];
        self.sequence_id = sequence_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn header_round_trips_through_its_slot() {
        let mut header = PacketHeader::new_zeroed();
        header.encode_in_place(0xFF_FFFF, 3);
        assert_eq!(header.length(), 0xFF_FFFF);
        assert_eq!(header.sequence_id, 3);
        assert_eq!(header.as_bytes(), &[0xFF, 0xFF, 0xFF, 3]);
    }
}
