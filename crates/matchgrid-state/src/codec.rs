//! Encoding of stored values.
//!
//! Records are protobuf-encoded [`BackfillRecord`] messages. Generations in
//! the active index are stored as 8-byte big-endian `i64`s.

use matchgrid_core::{Backfill, BackfillRecord, TicketId};
use prost::Message;

/// Size of an encoded generation.
pub const GENERATION_LEN: usize = 8;

/// Encode a backfill and its tickets into the stored record format.
pub fn encode_record(backfill: &Backfill, ticket_ids: &[TicketId]) -> Vec<u8> {
    BackfillRecord::new(backfill.clone(), ticket_ids.to_vec()).encode_to_vec()
}

/// Decode a stored record. Unknown fields are skipped.
pub fn decode_record(bytes: &[u8]) -> Result<BackfillRecord, prost::DecodeError> {
    BackfillRecord::decode(bytes)
}

pub fn encode_generation(generation: i64) -> [u8; GENERATION_LEN] {
    generation.to_be_bytes()
}

/// Decode a stored generation. Returns `None` if the value is not exactly
/// [`GENERATION_LEN`] bytes.
pub fn decode_generation(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; GENERATION_LEN] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchgrid_core::{Any, SearchFields, Timestamp};

    #[test]
    fn record_preserves_payload_and_ticket_order() {
        let mut backfill = Backfill::new("bf-1", 7)
            .with_extension("profile", Any::new("type.example/Profile", vec![1, 2, 3]));
        backfill.search_fields = Some(SearchFields {
            tags: vec!["ranked".into()],
            ..Default::default()
        });
        backfill.create_time = Some(Timestamp { seconds: 10, nanos: 5 });
        let tickets = vec!["t3".to_string(), "t1".to_string(), "t2".to_string()];

        let decoded = decode_record(&encode_record(&backfill, &tickets)).unwrap();
        assert_eq!(decoded.backfill, Some(backfill));
        assert_eq!(decoded.ticket_ids, tickets);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut bytes = encode_record(&Backfill::new("bf-1", 1), &[]);
        // Field 15, wire type 0 (varint), value 1.
        bytes.extend_from_slice(&[0x78, 0x01]);

        let decoded = decode_record(&bytes).unwrap();
        assert_eq!(decoded.backfill.unwrap().id, "bf-1");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_record(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn generation_encoding() {
        for generation in [0, 1, -1, i64::MAX, i64::MIN] {
            assert_eq!(decode_generation(&encode_generation(generation)), Some(generation));
        }
        assert_eq!(decode_generation(b"12"), None);
        assert_eq!(decode_generation(&[]), None);
    }
}
