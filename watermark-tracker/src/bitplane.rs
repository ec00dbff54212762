//! Bit arithmetic over the circular bitplane backing a [WatermarkTracker](crate::WatermarkTracker).
//!
//! The plane is a ring of bytes. The cursor `(byte, bit)` is the physical position of the bit for
//! the first offset the watermark is still waiting on, and bit `k` counted forward from the cursor
//! (wrapping around the ring) is the offset `watermark + 1 + k`. Two invariants make the forward
//! scan terminate without a bound check:
//! - the byte right behind the cursor byte (the sentinel) is always zero,
//! - the bits of the cursor byte below the cursor bit are always zero.
//!
//! Offsets are therefore never written into the sentinel byte, which is why the usable window of a
//! ring of `len` bytes is `(len - 1) * 8 - cursor_bit` bits rather than `len * 8`.

const BYTE_BITS: usize = 8;
const FULL: u8 = 0xFF;

/// Bytes needed for a window of `capacity` offsets, sentinel included.
pub(crate) fn byte_len(capacity: usize) -> usize {
    capacity.div_ceil(BYTE_BITS) + 1
}

/// Number of offsets that can be recorded ahead of a cursor sitting at `cursor_bit`.
pub(crate) fn window(len: usize, cursor_bit: usize) -> usize {
    (len - 1) * BYTE_BITS - cursor_bit
}

/// Index of the sentinel byte for a cursor at `cursor_byte`.
pub(crate) fn sentinel(len: usize, cursor_byte: usize) -> usize {
    (cursor_byte + len - 1) % len
}

/// Mask of the bits strictly below `bit`.
fn low_mask(bit: usize) -> u8 {
    ((1u16 << bit) - 1) as u8
}

/// Lowest zero bit of `byte`, `None` for a full byte.
pub(crate) fn first_zero_bit(byte: u8) -> Option<usize> {
    match byte {
        FULL => None,
        _ => Some((!byte).trailing_zeros() as usize),
    }
}

/// Physical `(byte, bit)` of the bit `index` positions ahead of the cursor.
pub(crate) fn locate(
    len: usize,
    cursor_byte: usize,
    cursor_bit: usize,
    index: usize,
) -> (usize, usize) {
    let absolute = cursor_bit + index;
    (
        (cursor_byte + absolute / BYTE_BITS) % len,
        absolute % BYTE_BITS,
    )
}

/// Sets the bit `index` positions ahead of the cursor. Setting a set bit is a no-op.
pub(crate) fn set_bit(plane: &mut [u8], cursor_byte: usize, cursor_bit: usize, index: usize) {
    let (byte, bit) = locate(plane.len(), cursor_byte, cursor_bit, index);
    if let Some(value) = plane.get_mut(byte) {
        *value |= 1 << bit;
    }
}

/// Finds the first byte, walking the ring from `start_byte`, that still has a zero bit. Bits below
/// `start_bit` in the first byte are consumed and count as set. Returns `None` only when every
/// byte is full, which the sentinel rules out.
pub(crate) fn next_non_full_byte(plane: &[u8], start_byte: usize, start_bit: usize) -> Option<usize> {
    let len = plane.len();
    if plane.get(start_byte)? | low_mask(start_bit) != FULL {
        return Some(start_byte);
    }
    (1..len)
        .map(|step| (start_byte + step) % len)
        .find(|&idx| plane.get(idx).is_some_and(|&value| value != FULL))
}

/// The contiguous run of set bits starting at the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    /// Number of set bits in the run, i.e. how far the watermark may advance.
    pub(crate) distance: usize,
    /// Physical position of the first zero bit after the run.
    pub(crate) byte: usize,
    pub(crate) bit: usize,
}

/// Measures the run of set bits starting at the cursor without touching the plane.
pub(crate) fn scan(plane: &[u8], cursor_byte: usize, cursor_bit: usize) -> Option<Run> {
    let len = plane.len();
    let byte = next_non_full_byte(plane, cursor_byte, cursor_bit)?;
    let consumed = if byte == cursor_byte {
        low_mask(cursor_bit)
    } else {
        0
    };
    let value = plane.get(byte)? | consumed;
    let bit = first_zero_bit(value)?;

    // a byte index behind the start means the run wrapped around the ring once
    let bytes_ahead = if byte < cursor_byte {
        byte + len - cursor_byte
    } else {
        byte - cursor_byte
    };

    Some(Run {
        distance: bytes_ahead * BYTE_BITS + bit - cursor_bit,
        byte,
        bit,
    })
}

/// Zeroes `count` bits starting at the cursor, wrapping around the ring.
pub(crate) fn clear_run(plane: &mut [u8], cursor_byte: usize, cursor_bit: usize, count: usize) {
    let len = plane.len();
    let (mut byte, mut bit, mut remaining) = (cursor_byte, cursor_bit, count);
    while remaining > 0 {
        let span = (BYTE_BITS - bit).min(remaining);
        let mask = (((1u16 << span) - 1) << bit) as u8;
        if let Some(value) = plane.get_mut(byte) {
            *value &= !mask;
        }
        remaining -= span;
        bit = 0;
        byte = (byte + 1) % len;
    }
}

/// Length of the ring after growing a `len`-byte ring so that `needed` offsets fit ahead of a cursor
/// at `cursor_bit`. Always a power-of-two multiple of `len`.
pub(crate) fn grown_len(len: usize, cursor_bit: usize, needed: usize) -> usize {
    let required = byte_len(needed + cursor_bit);
    let factor = required.div_ceil(len).next_power_of_two().max(2);
    len * factor
}

/// Returns a larger ring holding the same live bits, rotated so that the cursor byte lands at index
/// 0. The cursor bit keeps its position within the byte.
pub(crate) fn grow(plane: &[u8], cursor_byte: usize, cursor_bit: usize, needed: usize) -> Vec<u8> {
    let new_len = grown_len(plane.len(), cursor_bit, needed);
    let mut grown = Vec::with_capacity(new_len);

    let (behind, ahead) = plane.split_at(cursor_byte);
    grown.extend_from_slice(ahead);
    grown.extend_from_slice(behind);
    // the new tail, sentinel included, starts out zeroed
    grown.resize(new_len, 0);

    // consumed bits of the cursor byte never carry over
    if let Some(first) = grown.first_mut() {
        *first &= !low_mask(cursor_bit);
    }
    grown
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len_and_window() {
        assert_eq!(byte_len(2), 2);
        assert_eq!(byte_len(8), 2);
        assert_eq!(byte_len(9), 3);
        assert_eq!(byte_len(1024), 129);

        assert_eq!(window(2, 0), 8);
        assert_eq!(window(2, 7), 1);
        assert_eq!(window(4, 4), 20);
    }

    #[test]
    fn test_sentinel_wraps() {
        assert_eq!(sentinel(4, 0), 3);
        assert_eq!(sentinel(4, 1), 0);
        assert_eq!(sentinel(4, 3), 2);
    }

    #[test]
    fn test_first_zero_bit() {
        let cases = [
            (0xFF, None),    // 1111 1111
            (0xF1, Some(1)), // 1111 0001
            (0x06, Some(0)), // 0000 0110
            (0x07, Some(3)), // 0000 0111
            (0xE7, Some(3)), // 1110 0111
            (0x7F, Some(7)), // 0111 1111
        ];
        for (byte, expected) in cases {
            assert_eq!(first_zero_bit(byte), expected, "byte {byte:#04x}");
        }
    }

    #[test]
    fn test_locate_and_set_bit() {
        let mut plane = vec![0, 0xF5, 0xD1, 0xF6];
        set_bit(&mut plane, 1, 0, 10);
        assert_eq!(plane, vec![0, 0xF5, 0xD5, 0xF6]);

        // wraps past the last byte
        assert_eq!(locate(4, 3, 7, 2), (0, 1));
        let mut plane = vec![0, 0, 0, 0x80];
        set_bit(&mut plane, 3, 7, 2);
        assert_eq!(plane, vec![0x02, 0, 0, 0x80]);

        // idempotent
        set_bit(&mut plane, 3, 7, 2);
        assert_eq!(plane, vec![0x02, 0, 0, 0x80]);
    }

    #[test]
    fn test_next_non_full_byte() {
        let cases: Vec<(Vec<u8>, usize, usize, Option<usize>)> = vec![
            (vec![0xFF, 0xF4, 0], 0, 0, Some(1)),
            (vec![0xFF, 0xFF, 0xF4, 0xFF, 0xFE, 0], 3, 0, Some(4)),
            (vec![0xFE, 0xFF, 0], 0, 0, Some(0)),
            (vec![0xFF, 0xFF, 0], 0, 0, Some(2)),
            (vec![0, 0xFF, 0xFF], 1, 0, Some(0)),
            // bits below the start bit count as consumed
            (vec![0, 0xF0, 0xFF], 1, 4, Some(0)),
            (vec![0, 0xF0, 0xFF], 1, 0, Some(1)),
            (vec![0xFF, 0xFF], 0, 0, None),
        ];
        for (plane, start_byte, start_bit, expected) in cases {
            assert_eq!(
                next_non_full_byte(&plane, start_byte, start_bit),
                expected,
                "plane {plane:02x?} from ({start_byte}, {start_bit})"
            );
        }
    }

    #[test]
    fn test_scan() {
        let cases: Vec<(Vec<u8>, usize, usize, Option<Run>)> = vec![
            // - - - - 1 1 1 1 | - | -
            (vec![0x0F, 0, 0], 0, 0, Some(Run { distance: 4, byte: 0, bit: 4 })),
            (vec![0x0E, 0, 0], 0, 1, Some(Run { distance: 3, byte: 0, bit: 4 })),
            // run crosses into the next byte
            (vec![0xFC, 0x1F, 0], 0, 2, Some(Run { distance: 11, byte: 1, bit: 5 })),
            (vec![0, 0xF0, 0x05], 1, 4, Some(Run { distance: 5, byte: 2, bit: 1 })),
            // run ends on a byte boundary, terminated by the sentinel
            (vec![0, 0xF0, 0], 1, 4, Some(Run { distance: 4, byte: 2, bit: 0 })),
            // run wraps around the end of the ring
            (vec![0x0F, 0, 0xFF], 2, 0, Some(Run { distance: 12, byte: 0, bit: 4 })),
            (
                vec![0xFF, 0xFF, 0xFF, 0x3F, 0],
                0,
                0,
                Some(Run { distance: 30, byte: 3, bit: 6 }),
            ),
            // nothing to advance over
            (vec![0x10, 0, 0], 0, 0, Some(Run { distance: 0, byte: 0, bit: 0 })),
            (vec![0xE0, 0, 0], 0, 4, Some(Run { distance: 0, byte: 0, bit: 4 })),
            // broken sentinel
            (vec![0xFF, 0xFF], 0, 0, None),
        ];
        for (plane, cursor_byte, cursor_bit, expected) in cases {
            assert_eq!(
                scan(&plane, cursor_byte, cursor_bit),
                expected,
                "plane {plane:02x?} from ({cursor_byte}, {cursor_bit})"
            );
        }
    }

    #[test]
    fn test_clear_run() {
        let mut plane = vec![0xFF, 0xFF, 0x0F];
        clear_run(&mut plane, 0, 4, 12);
        assert_eq!(plane, vec![0x0F, 0x00, 0x0F]);

        let mut plane = vec![0x0F, 0, 0xFF];
        clear_run(&mut plane, 2, 0, 12);
        assert_eq!(plane, vec![0, 0, 0]);

        let mut plane = vec![0xFF, 0xFF];
        clear_run(&mut plane, 0, 3, 2);
        assert_eq!(plane, vec![0xE7, 0xFF]);

        let mut plane = vec![0xFF];
        clear_run(&mut plane, 0, 0, 0);
        assert_eq!(plane, vec![0xFF]);
    }

    #[test]
    fn test_scan_then_clear_keeps_sentinel_zero() {
        let mut plane = vec![0xF0, 0xFF, 0x01, 0];
        let run = scan(&plane, 0, 4).unwrap();
        assert_eq!(run, Run { distance: 13, byte: 2, bit: 1 });

        clear_run(&mut plane, 0, 4, run.distance);
        assert_eq!(plane, vec![0, 0, 0, 0]);
        assert_eq!(plane[sentinel(plane.len(), run.byte)], 0);
    }

    #[test]
    fn test_grown_len_is_power_of_two_multiple() {
        // 20 offsets ahead of bit 4 need 4 bytes, so 3 bytes double to 6
        assert_eq!(grown_len(3, 4, 20), 6);
        // 40 offsets ahead of bit 4 need 7 bytes, so 3 bytes quadruple to 12
        assert_eq!(grown_len(3, 4, 40), 12);
        // growth always at least doubles
        assert_eq!(grown_len(129, 0, 1025), 258);
        assert_eq!(grown_len(2, 0, 1_000_000), 2 * 65536);
        assert!(window(grown_len(2, 0, 1_000_000), 0) >= 1_000_000);
    }

    #[test]
    fn test_grow_rotates_cursor_to_front() {
        let plane = vec![0, 0xA0, 0x03];
        let grown = grow(&plane, 1, 4, 20);
        assert_eq!(grown, vec![0xA0, 0x03, 0, 0, 0, 0]);
        assert!(window(grown.len(), 4) >= 20);
    }

    #[test]
    fn test_grow_keeps_wrapped_bits() {
        let plane = vec![0x03, 0, 0x30];
        let grown = grow(&plane, 2, 4, 40);
        let mut expected = vec![0u8; 12];
        expected[0] = 0x30;
        expected[1] = 0x03;
        assert_eq!(grown, expected);

        // the same run is visible from the new cursor
        assert_eq!(scan(&plane, 2, 4), scan(&grown, 0, 4).map(|r| Run { byte: 2, ..r }));
    }

    #[test]
    fn test_grow_masks_consumed_bits() {
        let plane = vec![0x1F, 0];
        let grown = grow(&plane, 0, 3, 10);
        assert_eq!(grown, vec![0x18, 0, 0, 0]);
    }
}
