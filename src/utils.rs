//! Utility functions.

/// Aligns an offset or size up to the next multiple of `align`.
/// `align` must be a power of two.
pub fn align_up(offset: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Pads `buffer` with zero bytes until its length is a multiple of `align`.
pub fn pad_to(buffer: &mut Vec<u8>, align: u64) {
    let len = align_up(buffer.len() as u64, align);
    buffer.resize(len as usize, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(17, 16), 32);
    }

    #[test]
    fn pad_to_appends_zeros() {
        let mut buffer = vec![1, 2, 3];
        pad_to(&mut buffer, 4);
        assert_eq!(buffer, vec![1, 2, 3, 0]);
        pad_to(&mut buffer, 4);
        assert_eq!(buffer.len(), 4);
    }
}
