use crate::instructions::instructions::WordType;

// Pure combinational primitives. Subtraction is expressed by the callers as
// add-of-complement, the way the hardware would wire it.

pub(crate) fn add(a: WordType, b: WordType) -> WordType {
    a.wrapping_add(b)
}

pub(crate) fn is_equal(a: WordType, b: WordType) -> bool {
    a == b
}

pub(crate) fn is_less_signed(a: WordType, b: WordType) -> bool {
    a < b
}

pub(crate) fn is_less_unsigned(a: WordType, b: WordType) -> bool {
    (a as u32) < (b as u32)
}

pub(crate) fn and(a: WordType, b: WordType) -> WordType {
    a & b
}

pub(crate) fn or(a: WordType, b: WordType) -> WordType {
    a | b
}

pub(crate) fn xor(a: WordType, b: WordType) -> WordType {
    a ^ b
}

pub(crate) fn shift_left(a: WordType, shamt: WordType) -> WordType {
    a << (shamt & 0x1f)
}

// shifted-in bits are zero
pub(crate) fn shift_right_logical(a: WordType, shamt: WordType) -> WordType {
    ((a as u32) >> (shamt & 0x1f)) as WordType
}

// shifted-in bits replicate the sign bit
pub(crate) fn shift_right_arithmetic(a: WordType, shamt: WordType) -> WordType {
    a >> (shamt & 0x1f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_right_variants() {
        assert_eq!(shift_right_logical(-16, 2), 0x3ffffffc);
        assert_eq!(shift_right_arithmetic(-16, 2), -4);
        assert_eq!(shift_right_arithmetic(16, 2), 4);
    }

    #[test]
    fn test_shift_amount_masked_to_five_bits() {
        assert_eq!(shift_left(1, 33), 2);
        assert_eq!(shift_right_logical(8, 32), 8);
    }

    #[test]
    fn test_sub_as_add_of_complement() {
        assert_eq!(add(add(5, !7), 1), -2);
        assert_eq!(add(add(WordType::MIN, !1), 1), WordType::MAX);
    }

    #[test]
    fn test_unsigned_compare() {
        assert!(is_less_unsigned(1, -1));
        assert!(!is_less_unsigned(-1, 1));
        assert!(is_less_signed(-1, 1));
    }
}
