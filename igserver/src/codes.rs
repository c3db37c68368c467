//! Redemption-code strings. 16 chars from an alphabet with the lookalikes
//! (I, O, 0, 1) removed, dash-grouped every 4: `ABCD-EFGH-JKLM-NPQR`.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_CHARS: usize = 16;
const GROUP: usize = 4;

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(CODE_CHARS + CODE_CHARS / GROUP - 1);
    for i in 0..CODE_CHARS {
        if i > 0 && i % GROUP == 0 {
            out.push('-');
        }
        out.push(ALPHABET[rng.random_range(0..ALPHABET.len())] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shape() {
        let code = generate_code();
        assert_eq!(19, code.len());
        let groups: Vec<&str> = code.split('-').collect();
        assert_eq!(4, groups.len());
        for group in groups {
            assert_eq!(4, group.len());
            for c in group.bytes() {
                assert!(ALPHABET.contains(&c), "unexpected char {} in {code}", c as char);
            }
        }
    }

    #[test]
    fn test_code_excludes_lookalikes() {
        for _ in 0..200 {
            let code = generate_code();
            for bad in ['I', 'O', '0', '1'] {
                assert!(!code.contains(bad), "{code} contains {bad}");
            }
        }
    }

    #[test]
    fn test_codes_differ() {
        // 32^16 values, a collision here means the rng is broken
        assert_ne!(generate_code(), generate_code());
    }
}
