use rand::{Rng, rng};

/// Upper-case letters and digits without the look-alikes 0/O and 1/I/L.
const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 6;

pub fn generate_invite_code() -> String {
    let mut rng = rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(CHARSET[rng.random_range(0..CHARSET.len())]))
        .collect()
}

pub fn is_valid_invite_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CHARSET.contains(&b))
}

/// Normalises user input: drops whitespace and upper-cases.
pub fn normalize_invite_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_invite_code();
            assert!(is_valid_invite_code(&code), "{code}");
        }
    }

    #[test]
    fn rejects_ambiguous_characters_and_wrong_length() {
        assert!(is_valid_invite_code("ABC234"));
        assert!(!is_valid_invite_code("ABC0O1"));
        assert!(!is_valid_invite_code("ABCL23"));
        assert!(!is_valid_invite_code("ABC23"));
        assert!(!is_valid_invite_code("abc234"));
    }

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(normalize_invite_code(" ab c2 34\n"), "ABC234");
    }
}
