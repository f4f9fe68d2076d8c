const CONTROL_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";

/// Upper-cased, trimmed DNI as stored in `users.dni`.
pub fn normalize(dni: &str) -> String {
    dni.trim().to_ascii_uppercase()
}

/// Spanish DNI: eight digits and the control letter for `number % 23`.
pub fn is_valid(dni: &str) -> bool {
    let dni = normalize(dni);
    let bytes = dni.as_bytes();
    if bytes.len() != 9 || !bytes[..8].iter().all(u8::is_ascii_digit) {
        return false;
    }

    let number: usize = match dni[..8].parse() {
        Ok(n) => n,
        Err(_) => return false,
    };
    CONTROL_LETTERS[number % 23] == bytes[8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_numbers() {
        assert!(is_valid("12345678Z"));
        assert!(is_valid("00000000T"));
        assert!(is_valid("99999999R"));
        assert!(is_valid(" 12345678z "));
    }

    #[test]
    fn wrong_letter_or_shape() {
        assert!(!is_valid("12345678A"));
        assert!(!is_valid("1234567Z"));
        assert!(!is_valid("1234567AZ"));
        assert!(!is_valid("123456789"));
        assert!(!is_valid(""));
        assert!(!is_valid("１２３４５６７８Z"));
    }

    #[test]
    fn normalize_uppercases() {
        assert_eq!(normalize(" 12345678z"), "12345678Z");
    }
}
