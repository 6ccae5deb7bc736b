use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode a password the way the backend expects it: UTF-8 bytes in the
/// standard Base64 alphabet with the trailing `=` padding removed.
pub fn encode_password(password: &str) -> String {
    let encoded = STANDARD.encode(password.as_bytes());
    encoded.trim_end_matches('=').to_string()
}

/// Mask a mobile number for logs and display, keeping the first three and
/// last four digits.
pub fn mask_mobile(mobile: &str) -> String {
    let chars: Vec<char> = mobile.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_password_strips_padding() {
        assert_eq!(encode_password("secret"), "c2VjcmV0");
        assert_eq!(encode_password("a"), "YQ"); // "YQ==" unpadded
        assert_eq!(encode_password("ab"), "YWI"); // "YWI=" unpadded
        assert_eq!(encode_password(""), "");
    }

    #[test]
    fn test_encode_password_uses_standard_alphabet() {
        // UTF-8 bytes ef af bf give "76+/" here and "76-_" in the URL-safe alphabet
        assert_eq!(encode_password("\u{fbff}"), "76+/");
        assert_eq!(encode_password("密码"), "5a+G56CB");
    }

    #[test]
    fn test_mask_mobile() {
        assert_eq!(mask_mobile("13800000000"), "138****0000");
        assert_eq!(mask_mobile("12345"), "*****");
    }
}
