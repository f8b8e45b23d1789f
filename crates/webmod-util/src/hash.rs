/// Short, stable hex digest of a string, used to key artifact file names.
///
/// `len` is clamped to the full digest length (64).
#[must_use]
pub fn short_hash(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    let hex = hex.as_str();
    hex[..len.min(hex.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_prefix_and_stable() {
        assert_eq!(short_hash("hello world", 8), "d74981ef");
        assert_eq!(short_hash("hello world", 8), short_hash("hello world", 8));
        assert_ne!(short_hash("lodash", 8), short_hash("react", 8));
        assert_eq!(short_hash("x", 500).len(), 64);
    }
}
