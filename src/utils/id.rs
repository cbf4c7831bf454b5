//! Node identifier generation.

use rand::Rng;

/// Length of a generated node id.
pub const NODE_ID_LEN: usize = 5;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a short node id of uppercase ASCII letters.
///
/// Uniqueness is not guaranteed and collisions between peers are not detected.
pub fn generate_node_id() -> String {
    let mut rng = rand::rng();
    (0..NODE_ID_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shape() {
        for _ in 0..100 {
            let id = generate_node_id();
            assert_eq!(id.len(), NODE_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_uppercase()));
        }
    }
}
