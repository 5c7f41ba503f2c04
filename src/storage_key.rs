//! Storage key generation, per spec.md §6:
//! `<userId>_<unixMillis>_<base36-6-char-random>.<extension>`.

use crate::models::UserId;
use crate::sanitize::extension_of;
use chrono::Utc;
use rand::Rng;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char).collect()
}

pub fn generate(user_id: &UserId, original_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = random_base36(6);
    let extension = extension_of(original_name);
    format!("{user_id}_{millis}_{random}{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_extension_and_user() {
        let user_id = UserId::new("u1");
        let key = generate(&user_id, "report.pdf");
        assert!(key.starts_with("u1_"));
        assert!(key.ends_with(".pdf"));
    }

    #[test]
    fn no_extension_when_filename_has_none() {
        let user_id = UserId::new("u1");
        let key = generate(&user_id, "noext");
        assert!(!key.contains('.'));
    }

    #[test]
    fn keys_are_distinct() {
        let user_id = UserId::new("u1");
        let a = generate(&user_id, "f.bin");
        let b = generate(&user_id, "f.bin");
        assert_ne!(a, b);
    }
}
