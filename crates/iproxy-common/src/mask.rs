/// Mask key material for any API response: 4-char prefix + `...` + 4-char
/// suffix. Short keys collapse to a fixed placeholder so no substring of the
/// original survives.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "********".to_string();
    }
    let head: String = key.chars().take(4).collect();
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_keys_keep_prefix_and_suffix() {
        assert_eq!(mask_key("hf_abcdefghijklmnop"), "hf_a...mnop");
    }

    #[test]
    fn short_keys_are_fully_hidden() {
        assert_eq!(mask_key("12345678"), "********");
        assert_eq!(mask_key(""), "********");
    }

    #[test]
    fn masked_never_contains_middle() {
        let key = "sk-0123456789abcdef0123456789abcdef";
        let masked = mask_key(key);
        let middle = &key[4..key.len() - 4];
        for window in 4..=middle.len() {
            for start in 0..=middle.len() - window {
                assert!(!masked.contains(&middle[start..start + window]));
            }
        }
    }
}
