/// Ratio aliases accepted in `size` fields, resolved to pixel dimensions.
pub const SIZE_ALIASES: &[(&str, (u32, u32))] = &[
    ("1:1", (1024, 1024)),
    ("4:3", (1152, 864)),
    ("3:4", (864, 1152)),
    ("16:9", (1280, 720)),
    ("9:16", (720, 1280)),
    ("3:2", (1248, 832)),
    ("2:3", (832, 1248)),
    ("21:9", (1512, 648)),
];

/// Resolve a size string to `(width, height)`. Accepts `WxH` pixel sizes and
/// the ratio aliases above; anything else falls back to the provided default.
pub fn resolve_size(requested: Option<&str>, default: &str) -> (u32, u32) {
    requested
        .and_then(parse_size)
        .or_else(|| parse_size(default))
        .unwrap_or((1024, 1024))
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let value = value.trim();
    if let Some((_, dims)) = SIZE_ALIASES.iter().find(|(alias, _)| *alias == value) {
        return Some(*dims);
    }
    let (w, h) = value.split_once(['x', 'X', '*'])?;
    let width = w.trim().parse().ok()?;
    let height = h.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_sizes_parse() {
        assert_eq!(resolve_size(Some("512x512"), "1024x1024"), (512, 512));
        assert_eq!(resolve_size(Some("1024X768"), "1024x1024"), (1024, 768));
    }

    #[test]
    fn ratio_aliases_resolve() {
        assert_eq!(resolve_size(Some("16:9"), "1024x1024"), (1280, 720));
        assert_eq!(resolve_size(Some("1:1"), "2048x2048"), (1024, 1024));
    }

    #[test]
    fn invalid_sizes_fall_back_to_default() {
        assert_eq!(resolve_size(Some("huge"), "1024x1024"), (1024, 1024));
        assert_eq!(resolve_size(Some("0x100"), "768x768"), (768, 768));
        assert_eq!(resolve_size(None, "also-bad"), (1024, 1024));
    }
}
