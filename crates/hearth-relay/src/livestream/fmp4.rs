//! Codec detection from fragmented MP4 init segments.

/// RFC 6381 codec string from the `avcC` or `hvcC` box in `segment`.
pub fn codec_string(segment: &[u8]) -> Option<String> {
    if let Some(pos) = find(segment, b"avcC") {
        // avcC: configurationVersion, profile, compatibility, level
        let body = segment.get(pos + 4..pos + 8)?;
        let [_version, profile, compat, level] = <[u8; 4]>::try_from(body).ok()?;
        return Some(format!("avc1.{profile:02x}{compat:02x}{level:02x}"));
    }
    find(segment, b"hvcC").map(|_| "hvc1".to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
