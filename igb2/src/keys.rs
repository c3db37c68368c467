//! Object key derivation. Keys look like `gemini/2025/06/30/<uuid>.png`,
//! date-partitioned so bucket listings stay usable.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn ext_for_mime(mime: &str) -> &'static str {
    // mime may carry parameters ("image/png; charset=binary")
    match mime.split(';').next().unwrap_or("").trim() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

pub fn object_key(prefix: &str, mime: &str) -> String {
    object_key_at(prefix, mime, Utc::now())
}

pub fn object_key_at(prefix: &str, mime: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}{}/{}.{}",
        prefix,
        now.format("%Y/%m/%d"),
        Uuid::new_v4(),
        ext_for_mime(mime)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ext_for_mime() {
        assert_eq!("png", ext_for_mime("image/png"));
        assert_eq!("jpg", ext_for_mime("image/jpeg"));
        assert_eq!("jpg", ext_for_mime("image/jpg"));
        assert_eq!("webp", ext_for_mime("image/webp"));
        assert_eq!("bin", ext_for_mime("application/octet-stream"));
        assert_eq!("png", ext_for_mime("image/png; charset=binary"));
        assert_eq!("bin", ext_for_mime(""));
    }

    #[test]
    fn test_object_key_layout() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();
        let key = object_key_at("cankaotu/", "image/png", now);
        assert!(key.starts_with("cankaotu/2025/03/07/"), "{key}");
        assert!(key.ends_with(".png"), "{key}");
        assert!(!key.contains(".."));
        // prefix + date + uuid + ext
        let uuid_part = key
            .strip_prefix("cankaotu/2025/03/07/")
            .unwrap()
            .strip_suffix(".png")
            .unwrap();
        assert_eq!(36, uuid_part.len());
    }

    #[test]
    fn test_object_keys_unique() {
        let a = object_key("gemini/", "image/png");
        let b = object_key("gemini/", "image/png");
        assert_ne!(a, b);
    }
}
