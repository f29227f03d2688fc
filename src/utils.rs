use url::Url;

/// Canonical key for the per-source speed table.
///
/// Blob prefixes, fragments, query strings and trailing slashes are dropped so
/// that the same resource played with different tracking parameters shares one
/// stored speed. Sources that are not valid URLs are keyed by their trimmed
/// text; empty sources have no key.
pub fn normalize_source(src: &str) -> Option<String> {
    let trimmed = src.trim();
    let trimmed = trimmed.strip_prefix("blob:").unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(mut url) = Url::parse(trimmed) else {
        return Some(trimmed.to_string());
    };
    url.set_fragment(None);
    url.set_query(None);

    let normalized = url.as_str().trim_end_matches('/');
    if normalized.is_empty() {
        return Some(url.to_string());
    }
    Some(normalized.to_string())
}

#[macro_export]
macro_rules! id_type {
    ($name: ident $(, $derive:ident)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash $(, $derive)*)]
        pub struct $name(::uuid::Uuid);

        #[allow(unused)]
        impl $name {
            pub(crate) fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(val: ::uuid::Uuid) -> Self {
                Self(val)
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = ::uuid::Uuid;

            fn deref(&self) -> &::uuid::Uuid {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_strip_query_and_fragment() {
        // when
        let key = normalize_source("https://Media.Example.com/clip.mp4?session=abc#t=30");

        // then
        assert_eq!(key.as_deref(), Some("https://media.example.com/clip.mp4"));
    }

    #[test]
    fn should_strip_blob_prefix() {
        // when
        let key = normalize_source("blob:https://example.com/0b8e5a3c-0000/");

        // then
        assert_eq!(key.as_deref(), Some("https://example.com/0b8e5a3c-0000"));
    }

    #[test]
    fn should_keep_relative_sources_verbatim() {
        assert_eq!(
            normalize_source("  /media/intro.webm ").as_deref(),
            Some("/media/intro.webm")
        );
    }

    #[test]
    fn should_have_no_key_for_empty_sources() {
        assert_eq!(normalize_source(""), None);
        assert_eq!(normalize_source("   "), None);
        assert_eq!(normalize_source("blob:"), None);
    }
}
