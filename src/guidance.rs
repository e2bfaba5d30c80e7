//! Guidance text attached to rule types.
//!
//! Guidance is shown to users next to failed evaluations, so it must be
//! plain text (markdown is fine) without markup.

use thiserror::Error;

/// Largest accepted guidance, in bytes.
pub const MAX_GUIDANCE_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuidanceError {
    #[error("guidance is not valid UTF-8")]
    NotUtf8,

    #[error("guidance is too long ({0} bytes, at most {max} allowed)", max = MAX_GUIDANCE_BYTES)]
    TooLong(usize),

    #[error("guidance contains HTML markup")]
    ContainsMarkup,
}

/// Checks raw guidance bytes and returns them as text.
pub fn sanitize(raw: &[u8]) -> Result<&str, GuidanceError> {
    if raw.len() > MAX_GUIDANCE_BYTES {
        return Err(GuidanceError::TooLong(raw.len()));
    }
    let text = std::str::from_utf8(raw).map_err(|_| GuidanceError::NotUtf8)?;
    if contains_tag(text) {
        return Err(GuidanceError::ContainsMarkup);
    }
    Ok(text)
}

/// Finds anything an HTML parser would read as a tag, comment or doctype:
/// `<` followed by a letter, `/`, `!` or `?`, closed by a later `>`.
fn contains_tag(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'<'
            && bytes
                .get(i + 1)
                .is_some_and(|&next| next.is_ascii_alphabetic() || matches!(next, b'/' | b'!' | b'?'))
            && bytes[i + 1..].contains(&b'>')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_markdown_is_accepted() {
        let text = "Enable branch protection.\n\n* go to Settings\n* `a < b` and `c > d` are fine";
        assert_eq!(sanitize(text.as_bytes()), Ok(text));
    }

    #[test]
    fn test_markup_is_rejected() {
        for text in [
            "<b>bold</b>",
            "click <a href='x'>here</a>",
            "<!-- hidden -->",
            "</p>",
            "<script>alert(1)</script>",
        ] {
            assert_eq!(sanitize(text.as_bytes()), Err(GuidanceError::ContainsMarkup), "{text}");
        }
    }

    #[test]
    fn test_length_limit() {
        assert!(sanitize(&vec![b'a'; MAX_GUIDANCE_BYTES]).is_ok());
        assert_eq!(
            sanitize(&vec![b'a'; MAX_GUIDANCE_BYTES + 1]),
            Err(GuidanceError::TooLong(MAX_GUIDANCE_BYTES + 1))
        );
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(sanitize(&[0x66, 0xff, 0x6f]), Err(GuidanceError::NotUtf8));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            GuidanceError::TooLong(5000).to_string(),
            "guidance is too long (5000 bytes, at most 4096 allowed)"
        );
        assert_eq!(
            GuidanceError::ContainsMarkup.to_string(),
            "guidance contains HTML markup"
        );
    }

    proptest! {
        #[test]
        fn text_without_angle_brackets_is_accepted(text in "[^<>]{0,512}") {
            prop_assume!(text.len() <= MAX_GUIDANCE_BYTES);
            prop_assert_eq!(sanitize(text.as_bytes()), Ok(text.as_str()));
        }

        #[test]
        fn wrapping_in_a_tag_is_rejected(text in "[^<>]{0,64}", tag in "[a-z]{1,8}") {
            let html = format!("<{tag}>{text}</{tag}>");
            prop_assert_eq!(sanitize(html.as_bytes()), Err(GuidanceError::ContainsMarkup));
        }
    }
}
