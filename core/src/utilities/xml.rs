/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::error::{Error, Result};

/// Extracts the text content of the first `<tag>...</tag>` pair in `doc`.
///
/// The stage-2 XML documents are flat and machine-generated, so a plain
/// substring scan is all the parsing they need.
pub fn get_tag(doc: &str, tag: &str) -> Result<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = doc
        .find(&open)
        .ok_or_else(|| Error::Malformed(format!("missing <{}> tag", tag)))
        .map(|p| p + open.len())?;
    let end = doc[start..]
        .find(&close)
        .ok_or_else(|| Error::Malformed(format!("unterminated <{}> tag", tag)))?;

    Ok(doc[start..start + end].trim().to_string())
}

/// Like [`get_tag`] but parses the content as a hex (`0x`-prefixed) or
/// decimal integer.
pub fn get_tag_usize(doc: &str, tag: &str) -> Result<usize> {
    let raw = get_tag(doc, tag)?;
    let parsed = if let Some(hexval) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        usize::from_str_radix(hexval, 16)
    } else {
        raw.parse()
    };

    parsed.map_err(|_| Error::Malformed(format!("non-numeric <{}> content: {}", tag, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_extraction() {
        let doc = r#"<?xml version="1.0"?><da><status>OK</status><length>0x40</length></da>"#;
        assert_eq!(get_tag(doc, "status").unwrap(), "OK");
        assert_eq!(get_tag_usize(doc, "length").unwrap(), 0x40);
        assert!(get_tag(doc, "missing").is_err());
    }
}
