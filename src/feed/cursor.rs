// SPDX-License-Identifier: MPL-2.0

use crate::db::PostKey;
use crate::feed::FeedError;

const SEPARATOR: &str = "::";

/// Encode a sort position as `<indexedAt>::<cid>`.
pub fn encode_cursor(key: &PostKey) -> String {
    format!("{}{SEPARATOR}{}", key.indexed_at, key.cid)
}

pub fn decode_cursor(cursor: &str) -> Result<PostKey, FeedError> {
    let malformed = || FeedError::InvalidRequest(format!("malformed cursor: {cursor}"));

    let (indexed_at, cid) = cursor.split_once(SEPARATOR).ok_or_else(malformed)?;
    if indexed_at.is_empty() || cid.is_empty() || cid.contains(SEPARATOR) {
        return Err(malformed());
    }

    Ok(PostKey {
        indexed_at: indexed_at.to_string(),
        cid: cid.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let key = PostKey {
            indexed_at: "2025-03-15T00:00:00.000Z".to_string(),
            cid: "bafytest1".to_string(),
        };
        let encoded = encode_cursor(&key);
        assert_eq!(encoded, "2025-03-15T00:00:00.000Z::bafytest1");
        assert_eq!(decode_cursor(&encoded).unwrap(), key);
    }

    #[test]
    fn test_malformed_cursors_rejected() {
        for bad in [
            "no-separator",
            "",
            "::bafytest1",
            "2025-03-15T00:00:00.000Z::",
            "a::b::c",
        ] {
            assert!(
                matches!(decode_cursor(bad), Err(FeedError::InvalidRequest(_))),
                "accepted {bad:?}"
            );
        }
    }
}
