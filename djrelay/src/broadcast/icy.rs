//! ICY (SHOUTcast) in-band metadata blocks
//!
//! A block is one length byte `n` followed by `n * 16` bytes of text padded
//! with zeros. A single zero byte means "no change".

use crate::error::MetadataError;
use bytes::{BufMut, Bytes, BytesMut};

/// Largest block count a length byte can express
pub const MAX_BLOCKS: usize = 255;

const BLOCK_LEN: usize = 16;
const TITLE_PREFIX: &str = "StreamTitle='";
const TITLE_SUFFIX: &str = "';StreamURL='';";

/// The "metadata unchanged" marker
pub fn unchanged() -> Bytes {
    Bytes::from_static(&[0])
}

/// Cut `text` to at most `budget` bytes without splitting a character
fn truncate_utf8(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let mut end = budget;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode a stream title into a length-prefixed metadata block
pub fn encode(title: &str, budget: usize) -> Result<Bytes, MetadataError> {
    let escaped = truncate_utf8(title, budget).replace('\'', "\\'");
    let text = format!("{}{}{}", TITLE_PREFIX, escaped, TITLE_SUFFIX);

    let blocks = (text.len() + BLOCK_LEN - 1) / BLOCK_LEN;
    if blocks > MAX_BLOCKS {
        return Err(MetadataError::TooLong { blocks });
    }

    let mut block = BytesMut::with_capacity(1 + blocks * BLOCK_LEN);
    block.put_u8(blocks as u8);
    block.extend_from_slice(text.as_bytes());
    block.resize(1 + blocks * BLOCK_LEN, 0);
    Ok(block.freeze())
}

/// Extract the title from an encoded block
pub fn decode_title(block: &[u8]) -> Option<String> {
    let (&blocks, rest) = block.split_first()?;
    let payload = rest.get(..blocks as usize * BLOCK_LEN)?;
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
    let text = std::str::from_utf8(&payload[..end]).ok()?;
    let title = text.strip_prefix(TITLE_PREFIX)?.strip_suffix(TITLE_SUFFIX)?;
    Some(title.replace("\\'", "'"))
}
