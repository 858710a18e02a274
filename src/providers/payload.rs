// 🧩 Payload Sniffing - Unwrap the script-style responses served by one CDN family
//
// The same upstream serves JSON wrapped in several incompatible callback
// conventions. Each documented convention is one PayloadShape; the sniffer
// picks the shape and the extractor turns the body into plain JSON.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `PriceSpider.onload('name', {...});`
    SingleQuotedObject,
    /// `PriceSpider.onload('name', [{...}, ...]);`
    SingleQuotedArray,
    /// `callback({...})`
    JsonpObject,
    /// `PriceSpider.onload("name", {...});`
    CallbackObject,
    /// Body is already JSON.
    PlainJson,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not in any known format")]
    Unrecognized,

    #[error("{shape:?} payload is malformed: {source}")]
    Malformed {
        shape: PayloadShape,
        #[source]
        source: serde_json::Error,
    },
}

struct Wrapping {
    open_marker: &'static str,
    close_marker: &'static str,
    open: char,
    close: char,
}

impl PayloadShape {
    /// Detect the shape of a response body. Checked in a fixed order; the
    /// first matching shape wins.
    pub fn sniff(body: &str) -> Option<Self> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Some(PayloadShape::PlainJson);
        }

        [
            PayloadShape::SingleQuotedObject,
            PayloadShape::SingleQuotedArray,
            PayloadShape::JsonpObject,
            PayloadShape::CallbackObject,
        ]
        .into_iter()
        .find(|shape| {
            shape
                .wrapping()
                .is_some_and(|w| body.contains(w.open_marker))
        })
    }

    fn wrapping(&self) -> Option<Wrapping> {
        let (open_marker, close_marker, open, close) = match self {
            PayloadShape::SingleQuotedObject => ("', {", "})", '{', '}'),
            PayloadShape::SingleQuotedArray => ("', [", "])", '[', ']'),
            PayloadShape::JsonpObject => ("({", "})", '{', '}'),
            PayloadShape::CallbackObject => (", {", "})", '{', '}'),
            PayloadShape::PlainJson => return None,
        };
        Some(Wrapping {
            open_marker,
            close_marker,
            open,
            close,
        })
    }

    /// Slice the JSON document out of a body of this shape.
    fn extract(&self, body: &str) -> Option<String> {
        let Some(w) = self.wrapping() else {
            return Some(body.trim().to_string());
        };
        let (_, after) = body.split_once(w.open_marker)?;
        let end = after.rfind(w.close_marker)?;
        Some(format!("{}{}{}", w.open, &after[..end], w.close))
    }
}

/// Decode a provider response body into JSON, reporting which shape it had.
pub fn decode_payload(body: &str) -> Result<(PayloadShape, Value), PayloadError> {
    let shape = PayloadShape::sniff(body).ok_or(PayloadError::Unrecognized)?;
    let text = shape.extract(body).ok_or(PayloadError::Unrecognized)?;
    let value = serde_json::from_str(&text)
        .map_err(|source| PayloadError::Malformed { shape, source })?;
    Ok((shape, value))
}
