//! # Command Result Flattening
//!
//! Raw commands can return any reply shape. Flow steps want a flat list of
//! strings, so replies are reduced as follows:
//!
//! ```text
//! null / nil bulk      -> []
//! bulk "a\nb\nc"       -> ["a", "b", "c"]   (top level only, trailing \r trimmed)
//! +OK / :42            -> ["OK"] / ["42"]
//! array / map          -> elements depth-first, maps as key, value, key, value
//! -ERR ...             -> FkvError::Server
//! ```

use fkv_client::RespValue;
use fkv_common::{FkvError, FkvResult};

/// Flattens a command reply into a list of strings.
pub fn flatten_reply(reply: RespValue) -> FkvResult<Vec<String>> {
    let mut out = Vec::new();
    match reply {
        RespValue::Bulk(Some(data)) => {
            let text = String::from_utf8_lossy(&data);
            out.extend(
                text.split('\n')
                    .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string()),
            );
        }
        other => flatten_into(other, &mut out)?,
    }
    Ok(out)
}

fn flatten_into(reply: RespValue, out: &mut Vec<String>) -> FkvResult<()> {
    match reply {
        RespValue::Null | RespValue::Bulk(None) => {}
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => {
            out.push(String::from_utf8_lossy(&data).into_owned());
        }
        RespValue::Integer(value) => out.push(value.to_string()),
        RespValue::Error(message) => return Err(FkvError::server(&message)),
        RespValue::Array(items) => {
            for item in items {
                flatten_into(item, out)?;
            }
        }
        RespValue::Map(entries) => {
            for (key, value) in entries {
                flatten_into(key, out)?;
                flatten_into(value, out)?;
            }
        }
    }
    Ok(())
}
