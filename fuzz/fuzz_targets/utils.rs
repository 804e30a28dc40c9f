use std::str;

pub const MAX_INPUT_SIZE: usize = 256 * 1024;

/// Returns a UTF-8 view of `data` truncated to `MAX_INPUT_SIZE`, or `None` if the prefix is not
/// valid UTF-8.
pub fn truncate_utf8(data: &[u8]) -> Option<&str> {
    let cap = data.len().min(MAX_INPUT_SIZE);
    match str::from_utf8(&data[..cap]) {
        Ok(text) => Some(text),
        Err(err) if err.valid_up_to() > 0 => str::from_utf8(&data[..err.valid_up_to()]).ok(),
        Err(_) => None,
    }
}
