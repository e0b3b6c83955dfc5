//! Key file parsing.
//!
//! One key per line, either 32 hex digits or four words separated by commas
//! or whitespace. `#` starts a comment. Blank lines are ignored.
//!
//! ```text
//! # dumped from client 550
//! 0x1a2b3c4d5e6f70819203a4b5c6d7e8f9
//! -1495012183, 1829379871, 409227734, -1016474391
//! ```

use std::path::Path;

use keysweep_crypto::KeyMaterial;

use crate::ServerError;

/// Parse key file contents, in file order.
///
/// All-zero keys are dropped: the zero key marks an unencrypted block and
/// never needs testing.
///
/// # Errors
///
/// - `Import`: a line is neither form; nothing is returned
pub fn parse_keys(input: &str) -> Result<Vec<KeyMaterial>, ServerError> {
    let mut keys = Vec::new();

    for (index, raw) in input.lines().enumerate() {
        let line = raw.split_once('#').map_or(raw, |(before, _)| before).trim();
        if line.is_empty() {
            continue;
        }

        let key: KeyMaterial = line
            .parse()
            .map_err(|e| ServerError::Import { line: index + 1, reason: format!("{e}") })?;

        if key.is_zero() {
            tracing::debug!(line = index + 1, "Skipping zero key");
            continue;
        }

        keys.push(key);
    }

    Ok(keys)
}

/// Read and parse a key file.
///
/// # Errors
///
/// - `Io`: the file cannot be read
/// - `Import`: see [`parse_keys`]
pub fn read_key_file(path: &Path) -> Result<Vec<KeyMaterial>, ServerError> {
    let contents = std::fs::read_to_string(path)?;
    parse_keys(&contents)
}
