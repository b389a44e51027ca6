//! Encryption key retrieval.

use anyhow::{Context, Result};
use switchbot_core::account::AccountClient;

use crate::cli::OutputFormat;
use crate::util::print_output;

pub async fn cmd_get_key(mac: &str, username: &str, password: &str, format: OutputFormat) -> Result<()> {
    let client = AccountClient::new()?;
    let key = client
        .retrieve_encryption_key(mac, username, password)
        .await
        .context("Failed to retrieve encryption key")?;

    let text = format!(
        "key_id = \"{}\"\nencryption_key = \"{}\"",
        key.key_id, key.encryption_key
    );
    print_output(format, &key, &text)
}
