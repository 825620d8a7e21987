//! Inspect command - list the records of a binary cache

use crate::cache::read_container;
use crate::cli::args::{InspectArgs, OutputFormat};
use crate::error::DevfarmResult;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hex characters of the value digest shown per record
const DIGEST_CHARS: usize = 12;

/// One record as shown to the user
#[derive(Debug, Serialize)]
struct RecordInfo {
    key: String,
    size: usize,
    sha256: String,
}

/// Execute the inspect command
pub fn execute(args: InspectArgs) -> DevfarmResult<()> {
    let records = read_container(&args.file)?;

    let infos: Vec<RecordInfo> = records
        .iter()
        .map(|(key, value)| RecordInfo {
            key: display_key(key),
            size: value.len(),
            sha256: hex::encode(Sha256::digest(value)),
        })
        .collect();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&infos)?),
        OutputFormat::Plain => {
            for info in &infos {
                println!("{}", info.key);
            }
        }
        OutputFormat::Table => {
            let ctx = UiContext::detect();
            ui::section(&ctx, &args.file.display().to_string());
            ui::key_value(&ctx, "Records", &infos.len().to_string());
            ui::key_value(
                &ctx,
                "Value bytes",
                &infos.iter().map(|i| i.size).sum::<usize>().to_string(),
            );
            println!();

            if infos.is_empty() {
                ui::step_info(&ctx, "Cache is empty");
                return Ok(());
            }

            println!(
                "{:<12} {:>10}  {}",
                style("SHA256").bold(),
                style("SIZE").bold(),
                style("KEY").bold()
            );
            for info in &infos {
                println!(
                    "{:<12} {:>10}  {}",
                    &info.sha256[..DIGEST_CHARS],
                    info.size,
                    info.key
                );
            }
        }
    }
    Ok(())
}

/// Keys are usually text; anything else is shown as hex
fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_keys_shown_verbatim() {
        assert_eq!(display_key(b"conv2d_3x3_s1"), "conv2d_3x3_s1");
    }

    #[test]
    fn binary_keys_shown_as_hex() {
        assert_eq!(display_key(&[0x00, 0xff]), "0x00ff");
        assert_eq!(display_key(b"line\nbreak"), "0x6c696e650a627265616b");
    }
}
