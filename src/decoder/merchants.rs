use std::io::Read;

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use tracing::debug;

use crate::decoder::{DecodeError, DecoderOptions};
use crate::models::Merchant;

#[derive(Debug, Deserialize)]
struct MerchantRecord {
    #[serde(alias = "MERCHANT_ID", alias = "MerchantId", alias = "id")]
    merchant_id: String,
    #[serde(default, alias = "NAME", alias = "MERCHANT_NAME", alias = "merchant_name")]
    name: Option<String>
}

/// Reads the merchant reference set. Rows without an ID are skipped; a row
/// that does not fit the header ends decoding.
pub fn read_merchants<R: Read>(source: R, options: DecoderOptions) -> Result<Vec<Merchant>, DecodeError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(source);

    let mut merchants = Vec::new();

    for record in reader.deserialize::<MerchantRecord>() {
        let record = record.map_err(DecodeError::MalformedRecord)?;

        if record.merchant_id.is_empty() {
            debug!("Skipping merchant row without an ID");
            continue;
        }

        merchants.push(Merchant {
            merchant_id: record.merchant_id,
            name: record.name.filter(|name| !name.is_empty())
        });
    }

    Ok(merchants)
}
