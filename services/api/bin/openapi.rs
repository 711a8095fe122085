//! Dumps the voicedesk OpenAPI document so clients can be generated without
//! starting the server. The output path comes from `OPENAPI_OUTPUT`.

use std::path::PathBuf;
use voicedesk_api::router::{DEFAULT_OPENAPI_OUTPUT, write_openapi_document};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let output = std::env::var("OPENAPI_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OPENAPI_OUTPUT));

    write_openapi_document(&output)?;
    println!("Wrote OpenAPI document to {}", output.display());
    Ok(())
}
