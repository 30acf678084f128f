//! Print the OpenAPI document of the HTTP surface.

use anyhow::Context;
use courtside_back::services::documentation::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let doc = ApiDoc::openapi()
        .to_pretty_json()
        .context("serialising OpenAPI document")?;
    println!("{doc}");
    Ok(())
}
