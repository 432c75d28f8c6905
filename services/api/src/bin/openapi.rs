//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the perspective REST API.
//!
//! Usage: `openapi [OUTPUT]`, where OUTPUT defaults to `openapi.json`.

use api_lib::web::rest::ApiDoc;
use std::path::{Path, PathBuf};
use utoipa::OpenApi;

fn write_document(doc: &utoipa::openapi::OpenApi, output: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, doc.to_pretty_json()?)?;
    Ok(doc.paths.paths.len())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi.json"));
    let routes = write_document(&ApiDoc::openapi(), &output)?;
    println!("Wrote {} perspective routes to {}", routes, output.display());
    Ok(())
}
