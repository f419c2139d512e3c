//! Writes the status API's OpenAPI specification to stdout.
//!
//! Run with: cargo run --bin gen-openapi -p scanwatch > openapi.json

use std::process::ExitCode;

fn main() -> ExitCode {
    match scanwatch::api::get_openapi_json() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Failed to serialize OpenAPI spec: {err}");
            ExitCode::FAILURE
        }
    }
}
