//! Thin binary entrypoint; everything lives in the library so it can be tested.

use std::process;

#[tokio::main]
async fn main() {
    let exit_code = beacon_cli::run().await;
    process::exit(exit_code);
}
