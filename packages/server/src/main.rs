#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Sigor dispatch API server.
//!
//! See [`sigor_server::run_server`] for the environment it reads.

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    sigor_server::run_server().await
}
