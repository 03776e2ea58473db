//! roomstage - headless room staging renderer.
//!
//! Takes one scene request (camera pose, optional room scan, furniture assets
//! with placements), composes the scene, renders it to an RGBA PNG and
//! optionally saves the scene so a later request can extend it.

mod app;
mod assets;
mod compose;
mod config;
mod error;
mod materials;
mod persist;
mod render;
mod request;
mod scene;
#[cfg(test)]
mod test_support;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let status = app::run(std::env::args().skip(1).collect());
    std::process::exit(status);
}
