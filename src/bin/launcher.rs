//! Xware Desktop launcher
//!
//! Starts the frontend, or hands the command-line arguments to the copy
//! that is already running.

use xware_desktop::app;
use xware_desktop::config::AppPaths;
use xware_desktop::ipc::CommandBatch;

fn main() {
    let commands = CommandBatch::from_args(
        std::env::args_os().map(|arg| arg.to_string_lossy().into_owned()),
    );

    let code = match AppPaths::discover().and_then(|paths| app::run(paths, commands)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Startup failed: {:#}", e);
            eprintln!("xware-desktop: {:#}", e);
            app::show_fatal_error(&e);
            1
        }
    };

    std::process::exit(code);
}
