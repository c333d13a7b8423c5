//! Debug logs of the engine go to a file, not to the chat buffers: writing them to stdout would
//! interleave with the message output.

use std::path::PathBuf;

pub(crate) fn init(path: PathBuf) {
    if std::env::var("RUST_LOG").is_err() {
        return;
    }
    match std::fs::File::create(&path) {
        Err(err) => {
            eprintln!("Could not create debug log file {:?}: {}", path, err);
        }
        Ok(file) => {
            env_logger::Builder::from_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
    }
}
