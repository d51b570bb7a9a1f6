pub mod config;
pub mod content;
pub mod directory;
pub mod error;
pub mod prelude;
pub mod swarm;
pub mod torrent;
pub mod tracker;
pub mod wire;

/// initializes the tracing subscriber shared by both binaries. `compact`
/// switches from the pretty multi-line layout to one line per event,
/// useful when output is piped into another tool.
pub fn init_tracing(compact: bool) {
    use tracing::Level;

    let subscriber = tracing_subscriber::fmt().with_max_level(Level::DEBUG).with_target(false);

    if compact {
        subscriber.compact().init();
    } else {
        subscriber.pretty().init();
    }
}
