use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("IRONSTYLE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = ironstyle::run_from_env() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
