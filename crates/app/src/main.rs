fn main() {
    if let Err(err) = pose_server::cli::run_from_env() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
