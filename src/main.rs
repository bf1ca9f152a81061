fn main() {
    if let Err(err) = resource_estimator::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
